//! Application services layer.

pub mod broker;
pub mod collaborators;
pub mod error;
pub mod pipeline;
pub mod repos;
pub mod state;
pub mod tasks;
