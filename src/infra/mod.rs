//! Infrastructure adapters and runtime bootstrap.

pub mod broker;
pub mod db;
pub mod error;
pub mod llm;
pub mod render;
pub mod state;
pub mod telemetry;
pub mod uploads;
