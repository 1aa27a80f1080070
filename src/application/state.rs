//! Ephemeral task and job state.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    entities::{Job, Task},
    error::DomainError,
};

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state store unavailable: {0}")]
    Backend(String),
    #[error(transparent)]
    Malformed(#[from] DomainError),
}

impl StateError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

/// TTL-backed store for in-flight tasks and jobs.
///
/// Every `put` overwrites the whole record and resets its time-to-live. A
/// `get` for a key that does not exist returns `Ok(None)`; a key that exists
/// but cannot be decoded is an error.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn put_task(&self, task: &Task) -> Result<(), StateError>;
    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, StateError>;
    async fn delete_task(&self, id: Uuid) -> Result<(), StateError>;

    async fn put_job(&self, job: &Job) -> Result<(), StateError>;
    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StateError>;
    async fn delete_job(&self, id: Uuid) -> Result<(), StateError>;
}
