//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::entities::{DurableTaskRecord, NewDurableTask};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("record violates constraint `{constraint}`: {message}")]
    Integrity { constraint: String, message: String },
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Durable store for terminal task records.
#[async_trait]
pub trait TasksRepo: Send + Sync {
    /// Insert a terminal record inside a single transaction.
    ///
    /// A second insert for the same id fails with [`RepoError::Duplicate`]
    /// and leaves the first record untouched.
    async fn create_task(&self, task: NewDurableTask) -> Result<DurableTaskRecord, RepoError>;

    async fn find_task(&self, id: Uuid) -> Result<Option<DurableTaskRecord>, RepoError>;

    /// Tasks owned by `user_id`, newest first.
    async fn list_tasks_for_owner(&self, user_id: Uuid)
    -> Result<Vec<DurableTaskRecord>, RepoError>;

    /// Returns `false` when no record matched.
    async fn delete_task(&self, id: Uuid) -> Result<bool, RepoError>;
}
