//! Pipeline stages and the reliable consumer that drives them.

mod consumer;
mod finalize;
mod ingest;
mod render;

pub use consumer::{
    DEFAULT_MAX_RETRIES, DeliveryDecision, Disposition, PREFETCH_COUNT, ReliableConsumer,
    RetryPolicy,
};
pub(crate) use consumer::{
    METRIC_ESCALATIONS_TOTAL, METRIC_MESSAGES_TOTAL, METRIC_STAGE_DURATION_MS,
};
pub use finalize::FinalizeStage;
pub use ingest::IngestStage;
pub use render::RenderStage;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

use crate::{
    application::{
        broker::{BrokerError, Publisher},
        collaborators::CollaboratorError,
        repos::RepoError,
        state::{StateError, StateStore},
    },
    domain::{
        entities::{Job, Task, TaskMessage},
        error::DomainError,
        types::{StageKind, TaskStatus},
    },
};

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("task {id} reached finalize with non-terminal status `{}`", .status.as_str())]
    NonTerminal { id: Uuid, status: TaskStatus },
}

/// Result of a stage run that the consumer acknowledges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// State was written and the message was published to the next stage.
    Forwarded,
    /// The terminal record was persisted.
    Completed,
    /// A terminal record for this task already existed.
    Duplicate,
    /// The referenced task is no longer in the ephemeral store.
    Stale,
}

impl StageOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            StageOutcome::Forwarded => "forwarded",
            StageOutcome::Completed => "completed",
            StageOutcome::Duplicate => "duplicate",
            StageOutcome::Stale => "stale",
        }
    }
}

/// One worker role. `Ok` is acknowledged; `Err` is rejected into the retry
/// cycle. Implementations must finish every write before returning.
#[async_trait]
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;

    async fn process_message(&self, body: &[u8]) -> Result<StageOutcome, StageError>;
}

/// Publishes the unchanged task pointer to the next stage's queue.
#[derive(Clone)]
pub struct Forwarder {
    publisher: Arc<dyn Publisher>,
    exchange: String,
    routing_key: String,
}

impl Forwarder {
    pub fn new(
        publisher: Arc<dyn Publisher>,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            publisher,
            exchange: exchange.into(),
            routing_key: routing_key.into(),
        }
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub async fn forward(&self, message: &TaskMessage) -> Result<(), BrokerError> {
        let payload = message
            .to_bytes()
            .map_err(|err| BrokerError::publish(&self.exchange, &self.routing_key, err))?;
        self.publisher
            .publish(&self.exchange, &self.routing_key, &payload)
            .await
    }
}

pub(crate) fn decode(body: &[u8]) -> Result<TaskMessage, StageError> {
    TaskMessage::from_slice(body).map_err(StageError::from)
}

/// Load the task and its job, or `None` when either has gone.
pub(crate) async fn resolve(
    stage: StageKind,
    state: &dyn StateStore,
    id: Uuid,
) -> Result<Option<(Task, Job)>, StageError> {
    let task = state.get_task(id).await?;
    let job = state.get_job(id).await?;

    match (task, job) {
        (Some(task), Some(job)) => Ok(Some((task, job))),
        (task, job) => {
            warn!(
                target = "application::pipeline",
                stage = stage.as_str(),
                task_id = %id,
                task_present = task.is_some(),
                job_present = job.is_some(),
                "Task state missing; dropping stale message"
            );
            Ok(None)
        }
    }
}

/// Mark task and job as failed and write both back.
///
/// Write errors are logged rather than returned so the caller can still
/// reject the delivery with the original failure.
pub(crate) async fn record_failure(
    stage: StageKind,
    state: &dyn StateStore,
    mut task: Task,
    mut job: Job,
    failure: &StageError,
) {
    let message = failure.to_string();
    job.mark_failed(message.clone());
    task.mark_failed(message);

    if let Err(err) = state.put_job(&job).await {
        error!(
            target = "application::pipeline",
            stage = stage.as_str(),
            task_id = %job.id,
            error = %err,
            "Failed to persist job error state"
        );
    }
    if let Err(err) = state.put_task(&task).await {
        error!(
            target = "application::pipeline",
            stage = stage.as_str(),
            task_id = %task.id,
            error = %err,
            "Failed to persist task error state"
        );
    }
}
