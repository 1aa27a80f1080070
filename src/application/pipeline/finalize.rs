use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::{
    application::{
        pipeline::{Stage, StageError, StageOutcome, decode},
        repos::{RepoError, TasksRepo},
        state::StateStore,
    },
    domain::{entities::NewDurableTask, types::StageKind},
};

/// Copies a terminal task into the durable store.
///
/// Redelivery of the same message is expected: the durable store's unique
/// id turns the second insert into [`StageOutcome::Duplicate`].
pub struct FinalizeStage {
    state: Arc<dyn StateStore>,
    tasks: Arc<dyn TasksRepo>,
}

impl FinalizeStage {
    pub fn new(state: Arc<dyn StateStore>, tasks: Arc<dyn TasksRepo>) -> Self {
        Self { state, tasks }
    }
}

#[async_trait]
impl Stage for FinalizeStage {
    fn kind(&self) -> StageKind {
        StageKind::Finalize
    }

    async fn process_message(&self, body: &[u8]) -> Result<StageOutcome, StageError> {
        let message = decode(body)?;
        let Some(task) = self.state.get_task(message.id).await? else {
            warn!(
                target = "application::pipeline::finalize",
                task_id = %message.id,
                "Task state missing; dropping stale message"
            );
            return Ok(StageOutcome::Stale);
        };

        if !task.status.is_terminal() {
            return Err(StageError::NonTerminal {
                id: task.id,
                status: task.status,
            });
        }
        let record = NewDurableTask::try_from(&task)?;

        let outcome = match self.tasks.create_task(record).await {
            Ok(stored) => {
                info!(
                    target = "application::pipeline::finalize",
                    task_id = %stored.id,
                    status = stored.status.as_str(),
                    "Task persisted"
                );
                StageOutcome::Completed
            }
            Err(RepoError::Duplicate { constraint }) => {
                info!(
                    target = "application::pipeline::finalize",
                    task_id = %task.id,
                    constraint = %constraint,
                    "Task already exists; already processed"
                );
                StageOutcome::Duplicate
            }
            Err(err) => return Err(err.into()),
        };

        self.state.delete_job(task.id).await?;
        Ok(outcome)
    }
}
