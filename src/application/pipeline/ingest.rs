use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::{
    application::{
        collaborators::{CollaboratorError, TextTransformer},
        pipeline::{Forwarder, Stage, StageError, StageOutcome, decode, record_failure, resolve},
        state::StateStore,
    },
    domain::types::{JobStage, StageKind, TaskStatus},
};

/// Turns the submitted text into markdown and hands the task to rendering.
pub struct IngestStage {
    state: Arc<dyn StateStore>,
    transformer: Arc<dyn TextTransformer>,
    forwarder: Forwarder,
}

impl IngestStage {
    pub fn new(
        state: Arc<dyn StateStore>,
        transformer: Arc<dyn TextTransformer>,
        forwarder: Forwarder,
    ) -> Self {
        Self {
            state,
            transformer,
            forwarder,
        }
    }
}

#[async_trait]
impl Stage for IngestStage {
    fn kind(&self) -> StageKind {
        StageKind::Ingest
    }

    async fn process_message(&self, body: &[u8]) -> Result<StageOutcome, StageError> {
        let message = decode(body)?;
        let Some((mut task, mut job)) = resolve(self.kind(), self.state.as_ref(), message.id).await?
        else {
            return Ok(StageOutcome::Stale);
        };

        let markdown = match self.transformer.transform(&job.input_text).await {
            Ok(markdown) if markdown.trim().is_empty() => Err(StageError::from(
                CollaboratorError::transform("transformer returned empty output"),
            )),
            Ok(markdown) => Ok(markdown),
            Err(err) => Err(StageError::from(err)),
        };

        let markdown = match markdown {
            Ok(markdown) => markdown,
            Err(err) => {
                warn!(
                    target = "application::pipeline::ingest",
                    task_id = %task.id,
                    error = %err,
                    "Text transformation failed"
                );
                record_failure(self.kind(), self.state.as_ref(), task, job, &err).await;
                return Err(err);
            }
        };

        job.stage = JobStage::Markdown;
        job.markdown = markdown;
        job.error = None;
        self.state.put_job(&job).await?;
        if task.status == TaskStatus::Failed {
            task.mark_processing();
            self.state.put_task(&task).await?;
        }
        self.forwarder.forward(&message).await?;

        info!(
            target = "application::pipeline::ingest",
            task_id = %job.id,
            markdown_bytes = job.markdown.len(),
            next = self.forwarder.routing_key(),
            "Markdown stored and task forwarded"
        );

        Ok(StageOutcome::Forwarded)
    }
}
