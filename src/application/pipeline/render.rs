use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::{
    application::{
        collaborators::{DocumentRenderer, ObjectStore},
        pipeline::{Forwarder, Stage, StageError, StageOutcome, decode, record_failure, resolve},
        state::StateStore,
    },
    domain::{
        entities::Job,
        types::{JobStage, StageKind},
    },
};

/// Renders the job's markdown, uploads the document and hands the task to
/// finalization.
pub struct RenderStage {
    state: Arc<dyn StateStore>,
    renderer: Arc<dyn DocumentRenderer>,
    objects: Arc<dyn ObjectStore>,
    forwarder: Forwarder,
}

impl RenderStage {
    pub fn new(
        state: Arc<dyn StateStore>,
        renderer: Arc<dyn DocumentRenderer>,
        objects: Arc<dyn ObjectStore>,
        forwarder: Forwarder,
    ) -> Self {
        Self {
            state,
            renderer,
            objects,
            forwarder,
        }
    }

    async fn produce(&self, job: &Job) -> Result<String, StageError> {
        let document = self.renderer.render(&job.markdown).await?;
        let key = document_key(job);
        let url = self.objects.upload(document, &key).await?;
        Ok(url)
    }
}

fn document_key(job: &Job) -> String {
    format!("{}.pdf", job.id)
}

#[async_trait]
impl Stage for RenderStage {
    fn kind(&self) -> StageKind {
        StageKind::Render
    }

    async fn process_message(&self, body: &[u8]) -> Result<StageOutcome, StageError> {
        let message = decode(body)?;
        let Some((mut task, mut job)) =
            resolve(self.kind(), self.state.as_ref(), message.id).await?
        else {
            return Ok(StageOutcome::Stale);
        };

        let url = match self.produce(&job).await {
            Ok(url) => url,
            Err(err) => {
                warn!(
                    target = "application::pipeline::render",
                    task_id = %task.id,
                    error = %err,
                    "Document rendering failed"
                );
                record_failure(self.kind(), self.state.as_ref(), task, job, &err).await;
                return Err(err);
            }
        };

        job.stage = JobStage::Pdf;
        job.result_pdf_url = Some(url.clone());
        job.error = None;
        task.mark_ready(url);

        self.state.put_job(&job).await?;
        self.state.put_task(&task).await?;
        self.forwarder.forward(&message).await?;

        info!(
            target = "application::pipeline::render",
            task_id = %task.id,
            pdf_url = task.pdf_url.as_deref().unwrap_or_default(),
            next = self.forwarder.routing_key(),
            "Document uploaded and task forwarded"
        );

        Ok(StageOutcome::Forwarded)
    }
}
