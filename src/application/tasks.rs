//! Submission-side task operations.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    application::{
        broker::BrokerError,
        pipeline::Forwarder,
        repos::{RepoError, TasksRepo},
        state::{StateError, StateStore},
    },
    domain::entities::{Job, Task, TaskMessage},
};

#[derive(Debug, Error)]
pub enum TaskServiceError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("task {0} not found")]
    NotFound(Uuid),
    #[error("task {0} belongs to another user")]
    Forbidden(Uuid),
    #[error("task submission is not configured")]
    SubmissionUnavailable,
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

pub struct TaskService {
    state: Arc<dyn StateStore>,
    tasks: Arc<dyn TasksRepo>,
    submissions: Option<Forwarder>,
    max_input_bytes: usize,
}

impl TaskService {
    pub fn new(
        state: Arc<dyn StateStore>,
        tasks: Arc<dyn TasksRepo>,
        max_input_bytes: usize,
    ) -> Self {
        Self {
            state,
            tasks,
            submissions: None,
            max_input_bytes,
        }
    }

    /// Enable `create_task`, publishing new tasks through `submissions`.
    pub fn with_submissions(mut self, submissions: Forwarder) -> Self {
        self.submissions = Some(submissions);
        self
    }

    /// Register a task and hand it to the first stage.
    ///
    /// If any step fails, the ephemeral records written so far are removed
    /// before the error is returned.
    pub async fn create_task(&self, text: &str, user_id: Uuid) -> Result<Task, TaskServiceError> {
        let submissions = self
            .submissions
            .as_ref()
            .ok_or(TaskServiceError::SubmissionUnavailable)?;
        if text.trim().is_empty() {
            return Err(TaskServiceError::Validation(
                "input text must not be empty".to_string(),
            ));
        }
        if text.len() > self.max_input_bytes {
            return Err(TaskServiceError::Validation(format!(
                "input text is {} bytes; the limit is {} bytes",
                text.len(),
                self.max_input_bytes
            )));
        }

        let id = Uuid::now_v7();
        let task = Task::processing(id, user_id);
        let job = Job::new(id, text);

        if let Err(err) = self.submit(submissions, &task, &job).await {
            self.discard(id).await;
            return Err(err);
        }

        info!(
            target = "application::tasks",
            task_id = %id,
            user_id = %user_id,
            input_bytes = text.len(),
            "Task submitted"
        );
        Ok(task)
    }

    async fn submit(
        &self,
        submissions: &Forwarder,
        task: &Task,
        job: &Job,
    ) -> Result<(), TaskServiceError> {
        self.state.put_task(task).await?;
        self.state.put_job(job).await?;
        submissions.forward(&TaskMessage::new(task.id)).await?;
        Ok(())
    }

    async fn discard(&self, id: Uuid) {
        for result in [
            self.state.delete_job(id).await,
            self.state.delete_task(id).await,
        ] {
            if let Err(err) = result {
                error!(
                    target = "application::tasks",
                    task_id = %id,
                    error = %err,
                    "Failed to roll back ephemeral task state"
                );
            }
        }
    }

    /// The ephemeral copy wins while it exists; afterwards the durable one.
    pub async fn get_task(&self, id: Uuid, user_id: Uuid) -> Result<Task, TaskServiceError> {
        let task = self.lookup(id).await?.ok_or(TaskServiceError::NotFound(id))?;
        if task.user_id != user_id {
            return Err(TaskServiceError::Forbidden(id));
        }
        Ok(task)
    }

    pub async fn list_tasks(&self, user_id: Uuid) -> Result<Vec<Task>, TaskServiceError> {
        let records = self.tasks.list_tasks_for_owner(user_id).await?;
        Ok(records.into_iter().map(Task::from).collect())
    }

    /// Remove a task from both stores after checking ownership.
    pub async fn delete_task(&self, id: Uuid, user_id: Uuid) -> Result<(), TaskServiceError> {
        self.get_task(id, user_id).await?;

        self.tasks.delete_task(id).await?;
        self.state.delete_job(id).await?;
        self.state.delete_task(id).await?;

        info!(
            target = "application::tasks",
            task_id = %id,
            user_id = %user_id,
            "Task deleted"
        );
        Ok(())
    }

    async fn lookup(&self, id: Uuid) -> Result<Option<Task>, TaskServiceError> {
        if let Some(task) = self.state.get_task(id).await? {
            return Ok(Some(task));
        }
        Ok(self.tasks.find_task(id).await?.map(Task::from))
    }
}
