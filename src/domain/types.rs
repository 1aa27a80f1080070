//! Shared domain enumerations aligned with stored representations.

use serde::{Deserialize, Serialize};

/// Externally visible status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Processing,
    Ready,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Processing => "processing",
            TaskStatus::Ready => "ready",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Processing)
    }
}

impl TryFrom<&str> for TaskStatus {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "processing" => Ok(TaskStatus::Processing),
            "ready" => Ok(TaskStatus::Ready),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(()),
        }
    }
}

/// Status values accepted by the durable store (mirrors Postgres enum `task_finished_status`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "task_finished_status", rename_all = "snake_case")]
pub enum FinishedStatus {
    Ready,
    Failed,
}

impl FinishedStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FinishedStatus::Ready => "ready",
            FinishedStatus::Failed => "failed",
        }
    }
}

impl TryFrom<TaskStatus> for FinishedStatus {
    type Error = TaskStatus;

    fn try_from(value: TaskStatus) -> Result<Self, Self::Error> {
        match value {
            TaskStatus::Ready => Ok(FinishedStatus::Ready),
            TaskStatus::Failed => Ok(FinishedStatus::Failed),
            other => Err(other),
        }
    }
}

impl From<FinishedStatus> for TaskStatus {
    fn from(value: FinishedStatus) -> Self {
        match value {
            FinishedStatus::Ready => TaskStatus::Ready,
            FinishedStatus::Failed => TaskStatus::Failed,
        }
    }
}

/// Position of a job inside the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Input,
    Markdown,
    Pdf,
    Error,
}

impl JobStage {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStage::Input => "input",
            JobStage::Markdown => "markdown",
            JobStage::Pdf => "pdf",
            JobStage::Error => "error",
        }
    }
}

impl TryFrom<&str> for JobStage {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, ()> {
        match value {
            "input" => Ok(JobStage::Input),
            "markdown" => Ok(JobStage::Markdown),
            "pdf" => Ok(JobStage::Pdf),
            "error" => Ok(JobStage::Error),
            _ => Err(()),
        }
    }
}

/// The worker roles of the pipeline, in processing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Ingest,
    Render,
    Finalize,
}

impl StageKind {
    pub const ALL: [StageKind; 3] = [StageKind::Ingest, StageKind::Render, StageKind::Finalize];

    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Ingest => "ingest",
            StageKind::Render => "render",
            StageKind::Finalize => "finalize",
        }
    }

    /// The stage that receives this stage's output, if any.
    pub fn next(self) -> Option<StageKind> {
        match self {
            StageKind::Ingest => Some(StageKind::Render),
            StageKind::Render => Some(StageKind::Finalize),
            StageKind::Finalize => None,
        }
    }
}
