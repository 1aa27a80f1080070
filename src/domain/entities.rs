//! Domain entities and their stored field layouts.
//!
//! Ephemeral records are flat string maps. Every field is written on every
//! put, optional values are stored as empty strings, and decoding fails on a
//! missing field so that a partially written hash is never mistaken for a
//! valid record.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::{
    error::DomainError,
    types::{FinishedStatus, JobStage, TaskStatus},
};

/// Externally visible unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub id: Uuid,
    pub status: TaskStatus,
    pub pdf_url: Option<String>,
    pub user_id: Uuid,
    pub error: Option<String>,
}

impl Task {
    pub const KEY_PREFIX: &'static str = "task";

    pub fn processing(id: Uuid, user_id: Uuid) -> Self {
        Self {
            id,
            status: TaskStatus::Processing,
            pdf_url: None,
            user_id,
            error: None,
        }
    }

    pub fn key(id: Uuid) -> String {
        format!("{}:{id}", Self::KEY_PREFIX)
    }

    /// Back to `processing` after a retried stage succeeded.
    pub fn mark_processing(&mut self) {
        self.status = TaskStatus::Processing;
        self.pdf_url = None;
        self.error = None;
    }

    pub fn mark_ready(&mut self, pdf_url: String) {
        self.status = TaskStatus::Ready;
        self.pdf_url = Some(pdf_url);
        self.error = None;
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.pdf_url = None;
        self.error = Some(error.into());
    }

    pub fn to_fields(&self) -> [(&'static str, String); 4] {
        [
            ("status", self.status.as_str().to_string()),
            ("pdf_url", optional_to_field(&self.pdf_url)),
            ("user_id", self.user_id.to_string()),
            ("error", optional_to_field(&self.error)),
        ]
    }

    pub fn from_fields(id: Uuid, fields: &HashMap<String, String>) -> Result<Self, DomainError> {
        let key = Self::key(id);
        let status = required_field(&key, fields, "status")?;
        let status = TaskStatus::try_from(status)
            .map_err(|_| DomainError::malformed(&key, format!("unknown status `{status}`")))?;
        let user_id = required_field(&key, fields, "user_id")?;
        let user_id = Uuid::parse_str(user_id)
            .map_err(|err| DomainError::malformed(&key, format!("invalid user_id: {err}")))?;

        Ok(Self {
            id,
            status,
            pdf_url: field_to_optional(required_field(&key, fields, "pdf_url")?),
            user_id,
            error: field_to_optional(required_field(&key, fields, "error")?),
        })
    }
}

/// Internal working state of a task while it moves through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: Uuid,
    pub stage: JobStage,
    pub input_text: String,
    pub markdown: String,
    pub result_pdf_url: Option<String>,
    pub error: Option<String>,
}

impl Job {
    pub const KEY_PREFIX: &'static str = "job";

    pub fn new(id: Uuid, input_text: impl Into<String>) -> Self {
        Self {
            id,
            stage: JobStage::Input,
            input_text: input_text.into(),
            markdown: String::new(),
            result_pdf_url: None,
            error: None,
        }
    }

    pub fn key(id: Uuid) -> String {
        format!("{}:{id}", Self::KEY_PREFIX)
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.stage = JobStage::Error;
        self.error = Some(error.into());
    }

    pub fn to_fields(&self) -> [(&'static str, String); 5] {
        [
            ("stage", self.stage.as_str().to_string()),
            ("input_text", self.input_text.clone()),
            ("markdown", self.markdown.clone()),
            ("result_pdf_url", optional_to_field(&self.result_pdf_url)),
            ("error", optional_to_field(&self.error)),
        ]
    }

    pub fn from_fields(id: Uuid, fields: &HashMap<String, String>) -> Result<Self, DomainError> {
        let key = Self::key(id);
        let stage = required_field(&key, fields, "stage")?;
        let stage = JobStage::try_from(stage)
            .map_err(|_| DomainError::malformed(&key, format!("unknown stage `{stage}`")))?;

        Ok(Self {
            id,
            stage,
            input_text: required_field(&key, fields, "input_text")?.to_string(),
            markdown: required_field(&key, fields, "markdown")?.to_string(),
            result_pdf_url: field_to_optional(required_field(&key, fields, "result_pdf_url")?),
            error: field_to_optional(required_field(&key, fields, "error")?),
        })
    }
}

/// Broker envelope. Carries only the task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub id: Uuid,
}

impl TaskMessage {
    pub fn new(id: Uuid) -> Self {
        Self { id }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, DomainError> {
        serde_json::to_vec(self)
            .map_err(|err| DomainError::invariant(format!("failed to encode task message: {err}")))
    }

    pub fn from_slice(body: &[u8]) -> Result<Self, DomainError> {
        serde_json::from_slice(body)
            .map_err(|err| DomainError::validation(format!("invalid task message: {err}")))
    }
}

/// Terminal task record as stored in the durable store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DurableTaskRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub pdf_url: Option<String>,
    pub status: FinishedStatus,
    pub error: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: Option<OffsetDateTime>,
}

impl From<DurableTaskRecord> for Task {
    fn from(record: DurableTaskRecord) -> Self {
        Self {
            id: record.id,
            status: record.status.into(),
            pdf_url: record.pdf_url,
            user_id: record.user_id,
            error: record.error,
        }
    }
}

/// Insert parameters for the durable store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDurableTask {
    pub id: Uuid,
    pub user_id: Uuid,
    pub pdf_url: Option<String>,
    pub status: FinishedStatus,
    pub error: Option<String>,
}

impl TryFrom<&Task> for NewDurableTask {
    type Error = DomainError;

    fn try_from(task: &Task) -> Result<Self, Self::Error> {
        let status = FinishedStatus::try_from(task.status).map_err(|status| {
            DomainError::invariant(format!(
                "task {} has non-terminal status `{}`",
                task.id,
                status.as_str()
            ))
        })?;

        let (pdf_url, error) = match status {
            FinishedStatus::Ready => {
                let Some(url) = task.pdf_url.clone().filter(|url| !url.is_empty()) else {
                    return Err(DomainError::invariant(format!(
                        "task {} is ready without a pdf_url",
                        task.id
                    )));
                };
                (Some(url), None)
            }
            FinishedStatus::Failed => (None, task.error.clone()),
        };

        Ok(Self {
            id: task.id,
            user_id: task.user_id,
            pdf_url,
            status,
            error,
        })
    }
}

fn optional_to_field(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

fn field_to_optional(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn required_field<'a>(
    key: &str,
    fields: &'a HashMap<String, String>,
    name: &'static str,
) -> Result<&'a str, DomainError> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| DomainError::malformed(key, format!("missing field `{name}`")))
}
