//! External services each stage delegates its transformation to.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("text transformation failed: {0}")]
    Transform(String),
    #[error("document rendering failed: {0}")]
    Render(String),
    #[error("object upload failed: {0}")]
    Upload(String),
}

impl CollaboratorError {
    pub fn transform(message: impl Into<String>) -> Self {
        Self::Transform(message.into())
    }

    pub fn render(message: impl Into<String>) -> Self {
        Self::Render(message.into())
    }

    pub fn upload(message: impl Into<String>) -> Self {
        Self::Upload(message.into())
    }
}

/// Converts submitted text into structured markdown.
#[async_trait]
pub trait TextTransformer: Send + Sync {
    async fn transform(&self, text: &str) -> Result<String, CollaboratorError>;
}

/// Renders markdown into document bytes.
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    async fn render(&self, markdown: &str) -> Result<Vec<u8>, CollaboratorError>;
}

/// Stores rendered documents and returns their public URL.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(&self, bytes: Vec<u8>, key: &str) -> Result<String, CollaboratorError>;
}
