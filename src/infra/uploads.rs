//! Filesystem-backed object storage for rendered documents.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use tracing::info;
use uuid::Uuid;

use crate::application::collaborators::{CollaboratorError, ObjectStore};

#[derive(Debug, Error)]
pub enum ObjectStorageError {
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("object payload is empty")]
    EmptyPayload,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<ObjectStorageError> for CollaboratorError {
    fn from(err: ObjectStorageError) -> Self {
        CollaboratorError::upload(err.to_string())
    }
}

/// Stores objects under `<root>/<folder>/<key>` and publishes them as
/// `<public_base_url>/<folder>/<key>`.
#[derive(Debug)]
pub struct FilesystemObjectStore {
    root: PathBuf,
    folder: String,
    public_base_url: String,
}

impl FilesystemObjectStore {
    /// Initialise storage rooted at the provided directory, creating it if necessary.
    pub fn new(
        root: PathBuf,
        folder: &str,
        public_base_url: &str,
    ) -> Result<Self, std::io::Error> {
        let folder = folder.trim_matches('/').to_string();
        std::fs::create_dir_all(root.join(&folder))?;
        Ok(Self {
            root,
            folder,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Public URL an object with this key is served from.
    pub fn public_url(&self, key: &str) -> String {
        if self.folder.is_empty() {
            format!("{}/{key}", self.public_base_url)
        } else {
            format!("{}/{}/{key}", self.public_base_url, self.folder)
        }
    }

    /// Absolute filesystem path for an object key.
    pub fn absolute_path(&self, key: &str) -> Result<PathBuf, ObjectStorageError> {
        self.resolve(key)
    }

    /// Write the payload beside its final location first so readers never
    /// observe a partial document.
    pub async fn store(&self, data: &[u8], key: &str) -> Result<PathBuf, ObjectStorageError> {
        if data.is_empty() {
            return Err(ObjectStorageError::EmptyPayload);
        }

        let absolute = self.resolve(key)?;
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await?;
        }

        let staging = absolute.with_extension(format!("{}.partial", Uuid::new_v4().simple()));
        let mut file = fs::File::create(&staging).await?;
        if let Err(err) = file.write_all(data).await {
            drop(file);
            let _ = fs::remove_file(&staging).await;
            return Err(err.into());
        }
        file.flush().await?;
        drop(file);

        if let Err(err) = fs::rename(&staging, &absolute).await {
            let _ = fs::remove_file(&staging).await;
            return Err(err.into());
        }

        Ok(absolute)
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, ObjectStorageError> {
        let relative = Path::new(key);
        if key.is_empty()
            || relative.is_absolute()
            || relative
                .components()
                .any(|component| !matches!(component, Component::Normal(_)))
        {
            return Err(ObjectStorageError::InvalidKey(key.to_string()));
        }

        Ok(self.root.join(&self.folder).join(relative))
    }
}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    async fn upload(&self, data: Vec<u8>, key: &str) -> Result<String, CollaboratorError> {
        let path = self.store(&data, key).await?;
        let url = self.public_url(key);
        info!(
            target = "infra::uploads",
            op = "objects::upload",
            result = "ok",
            key = %key,
            size_bytes = data.len(),
            path = %path.display(),
            url = %url,
            "Object stored"
        );
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> FilesystemObjectStore {
        FilesystemObjectStore::new(dir.path().to_path_buf(), "/pdf/", "https://cdn.example.com/")
            .expect("storage")
    }

    #[tokio::test]
    async fn upload_writes_file_and_returns_public_url() {
        let dir = TempDir::new().expect("temp dir");
        let storage = store(&dir);

        let url = storage
            .upload(b"%PDF-1.4".to_vec(), "0190a0b4.pdf")
            .await
            .expect("uploaded");

        assert_eq!(url, "https://cdn.example.com/pdf/0190a0b4.pdf");
        let written = std::fs::read(dir.path().join("pdf").join("0190a0b4.pdf")).expect("file");
        assert_eq!(written, b"%PDF-1.4");
    }

    #[tokio::test]
    async fn upload_replaces_existing_object() {
        let dir = TempDir::new().expect("temp dir");
        let storage = store(&dir);

        storage.upload(b"first".to_vec(), "a.pdf").await.expect("first");
        storage.upload(b"second".to_vec(), "a.pdf").await.expect("second");

        let path = storage.absolute_path("a.pdf").expect("path");
        assert_eq!(std::fs::read(path).expect("file"), b"second");
        let entries = std::fs::read_dir(dir.path().join("pdf")).expect("dir").count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let dir = TempDir::new().expect("temp dir");
        let storage = store(&dir);

        for key in ["../escape.pdf", "/etc/passwd", "", "./a.pdf"] {
            let err = storage.store(b"x", key).await.expect_err("must fail");
            assert!(matches!(err, ObjectStorageError::InvalidKey(_)), "{key}");
        }
    }

    #[tokio::test]
    async fn empty_payload_is_an_upload_error() {
        let dir = TempDir::new().expect("temp dir");
        let storage = store(&dir);

        let err = storage.upload(Vec::new(), "a.pdf").await.expect_err("must fail");
        assert!(matches!(err, CollaboratorError::Upload(_)));
    }

    #[test]
    fn empty_folder_publishes_at_base() {
        let dir = TempDir::new().expect("temp dir");
        let storage =
            FilesystemObjectStore::new(dir.path().to_path_buf(), "", "http://localhost:8080")
                .expect("storage");
        assert_eq!(storage.public_url("x.pdf"), "http://localhost:8080/x.pdf");
    }
}
