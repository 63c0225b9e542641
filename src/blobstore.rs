//! Blob storage boundary. Uploaded videos and exported outputs are
//! addressed by a path-like key; the filesystem implementation below is
//! what `AppConfig::blob_root` wires up by default, with a GCS-backed
//! implementation left as a configuration point per `gcs_enabled`.

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::errors::PipelineError;

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, data: Bytes) -> Result<(), PipelineError>;
    async fn get(&self, key: &str) -> Result<Bytes, PipelineError>;
    /// A URL or local path a downstream subprocess can read from directly,
    /// avoiding a round-trip through this process where possible.
    async fn presigned_url(&self, key: &str) -> Result<String, PipelineError>;
}

pub struct FilesystemBlobStore {
    root: PathBuf,
}

impl FilesystemBlobStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, PipelineError> {
        if key.contains("..") {
            return Err(PipelineError::BlobIo(format!("rejected path-traversal key: {key}")));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<(), PipelineError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::BlobIo(e.to_string()))?;
        }
        let mut file = fs::File::create(&path)
            .await
            .map_err(|e| PipelineError::BlobIo(e.to_string()))?;
        file.write_all(&data)
            .await
            .map_err(|e| PipelineError::BlobIo(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, PipelineError> {
        let path = self.resolve(key)?;
        let data = fs::read(&path)
            .await
            .map_err(|e| PipelineError::BlobIo(e.to_string()))?;
        Ok(Bytes::from(data))
    }

    async fn presigned_url(&self, key: &str) -> Result<String, PipelineError> {
        let path = self.resolve(key)?;
        Ok(format!("file://{}", path.display()))
    }
}
