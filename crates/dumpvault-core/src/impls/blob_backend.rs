//! BlobBackend - BlobClient の上に StorageBackend の契約を実装する
//!
//! # 学習ポイント
//! - 継続マーカーを辿り切ってから 1 つの列として返す
//! - BlobError → BackupError の分類（Unavailable は NotFound に化けさせない）
//! - コンテナの冪等な作成（既存なら成功扱い）

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::naming::sentinel_key;
use crate::domain::{ApiId, ArtifactId, BackupError};
use crate::ports::{BackendKind, BlobClient, BlobError, StorageBackend, UploadOptions};

pub struct BlobBackend {
    client: Arc<dyn BlobClient>,
    upload: UploadOptions,
}

impl BlobBackend {
    pub fn new(client: Arc<dyn BlobClient>, upload: UploadOptions) -> Self {
        Self { client, upload }
    }
}

impl From<BlobError> for BackupError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::NotFound(name) => BackupError::NotFound(name),
            BlobError::Unavailable(msg) => BackupError::BackendUnavailable(msg),
            BlobError::ContainerAlreadyExists(name) => {
                BackupError::Storage(format!("container already exists: {name}"))
            }
            BlobError::Other(msg) => BackupError::Storage(msg),
        }
    }
}

#[async_trait]
impl StorageBackend for BlobBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Blob
    }

    async fn prepare(&self) -> Result<(), BackupError> {
        match self.client.create_container().await {
            Ok(()) => Ok(()),
            Err(BlobError::ContainerAlreadyExists(name)) => {
                tracing::debug!(container = %name, "container already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, source: &Path) -> Result<(), BackupError> {
        let meta = tokio::fs::metadata(source).await.map_err(|e| {
            crate::domain::errors::from_io(format!("stat {}", source.display()), e)
        })?;
        if meta.is_dir() {
            return Err(BackupError::Storage(format!(
                "{} is a directory; blob storage only accepts single-file dumps",
                source.display()
            )));
        }

        self.client.upload_file(key, source, self.upload).await?;
        tracing::debug!(key, bytes = meta.len(), "artifact uploaded");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<u64>, BackupError> {
        Ok(self.client.head(key).await?.map(|item| item.size))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, BackupError> {
        let mut keys = Vec::new();
        let mut marker = None;
        loop {
            let segment = self.client.list_segment(prefix, marker).await?;
            keys.extend(segment.items.into_iter().map(|item| item.name));
            match segment.next_marker {
                Some(next) if !next.is_empty() => marker = Some(next),
                _ => break,
            }
        }
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<(), BackupError> {
        if self.client.head(key).await?.is_none() {
            return Err(BackupError::NotFound(key.to_string()));
        }
        self.client.delete(key).await?;
        Ok(())
    }

    fn location(&self, key: &str) -> String {
        self.client.url(key)
    }

    async fn write_sentinel(
        &self,
        api_id: &ApiId,
        artifact_id: &ArtifactId,
    ) -> Result<(), BackupError> {
        self.client
            .put_bytes(&sentinel_key(api_id), artifact_id.as_str().as_bytes().to_vec())
            .await?;
        Ok(())
    }

    async fn read_sentinel(&self, api_id: &ApiId) -> Result<Option<String>, BackupError> {
        match self.client.get_bytes(&sentinel_key(api_id)).await {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(BlobError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_sentinel(&self, api_id: &ApiId) -> Result<(), BackupError> {
        match self.client.delete(&sentinel_key(api_id)).await {
            Ok(()) | Err(BlobError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
