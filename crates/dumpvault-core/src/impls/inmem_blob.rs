//! InMemoryBlobClient - 開発・テスト用の blob ストア
//!
//! # 学習ポイント
//! - ページサイズを小さくして継続マーカーの処理をテストできる
//! - `set_unavailable` で一時障害を注入できる

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::ports::{BlobClient, BlobError, BlobItem, ListSegment, UploadOptions};

#[derive(Debug, Default)]
struct State {
    created: bool,
    unavailable: bool,
    blobs: BTreeMap<String, Vec<u8>>,
    /// 直近のアップロードで使ったブロック数
    last_upload_blocks: usize,
}

/// InMemoryBlobClient はプロセス内の BTreeMap に blob を保持する
///
/// clone しても同じストアを共有します。
#[derive(Debug, Clone)]
pub struct InMemoryBlobClient {
    container: String,
    page_size: usize,
    state: Arc<Mutex<State>>,
}

impl InMemoryBlobClient {
    pub fn new(container: impl Into<String>) -> Self {
        Self::with_page_size(container, 5000)
    }

    /// 1 セグメントあたりの件数を指定して作成
    pub fn with_page_size(container: impl Into<String>, page_size: usize) -> Self {
        Self {
            container: container.into(),
            page_size: page_size.max(1),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// 一時障害を注入する（true の間、全操作が Unavailable）
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().blobs.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.lock().blobs.keys().cloned().collect()
    }

    pub fn last_upload_blocks(&self) -> usize {
        self.lock().last_upload_blocks
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn available(&self) -> Result<MutexGuard<'_, State>, BlobError> {
        let state = self.lock();
        if state.unavailable {
            return Err(BlobError::Unavailable(format!(
                "container {} is not reachable",
                self.container
            )));
        }
        Ok(state)
    }
}

#[async_trait]
impl BlobClient for InMemoryBlobClient {
    async fn create_container(&self) -> Result<(), BlobError> {
        let mut state = self.available()?;
        if state.created {
            return Err(BlobError::ContainerAlreadyExists(self.container.clone()));
        }
        state.created = true;
        Ok(())
    }

    async fn upload_file(
        &self,
        name: &str,
        path: &Path,
        options: UploadOptions,
    ) -> Result<(), BlobError> {
        self.available()?;
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| BlobError::Other(format!("read {}: {e}", path.display())))?;

        let block_size = options.block_size.max(1);
        let blocks = data.len().div_ceil(block_size).max(1);

        let mut state = self.available()?;
        state.last_upload_blocks = blocks;
        state.blobs.insert(name.to_string(), data);
        Ok(())
    }

    async fn put_bytes(&self, name: &str, data: Vec<u8>) -> Result<(), BlobError> {
        self.available()?.blobs.insert(name.to_string(), data);
        Ok(())
    }

    async fn get_bytes(&self, name: &str) -> Result<Vec<u8>, BlobError> {
        self.available()?
            .blobs
            .get(name)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(name.to_string()))
    }

    async fn head(&self, name: &str) -> Result<Option<BlobItem>, BlobError> {
        Ok(self.available()?.blobs.get(name).map(|data| BlobItem {
            name: name.to_string(),
            size: data.len() as u64,
        }))
    }

    async fn list_segment(
        &self,
        prefix: &str,
        marker: Option<String>,
    ) -> Result<ListSegment, BlobError> {
        let state = self.available()?;
        let offset = match marker {
            Some(m) => m
                .parse::<usize>()
                .map_err(|_| BlobError::Other(format!("invalid marker {m:?}")))?,
            None => 0,
        };

        let matching: Vec<BlobItem> = state
            .blobs
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, data)| BlobItem {
                name: name.clone(),
                size: data.len() as u64,
            })
            .collect();

        let end = (offset + self.page_size).min(matching.len());
        let items = matching.get(offset..end).map(<[_]>::to_vec).unwrap_or_default();
        let next_marker = (end < matching.len()).then(|| end.to_string());
        Ok(ListSegment { items, next_marker })
    }

    async fn delete(&self, name: &str) -> Result<(), BlobError> {
        self.available()?
            .blobs
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| BlobError::NotFound(name.to_string()))
    }

    fn url(&self, name: &str) -> String {
        format!("memory://{}/{}", self.container, name)
    }
}
