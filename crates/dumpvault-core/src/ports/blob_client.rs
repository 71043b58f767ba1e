//! BlobClient port - リモート blob ストアの最小操作
//!
//! `BlobBackend`（impls）はこの trait の上に StorageBackend の契約を実装します。
//! 一覧は継続マーカー付きのセグメント単位で返し、マーカーを辿るのは BlobBackend 側です。
//!
//! # 実装
//! - **InMemoryBlobClient**: 開発・テスト用（ページサイズ指定可）
//! - **S3BlobClient**: aws-sdk-s3（feature `s3`）

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

/// BlobError は blob ストア固有のエラー
#[derive(Debug, Error)]
pub enum BlobError {
    /// コンテナ作成時に既に存在していた（冪等な作成では成功扱い）
    #[error("container already exists: {0}")]
    ContainerAlreadyExists(String),

    #[error("blob not found: {0}")]
    NotFound(String),

    /// ネットワーク・スロットリング・5xx
    #[error("blob store unavailable: {0}")]
    Unavailable(String),

    #[error("blob store error: {0}")]
    Other(String),
}

/// 大きな成果物をアップロードするときの分割設定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadOptions {
    /// 1 ブロック（パート）のバイト数
    pub block_size: usize,

    /// 同時に送るブロック数の上限
    pub parallelism: usize,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            block_size: 4 * 1024 * 1024,
            parallelism: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobItem {
    pub name: String,
    pub size: u64,
}

/// 一覧の 1 セグメント
#[derive(Debug, Clone, Default)]
pub struct ListSegment {
    pub items: Vec<BlobItem>,

    /// 次のセグメントを取るためのマーカー（None なら終わり）
    pub next_marker: Option<String>,
}

#[async_trait]
pub trait BlobClient: Send + Sync {
    /// コンテナを作成。既にあれば `BlobError::ContainerAlreadyExists`
    async fn create_container(&self) -> Result<(), BlobError>;

    async fn upload_file(
        &self,
        name: &str,
        path: &Path,
        options: UploadOptions,
    ) -> Result<(), BlobError>;

    async fn put_bytes(&self, name: &str, data: Vec<u8>) -> Result<(), BlobError>;

    async fn get_bytes(&self, name: &str) -> Result<Vec<u8>, BlobError>;

    /// プロパティ取得（中身は読まない）。存在しなければ None
    async fn head(&self, name: &str) -> Result<Option<BlobItem>, BlobError>;

    async fn list_segment(
        &self,
        prefix: &str,
        marker: Option<String>,
    ) -> Result<ListSegment, BlobError>;

    async fn delete(&self, name: &str) -> Result<(), BlobError>;

    fn url(&self, name: &str) -> String;
}
