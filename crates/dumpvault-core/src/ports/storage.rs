//! StorageBackend port - 成果物と sentinel の保存先（Local / Blob）
//!
//! ローカルファイルシステムとリモート blob ストアで、同じ論理契約を提供します。
//!
//! # 契約
//! - キーはストレージキー（`domain::naming`）をそのまま使う
//! - `get` は中身を読まずに存在とサイズだけを確認する
//! - `list` はページングを隠蔽し、1 つの有限な列を返す（途中再開はできない）
//! - `delete` は対象がなければ `NotFound`
//! - ネットワーク・スロットリングなどの一時障害は `BackendUnavailable` で返す
//!   （「見つからない」に化けさせない）

use std::path::Path;

use async_trait::async_trait;

use crate::domain::{ApiId, ArtifactId, BackupError};

/// バックエンドの種類（ログ用）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    Blob,
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// 初回利用前の準備（ディレクトリ作成、コンテナ作成など）。冪等
    async fn prepare(&self) -> Result<(), BackupError>;

    /// ローカルに書き出された成果物（ファイルまたはディレクトリ）を key で保存
    async fn put(&self, key: &str, source: &Path) -> Result<(), BackupError>;

    /// 存在すればサイズ（バイト）を返す
    async fn get(&self, key: &str) -> Result<Option<u64>, BackupError>;

    /// prefix で始まるキーをすべて列挙
    async fn list(&self, prefix: &str) -> Result<Vec<String>, BackupError>;

    async fn delete(&self, key: &str) -> Result<(), BackupError>;

    /// 成果物の場所（ホストへの Message に載せる）
    fn location(&self, key: &str) -> String;

    /// 作成失敗を記録する。中身は失敗した ArtifactId
    async fn write_sentinel(
        &self,
        api_id: &ApiId,
        artifact_id: &ArtifactId,
    ) -> Result<(), BackupError>;

    /// sentinel の中身（診断用、解釈しない）
    async fn read_sentinel(&self, api_id: &ApiId) -> Result<Option<String>, BackupError>;

    async fn delete_sentinel(&self, api_id: &ApiId) -> Result<(), BackupError>;
}
