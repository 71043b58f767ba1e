//! BackupRecord - ストレージキーから導出されるバックアップの姿
//!
//! 保存はされず、一覧・取得のたびにキーを分解して再構築します（キャッシュしない）。

use serde::{Deserialize, Serialize};

use super::ids::{ApiId, ArtifactId};

const BYTES_PER_MB: f64 = 1_000_000.0;

/// ホストに見せるバックアップ状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Available,
    Deleted,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::Available => "available",
            BackupStatus::Deleted => "deleted",
        }
    }
}

/// 1 つの成果物の記述
#[derive(Debug, Clone, PartialEq)]
pub struct BackupRecord {
    pub api_id: ApiId,
    pub artifact_id: ArtifactId,
    pub status: BackupStatus,
    pub size_bytes: u64,

    /// 成果物の場所（ローカルパス、または blob URL）
    pub location: String,
}

impl BackupRecord {
    pub fn available(
        api_id: ApiId,
        artifact_id: ArtifactId,
        size_bytes: u64,
        location: impl Into<String>,
    ) -> Self {
        Self {
            api_id,
            artifact_id,
            status: BackupStatus::Available,
            size_bytes,
            location: location.into(),
        }
    }

    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / BYTES_PER_MB
    }
}

/// Host-facing shape of a backup record.
///
/// `id` is always derived from the decoded storage key, for both backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupResponse {
    pub id: String,
    pub data_id: String,
    pub status: BackupStatus,
    pub message: String,
    pub size_mb: f64,
}

impl From<BackupRecord> for BackupResponse {
    fn from(record: BackupRecord) -> Self {
        let size_mb = record.size_mb();
        Self {
            id: record.api_id.into_string(),
            data_id: record.artifact_id.into_string(),
            status: record.status,
            message: record.location,
            size_mb,
        }
    }
}
