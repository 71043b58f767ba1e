//! Errors - エラー型と分類
//!
//! すべての失敗はホストへ返します（コア内部ではリトライしない）。
//! リトライ・バックオフ・スケジューリングの判断はホスト側の責務です。

use std::time::Duration;

use thiserror::Error;

/// ErrorKind は失敗の運用分類
///
/// - Transient: 一時的なエラー（呼び出し側がリトライしてよい）
/// - Permanent: 恒久的なエラー（同じ入力でリトライしても無意味）
/// - Infrastructure: ストレージ自体の障害（権限・ディスクなど、人手の対応が必要）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

/// BackupError はバックアップ・ライフサイクルのドメインエラー
#[derive(Debug, Error)]
pub enum BackupError {
    /// 必須設定の欠落・不正値（init 時に fail-fast）
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// ApiID / ArtifactID / prefix が命名規約に違反している
    #[error("invalid identifier {value:?}: {reason}")]
    InvalidIdentifier { value: String, reason: &'static str },

    /// ストレージキーが期待するセグメント構造に分解できない
    #[error("malformed storage key {key:?}: {reason}")]
    MalformedKey { key: String, reason: String },

    /// ダンプツールは最後まで動いたが、非ゼロで終了した（または起動できなかった）
    #[error("dump command failed (exit code {code:?}): {command}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        output: String,
    },

    /// ダンプツールが期限内に終わらず、強制終了された
    #[error("dump command timed out after {timeout:?}: {command}")]
    TimeoutExceeded {
        command: String,
        timeout: Duration,
        output: String,
    },

    /// ネットワーク・スロットリングなど一時的なバックエンド障害
    #[error("storage backend unavailable: {0}")]
    BackendUnavailable(String),

    /// 一時的ではないバックエンド障害（権限不足など）
    #[error("storage error: {0}")]
    Storage(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// 保持期間の下限より新しいバックアップは削除できない
    #[error(
        "backup {api_id} is too young to delete (age {age_hours}h, protected for {floor_days} days)"
    )]
    TooYoung {
        api_id: String,
        age_hours: i64,
        floor_days: u32,
    },
}

impl BackupError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BackupError::TimeoutExceeded { .. } | BackupError::BackendUnavailable(_) => {
                ErrorKind::Transient
            }
            BackupError::Storage(_) => ErrorKind::Infrastructure,
            BackupError::ConfigInvalid(_)
            | BackupError::InvalidIdentifier { .. }
            | BackupError::MalformedKey { .. }
            | BackupError::CommandFailed { .. }
            | BackupError::NotFound(_)
            | BackupError::TooYoung { .. } => ErrorKind::Permanent,
        }
    }

    /// ホストがリトライを検討してよいエラーか
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BackupError::NotFound(_))
    }

    /// コマンド出力（失敗・タイムアウト時のみ）
    pub fn command_output(&self) -> Option<&str> {
        match self {
            BackupError::CommandFailed { output, .. }
            | BackupError::TimeoutExceeded { output, .. } => Some(output),
            _ => None,
        }
    }
}

/// ローカルファイルシステムの I/O エラーを分類する
pub(crate) fn from_io(context: impl Into<String>, err: std::io::Error) -> BackupError {
    use std::io::ErrorKind as Io;

    let context = context.into();
    match err.kind() {
        Io::NotFound => BackupError::NotFound(context),
        Io::TimedOut | Io::Interrupted | Io::WouldBlock | Io::ResourceBusy => {
            BackupError::BackendUnavailable(format!("{context}: {err}"))
        }
        _ => BackupError::Storage(format!("{context}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_timeouts_and_unavailable_backends_are_retryable() {
        let timeout = BackupError::TimeoutExceeded {
            command: "pg_dump".to_string(),
            timeout: Duration::from_secs(1),
            output: String::new(),
        };
        let failed = BackupError::CommandFailed {
            command: "pg_dump".to_string(),
            code: Some(1),
            output: "FATAL".to_string(),
        };

        assert!(timeout.is_retryable());
        assert!(BackupError::BackendUnavailable("503".to_string()).is_retryable());
        assert!(!failed.is_retryable());
        assert!(!BackupError::NotFound("x".to_string()).is_retryable());
        assert_eq!(failed.command_output(), Some("FATAL"));
    }

    #[test]
    fn io_not_found_maps_to_not_found() {
        let err = from_io("a.err", std::io::Error::from(std::io::ErrorKind::NotFound));
        assert!(err.is_not_found());

        let err = from_io(
            "dir",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
    }
}
