//! Host contract - ホストプロセスから見たプロバイダの表面
//!
//! ホスト（スケジューラ・HTTP・保持ポリシー）はこの trait だけを通して
//! プロバイダを呼び出します。
//!
//! # 学習ポイント
//! - 文字列の ApiID を境界で検証してからドメイン型に変換する
//! - ExecContext は呼び出し側と共有される状態（最後のコマンドの結果）

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::FlagSpec;
use crate::domain::{BackupError, BackupResponse};

/// 最後に実行したダンプコマンドの状態
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandStatus {
    pub command: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl CommandStatus {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// ホストが Create に渡す実行コンテキスト
///
/// clone したものは同じ状態を共有します。
#[derive(Debug, Clone, Default)]
pub struct ExecContext {
    last: Arc<Mutex<Option<CommandStatus>>>,
}

impl ExecContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_command(&self) -> Option<CommandStatus> {
        self.last.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub(crate) fn record(&self, status: CommandStatus) {
        *self.last.lock().unwrap_or_else(|e| e.into_inner()) = Some(status);
    }
}

#[async_trait]
pub trait BackupRepository: Send + Sync {
    /// 設定の検証と、認証情報・保存先の準備
    async fn init(&self) -> Result<(), BackupError>;

    /// 設定可能なパラメータの宣言
    fn register_flags(&self) -> &'static [FlagSpec];

    async fn create_new_backup(
        &self,
        api_id: &str,
        timeout: Duration,
        ctx: &ExecContext,
    ) -> Result<(), BackupError>;

    async fn get_all_backups(&self) -> Result<Vec<BackupResponse>, BackupError>;

    /// バックアップがなければ Ok(None)
    async fn get_backup(&self, api_id: &str) -> Result<Option<BackupResponse>, BackupError>;

    async fn delete_backup(&self, api_id: &str) -> Result<(), BackupError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_last_command() {
        let ctx = ExecContext::new();
        let shared = ctx.clone();
        assert!(ctx.last_command().is_none());

        let now = Utc::now();
        shared.record(CommandStatus {
            command: "pg_dump --verbose".to_string(),
            started_at: now,
            finished_at: now,
            exit_code: Some(0),
            timed_out: false,
        });

        let last = ctx.last_command().unwrap();
        assert!(last.succeeded());
        assert_eq!(last.command, "pg_dump --verbose");
    }
}
