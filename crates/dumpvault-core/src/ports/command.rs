//! CommandRunner port - 外部ダンプツールの実行
//!
//! # 契約
//! - 子プロセスは呼び出し元とは別のタスクで動かし、期限は wall-clock で強制する
//! - 期限切れは `TimeoutExceeded`、非ゼロ終了は `CommandFailed`（区別できること）
//! - シェルは経由しない（引数はそのまま渡す）

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::BackupError;

/// 実行するコマンド
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpCommand {
    pub program: String,
    pub args: Vec<String>,

    /// ダンプの書き出し先（`--file=`）
    pub output_path: PathBuf,
}

impl DumpCommand {
    pub fn new(program: impl Into<String>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            output_path: output_path.into(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// ログ用の 1 行表現
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// 正常終了したコマンドの結果
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CommandOutput {
    /// stdout と stderr をつなげたもの
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// 初回実行前の準備（認証情報ファイルの書き出しなど）。冪等
    async fn prepare(&self) -> Result<(), BackupError>;

    /// ツールのバージョン文字列（init 時の疎通確認）
    async fn version(&self, program: &str) -> Result<String, BackupError>;

    async fn run(
        &self,
        command: &DumpCommand,
        timeout: Duration,
    ) -> Result<CommandOutput, BackupError>;
}
