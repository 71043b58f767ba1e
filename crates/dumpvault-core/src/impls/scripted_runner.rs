//! ScriptedCommandRunner - 結果を台本どおりに返す CommandRunner
//!
//! 実際のデータベースなしでライフサイクルを動かすための実装です。
//! 台本が尽きたら成功（小さなダンプファイルを書く）を返します。

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::domain::errors::from_io;
use crate::domain::BackupError;
use crate::ports::{CommandOutput, CommandRunner, DumpCommand};

/// 1 回分の実行結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedOutcome {
    /// 指定バイト数のダンプを書いて成功
    Succeed { bytes: usize },
    /// ディレクトリ形式のダンプ（ファイルごとのバイト数）を書いて成功
    SucceedDirectory { files: Vec<usize> },
    /// 途中まで書いてから非ゼロ終了
    Fail { code: i32 },
    /// 途中まで書いてから期限切れ
    Timeout,
}

#[derive(Debug, Default)]
struct Script {
    outcomes: VecDeque<ScriptedOutcome>,
    commands: Vec<DumpCommand>,
    prepared: usize,
}

#[derive(Debug, Clone)]
pub struct ScriptedCommandRunner {
    script: Arc<Mutex<Script>>,
    delay: Duration,
    version: Option<String>,
}

impl Default for ScriptedCommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedCommandRunner {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(Script::default())),
            delay: Duration::ZERO,
            version: Some("pg_dump (PostgreSQL) 16.4".to_string()),
        }
    }

    /// 各実行の前に待つ（同時実行のテスト用）
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// ツールが見つからない状態を再現する
    pub fn without_tool(mut self) -> Self {
        self.version = None;
        self
    }

    pub fn push(&self, outcome: ScriptedOutcome) {
        self.lock().outcomes.push_back(outcome);
    }

    /// これまでに実行されたコマンド
    pub fn commands(&self) -> Vec<DumpCommand> {
        self.lock().commands.clone()
    }

    pub fn prepared(&self) -> usize {
        self.lock().prepared
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CommandRunner for ScriptedCommandRunner {
    async fn prepare(&self) -> Result<(), BackupError> {
        self.lock().prepared += 1;
        Ok(())
    }

    async fn version(&self, program: &str) -> Result<String, BackupError> {
        self.version
            .clone()
            .ok_or_else(|| BackupError::ConfigInvalid(format!("{program} is not usable")))
    }

    async fn run(
        &self,
        command: &DumpCommand,
        timeout: Duration,
    ) -> Result<CommandOutput, BackupError> {
        let outcome = {
            let mut script = self.lock();
            script.commands.push(command.clone());
            script
                .outcomes
                .pop_front()
                .unwrap_or(ScriptedOutcome::Succeed { bytes: 1024 })
        };

        let started_at = Utc::now();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let path = command.output_path();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| from_io(format!("create {}", parent.display()), e))?;
        }
        let write = |bytes: usize| {
            let path = path.to_path_buf();
            async move {
                tokio::fs::write(&path, vec![b'-'; bytes])
                    .await
                    .map_err(|e| from_io(format!("write {}", path.display()), e))
            }
        };

        match outcome {
            ScriptedOutcome::Succeed { bytes } => {
                write(bytes).await?;
            }
            ScriptedOutcome::SucceedDirectory { files } => {
                tokio::fs::create_dir_all(path)
                    .await
                    .map_err(|e| from_io(format!("create {}", path.display()), e))?;
                for (i, bytes) in files.into_iter().enumerate() {
                    let file = path.join(format!("{}.dat", 3000 + i));
                    tokio::fs::write(&file, vec![b'-'; bytes])
                        .await
                        .map_err(|e| from_io(format!("write {}", file.display()), e))?;
                }
            }
            ScriptedOutcome::Fail { code } => {
                write(16).await?;
                return Err(BackupError::CommandFailed {
                    command: command.command_line(),
                    code: Some(code),
                    output: format!("pg_dump: error: scripted failure (exit {code})"),
                });
            }
            ScriptedOutcome::Timeout => {
                write(16).await?;
                return Err(BackupError::TimeoutExceeded {
                    command: command.command_line(),
                    timeout,
                    output: "pg_dump: dumping contents of table".to_string(),
                });
            }
        }

        Ok(CommandOutput {
            stdout: String::new(),
            stderr: format!("pg_dump: dumping to {}", path.display()),
            started_at,
            finished_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn outcomes_are_consumed_in_order() {
        let dir = tempfile::TempDir::new().unwrap();
        let runner = ScriptedCommandRunner::new();
        runner.push(ScriptedOutcome::Fail { code: 1 });

        let cmd = DumpCommand::new("pg_dump", dir.path().join("out"));
        let err = runner.run(&cmd, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, BackupError::CommandFailed { code: Some(1), .. }));

        runner.run(&cmd, Duration::from_secs(1)).await.unwrap();
        assert_eq!(tokio::fs::read(dir.path().join("out")).await.unwrap().len(), 1024);
        assert_eq!(runner.commands().len(), 2);
    }

    #[tokio::test]
    async fn missing_tool_fails_version_probe() {
        let runner = ScriptedCommandRunner::new().without_tool();
        assert!(runner.version("pg_dump").await.is_err());
    }
}
