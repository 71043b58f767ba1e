//! ProcessCommandRunner - 子プロセスとしてダンプツールを実行する
//!
//! # 学習ポイント
//! - tokio::process によるシェルを介さない起動
//! - 監視タスク（tokio::spawn）で wall-clock の期限を強制し、期限切れなら kill
//! - stdout / stderr は別タスクで読み切る（パイプ詰まりで止まらないように）

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

use crate::domain::BackupError;
use crate::impls::credentials::PgPassFile;
use crate::ports::{CommandOutput, CommandRunner, DumpCommand};

/// kill 後に出力を回収するまで待つ時間
const OUTPUT_GRACE: Duration = Duration::from_secs(2);

/// `--version` の確認に使う期限
const VERSION_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ProcessCommandRunner {
    pgpass: Arc<PgPassFile>,
}

impl ProcessCommandRunner {
    pub fn new(pgpass: Arc<PgPassFile>) -> Self {
        Self { pgpass }
    }

    async fn execute(
        &self,
        command: &DumpCommand,
        timeout: Duration,
    ) -> Result<CommandOutput, BackupError> {
        let command_line = command.command_line();
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .env("PGPASSFILE", self.pgpass.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BackupError::CommandFailed {
                command: command_line.clone(),
                code: None,
                output: format!("failed to start {}: {e}", command.program),
            })?;

        let started_at = Utc::now();
        let start = Instant::now();
        tracing::info!(command = %command_line, timeout_secs = timeout.as_secs(), "command started");

        let stdout = tokio::spawn(drain(child.stdout.take()));
        let stderr = tokio::spawn(drain(child.stderr.take()));

        // 監視タスク: 期限内に終われば ExitStatus、期限切れなら kill して None
        let supervisor = tokio::spawn(async move {
            match tokio::time::timeout(timeout, child.wait()).await {
                Ok(status) => status.map(Some),
                Err(_) => {
                    if let Err(e) = child.kill().await {
                        tracing::warn!(error = %e, "failed to kill timed out command");
                    }
                    Ok(None)
                }
            }
        });

        let waited: Result<Option<ExitStatus>, String> = match supervisor.await {
            Ok(Ok(status)) => Ok(status),
            Ok(Err(e)) => Err(format!("failed to wait for command: {e}")),
            Err(e) => Err(format!("command supervisor failed: {e}")),
        };

        let stdout = collect(stdout).await;
        let stderr = collect(stderr).await;
        let finished_at = Utc::now();
        let output = CommandOutput {
            stdout,
            stderr,
            started_at,
            finished_at,
        };

        match waited {
            Ok(Some(status)) if status.success() => {
                tracing::info!(
                    command = %command.program,
                    elapsed_secs = start.elapsed().as_secs_f64(),
                    "command finished"
                );
                tracing::debug!(output = %output.combined(), "command output");
                Ok(output)
            }
            Ok(Some(status)) => {
                tracing::debug!(output = %output.combined(), "command output");
                Err(BackupError::CommandFailed {
                    command: command_line,
                    code: status.code(),
                    output: output.combined(),
                })
            }
            Ok(None) => {
                tracing::warn!(
                    command = %command.program,
                    elapsed_secs = start.elapsed().as_secs(),
                    timeout_secs = timeout.as_secs(),
                    "command timed out and was killed"
                );
                Err(BackupError::TimeoutExceeded {
                    command: command_line,
                    timeout,
                    output: output.combined(),
                })
            }
            Err(reason) => Err(BackupError::CommandFailed {
                command: command_line,
                code: None,
                output: format!("{reason}\n{}", output.combined()),
            }),
        }
    }
}

#[async_trait]
impl CommandRunner for ProcessCommandRunner {
    async fn prepare(&self) -> Result<(), BackupError> {
        self.pgpass.write().await
    }

    async fn version(&self, program: &str) -> Result<String, BackupError> {
        let probe = DumpCommand::new(program, "").arg("--version");
        match self.execute(&probe, VERSION_TIMEOUT).await {
            Ok(output) => Ok(output.stdout.trim().to_string()),
            Err(e) => Err(BackupError::ConfigInvalid(format!(
                "{program} is not usable: {e}"
            ))),
        }
    }

    async fn run(
        &self,
        command: &DumpCommand,
        timeout: Duration,
    ) -> Result<CommandOutput, BackupError> {
        self.execute(command, timeout).await
    }
}

async fn drain<R>(reader: Option<R>) -> String
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(mut reader) = reader
        && let Err(e) = reader.read_to_end(&mut buf).await
    {
        tracing::debug!(error = %e, "failed to read command output");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

async fn collect(task: JoinHandle<String>) -> String {
    match tokio::time::timeout(OUTPUT_GRACE, task).await {
        Ok(Ok(output)) => output,
        _ => String::new(),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn runner(dir: &TempDir) -> ProcessCommandRunner {
        ProcessCommandRunner::new(Arc::new(PgPassFile::new(dir.path().join(".pgpass"), "pw")))
    }

    fn sh(script: &str) -> DumpCommand {
        DumpCommand::new("sh", "/dev/null").arg("-c").arg(script)
    }

    #[tokio::test]
    async fn successful_command_returns_output() {
        let dir = TempDir::new().unwrap();
        let output = runner(&dir)
            .run(&sh("echo hello; echo warn >&2"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.stderr.trim(), "warn");
        assert!(output.finished_at >= output.started_at);
    }

    #[tokio::test]
    async fn credential_file_is_passed_through_the_environment() {
        let dir = TempDir::new().unwrap();
        let output = runner(&dir)
            .run(&sh("printf %s \"$PGPASSFILE\""), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(output.stdout, dir.path().join(".pgpass").display().to_string());
    }

    #[tokio::test]
    async fn non_zero_exit_is_command_failed() {
        let dir = TempDir::new().unwrap();
        let err = runner(&dir)
            .run(&sh("echo boom >&2; exit 3"), Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            BackupError::CommandFailed { code, output, .. } => {
                assert_eq!(code, Some(3));
                assert!(output.contains("boom"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_command_is_killed_at_the_deadline() {
        let dir = TempDir::new().unwrap();
        let start = Instant::now();
        let err = runner(&dir)
            .run(&sh("exec sleep 30"), Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::TimeoutExceeded { .. }));
        assert!(err.is_retryable());
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn missing_program_fails_to_start() {
        let dir = TempDir::new().unwrap();
        let cmd = DumpCommand::new("definitely-not-a-dump-tool", "/dev/null");
        let err = runner(&dir).run(&cmd, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, BackupError::CommandFailed { code: None, .. }));
    }

    #[tokio::test]
    async fn version_of_missing_program_is_config_error() {
        let dir = TempDir::new().unwrap();
        let err = runner(&dir)
            .version("definitely-not-a-dump-tool")
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::ConfigInvalid(_)));
    }
}
