use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use dumpvault_core::app::{BackupRepository, ExecContext, ProviderBuilder};
use dumpvault_core::config::{ProviderConfig, register_flags};
use dumpvault_core::domain::BackupError;
use serde_json::json;
use tracing::{error, info};

const DEFAULT_TIMEOUT_SECS: u64 = 3600;

/// pg_dump backup provider
///
/// Configuration is read from the environment (see `flags`).
#[derive(Parser)]
#[command(name = "dumpvault")]
#[command(about = "Dump a PostgreSQL database and manage the stored artifacts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// ログは stderr、結果の JSON は stdout
fn configure_logging() {
    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_line_number(true)
        .with_target(false)
        .with_file(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

#[derive(Subcommand)]
enum Command {
    /// Dump the database and store the artifact
    Create {
        api_id: String,
        /// Deadline for the dump command, in seconds
        #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
        timeout: u64,
    },
    /// Describe the artifact for an apiID
    Get { api_id: String },
    /// Describe every available artifact
    List,
    /// Delete the artifact (or failure marker) for an apiID
    Delete { api_id: String },
    /// List configuration parameters
    Flags,
}

async fn run(command: Command) -> Result<serde_json::Value, BackupError> {
    if let Command::Flags = command {
        return Ok(json!(register_flags()));
    }

    let config = ProviderConfig::from_env()?;
    let provider = ProviderBuilder::new(config).build().await?;
    provider.init().await?;

    match command {
        Command::Create { api_id, timeout } => {
            let ctx = ExecContext::new();
            let result = provider
                .create_new_backup(&api_id, Duration::from_secs(timeout), &ctx)
                .await;
            if let Some(status) = ctx.last_command() {
                info!(
                    exit_code = ?status.exit_code,
                    timed_out = status.timed_out,
                    "dump command finished"
                );
            }
            result?;
            Ok(json!(provider.get_backup(&api_id).await?))
        }
        Command::Get { api_id } => match provider.get_backup(&api_id).await? {
            Some(backup) => Ok(json!(backup)),
            None => Err(BackupError::NotFound(format!("no backup for {api_id}"))),
        },
        Command::List => Ok(json!(provider.get_all_backups().await?)),
        Command::Delete { api_id } => {
            provider.delete_backup(&api_id).await?;
            Ok(json!({ "deleted": api_id }))
        }
        Command::Flags => Ok(json!(register_flags())),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    configure_logging();

    match run(cli.command).await {
        Ok(output) => {
            println!("{output:#}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, kind = ?e.kind(), "command failed");
            println!(
                "{:#}",
                json!({
                    "error": e.to_string(),
                    "kind": format!("{:?}", e.kind()),
                    "retryable": e.is_retryable(),
                    "output": e.command_output(),
                })
            );
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Result<Command, clap::Error> {
        Cli::try_parse_from(std::iter::once("dumpvault").chain(args.iter().copied()))
            .map(|cli| cli.command)
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn create_takes_an_optional_timeout() {
        match parse(&["create", "42", "--timeout", "90"]).unwrap() {
            Command::Create { api_id, timeout } => {
                assert_eq!(api_id, "42");
                assert_eq!(timeout, 90);
            }
            _ => panic!("expected create"),
        }
        match parse(&["create", "42"]).unwrap() {
            Command::Create { timeout, .. } => assert_eq!(timeout, DEFAULT_TIMEOUT_SECS),
            _ => panic!("expected create"),
        }
    }

    #[test]
    fn missing_arguments_are_rejected() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["get"]).is_err());
        assert!(parse(&["create", "42", "--timeout", "soon"]).is_err());
        assert!(parse(&["backup"]).is_err());
    }
}
