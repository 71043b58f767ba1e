//! pg_dump のコマンドラインを組み立てる
//!
//! パスワードは引数に載せません（`PGPASSFILE` 経由）。
//! 識別子は命名規約で検証済みなので、`--` で始まる値が引数に紛れ込むことはありません。

use std::path::Path;

use crate::config::ProviderConfig;
use crate::ports::DumpCommand;

pub fn build_dump_command(config: &ProviderConfig, output_path: &Path) -> DumpCommand {
    let conn = &config.connection;
    let dump = &config.dump;
    let format = if dump.split_file { "d" } else { "p" };

    let mut command = DumpCommand::new(&dump.program, output_path)
        .arg(format!("--username={}", conn.username))
        .arg(format!("--dbname={}", conn.dbname))
        .arg(format!("--host={}", conn.host))
        .arg(format!("--port={}", conn.port))
        .arg("--verbose")
        .arg(format!("--format={format}"))
        .arg("--jobs=1")
        .arg("--compress=9")
        .arg("--column-inserts")
        .arg("--inserts")
        .arg("--quote-all-identifiers")
        .arg("--clean")
        .arg("--create")
        .arg(format!("--file={}", output_path.display()));

    if dump.data_only {
        command = command.arg("--data-only");
    }
    if dump.schema_only {
        command = command.arg("--schema-only");
    }
    if let Some(encoding) = dump.encoding.as_deref().filter(|e| !e.is_empty()) {
        command = command.arg(format!("--encoding={encoding}"));
    }
    command
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ProviderConfig {
        let mut config = ProviderConfig::default();
        config.connection.host = "db.internal".to_string();
        config.connection.dbname = "app".to_string();
        config.connection.password = "secret".to_string();
        config
    }

    #[test]
    fn plain_format_by_default() {
        let cmd = build_dump_command(&config(), Path::new("/var/backups/staging/k"));
        assert_eq!(cmd.program, "pg_dump");
        assert_eq!(
            cmd.args,
            vec![
                "--username=postgres",
                "--dbname=app",
                "--host=db.internal",
                "--port=5432",
                "--verbose",
                "--format=p",
                "--jobs=1",
                "--compress=9",
                "--column-inserts",
                "--inserts",
                "--quote-all-identifiers",
                "--clean",
                "--create",
                "--file=/var/backups/staging/k",
                "--encoding=UTF-8",
            ]
        );
        assert!(!cmd.command_line().contains("secret"));
    }

    #[test]
    fn optional_switches() {
        let mut config = config();
        config.dump.split_file = true;
        config.dump.schema_only = true;
        config.dump.encoding = None;

        let cmd = build_dump_command(&config, Path::new("/tmp/out"));
        assert!(cmd.args.contains(&"--format=d".to_string()));
        assert!(cmd.args.contains(&"--schema-only".to_string()));
        assert!(!cmd.args.iter().any(|a| a.starts_with("--encoding")));
        assert!(!cmd.args.contains(&"--data-only".to_string()));
    }
}
