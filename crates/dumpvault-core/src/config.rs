//! Provider configuration.
//!
//! 設定は不変の構造体としてビルダーに渡します（プロセス全体の可変フラグは使わない）。
//! 値は環境変数から読むか、serde でホストの設定ファイルから読み込みます。
//! 必須の接続パラメータが欠けていれば `validate()` が `ConfigInvalid` を返します。

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::naming::validate_prefix;
use crate::domain::BackupError;
use crate::ports::UploadOptions;

/// ダンプ内容・形式のオプション
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DumpOptions {
    /// ディレクトリ形式（`--format=d`）で複数ファイルに分割する
    ///
    /// Environment variable: `SPLIT_FILE`
    pub split_file: bool,

    /// Environment variable: `DATA_ONLY`
    pub data_only: bool,

    /// Environment variable: `SCHEMA_ONLY`
    pub schema_only: bool,

    /// Environment variable: `ENCODING`
    pub encoding: Option<String>,

    /// Environment variable: `DUMP_PROGRAM`
    pub program: String,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self {
            split_file: false,
            data_only: false,
            schema_only: false,
            encoding: Some("UTF-8".to_string()),
            program: "pg_dump".to_string(),
        }
    }
}

/// データベース接続設定
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Environment variable: `DB_HOST`
    pub host: String,
    /// Environment variable: `DB_PORT`
    pub port: u16,
    /// Environment variable: `DB_NAME`
    pub dbname: String,
    /// Environment variable: `DB_USERNAME`
    pub username: String,
    /// Environment variable: `DB_PASSWORD`
    #[serde(skip_serializing)]
    pub password: String,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 5432,
            dbname: String::new(),
            username: "postgres".to_string(),
            password: String::new(),
        }
    }
}

// パスワードをログに出さない
impl std::fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// リモート blob ストア設定
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobSettings {
    /// Environment variable: `BLOB_ACCOUNT_NAME`
    pub account_name: String,
    /// Environment variable: `BLOB_ACCOUNT_KEY`
    #[serde(skip_serializing)]
    pub account_key: String,
    /// Environment variable: `BLOB_CONTAINER_NAME`
    pub container_name: String,
    /// Environment variable: `BLOB_REGION`
    pub region: String,
    /// S3 互換サービス用のエンドポイント
    ///
    /// Environment variable: `BLOB_ENDPOINT`
    pub endpoint: Option<String>,
    /// Environment variable: `BLOB_BLOCK_SIZE`
    pub block_size: usize,
    /// Environment variable: `BLOB_PARALLELISM`
    pub parallelism: usize,
}

impl Default for BlobSettings {
    fn default() -> Self {
        let upload = UploadOptions::default();
        Self {
            account_name: String::new(),
            account_key: String::new(),
            container_name: String::new(),
            region: "us-east-1".to_string(),
            endpoint: None,
            block_size: upload.block_size,
            parallelism: upload.parallelism,
        }
    }
}

impl BlobSettings {
    pub fn upload_options(&self) -> UploadOptions {
        UploadOptions {
            block_size: self.block_size,
            parallelism: self.parallelism,
        }
    }
}

impl std::fmt::Debug for BlobSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobSettings")
            .field("account_name", &self.account_name)
            .field("account_key", &"<redacted>")
            .field("container_name", &self.container_name)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("block_size", &self.block_size)
            .field("parallelism", &self.parallelism)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// 成果物の保存ディレクトリ（ローカルモード）
    ///
    /// Environment variable: `BACKUP_DIR`
    pub backup_dir: PathBuf,

    /// 認証情報ファイルとステージング領域の置き場所
    ///
    /// Environment variable: `WORK_DIR`
    pub work_dir: PathBuf,

    /// ストレージキーの prefix
    ///
    /// Environment variable: `FILE_NAME`
    pub file_name: String,

    pub dump: DumpOptions,
    pub connection: ConnectionSettings,

    /// Some ならリモート blob モード
    ///
    /// Environment variable: `BLOB_STORAGE`
    pub blob: Option<BlobSettings>,

    /// これより新しい成果物は削除を拒否する（日数）
    ///
    /// Environment variable: `PROTECT_YOUNG_BACKUP_DAYS`
    pub protect_young_backup_days: Option<u32>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from("/var/backups/database"),
            work_dir: PathBuf::from("/var/backups"),
            file_name: "database_dump".to_string(),
            dump: DumpOptions::default(),
            connection: ConnectionSettings::default(),
            blob: None,
            protect_young_backup_days: None,
        }
    }
}

/// 設定パラメータの宣言
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlagSpec {
    pub name: &'static str,
    pub env: &'static str,
    pub default: Option<&'static str>,
    pub help: &'static str,
}

const fn flag(
    name: &'static str,
    env: &'static str,
    default: Option<&'static str>,
    help: &'static str,
) -> FlagSpec {
    FlagSpec {
        name,
        env,
        default,
        help,
    }
}

pub const FLAGS: &[FlagSpec] = &[
    flag("backup-dir", "BACKUP_DIR", Some("/var/backups/database"), "directory where backup artifacts are stored"),
    flag("work-dir", "WORK_DIR", Some("/var/backups"), "directory for the credential file and in-progress dumps"),
    flag("file-name", "FILE_NAME", Some("database_dump"), "artifact name prefix; must not contain `--`"),
    flag("split-file", "SPLIT_FILE", Some("false"), "dump into a directory of files (pg_dump --format=d)"),
    flag("data-only", "DATA_ONLY", Some("false"), "dump only the data, not the schema"),
    flag("schema-only", "SCHEMA_ONLY", Some("false"), "dump only the schema, no data"),
    flag("encoding", "ENCODING", Some("UTF-8"), "dump the data in this encoding"),
    flag("dump-program", "DUMP_PROGRAM", Some("pg_dump"), "dump tool executable"),
    flag("host", "DB_HOST", None, "database server host or socket directory"),
    flag("port", "DB_PORT", Some("5432"), "database server port number"),
    flag("dbname", "DB_NAME", None, "database to dump"),
    flag("username", "DB_USERNAME", Some("postgres"), "connect as this database user"),
    flag("password", "DB_PASSWORD", None, "password written to the pgpass file"),
    flag("blob-storage", "BLOB_STORAGE", Some("false"), "store artifacts in the remote blob store"),
    flag("account-name", "BLOB_ACCOUNT_NAME", None, "blob store account name (access key id)"),
    flag("account-key", "BLOB_ACCOUNT_KEY", None, "blob store account key (secret)"),
    flag("container-name", "BLOB_CONTAINER_NAME", None, "blob container (bucket) name"),
    flag("region", "BLOB_REGION", Some("us-east-1"), "blob store region"),
    flag("endpoint", "BLOB_ENDPOINT", None, "endpoint for S3-compatible blob stores"),
    flag("block-size", "BLOB_BLOCK_SIZE", Some("4194304"), "upload block size in bytes"),
    flag("parallelism", "BLOB_PARALLELISM", Some("16"), "maximum blocks uploaded concurrently"),
    flag("protect-young-backup-days", "PROTECT_YOUNG_BACKUP_DAYS", None, "refuse to delete artifacts younger than this many days"),
];

impl ProviderConfig {
    /// 環境変数から読み込む
    pub fn from_env() -> Result<Self, BackupError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// 任意の lookup 関数から読み込む（テスト用に差し替え可能）
    ///
    /// 値がなければ既定値を使います。検証は `validate()` で別途行います。
    pub fn from_lookup<F>(lookup: F) -> Result<Self, BackupError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(v) = get("BACKUP_DIR") {
            config.backup_dir = PathBuf::from(v);
        }
        if let Some(v) = get("WORK_DIR") {
            config.work_dir = PathBuf::from(v);
        }
        if let Some(v) = get("FILE_NAME") {
            config.file_name = v;
        }

        if let Some(v) = get("SPLIT_FILE") {
            config.dump.split_file = parse_bool("SPLIT_FILE", &v)?;
        }
        if let Some(v) = get("DATA_ONLY") {
            config.dump.data_only = parse_bool("DATA_ONLY", &v)?;
        }
        if let Some(v) = get("SCHEMA_ONLY") {
            config.dump.schema_only = parse_bool("SCHEMA_ONLY", &v)?;
        }
        if let Some(v) = get("ENCODING") {
            config.dump.encoding = Some(v);
        }
        if let Some(v) = get("DUMP_PROGRAM") {
            config.dump.program = v;
        }

        if let Some(v) = get("DB_HOST") {
            config.connection.host = v;
        }
        if let Some(v) = get("DB_PORT") {
            config.connection.port = parse_number("DB_PORT", &v)?;
        }
        if let Some(v) = get("DB_NAME") {
            config.connection.dbname = v;
        }
        if let Some(v) = get("DB_USERNAME") {
            config.connection.username = v;
        }
        if let Some(v) = get("DB_PASSWORD") {
            config.connection.password = v;
        }

        let blob_enabled = match get("BLOB_STORAGE") {
            Some(v) => parse_bool("BLOB_STORAGE", &v)?,
            None => false,
        };
        if blob_enabled {
            let mut blob = BlobSettings::default();
            if let Some(v) = get("BLOB_ACCOUNT_NAME") {
                blob.account_name = v;
            }
            if let Some(v) = get("BLOB_ACCOUNT_KEY") {
                blob.account_key = v;
            }
            if let Some(v) = get("BLOB_CONTAINER_NAME") {
                blob.container_name = v;
            }
            if let Some(v) = get("BLOB_REGION") {
                blob.region = v;
            }
            blob.endpoint = get("BLOB_ENDPOINT");
            if let Some(v) = get("BLOB_BLOCK_SIZE") {
                blob.block_size = parse_number("BLOB_BLOCK_SIZE", &v)?;
            }
            if let Some(v) = get("BLOB_PARALLELISM") {
                blob.parallelism = parse_number("BLOB_PARALLELISM", &v)?;
            }
            config.blob = Some(blob);
        }

        if let Some(v) = get("PROTECT_YOUNG_BACKUP_DAYS") {
            config.protect_young_backup_days = Some(parse_number("PROTECT_YOUNG_BACKUP_DAYS", &v)?);
        }

        Ok(config)
    }

    /// 必須パラメータと組み合わせの検証（fail-fast）
    pub fn validate(&self) -> Result<(), BackupError> {
        if self.backup_dir.as_os_str().is_empty() {
            return Err(invalid("`backup dir` (BACKUP_DIR) must be defined"));
        }
        if self.work_dir.as_os_str().is_empty() {
            return Err(invalid("`work dir` (WORK_DIR) must be defined"));
        }
        validate_prefix(&self.file_name).map_err(|e| {
            BackupError::ConfigInvalid(format!("`file name` (FILE_NAME) is not usable: {e}"))
        })?;

        let conn = &self.connection;
        if conn.host.trim().is_empty() {
            return Err(invalid(
                "`database host` (DB_HOST) must be set. It can be an IP address or a domain name",
            ));
        }
        if conn.port == 0 {
            return Err(invalid(
                "`database port` (DB_PORT) must be a valid value, such as 5432",
            ));
        }
        if conn.dbname.trim().is_empty() {
            return Err(invalid("`dbname` (DB_NAME) must be set"));
        }
        if conn.username.trim().is_empty() {
            return Err(invalid("`username` (DB_USERNAME) must be set"));
        }
        if conn.password.is_empty() {
            return Err(invalid("`password` (DB_PASSWORD) must be set"));
        }
        if self.dump.program.trim().is_empty() {
            return Err(invalid("`dump program` (DUMP_PROGRAM) must be set"));
        }
        if self.dump.data_only && self.dump.schema_only {
            return Err(invalid("`data-only` and `schema-only` cannot both be set"));
        }

        if let Some(blob) = &self.blob {
            if blob.account_name.trim().is_empty() {
                return Err(invalid("`account name` (BLOB_ACCOUNT_NAME) must be set in blob mode"));
            }
            if blob.account_key.is_empty() {
                return Err(invalid("`account key` (BLOB_ACCOUNT_KEY) must be set in blob mode"));
            }
            if blob.container_name.trim().is_empty() {
                return Err(invalid(
                    "`container name` (BLOB_CONTAINER_NAME) must be set in blob mode",
                ));
            }
            if blob.block_size == 0 {
                return Err(invalid("`block size` (BLOB_BLOCK_SIZE) must be greater than 0"));
            }
            if blob.parallelism == 0 {
                return Err(invalid("`parallelism` (BLOB_PARALLELISM) must be greater than 0"));
            }
            if self.dump.split_file {
                return Err(invalid(
                    "`split-file` produces a directory and cannot be stored as a single blob",
                ));
            }
        }

        Ok(())
    }

    /// 認証情報ファイルのパス
    pub fn credential_file(&self) -> PathBuf {
        self.work_dir.join(".pgpass")
    }

    /// ダンプ中の成果物を置く場所
    pub fn staging_dir(&self) -> PathBuf {
        self.work_dir.join("staging")
    }
}

/// 宣言済みの設定パラメータ一覧
pub fn register_flags() -> &'static [FlagSpec] {
    FLAGS
}

fn invalid(message: &str) -> BackupError {
    BackupError::ConfigInvalid(message.to_string())
}

fn parse_bool(name: &str, value: &str) -> Result<bool, BackupError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(BackupError::ConfigInvalid(format!(
            "{name} must be a boolean, got {other:?}"
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, BackupError> {
    value.trim().parse().map_err(|_| {
        BackupError::ConfigInvalid(format!("{name} must be a number, got {value:?}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    const REQUIRED: &[(&str, &str)] = &[
        ("DB_HOST", "db.internal"),
        ("DB_NAME", "app"),
        ("DB_PASSWORD", "secret"),
    ];

    #[test]
    fn defaults_match_the_documented_values() {
        let config = ProviderConfig::from_lookup(lookup(REQUIRED)).unwrap();
        assert_eq!(config.backup_dir, PathBuf::from("/var/backups/database"));
        assert_eq!(config.file_name, "database_dump");
        assert_eq!(config.connection.port, 5432);
        assert_eq!(config.connection.username, "postgres");
        assert_eq!(config.dump.encoding.as_deref(), Some("UTF-8"));
        assert!(config.blob.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_connection_parameters_fail_fast() {
        let config = ProviderConfig::from_lookup(lookup(&[("DB_HOST", "db")])).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, BackupError::ConfigInvalid(ref m) if m.contains("dbname")));
    }

    #[rstest]
    #[case::double_dash("my--dump")]
    #[case::hidden(".db")]
    fn unusable_file_names_are_rejected(#[case] file_name: &str) {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("FILE_NAME", file_name));
        let config = ProviderConfig::from_lookup(lookup(&pairs)).unwrap();
        assert!(matches!(
            config.validate(),
            Err(BackupError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn blob_mode_requires_account_and_container() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("BLOB_STORAGE", "true"));
        pairs.push(("BLOB_ACCOUNT_NAME", "acct"));
        let config = ProviderConfig::from_lookup(lookup(&pairs)).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("BLOB_ACCOUNT_KEY"));

        pairs.push(("BLOB_ACCOUNT_KEY", "key"));
        pairs.push(("BLOB_CONTAINER_NAME", "backups"));
        pairs.push(("BLOB_PARALLELISM", "4"));
        let config = ProviderConfig::from_lookup(lookup(&pairs)).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.blob.unwrap().upload_options().parallelism, 4);
    }

    #[test]
    fn secrets_are_not_serialized() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend_from_slice(&[
            ("DB_PASSWORD", "hunter2"),
            ("BLOB_STORAGE", "true"),
            ("BLOB_ACCOUNT_NAME", "acct"),
            ("BLOB_ACCOUNT_KEY", "s3cr3t-key"),
            ("BLOB_CONTAINER_NAME", "backups"),
        ]);
        let config = ProviderConfig::from_lookup(lookup(&pairs)).unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(!json.contains("s3cr3t-key"));
        assert!(json.contains("acct"));

        let back: ProviderConfig = serde_json::from_str(&json).unwrap();
        assert!(back.connection.password.is_empty());
    }

    #[test]
    fn split_file_cannot_be_combined_with_blob_mode() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend_from_slice(&[
            ("BLOB_STORAGE", "yes"),
            ("BLOB_ACCOUNT_NAME", "acct"),
            ("BLOB_ACCOUNT_KEY", "key"),
            ("BLOB_CONTAINER_NAME", "backups"),
            ("SPLIT_FILE", "true"),
        ]);
        let config = ProviderConfig::from_lookup(lookup(&pairs)).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn unparsable_values_are_config_errors() {
        let err = ProviderConfig::from_lookup(lookup(&[("DB_PORT", "fifty")])).unwrap_err();
        assert!(matches!(err, BackupError::ConfigInvalid(_)));

        let err = ProviderConfig::from_lookup(lookup(&[("DATA_ONLY", "maybe")])).unwrap_err();
        assert!(matches!(err, BackupError::ConfigInvalid(_)));
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let config = ProviderConfig::from_lookup(lookup(REQUIRED)).unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn every_flag_has_an_env_name() {
        let flags = register_flags();
        assert!(flags.iter().any(|f| f.name == "backup-dir"));
        assert!(flags.iter().all(|f| !f.env.is_empty()));
        for required in ["file-name", "dbname", "host", "port", "username", "password"] {
            assert!(flags.iter().any(|f| f.name == required), "{required}");
        }
    }
}
