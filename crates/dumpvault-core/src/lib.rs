//! dumpvault-core
//!
//! Core building blocks for the dumpvault backup provider.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, naming, record, errors）
//! - **ports**: 抽象化レイヤー（StorageBackend, BlobClient, CommandRunner, Clock）
//! - **impls**: 実装（LocalBackend, BlobBackend, S3BlobClient, ProcessCommandRunner, など）
//! - **app**: アプリケーションロジック（builder, provider, host contract）
//! - **config**: 不変の設定構造体とパラメータ宣言

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

pub use crate::app::{BackupProvider, BackupRepository, ExecContext, ProviderBuilder};
pub use crate::config::ProviderConfig;
pub use crate::domain::{ApiId, ArtifactId, BackupError, BackupRecord, BackupResponse, ErrorKind};
