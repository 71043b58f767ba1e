//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **LocalBackend**: ローカルファイルシステム
//! - **BlobBackend**: 任意の BlobClient の上の StorageBackend
//! - **InMemoryBlobClient**: 開発・テスト用の blob ストア
//! - **S3BlobClient**: aws-sdk-s3（feature `s3`）
//! - **ProcessCommandRunner**: 子プロセスでダンプツールを実行
//! - **ScriptedCommandRunner**: 台本どおりの結果を返す（テスト・デモ用）
//! - **PgPassFile**: 認証情報ファイル

pub mod blob_backend;
pub mod credentials;
pub mod inmem_blob;
pub mod local_backend;
pub mod process_runner;
#[cfg(feature = "s3")]
pub mod s3_client;
pub mod scripted_runner;

// 主要な型を再エクスポート
pub use self::blob_backend::BlobBackend;
pub use self::credentials::PgPassFile;
pub use self::inmem_blob::InMemoryBlobClient;
pub use self::local_backend::LocalBackend;
pub use self::process_runner::ProcessCommandRunner;
#[cfg(feature = "s3")]
pub use self::s3_client::S3BlobClient;
pub use self::scripted_runner::{ScriptedCommandRunner, ScriptedOutcome};
