//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（ファイルシステム, blob ストア, ダンプツール, 時計）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - 独立したインデックスは持たない（キー名が唯一の対応表）
//! - Local / Blob は同じ StorageBackend 契約を実装する
//! - コアは内部でリトライしない

pub mod blob_client;
pub mod clock;
pub mod command;
pub mod storage;

// 主要な trait を再エクスポート
pub use self::blob_client::{BlobClient, BlobError, BlobItem, ListSegment, UploadOptions};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::command::{CommandOutput, CommandRunner, DumpCommand};
pub use self::storage::{BackendKind, StorageBackend};
