//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてバックアップのライフサイクルを実装します。
//!
//! # 主要コンポーネント
//! - **ProviderBuilder**: プロバイダの構築とワイヤリング
//! - **BackupProvider**: create / list / get / delete と sentinel プロトコル
//! - **BackupRepository**: ホストから見た表面（文字列 ApiID、BackupResponse）
//! - **KeyedLocks**: ApiID ごとの直列化

pub mod builder;
pub mod dump;
pub mod host;
pub mod locks;
pub mod provider;

// 主要な型を再エクスポート
pub use self::builder::ProviderBuilder;
pub use self::dump::build_dump_command;
pub use self::host::{BackupRepository, CommandStatus, ExecContext};
pub use self::locks::KeyedLocks;
pub use self::provider::BackupProvider;
