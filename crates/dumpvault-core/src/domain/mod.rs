//! Domain model (IDs, naming codec, records, errors).
//!
//! ドメイン層は I/O を持ちません。
//! 状態はすべてストレージキーの文字列とファイルの有無から導出されます。

pub mod errors;
pub mod ids;
pub mod naming;
pub mod record;

pub use self::errors::{BackupError, ErrorKind};
pub use self::ids::{ApiId, ArtifactId};
pub use self::naming::KeyCodec;
pub use self::record::{BackupRecord, BackupResponse, BackupStatus};
