//! Naming codec - ストレージキーと ApiID/ArtifactID の相互変換
//!
//! 独立したインデックスは持たず、ファイル名（blob 名）そのものが
//! ApiID と ArtifactID の唯一の対応表になります。
//!
//! ```text
//! <prefix>---<apiID>---<artifactID>   # 成果物
//! <apiID>.err                         # 作成失敗の sentinel
//! ```
//!
//! 区切り文字が各セグメントに現れると分解が曖昧になるため、
//! encode 時に検証し、decode はセグメント数が厳密に 3 の場合だけ成功します。
//! 副作用なし（I/O なし）。

use super::errors::BackupError;
use super::ids::{ApiId, ArtifactId};

/// セグメント区切り
pub const SEPARATOR: &str = "---";

/// CLI 引数の区切りとして使われるため、識別子に含めてはいけないトークン
pub const FORBIDDEN_TOKEN: &str = "--";

/// sentinel キーの接尾辞
pub const SENTINEL_SUFFIX: &str = ".err";

/// prefix（`--file-name`）を検証
pub fn validate_prefix(prefix: &str) -> Result<(), BackupError> {
    let reason = if prefix.is_empty() {
        Some("must not be empty")
    } else if prefix.contains(FORBIDDEN_TOKEN) {
        Some("must not contain `--`; a single `-` is fine")
    } else if prefix.starts_with('-') || prefix.ends_with('-') {
        Some("must not start or end with `-`")
    } else if prefix.starts_with('.') {
        Some("must not start with `.`; hidden names are not listed")
    } else if prefix.contains('/') || prefix.contains('\\') {
        Some("must not contain path separators")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(BackupError::InvalidIdentifier {
            value: prefix.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// `(prefix, apiID, artifactID)` からストレージキーを作る
///
/// ApiID / ArtifactID は文字列で受け取り、ここで改めて検証します
/// （型付きの値は `KeyCodec::encode` を使う）。
pub fn encode_key(prefix: &str, api_id: &str, artifact_id: &str) -> Result<String, BackupError> {
    validate_prefix(prefix)?;
    let api_id = ApiId::parse(api_id)?;
    let artifact_id = ArtifactId::parse(artifact_id)?;
    Ok(join(prefix, &api_id, &artifact_id))
}

/// ストレージキーを `(apiID, artifactID)` に分解する
pub fn decode_key(key: &str) -> Result<(ApiId, ArtifactId), BackupError> {
    let segments: Vec<&str> = key.split(SEPARATOR).collect();
    let [prefix, api_id, artifact_id] = segments.as_slice() else {
        return Err(BackupError::MalformedKey {
            key: key.to_string(),
            reason: format!(
                "expected 3 `{SEPARATOR}`-delimited segments, found {}",
                segments.len()
            ),
        });
    };

    validate_prefix(prefix).map_err(|e| malformed(key, e))?;
    let api_id = ApiId::parse(*api_id).map_err(|e| malformed(key, e))?;
    let artifact_id = ArtifactId::parse(*artifact_id).map_err(|e| malformed(key, e))?;
    Ok((api_id, artifact_id))
}

pub fn sentinel_key(api_id: &ApiId) -> String {
    format!("{api_id}{SENTINEL_SUFFIX}")
}

pub fn is_sentinel(key: &str) -> bool {
    sentinel_api_id(key).is_some()
}

/// sentinel キーから ApiID を取り出す
pub fn sentinel_api_id(key: &str) -> Option<ApiId> {
    if key.contains(SEPARATOR) {
        return None;
    }
    let api_id = key.strip_suffix(SENTINEL_SUFFIX)?;
    ApiId::parse(api_id).ok()
}

/// キーが ApiID に属するか
///
/// 部分文字列ではなく、分解したセグメントで比較します
/// （`12` が `123` のキーにマッチしてはいけない）。
pub fn matches_api_id(key: &str, api_id: &ApiId) -> bool {
    match decode_key(key) {
        Ok((decoded, _)) => &decoded == api_id,
        Err(_) => false,
    }
}

fn join(prefix: &str, api_id: &ApiId, artifact_id: &ArtifactId) -> String {
    format!("{prefix}{SEPARATOR}{api_id}{SEPARATOR}{artifact_id}")
}

fn malformed(key: &str, err: BackupError) -> BackupError {
    BackupError::MalformedKey {
        key: key.to_string(),
        reason: err.to_string(),
    }
}

/// KeyCodec は設定済みの prefix を保持する codec
#[derive(Debug, Clone)]
pub struct KeyCodec {
    prefix: String,
}

impl KeyCodec {
    pub fn new(prefix: impl Into<String>) -> Result<Self, BackupError> {
        let prefix = prefix.into();
        validate_prefix(&prefix)?;
        Ok(Self { prefix })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn encode(&self, api_id: &ApiId, artifact_id: &ArtifactId) -> String {
        join(&self.prefix, api_id, artifact_id)
    }

    /// この prefix の成果物キーが共通して持つ先頭部分
    pub fn listing_prefix(&self) -> String {
        format!("{}{SEPARATOR}", self.prefix)
    }

    /// 特定の ApiID の成果物キーが共通して持つ先頭部分
    pub fn api_listing_prefix(&self, api_id: &ApiId) -> String {
        format!("{}{SEPARATOR}{api_id}{SEPARATOR}", self.prefix)
    }

    /// 自分の prefix を持つキーだけを分解する
    pub fn decode(&self, key: &str) -> Result<(ApiId, ArtifactId), BackupError> {
        if !key.starts_with(&self.listing_prefix()) {
            return Err(BackupError::MalformedKey {
                key: key.to_string(),
                reason: format!("does not start with `{}`", self.listing_prefix()),
            });
        }
        decode_key(key)
    }
}
