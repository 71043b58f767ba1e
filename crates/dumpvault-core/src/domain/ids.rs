//! Domain identifiers (strongly-typed IDs).
//!
//! ## ApiId と ArtifactId
//! - **ApiId**: ホストが払い出す不透明なハンドル。1 つの論理バックアップ枠を表す
//! - **ArtifactId**: プロバイダが生成するタイムスタンプ（`YYYYMMDDHHMMSS`）。
//!   1 回のダンプ実行を表し、割り当て後は変更されない
//!
//! ## Phantom Type パターン
//! `Id<T>` というジェネリック型で共通実装を提供しつつ、
//! `T`（マーカー型）ごとに検証ルールを切り替えます。
//! ApiId と ArtifactId は異なる型なので、引数の取り違えはコンパイルエラーになります。
//!
//! どちらの ID もストレージキーの一部として永続化されるため、
//! 区切り文字（`---`）や CLI 引数区切り（`--`）を含む値は生成時点で拒否します。

use std::fmt;
use std::marker::PhantomData;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::errors::BackupError;

/// ArtifactId のタイムスタンプ書式（ソート可能）
pub const ARTIFACT_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// IdMarker は各 ID 型のマーカー trait
///
/// 型ごとの検証ルールを提供します。
pub trait IdMarker: Send + Sync + 'static {
    /// 値を検証し、違反していれば理由を返す
    fn validate(value: &str) -> Result<(), &'static str>;
}

/// ジェネリック ID 型
///
/// 検証済みの文字列だけを保持します（`parse` 以外に生成手段はない）。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id<T: IdMarker> {
    value: String,
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    /// 文字列を検証して Id を作成
    pub fn parse(value: impl Into<String>) -> Result<Self, BackupError> {
        let value = value.into();
        if let Err(reason) = T::validate(&value) {
            return Err(BackupError::InvalidIdentifier { value, reason });
        }
        Ok(Self {
            value,
            _marker: PhantomData,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn into_string(self) -> String {
        self.value
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl<T: IdMarker> AsRef<str> for Id<T> {
    fn as_ref(&self) -> &str {
        &self.value
    }
}

impl<T: IdMarker> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.value)
    }
}

impl<'de, T: IdMarker> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Self::parse(value).map_err(serde::de::Error::custom)
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// ApiId のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Api {}

impl IdMarker for Api {
    fn validate(value: &str) -> Result<(), &'static str> {
        if value.is_empty() {
            return Err("must not be empty");
        }
        if value.len() > 128 {
            return Err("must be at most 128 characters");
        }
        if value.contains("--") {
            return Err("must not contain `--`");
        }
        if value.starts_with('-') || value.ends_with('-') {
            return Err("must not start or end with `-`");
        }
        // ローカル backend は隠しファイルを一覧に出さない
        if value.starts_with('.') {
            return Err("must not start with `.`");
        }
        if !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err("may only contain ASCII letters, digits, `-`, `_` and `.`");
        }
        Ok(())
    }
}

/// ArtifactId のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Artifact {}

impl IdMarker for Artifact {
    fn validate(value: &str) -> Result<(), &'static str> {
        if value.is_empty() {
            return Err("must not be empty");
        }
        if value.len() > 64 {
            return Err("must be at most 64 characters");
        }
        if !value.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err("may only contain ASCII letters and digits");
        }
        Ok(())
    }
}

// ========================================
// Type Alias（使いやすさのため）
// ========================================

/// Caller-assigned handle for one logical backup slot.
pub type ApiId = Id<Api>;

/// Provider-generated token identifying one physical dump.
pub type ArtifactId = Id<Artifact>;

impl Id<Artifact> {
    /// 時刻から ArtifactId を生成（秒精度）
    pub fn from_timestamp(at: DateTime<Utc>) -> Self {
        Self {
            value: at.format(ARTIFACT_TIMESTAMP_FORMAT).to_string(),
            _marker: PhantomData,
        }
    }

    /// ArtifactId をタイムスタンプとして解釈する（生成書式でなければ None）
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(&self.value, ARTIFACT_TIMESTAMP_FORMAT)
            .ok()
            .map(|naive| naive.and_utc())
    }
}
