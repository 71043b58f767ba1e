//! PgPassFile - ダンプツールに渡す認証情報ファイル
//!
//! パスワードはコマンドラインに載せず、`PGPASSFILE` で指すファイルに書きます。
//! 書き込みは一時ファイル + rename で行い、同時に呼ばれても壊れた内容は見えません。

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::domain::errors::from_io;
use crate::domain::BackupError;

pub struct PgPassFile {
    path: PathBuf,
    password: String,
    write_lock: Mutex<()>,
}

impl PgPassFile {
    pub fn new(path: impl Into<PathBuf>, password: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            password: password.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 任意のホスト・ポート・DB・ユーザーに同じパスワードを使う 1 行
    pub fn contents(&self) -> String {
        format!("*:*:*:*:{}", escape(&self.password))
    }

    /// ファイルを書き出す（所有者のみ読み書き可）。何度呼んでもよい
    pub async fn write(&self) -> Result<(), BackupError> {
        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| from_io(format!("create {}", parent.display()), e))?;
        }

        let tmp = self
            .path
            .with_extension(format!("tmp{:08x}", rand::random::<u32>()));

        let result = self.write_tmp(&tmp).await;
        let result = match result {
            Ok(()) => tokio::fs::rename(&tmp, &self.path)
                .await
                .map_err(|e| from_io(format!("rename {}", tmp.display()), e)),
            Err(e) => Err(e),
        };
        if result.is_err() {
            let _ = tokio::fs::remove_file(&tmp).await;
        }
        result?;

        tracing::debug!(path = %self.path.display(), "credential file written");
        Ok(())
    }

    async fn write_tmp(&self, tmp: &Path) -> Result<(), BackupError> {
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options
            .open(tmp)
            .await
            .map_err(|e| from_io(format!("create {}", tmp.display()), e))?;
        file.write_all(self.contents().as_bytes())
            .await
            .map_err(|e| from_io(format!("write {}", tmp.display()), e))?;
        file.sync_all()
            .await
            .map_err(|e| from_io(format!("sync {}", tmp.display()), e))
    }
}

impl std::fmt::Debug for PgPassFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgPassFile")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// `:` と `\` はエスケープが必要
fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c == ':' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
