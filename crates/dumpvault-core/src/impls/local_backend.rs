//! LocalBackend - ローカルファイルシステム上の StorageBackend
//!
//! # 学習ポイント
//! - tokio::fs による非同期 I/O
//! - rename（同一ファイルシステム）と再帰コピー（別デバイス）のフォールバック
//! - ディレクトリ形式の成果物はファイルサイズの合計で報告する

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::domain::errors::from_io;
use crate::domain::naming::sentinel_key;
use crate::domain::{ApiId, ArtifactId, BackupError};
use crate::ports::{BackendKind, StorageBackend};

/// LocalBackend は `backup_dir` 直下に成果物を置く
///
/// キーはそのままファイル名（またはディレクトリ名）になります。
/// sentinel は `<backup_dir>/<apiID>.err` です。
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn prepare(&self) -> Result<(), BackupError> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| from_io(format!("create {}", self.root.display()), e))
    }

    async fn put(&self, key: &str, source: &Path) -> Result<(), BackupError> {
        let target = self.path_for(key);
        match fs::rename(source, &target).await {
            Ok(()) => Ok(()),
            Err(err) => {
                // 別デバイスなど rename できない場合はコピーしてから元を消す
                tracing::debug!(
                    source = %source.display(),
                    target = %target.display(),
                    error = %err,
                    "rename failed, falling back to copy"
                );
                copy_recursive(source, &target).await?;
                remove_path(source).await
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<u64>, BackupError> {
        let path = self.path_for(key);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => Ok(Some(dir_size(&path).await?)),
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(from_io(format!("stat {}", path.display()), e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, BackupError> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(from_io(format!("list {}", self.root.display()), e)),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| from_io(format!("list {}", self.root.display()), e))?
        {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                tracing::warn!(path = %entry.path().display(), "skipping non UTF-8 file name");
                continue;
            };
            if name.starts_with('.') || !name.starts_with(prefix) {
                continue;
            }
            keys.push(name);
        }
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<(), BackupError> {
        let path = self.path_for(key);
        fs::metadata(&path)
            .await
            .map_err(|e| from_io(format!("artifact {key}"), e))?;
        remove_path(&path).await
    }

    fn location(&self, key: &str) -> String {
        self.path_for(key).display().to_string()
    }

    async fn write_sentinel(
        &self,
        api_id: &ApiId,
        artifact_id: &ArtifactId,
    ) -> Result<(), BackupError> {
        let path = self.path_for(&sentinel_key(api_id));
        fs::write(&path, artifact_id.as_str())
            .await
            .map_err(|e| from_io(format!("write {}", path.display()), e))
    }

    async fn read_sentinel(&self, api_id: &ApiId) -> Result<Option<String>, BackupError> {
        let path = self.path_for(&sentinel_key(api_id));
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(from_io(format!("read {}", path.display()), e)),
        }
    }

    async fn delete_sentinel(&self, api_id: &ApiId) -> Result<(), BackupError> {
        let path = self.path_for(&sentinel_key(api_id));
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(from_io(format!("remove {}", path.display()), e)),
        }
    }
}

/// ファイルまたはディレクトリを削除
pub(crate) async fn remove_path(path: &Path) -> Result<(), BackupError> {
    let meta = fs::symlink_metadata(path)
        .await
        .map_err(|e| from_io(format!("stat {}", path.display()), e))?;
    let result = if meta.is_dir() {
        fs::remove_dir_all(path).await
    } else {
        fs::remove_file(path).await
    };
    result.map_err(|e| from_io(format!("remove {}", path.display()), e))
}

/// ディレクトリ配下のファイルサイズの合計
pub(crate) async fn dir_size(root: &Path) -> Result<u64, BackupError> {
    let mut total = 0;
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| from_io(format!("list {}", dir.display()), e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| from_io(format!("list {}", dir.display()), e))?
        {
            let meta = entry
                .metadata()
                .await
                .map_err(|e| from_io(format!("stat {}", entry.path().display()), e))?;
            if meta.is_dir() {
                pending.push(entry.path());
            } else {
                total += meta.len();
            }
        }
    }
    Ok(total)
}

async fn copy_recursive(source: &Path, target: &Path) -> Result<(), BackupError> {
    let meta = fs::metadata(source)
        .await
        .map_err(|e| from_io(format!("stat {}", source.display()), e))?;
    if !meta.is_dir() {
        fs::copy(source, target)
            .await
            .map_err(|e| from_io(format!("copy {}", source.display()), e))?;
        return Ok(());
    }

    let mut pending = vec![(source.to_path_buf(), target.to_path_buf())];
    while let Some((from, to)) = pending.pop() {
        fs::create_dir_all(&to)
            .await
            .map_err(|e| from_io(format!("create {}", to.display()), e))?;
        let mut entries = fs::read_dir(&from)
            .await
            .map_err(|e| from_io(format!("list {}", from.display()), e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| from_io(format!("list {}", from.display()), e))?
        {
            let dest = to.join(entry.file_name());
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| from_io(format!("stat {}", entry.path().display()), e))?;
            if file_type.is_dir() {
                pending.push((entry.path(), dest));
            } else {
                fs::copy(entry.path(), &dest)
                    .await
                    .map_err(|e| from_io(format!("copy {}", entry.path().display()), e))?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn api(value: &str) -> ApiId {
        ApiId::parse(value).unwrap()
    }

    async fn setup() -> (TempDir, LocalBackend) {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path().join("backups"));
        backend.prepare().await.unwrap();
        (dir, backend)
    }

    #[tokio::test]
    async fn put_moves_file_and_reports_size() {
        let (dir, backend) = setup().await;
        let source = dir.path().join("staged");
        fs::write(&source, b"hello world").await.unwrap();

        backend.put("dump---1---20240101000000", &source).await.unwrap();

        assert!(!source.exists());
        assert_eq!(backend.get("dump---1---20240101000000").await.unwrap(), Some(11));
        assert_eq!(backend.get("dump---2---20240101000000").await.unwrap(), None);
    }

    #[tokio::test]
    async fn directory_artifacts_report_the_sum_of_their_files() {
        let (dir, backend) = setup().await;
        let source = dir.path().join("split");
        fs::create_dir_all(source.join("nested")).await.unwrap();
        fs::write(source.join("toc.dat"), vec![0u8; 100]).await.unwrap();
        fs::write(source.join("nested/3001.dat"), vec![0u8; 50]).await.unwrap();

        backend.put("dump---1---20240101000000", &source).await.unwrap();

        assert_eq!(backend.get("dump---1---20240101000000").await.unwrap(), Some(150));
        backend.delete("dump---1---20240101000000").await.unwrap();
        assert_eq!(backend.get("dump---1---20240101000000").await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_filters_by_prefix_and_skips_hidden_files() {
        let (_dir, backend) = setup().await;
        for name in ["dump---1---20240101000000", "other---1---20240101000000", ".pgpass"] {
            fs::write(backend.root().join(name), b"x").await.unwrap();
        }

        let keys = backend.list("dump---").await.unwrap();
        assert_eq!(keys, vec!["dump---1---20240101000000".to_string()]);
        assert_eq!(backend.list("").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn list_of_missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path().join("never-created"));
        assert!(backend.list("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_of_missing_key_is_not_found() {
        let (_dir, backend) = setup().await;
        let err = backend.delete("dump---1---20240101000000").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn sentinel_lifecycle() {
        let (_dir, backend) = setup().await;
        let api_id = api("42");
        let artifact_id = ArtifactId::parse("20240101000000").unwrap();

        assert_eq!(backend.read_sentinel(&api_id).await.unwrap(), None);
        backend.write_sentinel(&api_id, &artifact_id).await.unwrap();
        assert_eq!(
            backend.read_sentinel(&api_id).await.unwrap().as_deref(),
            Some("20240101000000")
        );
        assert!(backend.root().join("42.err").exists());

        backend.delete_sentinel(&api_id).await.unwrap();
        assert_eq!(backend.read_sentinel(&api_id).await.unwrap(), None);
        // 2 回目も成功する
        backend.delete_sentinel(&api_id).await.unwrap();
    }

    #[test]
    fn location_is_the_artifact_path() {
        let backend = LocalBackend::new("/var/backups/database");
        assert_eq!(
            backend.location("dump---1---20240101000000"),
            "/var/backups/database/dump---1---20240101000000"
        );
    }
}
