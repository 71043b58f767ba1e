//! BackupProvider - バックアップ・ライフサイクルの orchestration
//!
//! 状態はどこにも保存しません。ApiID ごとの状態はキーと sentinel の有無から導出します：
//!
//! ```text
//! absent ──create──▶ available ──delete──▶ absent
//!    │
//!    └──create(失敗)──▶ failed(sentinel) ──delete──▶ absent
//! ```
//!
//! # 設計原則
//! - コアは内部でリトライしない（失敗はすべてホストへ返す）
//! - sentinel は成果物より優先する（両方あれば failed 扱い）
//! - 同じ ApiID の Create / Delete は KeyedLocks で直列化する

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::app::dump::build_dump_command;
use crate::app::host::{BackupRepository, CommandStatus, ExecContext};
use crate::app::locks::KeyedLocks;
use crate::config::{FlagSpec, ProviderConfig, register_flags};
use crate::domain::errors::from_io;
use crate::domain::naming::sentinel_api_id;
use crate::domain::{ApiId, ArtifactId, BackupError, BackupRecord, BackupResponse, KeyCodec};
use crate::impls::local_backend::remove_path;
use crate::ports::{Clock, CommandRunner, StorageBackend};

pub struct BackupProvider {
    config: ProviderConfig,
    codec: KeyCodec,
    storage: Arc<dyn StorageBackend>,
    runner: Arc<dyn CommandRunner>,
    clock: Arc<dyn Clock>,
    locks: KeyedLocks,
}

impl BackupProvider {
    pub(crate) fn new(
        config: ProviderConfig,
        codec: KeyCodec,
        storage: Arc<dyn StorageBackend>,
        runner: Arc<dyn CommandRunner>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            codec,
            storage,
            runner,
            clock,
            locks: KeyedLocks::new(),
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn codec(&self) -> &KeyCodec {
        &self.codec
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    /// ダンプツールの確認、認証情報ファイルと保存先の準備
    pub async fn prepare(&self) -> Result<(), BackupError> {
        self.config.validate()?;

        let version = self.runner.version(&self.config.dump.program).await?;
        tracing::info!(version = %version, "dump tool available");

        self.runner.prepare().await?;
        let staging = self.config.staging_dir();
        tokio::fs::create_dir_all(&staging)
            .await
            .map_err(|e| from_io(format!("create {}", staging.display()), e))?;
        self.storage.prepare().await?;

        tracing::info!(
            backend = ?self.storage.kind(),
            prefix = %self.codec.prefix(),
            "backup provider ready"
        );
        Ok(())
    }

    /// ダンプを取り、成果物として保存する
    ///
    /// # 実装
    /// 1. ApiID のロックを取る
    /// 2. 現在時刻から ArtifactID を作り、ステージング領域にダンプする
    /// 3. 失敗（タイムアウト含む）なら sentinel を書いて元のエラーを返す
    /// 4. 成功なら StorageBackend に put し、古い sentinel を消す
    pub async fn create(
        &self,
        api_id: &ApiId,
        timeout: Duration,
        ctx: &ExecContext,
    ) -> Result<BackupRecord, BackupError> {
        let _guard = self.locks.acquire(api_id.as_str()).await;

        let artifact_id = ArtifactId::from_timestamp(self.clock.now());
        let key = self.codec.encode(api_id, &artifact_id);
        let staging_dir = self.config.staging_dir();
        tokio::fs::create_dir_all(&staging_dir)
            .await
            .map_err(|e| from_io(format!("create {}", staging_dir.display()), e))?;
        let staging = staging_dir.join(&key);
        discard(&staging).await;

        let command = build_dump_command(&self.config, &staging);
        tracing::info!(%api_id, %artifact_id, "creating backup");

        let started_at = self.clock.now();
        let result = self.runner.run(&command, timeout).await;
        ctx.record(CommandStatus {
            command: command.command_line(),
            started_at: result.as_ref().map(|o| o.started_at).unwrap_or(started_at),
            finished_at: result
                .as_ref()
                .map(|o| o.finished_at)
                .unwrap_or_else(|_| self.clock.now()),
            exit_code: match &result {
                Ok(_) => Some(0),
                Err(BackupError::CommandFailed { code, .. }) => *code,
                Err(_) => None,
            },
            timed_out: matches!(result, Err(BackupError::TimeoutExceeded { .. })),
        });

        if let Err(err) = result {
            tracing::error!(%api_id, %artifact_id, error = %err, "dump failed, writing sentinel");
            if let Err(sentinel_err) = self.storage.write_sentinel(api_id, &artifact_id).await {
                tracing::error!(%api_id, error = %sentinel_err, "failed to write sentinel");
            }
            discard(&staging).await;
            return Err(err);
        }

        let put = self.storage.put(&key, &staging).await;
        discard(&staging).await;
        put?;

        self.storage.delete_sentinel(api_id).await?;

        let size = self.storage.get(&key).await?.unwrap_or(0);
        let record = BackupRecord::available(
            api_id.clone(),
            artifact_id,
            size,
            self.storage.location(&key),
        );
        tracing::info!(
            %api_id,
            artifact_id = %record.artifact_id,
            size_mb = record.size_mb(),
            location = %record.location,
            "backup created"
        );
        Ok(record)
    }

    /// 成功した全バックアップ（sentinel のある ApiID は除く）
    pub async fn list(&self) -> Result<Vec<BackupRecord>, BackupError> {
        let keys = self.storage.list("").await?;
        let listing_prefix = self.codec.listing_prefix();

        let mut failed = HashSet::new();
        let mut artifacts = Vec::new();
        for key in keys {
            if let Some(api_id) = sentinel_api_id(&key) {
                failed.insert(api_id);
                continue;
            }
            if !key.starts_with(&listing_prefix) {
                tracing::trace!(%key, "ignoring foreign key");
                continue;
            }
            match self.codec.decode(&key) {
                Ok((api_id, artifact_id)) => artifacts.push((key, api_id, artifact_id)),
                Err(e) => tracing::warn!(%key, error = %e, "skipping undecodable storage key"),
            }
        }

        let mut records = Vec::with_capacity(artifacts.len());
        for (key, api_id, artifact_id) in artifacts {
            if failed.contains(&api_id) {
                tracing::debug!(%api_id, %key, "masked by sentinel");
                continue;
            }
            // list と get の間に消えたものは飛ばす
            let Some(size) = self.storage.get(&key).await? else {
                continue;
            };
            records.push(BackupRecord::available(
                api_id,
                artifact_id,
                size,
                self.storage.location(&key),
            ));
        }
        Ok(records)
    }

    /// ApiID の成果物を返す。sentinel があるか成果物がなければ None
    pub async fn get(&self, api_id: &ApiId) -> Result<Option<BackupRecord>, BackupError> {
        if let Some(failed) = self.storage.read_sentinel(api_id).await? {
            tracing::debug!(%api_id, failed_artifact = %failed.trim(), "sentinel present");
            return Ok(None);
        }

        let mut keys = self.matching_keys(api_id).await?;
        if keys.len() > 1 {
            tracing::warn!(%api_id, count = keys.len(), "multiple artifacts, using the newest");
        }
        let Some((key, artifact_id)) = keys.pop() else {
            return Ok(None);
        };
        let Some(size) = self.storage.get(&key).await? else {
            return Ok(None);
        };
        Ok(Some(BackupRecord::available(
            api_id.clone(),
            artifact_id,
            size,
            self.storage.location(&key),
        )))
    }

    /// 成果物か sentinel を削除する。どちらもなければ NotFound
    pub async fn delete(&self, api_id: &ApiId) -> Result<(), BackupError> {
        let _guard = self.locks.acquire(api_id.as_str()).await;

        if self.storage.read_sentinel(api_id).await?.is_some() {
            for (key, _) in self.matching_keys(api_id).await? {
                match self.storage.delete(&key).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
            }
            self.storage.delete_sentinel(api_id).await?;
            tracing::info!(%api_id, "failed backup cleared");
            return Ok(());
        }

        let keys = self.matching_keys(api_id).await?;
        if keys.is_empty() {
            return Err(BackupError::NotFound(format!("no backup for {api_id}")));
        }

        if let Some(floor_days) = self.config.protect_young_backup_days {
            self.check_age(api_id, &keys, floor_days)?;
        }

        for (key, _) in &keys {
            self.storage.delete(key).await?;
        }
        tracing::info!(%api_id, count = keys.len(), "backup deleted");
        Ok(())
    }

    fn check_age(
        &self,
        api_id: &ApiId,
        keys: &[(String, ArtifactId)],
        floor_days: u32,
    ) -> Result<(), BackupError> {
        let now = self.clock.now();
        let floor = chrono::Duration::days(i64::from(floor_days));
        for (key, artifact_id) in keys {
            let Some(created_at) = artifact_id.timestamp() else {
                tracing::warn!(%key, "artifact id is not a timestamp, age unknown");
                continue;
            };
            let age = now - created_at;
            if age < floor {
                return Err(BackupError::TooYoung {
                    api_id: api_id.to_string(),
                    age_hours: age.num_hours(),
                    floor_days,
                });
            }
        }
        Ok(())
    }

    /// ApiID に属するキーを ArtifactID の昇順で返す
    async fn matching_keys(
        &self,
        api_id: &ApiId,
    ) -> Result<Vec<(String, ArtifactId)>, BackupError> {
        let keys = self
            .storage
            .list(&self.codec.api_listing_prefix(api_id))
            .await?;

        let mut matches = Vec::new();
        for key in keys {
            match self.codec.decode(&key) {
                Ok((decoded, artifact_id)) if &decoded == api_id => matches.push((key, artifact_id)),
                Ok(_) => {}
                Err(e) => tracing::warn!(%key, error = %e, "skipping undecodable storage key"),
            }
        }
        matches.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(matches)
    }
}

/// ステージングの残りを消す（なければ何もしない）
async fn discard(path: &Path) {
    match remove_path(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "staging output removed"),
        Err(e) if e.is_not_found() => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove staging output"),
    }
}

#[async_trait]
impl BackupRepository for BackupProvider {
    async fn init(&self) -> Result<(), BackupError> {
        self.prepare().await
    }

    fn register_flags(&self) -> &'static [FlagSpec] {
        register_flags()
    }

    async fn create_new_backup(
        &self,
        api_id: &str,
        timeout: Duration,
        ctx: &ExecContext,
    ) -> Result<(), BackupError> {
        let api_id = ApiId::parse(api_id)?;
        self.create(&api_id, timeout, ctx).await.map(|_| ())
    }

    async fn get_all_backups(&self) -> Result<Vec<BackupResponse>, BackupError> {
        Ok(self.list().await?.into_iter().map(BackupResponse::from).collect())
    }

    async fn get_backup(&self, api_id: &str) -> Result<Option<BackupResponse>, BackupError> {
        let api_id = ApiId::parse(api_id)?;
        Ok(self.get(&api_id).await?.map(BackupResponse::from))
    }

    async fn delete_backup(&self, api_id: &str) -> Result<(), BackupError> {
        let api_id = ApiId::parse(api_id)?;
        self.delete(&api_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ProviderBuilder;
    use crate::impls::{ScriptedCommandRunner, ScriptedOutcome};
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        provider: BackupProvider,
        runner: ScriptedCommandRunner,
        clock: FixedClock,
    }

    async fn fixture(protect_days: Option<u32>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let mut config = ProviderConfig::default();
        config.backup_dir = dir.path().join("database");
        config.work_dir = dir.path().to_path_buf();
        config.file_name = "dump".to_string();
        config.connection.host = "db".to_string();
        config.connection.dbname = "app".to_string();
        config.connection.password = "pw".to_string();
        config.protect_young_backup_days = protect_days;

        let runner = ScriptedCommandRunner::new();
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
        let provider = ProviderBuilder::new(config)
            .with_runner(Arc::new(runner.clone()))
            .with_clock(Arc::new(clock.clone()))
            .build()
            .await
            .unwrap();
        provider.prepare().await.unwrap();

        Fixture {
            _dir: dir,
            provider,
            runner,
            clock,
        }
    }

    fn api(value: &str) -> ApiId {
        ApiId::parse(value).unwrap()
    }

    #[tokio::test]
    async fn create_names_the_artifact_after_the_clock() {
        let f = fixture(None).await;
        let record = f
            .provider
            .create(&api("42"), Duration::from_secs(60), &ExecContext::new())
            .await
            .unwrap();

        assert_eq!(record.artifact_id.as_str(), "20240301120000");
        assert!(record.location.ends_with("dump---42---20240301120000"));
        assert_eq!(record.size_bytes, 1024);
        assert_eq!(f.runner.prepared(), 1);

        let commands = f.runner.commands();
        assert!(
            commands[0]
                .args
                .iter()
                .any(|a| a.ends_with("staging/dump---42---20240301120000"))
        );
    }

    #[tokio::test]
    async fn staging_is_emptied_after_create() {
        let f = fixture(None).await;
        f.runner.push(ScriptedOutcome::Fail { code: 1 });
        let _ = f
            .provider
            .create(&api("1"), Duration::from_secs(60), &ExecContext::new())
            .await;
        f.provider
            .create(&api("2"), Duration::from_secs(60), &ExecContext::new())
            .await
            .unwrap();

        let staging = f.provider.config().staging_dir();
        assert_eq!(std::fs::read_dir(staging).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn exec_context_records_the_command_status() {
        let f = fixture(None).await;
        let ctx = ExecContext::new();

        f.provider
            .create(&api("7"), Duration::from_secs(60), &ctx)
            .await
            .unwrap();
        let last = ctx.last_command().unwrap();
        assert!(last.succeeded());
        assert!(last.command.starts_with("pg_dump --username=postgres"));

        f.runner.push(ScriptedOutcome::Fail { code: 2 });
        let _ = f.provider.create(&api("7"), Duration::from_secs(60), &ctx).await;
        let last = ctx.last_command().unwrap();
        assert_eq!(last.exit_code, Some(2));
        assert!(!last.timed_out);

        f.runner.push(ScriptedOutcome::Timeout);
        let _ = f.provider.create(&api("7"), Duration::from_secs(60), &ctx).await;
        let last = ctx.last_command().unwrap();
        assert!(last.timed_out);
        assert_eq!(last.exit_code, None);
    }

    #[tokio::test]
    async fn successful_create_clears_a_stale_sentinel() {
        let f = fixture(None).await;
        let id = api("9");
        f.runner.push(ScriptedOutcome::Fail { code: 1 });
        let err = f
            .provider
            .create(&id, Duration::from_secs(60), &ExecContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::CommandFailed { .. }));
        assert!(f.provider.get(&id).await.unwrap().is_none());

        f.clock.advance(chrono::Duration::minutes(5));
        f.provider
            .create(&id, Duration::from_secs(60), &ExecContext::new())
            .await
            .unwrap();
        assert!(f.provider.storage().read_sentinel(&id).await.unwrap().is_none());
        let record = f.provider.get(&id).await.unwrap().unwrap();
        assert_eq!(record.artifact_id.as_str(), "20240301120500");
    }

    #[tokio::test]
    async fn get_prefers_the_newest_artifact() {
        let f = fixture(None).await;
        let id = api("5");
        f.provider
            .create(&id, Duration::from_secs(60), &ExecContext::new())
            .await
            .unwrap();
        f.clock.advance(chrono::Duration::hours(1));
        f.provider
            .create(&id, Duration::from_secs(60), &ExecContext::new())
            .await
            .unwrap();

        let record = f.provider.get(&id).await.unwrap().unwrap();
        assert_eq!(record.artifact_id.as_str(), "20240301130000");

        // Delete は両方を消す
        f.provider.delete(&id).await.unwrap();
        assert!(f.provider.get(&id).await.unwrap().is_none());
        assert!(f.provider.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn young_backups_are_protected() {
        let f = fixture(Some(3)).await;
        let id = api("11");
        f.provider
            .create(&id, Duration::from_secs(60), &ExecContext::new())
            .await
            .unwrap();

        f.clock.advance(chrono::Duration::days(1));
        let err = f.provider.delete(&id).await.unwrap_err();
        assert!(!err.is_retryable());
        match err {
            BackupError::TooYoung {
                age_hours,
                floor_days,
                ..
            } => {
                assert_eq!(age_hours, 24);
                assert_eq!(floor_days, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        f.clock.advance(chrono::Duration::days(3));
        f.provider.delete(&id).await.unwrap();
    }

    #[tokio::test]
    async fn failed_backups_are_not_protected_by_age() {
        let f = fixture(Some(30)).await;
        let id = api("12");
        f.runner.push(ScriptedOutcome::Timeout);
        let _ = f
            .provider
            .create(&id, Duration::from_secs(1), &ExecContext::new())
            .await;
        f.provider.delete(&id).await.unwrap();
        assert!(f.provider.delete(&id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn undecodable_keys_do_not_abort_the_listing() {
        let f = fixture(None).await;
        f.provider
            .create(&api("1"), Duration::from_secs(60), &ExecContext::new())
            .await
            .unwrap();
        let root = &f.provider.config().backup_dir;
        std::fs::write(root.join("dump---bad---key---extra"), b"x").unwrap();
        std::fs::write(root.join("dump---2---not-a-timestamp"), b"x").unwrap();
        std::fs::write(root.join("unrelated.txt"), b"x").unwrap();

        let records = f.provider.list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].api_id.as_str(), "1");
    }

    #[tokio::test]
    async fn host_surface_validates_identifiers() {
        let f = fixture(None).await;
        let err = f
            .provider
            .create_new_backup("bad--id", Duration::from_secs(60), &ExecContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::InvalidIdentifier { .. }));
        assert!(f.runner.commands().is_empty());

        f.provider
            .create_new_backup("abc", Duration::from_secs(60), &ExecContext::new())
            .await
            .unwrap();
        let response = f.provider.get_backup("abc").await.unwrap().unwrap();
        assert_eq!(response.id, "abc");
        assert_eq!(response.data_id, "20240301120000");
        assert!((response.size_mb - 0.001024).abs() < 1e-9);
        assert_eq!(f.provider.get_all_backups().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn same_api_id_creates_run_one_at_a_time() {
        let dir = TempDir::new().unwrap();
        let mut config = ProviderConfig::default();
        config.backup_dir = dir.path().join("database");
        config.work_dir = dir.path().to_path_buf();
        config.connection.host = "db".to_string();
        config.connection.dbname = "app".to_string();
        config.connection.password = "pw".to_string();

        let runner = ScriptedCommandRunner::new().with_delay(Duration::from_millis(100));
        let provider = Arc::new(
            ProviderBuilder::new(config)
                .with_runner(Arc::new(runner.clone()))
                .build()
                .await
                .unwrap(),
        );
        provider.prepare().await.unwrap();

        let start = std::time::Instant::now();
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let provider = provider.clone();
                tokio::spawn(async move {
                    provider
                        .create(&api("77"), Duration::from_secs(5), &ExecContext::new())
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(200));
        assert_eq!(runner.commands().len(), 2);
    }
}
