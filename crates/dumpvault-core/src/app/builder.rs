//! ProviderBuilder - プロバイダの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 差し替え可能な ports（テストでは InMemoryBlobClient / ScriptedCommandRunner を注入）

use std::sync::Arc;

use crate::app::provider::BackupProvider;
use crate::config::{BlobSettings, ProviderConfig};
use crate::domain::{BackupError, KeyCodec};
use crate::impls::{BlobBackend, LocalBackend, PgPassFile, ProcessCommandRunner};
use crate::ports::{BlobClient, Clock, CommandRunner, StorageBackend, SystemClock};

/// ProviderBuilder は BackupProvider を構築
///
/// # 使用例
/// ```ignore
/// let provider = ProviderBuilder::new(ProviderConfig::from_env()?)
///     .build()
///     .await?;
/// provider.init().await?;
/// ```
///
/// # Fail-fast 設計
/// - build() 時に設定を検証し、不足があれば `ConfigInvalid` を返す
/// - 明示されなかった ports は設定から選ぶ（blob 設定があれば Blob、なければ Local）
pub struct ProviderBuilder {
    config: ProviderConfig,
    storage: Option<Arc<dyn StorageBackend>>,
    blob_client: Option<Arc<dyn BlobClient>>,
    runner: Option<Arc<dyn CommandRunner>>,
    clock: Option<Arc<dyn Clock>>,
}

impl ProviderBuilder {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            storage: None,
            blob_client: None,
            runner: None,
            clock: None,
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// blob モードで使うクライアントを差し替える
    pub fn with_blob_client(mut self, client: Arc<dyn BlobClient>) -> Self {
        self.blob_client = Some(client);
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub async fn build(self) -> Result<BackupProvider, BackupError> {
        self.config.validate()?;
        let codec = KeyCodec::new(self.config.file_name.as_str())?;

        let storage: Arc<dyn StorageBackend> = match (self.storage, self.blob_client) {
            (Some(storage), _) => storage,
            (None, Some(client)) => {
                let upload = self
                    .config
                    .blob
                    .as_ref()
                    .map(BlobSettings::upload_options)
                    .unwrap_or_default();
                Arc::new(BlobBackend::new(client, upload))
            }
            (None, None) => match &self.config.blob {
                None => Arc::new(LocalBackend::new(&self.config.backup_dir)),
                Some(settings) => blob_storage(settings).await?,
            },
        };

        let runner: Arc<dyn CommandRunner> = match self.runner {
            Some(runner) => runner,
            None => {
                let pgpass = PgPassFile::new(
                    self.config.credential_file(),
                    self.config.connection.password.clone(),
                );
                Arc::new(ProcessCommandRunner::new(Arc::new(pgpass)))
            }
        };

        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };

        tracing::debug!(backend = ?storage.kind(), "provider built");
        Ok(BackupProvider::new(self.config, codec, storage, runner, clock))
    }
}

#[cfg(feature = "s3")]
async fn blob_storage(settings: &BlobSettings) -> Result<Arc<dyn StorageBackend>, BackupError> {
    let client = crate::impls::S3BlobClient::connect(settings).await;
    Ok(Arc::new(BlobBackend::new(
        Arc::new(client),
        settings.upload_options(),
    )))
}

#[cfg(not(feature = "s3"))]
async fn blob_storage(_settings: &BlobSettings) -> Result<Arc<dyn StorageBackend>, BackupError> {
    Err(BackupError::ConfigInvalid(
        "blob storage requires building with the `s3` feature".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{InMemoryBlobClient, ScriptedCommandRunner};
    use crate::ports::BackendKind;

    fn config() -> ProviderConfig {
        let mut config = ProviderConfig::default();
        config.connection.host = "db".to_string();
        config.connection.dbname = "app".to_string();
        config.connection.password = "pw".to_string();
        config
    }

    #[tokio::test]
    async fn test_build_local_by_default() {
        let provider = ProviderBuilder::new(config())
            .with_runner(Arc::new(ScriptedCommandRunner::new()))
            .build()
            .await
            .unwrap();
        assert_eq!(provider.storage().kind(), BackendKind::Local);
        assert_eq!(provider.codec().prefix(), "database_dump");
    }

    #[tokio::test]
    async fn test_build_with_blob_client() {
        let provider = ProviderBuilder::new(config())
            .with_blob_client(Arc::new(InMemoryBlobClient::new("backups")))
            .build()
            .await
            .unwrap();
        assert_eq!(provider.storage().kind(), BackendKind::Blob);
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_config() {
        let result = ProviderBuilder::new(ProviderConfig::default()).build().await;
        assert!(matches!(result, Err(BackupError::ConfigInvalid(_))));
    }

    #[cfg(not(feature = "s3"))]
    #[tokio::test]
    async fn test_build_blob_mode_without_s3_feature() {
        let mut config = config();
        config.blob = Some(BlobSettings {
            account_name: "acct".to_string(),
            account_key: "key".to_string(),
            container_name: "backups".to_string(),
            ..BlobSettings::default()
        });
        let result = ProviderBuilder::new(config).build().await;
        assert!(matches!(result, Err(BackupError::ConfigInvalid(_))));
    }
}
