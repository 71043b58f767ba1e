//! S3BlobClient - aws-sdk-s3 による BlobClient 実装（feature `s3`）
//!
//! S3 互換エンドポイント（MinIO など）にも `endpoint` で接続できます。
//!
//! # 実装
//! - ブロックサイズ以下のファイルは 1 回の PutObject
//! - それ以上はマルチパートアップロード。パートは `parallelism` 件まで並行に送り、
//!   失敗したらアップロード自体を abort する
//! - ネットワーク障害・スロットリング・5xx 系のコードは `BlobError::Unavailable`

use std::path::Path;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLocationConstraint, CompletedMultipartUpload, CompletedPart, CreateBucketConfiguration,
};
use futures::{StreamExt, TryStreamExt};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::config::BlobSettings;
use crate::ports::{BlobClient, BlobError, BlobItem, ListSegment, UploadOptions};

/// S3 のマルチパートで許される最小パートサイズ（最後のパートを除く）
const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// 1 アップロードあたりのパート数の上限
const MAX_PARTS: u64 = 10_000;

const UNAVAILABLE_CODES: &[&str] = &[
    "SlowDown",
    "ServiceUnavailable",
    "InternalError",
    "RequestTimeout",
    "Throttling",
];

pub struct S3BlobClient {
    client: Client,
    bucket: String,
    region: String,
}

impl S3BlobClient {
    /// アカウント名をアクセスキー ID、アカウントキーをシークレットとして接続する
    pub async fn connect(settings: &BlobSettings) -> Self {
        let credentials = Credentials::new(
            settings.account_name.clone(),
            settings.account_key.clone(),
            None,
            None,
            "dumpvault",
        );

        let mut builder = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .credentials_provider(credentials);

        if let Some(ref endpoint) = settings.endpoint {
            builder = builder.endpoint_url(endpoint.trim_end_matches('/'));
        }

        let sdk_config = builder.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(s3_config),
            bucket: settings.container_name.clone(),
            region: settings.region.clone(),
        }
    }

    async fn put_single(&self, name: &str, path: &Path) -> Result<(), BlobError> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| BlobError::Other(format!("read {}: {e}", path.display())))?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(name)
            .body(body)
            .send()
            .await
            .map_err(|e| classify(&format!("put {name}"), e))?;
        Ok(())
    }

    async fn put_multipart(
        &self,
        name: &str,
        path: &Path,
        size: u64,
        part_size: usize,
        parallelism: usize,
    ) -> Result<(), BlobError> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(name)
            .send()
            .await
            .map_err(|e| classify(&format!("start upload {name}"), e))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| BlobError::Other(format!("no upload id returned for {name}")))?
            .to_string();

        let part_count = size.div_ceil(part_size as u64);
        tracing::debug!(name, size, part_count, parallelism, "starting multipart upload");

        let uploaded: Result<Vec<CompletedPart>, BlobError> = futures::stream::iter(0..part_count)
            .map(|index| self.upload_part(name, &upload_id, path, index, part_size, size))
            .buffer_unordered(parallelism.max(1))
            .try_collect()
            .await;

        let result = match uploaded {
            Ok(mut parts) => {
                parts.sort_by_key(|p| p.part_number());
                let completed = CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build();
                self.client
                    .complete_multipart_upload()
                    .bucket(&self.bucket)
                    .key(name)
                    .upload_id(&upload_id)
                    .multipart_upload(completed)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| classify(&format!("complete upload {name}"), e))
            }
            Err(e) => Err(e),
        };

        if let Err(ref err) = result {
            tracing::warn!(name, error = %err, "multipart upload failed, aborting");
            if let Err(abort_err) = self
                .client
                .abort_multipart_upload()
                .bucket(&self.bucket)
                .key(name)
                .upload_id(&upload_id)
                .send()
                .await
            {
                tracing::warn!(
                    name,
                    error = %DisplayErrorContext(&abort_err),
                    "failed to abort multipart upload"
                );
            }
        }
        result
    }

    async fn upload_part(
        &self,
        name: &str,
        upload_id: &str,
        path: &Path,
        index: u64,
        part_size: usize,
        total: u64,
    ) -> Result<CompletedPart, BlobError> {
        let offset = index * part_size as u64;
        let len = (total - offset).min(part_size as u64) as usize;

        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| BlobError::Other(format!("open {}: {e}", path.display())))?;
        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(|e| BlobError::Other(format!("seek {}: {e}", path.display())))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)
            .await
            .map_err(|e| BlobError::Other(format!("read {}: {e}", path.display())))?;

        let part_number = (index + 1) as i32;
        let output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(name)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(buf))
            .send()
            .await
            .map_err(|e| classify(&format!("upload part {part_number} of {name}"), e))?;

        Ok(CompletedPart::builder()
            .set_e_tag(output.e_tag().map(str::to_string))
            .part_number(part_number)
            .build())
    }
}

#[async_trait]
impl BlobClient for S3BlobClient {
    async fn create_container(&self) -> Result<(), BlobError> {
        let mut request = self.client.create_bucket().bucket(&self.bucket);
        // us-east-1 には LocationConstraint を付けない
        if self.region != "us-east-1" {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => Ok(()),
            Err(e) => {
                if let Some(service_err) = e.as_service_error()
                    && (service_err.is_bucket_already_owned_by_you()
                        || service_err.is_bucket_already_exists())
                {
                    return Err(BlobError::ContainerAlreadyExists(self.bucket.clone()));
                }
                Err(classify(&format!("create bucket {}", self.bucket), e))
            }
        }
    }

    async fn upload_file(
        &self,
        name: &str,
        path: &Path,
        options: UploadOptions,
    ) -> Result<(), BlobError> {
        let size = tokio::fs::metadata(path)
            .await
            .map_err(|e| BlobError::Other(format!("stat {}: {e}", path.display())))?
            .len();

        let part_size = part_size_for(options.block_size, size);
        if size <= part_size as u64 {
            self.put_single(name, path).await
        } else {
            self.put_multipart(name, path, size, part_size, options.parallelism)
                .await
        }
    }

    async fn put_bytes(&self, name: &str, data: Vec<u8>) -> Result<(), BlobError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(name)
            .body(data.into())
            .send()
            .await
            .map_err(|e| classify(&format!("put {name}"), e))?;
        Ok(())
    }

    async fn get_bytes(&self, name: &str) -> Result<Vec<u8>, BlobError> {
        let resp = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(name)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                if e.as_service_error().is_some_and(|s| s.is_no_such_key()) {
                    return Err(BlobError::NotFound(name.to_string()));
                }
                return Err(classify(&format!("get {name}"), e));
            }
        };

        let bytes = resp
            .body
            .collect()
            .await
            .map_err(|e| BlobError::Unavailable(format!("read body for {name}: {e}")))?
            .into_bytes()
            .to_vec();
        Ok(bytes)
    }

    async fn head(&self, name: &str) -> Result<Option<BlobItem>, BlobError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(name)
            .send()
            .await
        {
            Ok(output) => Ok(Some(BlobItem {
                name: name.to_string(),
                size: output.content_length().unwrap_or(0).max(0) as u64,
            })),
            Err(e) => {
                if e.as_service_error().is_some_and(|s| s.is_not_found()) {
                    return Ok(None);
                }
                Err(classify(&format!("head {name}"), e))
            }
        }
    }

    async fn list_segment(
        &self,
        prefix: &str,
        marker: Option<String>,
    ) -> Result<ListSegment, BlobError> {
        let resp = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .set_continuation_token(marker)
            .send()
            .await
            .map_err(|e| classify(&format!("list {prefix}"), e))?;

        let items = resp
            .contents()
            .iter()
            .filter_map(|obj| {
                obj.key().map(|key| BlobItem {
                    name: key.to_string(),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                })
            })
            .collect();

        let next_marker = if resp.is_truncated() == Some(true) {
            resp.next_continuation_token().map(str::to_string)
        } else {
            None
        };
        Ok(ListSegment { items, next_marker })
    }

    async fn delete(&self, name: &str) -> Result<(), BlobError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(name)
            .send()
            .await
            .map_err(|e| classify(&format!("delete {name}"), e))?;
        Ok(())
    }

    fn url(&self, name: &str) -> String {
        format!("s3://{}/{}", self.bucket, name)
    }
}

/// パートサイズは最小値以上、かつパート数が上限に収まる大きさ
fn part_size_for(block_size: usize, size: u64) -> usize {
    let fitting = usize::try_from(size.div_ceil(MAX_PARTS)).unwrap_or(usize::MAX);
    block_size.max(MIN_PART_SIZE).max(fitting)
}

/// SDK のエラーを一時障害とそれ以外に分ける
fn classify<E, R>(context: &str, err: SdkError<E, R>) -> BlobError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = format!("{context}: {}", DisplayErrorContext(&err));
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            BlobError::Unavailable(message)
        }
        _ if err.code().is_some_and(|code| UNAVAILABLE_CODES.contains(&code)) => {
            BlobError::Unavailable(message)
        }
        _ => BlobError::Other(message),
    }
}
