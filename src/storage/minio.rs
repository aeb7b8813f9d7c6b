use std::fmt::Display;
use std::sync::Arc;

use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::{Client, config::Credentials, primitives::ByteStream};

use super::Storage;
use crate::config::MinioConfig;
use crate::error::{AppError, AppResult};

/// 兼容 S3 的对象存储后端，扫描结果写入同一个 bucket
#[derive(Debug, Clone)]
pub struct MinioStorage {
    client: Arc<Client>,
    bucket: String,
    prefix: Option<String>,
}

fn storage_err(action: &str, key: &str, err: impl Display) -> AppError {
    AppError::Storage(format!("{} {} 失败: {}", action, key, err))
}

impl MinioStorage {
    /// 连接对象存储，bucket 不存在时创建
    pub async fn new(config: MinioConfig) -> AppResult<Self> {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "apkscan-config",
        );

        // MinIO 只支持路径样式寻址
        let s3_config = aws_sdk_s3::Config::builder()
            .endpoint_url(&config.endpoint)
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(true)
            .behavior_version(BehaviorVersion::latest())
            .build();

        let prefix = config
            .prefix
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty());

        let storage = Self {
            client: Arc::new(Client::from_conf(s3_config)),
            bucket: config.bucket,
            prefix,
        };
        storage.ensure_bucket().await?;

        tracing::info!(
            endpoint = %config.endpoint,
            bucket = %storage.bucket,
            "结果存储: 对象存储已就绪"
        );
        Ok(storage)
    }

    fn object_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix, key),
            None => key.to_string(),
        }
    }

    async fn ensure_bucket(&self) -> AppResult<()> {
        if self.health_check().await {
            return Ok(());
        }

        tracing::warn!("bucket {} 不可访问，尝试创建", self.bucket);
        self.client
            .create_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| storage_err("创建bucket", &self.bucket, e))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Storage for MinioStorage {
    async fn upload(
        &self,
        key: &str,
        data: &[u8],
        content_type: Option<&str>,
    ) -> AppResult<String> {
        let object_key = self.object_key(key);
        let output = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .body(ByteStream::from(data.to_vec()))
            .set_content_type(content_type.map(str::to_string))
            .send()
            .await
            .map_err(|e| storage_err("写入对象", &object_key, e))?;

        tracing::debug!(
            key = %object_key,
            size = data.len(),
            etag = output.e_tag().unwrap_or_default(),
            "对象已写入"
        );
        Ok(format!("s3://{}/{}", self.bucket, object_key))
    }

    async fn download(&self, key: &str) -> AppResult<Vec<u8>> {
        let object_key = self.object_key(key);
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|e| storage_err("读取对象", &object_key, e))?;

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| storage_err("读取对象内容", &object_key, e))?;
        Ok(body.into_bytes().to_vec())
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        // S3 删除不存在的对象同样返回成功
        let object_key = self.object_key(key);
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|e| storage_err("删除对象", &object_key, e))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> AppResult<bool> {
        let object_key = self.object_key(key);
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(err) => match err.into_service_error() {
                e if e.is_not_found() => Ok(false),
                e => Err(storage_err("查询对象", &object_key, e)),
            },
        }
    }

    async fn health_check(&self) -> bool {
        let result = self.client.head_bucket().bucket(&self.bucket).send().await;
        if let Err(e) = &result {
            tracing::warn!(bucket = %self.bucket, "对象存储不可用: {}", e);
        }
        result.is_ok()
    }

    fn backend_name(&self) -> &'static str {
        "minio"
    }
}
