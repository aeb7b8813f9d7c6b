pub mod local;
pub mod minio;

pub use local::LocalStorage;
pub use minio::MinioStorage;

use std::sync::Arc;
use uuid::Uuid;

use crate::config::{Config, ResultBackend};
use crate::error::{AppError, AppResult};
use crate::models::ScanResult;

/// 存储抽象接口
#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    /// 写入对象，返回对象标识（本地路径或 ETag）
    async fn upload(&self, key: &str, data: &[u8], content_type: Option<&str>)
    -> AppResult<String>;

    /// 读取对象
    async fn download(&self, key: &str) -> AppResult<Vec<u8>>;

    /// 删除对象；对象不存在时视为成功
    async fn delete(&self, key: &str) -> AppResult<()>;

    /// 检查对象是否存在
    async fn exists(&self, key: &str) -> AppResult<bool>;

    /// 后端是否可用
    async fn health_check(&self) -> bool;

    /// 后端名称（用于日志与健康检查）
    fn backend_name(&self) -> &'static str;
}

/// 根据配置创建结果存储后端
pub async fn create_storage(config: &Config) -> AppResult<Arc<dyn Storage>> {
    match config.results.backend {
        ResultBackend::Local => {
            let storage = LocalStorage::new(&config.results.dir).await?;
            Ok(Arc::new(storage))
        }
        ResultBackend::Minio => {
            let minio = config
                .minio
                .clone()
                .ok_or_else(|| AppError::config("结果后端为minio时必须提供minio配置"))?;
            let storage = MinioStorage::new(minio).await?;
            Ok(Arc::new(storage))
        }
    }
}

/// 扫描结果持久化：`<job_id>_results.json`
#[derive(Clone)]
pub struct ResultStore {
    storage: Arc<dyn Storage>,
}

impl ResultStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub fn key_for(job_id: Uuid) -> String {
        format!("{}_results.json", job_id)
    }

    /// 以格式化 JSON 写入，返回对象标识
    pub async fn save(&self, job_id: Uuid, result: &ScanResult) -> AppResult<String> {
        let body = serde_json::to_vec_pretty(result)?;
        let key = Self::key_for(job_id);
        let location = self
            .storage
            .upload(&key, &body, Some("application/json"))
            .await?;
        tracing::debug!(job_id = %job_id, location = %location, "扫描结果已保存");
        Ok(location)
    }

    pub async fn load(&self, job_id: Uuid) -> AppResult<ScanResult> {
        let key = Self::key_for(job_id);
        if !self.storage.exists(&key).await? {
            return Err(AppError::not_found(key));
        }
        let body = self.storage.download(&key).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    pub async fn remove(&self, job_id: Uuid) -> AppResult<()> {
        self.storage.delete(&Self::key_for(job_id)).await
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }
}
