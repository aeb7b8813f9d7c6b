use std::path::{Component, Path, PathBuf};

use super::Storage;
use crate::error::{AppError, AppResult};

/// 本地目录存储
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// 创建存储并确保根目录存在
    pub async fn new(root: impl AsRef<Path>) -> AppResult<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| AppError::Storage(format!("创建存储目录失败 {}: {}", root.display(), e)))?;
        Ok(Self { root })
    }

    /// 只接受普通的相对路径，拒绝 `..` 与绝对路径
    fn path_for(&self, key: &str) -> AppResult<PathBuf> {
        let relative = Path::new(key);
        let is_plain = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !is_plain {
            return Err(AppError::Storage(format!("非法的存储键: {}", key)));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait::async_trait]
impl Storage for LocalStorage {
    async fn upload(
        &self,
        key: &str,
        data: &[u8],
        _content_type: Option<&str>,
    ) -> AppResult<String> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| AppError::Storage(format!("写入文件失败: {}", e)))?;

        tracing::info!("成功写入本地文件: {}", path.display());
        Ok(path.to_string_lossy().into_owned())
    }

    async fn download(&self, key: &str) -> AppResult<Vec<u8>> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| AppError::Storage(format!("读取文件失败: {}", e)))
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!("成功删除文件: {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Storage(format!("删除文件失败: {}", e))),
        }
    }

    async fn exists(&self, key: &str) -> AppResult<bool> {
        let path = self.path_for(key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| AppError::Storage(format!("检查文件是否存在失败: {}", e)))
    }

    async fn health_check(&self) -> bool {
        tokio::fs::metadata(&self.root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}
