//! Argon2id 口令哈希，输出 PHC 字符串

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString, rand_core::OsRng},
};

use crate::error::{AppError, AppResult};

/// 口令哈希器；计算在阻塞线程池中进行
#[derive(Debug, Clone)]
pub struct PasswordHasher {
    params: Params,
}

impl PasswordHasher {
    /// 默认内存开销 19 MiB，迭代 2 次
    pub const DEFAULT_MEMORY_KIB: u32 = 19_456;
    pub const DEFAULT_ITERATIONS: u32 = 2;
    const PARALLELISM: u32 = 1;
    const OUTPUT_LEN: usize = 32;

    pub fn new(memory_kib: u32, iterations: u32) -> AppResult<Self> {
        let params = Params::new(
            memory_kib,
            iterations,
            Self::PARALLELISM,
            Some(Self::OUTPUT_LEN),
        )
        .map_err(|e| AppError::config(format!("Argon2参数无效: {}", e)))?;
        Ok(Self { params })
    }

    pub async fn hash(&self, password: String) -> AppResult<String> {
        let params = self.params.clone();
        tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
                .hash_password(password.as_bytes(), &salt)
                .map(|hash| hash.to_string())
        })
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("口令哈希任务失败: {}", e)))?
        .map_err(|e| AppError::Internal(anyhow::anyhow!("口令哈希失败: {}", e)))
    }

    /// 校验口令；存储的哈希无法解析时视为不匹配
    pub async fn verify(&self, password: String, stored: String) -> AppResult<bool> {
        tokio::task::spawn_blocking(move || match PasswordHash::new(&stored) {
            Ok(parsed) => Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(e) => {
                tracing::warn!("无法解析口令哈希: {}", e);
                false
            }
        })
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("口令校验任务失败: {}", e)))
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self {
            params: Params::new(
                Self::DEFAULT_MEMORY_KIB,
                Self::DEFAULT_ITERATIONS,
                Self::PARALLELISM,
                Some(Self::OUTPUT_LEN),
            )
            .unwrap_or_default(),
        }
    }
}
