use crate::auth::PasswordHasher;
use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub mod scanner;
pub mod worker;

pub use scanner::ScannerConfig;
pub use worker::WorkerConfig;

/// 应用程序配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub upload: UploadConfig,
    pub results: ResultsConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minio: Option<MinioConfig>,
    pub worker: WorkerConfig,
    pub scanner: ScannerConfig,
    pub auth: AuthConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// 上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// 上传文件保存目录
    pub dir: String,
    /// 最大文件大小（字节）
    pub max_size: u64,
    /// 允许的扩展名（小写，不含点）
    pub allowed_extensions: Vec<String>,
}

/// 结果存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultBackend {
    /// 本地目录
    Local,
    /// MinIO / S3 兼容对象存储
    Minio,
}

/// 扫描结果持久化配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsConfig {
    pub backend: ResultBackend,
    /// 本地结果目录（backend = local）
    pub dir: String,
}

/// MinIO配置（结果以对象形式写入 bucket）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinioConfig {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    #[serde(default = "default_minio_region")]
    pub region: String,
    /// 对象键前缀，例如 `apkscan/results`
    #[serde(default)]
    pub prefix: Option<String>,
}

fn default_minio_region() -> String {
    "us-east-1".to_string()
}

/// 会话配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// 会话令牌有效期（小时）
    pub session_ttl_hours: i64,
    /// Argon2 内存开销（KiB）
    #[serde(default = "default_password_memory_kib")]
    pub password_memory_kib: u32,
    #[serde(default = "default_password_iterations")]
    pub password_iterations: u32,
}

fn default_password_memory_kib() -> u32 {
    PasswordHasher::DEFAULT_MEMORY_KIB
}

fn default_password_iterations() -> u32 {
    PasswordHasher::DEFAULT_ITERATIONS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            upload: UploadConfig {
                dir: "uploads".to_string(),
                max_size: 100 * 1024 * 1024, // 100MB
                allowed_extensions: vec!["apk".to_string()],
            },
            results: ResultsConfig {
                backend: ResultBackend::Local,
                dir: "results".to_string(),
            },
            minio: None,
            worker: WorkerConfig::default(),
            scanner: ScannerConfig::default(),
            auth: AuthConfig {
                session_ttl_hours: 24,
                password_memory_kib: default_password_memory_kib(),
                password_iterations: default_password_iterations(),
            },
        }
    }
}

impl Config {
    /// 从配置文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| AppError::config(format!("解析配置文件失败: {}", e)))?;

        // 验证配置
        config.validate()?;

        Ok(config)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> AppResult<()> {
        if self.server.port == 0 {
            return Err(AppError::config("服务器端口不能为0"));
        }

        if self.upload.dir.is_empty() {
            return Err(AppError::config("上传目录不能为空"));
        }

        if self.upload.max_size == 0 {
            return Err(AppError::config("文件最大大小不能为0"));
        }

        match self.results.backend {
            ResultBackend::Local if self.results.dir.is_empty() => {
                return Err(AppError::config("结果目录不能为空"));
            }
            ResultBackend::Minio => {
                let minio = self
                    .minio
                    .as_ref()
                    .ok_or_else(|| AppError::config("结果后端为minio时必须提供minio配置"))?;
                if minio.endpoint.is_empty() {
                    return Err(AppError::config("MinIO endpoint不能为空"));
                }
                if minio.bucket.is_empty() {
                    return Err(AppError::config("MinIO bucket不能为空"));
                }
            }
            _ => {}
        }

        if self.auth.session_ttl_hours <= 0 {
            return Err(AppError::config("会话有效期必须大于0"));
        }
        PasswordHasher::new(self.auth.password_memory_kib, self.auth.password_iterations)?;

        if let Err(e) = self.worker.validate() {
            return Err(AppError::config(format!("工作池配置无效: {}", e)));
        }

        if let Err(e) = self.scanner.validate() {
            return Err(AppError::config(format!("扫描器配置无效: {}", e)));
        }

        Ok(())
    }

    /// 获取服务器监听地址
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> AppResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::config(format!("序列化配置失败: {}", e)))?;

        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.upload.max_size, 100 * 1024 * 1024);
        assert_eq!(config.results.backend, ResultBackend::Local);
        assert_eq!(config.scanner.exported_component_threshold, 5);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_minio_backend_requires_section() {
        let mut config = Config::default();
        config.results.backend = ResultBackend::Minio;
        assert!(config.validate().is_err());

        config.minio = Some(MinioConfig {
            endpoint: "http://localhost:9000".to_string(),
            access_key: "minioadmin".to_string(),
            secret_key: "minioadmin".to_string(),
            bucket: "apkscan".to_string(),
            region: default_minio_region(),
            prefix: None,
        });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_password_cost_validated() {
        let mut config = Config::default();
        config.auth.password_iterations = 0;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_server_addr() {
        let config = Config::default();
        assert_eq!(config.server_addr(), "0.0.0.0:8080");
    }

    #[test]
    fn test_save_and_load_config() {
        let original_config = Config::default();
        let temp_file = NamedTempFile::new().unwrap();

        // 保存配置
        original_config.save_to_file(temp_file.path()).unwrap();

        // 加载配置
        let loaded_config = Config::from_file(temp_file.path()).unwrap();

        assert_eq!(original_config.server.port, loaded_config.server.port);
        assert_eq!(
            original_config.worker.pool_size,
            loaded_config.worker.pool_size
        );
        assert_eq!(
            original_config.scanner.decode_timeout_secs,
            loaded_config.scanner.decode_timeout_secs
        );
    }
}
