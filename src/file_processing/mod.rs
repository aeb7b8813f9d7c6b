pub mod analyzer;
pub mod hasher;
pub mod validator;

pub use analyzer::{ApkAnalyzer, ApkInfo};
pub use hasher::file_hashes_blocking;
pub use validator::{FileValidator, sanitize_filename};

use crate::config::UploadConfig;
use crate::error::AppResult;
use crate::models::FileHashes;

/// 上传文件处理结果
#[derive(Debug, Clone)]
pub struct ProcessedUpload {
    /// 清洗后的文件名
    pub filename: String,
    /// 文件大小（字节）
    pub size: u64,
    pub apk: ApkInfo,
    pub hashes: FileHashes,
}

/// 上传文件处理器：清洗、验证、结构检查、哈希
#[derive(Debug, Clone)]
pub struct FileProcessor {
    validator: FileValidator,
    analyzer: ApkAnalyzer,
}

impl FileProcessor {
    pub fn new(config: &UploadConfig) -> Self {
        Self {
            validator: FileValidator::new(config),
            analyzer: ApkAnalyzer::new(),
        }
    }

    /// 处理单个上传文件
    pub async fn process_upload(
        &self,
        file_data: &[u8],
        filename: &str,
    ) -> AppResult<ProcessedUpload> {
        let filename = sanitize_filename(filename);

        // 1. 验证文件
        self.validator.validate_file(file_data, &filename)?;

        // 2. 检查APK结构
        let apk = self.analyzer.inspect(file_data).await?;

        // 3. 计算文件哈希
        let hashes = file_hashes_blocking(file_data.to_vec()).await?;

        Ok(ProcessedUpload {
            filename,
            size: file_data.len() as u64,
            apk,
            hashes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::file_processing::analyzer::tests::build_zip;

    fn processor() -> FileProcessor {
        FileProcessor::new(&crate::config::Config::default().upload)
    }

    #[tokio::test]
    async fn test_process_valid_upload() {
        let apk = build_zip(&[("AndroidManifest.xml", b"<manifest/>")]);

        let upload = processor()
            .process_upload(&apk, "../My Shop.apk")
            .await
            .unwrap();

        assert_eq!(upload.filename, "My_Shop.apk");
        assert_eq!(upload.size, apk.len() as u64);
        assert_eq!(upload.hashes.sha256, hasher::sha256_hex(&apk));
    }

    #[tokio::test]
    async fn test_rejects_non_apk_extension() {
        let apk = build_zip(&[("AndroidManifest.xml", b"<manifest/>")]);
        let err = processor().process_upload(&apk, "app.zip").await.unwrap_err();
        assert!(matches!(err, AppError::UnsupportedFileType { .. }));
    }

    #[tokio::test]
    async fn test_rejects_apk_without_manifest() {
        let zip = build_zip(&[("classes.dex", b"dex\n035\0")]);
        let err = processor().process_upload(&zip, "app.apk").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
