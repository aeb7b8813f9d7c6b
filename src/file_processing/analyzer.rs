use crate::error::{AppError, AppResult};
use std::io::Cursor;
use tokio::task;
use zip::ZipArchive;

/// APK 中必须存在的清单条目
pub const MANIFEST_ENTRY: &str = "AndroidManifest.xml";

/// 可接受的 APK MIME 类型（infer 对 APK 的识别结果因内容而异）
pub const APK_MIME_TYPES: [&str; 3] = [
    "application/vnd.android.package-archive",
    "application/java-archive",
    "application/zip",
];

/// APK 结构信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApkInfo {
    pub mime_type: String,
    pub entry_count: usize,
    pub dex_count: usize,
}

/// APK 包结构检查
#[derive(Debug, Clone, Default)]
pub struct ApkAnalyzer;

impl ApkAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// 使用infer库检测文件类型
    pub fn detect_mime_type(&self, file_data: &[u8]) -> Option<String> {
        infer::get(file_data).map(|kind| kind.mime_type().to_string())
    }

    /// 检查上传内容是否为包含清单的 ZIP 包
    pub async fn inspect(&self, file_data: &[u8]) -> AppResult<ApkInfo> {
        let mime_type = self
            .detect_mime_type(file_data)
            .ok_or_else(|| AppError::unsupported_file_type("未知类型"))?;
        if !APK_MIME_TYPES.contains(&mime_type.as_str()) {
            return Err(AppError::unsupported_file_type(mime_type));
        }

        let data = file_data.to_vec();
        let (entry_count, dex_count, has_manifest) =
            task::spawn_blocking(move || -> AppResult<(usize, usize, bool)> {
                let archive = ZipArchive::new(Cursor::new(data))
                    .map_err(|e| AppError::FileProcessing(format!("打开APK失败: {}", e)))?;

                let mut dex_count = 0usize;
                let mut has_manifest = false;
                for name in archive.file_names() {
                    if name == MANIFEST_ENTRY {
                        has_manifest = true;
                    } else if !name.contains('/') && name.ends_with(".dex") {
                        dex_count += 1;
                    }
                }

                Ok((archive.len(), dex_count, has_manifest))
            })
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("APK检查任务失败: {}", e)))??;

        if !has_manifest {
            return Err(AppError::validation("APK中缺少AndroidManifest.xml"));
        }

        tracing::debug!(
            "APK结构检查通过: mime={}, entries={}, dex={}",
            mime_type,
            entry_count,
            dex_count
        );

        Ok(ApkInfo {
            mime_type,
            entry_count,
            dex_count,
        })
    }
}
