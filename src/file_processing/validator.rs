use crate::config::UploadConfig;
use crate::error::{AppError, AppResult};
use std::path::Path;

const MAX_FILENAME_LEN: usize = 255;

/// 清洗上传文件名：去掉路径部分，非安全字符替换为 `_`
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        return "upload.apk".to_string();
    }

    // 超长时保留扩展名
    if cleaned.len() > MAX_FILENAME_LEN {
        let ext = Path::new(cleaned)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e))
            .unwrap_or_default();
        let keep = MAX_FILENAME_LEN.saturating_sub(ext.len());
        return format!("{}{}", &cleaned[..keep], ext);
    }

    cleaned.to_string()
}

/// ZIP 本地文件头、空归档、分卷归档
const ZIP_MAGIC: [[u8; 4]; 3] = [*b"PK\x03\x04", *b"PK\x05\x06", *b"PK\x07\x08"];

/// Windows 设备名，落盘时会出问题
const RESERVED_STEMS: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// 上传APK的准入检查，输入应当是 `sanitize_filename` 之后的文件名
#[derive(Debug, Clone)]
pub struct FileValidator {
    max_file_size: u64,
    allowed_extensions: Vec<String>,
}

impl FileValidator {
    pub fn new(config: &UploadConfig) -> Self {
        Self {
            max_file_size: config.max_size,
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    /// 依次检查文件名、扩展名、大小、ZIP 魔数
    pub fn validate_file(&self, file_data: &[u8], filename: &str) -> AppResult<()> {
        self.check_name(filename)?;
        self.check_extension(filename)?;
        self.check_size(file_data.len() as u64)?;
        check_zip_magic(file_data)
    }

    fn check_size(&self, size: u64) -> AppResult<()> {
        match size {
            0 => Err(AppError::validation("文件不能为空")),
            n if n > self.max_file_size => Err(AppError::FileTooLarge {
                max_size: self.max_file_size,
            }),
            _ => Ok(()),
        }
    }

    fn check_name(&self, filename: &str) -> AppResult<()> {
        if filename.is_empty() || filename.len() > MAX_FILENAME_LEN {
            return Err(AppError::validation(format!(
                "文件名长度必须在1到{}个字符之间",
                MAX_FILENAME_LEN
            )));
        }
        if filename.contains(['/', '\\']) {
            return Err(AppError::validation("文件名不能包含路径"));
        }

        let stem = Path::new(filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        if RESERVED_STEMS.iter().any(|r| r.eq_ignore_ascii_case(stem)) {
            return Err(AppError::validation(format!("文件名 {} 为系统保留名称", stem)));
        }
        Ok(())
    }

    fn check_extension(&self, filename: &str) -> AppResult<()> {
        if self.allowed_extensions.is_empty() {
            return Ok(());
        }

        match Path::new(filename).extension().and_then(|e| e.to_str()) {
            None => Err(AppError::validation("文件没有扩展名")),
            Some(ext) => {
                let ext = ext.to_lowercase();
                if self.allowed_extensions.contains(&ext) {
                    Ok(())
                } else {
                    Err(AppError::unsupported_file_type(format!(".{} (仅支持APK)", ext)))
                }
            }
        }
    }
}

/// APK 就是 ZIP 归档
fn check_zip_magic(file_data: &[u8]) -> AppResult<()> {
    match file_data.get(..4) {
        Some(head) if ZIP_MAGIC.iter().any(|magic| head == magic) => Ok(()),
        Some(_) => Err(AppError::validation("文件不是有效的APK(ZIP)格式")),
        None => Err(AppError::validation("文件太小，不是有效的APK文件")),
    }
}
