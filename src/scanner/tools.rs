//! 外部工具：apktool 解包与 aapt 清单导出

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, error};

use crate::config::ScannerConfig;

/// 解包后目录中必须存在的清单文件
pub const MANIFEST_FILE: &str = "AndroidManifest.xml";

/// 致命扫描错误：出现即中止整次扫描，不产生任何发现
///
/// 错误文本会原样写入扫描结果和任务记录。
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScanError {
    #[error("APK decoding failed: {0}")]
    Decode(String),

    #[error("AndroidManifest.xml not found")]
    ManifestMissing,

    #[error("Failed to parse manifest: {0}")]
    ManifestDump(String),

    #[error("Source extraction failed: {0}")]
    Extraction(String),
}

/// 解包协作方：成功时返回解包产物所在目录
#[async_trait]
pub trait PackageDecoder: Send + Sync {
    async fn decode(&self, target: &Path) -> Result<PathBuf, ScanError>;
}

/// 清单导出协作方：返回 badging 文本
#[async_trait]
pub trait ManifestDumper: Send + Sync {
    async fn dump_manifest(&self, target: &Path) -> Result<String, ScanError>;
}

/// `<dir>/<stem>_decoded`
pub fn decoded_dir_for(target: &Path) -> PathBuf {
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "package".to_string());
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!("{}_decoded", stem))
}

/// 执行外部命令；超时后子进程随 future 一起被丢弃并终止
async fn run_tool(mut cmd: Command, timeout: Option<Duration>) -> Result<Output, String> {
    cmd.kill_on_drop(true);
    debug!(command = ?cmd, "执行外部工具");

    let output = match timeout {
        Some(limit) => tokio::time::timeout(limit, cmd.output())
            .await
            .map_err(|_| format!("timed out after {}s", limit.as_secs()))?,
        None => cmd.output().await,
    };

    output.map_err(|e| e.to_string())
}

/// 调用 apktool 解包
#[derive(Debug, Clone)]
pub struct ApktoolDecoder {
    program: String,
    timeout: Option<Duration>,
}

impl ApktoolDecoder {
    pub fn new(program: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn from_config(config: &ScannerConfig) -> Self {
        Self::new(
            config.apktool_path.clone(),
            config.decode_timeout_secs.map(Duration::from_secs),
        )
    }
}

#[async_trait]
impl PackageDecoder for ApktoolDecoder {
    async fn decode(&self, target: &Path) -> Result<PathBuf, ScanError> {
        let output_dir = decoded_dir_for(target);

        let mut cmd = Command::new(&self.program);
        cmd.arg("d")
            .arg(target)
            .arg("-o")
            .arg(&output_dir)
            .arg("-f");

        let output = run_tool(cmd, self.timeout)
            .await
            .map_err(ScanError::Decode)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(
                exit_code = output.status.code(),
                stderr = %stderr,
                "apktool 解包失败"
            );
            return Err(ScanError::Decode(format!(
                "Failed to decode APK: {}",
                stderr.trim()
            )));
        }

        debug!(output_dir = %output_dir.display(), "APK 解包完成");
        Ok(output_dir)
    }
}

/// 调用 `aapt dump badging`
#[derive(Debug, Clone)]
pub struct AaptDumper {
    program: String,
}

impl AaptDumper {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn from_config(config: &ScannerConfig) -> Self {
        Self::new(config.aapt_path.clone())
    }
}

#[async_trait]
impl ManifestDumper for AaptDumper {
    async fn dump_manifest(&self, target: &Path) -> Result<String, ScanError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("dump").arg("badging").arg(target);

        let output = run_tool(cmd, None)
            .await
            .map_err(ScanError::ManifestDump)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ScanError::ManifestDump(stderr.trim().to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoded_dir_for() {
        assert_eq!(
            decoded_dir_for(Path::new("/tmp/uploads/abc_app.apk")),
            PathBuf::from("/tmp/uploads/abc_app_decoded")
        );
        assert_eq!(
            decoded_dir_for(Path::new("app.apk")),
            PathBuf::from("app_decoded")
        );
    }

    #[test]
    fn test_scan_error_messages() {
        assert_eq!(
            ScanError::ManifestMissing.to_string(),
            "AndroidManifest.xml not found"
        );
        assert_eq!(
            ScanError::Decode("boom".to_string()).to_string(),
            "APK decoding failed: boom"
        );
    }

    #[tokio::test]
    async fn test_missing_tool_is_decode_failure() {
        let decoder = ApktoolDecoder::new(
            "apkscan-test-no-such-apktool",
            Some(Duration::from_secs(5)),
        );
        let err = decoder.decode(Path::new("missing.apk")).await.unwrap_err();
        assert!(matches!(err, ScanError::Decode(_)));
    }

    #[tokio::test]
    async fn test_missing_aapt_is_dump_failure() {
        let dumper = AaptDumper::new("apkscan-test-no-such-aapt");
        let err = dumper.dump_manifest(Path::new("missing.apk")).await.unwrap_err();
        assert!(matches!(err, ScanError::ManifestDump(_)));
    }
}
