use serde::{Deserialize, Serialize};

/// 扫描器配置（外部工具路径与清单检查阈值）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// apktool 可执行文件路径
    pub apktool_path: String,
    /// aapt 可执行文件路径
    pub aapt_path: String,
    /// 反编译工具自身的超时（秒），None 表示不限制
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decode_timeout_secs: Option<u64>,
    /// 导出组件数量超过该阈值时产生告警
    pub exported_component_threshold: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            apktool_path: "apktool".to_string(),
            aapt_path: "aapt".to_string(),
            decode_timeout_secs: Some(300),
            exported_component_threshold: 5,
        }
    }
}

impl ScannerConfig {
    /// 验证配置的有效性
    pub fn validate(&self) -> Result<(), String> {
        if self.apktool_path.trim().is_empty() {
            return Err("apktool 路径不能为空".into());
        }
        if self.aapt_path.trim().is_empty() {
            return Err("aapt 路径不能为空".into());
        }
        if self.decode_timeout_secs == Some(0) {
            return Err("反编译超时不能为0秒".into());
        }
        if self.exported_component_threshold == 0 {
            return Err("导出组件阈值必须大于0".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scanner_config_default() {
        let config = ScannerConfig::default();
        assert_eq!(config.exported_component_threshold, 5);
        assert_eq!(config.decode_timeout_secs, Some(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_scanner_config_validation() {
        let mut config = ScannerConfig::default();
        config.exported_component_threshold = 0;
        assert!(config.validate().is_err());

        config.exported_component_threshold = 5;
        config.aapt_path = "  ".to_string();
        assert!(config.validate().is_err());
    }
}
