//! `aapt dump badging` 输出解析

use regex::Regex;
use std::sync::LazyLock;

use crate::models::ManifestInfo;

/// 缺失或无法解析的字段取值
pub const UNKNOWN: &str = "unknown";

struct BadgingPatterns {
    package_name: Regex,
    version_code: Regex,
    version_name: Regex,
    min_sdk: Regex,
    target_sdk: Regex,
    permission: Regex,
}

static PATTERNS: LazyLock<BadgingPatterns> = LazyLock::new(|| BadgingPatterns {
    package_name: badging_regex(r#"package:\s*name=['"]([^'"]*)['"]"#),
    version_code: badging_regex(r#"versionCode=['"]([^'"]*)['"]"#),
    version_name: badging_regex(r#"versionName=['"]([^'"]*)['"]"#),
    min_sdk: badging_regex(r#"(?m)^sdkVersion:['"]([^'"]*)['"]"#),
    target_sdk: badging_regex(r#"(?m)^targetSdkVersion:['"]([^'"]*)['"]"#),
    permission: badging_regex(r#"uses-permission:\s*name=['"]([^'"]+)['"]"#),
});

fn badging_regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("badging 解析表达式必须合法")
}

fn extract(re: &Regex, output: &str) -> String {
    re.captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|value| !value.is_empty())
        .unwrap_or(UNKNOWN)
        .to_string()
}

/// 解析 badging 文本；缺失字段记为 [`UNKNOWN`]，从不失败
pub fn parse_badging(output: &str) -> ManifestInfo {
    let patterns = &*PATTERNS;

    let mut permissions: Vec<String> = Vec::new();
    for caps in patterns.permission.captures_iter(output) {
        let name = caps[1].to_string();
        if !permissions.contains(&name) {
            permissions.push(name);
        }
    }

    ManifestInfo {
        package_name: extract(&patterns.package_name, output),
        version_code: extract(&patterns.version_code, output),
        version_name: extract(&patterns.version_name, output),
        min_sdk: extract(&patterns.min_sdk, output),
        target_sdk: extract(&patterns.target_sdk, output),
        permissions,
        debuggable: output.contains("application-debuggable")
            || output.contains("debuggable='true'"),
        exported_components: output.matches("exported='true'").count(),
        backup_enabled: output.contains("backup='true'"),
    }
}
