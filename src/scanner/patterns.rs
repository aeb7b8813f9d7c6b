//! 内置漏洞特征库（OWASP Mobile Top 10）
//!
//! 每条规则独立地对提取出的文本求值，匹配不区分大小写。
//! 清单级检查复用同一套 [`RuleId`]，去重键为 `(规则, 位置)`。

use regex::{Captures, Regex, RegexBuilder};
use std::fmt;
use std::sync::LazyLock;

use crate::models::{OwaspCategory, Severity};

/// 检测规则的稳定标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RuleId {
    HardcodedPasswords,
    HardcodedApiKeys,
    InsecureHttp,
    DebugMode,
    SqlInjection,
    WeakEncryption,
    ExportedActivities,
    InsecureStorage,
    SslPinning,
    RootDetection,
    /// 清单级：导出组件过多
    ExcessiveExports,
    /// 清单级：android:allowBackup
    BackupEnabled,
}

impl RuleId {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleId::HardcodedPasswords => "hardcoded_passwords",
            RuleId::HardcodedApiKeys => "hardcoded_api_keys",
            RuleId::InsecureHttp => "insecure_http",
            RuleId::DebugMode => "debug_mode",
            RuleId::SqlInjection => "sql_injection",
            RuleId::WeakEncryption => "weak_encryption",
            RuleId::ExportedActivities => "exported_activities",
            RuleId::InsecureStorage => "insecure_storage",
            RuleId::SslPinning => "ssl_pinning",
            RuleId::RootDetection => "root_detection",
            RuleId::ExcessiveExports => "excessive_exports",
            RuleId::BackupEnabled => "backup_enabled",
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 文本规则的静态定义
struct RuleSpec {
    id: RuleId,
    pattern: &'static str,
    cwe: &'static str,
    severity: Severity,
    owasp: OwaspCategory,
    title: &'static str,
    description: &'static str,
    recommendations: &'static [&'static str],
    /// 返回 true 时忽略该次匹配
    suppress: Option<fn(&Captures<'_>) -> bool>,
}

/// 不视为网络通信的主机：回环地址与 XML 命名空间
const IGNORED_HTTP_HOSTS: &[&str] = &[
    "localhost",
    "127.0.0.1",
    "schemas.android.com",
    "www.w3.org",
];

// regex 不支持零宽断言，忽略的主机在这里过滤
fn is_ignored_http_host(caps: &Captures<'_>) -> bool {
    caps.name("host")
        .map(|h| {
            let host = h.as_str().to_ascii_lowercase();
            IGNORED_HTTP_HOSTS
                .iter()
                .any(|ignored| host.starts_with(ignored))
        })
        .unwrap_or(false)
}

const RULES: &[RuleSpec] = &[
    RuleSpec {
        id: RuleId::HardcodedPasswords,
        pattern: r#"(password\s*=\s*["']([^"']{4,})["']|pwd\s*=\s*["']([^"']{4,})["'])"#,
        cwe: "798",
        severity: Severity::High,
        owasp: OwaspCategory::M10,
        title: "Hardcoded Password Found",
        description: "Hardcoded password found in source code.",
        recommendations: &[
            "Remove hardcoded credentials",
            "Use secure storage or keystore",
            "Implement proper secret management",
        ],
        suppress: None,
    },
    RuleSpec {
        id: RuleId::HardcodedApiKeys,
        pattern: r#"(api[_-]?key\s*=\s*["']([A-Za-z0-9_\-]{20,})["']|key\s*=\s*["']([A-Za-z0-9_\-]{20,})["'])"#,
        cwe: "798",
        severity: Severity::High,
        owasp: OwaspCategory::M10,
        title: "Hardcoded API Key Found",
        description: "Hardcoded API key found in source code.",
        recommendations: &[
            "Remove hardcoded API keys",
            "Use secure storage",
            "Rotate compromised keys",
            "Use environment variables",
        ],
        suppress: None,
    },
    RuleSpec {
        id: RuleId::InsecureHttp,
        pattern: r"http://(?P<host>[A-Za-z0-9.\-]*)",
        cwe: "319",
        severity: Severity::Medium,
        owasp: OwaspCategory::M5,
        title: "Insecure HTTP Usage",
        description: "Application uses insecure HTTP connections.",
        recommendations: &[
            "Use HTTPS for all network connections",
            "Implement certificate pinning",
            "Use proper SSL/TLS configuration",
        ],
        suppress: Some(is_ignored_http_host),
    },
    RuleSpec {
        id: RuleId::DebugMode,
        pattern: r#"(android:debuggable=["']true["']|setDebuggable\s*\(\s*true\s*\))"#,
        cwe: "489",
        severity: Severity::High,
        owasp: OwaspCategory::M8,
        title: "Debug Mode Enabled",
        description: "Debug mode is enabled in production code.",
        recommendations: &[
            "Remove debug flags",
            "Use different build configurations",
            "Enable ProGuard",
        ],
        suppress: None,
    },
    RuleSpec {
        id: RuleId::SqlInjection,
        pattern: r"(SELECT.*FROM.*WHERE|INSERT\s+INTO|UPDATE\s+\w+\s+SET|DELETE\s+FROM)",
        cwe: "89",
        severity: Severity::High,
        owasp: OwaspCategory::M4,
        title: "Potential SQL Injection",
        description: "Potential SQL injection vulnerability found.",
        recommendations: &[
            "Use parameterized queries",
            "Implement proper input validation",
            "Use prepared statements",
        ],
        suppress: None,
    },
    RuleSpec {
        id: RuleId::WeakEncryption,
        pattern: r"\b(DES|MD5|SHA1|RC4|RC2)\b",
        cwe: "327",
        severity: Severity::Medium,
        owasp: OwaspCategory::M10,
        title: "Weak Encryption Algorithm",
        description: "Weak encryption algorithm detected.",
        recommendations: &[
            "Use strong encryption (AES-256)",
            "Use secure random number generation",
            "Implement proper key management",
        ],
        suppress: None,
    },
    RuleSpec {
        id: RuleId::ExportedActivities,
        pattern: r#"android:exported=["']true["']"#,
        cwe: "926",
        severity: Severity::Medium,
        owasp: OwaspCategory::M8,
        title: "Exported Activity",
        description: "Activity is exported without proper protection.",
        recommendations: &[
            "Review all exported components",
            "Add proper permissions to exported components",
        ],
        suppress: None,
    },
    RuleSpec {
        id: RuleId::InsecureStorage,
        pattern: r"(MODE_WORLD_READABLE|MODE_WORLD_WRITEABLE|getExternalStoragePublicDirectory)",
        cwe: "922",
        severity: Severity::High,
        owasp: OwaspCategory::M9,
        title: "Insecure Storage",
        description: "Insecure data storage mechanism detected.",
        recommendations: &[
            "Use secure storage (Keystore, EncryptedSharedPreferences)",
            "Encrypt sensitive data",
            "Use device-specific encryption",
        ],
        suppress: None,
    },
    RuleSpec {
        id: RuleId::SslPinning,
        pattern: r"(SSLContext\.getInstance\(|X509TrustManager)",
        cwe: "295",
        severity: Severity::Medium,
        owasp: OwaspCategory::M5,
        title: "SSL Pinning Not Implemented",
        description: "SSL pinning not implemented.",
        recommendations: &[
            "Implement certificate pinning",
            "Do not trust all certificates in custom TrustManagers",
        ],
        suppress: None,
    },
    RuleSpec {
        id: RuleId::RootDetection,
        pattern: r"(su\s|/system/app/Superuser|/system/bin/su)",
        cwe: "919",
        severity: Severity::Low,
        owasp: OwaspCategory::M7,
        title: "Root Detection Bypass",
        description: "Application may be vulnerable to root detection bypass.",
        recommendations: &[
            "Combine multiple root detection techniques",
            "Use runtime integrity attestation",
        ],
        suppress: None,
    },
];

/// 编译后的规则
pub struct PatternRule {
    pub id: RuleId,
    pub cwe: &'static str,
    pub severity: Severity,
    pub owasp: OwaspCategory,
    pub title: &'static str,
    pub description: &'static str,
    pub recommendations: &'static [&'static str],
    regex: Regex,
    suppress: Option<fn(&Captures<'_>) -> bool>,
}

impl PatternRule {
    /// `content` 中不重叠且未被过滤的匹配数
    pub fn count_matches(&self, content: &str) -> usize {
        self.regex
            .captures_iter(content)
            .filter(|caps| !self.suppress.is_some_and(|suppress| suppress(caps)))
            .count()
    }

    pub fn is_match(&self, content: &str) -> bool {
        self.count_matches(content) > 0
    }
}

impl fmt::Debug for PatternRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatternRule")
            .field("id", &self.id)
            .field("pattern", &self.regex.as_str())
            .finish()
    }
}

/// 漏洞特征表
#[derive(Debug)]
pub struct PatternRegistry {
    rules: Vec<PatternRule>,
}

static BUILTIN: LazyLock<PatternRegistry> = LazyLock::new(|| {
    PatternRegistry::compile().expect("内置规则必须是合法的正则表达式")
});

impl PatternRegistry {
    /// 编译内置规则表
    pub fn compile() -> Result<Self, regex::Error> {
        let rules = RULES
            .iter()
            .map(|def| {
                let regex = RegexBuilder::new(def.pattern)
                    .case_insensitive(true)
                    .build()?;
                Ok(PatternRule {
                    id: def.id,
                    cwe: def.cwe,
                    severity: def.severity,
                    owasp: def.owasp,
                    title: def.title,
                    description: def.description,
                    recommendations: def.recommendations,
                    regex,
                    suppress: def.suppress,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { rules })
    }

    /// 全局共享的内置规则表（惰性编译）
    pub fn builtin() -> &'static PatternRegistry {
        &BUILTIN
    }

    pub fn rules(&self) -> &[PatternRule] {
        &self.rules
    }

    pub fn get(&self, id: RuleId) -> Option<&PatternRule> {
        self.rules.iter().find(|r| r.id == id)
    }

    /// 十个顶层分类及其名称
    pub fn taxonomy() -> impl Iterator<Item = (OwaspCategory, &'static str)> {
        OwaspCategory::ALL.into_iter().map(|c| (c, c.name()))
    }
}
