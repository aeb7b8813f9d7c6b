use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use utoipa::ToSchema;

/// 风险分上限
pub const MAX_RISK_SCORE: u32 = 100;

/// 漏洞严重程度
///
/// 变体顺序即报告中的排序（critical 在前）。
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ];

    /// 风险分权重
    pub fn weight(self) -> u32 {
        match self {
            Severity::Critical => 10,
            Severity::High => 7,
            Severity::Medium => 4,
            Severity::Low => 1,
            Severity::Info => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OWASP Mobile Top 10 (2024) 分类
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
pub enum OwaspCategory {
    M1,
    M2,
    M3,
    M4,
    M5,
    M6,
    M7,
    M8,
    M9,
    M10,
}

impl OwaspCategory {
    pub const ALL: [OwaspCategory; 10] = [
        OwaspCategory::M1,
        OwaspCategory::M2,
        OwaspCategory::M3,
        OwaspCategory::M4,
        OwaspCategory::M5,
        OwaspCategory::M6,
        OwaspCategory::M7,
        OwaspCategory::M8,
        OwaspCategory::M9,
        OwaspCategory::M10,
    ];

    pub fn id(self) -> &'static str {
        match self {
            OwaspCategory::M1 => "M1",
            OwaspCategory::M2 => "M2",
            OwaspCategory::M3 => "M3",
            OwaspCategory::M4 => "M4",
            OwaspCategory::M5 => "M5",
            OwaspCategory::M6 => "M6",
            OwaspCategory::M7 => "M7",
            OwaspCategory::M8 => "M8",
            OwaspCategory::M9 => "M9",
            OwaspCategory::M10 => "M10",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            OwaspCategory::M1 => "Improper Credential Usage",
            OwaspCategory::M2 => "Inadequate Supply Chain Security",
            OwaspCategory::M3 => "Insecure Authentication/Authorization",
            OwaspCategory::M4 => "Insufficient Input/Output Validation",
            OwaspCategory::M5 => "Insecure Communication",
            OwaspCategory::M6 => "Inadequate Privacy Controls",
            OwaspCategory::M7 => "Insufficient Binary Protections",
            OwaspCategory::M8 => "Security Misconfiguration",
            OwaspCategory::M9 => "Insecure Data Storage",
            OwaspCategory::M10 => "Insufficient Cryptography",
        }
    }
}

impl fmt::Display for OwaspCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// 单个漏洞发现
///
/// 仅由扫描器创建，加入结果集后不再修改。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vulnerability {
    pub owasp_id: OwaspCategory,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub location: Option<String>,
    pub cwe: Option<String>,
    pub recommendations: Vec<String>,
}

/// 扫描状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Started,
    Completed,
    Failed,
}

/// 从 badging 输出解析出的清单信息，缺失字段记为 "unknown"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestInfo {
    pub package_name: String,
    pub version_code: String,
    pub version_name: String,
    pub min_sdk: String,
    pub target_sdk: String,
    pub permissions: Vec<String>,
    pub debuggable: bool,
    pub exported_components: usize,
    pub backup_enabled: bool,
}

/// 扫描摘要
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub total_vulnerabilities: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_owasp: BTreeMap<OwaspCategory, usize>,
    pub risk_score: u32,
}

impl Default for ScanSummary {
    fn default() -> Self {
        Self::from_findings(&[])
    }
}

impl ScanSummary {
    /// 统计严重程度/分类分布并计算风险分
    pub fn from_findings(findings: &[Vulnerability]) -> Self {
        let mut by_severity: BTreeMap<Severity, usize> =
            Severity::ALL.iter().map(|s| (*s, 0)).collect();
        let mut by_owasp = BTreeMap::new();

        for finding in findings {
            *by_severity.entry(finding.severity).or_insert(0) += 1;
            *by_owasp.entry(finding.owasp_id).or_insert(0) += 1;
        }

        Self {
            total_vulnerabilities: findings.len(),
            by_severity,
            by_owasp,
            risk_score: risk_score(findings),
        }
    }
}

/// 风险分 = min(100, Σ 严重程度权重)
pub fn risk_score(findings: &[Vulnerability]) -> u32 {
    findings
        .iter()
        .map(|f| f.severity.weight())
        .sum::<u32>()
        .min(MAX_RISK_SCORE)
}

/// 按出现顺序合并所有发现的修复建议，保留首次出现
pub fn collect_recommendations(findings: &[Vulnerability]) -> Vec<String> {
    let mut seen = HashSet::new();
    findings
        .iter()
        .flat_map(|f| f.recommendations.iter())
        .filter(|rec| seen.insert(rec.as_str()))
        .cloned()
        .collect()
}

/// 一次扫描的完整结果，定稿后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub apk_path: String,
    pub timestamp: DateTime<Utc>,
    pub scan_status: ScanStatus,
    pub vulnerabilities: Vec<Vulnerability>,
    pub summary: ScanSummary,
    pub recommendations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<ManifestInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScanResult {
    /// 成功完成的扫描
    pub fn completed(
        apk_path: impl Into<String>,
        vulnerabilities: Vec<Vulnerability>,
        manifest: ManifestInfo,
    ) -> Self {
        let summary = ScanSummary::from_findings(&vulnerabilities);
        let recommendations = collect_recommendations(&vulnerabilities);
        Self {
            apk_path: apk_path.into(),
            timestamp: Utc::now(),
            scan_status: ScanStatus::Completed,
            vulnerabilities,
            summary,
            recommendations,
            manifest: Some(manifest),
            error: None,
        }
    }

    /// 致命错误导致的失败扫描：不含任何发现
    pub fn failed(apk_path: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            apk_path: apk_path.into(),
            timestamp: Utc::now(),
            scan_status: ScanStatus::Failed,
            vulnerabilities: Vec::new(),
            summary: ScanSummary::default(),
            recommendations: Vec::new(),
            manifest: None,
            error: Some(error.into()),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.scan_status == ScanStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(severity: Severity, owasp: OwaspCategory, recs: &[&str]) -> Vulnerability {
        Vulnerability {
            owasp_id: owasp,
            title: "t".to_string(),
            description: "d".to_string(),
            severity,
            location: None,
            cwe: None,
            recommendations: recs.iter().map(|r| r.to_string()).collect(),
        }
    }

    #[test]
    fn test_risk_score_weights() {
        let findings = vec![
            finding(Severity::Critical, OwaspCategory::M1, &[]),
            finding(Severity::High, OwaspCategory::M8, &[]),
            finding(Severity::Medium, OwaspCategory::M5, &[]),
            finding(Severity::Low, OwaspCategory::M7, &[]),
            finding(Severity::Info, OwaspCategory::M6, &[]),
        ];
        assert_eq!(risk_score(&findings), 22);
    }

    #[test]
    fn test_risk_score_is_capped() {
        let findings: Vec<_> = (0..20)
            .map(|_| finding(Severity::High, OwaspCategory::M10, &[]))
            .collect();
        assert_eq!(risk_score(&findings), MAX_RISK_SCORE);
        assert_eq!(risk_score(&[]), 0);
    }

    #[test]
    fn test_summary_counts_are_consistent() {
        let findings = vec![
            finding(Severity::High, OwaspCategory::M10, &[]),
            finding(Severity::High, OwaspCategory::M10, &[]),
            finding(Severity::Medium, OwaspCategory::M5, &[]),
        ];
        let summary = ScanSummary::from_findings(&findings);

        assert_eq!(summary.total_vulnerabilities, 3);
        assert_eq!(summary.by_severity.values().sum::<usize>(), 3);
        assert_eq!(summary.by_owasp.values().sum::<usize>(), 3);
        assert_eq!(summary.by_severity[&Severity::High], 2);
        assert_eq!(summary.by_severity[&Severity::Critical], 0);
        assert_eq!(summary.by_owasp[&OwaspCategory::M10], 2);
        assert!(!summary.by_owasp.contains_key(&OwaspCategory::M1));
    }

    #[test]
    fn test_recommendations_keep_first_occurrence() {
        let findings = vec![
            finding(Severity::High, OwaspCategory::M10, &["a", "b"]),
            finding(Severity::Medium, OwaspCategory::M5, &["b", "c", "a"]),
        ];
        assert_eq!(collect_recommendations(&findings), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_failed_result_shape() {
        let result = ScanResult::failed("app.apk", "APK decoding failed: boom");
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["scan_status"], "failed");
        assert_eq!(json["vulnerabilities"].as_array().unwrap().len(), 0);
        assert_eq!(json["error"], "APK decoding failed: boom");
        assert_eq!(json["summary"]["risk_score"], 0);
        assert_eq!(json["summary"]["by_severity"]["high"], 0);
        assert!(json.get("manifest").is_none());
    }

    #[test]
    fn test_vulnerability_json_fields() {
        let mut v = finding(Severity::High, OwaspCategory::M8, &["fix it"]);
        v.cwe = Some("489".to_string());
        v.location = Some("AndroidManifest.xml".to_string());
        let json = serde_json::to_value(&v).unwrap();

        assert_eq!(json["owasp_id"], "M8");
        assert_eq!(json["severity"], "high");
        assert_eq!(json["cwe"], "489");
        assert_eq!(json["recommendations"][0], "fix it");
    }
}
