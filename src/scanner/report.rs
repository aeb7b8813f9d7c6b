//! 扫描结果的文本/JSON 输出

use crate::models::{ScanResult, ScanStatus};

const RULE: &str = "==================================================";

/// 格式化 JSON（两空格缩进）
pub fn render_json(result: &ScanResult) -> serde_json::Result<String> {
    serde_json::to_string_pretty(result)
}

/// 面向终端的纯文本报告
pub fn render_text(result: &ScanResult) -> String {
    let status = match result.scan_status {
        ScanStatus::Started => "started",
        ScanStatus::Completed => "completed",
        ScanStatus::Failed => "failed",
    };

    let mut lines = vec![
        "OWASP Mobile Top 10 Security Scan Results".to_string(),
        RULE.to_string(),
        format!("\nAPK: {}", result.apk_path),
        format!("Status: {}", status),
        format!(
            "Vulnerabilities Found: {}",
            result.summary.total_vulnerabilities
        ),
        format!("Risk Score: {}/100", result.summary.risk_score),
    ];

    if let Some(error) = &result.error {
        lines.push(format!("Error: {}", error));
    }

    if !result.vulnerabilities.is_empty() {
        lines.push(format!("\n{}", RULE));
        lines.push("\nVulnerabilities:".to_string());
        for vuln in &result.vulnerabilities {
            lines.push(format!(
                "\n[{}] {}: {}",
                vuln.severity.as_str().to_uppercase(),
                vuln.owasp_id,
                vuln.title
            ));
            lines.push(format!("  Description: {}", vuln.description));
            lines.push(format!("  CWE: {}", vuln.cwe.as_deref().unwrap_or("N/A")));
            lines.push(format!(
                "  Location: {}",
                vuln.location.as_deref().unwrap_or("N/A")
            ));

            if !vuln.recommendations.is_empty() {
                lines.push("  Recommendations:".to_string());
                for rec in &vuln.recommendations {
                    lines.push(format!("    • {}", rec));
                }
            }
        }
    }

    lines.join("\n")
}
