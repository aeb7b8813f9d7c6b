use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::manifest::parse_badging;
use super::patterns::{PatternRegistry, PatternRule, RuleId};
use super::tools::{
    AaptDumper, ApktoolDecoder, MANIFEST_FILE, ManifestDumper, PackageDecoder, ScanError,
};
use crate::config::ScannerConfig;
use crate::models::{ManifestInfo, OwaspCategory, ScanResult, Severity, Vulnerability};

/// 参与模式匹配的文件扩展名，按此顺序分组扫描
pub const SOURCE_EXTENSIONS: [&str; 3] = ["java", "smali", "xml"];

/// 默认导出组件阈值
pub const DEFAULT_EXPORTED_THRESHOLD: usize = 5;

const PROGRESS_DECODE: u8 = 10;
const PROGRESS_MANIFEST: u8 = 25;
const PROGRESS_CHECKS: u8 = 35;
const PROGRESS_FILES_END: u8 = 90;
const PROGRESS_SUMMARY: u8 = 95;

/// 扫描进度回调，进度值按调用顺序不减
pub trait ProgressReporter: Send + Sync {
    fn report(&self, step: &str, progress: u8);
}

/// 丢弃所有进度
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _step: &str, _progress: u8) {}
}

/// 把进度写到 debug 日志
pub struct LogProgress;

impl ProgressReporter for LogProgress {
    fn report(&self, step: &str, progress: u8) {
        debug!(progress, step, "扫描进度");
    }
}

/// 单个文件的读取结果；跳过的文件不会离开文件扫描循环
#[derive(Debug)]
pub(crate) enum FileScan {
    Scanned { location: String, content: String },
    Skipped { location: String, reason: String },
}

/// 带去重的发现集合，键为 `(规则, 位置)`
#[derive(Debug, Default)]
struct FindingSet {
    seen: HashSet<(RuleId, String)>,
    findings: Vec<Vulnerability>,
}

impl FindingSet {
    /// 已有相同键时丢弃，返回是否插入
    fn insert(&mut self, rule: RuleId, finding: Vulnerability) -> bool {
        let location = finding.location.clone().unwrap_or_default();
        if !self.seen.insert((rule, location)) {
            return false;
        }
        self.findings.push(finding);
        true
    }

    fn into_findings(self) -> Vec<Vulnerability> {
        self.findings
    }
}

/// APK 漏洞扫描器
#[derive(Clone)]
pub struct VulnerabilityScanner {
    decoder: Arc<dyn PackageDecoder>,
    dumper: Arc<dyn ManifestDumper>,
    registry: &'static PatternRegistry,
    exported_threshold: usize,
}

impl VulnerabilityScanner {
    pub fn new(decoder: Arc<dyn PackageDecoder>, dumper: Arc<dyn ManifestDumper>) -> Self {
        Self {
            decoder,
            dumper,
            registry: PatternRegistry::builtin(),
            exported_threshold: DEFAULT_EXPORTED_THRESHOLD,
        }
    }

    /// 使用 apktool/aapt 的扫描器
    pub fn from_config(config: &ScannerConfig) -> Self {
        Self::new(
            Arc::new(ApktoolDecoder::from_config(config)),
            Arc::new(AaptDumper::from_config(config)),
        )
        .with_exported_threshold(config.exported_component_threshold)
    }

    pub fn with_exported_threshold(mut self, threshold: usize) -> Self {
        self.exported_threshold = threshold;
        self
    }

    /// 扫描目标 APK
    ///
    /// 不会返回错误：解包或清单导出失败时得到 `scan_status = failed`
    /// 且不含任何发现的结果。
    pub async fn scan(&self, target: &Path, progress: Arc<dyn ProgressReporter>) -> ScanResult {
        let apk_path = target.display().to_string();

        match self.run(target, progress).await {
            Ok((findings, manifest)) => {
                let result = ScanResult::completed(apk_path, findings, manifest);
                info!(
                    target = %result.apk_path,
                    total = result.summary.total_vulnerabilities,
                    risk_score = result.summary.risk_score,
                    "扫描完成"
                );
                result
            }
            Err(e) => {
                warn!(target = %apk_path, error = %e, "扫描失败");
                ScanResult::failed(apk_path, e.to_string())
            }
        }
    }

    async fn run(
        &self,
        target: &Path,
        progress: Arc<dyn ProgressReporter>,
    ) -> Result<(Vec<Vulnerability>, ManifestInfo), ScanError> {
        progress.report("Decoding APK", PROGRESS_DECODE);
        let decoded = self.decoder.decode(target).await?;

        let manifest_present = tokio::fs::try_exists(decoded.join(MANIFEST_FILE))
            .await
            .unwrap_or(false);
        if !manifest_present {
            return Err(ScanError::ManifestMissing);
        }

        progress.report("Parsing manifest", PROGRESS_MANIFEST);
        let badging = self.dumper.dump_manifest(target).await?;
        let manifest = parse_badging(&badging);

        let mut findings = FindingSet::default();
        for (rule, finding) in manifest_findings(&manifest, self.exported_threshold) {
            findings.insert(rule, finding);
        }
        progress.report("Checking manifest configuration", PROGRESS_CHECKS);

        let registry = self.registry;
        let file_progress = Arc::clone(&progress);
        let findings = tokio::task::spawn_blocking(move || {
            scan_tree(&decoded, registry, findings, file_progress.as_ref())
        })
        .await
        .map_err(|e| ScanError::Extraction(e.to_string()))?;

        progress.report("Generating summary", PROGRESS_SUMMARY);
        Ok((findings.into_findings(), manifest))
    }
}

/// 清单级检查，独立于模式匹配
fn manifest_findings(manifest: &ManifestInfo, threshold: usize) -> Vec<(RuleId, Vulnerability)> {
    let mut findings = Vec::new();

    if manifest.debuggable {
        findings.push((
            RuleId::DebugMode,
            manifest_finding(
                OwaspCategory::M8,
                "Application is Debuggable",
                "Application is configured for debug mode, which allows debugging and potentially exposes sensitive information.".to_string(),
                Severity::High,
                "489",
                &[
                    "Remove android:debuggable=\"true\" from the manifest",
                    "Ensure debug builds are not released to production",
                    "Use ProGuard/R8 to obfuscate code",
                ],
            ),
        ));
    }

    if manifest.exported_components > threshold {
        findings.push((
            RuleId::ExcessiveExports,
            manifest_finding(
                OwaspCategory::M8,
                "Excessive Exported Components",
                format!(
                    "Application has {} exported components, which may increase attack surface.",
                    manifest.exported_components
                ),
                Severity::Medium,
                "926",
                &[
                    "Review all exported components",
                    "Minimize exported components",
                    "Add proper permissions to exported components",
                    "Use intent filters carefully",
                ],
            ),
        ));
    }

    if manifest.backup_enabled {
        findings.push((
            RuleId::BackupEnabled,
            manifest_finding(
                OwaspCategory::M9,
                "Backup Enabled",
                "Application allows backup, which may expose sensitive data.".to_string(),
                Severity::Medium,
                "922",
                &[
                    "Set android:allowBackup=\"false\" in the manifest",
                    "Implement proper data encryption",
                    "Use secure backup mechanisms",
                ],
            ),
        ));
    }

    findings
}

fn manifest_finding(
    owasp_id: OwaspCategory,
    title: &str,
    description: String,
    severity: Severity,
    cwe: &str,
    recommendations: &[&str],
) -> Vulnerability {
    Vulnerability {
        owasp_id,
        title: title.to_string(),
        description,
        severity,
        location: Some(MANIFEST_FILE.to_string()),
        cwe: Some(cwe.to_string()),
        recommendations: recommendations.iter().map(|r| r.to_string()).collect(),
    }
}

fn pattern_finding(rule: &PatternRule, location: &str) -> Vulnerability {
    Vulnerability {
        owasp_id: rule.owasp,
        title: rule.title.to_string(),
        description: rule.description.to_string(),
        severity: rule.severity,
        location: Some(location.to_string()),
        cwe: Some(rule.cwe.to_string()),
        recommendations: rule.recommendations.iter().map(|r| r.to_string()).collect(),
    }
}

/// 收集解包目录中的源文件：按扩展名分组，组内按路径排序
pub(crate) fn collect_source_files(root: &Path) -> Vec<PathBuf> {
    let mut groups: [Vec<PathBuf>; SOURCE_EXTENSIONS.len()] = Default::default();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!(error = %e, "跳过无法遍历的路径");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(ext) = entry.path().extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if let Some(group) = SOURCE_EXTENSIONS.iter().position(|known| *known == ext) {
            groups[group].push(entry.into_path());
        }
    }

    groups
        .into_iter()
        .flat_map(|mut group| {
            group.sort();
            group
        })
        .collect()
}

/// 相对解包目录的位置，统一使用 `/`
fn relative_location(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// 读取单个文件；非 UTF-8 内容按有损方式解码
pub(crate) fn read_source(root: &Path, path: &Path) -> FileScan {
    let location = relative_location(root, path);
    match std::fs::read(path) {
        Ok(bytes) => FileScan::Scanned {
            location,
            content: String::from_utf8_lossy(&bytes).into_owned(),
        },
        Err(e) => FileScan::Skipped {
            location,
            reason: e.to_string(),
        },
    }
}

fn scan_tree(
    root: &Path,
    registry: &PatternRegistry,
    mut findings: FindingSet,
    progress: &dyn ProgressReporter,
) -> FindingSet {
    let files = collect_source_files(root);
    let total = files.len();
    let span = usize::from(PROGRESS_FILES_END - PROGRESS_CHECKS);
    let mut last_reported = PROGRESS_CHECKS;

    debug!(root = %root.display(), files = total, "开始扫描源文件");

    for (index, path) in files.iter().enumerate() {
        match read_source(root, path) {
            FileScan::Scanned { location, content } => {
                for rule in registry.rules() {
                    if rule.is_match(&content) {
                        findings.insert(rule.id, pattern_finding(rule, &location));
                    }
                }
            }
            FileScan::Skipped { location, reason } => {
                debug!(location = %location, reason = %reason, "跳过无法读取的文件");
            }
        }

        let current = PROGRESS_CHECKS + (span * (index + 1) / total) as u8;
        if current > last_reported {
            last_reported = current;
            progress.report("Scanning source files", current);
        }
    }

    findings
}
