//! 独立的 APK 漏洞扫描命令行工具
//!
//! 结果写到标准输出或 `--output` 指定的文件，日志写到标准错误。
//! 扫描失败时依然以 0 退出，结果中 `scan_status` 为 failed 并带有 `error`。

use anyhow::{Context, Result};
use apkscan_backend::config::{Config, ScannerConfig};
use apkscan_backend::scanner::{LogProgress, VulnerabilityScanner, report};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "owasp-scan")]
#[command(version)]
#[command(about = "OWASP Mobile Top 10 vulnerability scanner for APK files", long_about = None)]
struct Cli {
    /// Path to the APK file
    target: PathBuf,

    /// Output file (stdout if not specified)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Configuration file providing the [scanner] section
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

fn scanner_config(path: Option<&PathBuf>) -> Result<ScannerConfig> {
    match path {
        Some(path) => Ok(Config::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?
            .scanner),
        None => Ok(ScannerConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "apkscan_backend=debug,owasp_scan=debug"
    } else {
        "apkscan_backend=warn,owasp_scan=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config = scanner_config(cli.config.as_ref())?;
    let scanner = VulnerabilityScanner::from_config(&config);

    eprintln!("Scanning: {}", cli.target.display());
    let result = scanner.scan(&cli.target, Arc::new(LogProgress)).await;
    if let Some(error) = &result.error {
        tracing::warn!(error = %error, "扫描失败");
    }

    let rendered = match cli.format {
        OutputFormat::Json => report::render_json(&result)?,
        OutputFormat::Text => report::render_text(&result),
    };

    match &cli.output {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("Results saved to: {}", path.display());
        }
        None => println!("{}", rendered),
    }

    Ok(())
}
