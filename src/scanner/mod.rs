pub mod engine;
pub mod manifest;
pub mod patterns;
pub mod report;
pub mod tools;

pub use engine::{LogProgress, NoopProgress, ProgressReporter, VulnerabilityScanner};
pub use manifest::parse_badging;
pub use patterns::{PatternRegistry, PatternRule, RuleId};
pub use tools::{AaptDumper, ApktoolDecoder, ManifestDumper, PackageDecoder, ScanError};
