use crate::audit::logger::AuditLogger;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Source fragments that suggest a plugin touches processes, files, the
/// network or dynamic evaluation
///
/// This is a substring heuristic. It is trivially bypassed (string
/// concatenation, `getattr`, aliasing) and only meant to surface obvious cases.
pub const SCAN_PATTERNS: &[&str] = &[
    "os.system(",
    "subprocess.call(",
    "subprocess.Popen(",
    "shutil.rmtree(",
    "os.remove(",
    "os.unlink(",
    "socket.socket(",
    "urllib.request.urlopen(",
    "exec(",
    "eval(",
    "compile(",
    "__import__(",
];

pub const DEFAULT_MAX_PLUGIN_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Failed to read plugin {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Plugin is not a regular file: {0}")]
    NotAFile(PathBuf),
}

/// What to do when a pattern matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchPolicy {
    /// Load anyway, with a warning
    #[default]
    Warn,
    /// Refuse to load
    Block,
}

/// What to do when the source exceeds the size limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SizePolicy {
    #[default]
    Warn,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanVerdict {
    Clean,
    /// Loading may proceed; the reasons should be shown to the user
    Warn(Vec<String>),
    /// Loading must not proceed
    Reject(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    /// False whenever any pattern matched (regardless of policy) or the
    /// source was never scanned
    pub passed: bool,
    /// The source was read and matched against the patterns
    pub scanned: bool,
    pub matched: Vec<&'static str>,
    pub size_bytes: u64,
    pub oversize: bool,
    pub verdict: ScanVerdict,
}

impl ScanReport {
    /// Whether the loader may go ahead with this plugin
    pub fn may_load(&self) -> bool {
        !matches!(self.verdict, ScanVerdict::Reject(_))
    }

    pub fn reasons(&self) -> &[String] {
        match &self.verdict {
            ScanVerdict::Clean => &[],
            ScanVerdict::Warn(reasons) | ScanVerdict::Reject(reasons) => reasons,
        }
    }
}

/// Static pre-load check of untrusted plugin source
#[derive(Debug, Clone)]
pub struct PluginScanner {
    max_size_bytes: u64,
    match_policy: MatchPolicy,
    size_policy: SizePolicy,
    audit: Option<Arc<AuditLogger>>,
}

impl PluginScanner {
    pub fn new() -> Self {
        Self {
            max_size_bytes: DEFAULT_MAX_PLUGIN_BYTES,
            match_policy: MatchPolicy::default(),
            size_policy: SizePolicy::default(),
            audit: None,
        }
    }

    /// Record flagged and rejected plugin files in `logger`
    pub fn with_audit(mut self, logger: Arc<AuditLogger>) -> Self {
        self.audit = Some(logger);
        self
    }

    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.max_size_bytes = bytes;
        self
    }

    pub fn with_match_policy(mut self, policy: MatchPolicy) -> Self {
        self.match_policy = policy;
        self
    }

    pub fn with_size_policy(mut self, policy: SizePolicy) -> Self {
        self.size_policy = policy;
        self
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    /// Scan plugin source already in memory
    pub fn scan_source(&self, source: &str) -> ScanReport {
        let matched: Vec<&'static str> = SCAN_PATTERNS
            .iter()
            .copied()
            .filter(|pattern| source.contains(pattern))
            .collect();
        self.report(matched, source.len() as u64, true)
    }

    /// Scan a plugin file
    ///
    /// The size comes from metadata, so a file that is oversize under
    /// `SizePolicy::Reject` is never read.
    pub fn scan_file<P: AsRef<Path>>(&self, path: P) -> Result<ScanReport, ScanError> {
        let path = path.as_ref();
        let unreadable = |source| ScanError::Unreadable {
            path: path.to_path_buf(),
            source,
        };

        let metadata = fs::metadata(path).map_err(unreadable)?;
        if !metadata.is_file() {
            return Err(ScanError::NotAFile(path.to_path_buf()));
        }

        let size = metadata.len();
        if size > self.max_size_bytes && self.size_policy == SizePolicy::Reject {
            let report = self.report(Vec::new(), size, false);
            self.audit_report(path, &report);
            return Ok(report);
        }

        let bytes = fs::read(path).map_err(unreadable)?;
        let source = String::from_utf8_lossy(&bytes);
        let mut report = self.scan_source(&source);
        if report.matched.is_empty() && !report.oversize {
            debug!("Plugin scan clean: {}", path.display());
        } else {
            warn!(
                "Plugin scan flagged {}: {}",
                path.display(),
                report.reasons().join("; ")
            );
        }
        // Lossy decoding can change the length; report what is on disk
        report.size_bytes = size;
        self.audit_report(path, &report);
        Ok(report)
    }

    fn audit_report(&self, path: &Path, report: &ScanReport) {
        let Some(audit) = &self.audit else {
            return;
        };
        let plugin = path.display().to_string();
        let written = match &report.verdict {
            ScanVerdict::Clean => Ok(()),
            ScanVerdict::Warn(_) if report.matched.is_empty() => Ok(()),
            ScanVerdict::Warn(_) => audit.log_scan_warning(&plugin, &report.matched),
            ScanVerdict::Reject(reasons) => audit.log_refusal("plugin", &plugin, &reasons.join("; ")),
        };
        if let Err(e) = written {
            warn!("Failed to write audit log: {}", e);
        }
    }

    fn report(&self, matched: Vec<&'static str>, size_bytes: u64, scanned: bool) -> ScanReport {
        let oversize = size_bytes > self.max_size_bytes;
        let mut warnings = Vec::new();
        let mut rejections = Vec::new();

        if oversize {
            let reason = format!(
                "Plugin is {} bytes, over the {} byte limit",
                size_bytes, self.max_size_bytes
            );
            match self.size_policy {
                SizePolicy::Warn => warnings.push(reason),
                SizePolicy::Reject => rejections.push(reason),
            }
        }

        for pattern in &matched {
            let reason = format!("Potentially dangerous call: {}", pattern);
            match self.match_policy {
                MatchPolicy::Warn => warnings.push(reason),
                MatchPolicy::Block => rejections.push(reason),
            }
        }

        let verdict = if !rejections.is_empty() {
            rejections.extend(warnings);
            ScanVerdict::Reject(rejections)
        } else if !warnings.is_empty() {
            ScanVerdict::Warn(warnings)
        } else {
            ScanVerdict::Clean
        };

        ScanReport {
            passed: scanned && matched.is_empty(),
            scanned,
            matched,
            size_bytes,
            oversize,
            verdict,
        }
    }
}

impl Default for PluginScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_clean_source() {
        let report = PluginScanner::new().scan_source("def run(ctx):\n    return ctx.name\n");
        assert!(report.passed);
        assert!(report.matched.is_empty());
        assert_eq!(report.verdict, ScanVerdict::Clean);
        assert!(report.may_load());
    }

    #[test]
    fn test_match_warns_by_default() {
        let report = PluginScanner::new().scan_source("import os\nos.system('ls')\n");
        assert!(!report.passed);
        assert_eq!(report.matched, vec!["os.system("]);
        assert!(matches!(report.verdict, ScanVerdict::Warn(_)));
        assert!(report.may_load());
    }

    #[test]
    fn test_match_blocks_under_block_policy() {
        let report = PluginScanner::new()
            .with_match_policy(MatchPolicy::Block)
            .scan_source("eval(user_input)");
        assert!(!report.passed);
        assert!(matches!(report.verdict, ScanVerdict::Reject(_)));
        assert!(!report.may_load());
    }

    #[test]
    fn test_multiple_matches_in_pattern_order() {
        let source = "__import__('x')\nshutil.rmtree(p)\nsubprocess.Popen(a)\n";
        let report = PluginScanner::new().scan_source(source);
        assert_eq!(
            report.matched,
            vec!["subprocess.Popen(", "shutil.rmtree(", "__import__("]
        );
        assert_eq!(report.reasons().len(), 3);
    }

    #[test]
    fn test_oversize_source() {
        let scanner = PluginScanner::new().with_max_size(10);
        let report = scanner.scan_source("x = 1234567890");
        assert!(report.oversize);
        assert!(report.passed);
        assert!(matches!(report.verdict, ScanVerdict::Warn(_)));

        let report = scanner
            .with_size_policy(SizePolicy::Reject)
            .scan_source("x = 1234567890");
        assert!(matches!(report.verdict, ScanVerdict::Reject(_)));
    }

    #[test]
    fn test_scan_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("plugin.py");
        fs::write(&path, "import socket\ns = socket.socket()\n").unwrap();

        let report = PluginScanner::new().scan_file(&path).unwrap();
        assert_eq!(report.matched, vec!["socket.socket("]);
        assert_eq!(report.size_bytes, 35);
    }

    #[test]
    fn test_scan_file_oversize_rejected_without_matching() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("big.py");
        fs::write(&path, "eval('1')\n".repeat(10)).unwrap();

        let report = PluginScanner::new()
            .with_max_size(20)
            .with_size_policy(SizePolicy::Reject)
            .scan_file(&path)
            .unwrap();
        assert!(report.oversize);
        assert!(!report.may_load());
        assert_eq!(report.size_bytes, 100);
        assert!(!report.scanned);
        assert!(!report.passed);
        assert!(report.matched.is_empty());
    }

    #[test]
    fn test_scan_file_errors() {
        let temp = TempDir::new().unwrap();

        let err = PluginScanner::new()
            .scan_file(temp.path().join("missing.py"))
            .unwrap_err();
        assert!(matches!(err, ScanError::Unreadable { .. }));

        let err = PluginScanner::new().scan_file(temp.path()).unwrap_err();
        assert!(matches!(err, ScanError::NotAFile(_)));
    }

    #[test]
    fn test_scan_file_audited() {
        let temp = TempDir::new().unwrap();
        let log_path = temp.path().join("audit.log");
        let logger = Arc::new(AuditLogger::with_path(&log_path).unwrap());
        let clean = temp.path().join("clean.py");
        let risky = temp.path().join("risky.py");
        fs::write(&clean, "x = 1\n").unwrap();
        fs::write(&risky, "os.unlink(p)\n").unwrap();

        let scanner = PluginScanner::new().with_audit(Arc::clone(&logger));
        scanner.scan_file(&clean).unwrap();
        scanner.scan_file(&risky).unwrap();
        scanner
            .with_match_policy(MatchPolicy::Block)
            .scan_file(&risky)
            .unwrap();

        let content = fs::read_to_string(&log_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("PLUGIN-WARNING") && lines[0].contains("os.unlink("));
        assert!(lines[1].contains("REFUSED:plugin"));
        assert!(!content.contains("clean.py"));
    }
}
