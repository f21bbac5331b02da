use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024; // 10MB

/// Append-only record of executed and refused actions
///
/// One line per event. Writes are serialized so concurrent executions never
/// interleave within a line.
#[derive(Debug)]
pub struct AuditLogger {
    log_path: PathBuf,
    write_lock: Mutex<()>,
}

impl AuditLogger {
    /// Create a new AuditLogger with the default log path
    pub fn new() -> std::io::Result<Self> {
        Self::with_path(Self::default_log_path()?)
    }

    /// Create an AuditLogger with a custom log path
    pub fn with_path<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let log_path = path.as_ref().to_path_buf();

        // Ensure directory exists
        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent)?;
        }

        Ok(Self {
            log_path,
            write_lock: Mutex::new(()),
        })
    }

    /// Get the default log path: ~/.config/guardrail/audit.log
    fn default_log_path() -> std::io::Result<PathBuf> {
        let home = std::env::var("HOME").map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "HOME environment variable not set",
            )
        })?;

        Ok(PathBuf::from(home)
            .join(".config")
            .join("guardrail")
            .join("audit.log"))
    }

    /// Log a finished (or timed out) command execution
    pub fn log_execution(
        &self,
        command: &str,
        working_dir: &Path,
        exit_code: i32,
        timed_out: bool,
    ) -> std::io::Result<()> {
        let status = if timed_out {
            "TIMEOUT".to_string()
        } else {
            format!("exit:{}", exit_code)
        };
        self.append(&format!(
            "[{}] [{}] {}",
            working_dir.display(),
            status,
            command
        ))
    }

    /// Log an input or command that was refused before anything ran
    ///
    /// Records what was rejected and why, to help spot attack patterns.
    pub fn log_refusal(&self, kind: &str, input: &str, reason: &str) -> std::io::Result<()> {
        self.append(&format!(
            "[REFUSED:{}] input={:?} reason={:?}",
            kind, input, reason
        ))
    }

    /// Log a plugin that passed its size check but matched scan patterns
    pub fn log_scan_warning(&self, plugin: &str, matched: &[&str]) -> std::io::Result<()> {
        self.append(&format!(
            "[PLUGIN-WARNING] plugin={:?} patterns={:?}",
            plugin,
            matched.join(", ")
        ))
    }

    fn append(&self, body: &str) -> std::io::Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        // Check and rotate log if needed
        self.rotate_if_needed()?;

        let timestamp = Utc::now().to_rfc3339();
        let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
        // Keep one event per line whatever the input contains
        let body = body.replace(['\n', '\r'], " ");
        let log_entry = format!("[{}] [{}] {}\n", timestamp, user, body);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;

        file.write_all(log_entry.as_bytes())?;
        file.flush()?;

        Ok(())
    }

    /// Rotate log file if it exceeds MAX_LOG_SIZE
    fn rotate_if_needed(&self) -> std::io::Result<()> {
        if !self.log_path.exists() {
            return Ok(());
        }

        let metadata = fs::metadata(&self.log_path)?;
        if metadata.len() > MAX_LOG_SIZE {
            // Rotate: audit.log -> audit.log.1
            let backup_path = self.log_path.with_extension("log.1");
            fs::rename(&self.log_path, backup_path)?;
        }

        Ok(())
    }

    /// Get the path to the log file
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}
