use crate::audit::logger::AuditLogger;
use crate::command::executor::{
    AutoApprove, Confirmer, DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_TIMEOUT_SECS, Executor,
    MAX_TIMEOUT_SECS, TerminalPrompt,
};
use crate::plugin::scan::{DEFAULT_MAX_PLUGIN_BYTES, MatchPolicy, PluginScanner, SizePolicy};
use crate::security::path_guard::PathGuard;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Config directory not found")]
    DirectoryNotFound,

    #[error("Invalid config value: {0}")]
    InvalidValue(String),
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub execution: ExecutionConfig,
    pub paths: PathsConfig,
    pub plugins: PluginsConfig,
    pub audit: AuditConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ExecutionConfig {
    pub default_timeout_secs: u64,
    pub max_timeout_secs: u64,
    pub max_output_bytes: usize,
    /// Skip the confirmation prompt for risky commands. Blocked commands stay blocked.
    pub auto_approve: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_timeout_secs: MAX_TIMEOUT_SECS,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            auto_approve: false,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    /// Empty means the current directory and the home directory
    pub allowed_roots: Vec<PathBuf>,
    pub extra_denied: Vec<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct PluginsConfig {
    pub max_size_bytes: u64,
    pub block_on_match: bool,
    pub reject_oversize: bool,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: DEFAULT_MAX_PLUGIN_BYTES,
            block_on_match: false,
            reject_oversize: false,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_path: None,
        }
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        let home = std::env::var("HOME").map_err(|_| ConfigError::DirectoryNotFound)?;
        Ok(PathBuf::from(home).join(".config").join("guardrail"))
    }

    /// Get the config file path
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from the default location
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::config_path()?)
    }

    /// Load configuration from a specific file
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::ReadError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Config file not found: {}", path.display()),
            )));
        }

        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;

        config.validate()?;

        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)?;
        self.save_to(Self::config_path()?)
    }

    /// Save configuration to a specific file
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        self.validate()?;

        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;

        // Set permissions to 600 (owner read/write only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(path, perms)?;
        }

        Ok(())
    }

    /// Create default configuration
    pub fn default_config() -> Self {
        Self::default()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let exec = &self.execution;
        if exec.default_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "default_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if exec.max_timeout_secs < exec.default_timeout_secs {
            return Err(ConfigError::InvalidValue(format!(
                "max_timeout_secs ({}) must not be less than default_timeout_secs ({})",
                exec.max_timeout_secs, exec.default_timeout_secs
            )));
        }

        if exec.max_timeout_secs > MAX_TIMEOUT_SECS {
            return Err(ConfigError::InvalidValue(format!(
                "max_timeout_secs ({}) must not exceed {}",
                exec.max_timeout_secs, MAX_TIMEOUT_SECS
            )));
        }

        if exec.max_output_bytes == 0 {
            return Err(ConfigError::InvalidValue(
                "max_output_bytes must be greater than 0".to_string(),
            ));
        }

        if self.plugins.max_size_bytes == 0 {
            return Err(ConfigError::InvalidValue(
                "plugins.max_size_bytes must be greater than 0".to_string(),
            ));
        }

        if let Some(root) = self.paths.allowed_roots.iter().find(|r| r.is_relative()) {
            return Err(ConfigError::InvalidValue(format!(
                "allowed_roots entries must be absolute: {}",
                root.display()
            )));
        }

        Ok(())
    }

    /// Build the path guard described by `[paths]`, audited when `[audit]` is enabled
    pub fn path_guard(&self) -> Result<PathGuard, ConfigError> {
        let guard = if self.paths.allowed_roots.is_empty() {
            PathGuard::from_environment()
        } else {
            PathGuard::new(&self.paths.allowed_roots)
        };
        let guard = guard.with_denied(&self.paths.extra_denied);

        Ok(match self.audit_logger()? {
            Some(logger) => guard.with_audit(logger),
            None => guard,
        })
    }

    /// Build the audit logger described by `[audit]`, if enabled
    pub fn audit_logger(&self) -> Result<Option<Arc<AuditLogger>>, ConfigError> {
        if !self.audit.enabled {
            return Ok(None);
        }
        let logger = match &self.audit.log_path {
            Some(path) => AuditLogger::with_path(path)?,
            None => AuditLogger::new()?,
        };
        Ok(Some(Arc::new(logger)))
    }

    /// Build the executor described by `[execution]` and `[audit]`
    pub fn executor(&self) -> Result<Executor, ConfigError> {
        let executor = Executor::new()
            .with_timeouts(
                self.execution.default_timeout_secs,
                self.execution.max_timeout_secs,
            )
            .with_max_output_bytes(self.execution.max_output_bytes);

        Ok(match self.audit_logger()? {
            Some(logger) => executor.with_audit(logger),
            None => executor,
        })
    }

    /// The confirmer matching `auto_approve`
    pub fn confirmer(&self) -> Box<dyn Confirmer> {
        if self.execution.auto_approve {
            Box::new(AutoApprove)
        } else {
            Box::new(TerminalPrompt)
        }
    }

    /// Build the plugin scanner described by `[plugins]` and `[audit]`
    pub fn plugin_scanner(&self) -> Result<PluginScanner, ConfigError> {
        let match_policy = if self.plugins.block_on_match {
            MatchPolicy::Block
        } else {
            MatchPolicy::Warn
        };
        let size_policy = if self.plugins.reject_oversize {
            SizePolicy::Reject
        } else {
            SizePolicy::Warn
        };

        let scanner = PluginScanner::new()
            .with_max_size(self.plugins.max_size_bytes)
            .with_match_policy(match_policy)
            .with_size_policy(size_policy);

        Ok(match self.audit_logger()? {
            Some(logger) => scanner.with_audit(logger),
            None => scanner,
        })
    }
}
