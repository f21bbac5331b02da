//! Input validation and guarded command execution for tools that act on
//! untrusted input: user text, model output and third-party plugins.

pub mod audit;
pub mod command;
pub mod config;
pub mod error;
pub mod plugin;
pub mod security;

// Re-export commonly used types for convenience
pub use audit::AuditLogger;
pub use command::{CommandParser, ExecError, ExecOptions, ExecutionResult, Executor, ParsedCommand, Platform};
pub use config::Config;
pub use error::{AppError, AppResult};
pub use plugin::{PluginScanner, ScanReport, ScanVerdict};
pub use security::{DangerCatalog, PathGuard, RiskTier};
