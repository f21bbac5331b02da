use std::io;
use thiserror::Error;

// Import module-level errors for AppError
use crate::command::executor::ExecError;
use crate::command::parser::CommandSyntaxError;
use crate::config::settings::ConfigError;
use crate::plugin::scan::ScanError;
use crate::security::path_guard::PathDenied;
use crate::security::validator::ValidationError;

/// Top-level error that wraps every rejection this crate can produce
///
/// Callers that only need to surface a message can work with AppError and
/// still match on the module-specific variant when they need a different
/// recovery policy (e.g. offering a longer timeout vs. fixing a typo).
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error("Access denied: {0}")]
    PathDenied(#[from] PathDenied),

    #[error("Command syntax error: {0}")]
    CommandSyntax(#[from] CommandSyntaxError),

    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    #[error("Plugin scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for application-level operations
pub type AppResult<T> = std::result::Result<T, AppError>;
