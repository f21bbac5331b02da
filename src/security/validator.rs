use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Minimum accepted length of an API credential after trimming
pub const MIN_API_KEY_LEN: usize = 20;

/// Inclusive bounds for model sampling temperature
pub const TEMPERATURE_MIN: f64 = 0.0;
pub const TEMPERATURE_MAX: f64 = 2.0;

/// The kind of input a validator was asked to check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    ApiKey,
    Temperature,
    Messages,
    GlobPattern,
    RepoIdentifier,
    Timeout,
    FilePath,
    PositiveInteger,
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InputKind::ApiKey => "api key",
            InputKind::Temperature => "temperature",
            InputKind::Messages => "message list",
            InputKind::GlobPattern => "glob pattern",
            InputKind::RepoIdentifier => "repository identifier",
            InputKind::Timeout => "timeout",
            InputKind::FilePath => "file path",
            InputKind::PositiveInteger => "positive integer",
        };
        f.write_str(name)
    }
}

/// A rejected input
///
/// `constraint` is an end-user-safe sentence naming the violated rule and,
/// where relevant, the bound. `value` is the offending input (redacted for
/// credentials).
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{constraint}")]
pub struct ValidationError {
    pub kind: InputKind,
    pub value: String,
    pub constraint: String,
}

impl ValidationError {
    fn new(kind: InputKind, value: impl Into<String>, constraint: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
            constraint: constraint.into(),
        }
    }
}

pub type ValidationResult<T> = std::result::Result<T, ValidationError>;

/// Chat roles accepted by the model API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    fn parse(role: &str) -> Option<Self> {
        match role {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Validate an API credential
pub fn api_key(raw: &str) -> ValidationResult<String> {
    let key = raw.trim();

    if key.is_empty() {
        return Err(ValidationError::new(
            InputKind::ApiKey,
            "",
            "API key cannot be empty or whitespace only",
        ));
    }

    let len = key.chars().count();
    if len < MIN_API_KEY_LEN {
        return Err(ValidationError::new(
            InputKind::ApiKey,
            redact(len),
            format!(
                "API key is too short (got {} characters, expected at least {})",
                len, MIN_API_KEY_LEN
            ),
        ));
    }

    if key.chars().any(char::is_whitespace) {
        return Err(ValidationError::new(
            InputKind::ApiKey,
            redact(len),
            "API key contains whitespace characters",
        ));
    }

    Ok(key.to_string())
}

fn redact(len: usize) -> String {
    format!("<redacted, {} chars>", len)
}

/// Validate a sampling temperature, coercing integers to floats
pub fn temperature(value: &Value) -> ValidationResult<f64> {
    let Some(t) = value.as_f64() else {
        return Err(ValidationError::new(
            InputKind::Temperature,
            value.to_string(),
            format!("Temperature must be a number, got {}", type_name(value)),
        ));
    };

    if !(TEMPERATURE_MIN..=TEMPERATURE_MAX).contains(&t) {
        return Err(ValidationError::new(
            InputKind::Temperature,
            value.to_string(),
            format!(
                "Temperature must be between {:.1} and {:.1}, got {}",
                TEMPERATURE_MIN, TEMPERATURE_MAX, t
            ),
        ));
    }

    Ok(t)
}

/// Validate a chat message list
pub fn messages(value: &Value) -> ValidationResult<Vec<ChatMessage>> {
    let Some(entries) = value.as_array() else {
        return Err(ValidationError::new(
            InputKind::Messages,
            value.to_string(),
            format!("Messages must be a list, got {}", type_name(value)),
        ));
    };

    if entries.is_empty() {
        return Err(ValidationError::new(
            InputKind::Messages,
            "[]",
            "Messages list cannot be empty",
        ));
    }

    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| message_at(i, entry))
        .collect()
}

fn message_at(i: usize, entry: &Value) -> ValidationResult<ChatMessage> {
    let reject = |constraint: String| {
        Err(ValidationError::new(
            InputKind::Messages,
            entry.to_string(),
            constraint,
        ))
    };

    let Some(object) = entry.as_object() else {
        return reject(format!(
            "Message at index {} must be an object, got {}",
            i,
            type_name(entry)
        ));
    };

    let Some(role) = object.get("role") else {
        return reject(format!("Message at index {} is missing 'role' field", i));
    };
    let Some(content) = object.get("content") else {
        return reject(format!("Message at index {} is missing 'content' field", i));
    };

    let Some(role) = role.as_str().and_then(Role::parse) else {
        return reject(format!(
            "Message at index {} has invalid role {}. Valid roles are: assistant, system, user",
            i, role
        ));
    };

    let Some(content) = content.as_str() else {
        return reject(format!(
            "Message at index {} content must be a string, got {}",
            i,
            type_name(content)
        ));
    };

    Ok(ChatMessage {
        role,
        content: content.to_string(),
    })
}

/// Validate a glob pattern before directory traversal
pub fn glob_pattern(pattern: &str) -> ValidationResult<String> {
    let reject = |constraint: String| {
        Err(ValidationError::new(
            InputKind::GlobPattern,
            pattern,
            constraint,
        ))
    };

    if pattern.is_empty() {
        return reject("Glob pattern cannot be empty".to_string());
    }

    // Both separator styles, whatever the host uses
    if pattern.split(['/', '\\']).any(|segment| segment == "..") {
        return reject(format!(
            "Glob pattern contains a parent-directory traversal: {}",
            pattern
        ));
    }

    let mut brackets = 0i32;
    let mut braces = 0i32;
    for (i, c) in pattern.chars().enumerate() {
        match c {
            '[' => brackets += 1,
            ']' => {
                brackets -= 1;
                if brackets < 0 {
                    return reject(format!(
                        "Unmatched closing bracket ']' at position {} in pattern: {}",
                        i, pattern
                    ));
                }
            }
            '{' => braces += 1,
            '}' => {
                braces -= 1;
                if braces < 0 {
                    return reject(format!(
                        "Unmatched closing brace '}}' at position {} in pattern: {}",
                        i, pattern
                    ));
                }
            }
            _ => {}
        }
    }

    if brackets > 0 {
        return reject(format!("Unmatched opening bracket '[' in pattern: {}", pattern));
    }
    if braces > 0 {
        return reject(format!("Unmatched opening brace '{{' in pattern: {}", pattern));
    }

    Ok(pattern.to_string())
}

/// Validate an `owner/repo` identifier before it is passed to a VCS-hosting CLI
pub fn repo_identifier(raw: &str) -> ValidationResult<String> {
    let repo = raw.trim();
    let reject = |constraint: String| {
        Err(ValidationError::new(
            InputKind::RepoIdentifier,
            repo,
            constraint,
        ))
    };

    if repo.is_empty() {
        return reject("Repository name cannot be empty".to_string());
    }

    let Some((owner, name)) = repo.split_once('/') else {
        return reject(format!(
            "Repository name must be in 'owner/repo' format, got '{}'",
            repo
        ));
    };

    if name.contains('/') {
        return reject(format!(
            "Repository name must have exactly one '/', got '{}'",
            repo
        ));
    }

    if owner.is_empty() {
        return reject("Repository owner cannot be empty".to_string());
    }
    if name.is_empty() {
        return reject("Repository name cannot be empty".to_string());
    }

    for (label, part) in [("owner", owner), ("name", name)] {
        if !part.chars().all(is_repo_char) {
            return reject(format!(
                "Invalid repository {} '{}'. Only alphanumeric characters, hyphens, underscores, and dots are allowed.",
                label, part
            ));
        }
        if part == "." || part == ".." {
            return reject(format!("Repository {} cannot be '{}'", label, part));
        }
    }

    // Would be read as a flag by the hosting CLI
    if owner.starts_with('-') {
        return reject(format!("Repository owner cannot start with '-', got '{}'", owner));
    }

    Ok(format!("{}/{}", owner, name))
}

fn is_repo_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

/// Resolve an optional timeout, substituting `default` when absent
pub fn timeout_seconds(value: Option<i64>, default: u64, maximum: u64) -> ValidationResult<u64> {
    let Some(timeout) = value else {
        return Ok(default);
    };

    if timeout <= 0 {
        return Err(ValidationError::new(
            InputKind::Timeout,
            timeout.to_string(),
            format!("Timeout must be positive, got {}", timeout),
        ));
    }

    let timeout = timeout as u64;
    if timeout > maximum {
        return Err(ValidationError::new(
            InputKind::Timeout,
            timeout.to_string(),
            format!(
                "Timeout exceeds maximum of {} seconds, got {}",
                maximum, timeout
            ),
        ));
    }

    Ok(timeout)
}

/// Validate a path string; optionally require that it exists
pub fn file_path(raw: &str, must_exist: bool) -> ValidationResult<PathBuf> {
    let path = raw.trim();

    if path.is_empty() {
        return Err(ValidationError::new(
            InputKind::FilePath,
            raw,
            "File path cannot be empty or whitespace only",
        ));
    }

    if path.contains('\0') {
        return Err(ValidationError::new(
            InputKind::FilePath,
            path.replace('\0', "\\0"),
            "File path contains null byte",
        ));
    }

    let path = PathBuf::from(path);
    if must_exist && !path.exists() {
        return Err(ValidationError::new(
            InputKind::FilePath,
            path.display().to_string(),
            format!("Path does not exist: {}", path.display()),
        ));
    }

    Ok(path)
}

/// Validate that `value` is an integer greater than zero
pub fn positive_integer(value: &Value, name: &str) -> ValidationResult<u64> {
    let as_int = match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => n.as_i64().or_else(|| {
            // u64 beyond i64::MAX is still positive
            n.as_u64().map(|_| i64::MAX)
        }),
        _ => None,
    };

    let Some(n) = as_int else {
        return Err(ValidationError::new(
            InputKind::PositiveInteger,
            value.to_string(),
            format!("{} must be an integer, got {}", name, type_name(value)),
        ));
    };

    if n <= 0 {
        return Err(ValidationError::new(
            InputKind::PositiveInteger,
            value.to_string(),
            format!("{} must be positive, got {}", name, n),
        ));
    }

    Ok(value.as_u64().unwrap_or(n as u64))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}
