use crate::audit::logger::AuditLogger;
use crate::command::parser::ParsedCommand;
use crate::security::danger::{Classification, DangerCatalog, RiskTier};
use crate::security::validator::{self, ValidationError};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
pub const MAX_TIMEOUT_SECS: u64 = 3600;
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// How long to keep reading pipes after the child is gone
///
/// A grandchild may inherit the pipes and keep them open; whatever was read
/// by then is kept.
const READER_GRACE: Duration = Duration::from_secs(1);

/// Errors that can occur around one command execution
///
/// "Never started" (`ExecutableNotFound`, `SpawnFailed`), "ran and failed"
/// (`NonZeroExit`) and "ran too long" (`Timeout`) are distinct so callers can
/// pick a recovery policy.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Command timed out after {secs} seconds")]
    Timeout { secs: u64 },

    #[error("Command not found: {program}")]
    ExecutableNotFound { program: String },

    #[error("Failed to start '{program}': {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Command requires confirmation ({reason}): {command}")]
    ConfirmationRequired { command: String, reason: String },

    #[error("Command blocked ({reason}): {command}")]
    Blocked { command: String, reason: String },

    #[error("Command declined: {command}")]
    Declined { command: String },

    #[error("Command exited with code {code}: {}", stderr.trim())]
    NonZeroExit { code: i32, stderr: String },

    #[error(transparent)]
    InvalidTimeout(#[from] ValidationError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Proof that the user affirmatively confirmed one specific command
///
/// Only valid for an identical argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    argv: Vec<String>,
}

impl Confirmation {
    pub fn for_command(command: &ParsedCommand) -> Self {
        Self {
            argv: command.argv().to_vec(),
        }
    }

    pub fn covers(&self, command: &ParsedCommand) -> bool {
        self.argv == command.argv()
    }
}

/// Per-call execution options
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Seconds; `None` uses the executor default
    pub timeout_secs: Option<i64>,
    /// Capture stdout/stderr; otherwise they are inherited from this process
    pub capture: bool,
    pub working_dir: Option<PathBuf>,
    pub confirmation: Option<Confirmation>,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            capture: true,
            working_dir: None,
            confirmation: None,
        }
    }
}

impl ExecOptions {
    pub fn with_timeout(mut self, secs: i64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_capture(mut self, capture: bool) -> Self {
        self.capture = capture;
        self
    }

    pub fn in_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn confirmed(mut self, confirmation: Confirmation) -> Self {
        self.confirmation = Some(confirmation);
        self
    }
}

/// Result of executing a command
///
/// Exit code and both streams are always present together. `exit_code` is
/// -1 when the process was ended by a signal, including the timeout kill.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    /// Output beyond the capture limit was discarded
    pub truncated: bool,
    pub timeout_secs: u64,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }

    /// Turn a timeout or nonzero exit into an error
    pub fn ensure_success(self) -> Result<Self, ExecError> {
        if self.timed_out {
            return Err(ExecError::Timeout {
                secs: self.timeout_secs,
            });
        }
        if self.exit_code != 0 {
            return Err(ExecError::NonZeroExit {
                code: self.exit_code,
                stderr: self.stderr,
            });
        }
        Ok(self)
    }
}

/// Asks the user whether a risky command may run
pub trait Confirmer: Send + Sync {
    fn confirm(&self, command: &ParsedCommand, classification: &Classification) -> bool;
}

/// Approves everything (the auto-approve flag)
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

impl Confirmer for AutoApprove {
    fn confirm(&self, _command: &ParsedCommand, _classification: &Classification) -> bool {
        true
    }
}

/// Declines everything (non-interactive sessions)
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysDeny;

impl Confirmer for AlwaysDeny {
    fn confirm(&self, _command: &ParsedCommand, _classification: &Classification) -> bool {
        false
    }
}

/// Prompts on stderr and reads a y/N answer from stdin. Blocks the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompt;

impl Confirmer for TerminalPrompt {
    fn confirm(&self, command: &ParsedCommand, classification: &Classification) -> bool {
        run_blocking(|| prompt(command, classification))
    }
}

/// Run blocking terminal I/O without stalling other tasks on a multi-thread runtime
///
/// `block_in_place` panics on a current-thread runtime, where the closure
/// runs directly instead.
fn run_blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

fn prompt(command: &ParsedCommand, classification: &Classification) -> bool {
    let reason = classification.reason().unwrap_or("potentially dangerous");
    let mut stderr = io::stderr();
    if write!(
        stderr,
        "Potentially dangerous command ({}):\n  {}\nAre you sure you want to execute this? [y/N] ",
        reason, command
    )
    .and_then(|_| stderr.flush())
    .is_err()
    {
        return false;
    }

    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    is_affirmative(&answer)
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Runs parsed commands as argument vectors, never through a shell string
#[derive(Debug)]
pub struct Executor {
    catalog: &'static DangerCatalog,
    default_timeout_secs: u64,
    max_timeout_secs: u64,
    max_output_bytes: usize,
    audit: Option<Arc<AuditLogger>>,
}

impl Executor {
    pub fn new() -> Self {
        Self {
            catalog: DangerCatalog::builtin(),
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_timeout_secs: MAX_TIMEOUT_SECS,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            audit: None,
        }
    }

    pub fn with_catalog(mut self, catalog: &'static DangerCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Set the default and maximum timeouts
    ///
    /// The maximum never exceeds `MAX_TIMEOUT_SECS` and the default never
    /// exceeds the maximum; larger values are clamped.
    pub fn with_timeouts(mut self, default_secs: u64, max_secs: u64) -> Self {
        let max_secs = if max_secs > MAX_TIMEOUT_SECS {
            warn!(
                "Maximum timeout {}s exceeds the {}s ceiling, clamping",
                max_secs, MAX_TIMEOUT_SECS
            );
            MAX_TIMEOUT_SECS
        } else {
            max_secs
        };
        self.max_timeout_secs = max_secs;
        self.default_timeout_secs = default_secs.min(max_secs);
        self
    }

    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    pub fn with_audit(mut self, logger: Arc<AuditLogger>) -> Self {
        self.audit = Some(logger);
        self
    }

    /// Classify a command without running it
    pub fn assess(&self, command: &ParsedCommand) -> Classification {
        self.catalog.classify(command)
    }

    /// Refuse blocked commands and unconfirmed risky ones
    fn gate(
        &self,
        command: &ParsedCommand,
        confirmation: Option<&Confirmation>,
    ) -> Result<Classification, ExecError> {
        let classification = self.assess(command);
        let reason = || classification.reason().unwrap_or_default().to_string();

        match classification.tier {
            RiskTier::Safe => Ok(classification),
            RiskTier::Blocked => Err(ExecError::Blocked {
                command: command.display(),
                reason: reason(),
            }),
            RiskTier::RequiresConfirmation => match confirmation {
                Some(token) if token.covers(command) => Ok(classification),
                _ => Err(ExecError::ConfirmationRequired {
                    command: command.display(),
                    reason: reason(),
                }),
            },
        }
    }

    /// Execute `command` after gating it on its risk tier
    pub async fn execute(
        &self,
        command: &ParsedCommand,
        options: ExecOptions,
    ) -> Result<ExecutionResult, ExecError> {
        let timeout_secs = validator::timeout_seconds(
            options.timeout_secs,
            self.default_timeout_secs,
            self.max_timeout_secs,
        )?;

        if let Err(e) = self.gate(command, options.confirmation.as_ref()) {
            self.audit_refusal(&command.display(), &e);
            return Err(e);
        }

        let result = self.spawn_and_wait(command, &options, timeout_secs).await?;

        if let Some(audit) = &self.audit {
            let dir = options
                .working_dir
                .clone()
                .or_else(|| std::env::current_dir().ok())
                .unwrap_or_default();
            if let Err(e) =
                audit.log_execution(&command.display(), &dir, result.exit_code, result.timed_out)
            {
                warn!("Failed to write audit log: {}", e);
            }
        }

        Ok(result)
    }

    /// Execute, asking `confirmer` first when the command needs confirmation
    pub async fn run_confirmed(
        &self,
        command: &ParsedCommand,
        mut options: ExecOptions,
        confirmer: &dyn Confirmer,
    ) -> Result<ExecutionResult, ExecError> {
        let classification = self.assess(command);
        let already_confirmed = options
            .confirmation
            .as_ref()
            .is_some_and(|token| token.covers(command));

        if classification.tier == RiskTier::RequiresConfirmation && !already_confirmed {
            if !confirmer.confirm(command, &classification) {
                let err = ExecError::Declined {
                    command: command.display(),
                };
                self.audit_refusal(&command.display(), &err);
                return Err(err);
            }
            options.confirmation = Some(Confirmation::for_command(command));
        }

        self.execute(command, options).await
    }

    async fn spawn_and_wait(
        &self,
        command: &ParsedCommand,
        options: &ExecOptions,
        timeout_secs: u64,
    ) -> Result<ExecutionResult, ExecError> {
        let (program, args) = command.process_invocation();

        let mut cmd = Command::new(&program);
        cmd.args(&args).stdin(Stdio::null()).kill_on_drop(true);
        if options.capture {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }

        if let Some(dir) = &options.working_dir {
            // Checked up front so a missing directory is not reported as a missing executable
            if !dir.is_dir() {
                return Err(ExecError::SpawnFailed {
                    program,
                    source: io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("working directory not found: {}", dir.display()),
                    ),
                });
            }
            cmd.current_dir(dir);
        }

        debug!("Spawning {} with {} args", program, args.len());
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ExecError::ExecutableNotFound { program });
            }
            Err(e) => return Err(ExecError::SpawnFailed { program, source: e }),
        };

        let stdout = Arc::new(Mutex::new(Capture::default()));
        let stderr = Arc::new(Mutex::new(Capture::default()));
        let mut readers = Vec::new();
        if let Some(pipe) = child.stdout.take() {
            readers.push(tokio::spawn(drain(pipe, Arc::clone(&stdout), self.max_output_bytes)));
        }
        if let Some(pipe) = child.stderr.take() {
            readers.push(tokio::spawn(drain(pipe, Arc::clone(&stderr), self.max_output_bytes)));
        }

        let waited = tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait()).await;
        let outcome = match waited {
            Ok(status) => status.map(|status| (status, false)),
            Err(_elapsed) => {
                warn!("Command timed out after {}s, killing: {}", timeout_secs, program);
                if let Err(e) = child.start_kill() {
                    debug!("Kill after timeout failed: {}", e);
                }
                child.wait().await.map(|status| (status, true))
            }
        };
        let (status, timed_out) = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                abort_readers(&readers);
                return Err(e.into());
            }
        };

        for reader in readers {
            finish_reader(reader).await;
        }

        let (stdout, stdout_truncated) = take_capture(&stdout);
        let (stderr, stderr_truncated) = take_capture(&stderr);

        Ok(ExecutionResult {
            exit_code: status.code().unwrap_or(-1),
            stdout,
            stderr,
            timed_out,
            truncated: stdout_truncated || stderr_truncated,
            timeout_secs,
        })
    }

    fn audit_refusal(&self, command: &str, error: &ExecError) {
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.log_refusal("command", command, &error.to_string()) {
                warn!("Failed to write audit log: {}", e);
            }
        }
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct Capture {
    bytes: Vec<u8>,
    truncated: bool,
}

/// Read a pipe to EOF, keeping at most `limit` bytes
async fn drain<R>(mut reader: R, sink: Arc<Mutex<Capture>>, limit: usize)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 8192];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let mut capture = sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let room = limit.saturating_sub(capture.bytes.len());
        let keep = n.min(room);
        capture.bytes.extend_from_slice(&buf[..keep]);
        if keep < n {
            capture.truncated = true;
        }
    }
}

fn abort_readers(readers: &[JoinHandle<()>]) {
    for reader in readers {
        reader.abort();
    }
}

async fn finish_reader(reader: JoinHandle<()>) {
    let abort = reader.abort_handle();
    if tokio::time::timeout(READER_GRACE, reader).await.is_err() {
        debug!("Output pipe still open after exit, keeping partial output");
        abort.abort();
    }
}

fn take_capture(sink: &Arc<Mutex<Capture>>) -> (String, bool) {
    let capture = sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    (
        String::from_utf8_lossy(&capture.bytes).into_owned(),
        capture.truncated,
    )
}
