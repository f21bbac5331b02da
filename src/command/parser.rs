use crate::command::tokenize::{quote_posix, quote_windows, split_posix, split_windows};
use std::fmt;
use thiserror::Error;

/// Built-in commands of `cmd.exe` that have no standalone executable
pub const WINDOWS_SHELL_BUILTINS: &[&str] = &[
    "assoc", "break", "call", "cd", "chdir", "cls", "copy", "date", "del", "dir", "echo",
    "endlocal", "erase", "exit", "ftype", "md", "mkdir", "mklink", "move", "path", "pause",
    "popd", "prompt", "pushd", "rd", "ren", "rename", "rmdir", "set", "setlocal", "start",
    "time", "title", "type", "ver", "verify", "vol",
];

/// Characters `cmd.exe` interprets even inside the argument vector it receives
const CMD_METACHARACTERS: &[char] = &['&', '|', '<', '>', '^', '%', '!', '\n', '\r'];

/// The quoting rules and dispatch conventions to parse for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Posix,
    Windows,
}

impl Platform {
    /// The platform this binary was compiled for
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Posix
        }
    }
}

/// How a parsed command reaches the operating system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invocation {
    /// The first token is an executable, run directly
    Direct,
    /// The first token is a `cmd.exe` built-in, run as `cmd.exe /d /c <argv...>`
    ShellBuiltin,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{detail}: {raw}")]
pub struct CommandSyntaxError {
    pub raw: String,
    pub detail: String,
}

/// Raw command input: a line to tokenize, or tokens the caller already split
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandInput {
    Line(String),
    Argv(Vec<String>),
}

impl From<&str> for CommandInput {
    fn from(line: &str) -> Self {
        CommandInput::Line(line.to_string())
    }
}

impl From<String> for CommandInput {
    fn from(line: String) -> Self {
        CommandInput::Line(line)
    }
}

impl From<Vec<String>> for CommandInput {
    fn from(argv: Vec<String>) -> Self {
        CommandInput::Argv(argv)
    }
}

impl From<&[&str]> for CommandInput {
    fn from(argv: &[&str]) -> Self {
        CommandInput::Argv(argv.iter().map(|s| s.to_string()).collect())
    }
}

/// An argument vector that is never handed to a shell as a single string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    argv: Vec<String>,
    invocation: Invocation,
    platform: Platform,
}

impl ParsedCommand {
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    pub fn args(&self) -> &[String] {
        &self.argv[1..]
    }

    pub fn invocation(&self) -> Invocation {
        self.invocation
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// The executable and arguments actually passed to the OS
    pub fn process_invocation(&self) -> (String, Vec<String>) {
        match self.invocation {
            Invocation::Direct => (self.argv[0].clone(), self.argv[1..].to_vec()),
            Invocation::ShellBuiltin => {
                let mut args = vec!["/d".to_string(), "/c".to_string()];
                args.extend(self.argv.iter().cloned());
                ("cmd.exe".to_string(), args)
            }
        }
    }

    /// Human-readable form for logs and confirmation prompts
    ///
    /// Re-parsing this string for the same platform yields the same argv.
    pub fn display(&self) -> String {
        self.argv
            .iter()
            .map(|token| match self.platform {
                // Tokens are NUL-free by construction
                Platform::Posix => quote_posix(token)
                    .map(|q| q.into_owned())
                    .unwrap_or_else(|| token.replace('\0', "")),
                Platform::Windows => quote_windows(token).into_owned(),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for ParsedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

/// Turns command input into a `ParsedCommand` for one target platform
#[derive(Debug, Clone, Copy)]
pub struct CommandParser {
    platform: Platform,
}

impl CommandParser {
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Parse a command line or pre-split argv
    pub fn parse<I: Into<CommandInput>>(&self, input: I) -> Result<ParsedCommand, CommandSyntaxError> {
        let input = input.into();
        let (raw, argv) = match input {
            CommandInput::Line(line) => {
                let argv = self.tokenize(&line)?;
                (line, argv)
            }
            CommandInput::Argv(argv) => (argv.join(" "), argv),
        };

        let error = |detail: &str| CommandSyntaxError {
            raw: raw.clone(),
            detail: detail.to_string(),
        };

        match argv.first() {
            None => return Err(error("Empty command")),
            Some(program) if program.is_empty() => return Err(error("Empty program name")),
            Some(_) => {}
        }

        if argv.iter().any(|token| token.contains('\0')) {
            return Err(error("Command contains a null byte"));
        }

        let invocation = if self.platform == Platform::Windows && is_shell_builtin(&argv[0]) {
            if let Some(token) = argv[1..].iter().find(|t| t.contains(CMD_METACHARACTERS)) {
                return Err(error(&format!(
                    "Shell built-in argument contains a cmd.exe metacharacter ({})",
                    token
                )));
            }
            Invocation::ShellBuiltin
        } else {
            Invocation::Direct
        };

        Ok(ParsedCommand {
            argv,
            invocation,
            platform: self.platform,
        })
    }

    fn tokenize(&self, line: &str) -> Result<Vec<String>, CommandSyntaxError> {
        match self.platform {
            Platform::Posix => split_posix(line).ok_or_else(|| CommandSyntaxError {
                raw: line.to_string(),
                detail: "Unbalanced quotes".to_string(),
            }),
            Platform::Windows => split_windows(line).map_err(|detail| CommandSyntaxError {
                raw: line.to_string(),
                detail,
            }),
        }
    }
}

impl Default for CommandParser {
    fn default() -> Self {
        Self::new(Platform::current())
    }
}

fn is_shell_builtin(program: &str) -> bool {
    let lower = program.to_ascii_lowercase();
    WINDOWS_SHELL_BUILTINS.contains(&lower.as_str())
}
