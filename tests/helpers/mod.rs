#![allow(dead_code)]

use guardrail::command::{CommandParser, ParsedCommand, Platform};
use guardrail::security::PathGuard;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Helper to create a workspace directory with a guard rooted at it
///
/// The returned path is canonical so comparisons against authorized paths
/// hold on systems where the temp dir sits behind a symlink.
pub fn create_guarded_workspace() -> (TempDir, PathBuf, PathGuard) {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("workspace");
    fs::create_dir_all(&root).unwrap();
    let root = root.canonicalize().unwrap();
    let guard = PathGuard::new([&root]);
    (temp_dir, root, guard)
}

/// Helper to create a file (and its parents) under `root`
pub fn create_file(root: &Path, relative: &str, content: &str) -> PathBuf {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

/// Parse a POSIX command line, panicking on syntax errors
pub fn posix(line: &str) -> ParsedCommand {
    CommandParser::new(Platform::Posix).parse(line).unwrap()
}

/// Parse a Windows command line, panicking on syntax errors
pub fn windows(line: &str) -> ParsedCommand {
    CommandParser::new(Platform::Windows).parse(line).unwrap()
}
