use crate::audit::logger::AuditLogger;
use std::ffi::OsStr;
use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Absolute locations that are never authorized, even inside an allowed root
///
/// An entry matches wherever its components occur in the canonical path,
/// not only at the top, so a copied `etc/shadow` inside a root is still
/// denied. Matching is per component, so `/rootless` is not caught by `/root`.
pub const SENSITIVE_PATHS: &[&str] = &[
    // Credential stores
    "/etc/shadow",
    "/etc/gshadow",
    "/etc/passwd",
    "/etc/sudoers",
    "/etc/sudoers.d",
    "/etc/ssh",
    "/etc/ssl/private",
    "/var/db/sudo",
    "/Library/Keychains",
    // Administrator homes
    "/root",
    "/var/root",
    "/private/var/root",
    // OS configuration
    "/private/etc",
    "/boot",
    "/proc",
    "/sys",
    "/dev",
    "/System",
    "C:\\Windows\\System32\\config",
    "C:\\Users\\Administrator",
];

/// The filesystem operation being authorized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// The target must already exist
    Read,
    /// The target may be created; its nearest existing ancestor must resolve
    Write,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    OutsideAllowedRoots,
    SensitivePath(PathBuf),
    Unresolvable(String),
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::OutsideAllowedRoots => write!(f, "outside allowed roots"),
            DenyReason::SensitivePath(entry) => {
                write!(f, "sensitive system path (under {})", entry.display())
            }
            DenyReason::Unresolvable(detail) => write!(f, "unresolvable path: {}", detail),
        }
    }
}

/// A path that failed authorization
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}: {}", path.display(), reason)]
pub struct PathDenied {
    pub path: PathBuf,
    pub reason: DenyReason,
}

/// Authorizes filesystem paths against a fixed set of allowed roots
///
/// Roots are canonicalized once at construction and never change. To use a
/// different allow-list, build a new guard.
#[derive(Debug, Clone)]
pub struct PathGuard {
    roots: Vec<PathBuf>,
    denied: Vec<PathBuf>,
    audit: Option<Arc<AuditLogger>>,
}

impl PathGuard {
    /// Create a guard for the given roots
    ///
    /// Roots that cannot be canonicalized are skipped. A guard with no roots
    /// denies every path.
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut canonical_roots: Vec<PathBuf> = Vec::new();
        for root in roots {
            let root = root.as_ref();
            match root.canonicalize() {
                Ok(canonical) => {
                    if !canonical_roots.contains(&canonical) {
                        canonical_roots.push(canonical);
                    }
                }
                Err(e) => warn!("Skipping allowed root {}: {}", root.display(), e),
            }
        }

        Self {
            roots: canonical_roots,
            denied: SENSITIVE_PATHS.iter().map(PathBuf::from).collect(),
            audit: None,
        }
    }

    /// Create a guard rooted at the current directory and the user's home
    pub fn from_environment() -> Self {
        let mut roots = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            roots.push(cwd);
        }
        if let Some(home) = home_dir() {
            roots.push(home);
        }
        Self::new(roots)
    }

    /// Add entries to the deny-list. The built-in entries always remain.
    pub fn with_denied<I, P>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        for entry in entries {
            let entry = entry.as_ref();
            let entry = entry.canonicalize().unwrap_or_else(|_| entry.to_path_buf());
            if !self.denied.contains(&entry) {
                self.denied.push(entry);
            }
        }
        self
    }

    /// Record every denial in `logger`
    pub fn with_audit(mut self, logger: Arc<AuditLogger>) -> Self {
        self.audit = Some(logger);
        self
    }

    pub fn allowed_roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn authorize_read<P: AsRef<Path>>(&self, path: P) -> Result<PathBuf, PathDenied> {
        self.authorize(path, Access::Read)
    }

    pub fn authorize_write<P: AsRef<Path>>(&self, path: P) -> Result<PathBuf, PathDenied> {
        self.authorize(path, Access::Write)
    }

    /// Authorize `path` for `access`, returning the canonical path to use for I/O
    pub fn authorize<P: AsRef<Path>>(&self, path: P, access: Access) -> Result<PathBuf, PathDenied> {
        let path = path.as_ref();
        let deny = |reason: DenyReason| {
            debug!("Path denied: {} ({})", path.display(), reason);
            if let Some(audit) = &self.audit {
                let input = path.display().to_string();
                if let Err(e) = audit.log_refusal("path", &input, &reason.to_string()) {
                    warn!("Failed to write audit log: {}", e);
                }
            }
            PathDenied {
                path: path.to_path_buf(),
                reason,
            }
        };

        let canonical = match access {
            Access::Read => resolve_existing(path),
            Access::Write => resolve_for_write(path),
        }
        .map_err(&deny)?;

        // Deny-list wins over the allow-list
        if let Some(entry) = self
            .denied
            .iter()
            .find(|entry| contains_fragment(&canonical, entry))
        {
            return Err(deny(DenyReason::SensitivePath(entry.clone())));
        }

        if !self.roots.iter().any(|root| canonical.starts_with(root)) {
            return Err(deny(DenyReason::OutsideAllowedRoots));
        }

        Ok(canonical)
    }
}

/// Whether the normal components of `entry` appear as a contiguous run in `path`
///
/// `/srv/backup/etc/shadow` contains `/etc/shadow`; `/rootless` does not
/// contain `/root`.
fn contains_fragment(path: &Path, entry: &Path) -> bool {
    let needle = normal_components(entry);
    if needle.is_empty() {
        return true;
    }
    let haystack = normal_components(path);
    haystack
        .windows(needle.len())
        .any(|window| window == needle.as_slice())
}

fn normal_components(path: &Path) -> Vec<&OsStr> {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect()
}

fn resolve_existing(path: &Path) -> Result<PathBuf, DenyReason> {
    if path.as_os_str().is_empty() {
        return Err(DenyReason::Unresolvable("empty path".to_string()));
    }
    path.canonicalize().map_err(|e| unresolvable(&e))
}

/// Canonicalize the deepest existing ancestor and re-append the rest
fn resolve_for_write(path: &Path) -> Result<PathBuf, DenyReason> {
    if path.as_os_str().is_empty() {
        return Err(DenyReason::Unresolvable("empty path".to_string()));
    }

    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().map_err(|e| unresolvable(&e))?.join(path)
    };

    // symlink_metadata so that a dangling link counts as existing and fails below
    let Some(existing) = absolute
        .ancestors()
        .find(|ancestor| ancestor.symlink_metadata().is_ok())
    else {
        return Err(DenyReason::Unresolvable("no existing ancestor".to_string()));
    };

    let base = existing.canonicalize().map_err(|e| unresolvable(&e))?;
    let remainder = absolute
        .strip_prefix(existing)
        .map_err(|e| DenyReason::Unresolvable(e.to_string()))?;

    let mut resolved = base;
    for component in remainder.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            _ => {
                return Err(DenyReason::Unresolvable(format!(
                    "'{}' in a not-yet-existing part of the path",
                    component.as_os_str().to_string_lossy()
                )));
            }
        }
    }

    Ok(resolved)
}

fn unresolvable(e: &io::Error) -> DenyReason {
    DenyReason::Unresolvable(e.to_string())
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .filter(|home| !home.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathBuf) {
        let temp = TempDir::new().unwrap();
        let alice = temp.path().join("alice");
        fs::create_dir_all(alice.join("project")).unwrap();
        fs::write(alice.join("project/file.txt"), "hi").unwrap();
        fs::create_dir_all(temp.path().join("alice2")).unwrap();
        fs::write(temp.path().join("alice2/file.txt"), "other").unwrap();
        (temp, alice)
    }

    #[test]
    fn test_inside_root_is_canonical() {
        let (_temp, alice) = setup();
        let guard = PathGuard::new([&alice]);

        let result = guard.authorize_read(alice.join("project/./file.txt")).unwrap();
        assert_eq!(result, alice.join("project/file.txt").canonicalize().unwrap());
    }

    #[test]
    fn test_root_itself_is_allowed() {
        let (_temp, alice) = setup();
        let guard = PathGuard::new([&alice]);
        assert!(guard.authorize_read(&alice).is_ok());
    }

    #[test]
    fn test_sibling_prefix_rejected() {
        let (temp, alice) = setup();
        let guard = PathGuard::new([&alice]);

        let err = guard
            .authorize_read(temp.path().join("alice2/file.txt"))
            .unwrap_err();
        assert_eq!(err.reason, DenyReason::OutsideAllowedRoots);
    }

    #[test]
    fn test_traversal_rejected_after_canonicalization() {
        let (_temp, alice) = setup();
        let guard = PathGuard::new([&alice]);

        let escape = alice.join("../alice2/file.txt");
        assert!(escape.exists());
        let err = guard.authorize_read(&escape).unwrap_err();
        assert_eq!(err.reason, DenyReason::OutsideAllowedRoots);
    }

    #[test]
    fn test_missing_file_is_unresolvable_for_read() {
        let (_temp, alice) = setup();
        let guard = PathGuard::new([&alice]);

        let err = guard.authorize_read(alice.join("nope.txt")).unwrap_err();
        assert!(matches!(err.reason, DenyReason::Unresolvable(_)));
        assert!(err.to_string().contains("unresolvable"));
    }

    #[test]
    fn test_write_to_new_file() {
        let (_temp, alice) = setup();
        let guard = PathGuard::new([&alice]);

        let target = alice.join("project/new/dir/out.txt");
        let result = guard.authorize_write(&target).unwrap();
        assert_eq!(
            result,
            alice.canonicalize().unwrap().join("project/new/dir/out.txt")
        );
    }

    #[test]
    fn test_write_traversal_in_missing_part_rejected() {
        let (_temp, alice) = setup();
        let guard = PathGuard::new([&alice]);

        let err = guard
            .authorize_write(alice.join("missing/../../alice2/x.txt"))
            .unwrap_err();
        assert!(matches!(err.reason, DenyReason::Unresolvable(_)));
    }

    #[test]
    fn test_write_outside_root_rejected() {
        let (temp, alice) = setup();
        let guard = PathGuard::new([&alice]);

        let err = guard
            .authorize_write(temp.path().join("alice2/new.txt"))
            .unwrap_err();
        assert_eq!(err.reason, DenyReason::OutsideAllowedRoots);
    }

    #[test]
    fn test_extra_deny_wins_over_root() {
        let (_temp, alice) = setup();
        let secrets = alice.join("secrets");
        fs::create_dir_all(&secrets).unwrap();
        fs::write(secrets.join("key.pem"), "k").unwrap();

        let guard = PathGuard::new([&alice]).with_denied([&secrets]);
        let err = guard.authorize_read(secrets.join("key.pem")).unwrap_err();
        assert!(matches!(err.reason, DenyReason::SensitivePath(_)));

        // Siblings of the denied directory are unaffected
        assert!(guard.authorize_read(alice.join("project/file.txt")).is_ok());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_builtin_deny_list() {
        let guard = PathGuard::new(["/"]);
        let err = guard.authorize_read("/etc/passwd").unwrap_err();
        assert_eq!(
            err.reason,
            DenyReason::SensitivePath(PathBuf::from("/etc/passwd"))
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_rejected() {
        let (temp, alice) = setup();
        let link = alice.join("link");
        std::os::unix::fs::symlink(temp.path().join("alice2"), &link).unwrap();

        let guard = PathGuard::new([&alice]);
        let err = guard.authorize_read(link.join("file.txt")).unwrap_err();
        assert_eq!(err.reason, DenyReason::OutsideAllowedRoots);
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_unresolvable() {
        let (_temp, alice) = setup();
        let link = alice.join("dangling");
        std::os::unix::fs::symlink(alice.join("gone"), &link).unwrap();

        let guard = PathGuard::new([&alice]);
        assert!(matches!(
            guard.authorize_read(&link).unwrap_err().reason,
            DenyReason::Unresolvable(_)
        ));
        assert!(matches!(
            guard.authorize_write(&link).unwrap_err().reason,
            DenyReason::Unresolvable(_)
        ));
    }

    #[test]
    fn test_no_roots_denies_everything() {
        let (_temp, alice) = setup();
        let guard = PathGuard::new([alice.join("does-not-exist")]);
        assert!(guard.allowed_roots().is_empty());
        assert!(guard.authorize_read(alice.join("project/file.txt")).is_err());
    }

    #[test]
    fn test_empty_path() {
        let (_temp, alice) = setup();
        let guard = PathGuard::new([&alice]);
        assert!(guard.authorize_read("").is_err());
        assert!(guard.authorize_write("").is_err());
    }

    #[test]
    fn test_denials_are_audited() {
        let (temp, alice) = setup();
        let log_path = temp.path().join("audit.log");
        let logger = Arc::new(AuditLogger::with_path(&log_path).unwrap());
        let guard = PathGuard::new([&alice]).with_audit(logger);

        assert!(guard.authorize_read(alice.join("project/file.txt")).is_ok());
        assert!(guard.authorize_read(temp.path()).is_err());

        let content = fs::read_to_string(&log_path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.contains("REFUSED:path"));
        assert!(content.contains("outside allowed roots"));
    }

    #[test]
    fn test_nested_sensitive_fragment_denied() {
        let (_temp, alice) = setup();
        fs::create_dir_all(alice.join("backup/etc")).unwrap();
        fs::write(alice.join("backup/etc/shadow"), "root:*:").unwrap();
        fs::write(alice.join("backup/etc/shadowed.txt"), "fine").unwrap();
        fs::create_dir_all(alice.join("rootless")).unwrap();

        let guard = PathGuard::new([&alice]);
        let err = guard
            .authorize_read(alice.join("backup/etc/shadow"))
            .unwrap_err();
        assert_eq!(
            err.reason,
            DenyReason::SensitivePath(PathBuf::from("/etc/shadow"))
        );
        assert!(
            guard
                .authorize_write(alice.join("backup/etc/shadow/new"))
                .is_err()
        );

        // Partial component names are not fragments
        assert!(guard.authorize_read(alice.join("backup/etc/shadowed.txt")).is_ok());
        assert!(guard.authorize_read(alice.join("rootless")).is_ok());
    }

    #[test]
    fn test_contains_fragment() {
        assert!(contains_fragment(Path::new("/etc/passwd"), Path::new("/etc/passwd")));
        assert!(contains_fragment(
            Path::new("/srv/copy/etc/passwd/x"),
            Path::new("/etc/passwd")
        ));
        assert!(!contains_fragment(Path::new("/etc/passwd.d"), Path::new("/etc/passwd")));
        assert!(!contains_fragment(Path::new("/etc/x/passwd"), Path::new("/etc/passwd")));
        assert!(!contains_fragment(Path::new("/rootless/a"), Path::new("/root")));
    }
}
