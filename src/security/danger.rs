use crate::command::parser::ParsedCommand;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use tracing::debug;

/// Bumped whenever a row is added, removed or reordered
pub const CATALOG_VERSION: u32 = 1;

/// How destructive a command is judged to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RiskTier {
    Safe,
    RequiresConfirmation,
    Blocked,
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskTier::Safe => write!(f, "safe"),
            RiskTier::RequiresConfirmation => write!(f, "requires confirmation"),
            RiskTier::Blocked => write!(f, "blocked"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Executable after explicit confirmation
    Confirm,
    /// Never executable
    Block,
}

/// One catalog row. `pattern` is matched against the lowercased argv joined
/// with single spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DangerPattern {
    pub name: &'static str,
    pub pattern: &'static str,
    pub description: &'static str,
    pub severity: Severity,
}

const fn row(
    name: &'static str,
    pattern: &'static str,
    description: &'static str,
    severity: Severity,
) -> DangerPattern {
    DangerPattern {
        name,
        pattern,
        description,
        severity,
    }
}

/// Known-destructive command shapes. Order matters: the first match wins,
/// so every `Block` row precedes the `Confirm` rows it overlaps with.
pub const DANGER_PATTERNS: &[DangerPattern] = &[
    // Unconditionally destructive
    row(
        "fork-bomb",
        r":\s*\(\s*\)\s*\{[^}]*:\s*\|\s*:\s*&|%0\s*\|\s*%0",
        "Fork bomb: exhausts process table and memory",
        Severity::Block,
    ),
    row(
        "recursive-delete-root",
        r"(?:^|[\s/])rm\s(?:.*\s)?-[a-z-]*r[a-z-]*\s(?:.*\s)?(?:/|/\*|~|~/|~/\*|\$home)(?:\s|$)",
        "Recursive removal of the filesystem root or home directory",
        Severity::Block,
    ),
    row(
        "delete-drive-root",
        r"(?:^|\s)(?:rd|rmdir|del|erase)\s(?:.*\s)?[a-z]:\\?\*?(?:\s|$)",
        "Deletion targeting the root of a drive",
        Severity::Block,
    ),
    row(
        "overwrite-block-device",
        r"(?:\bof=|>\s*)/dev/(?:sd[a-z]\d*|hd[a-z]\d*|vd[a-z]\d*|xvd[a-z]\d*|nvme\d+n\d+(?:p\d+)?|mmcblk\d+(?:p\d+)?|r?disk\d+(?:s\d+)?)(?:\s|$)",
        "Raw write over a disk or partition device",
        Severity::Block,
    ),
    // Destructive but sometimes intended
    row(
        "recursive-delete",
        r"(?:^|[\s/])rm\s(?:.*\s)?(?:-[a-z]*r[a-z]*|--recursive)(?:\s|$)",
        "Recursive file removal",
        Severity::Confirm,
    ),
    row(
        "windows-recursive-delete",
        r"(?:^|\s)(?:del|erase|rd|rmdir)\s(?:.*\s)?/s(?:\s|$)",
        "Recursive file removal (cmd.exe)",
        Severity::Confirm,
    ),
    row(
        "powershell-recursive-delete",
        r"(?:^|\s)remove-item\s.*-recurse",
        "Recursive file removal (PowerShell)",
        Severity::Confirm,
    ),
    row(
        "raw-disk-write",
        r"(?:^|[\s/])(?:dd\s(?:.*\s)?(?:if|of)=|shred\s|wipefs\s)",
        "Raw device or disk level I/O",
        Severity::Confirm,
    ),
    row(
        "filesystem-format",
        r"(?:^|[\s/])(?:mkfs(?:\.[a-z0-9]+)?|mke2fs|mkswap|newfs(?:_[a-z]+)?)(?:\s|$)|(?:^|\s)format(?:\.com|\.exe)?\s+[a-z]:",
        "Creates a new filesystem, wiping existing data",
        Severity::Confirm,
    ),
    row(
        "disk-partitioning",
        r"(?:^|[\s/])(?:fdisk|sfdisk|gdisk|parted|diskpart(?:\.exe)?|diskutil\s+(?:erase\w*|partitiondisk))(?:\s|$)",
        "Rewrites disk partition tables",
        Severity::Confirm,
    ),
    row(
        "privilege-escalation",
        r"(?:^|[\s/])(?:sudo|su|doas|pkexec|runas(?:\.exe)?)(?:\s|$)",
        "Runs a command with superuser privileges",
        Severity::Confirm,
    ),
    row(
        "recursive-permission-root",
        r"(?:^|[\s/])(?:chmod|chown|chgrp)\s(?:.*\s)?(?:-[a-z]*r[a-z]*|--recursive)\s(?:.*\s)?/(?:\s|$)",
        "Recursive permission or ownership change from the filesystem root",
        Severity::Confirm,
    ),
    row(
        "power-state",
        r"(?:^|[\s/])(?:shutdown(?:\.exe)?|reboot|halt|poweroff|init\s+[06])(?:\s|$)",
        "Shuts down or restarts the machine",
        Severity::Confirm,
    ),
    row(
        "nested-posix-shell",
        r"(?:^|[\s/])(?:sh|bash|zsh|dash|ksh|fish)\s(?:.*\s)?-[a-z]*c(?:\s|$)",
        "Hands a string to a shell interpreter",
        Severity::Confirm,
    ),
    row(
        "nested-windows-shell",
        r"(?:^|[\s\\])(?:cmd|powershell|pwsh)(?:\.exe)?\s(?:.*\s)?(?:/c|/k|-c|-command|-encodedcommand|-ec)(?:\s|$)",
        "Hands a string to a shell interpreter",
        Severity::Confirm,
    ),
];

/// The result of classifying one command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub tier: RiskTier,
    pub pattern: Option<&'static DangerPattern>,
}

impl Classification {
    pub fn is_safe(&self) -> bool {
        self.tier == RiskTier::Safe
    }

    /// The matched row's description, for prompts and audit entries
    pub fn reason(&self) -> Option<&'static str> {
        self.pattern.map(|p| p.description)
    }
}

/// A compiled, read-only danger pattern table
#[derive(Debug)]
pub struct DangerCatalog {
    rows: Vec<(&'static DangerPattern, Regex)>,
}

static BUILTIN: LazyLock<DangerCatalog> = LazyLock::new(|| {
    DangerCatalog::new(DANGER_PATTERNS).expect("built-in danger patterns must compile")
});

impl DangerCatalog {
    /// Compile a catalog from a static table
    pub fn new(patterns: &'static [DangerPattern]) -> Result<Self, regex::Error> {
        let rows = patterns
            .iter()
            .map(|p| Regex::new(p.pattern).map(|re| (p, re)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rows })
    }

    /// The process-wide catalog built from `DANGER_PATTERNS`
    pub fn builtin() -> &'static DangerCatalog {
        &BUILTIN
    }

    pub fn patterns(&self) -> impl Iterator<Item = &'static DangerPattern> + '_ {
        self.rows.iter().map(|(p, _)| *p)
    }

    pub fn classify(&self, command: &ParsedCommand) -> Classification {
        self.classify_argv(command.argv())
    }

    /// Classify a raw argument vector, case-insensitively
    pub fn classify_argv<S: AsRef<str>>(&self, argv: &[S]) -> Classification {
        let joined = argv
            .iter()
            .map(|s| s.as_ref())
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();

        for (pattern, re) in &self.rows {
            if re.is_match(&joined) {
                debug!("Command matched danger pattern '{}': {}", pattern.name, joined);
                let tier = match pattern.severity {
                    Severity::Confirm => RiskTier::RequiresConfirmation,
                    Severity::Block => RiskTier::Blocked,
                };
                return Classification {
                    tier,
                    pattern: Some(*pattern),
                };
            }
        }

        Classification {
            tier: RiskTier::Safe,
            pattern: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::parser::{CommandParser, Platform};

    fn classify(line: &str) -> Classification {
        let cmd = CommandParser::new(Platform::Posix).parse(line).unwrap();
        DangerCatalog::builtin().classify(&cmd)
    }

    fn classify_windows(line: &str) -> Classification {
        let cmd = CommandParser::new(Platform::Windows).parse(line).unwrap();
        DangerCatalog::builtin().classify(&cmd)
    }

    fn name(c: &Classification) -> &'static str {
        c.pattern.map(|p| p.name).unwrap_or("none")
    }

    #[test]
    fn test_builtin_patterns_compile() {
        let catalog = DangerCatalog::new(DANGER_PATTERNS).unwrap();
        assert_eq!(catalog.patterns().count(), DANGER_PATTERNS.len());
    }

    #[test]
    fn test_safe_commands() {
        for line in [
            "ls -la",
            "git status",
            "cargo test --release",
            "grep -r TODO src",
            "rm file.txt",
            "echo format",
            "cat /dev/null",
            "dd --version",
            "bash script.sh",
        ] {
            let c = classify(line);
            assert_eq!(c.tier, RiskTier::Safe, "{} matched {}", line, name(&c));
            assert!(c.is_safe());
        }
    }

    #[test]
    fn test_rm_rf_root_blocked() {
        for line in ["rm -rf /", "rm -fr /*", "/bin/rm -Rf ~", "rm --recursive --force /"] {
            let c = classify(line);
            assert_eq!(c.tier, RiskTier::Blocked, "{}", line);
            assert_eq!(name(&c), "recursive-delete-root");
        }
    }

    #[test]
    fn test_recursive_delete_requires_confirmation() {
        for line in ["rm -rf build", "rm -r -f target/", "RM -RF node_modules", "rm --recursive tmp"] {
            let c = classify(line);
            assert_eq!(c.tier, RiskTier::RequiresConfirmation, "{}", line);
            assert_eq!(name(&c), "recursive-delete");
        }
    }

    #[test]
    fn test_fork_bomb_blocked() {
        let c = classify("bash -c ':(){ :|:& };:'");
        assert_eq!(c.tier, RiskTier::Blocked);
        assert_eq!(name(&c), "fork-bomb");
    }

    #[test]
    fn test_raw_device_writes() {
        let c = classify("dd if=/dev/zero of=/dev/sda bs=1M");
        assert_eq!(c.tier, RiskTier::Blocked);
        assert_eq!(name(&c), "overwrite-block-device");

        let c = classify("dd if=disk.img of=backup.img");
        assert_eq!(c.tier, RiskTier::RequiresConfirmation);
        assert_eq!(name(&c), "raw-disk-write");
    }

    #[test]
    fn test_format_and_partitioning() {
        assert_eq!(name(&classify("mkfs.ext4 /dev/sdb1")), "filesystem-format");
        assert_eq!(name(&classify("sudo mkfs -t xfs /dev/sdc")), "filesystem-format");
        assert_eq!(name(&classify("fdisk /dev/sdb")), "disk-partitioning");
        assert_eq!(name(&classify_windows("format D: /q")), "filesystem-format");
    }

    #[test]
    fn test_privilege_escalation() {
        for line in ["sudo apt-get install vim", "SUDO ls", "su -", "doas reboot", "pkexec bash"] {
            let c = classify(line);
            assert_eq!(c.tier, RiskTier::RequiresConfirmation, "{}", line);
        }
        assert_eq!(name(&classify("sudo ls")), "privilege-escalation");
        // Not a substring match
        assert!(classify("sudoku --solve").is_safe());
    }

    #[test]
    fn test_windows_deletes() {
        let c = classify_windows(r"del /f /s /q C:\");
        assert_eq!(c.tier, RiskTier::Blocked);

        let c = classify_windows(r"rd /s /q build");
        assert_eq!(c.tier, RiskTier::RequiresConfirmation);
        assert_eq!(name(&c), "windows-recursive-delete");

        let c = classify_windows("powershell Remove-Item -Path out -Recurse -Force");
        assert_eq!(c.tier, RiskTier::RequiresConfirmation);
    }

    #[test]
    fn test_nested_shell_requires_confirmation() {
        assert_eq!(name(&classify("sh -c 'ls; whoami'")), "nested-posix-shell");
        assert_eq!(name(&classify("bash -lc env")), "nested-posix-shell");
        assert_eq!(
            name(&classify_windows("cmd.exe /c dir")),
            "nested-windows-shell"
        );
    }

    #[test]
    fn test_first_match_wins() {
        // sudo comes first in the command, but the Block row comes first in the catalog
        let c = classify("sudo rm -rf /");
        assert_eq!(c.tier, RiskTier::Blocked);
    }

    #[test]
    fn test_tier_ordering() {
        assert!(RiskTier::Safe < RiskTier::RequiresConfirmation);
        assert!(RiskTier::RequiresConfirmation < RiskTier::Blocked);
    }

    #[test]
    fn test_custom_catalog() {
        static ONLY_CURL: &[DangerPattern] = &[row(
            "network-fetch",
            r"^curl\s",
            "Fetches from the network",
            Severity::Confirm,
        )];
        let catalog = DangerCatalog::new(ONLY_CURL).unwrap();
        let c = catalog.classify_argv(&["curl", "https://example.com"]);
        assert_eq!(c.tier, RiskTier::RequiresConfirmation);
        assert_eq!(c.reason(), Some("Fetches from the network"));
        assert!(catalog.classify_argv(&["rm", "-rf", "/"]).is_safe());
    }
}
