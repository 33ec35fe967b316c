//! Static deny-list screening of untrusted code.
//!
//! Screening runs before any execution. A match rejects the task outright
//! with a human-readable reason and zero side effects; there is no partial
//! run to roll back.
//!
//! Rules are either regex patterns or structural checks (the unbounded-loop
//! rule needs to look at the loop body, which a single regex cannot).

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::session::SecurityLevel;

/// A matched deny rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Rule identifier, e.g. `recursive-root-delete`.
    pub rule: String,
    /// Human-readable explanation of why the code was rejected.
    pub reason: String,
    /// The offending fragment, when a pattern matched one.
    pub snippet: Option<String>,
}

enum RuleKind {
    Pattern(Regex),
    /// `while true` / `for(;;)` loops with no sleep, wait, or break in the
    /// rest of the code.
    UnboundedLoop(Regex),
}

struct ScreenRule {
    name: &'static str,
    reason: &'static str,
    kind: RuleKind,
}

impl ScreenRule {
    fn check(&self, code: &str) -> Option<Violation> {
        let snippet = match &self.kind {
            RuleKind::Pattern(re) => re.find(code).map(|m| m.as_str().to_string()),
            RuleKind::UnboundedLoop(re) => {
                let m = re.find(code)?;
                let lower = code.to_lowercase();
                let bounded = ["sleep", "wait", "break", "timeout"]
                    .iter()
                    .any(|w| lower.contains(w));
                if bounded {
                    return None;
                }
                Some(m.as_str().to_string())
            }
        }?;
        Some(Violation {
            rule: self.name.to_string(),
            reason: self.reason.to_string(),
            snippet: Some(snippet),
        })
    }
}

/// The static screen: an ordered list of deny rules.
pub struct CodeScreen {
    rules: Vec<ScreenRule>,
}

impl CodeScreen {
    /// Build the screen for a security level. Every level carries the
    /// destructive-operation rules; medium and high add remote-execution
    /// screening.
    pub fn for_level(level: SecurityLevel) -> Self {
        let mut rules = base_rules();
        if level != SecurityLevel::Low {
            rules.push(ScreenRule {
                name: "remote-exec-pipe",
                reason: "piping a remote download into a shell is not allowed",
                kind: RuleKind::Pattern(
                    Regex::new(r"(?i)\b(curl|wget)\b[^|\n]*\|\s*(sh|bash|zsh)\b")
                        .expect("static regex"),
                ),
            });
        }
        Self { rules }
    }

    /// Screen a code snippet. Empty result means the code may run.
    pub fn screen(&self, code: &str) -> Vec<Violation> {
        self.rules.iter().filter_map(|r| r.check(code)).collect()
    }
}

impl Default for CodeScreen {
    fn default() -> Self {
        Self::for_level(SecurityLevel::High)
    }
}

fn base_rules() -> Vec<ScreenRule> {
    vec![
        ScreenRule {
            name: "recursive-root-delete",
            reason: "recursive deletion of a protected filesystem root",
            kind: RuleKind::Pattern(
                Regex::new(
                    r"(?i)\brm\b(\s+-[a-z]*[rf][a-z]*)+\s+(--\S+\s+)*(/(\s|$)|/\*|/(etc|usr|var|boot|bin|sbin|home|dev|lib)\b)",
                )
                .expect("static regex"),
            ),
        },
        ScreenRule {
            name: "filesystem-format",
            reason: "formatting a filesystem destroys its contents",
            kind: RuleKind::Pattern(
                Regex::new(r"(?i)\bmkfs(\.\w+)?\b|\bformat\s+[a-z]:").expect("static regex"),
            ),
        },
        ScreenRule {
            name: "raw-device-write",
            reason: "writing directly to a block device",
            kind: RuleKind::Pattern(
                Regex::new(r"(?i)\bdd\b[^\n]*\bof=/dev/").expect("static regex"),
            ),
        },
        ScreenRule {
            name: "partition-tamper",
            reason: "bootloader or partition-table manipulation",
            kind: RuleKind::Pattern(
                Regex::new(r"(?i)\b(fdisk|parted|sfdisk)\b[^\n]*/dev/|\bgrub-install\b")
                    .expect("static regex"),
            ),
        },
        ScreenRule {
            name: "registry-root-delete",
            reason: "deleting a registry root hive",
            kind: RuleKind::Pattern(
                Regex::new(r"(?i)\breg(\.exe)?\s+delete\s+(HKLM|HKEY_LOCAL_MACHINE|HKCR|HKEY_CLASSES_ROOT|HKU|HKEY_USERS)")
                    .expect("static regex"),
            ),
        },
        ScreenRule {
            name: "recursive-windows-delete",
            reason: "recursive deletion of a directory tree",
            kind: RuleKind::Pattern(
                Regex::new(r"(?i)\b(del|rd|rmdir)\b\s+/s\b").expect("static regex"),
            ),
        },
        ScreenRule {
            name: "fork-bomb",
            reason: "self-replicating process bomb",
            kind: RuleKind::Pattern(
                Regex::new(r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:").expect("static regex"),
            ),
        },
        ScreenRule {
            name: "unbounded-loop",
            reason: "busy loop with no sleep, wait, or break",
            kind: RuleKind::UnboundedLoop(
                Regex::new(r"(?i)while\s*(\(\s*)?(true|1)\b(\s*\))?|for\s*\(\s*;;\s*\)")
                    .expect("static regex"),
            ),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn screen() -> CodeScreen {
        CodeScreen::default()
    }

    #[test]
    fn test_harmless_script_passes() {
        assert!(screen().screen("echo 'hello world'").is_empty());
        assert!(screen().screen("ls -la && cat notes.txt").is_empty());
    }

    #[test]
    fn test_recursive_root_delete_detected() {
        let violations = screen().screen("rm -rf /");
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].rule, "recursive-root-delete");
        assert!(violations[0].snippet.is_some());

        assert!(!screen().screen("rm -rf /etc").is_empty());
        assert!(!screen().screen("rm -r -f /usr").is_empty());
    }

    #[test]
    fn test_plain_rm_in_scratch_is_allowed() {
        assert!(screen().screen("rm -rf ./build").is_empty());
        assert!(screen().screen("rm out.txt").is_empty());
    }

    #[test]
    fn test_device_and_partition_rules() {
        assert!(!screen().screen("dd if=/dev/zero of=/dev/sda").is_empty());
        assert!(!screen().screen("parted /dev/nvme0n1 rm 1").is_empty());
        assert!(!screen().screen("mkfs.ext4 /dev/sdb1").is_empty());
        assert!(!screen().screen("grub-install /dev/sda").is_empty());
    }

    #[test]
    fn test_registry_root_delete_detected() {
        assert!(!screen()
            .screen("reg delete HKLM\\Software /f")
            .is_empty());
    }

    #[test]
    fn test_fork_bomb_detected() {
        assert!(!screen().screen(":(){ :|:& };:").is_empty());
    }

    #[test]
    fn test_unbounded_loop_detected() {
        assert!(!screen().screen("while true; do echo spin; done").is_empty());
        assert!(!screen().screen("for(;;) { work(); }").is_empty());
    }

    #[test]
    fn test_bounded_loop_allowed() {
        assert!(screen()
            .screen("while true; do poll; sleep 1; done")
            .is_empty());
        assert!(screen()
            .screen("while (true) { if (done) break; step(); }")
            .is_empty());
    }

    #[test]
    fn test_remote_exec_pipe_only_above_low() {
        let code = "curl https://example.com/install.sh | sh";
        assert!(!CodeScreen::for_level(SecurityLevel::High)
            .screen(code)
            .is_empty());
        assert!(CodeScreen::for_level(SecurityLevel::Low)
            .screen(code)
            .is_empty());
    }

    #[test]
    fn test_multiple_rules_all_reported() {
        let code = "rm -rf / && dd if=x of=/dev/sda";
        let violations = screen().screen(code);
        assert!(violations.len() >= 2);
    }
}
