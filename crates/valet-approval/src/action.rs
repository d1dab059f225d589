//! Action categories and bespoke classifiers.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Side-effect classification of a tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCategory {
    /// Local read-only access.
    Read,
    /// Local mutation.
    Write,
    /// Local deletion.
    Delete,
    /// Outbound network read.
    NetworkRead,
    /// Outbound network write.
    NetworkWrite,
}

impl ActionCategory {
    /// Whether calls in this category need user approval.
    #[must_use]
    pub fn requires_approval(self) -> bool {
        !matches!(self, Self::Read | Self::NetworkRead)
    }

    /// Stable snake_case key, as written to the audit log.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::NetworkRead => "network_read",
            Self::NetworkWrite => "network_write",
        }
    }

    /// Parse a category key (used for dynamically registered tools).
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "read" => Some(Self::Read),
            "write" => Some(Self::Write),
            "delete" => Some(Self::Delete),
            "network_read" => Some(Self::NetworkRead),
            "network_write" => Some(Self::NetworkWrite),
            _ => None,
        }
    }
}

impl fmt::Display for ActionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Read-only shell commands that are auto-approved.
fn read_command_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(ls|cat|head|tail|wc|find|grep|rg|which|whoami|pwd|echo|date|file|stat|du|df|env|printenv|uname)\b",
        )
        .expect("valid command regex")
    })
}

/// Classify a shell command by its leading token.
#[must_use]
pub fn classify_shell_command(command: &str) -> ActionCategory {
    let cmd = command.trim_start();
    if read_command_re().is_match(cmd) {
        return ActionCategory::Read;
    }
    if cmd.starts_with("rm ") || cmd.starts_with("rm\t") || cmd.starts_with("rmdir ") {
        return ActionCategory::Delete;
    }
    ActionCategory::Write
}

/// Classify an HTTP method.
#[must_use]
pub fn classify_http_method(method: &str) -> ActionCategory {
    if method.eq_ignore_ascii_case("GET") {
        ActionCategory::NetworkRead
    } else {
        ActionCategory::NetworkWrite
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_approval() {
        assert!(!ActionCategory::Read.requires_approval());
        assert!(!ActionCategory::NetworkRead.requires_approval());
        assert!(ActionCategory::Write.requires_approval());
        assert!(ActionCategory::Delete.requires_approval());
        assert!(ActionCategory::NetworkWrite.requires_approval());
    }

    #[test]
    fn test_shell_read_commands() {
        for cmd in ["ls -la", "cat /etc/hostname", "grep foo bar.txt", "pwd"] {
            assert_eq!(classify_shell_command(cmd), ActionCategory::Read, "{cmd}");
        }
    }

    #[test]
    fn test_shell_delete_commands() {
        assert_eq!(
            classify_shell_command("rm -rf /tmp/x"),
            ActionCategory::Delete
        );
        assert_eq!(classify_shell_command("rmdir empty"), ActionCategory::Delete);
    }

    #[test]
    fn test_shell_write_fallback() {
        assert_eq!(
            classify_shell_command("touch /tmp/file"),
            ActionCategory::Write
        );
        // Prefix must be a whole word: "lsof" is not "ls".
        assert_eq!(classify_shell_command("lsof -i"), ActionCategory::Write);
    }

    #[test]
    fn test_http_methods() {
        assert_eq!(classify_http_method("GET"), ActionCategory::NetworkRead);
        assert_eq!(classify_http_method("get"), ActionCategory::NetworkRead);
        assert_eq!(classify_http_method("POST"), ActionCategory::NetworkWrite);
        assert_eq!(classify_http_method("DELETE"), ActionCategory::NetworkWrite);
    }

    #[test]
    fn test_category_keys_roundtrip() {
        for cat in [
            ActionCategory::Read,
            ActionCategory::Write,
            ActionCategory::Delete,
            ActionCategory::NetworkRead,
            ActionCategory::NetworkWrite,
        ] {
            assert_eq!(ActionCategory::from_key(cat.as_str()), Some(cat));
        }
        assert_eq!(ActionCategory::from_key("bogus"), None);
    }
}
