//! JSONL file storage for audit entries.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

use crate::entry::AuditEntry;
use crate::error::AuditResult;
use crate::sanitize::{sanitize_string, sanitize_value};

/// Append-only JSONL audit logger.
///
/// Entries are sanitised on the way in; writes are serialised so concurrent
/// tool executions never interleave lines.
#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl AuditLog {
    /// Create a logger writing to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created.
    pub fn new(path: impl AsRef<Path>) -> AuditResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    /// Append one entry as a JSON line.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the file append fails.
    pub fn append(&self, entry: AuditEntry) -> AuditResult<()> {
        let sanitised = Self::sanitise_entry(entry);
        let line = serde_json::to_string(&sanitised)?;

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Append, logging (not propagating) failures. Audit write problems
    /// must never break tool execution.
    pub fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.append(entry) {
            warn!(error = %e, path = %self.path.display(), "failed to write audit entry");
        }
    }

    /// Read every entry back (tests, inspection commands).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read. Malformed lines are
    /// skipped.
    pub fn read_all(&self) -> AuditResult<Vec<AuditEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = std::fs::File::open(&self.path)?;
        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(error = %e, "skipping malformed audit line"),
            }
        }
        Ok(entries)
    }

    fn sanitise_entry(mut entry: AuditEntry) -> AuditEntry {
        entry.input = entry.input.as_ref().map(sanitize_value);
        entry.output = entry.output.as_ref().map(sanitize_value);
        entry.error = entry.error.as_deref().map(sanitize_string);
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn log_in(dir: &tempfile::TempDir) -> AuditLog {
        AuditLog::new(dir.path().join("logs").join("audit.jsonl")).unwrap()
    }

    #[test]
    fn test_append_and_read_back() {
        let dir = tempdir().unwrap();
        let log = log_in(&dir);

        log.append(AuditEntry::tool_call(
            "cli",
            "echo",
            json!({"text": "hi"}),
            json!({"result": "Echo: hi"}),
            "read",
            false,
            3,
        ))
        .unwrap();
        log.append(AuditEntry::tool_denied(
            "cli",
            "shell_exec",
            json!({"command": "rm -rf /tmp/x"}),
            "delete",
        ))
        .unwrap();

        let entries = log.read_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event_type, "tool_call");
        assert_eq!(entries[1].event_type, "tool_denied");
        assert_eq!(entries[1].action_category.as_deref(), Some("delete"));
    }

    #[test]
    fn test_values_sanitised_on_write() {
        let dir = tempdir().unwrap();
        let log = log_in(&dir);

        log.append(
            AuditEntry::new("tool_error")
                .with_tool("shell_exec")
                .with_input(json!({"command": "\x1b[31mrm\x1b[0m -rf"}))
                .with_error("\x1b[1mboom\x1b[0m"),
        )
        .unwrap();

        let entries = log.read_all().unwrap();
        assert_eq!(entries[0].input.as_ref().unwrap()["command"], "rm -rf");
        assert_eq!(entries[0].error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_long_output_truncated() {
        let dir = tempdir().unwrap();
        let log = log_in(&dir);

        log.append(
            AuditEntry::new("tool_call")
                .with_output(json!({"result": "y".repeat(20_000)})),
        )
        .unwrap();

        let entries = log.read_all().unwrap();
        let recorded = entries[0].output.as_ref().unwrap()["result"]
            .as_str()
            .unwrap();
        assert!(recorded.contains("(truncated, 20000 total)"));
    }

    #[test]
    fn test_read_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let log = log_in(&dir);
        assert!(log.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_record_swallows_errors() {
        // Point at a path whose parent is a file — appends must fail quietly.
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        let log = AuditLog {
            path: blocker.join("audit.jsonl"),
            write_lock: Mutex::new(()),
        };
        log.record(AuditEntry::new("tool_call"));
    }
}
