//! Audit entry shape and per-event constructors.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use valet_core::Timestamp;

/// A single audit log entry. One JSON object per line on disk; optional
/// fields are omitted entirely when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When this entry was created (UTC, RFC 3339).
    pub timestamp: Timestamp,
    /// Event kind: `tool_call`, `tool_denied`, `tool_error`, ...
    pub event_type: String,
    /// Session the event belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Tool involved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Tool input.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    /// Tool output (typically truncated by the caller).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Action category of the call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_category: Option<String>,
    /// Whether approval was required.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_required: Option<bool>,
    /// Handler wall-clock in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Error message for failed operations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditEntry {
    /// Create a bare entry of the given kind.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            timestamp: Timestamp::now(),
            event_type: event_type.into(),
            session_id: None,
            tool_name: None,
            input: None,
            output: None,
            action_category: None,
            approval_required: None,
            duration_ms: None,
            error: None,
        }
    }

    /// A successful tool execution.
    #[must_use]
    pub fn tool_call(
        session_id: &str,
        tool_name: &str,
        input: Value,
        output: Value,
        action_category: &str,
        approval_required: bool,
        duration_ms: u64,
    ) -> Self {
        Self::new("tool_call")
            .with_session(session_id)
            .with_tool(tool_name)
            .with_input(input)
            .with_output(output)
            .with_category(action_category)
            .with_approval_required(approval_required)
            .with_duration_ms(duration_ms)
    }

    /// A tool call denied by the approver.
    #[must_use]
    pub fn tool_denied(
        session_id: &str,
        tool_name: &str,
        input: Value,
        action_category: &str,
    ) -> Self {
        Self::new("tool_denied")
            .with_session(session_id)
            .with_tool(tool_name)
            .with_input(input)
            .with_category(action_category)
            .with_approval_required(true)
    }

    /// A tool handler failure.
    #[must_use]
    pub fn tool_error(
        session_id: &str,
        tool_name: &str,
        input: Value,
        error: &str,
        action_category: &str,
        duration_ms: u64,
    ) -> Self {
        Self::new("tool_error")
            .with_session(session_id)
            .with_tool(tool_name)
            .with_input(input)
            .with_category(action_category)
            .with_duration_ms(duration_ms)
            .with_error(error)
    }

    /// Set the session id (empty strings are dropped).
    #[must_use]
    pub fn with_session(mut self, session_id: &str) -> Self {
        if !session_id.is_empty() {
            self.session_id = Some(session_id.to_string());
        }
        self
    }

    /// Set the tool name.
    #[must_use]
    pub fn with_tool(mut self, tool_name: &str) -> Self {
        self.tool_name = Some(tool_name.to_string());
        self
    }

    /// Set the input payload.
    #[must_use]
    pub fn with_input(mut self, input: Value) -> Self {
        self.input = Some(input);
        self
    }

    /// Set the output payload.
    #[must_use]
    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    /// Set the action category.
    #[must_use]
    pub fn with_category(mut self, category: &str) -> Self {
        self.action_category = Some(category.to_string());
        self
    }

    /// Set the approval-required flag.
    #[must_use]
    pub fn with_approval_required(mut self, required: bool) -> Self {
        self.approval_required = Some(required);
        self
    }

    /// Set the duration.
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Set the error message.
    #[must_use]
    pub fn with_error(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_optional_fields_omitted() {
        let entry = AuditEntry::new("session_started");
        let line = serde_json::to_string(&entry).unwrap();
        assert!(line.contains("\"event_type\":\"session_started\""));
        assert!(!line.contains("tool_name"));
        assert!(!line.contains("error"));
    }

    #[test]
    fn test_tool_call_constructor() {
        let entry = AuditEntry::tool_call(
            "cli",
            "echo",
            json!({"text": "hi"}),
            json!({"result": "Echo: hi"}),
            "read",
            false,
            12,
        );
        assert_eq!(entry.event_type, "tool_call");
        assert_eq!(entry.session_id.as_deref(), Some("cli"));
        assert_eq!(entry.action_category.as_deref(), Some("read"));
        assert_eq!(entry.approval_required, Some(false));
        assert_eq!(entry.duration_ms, Some(12));
    }

    #[test]
    fn test_empty_session_dropped() {
        let entry = AuditEntry::new("tool_call").with_session("");
        assert!(entry.session_id.is_none());
    }

    #[test]
    fn test_denied_entry_flags_approval() {
        let entry = AuditEntry::tool_denied("cli", "shell_exec", json!({}), "delete");
        assert_eq!(entry.event_type, "tool_denied");
        assert_eq!(entry.approval_required, Some(true));
    }
}
