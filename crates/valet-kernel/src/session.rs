//! Per-transport conversation sessions.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

use valet_core::short_hex_id;
use valet_llm::Message;

/// One conversation's state: message history plus the tool calls made in
/// the most recent exchange.
#[derive(Debug, Clone)]
pub struct Session {
    /// Session id (12 hex chars).
    pub id: String,
    /// Full message history.
    pub messages: Vec<Message>,
    /// Tool calls recorded since the last clear.
    pub tool_calls: Vec<Value>,
}

impl Session {
    fn new() -> Self {
        Self {
            id: short_hex_id(12),
            messages: Vec::new(),
            tool_calls: Vec::new(),
        }
    }

    /// The trailing `max` messages, for context assembly.
    #[must_use]
    pub fn context_messages(&self, max: usize) -> Vec<Message> {
        let start = self.messages.len().saturating_sub(max);
        self.messages[start..].to_vec()
    }
}

/// Session storage keyed by transport key (`"cli"`, `"telegram:42"`,
/// `"scheduler"`, ...). One active session per key; sessions are created on
/// first use.
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message to a session, creating it if needed.
    pub fn append_message(&self, key: &str, message: Message) {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions
            .entry(key.to_string())
            .or_insert_with(Session::new)
            .messages
            .push(message);
    }

    /// The trailing context window for a session (empty when absent).
    pub fn context(&self, key: &str, max: usize) -> Vec<Message> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map(|s| s.context_messages(max))
            .unwrap_or_default()
    }

    /// Record a tool call made during the current exchange.
    pub fn record_tool_call(&self, key: &str, info: Value) {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions
            .entry(key.to_string())
            .or_insert_with(Session::new)
            .tool_calls
            .push(info);
    }

    /// Tool calls from the most recent exchange.
    pub fn last_tool_calls(&self, key: &str) -> Vec<Value> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map(|s| s.tool_calls.clone())
            .unwrap_or_default()
    }

    /// Clear the recorded tool calls (start of a new exchange).
    pub fn clear_tool_calls(&self, key: &str) {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        if let Some(session) = sessions.get_mut(key) {
            session.tool_calls.clear();
        }
    }

    /// Drop a session entirely.
    pub fn reset(&self, key: &str) {
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}
