//! Permission manager: classification table plus the approval check.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

use crate::action::{ActionCategory, classify_http_method, classify_shell_command};
use crate::approver::SharedApprover;
use crate::request::PermissionRequest;

/// Checks tool-call permissions, consulting the injected approver when the
/// classified category requires it.
pub struct PermissionManager {
    approver: SharedApprover,
    /// Categories declared by dynamically registered tools.
    tool_categories: RwLock<HashMap<String, ActionCategory>>,
}

fn input_str<'a>(input: &'a Value, key: &str) -> &'a str {
    input.get(key).and_then(Value::as_str).unwrap_or("")
}

fn action_of(input: &Value, default: &'static str) -> String {
    let a = input_str(input, "action");
    if a.is_empty() { default.to_string() } else { a.to_string() }
}

impl PermissionManager {
    /// Create a manager with the given approver.
    #[must_use]
    pub fn new(approver: SharedApprover) -> Self {
        Self {
            approver,
            tool_categories: RwLock::new(HashMap::new()),
        }
    }

    /// Register the action category for a plugin/dynamic tool.
    pub fn register_tool_category(&self, tool_name: &str, category: ActionCategory) {
        self.tool_categories
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(tool_name.to_string(), category);
    }

    /// Classify a tool call into a permission request.
    #[must_use]
    #[allow(clippy::too_many_lines)]
    pub fn classify(&self, tool_name: &str, input: &Value) -> PermissionRequest {
        let req = |category: ActionCategory, description: String| {
            PermissionRequest::new(tool_name, category, input.clone(), description)
        };

        match tool_name {
            "shell_exec" => {
                let cmd = input_str(input, "command");
                req(classify_shell_command(cmd), format!("Execute: {cmd}"))
            },
            "read_file" => req(
                ActionCategory::Read,
                format!("Read: {}", input_str(input, "path")),
            ),
            "write_file" => req(
                ActionCategory::Write,
                format!("Write: {}", input_str(input, "path")),
            ),
            "http_request" => {
                let method = input.get("method").and_then(Value::as_str).unwrap_or("GET");
                req(
                    classify_http_method(method),
                    format!("{method} {}", input_str(input, "url")),
                )
            },
            "memory_search" => req(
                ActionCategory::Read,
                format!("Memory search: {}", input_str(input, "query")),
            ),
            "memory_store" => req(
                ActionCategory::Write,
                format!(
                    "Memory store [{}]: {}",
                    input_str(input, "section"),
                    input_str(input, "fact")
                ),
            ),
            "memory_forget" => req(
                ActionCategory::Delete,
                format!(
                    "Memory forget: {} (scope={})",
                    input_str(input, "query"),
                    input.get("scope").and_then(Value::as_str).unwrap_or("topic")
                ),
            ),
            "update_identity" => {
                let action = action_of(input, "read");
                let category = if action == "read" {
                    ActionCategory::Read
                } else {
                    ActionCategory::Write
                };
                req(category, format!("Identity {action}"))
            },
            "manage_skill" => {
                let action = action_of(input, "list");
                let category = if action == "list" {
                    ActionCategory::Read
                } else {
                    ActionCategory::Write
                };
                req(category, format!("Skill {action}: {}", input_str(input, "name")))
            },
            "manage_agent" => {
                let action = action_of(input, "list");
                let category = match action.as_str() {
                    "list" | "reload" => ActionCategory::Read,
                    "delete" => ActionCategory::Delete,
                    _ => ActionCategory::Write,
                };
                req(category, format!("Agent {action}: {}", input_str(input, "name")))
            },
            "browse_web" => {
                let action = action_of(input, "extract");
                let category = if action == "click" || action == "fill" {
                    ActionCategory::NetworkWrite
                } else {
                    ActionCategory::NetworkRead
                };
                req(
                    category,
                    format!("Browse ({action}): {}", input_str(input, "url")),
                )
            },
            "web_fetch" => req(
                ActionCategory::NetworkRead,
                format!("Fetch: {}", input_str(input, "url")),
            ),
            "pdf_read" => req(
                ActionCategory::NetworkRead,
                format!("PDF: {}", input_str(input, "url")),
            ),
            "arxiv_search" => req(
                ActionCategory::NetworkRead,
                format!("arXiv: {}", input_str(input, "query")),
            ),
            "web_search" => req(
                ActionCategory::NetworkRead,
                format!("Search: {}", input_str(input, "query")),
            ),
            "get_weather" => req(
                ActionCategory::NetworkRead,
                format!("Weather: {}", input_str(input, "location")),
            ),
            "task_status" => req(
                ActionCategory::Read,
                format!("Check task: {}", input_str(input, "task_id")),
            ),
            "send_email" => req(
                ActionCategory::NetworkRead,
                format!("Email: {}", input_str(input, "title")),
            ),
            "run_workflow" => req(
                ActionCategory::Write,
                format!("Run workflow: {}", input_str(input, "name")),
            ),
            "schedule_reminder" => {
                let action = action_of(input, "create");
                match action.as_str() {
                    "list" => req(ActionCategory::Read, "List reminders".to_string()),
                    "cancel" => req(
                        ActionCategory::Delete,
                        format!("Cancel reminder: {}", input_str(input, "job_id")),
                    ),
                    _ => req(
                        ActionCategory::Write,
                        format!("Schedule: {}", input_str(input, "description")),
                    ),
                }
            },
            "calendar" => {
                let action = action_of(input, "list");
                let category = match action.as_str() {
                    "list" | "today" => ActionCategory::Read,
                    "add_feed" | "sync_feeds" => ActionCategory::NetworkRead,
                    "delete" => ActionCategory::Delete,
                    _ => ActionCategory::Write,
                };
                let subject = ["title", "event_id", "url"]
                    .iter()
                    .map(|k| input_str(input, k))
                    .find(|v| !v.is_empty())
                    .unwrap_or("");
                req(category, format!("Calendar {action}: {subject}"))
            },
            "contacts" => {
                let action = action_of(input, "list");
                let category = match action.as_str() {
                    "list" | "get" | "search" => ActionCategory::Read,
                    "delete" => ActionCategory::Delete,
                    _ => ActionCategory::Write,
                };
                let subject = ["name", "contact_id", "query"]
                    .iter()
                    .map(|k| input_str(input, k))
                    .find(|v| !v.is_empty())
                    .unwrap_or("");
                req(category, format!("Contacts {action}: {subject}"))
            },
            _ => {
                let registered = self
                    .tool_categories
                    .read()
                    .unwrap_or_else(|e| e.into_inner())
                    .get(tool_name)
                    .copied();
                match registered {
                    Some(category) => req(category, format!("Plugin tool: {tool_name}")),
                    // Fail closed: unknown tools need approval.
                    None => req(ActionCategory::Write, format!("Unknown tool: {tool_name}")),
                }
            },
        }
    }

    /// Check whether a tool call is allowed. Returns the decision and the
    /// classified request.
    ///
    /// Read-only categories return `true` without consulting the approver.
    pub async fn check(&self, tool_name: &str, input: &Value) -> (bool, PermissionRequest) {
        let request = self.classify(tool_name, input);
        if !request.requires_approval() {
            return (true, request);
        }
        debug!(tool = tool_name, category = %request.action_category, "requesting approval");
        let allowed = self.approver.approve(&request).await;
        (allowed, request)
    }
}

impl std::fmt::Debug for PermissionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionManager").finish_non_exhaustive()
    }
}
