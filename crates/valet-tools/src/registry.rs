//! Central tool registry and execution chokepoint.

use futures::future::BoxFuture;
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{info, warn};

use valet_approval::{ActionCategory, PermissionManager};
use valet_audit::{AuditEntry, AuditLog};
use valet_llm::{ToolCall, ToolDefinition, ToolResult};

use crate::sanitize::sanitize_tool_input;

/// Async tool handler: structured input in, result content out.
pub type ToolHandler = Arc<dyn Fn(serde_json::Value) -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync>;

/// Audit payloads keep at most this much tool output.
const AUDIT_OUTPUT_CHARS: usize = 500;

struct ToolEntry {
    definition: ToolDefinition,
    category: ActionCategory,
    handler: ToolHandler,
}

#[derive(Default)]
struct ToolTable {
    /// Registration order, for stable definition listings.
    order: Vec<String>,
    entries: HashMap<String, ToolEntry>,
}

/// Central registry for all available tools.
///
/// Read-mostly after startup; `register`/`unregister` take the write lock,
/// executions clone the handler under a read lock and run outside it.
pub struct ToolRegistry {
    tools: RwLock<ToolTable>,
    permissions: Arc<PermissionManager>,
    audit: Arc<AuditLog>,
    workspace_root: Option<PathBuf>,
}

impl ToolRegistry {
    /// Create a registry wired to the given permission manager and audit log.
    #[must_use]
    pub fn new(permissions: Arc<PermissionManager>, audit: Arc<AuditLog>) -> Self {
        Self {
            tools: RwLock::new(ToolTable::default()),
            permissions,
            audit,
            workspace_root: None,
        }
    }

    /// Clamp path-like inputs inside this directory.
    #[must_use]
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = Some(root.into());
        self
    }

    /// Register a tool. Re-registering a name replaces its entry in place.
    pub async fn register(
        &self,
        name: &str,
        description: &str,
        input_schema: serde_json::Value,
        category: ActionCategory,
        handler: ToolHandler,
    ) {
        self.permissions.register_tool_category(name, category);

        let entry = ToolEntry {
            definition: ToolDefinition::new(name, description, input_schema),
            category,
            handler,
        };

        let mut tools = self.tools.write().await;
        if tools.entries.insert(name.to_string(), entry).is_none() {
            tools.order.push(name.to_string());
        }
    }

    /// Remove a tool. Returns `true` if it was registered.
    pub async fn unregister(&self, name: &str) -> bool {
        let mut tools = self.tools.write().await;
        if tools.entries.remove(name).is_none() {
            return false;
        }
        tools.order.retain(|n| n != name);
        true
    }

    /// Tool definitions in registration order, as handed to LLM adapters.
    pub async fn definitions(&self) -> Vec<ToolDefinition> {
        let tools = self.tools.read().await;
        tools
            .order
            .iter()
            .filter_map(|name| tools.entries.get(name))
            .map(|e| e.definition.clone())
            .collect()
    }

    /// Whether a tool is registered.
    pub async fn contains(&self, name: &str) -> bool {
        self.tools.read().await.entries.contains_key(name)
    }

    /// Execute one tool call end-to-end: permission, sanitise, handler,
    /// audit. Never panics and never returns a raw error — every failure
    /// mode becomes an error-flagged [`ToolResult`].
    pub async fn execute(
        &self,
        tool_call: &ToolCall,
        session_id: &str,
        permission_override: Option<&PermissionManager>,
    ) -> ToolResult {
        let permissions = permission_override.unwrap_or_else(|| self.permissions.as_ref());
        let (allowed, request) = permissions.check(&tool_call.name, &tool_call.input).await;

        if !allowed {
            self.audit.record(AuditEntry::tool_denied(
                session_id,
                &tool_call.name,
                tool_call.input.clone(),
                request.action_category.as_str(),
            ));
            return ToolResult::error(tool_call.id.clone(), "Permission denied by user.");
        }

        let Some((handler, category)) = ({
            let tools = self.tools.read().await;
            tools
                .entries
                .get(&tool_call.name)
                .map(|e| (Arc::clone(&e.handler), e.category))
        }) else {
            return ToolResult::error(
                tool_call.id.clone(),
                format!("Unknown tool: {}", tool_call.name),
            );
        };

        let sanitized = sanitize_tool_input(&tool_call.input, self.workspace_root.as_deref());

        info!(tool = %tool_call.name, session = session_id, "tool call");
        let start = Instant::now();

        match handler(sanitized).await {
            Ok(output) => {
                let duration_ms = duration_ms(start);
                info!(
                    tool = %tool_call.name,
                    duration_ms,
                    chars = output.len(),
                    "tool result"
                );
                self.audit.record(AuditEntry::tool_call(
                    session_id,
                    &tool_call.name,
                    tool_call.input.clone(),
                    json!({"result": truncate_chars(&output, AUDIT_OUTPUT_CHARS)}),
                    category.as_str(),
                    request.requires_approval(),
                    duration_ms,
                ));
                ToolResult::success(tool_call.id.clone(), output)
            },
            Err(e) => {
                let duration_ms = duration_ms(start);
                let message = e.to_string();
                warn!(tool = %tool_call.name, duration_ms, error = %message, "tool error");
                self.audit.record(AuditEntry::tool_error(
                    session_id,
                    &tool_call.name,
                    tool_call.input.clone(),
                    &message,
                    category.as_str(),
                    duration_ms,
                ));
                ToolResult::error(tool_call.id.clone(), format!("Error: {message}"))
            },
        }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry").finish_non_exhaustive()
    }
}

fn duration_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Truncate to a character budget without splitting a code point.
fn truncate_chars(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut = cut.saturating_sub(1);
    }
    s[..cut].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use valet_approval::{AutoApprover, DenyAllApprover};

    fn echo_handler() -> ToolHandler {
        Arc::new(|input: Value| {
            Box::pin(async move {
                let text = input.get("text").and_then(Value::as_str).unwrap_or("");
                Ok(format!("Echo: {text}"))
            })
        })
    }

    fn failing_handler() -> ToolHandler {
        Arc::new(|_input: Value| {
            Box::pin(async move { Err(anyhow::anyhow!("backend unavailable")) })
        })
    }

    fn registry_with(approver: valet_approval::SharedApprover) -> (ToolRegistry, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let audit = Arc::new(AuditLog::new(dir.path().join("audit.jsonl")).unwrap());
        let permissions = Arc::new(PermissionManager::new(approver));
        (ToolRegistry::new(permissions, audit), dir)
    }

    async fn register_echo(registry: &ToolRegistry, category: ActionCategory) {
        registry
            .register(
                "echo",
                "Echo the input text",
                json!({"type": "object", "properties": {"text": {"type": "string"}}}),
                category,
                echo_handler(),
            )
            .await;
    }

    #[tokio::test]
    async fn test_execute_success() {
        let (registry, _dir) = registry_with(Arc::new(AutoApprover));
        register_echo(&registry, ActionCategory::Read).await;

        let call = ToolCall::new("t1", "echo", json!({"text": "hi"}));
        let result = registry.execute(&call, "cli", None).await;
        assert!(!result.is_error);
        assert_eq!(result.content, "Echo: hi");
        assert_eq!(result.tool_use_id, "t1");
    }

    #[tokio::test]
    async fn test_permission_denied_skips_handler_and_audits() {
        let (registry, _dir) = registry_with(Arc::new(DenyAllApprover));
        registry
            .register(
                "shell_exec",
                "Run a shell command",
                json!({"type": "object"}),
                ActionCategory::Write,
                echo_handler(),
            )
            .await;

        let call = ToolCall::new("t1", "shell_exec", json!({"command": "rm -rf /tmp/x"}));
        let result = registry.execute(&call, "cli", None).await;

        assert!(result.is_error);
        assert_eq!(result.content, "Permission denied by user.");

        let entries = registry.audit.read_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event_type, "tool_denied");
        assert_eq!(entries[0].action_category.as_deref(), Some("delete"));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let (registry, _dir) = registry_with(Arc::new(AutoApprover));
        let call = ToolCall::new("t1", "missing", json!({}));
        let result = registry.execute(&call, "", None).await;
        assert!(result.is_error);
        assert_eq!(result.content, "Unknown tool: missing");
    }

    #[tokio::test]
    async fn test_handler_error_becomes_tool_result() {
        let (registry, _dir) = registry_with(Arc::new(AutoApprover));
        registry
            .register(
                "flaky",
                "Always fails",
                json!({"type": "object"}),
                ActionCategory::Read,
                failing_handler(),
            )
            .await;

        let call = ToolCall::new("t1", "flaky", json!({}));
        let result = registry.execute(&call, "cli", None).await;
        assert!(result.is_error);
        assert_eq!(result.content, "Error: backend unavailable");

        let entries = registry.audit.read_all().unwrap();
        assert_eq!(entries.last().unwrap().event_type, "tool_error");
    }

    #[tokio::test]
    async fn test_register_unregister_register_yields_one_definition() {
        let (registry, _dir) = registry_with(Arc::new(AutoApprover));
        register_echo(&registry, ActionCategory::Read).await;
        assert!(registry.unregister("echo").await);
        assert!(!registry.unregister("echo").await);
        register_echo(&registry, ActionCategory::Read).await;

        let defs = registry.definitions().await;
        assert_eq!(defs.iter().filter(|d| d.name == "echo").count(), 1);
    }

    #[tokio::test]
    async fn test_reregistration_replaces_in_place() {
        let (registry, _dir) = registry_with(Arc::new(AutoApprover));
        register_echo(&registry, ActionCategory::Read).await;
        registry
            .register(
                "other",
                "Another tool",
                json!({"type": "object"}),
                ActionCategory::Read,
                echo_handler(),
            )
            .await;
        // Re-register the first; order must not change and no duplicate appear.
        register_echo(&registry, ActionCategory::Read).await;

        let defs = registry.definitions().await;
        let names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["echo", "other"]);
    }

    #[tokio::test]
    async fn test_execute_sanitises_input() {
        let (registry, _dir) = registry_with(Arc::new(AutoApprover));
        registry
            .register(
                "show_path",
                "Return the path input",
                json!({"type": "object"}),
                ActionCategory::Read,
                Arc::new(|input: Value| {
                    Box::pin(async move {
                        Ok(input.get("path").and_then(Value::as_str).unwrap_or("").to_string())
                    })
                }),
            )
            .await;

        let call = ToolCall::new("t1", "show_path", json!({"path": "../../etc/passwd"}));
        let result = registry.execute(&call, "", None).await;
        assert_eq!(result.content, "etc/passwd");
    }

    #[tokio::test]
    async fn test_permission_override_wins() {
        let (registry, _dir) = registry_with(Arc::new(DenyAllApprover));
        registry
            .register(
                "write_file",
                "Write a file",
                json!({"type": "object"}),
                ActionCategory::Write,
                echo_handler(),
            )
            .await;

        let auto = PermissionManager::new(Arc::new(AutoApprover));
        let call = ToolCall::new("t1", "write_file", json!({"text": "x"}));
        let result = registry.execute(&call, "", Some(&auto)).await;
        assert!(!result.is_error);
    }

    #[tokio::test]
    async fn test_audit_records_success_with_truncated_output() {
        let (registry, _dir) = registry_with(Arc::new(AutoApprover));
        registry
            .register(
                "big",
                "Large output",
                json!({"type": "object"}),
                ActionCategory::Read,
                Arc::new(|_| Box::pin(async move { Ok("z".repeat(2000)) })),
            )
            .await;

        let call = ToolCall::new("t1", "big", json!({}));
        let result = registry.execute(&call, "cli", None).await;
        assert_eq!(result.content.len(), 2000, "full output returned to the LLM");

        let entries = registry.audit.read_all().unwrap();
        let recorded = entries[0].output.as_ref().unwrap()["result"].as_str().unwrap();
        assert_eq!(recorded.len(), 500, "audit payload truncated");
    }
}
