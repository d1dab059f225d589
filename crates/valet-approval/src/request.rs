//! Approval request type.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::ActionCategory;

/// A single permission decision point, created per tool call.
///
/// Consumed by the approver (or auto-decided for read categories), then
/// discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRequest {
    /// Tool being invoked.
    pub tool_name: String,
    /// Classified side-effect category.
    pub action_category: ActionCategory,
    /// The raw tool input, for approver UIs that want detail.
    pub details: Value,
    /// Human-readable one-line description of the action.
    pub description: String,
}

impl PermissionRequest {
    /// Create a new request.
    pub fn new(
        tool_name: impl Into<String>,
        action_category: ActionCategory,
        details: Value,
        description: impl Into<String>,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            action_category,
            details,
            description: description.into(),
        }
    }

    /// Whether this request must be put to the approver.
    #[must_use]
    pub fn requires_approval(&self) -> bool {
        self.action_category.requires_approval()
    }
}
