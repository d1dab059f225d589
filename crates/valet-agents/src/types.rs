//! Agent definition and result types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_max_tool_rounds() -> usize {
    5
}

/// Declarative definition of a specialized agent, loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    /// Unique agent name (defaults to the file stem when absent).
    #[serde(default)]
    pub name: String,
    /// Human-readable description, shown in `list_agents`.
    #[serde(default)]
    pub description: String,
    /// Role-specific system prompt.
    #[serde(default)]
    pub system_prompt: String,
    /// Exact tool allow-list; wins over `denied_tools` when non-empty.
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    /// Tool deny-list, applied when `allowed_tools` is empty.
    #[serde(default)]
    pub denied_tools: Vec<String>,
    /// Model override (`provider/model` or bare model name); empty uses the
    /// router default.
    #[serde(default)]
    pub model: String,
    /// Tool-loop round budget for a single run.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
    /// Whether this agent may itself delegate to other agents.
    #[serde(default)]
    pub can_delegate: bool,
}

impl AgentDefinition {
    /// A minimal definition with the given name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            system_prompt: String::new(),
            allowed_tools: Vec::new(),
            denied_tools: Vec::new(),
            model: String::new(),
            max_tool_rounds: default_max_tool_rounds(),
            can_delegate: false,
        }
    }
}

/// One tool invocation made during an agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Tool name.
    pub name: String,
    /// Tool input.
    pub input: Value,
    /// Result content, truncated.
    pub output: String,
}

/// Result from running an agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentResult {
    /// The agent that ran.
    pub agent_name: String,
    /// Final text response.
    pub response: String,
    /// Tool calls made during the run.
    pub tool_calls_made: Vec<ToolCallRecord>,
    /// Error message; empty on success.
    pub error: String,
}

impl AgentResult {
    /// An error result with no response.
    pub fn failed(agent_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            error: error.into(),
            ..Self::default()
        }
    }

    /// Whether the run completed without error.
    #[must_use]
    pub fn success(&self) -> bool {
        self.error.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_defaults_from_yaml() {
        let agent: AgentDefinition = serde_yaml::from_str("name: researcher\n").unwrap();
        assert_eq!(agent.name, "researcher");
        assert_eq!(agent.max_tool_rounds, 5);
        assert!(!agent.can_delegate);
        assert!(agent.allowed_tools.is_empty());
    }

    #[test]
    fn test_definition_full_yaml() {
        let yaml = r"
name: echo
description: Echoes things
system_prompt: You echo.
allowed_tools: [echo]
model: openai/gpt-4o-mini
max_tool_rounds: 3
can_delegate: true
";
        let agent: AgentDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(agent.allowed_tools, vec!["echo"]);
        assert_eq!(agent.model, "openai/gpt-4o-mini");
        assert_eq!(agent.max_tool_rounds, 3);
        assert!(agent.can_delegate);
    }

    #[test]
    fn test_result_success() {
        let ok = AgentResult {
            agent_name: "echo".into(),
            response: "hi".into(),
            ..AgentResult::default()
        };
        assert!(ok.success());

        let err = AgentResult::failed("echo", "boom");
        assert!(!err.success());
        assert_eq!(err.error, "boom");
    }
}
