//! Workflow engine: multi-step YAML-defined automation chains.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// Executes one workflow step's tool with merged arguments.
pub type WorkflowToolExecutor =
    Arc<dyn Fn(String, Value) -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync>;

/// Decides whether an approval-gated step may run: `(workflow, step) -> bool`.
pub type WorkflowApprovalCallback =
    Arc<dyn Fn(String, String) -> BoxFuture<'static, bool> + Send + Sync>;

/// A single step in a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Step name (defaults to `step_<index>`).
    #[serde(default)]
    pub name: String,
    /// Tool to invoke.
    pub tool: String,
    /// Static arguments, overlaid by the run context.
    #[serde(default)]
    pub args: Map<String, Value>,
    /// Whether the approval callback gates this step.
    #[serde(default)]
    pub requires_approval: bool,
}

/// A multi-step workflow loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Unique workflow name.
    pub name: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// `manual`, `webhook`, or `schedule`.
    #[serde(default = "default_trigger")]
    pub trigger: String,
    /// Disabled workflows refuse webhook/schedule invocation.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Ordered steps.
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
}

fn default_trigger() -> String {
    "manual".to_string()
}

fn default_enabled() -> bool {
    true
}

impl WorkflowDefinition {
    /// Parse a definition from YAML text, naming anonymous steps.
    ///
    /// # Errors
    ///
    /// Returns the YAML error for malformed input.
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        let mut definition: Self = serde_yaml::from_str(text)?;
        for (i, step) in definition.steps.iter_mut().enumerate() {
            if step.name.is_empty() {
                step.name = format!("step_{i}");
            }
        }
        Ok(definition)
    }
}

/// Status of one executed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// The step's tool ran and returned output.
    Success,
    /// The step was skipped (approval denied).
    Skipped,
    /// The step's tool failed; the workflow halted here.
    Error,
}

impl StepStatus {
    /// Stable snake_case key, as rendered in summaries and webhook bodies.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Skipped => "skipped",
            Self::Error => "error",
        }
    }
}

/// Result of one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// Step name.
    pub step: String,
    /// Outcome.
    pub status: StepStatus,
    /// Tool output (Success).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Skip reason (Skipped).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Error message (Error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Executes workflow definitions step by step.
///
/// The tool executor funnels through the tool registry, so permission
/// checks and audit logging apply to workflow steps exactly as to
/// conversational tool calls.
pub struct WorkflowRunner {
    executor: Option<WorkflowToolExecutor>,
    approval: Option<WorkflowApprovalCallback>,
}

impl WorkflowRunner {
    /// A runner with no executor: steps produce dry-run markers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            executor: None,
            approval: None,
        }
    }

    /// Set the tool executor.
    #[must_use]
    pub fn with_executor(mut self, executor: WorkflowToolExecutor) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Set the approval callback for gated steps.
    #[must_use]
    pub fn with_approval(mut self, approval: WorkflowApprovalCallback) -> Self {
        self.approval = Some(approval);
        self
    }

    /// Run all steps in order, threading context forward.
    ///
    /// A denied approval records a skipped result and the loop continues;
    /// a step error halts the workflow, preserving earlier results. After
    /// each success, `previous_output` in the context carries the step's
    /// output to later steps.
    pub async fn run(
        &self,
        definition: &WorkflowDefinition,
        context: Option<Map<String, Value>>,
    ) -> Vec<StepResult> {
        let mut ctx = context.unwrap_or_default();
        let mut results = Vec::with_capacity(definition.steps.len());

        for step in &definition.steps {
            info!(workflow = %definition.name, step = %step.name, "running step");

            if step.requires_approval {
                if let Some(approval) = &self.approval {
                    let approved =
                        approval(definition.name.clone(), step.name.clone()).await;
                    if !approved {
                        info!(step = %step.name, "step skipped (approval denied)");
                        results.push(StepResult {
                            step: step.name.clone(),
                            status: StepStatus::Skipped,
                            output: None,
                            reason: Some("approval_denied".to_string()),
                            error: None,
                        });
                        continue;
                    }
                }
            }

            // Context overlays the step's static args.
            let mut merged = step.args.clone();
            for (k, v) in &ctx {
                merged.insert(k.clone(), v.clone());
            }
            let merged = Value::Object(merged);

            let outcome = match &self.executor {
                Some(executor) => executor(step.tool.clone(), merged).await,
                None => Ok(format!("[dry-run] {}", step.tool)),
            };

            match outcome {
                Ok(output) => {
                    ctx.insert(
                        "previous_output".to_string(),
                        Value::String(output.clone()),
                    );
                    results.push(StepResult {
                        step: step.name.clone(),
                        status: StepStatus::Success,
                        output: Some(output),
                        reason: None,
                        error: None,
                    });
                },
                Err(e) => {
                    warn!(workflow = %definition.name, step = %step.name, error = %e, "step failed");
                    results.push(StepResult {
                        step: step.name.clone(),
                        status: StepStatus::Error,
                        output: None,
                        reason: None,
                        error: Some(e.to_string()),
                    });
                    break;
                },
            }
        }

        results
    }
}

impl Default for WorkflowRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WorkflowRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRunner")
            .field("has_executor", &self.executor.is_some())
            .field("has_approval", &self.approval.is_some())
            .finish()
    }
}

/// Manages workflow definitions loaded from a directory.
///
/// `.yaml` and `.yml` files are merged with `.yaml` winning on a name
/// collision; malformed files are logged and skipped.
#[derive(Debug)]
pub struct WorkflowManager {
    dir: PathBuf,
    workflows: RwLock<HashMap<String, WorkflowDefinition>>,
}

impl WorkflowManager {
    /// Create a manager for the given directory.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            workflows: RwLock::new(HashMap::new()),
        }
    }

    /// Load (or reload) all workflow files.
    pub fn load(&self) {
        let mut loaded = HashMap::new();

        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            warn!(dir = %self.dir.display(), error = %e, "cannot create workflow directory");
        }

        for path in self.files_with_extension("yaml") {
            self.load_file(&path, &mut loaded);
        }
        for path in self.files_with_extension("yml") {
            // Skip when a .yaml twin exists: yaml takes precedence.
            if path.with_extension("yaml").exists() {
                continue;
            }
            self.load_file(&path, &mut loaded);
        }

        info!(count = loaded.len(), "loaded workflows");
        *self.workflows.write().unwrap_or_else(|e| e.into_inner()) = loaded;
    }

    fn files_with_extension(&self, ext: &str) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.dir)
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .map(|e| e.path())
                    .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(ext))
                    .collect()
            })
            .unwrap_or_default();
        files.sort();
        files
    }

    fn load_file(&self, path: &Path, loaded: &mut HashMap<String, WorkflowDefinition>) {
        match std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|text| WorkflowDefinition::from_yaml(&text).map_err(|e| e.to_string()))
        {
            Ok(workflow) => {
                info!(workflow = %workflow.name, "loaded workflow");
                loaded.insert(workflow.name.clone(), workflow);
            },
            Err(e) => warn!(path = %path.display(), error = %e, "skipping workflow file"),
        }
    }

    /// Get a workflow by name.
    pub fn get(&self, name: &str) -> Option<WorkflowDefinition> {
        self.workflows
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// All loaded workflows, sorted by name.
    pub fn list(&self) -> Vec<WorkflowDefinition> {
        let mut workflows: Vec<WorkflowDefinition> = self
            .workflows
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        workflows.sort_by(|a, b| a.name.cmp(&b.name));
        workflows
    }
}
