//! Agent definition loading with per-lookup hot reload.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, info, warn};

use crate::types::AgentDefinition;

/// Loads agent definitions from a directory of YAML files.
///
/// Malformed files are logged and skipped; they never abort loading, and a
/// failed hot-reload retains the last-known-good definition.
#[derive(Debug)]
pub struct AgentLoader {
    dir: PathBuf,
    agents: RwLock<HashMap<String, AgentDefinition>>,
}

impl AgentLoader {
    /// Create a loader for the given directory.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            agents: RwLock::new(HashMap::new()),
        }
    }

    /// Load all `.yaml`/`.yml` files, replacing the current map. Creates
    /// the directory when missing.
    pub fn load_all(&self) {
        let mut loaded = HashMap::new();

        if !self.dir.exists() {
            if let Err(e) = std::fs::create_dir_all(&self.dir) {
                warn!(dir = %self.dir.display(), error = %e, "cannot create agents directory");
            } else {
                debug!(dir = %self.dir.display(), "created agents directory");
            }
        } else {
            for path in self.definition_files() {
                match Self::load_file(&path) {
                    Ok(agent) => {
                        debug!(agent = %agent.name, "loaded agent");
                        loaded.insert(agent.name.clone(), agent);
                    },
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping agent file"),
                }
            }
        }

        info!(count = loaded.len(), "loaded agent definitions");
        *self.agents.write().unwrap_or_else(|e| e.into_inner()) = loaded;
    }

    fn definition_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.dir)
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .map(|e| e.path())
                    .filter(|p| {
                        matches!(
                            p.extension().and_then(|e| e.to_str()),
                            Some("yaml" | "yml")
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();
        files.sort();
        files
    }

    fn load_file(path: &Path) -> Result<AgentDefinition, Box<dyn std::error::Error>> {
        let text = std::fs::read_to_string(path)?;
        let mut agent: AgentDefinition = serde_yaml::from_str(&text)?;
        if agent.name.is_empty() {
            agent.name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
        }
        Ok(agent)
    }

    /// Get an agent definition by name.
    ///
    /// Hot-reloads the agent's file from disk on every lookup so edits are
    /// visible without a restart.
    pub fn get(&self, name: &str) -> Option<AgentDefinition> {
        if self.agents.read().unwrap_or_else(|e| e.into_inner()).is_empty() {
            self.load_all();
        }

        let mut path = self.dir.join(format!("{name}.yaml"));
        if !path.exists() {
            path = self.dir.join(format!("{name}.yml"));
        }
        if path.exists() {
            match Self::load_file(&path) {
                Ok(agent) => {
                    self.agents
                        .write()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(agent.name.clone(), agent);
                },
                Err(e) => warn!(agent = name, error = %e, "hot-reload failed, keeping previous"),
            }
        }

        self.agents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// All loaded definitions, sorted by name.
    pub fn list(&self) -> Vec<AgentDefinition> {
        if self.agents.read().unwrap_or_else(|e| e.into_inner()).is_empty() {
            self.load_all();
        }
        let mut agents: Vec<AgentDefinition> = self
            .agents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        agents
    }

    /// Force a full reload.
    pub fn reload(&self) {
        self.load_all();
    }
}
