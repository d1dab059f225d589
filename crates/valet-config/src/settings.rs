//! Runtime settings read from the environment.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

/// Environment variable prefix for all valet options.
const ENV_PREFIX: &str = "VALET_";

/// Runtime settings for the assistant daemon.
///
/// Every field has a sensible default so a bare environment still yields a
/// usable (if inert) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Anthropic API key (`ANTHROPIC_API_KEY`).
    pub anthropic_api_key: String,
    /// Default model for the Claude provider.
    pub model: String,
    /// Maximum tokens per completion.
    pub max_tokens: usize,
    /// Root data directory.
    pub data_dir: PathBuf,
    /// HTTP bind host.
    pub host: String,
    /// HTTP bind port.
    pub port: u16,
    /// Log level filter (`error`..`trace`).
    pub log_level: String,
    /// Trailing context window for conversation assembly.
    pub max_context_messages: usize,
    /// Whether transports should auto-approve read-category tool calls.
    pub auto_approve_reads: bool,

    /// Default provider key: `claude`, `openai`, `ollama`, or `bedrock`.
    pub default_provider: String,
    /// Enable the Ollama local model.
    pub ollama_enabled: bool,
    /// Ollama server base URL.
    pub ollama_base_url: String,
    /// Ollama model name.
    pub ollama_model: String,
    /// Enable the OpenAI provider.
    pub openai_enabled: bool,
    /// OpenAI API key (`OPENAI_API_KEY`).
    pub openai_api_key: String,
    /// OpenAI model name.
    pub openai_model: String,
    /// Enable the Bedrock provider.
    pub bedrock_enabled: bool,
    /// Bedrock model id.
    pub bedrock_model: String,
    /// AWS region for Bedrock.
    pub bedrock_region: String,
    /// Approximate token ceiling below which simple queries may route to
    /// the local model.
    pub local_model_threshold_tokens: usize,
    /// Vision capability override; `None` means auto-detect from the model.
    pub vision: Option<bool>,

    /// Enable the scheduler.
    pub scheduler_enabled: bool,
    /// IANA timezone name for cron triggers.
    pub scheduler_timezone: String,

    /// Enable the webhook receiver.
    pub webhook_enabled: bool,
    /// Shared secret for webhook bearer auth (empty disables auth).
    pub webhook_secret: String,

    /// Enable the filesystem watchdog.
    pub watchdog_enabled: bool,
    /// Paths watched by the watchdog.
    pub watchdog_paths: Vec<String>,
    /// Debounce window in seconds for filesystem events.
    pub watchdog_debounce_seconds: f64,
    /// Append a content preview to change notifications.
    pub watchdog_analyze: bool,

    /// Enable do-not-disturb queuing.
    pub dnd_enabled: bool,
    /// DND window start, `HH:MM`.
    pub dnd_start: String,
    /// DND window end, `HH:MM`.
    pub dnd_end: String,
    /// Allow urgent messages to bypass DND.
    pub dnd_allow_urgent: bool,

    /// Enable agent delegation.
    pub agents_enabled: bool,
    /// Enable dynamic plugin tools.
    pub plugins_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            anthropic_api_key: String::new(),
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 8192,
            data_dir: PathBuf::from("./data"),
            host: "127.0.0.1".to_string(),
            port: 8000,
            log_level: "info".to_string(),
            max_context_messages: 50,
            auto_approve_reads: true,
            default_provider: "claude".to_string(),
            ollama_enabled: false,
            ollama_base_url: "http://localhost:11434".to_string(),
            ollama_model: "llama3.2".to_string(),
            openai_enabled: false,
            openai_api_key: String::new(),
            openai_model: "gpt-4o-mini".to_string(),
            bedrock_enabled: false,
            bedrock_model: "anthropic.claude-sonnet-4-20250514-v1:0".to_string(),
            bedrock_region: "us-east-1".to_string(),
            local_model_threshold_tokens: 500,
            vision: None,
            scheduler_enabled: false,
            scheduler_timezone: "UTC".to_string(),
            webhook_enabled: false,
            webhook_secret: String::new(),
            watchdog_enabled: false,
            watchdog_paths: Vec::new(),
            watchdog_debounce_seconds: 2.0,
            watchdog_analyze: false,
            dnd_enabled: false,
            dnd_start: "23:00".to_string(),
            dnd_end: "07:00".to_string(),
            dnd_allow_urgent: true,
            agents_enabled: true,
            plugins_enabled: false,
        }
    }
}

impl Settings {
    /// Load settings from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_env_map(&vars)
    }

    /// Load settings from an explicit variable map (testable entry point).
    #[must_use]
    pub fn from_env_map(vars: &HashMap<String, String>) -> Self {
        let mut s = Self::default();

        // API keys use their provider-conventional names.
        if let Some(v) = vars.get("ANTHROPIC_API_KEY") {
            s.anthropic_api_key = v.clone();
        }
        if let Some(v) = vars.get("OPENAI_API_KEY") {
            s.openai_api_key = v.clone();
        }

        get_string(vars, "MODEL", &mut s.model);
        get_parsed(vars, "MAX_TOKENS", &mut s.max_tokens);
        if let Some(v) = vars.get(&format!("{ENV_PREFIX}DATA_DIR")) {
            s.data_dir = PathBuf::from(v);
        }
        get_string(vars, "HOST", &mut s.host);
        get_parsed(vars, "PORT", &mut s.port);
        get_string(vars, "LOG_LEVEL", &mut s.log_level);
        get_parsed(vars, "MAX_CONTEXT_MESSAGES", &mut s.max_context_messages);
        get_bool(vars, "AUTO_APPROVE_READS", &mut s.auto_approve_reads);

        get_string(vars, "DEFAULT_PROVIDER", &mut s.default_provider);
        get_bool(vars, "OLLAMA_ENABLED", &mut s.ollama_enabled);
        get_string(vars, "OLLAMA_BASE_URL", &mut s.ollama_base_url);
        get_string(vars, "OLLAMA_MODEL", &mut s.ollama_model);
        get_bool(vars, "OPENAI_ENABLED", &mut s.openai_enabled);
        get_string(vars, "OPENAI_MODEL", &mut s.openai_model);
        get_bool(vars, "BEDROCK_ENABLED", &mut s.bedrock_enabled);
        get_string(vars, "BEDROCK_MODEL", &mut s.bedrock_model);
        get_string(vars, "BEDROCK_REGION", &mut s.bedrock_region);
        get_parsed(
            vars,
            "LOCAL_MODEL_THRESHOLD_TOKENS",
            &mut s.local_model_threshold_tokens,
        );
        if let Some(v) = vars.get(&format!("{ENV_PREFIX}VISION")) {
            match parse_bool(v) {
                Some(b) => s.vision = Some(b),
                None => warn!(value = %v, "invalid VALET_VISION, ignoring"),
            }
        }

        get_bool(vars, "SCHEDULER_ENABLED", &mut s.scheduler_enabled);
        get_string(vars, "SCHEDULER_TIMEZONE", &mut s.scheduler_timezone);

        get_bool(vars, "WEBHOOK_ENABLED", &mut s.webhook_enabled);
        get_string(vars, "WEBHOOK_SECRET", &mut s.webhook_secret);

        get_bool(vars, "WATCHDOG_ENABLED", &mut s.watchdog_enabled);
        if let Some(v) = vars.get(&format!("{ENV_PREFIX}WATCHDOG_PATHS")) {
            s.watchdog_paths = v
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect();
        }
        get_parsed(
            vars,
            "WATCHDOG_DEBOUNCE_SECONDS",
            &mut s.watchdog_debounce_seconds,
        );
        get_bool(vars, "WATCHDOG_ANALYZE", &mut s.watchdog_analyze);

        get_bool(vars, "DND_ENABLED", &mut s.dnd_enabled);
        get_string(vars, "DND_START", &mut s.dnd_start);
        get_string(vars, "DND_END", &mut s.dnd_end);
        get_bool(vars, "DND_ALLOW_URGENT", &mut s.dnd_allow_urgent);

        get_bool(vars, "AGENTS_ENABLED", &mut s.agents_enabled);
        get_bool(vars, "PLUGINS_ENABLED", &mut s.plugins_enabled);

        s
    }

    /// Path to the append-only JSONL audit log.
    #[must_use]
    pub fn audit_log_path(&self) -> PathBuf {
        self.data_dir.join("logs").join("audit.jsonl")
    }

    /// Path to the application log file.
    #[must_use]
    pub fn app_log_path(&self) -> PathBuf {
        self.data_dir.join("logs").join("app.log")
    }

    /// Path to the scheduler's SQLite job store.
    #[must_use]
    pub fn scheduler_db_path(&self) -> PathBuf {
        self.data_dir.join("db").join("scheduler.db")
    }

    /// Directory holding agent definition YAML files.
    #[must_use]
    pub fn agents_dir(&self) -> PathBuf {
        self.data_dir.join("agents")
    }

    /// Directory holding workflow definition YAML files.
    #[must_use]
    pub fn workflow_dir(&self) -> PathBuf {
        self.data_dir.join("workflows")
    }
}

fn get_string(vars: &HashMap<String, String>, key: &str, target: &mut String) {
    if let Some(v) = vars.get(&format!("{ENV_PREFIX}{key}")) {
        *target = v.clone();
    }
}

fn get_parsed<T: FromStr>(vars: &HashMap<String, String>, key: &str, target: &mut T) {
    if let Some(v) = vars.get(&format!("{ENV_PREFIX}{key}")) {
        match v.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(var = %key, value = %v, "invalid value, keeping default"),
        }
    }
}

fn get_bool(vars: &HashMap<String, String>, key: &str, target: &mut bool) {
    if let Some(v) = vars.get(&format!("{ENV_PREFIX}{key}")) {
        match parse_bool(v) {
            Some(b) => *target = b,
            None => warn!(var = %key, value = %v, "invalid boolean, keeping default"),
        }
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.model, "claude-sonnet-4-20250514");
        assert_eq!(s.max_tokens, 8192);
        assert_eq!(s.port, 8000);
        assert!(s.auto_approve_reads);
        assert!(!s.scheduler_enabled);
        assert_eq!(s.dnd_start, "23:00");
    }

    #[test]
    fn test_env_overrides() {
        let s = Settings::from_env_map(&vars(&[
            ("ANTHROPIC_API_KEY", "sk-test"),
            ("VALET_MODEL", "claude-opus-4"),
            ("VALET_PORT", "9001"),
            ("VALET_SCHEDULER_ENABLED", "true"),
            ("VALET_WATCHDOG_PATHS", "/tmp/a, /tmp/b"),
        ]));
        assert_eq!(s.anthropic_api_key, "sk-test");
        assert_eq!(s.model, "claude-opus-4");
        assert_eq!(s.port, 9001);
        assert!(s.scheduler_enabled);
        assert_eq!(s.watchdog_paths, vec!["/tmp/a", "/tmp/b"]);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let s = Settings::from_env_map(&vars(&[
            ("VALET_PORT", "not-a-port"),
            ("VALET_DND_ENABLED", "maybe"),
        ]));
        assert_eq!(s.port, 8000);
        assert!(!s.dnd_enabled);
    }

    #[test]
    fn test_bool_spellings() {
        for (raw, expected) in [("1", true), ("Yes", true), ("off", false), ("0", false)] {
            let s = Settings::from_env_map(&vars(&[("VALET_DND_ENABLED", raw)]));
            assert_eq!(s.dnd_enabled, expected, "spelling {raw:?}");
        }
    }

    #[test]
    fn test_path_accessors() {
        let mut s = Settings::default();
        s.data_dir = PathBuf::from("/var/lib/valet");
        assert_eq!(
            s.audit_log_path(),
            PathBuf::from("/var/lib/valet/logs/audit.jsonl")
        );
        assert_eq!(
            s.scheduler_db_path(),
            PathBuf::from("/var/lib/valet/db/scheduler.db")
        );
        assert_eq!(s.agents_dir(), PathBuf::from("/var/lib/valet/agents"));
        assert_eq!(s.workflow_dir(), PathBuf::from("/var/lib/valet/workflows"));
    }

    #[test]
    fn test_vision_override() {
        let s = Settings::from_env_map(&vars(&[("VALET_VISION", "false")]));
        assert_eq!(s.vision, Some(false));

        let s = Settings::from_env_map(&vars(&[]));
        assert_eq!(s.vision, None);
    }
}
