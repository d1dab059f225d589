//! Input sanitisation applied before handler invocation.
//!
//! Two concerns: known prompt-injection markers are stripped from every
//! string value, and values under path-like keys are normalised so `..`
//! traversal cannot escape the workspace.

use regex::Regex;
use serde_json::Value;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

/// Keys whose string values are treated as filesystem paths.
const PATH_KEYS: &[&str] = &["path", "file_path", "directory", "target"];

fn injection_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)<\|?(system|im_start|im_end)\|?>",
            r"(?i)\bsystem\s*:",
            r"(?i)\b(assistant|user)\s*:",
            r"(?i)ignore\s+(previous|above|all)\s+instructions",
            r"(?i)you\s+are\s+now\s+",
            r"(?i)pretend\s+you\s+are\s+",
            r"(?i)act\s+as\s+(if\s+)?you\s+are\s+",
            r"(?i)from\s+now\s+on,?\s+you\s+",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("valid injection pattern"))
        .collect()
    })
}

/// Remove common prompt-injection markers from a string.
#[must_use]
pub fn strip_injection_patterns(value: &str) -> String {
    let mut result = value.to_string();
    for pattern in injection_patterns() {
        result = pattern.replace_all(&result, "").into_owned();
    }
    result
}

/// Normalise a path, stripping `..` components; when a workspace root is
/// given, clamp the result inside it (falling back to the root itself).
#[must_use]
pub fn sanitize_path(path: &str, workspace: Option<&Path>) -> String {
    let resolved = normalize(Path::new(path));

    if let Some(workspace) = workspace {
        let workspace = normalize(workspace);
        let joined = normalize(&workspace.join(&resolved));
        if joined.starts_with(&workspace) {
            return joined.display().to_string();
        }
        return workspace.display().to_string();
    }

    resolved.display().to_string()
}

/// Collapse `.` components and strip `..` segments (popping where a normal
/// component precedes them, dropping them otherwise).
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {},
            Component::ParentDir => {
                if !out.pop() {
                    // Leading ".." is dropped outright.
                }
            },
            other => out.push(other),
        }
    }
    if out.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        out
    }
}

/// Sanitise a tool input value recursively.
///
/// Strings are injection-stripped; strings under path-like keys are
/// additionally path-sanitised; non-string scalars pass through untouched.
/// Idempotent: applying twice yields the same value.
#[must_use]
pub fn sanitize_tool_input(input: &Value, workspace: Option<&Path>) -> Value {
    sanitize_inner(input, workspace, false)
}

fn sanitize_inner(value: &Value, workspace: Option<&Path>, is_path: bool) -> Value {
    match value {
        Value::String(s) => {
            let cleaned = strip_injection_patterns(s);
            if is_path {
                Value::String(sanitize_path(&cleaned, workspace))
            } else {
                Value::String(cleaned)
            }
        },
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let path_key = PATH_KEYS.contains(&k.as_str());
                    (k.clone(), sanitize_inner(v, workspace, path_key))
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| sanitize_inner(v, workspace, false))
                .collect(),
        ),
        other => other.clone(),
    }
}
