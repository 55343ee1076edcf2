//! Sandbox configuration.

use std::path::PathBuf;

use serde::Deserialize;

use crate::interp::DEFAULT_RECURSION_LIMIT;

/// Configuration for one sandbox.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Guest code run into the shared namespace during bootstrap.
    pub startup: Option<String>,

    /// Offer `_private` and `__dunder__` names in completions.
    pub show_private: bool,

    /// Maximum number of completions returned.
    pub max_completions: usize,

    /// Docstrings longer than this are truncated by inspection.
    pub max_doc_chars: usize,

    /// Maximum depth of nested guest calls.
    pub recursion_limit: usize,

    /// Path to the `cellbox-worker` binary, for out-of-process sandboxes.
    pub worker_path: Option<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            startup: None,
            show_private: false,
            max_completions: 50,
            max_doc_chars: 1000,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            worker_path: None,
        }
    }
}

impl SandboxConfig {
    /// Defaults with `CELLBOX_*` environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `CELLBOX_SHOW_PRIVATE`, `CELLBOX_MAX_COMPLETIONS`,
    /// `CELLBOX_STARTUP` and `CELLBOX_WORKER_PATH`. Unparsable values are
    /// ignored.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(raw) = lookup("CELLBOX_SHOW_PRIVATE") {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.show_private = true,
                "0" | "false" | "no" | "off" => self.show_private = false,
                other => tracing::warn!(value = other, "Ignoring invalid CELLBOX_SHOW_PRIVATE"),
            }
        }
        if let Some(raw) = lookup("CELLBOX_MAX_COMPLETIONS") {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => self.max_completions = n,
                _ => tracing::warn!(value = %raw, "Ignoring invalid CELLBOX_MAX_COMPLETIONS"),
            }
        }
        if let Some(code) = lookup("CELLBOX_STARTUP") {
            self.startup = Some(code);
        }
        if let Some(path) = lookup("CELLBOX_WORKER_PATH") {
            self.worker_path = Some(PathBuf::from(path));
        }
        self
    }

    pub fn with_startup(mut self, code: impl Into<String>) -> Self {
        self.startup = Some(code.into());
        self
    }

    pub fn with_show_private(mut self, show: bool) -> Self {
        self.show_private = show;
        self
    }

    pub fn with_max_completions(mut self, max: usize) -> Self {
        self.max_completions = max.max(1);
        self
    }

    pub fn with_max_doc_chars(mut self, max: usize) -> Self {
        self.max_doc_chars = max;
        self
    }

    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn with_worker_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.worker_path = Some(path.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_overrides() {
        let env = |key: &str| match key {
            "CELLBOX_SHOW_PRIVATE" => Some("yes".to_string()),
            "CELLBOX_MAX_COMPLETIONS" => Some(" 7 ".to_string()),
            "CELLBOX_STARTUP" => Some("x = 1".to_string()),
            _ => None,
        };
        let config = SandboxConfig::default().with_overrides(env);
        assert!(config.show_private);
        assert_eq!(config.max_completions, 7);
        assert_eq!(config.startup.as_deref(), Some("x = 1"));
        assert_eq!(config.worker_path, None);
    }

    #[test]
    fn test_invalid_overrides_are_ignored() {
        let env = |key: &str| match key {
            "CELLBOX_SHOW_PRIVATE" => Some("maybe".to_string()),
            "CELLBOX_MAX_COMPLETIONS" => Some("0".to_string()),
            _ => None,
        };
        let config = SandboxConfig::default().with_overrides(env);
        assert_eq!(config, SandboxConfig::default());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: SandboxConfig =
            serde_json::from_str(r#"{"max_completions": 5, "startup": "import math"}"#).unwrap();
        assert_eq!(config.max_completions, 5);
        assert_eq!(config.max_doc_chars, 1000);
        assert_eq!(config.startup.as_deref(), Some("import math"));
    }
}
