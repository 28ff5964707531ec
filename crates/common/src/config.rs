//! Common configuration types for broadcast signaling components.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default tracing filter when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "broadcast_service=debug,tower_http=debug";

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Fallback `EnvFilter` directive used when `RUST_LOG` is unset
    pub default_filter: String,
    /// Emit JSON-formatted logs instead of the human-readable format
    pub json_logs: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default_filter: DEFAULT_LOG_FILTER.to_string(),
            json_logs: false,
        }
    }
}

impl LoggingConfig {
    /// Read logging settings from a variable map.
    ///
    /// `<prefix>_LOG_JSON` accepts `true`/`1`; anything else keeps text logs.
    /// `<prefix>_LOG_FILTER` overrides the default filter.
    #[must_use]
    pub fn from_vars(prefix: &str, vars: &HashMap<String, String>) -> Self {
        let json_logs = vars
            .get(&format!("{prefix}_LOG_JSON"))
            .is_some_and(|v| matches!(v.trim(), "true" | "1"));

        let default_filter = vars
            .get(&format!("{prefix}_LOG_FILTER"))
            .cloned()
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        Self {
            default_filter,
            json_logs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_unset() {
        let config = LoggingConfig::from_vars("BS", &HashMap::new());
        assert_eq!(config, LoggingConfig::default());
    }

    #[test]
    fn test_json_flag_and_filter_override() {
        let vars = HashMap::from([
            ("BS_LOG_JSON".to_string(), "1".to_string()),
            ("BS_LOG_FILTER".to_string(), "info".to_string()),
        ]);
        let config = LoggingConfig::from_vars("BS", &vars);

        assert!(config.json_logs);
        assert_eq!(config.default_filter, "info");
    }

    #[test]
    fn test_json_flag_rejects_other_values() {
        let vars = HashMap::from([("BS_LOG_JSON".to_string(), "yes".to_string())]);
        assert!(!LoggingConfig::from_vars("BS", &vars).json_logs);
    }
}
