//! Broadcast service configuration.
//!
//! Configuration is loaded from environment variables. The media engine URL
//! may embed credentials and is redacted in Debug output.

use crate::signaling::channel::DEFAULT_CHANNEL_BUFFER;

use common::secret::SecretString;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Media engine URL used when `KMS_URL` is unset or blank.
///
/// Matches a Kurento Media Server running on the same host with its stock
/// WebSocket port.
pub const DEFAULT_KMS_URL: &str = "ws://localhost:8888/kurento";

/// Default signaling (WebSocket) bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8443";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default WebSocket path.
pub const DEFAULT_SIGNALING_PATH: &str = "/call";

/// Default maximum inbound text message size in bytes.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 32_768;

/// Default instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "bs";

/// Broadcast service configuration.
#[derive(Clone)]
pub struct Config {
    /// Media engine WebSocket URL (`KMS_URL`, default [`DEFAULT_KMS_URL`]).
    pub kms_url: SecretString,

    /// Signaling server bind address.
    pub bind_address: String,

    /// Health and metrics server bind address.
    pub health_bind_address: String,

    /// Path of the signaling WebSocket endpoint.
    pub signaling_path: String,

    /// Maximum inbound WebSocket message size in bytes.
    pub max_message_size: usize,

    /// Per-connection outbound queue capacity.
    pub channel_buffer: usize,

    /// Unique identifier for this instance (log correlation).
    pub instance_id: String,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("kms_url", &"[REDACTED]")
            .field("bind_address", &self.bind_address)
            .field("health_bind_address", &self.health_bind_address)
            .field("signaling_path", &self.signaling_path)
            .field("max_message_size", &self.max_message_size)
            .field("channel_buffer", &self.channel_buffer)
            .field("instance_id", &self.instance_id)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from a snapshot of the environment.
    ///
    /// `main` reads the environment once and hands the same map to
    /// [`common::config::LoggingConfig::from_vars`], so tracing is up
    /// before this can fail.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let kms_url = SecretString::from(
            vars.get("KMS_URL")
                .map(|url| url.trim())
                .filter(|url| !url.is_empty())
                .unwrap_or(DEFAULT_KMS_URL)
                .to_string(),
        );

        let bind_address = vars
            .get("BS_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("BS_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let signaling_path = vars
            .get("BS_SIGNALING_PATH")
            .cloned()
            .unwrap_or_else(|| DEFAULT_SIGNALING_PATH.to_string());
        if !signaling_path.starts_with('/') {
            return Err(ConfigError::InvalidValue(format!(
                "BS_SIGNALING_PATH must start with '/', got {signaling_path:?}"
            )));
        }

        let max_message_size = parse_var(vars, "BS_MAX_MESSAGE_SIZE", DEFAULT_MAX_MESSAGE_SIZE)?;
        let channel_buffer = parse_var(vars, "BS_CHANNEL_BUFFER", DEFAULT_CHANNEL_BUFFER)?;

        if max_message_size == 0 {
            return Err(ConfigError::InvalidValue(
                "BS_MAX_MESSAGE_SIZE must be greater than 0".to_string(),
            ));
        }
        if channel_buffer == 0 {
            return Err(ConfigError::InvalidValue(
                "BS_CHANNEL_BUFFER must be greater than 0".to_string(),
            ));
        }

        let instance_id = vars.get("BS_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_INSTANCE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            kms_url,
            bind_address,
            health_bind_address,
            signaling_path,
            max_message_size,
            channel_buffer,
            instance_id,
        })
    }
}

fn parse_var<T: FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{name}={raw:?} is not a valid number"))),
    }
}
