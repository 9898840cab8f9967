//! Configuration settings for the RPC daemon.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::auth::{DEFAULT_MAX_NONCES_PER_CLIENT, DEFAULT_TIMESTAMP_WINDOW};
use crate::error::RpcError;
use crate::protocol::WireFormat;
use crate::serializer::SerializerKind;
use crate::transport::UnixServerConfig;

/// Main configuration structure for the daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Socket server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Path to the Unix socket file.
    pub socket_path: PathBuf,
    /// Socket file permissions (e.g., "0660").
    #[serde(default = "default_socket_permissions")]
    pub socket_permissions: String,
    /// Maximum message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Socket read/write timeout in seconds.
    #[serde(default = "default_socket_timeout")]
    pub socket_timeout_seconds: u64,
    /// Maximum concurrent connections.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_connections: usize,
    /// How long shutdown waits for connections to finish, in seconds.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_seconds: u64,
}

/// Wire protocol configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolConfig {
    #[serde(default = "default_format")]
    pub format: WireFormat,
    #[serde(default)]
    pub serializer: SerializerKind,
    /// Call ids start after this value.
    #[serde(default)]
    pub initial_counter: i64,
}

/// Security configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// Path to the client keys file. Required for the signed format.
    pub keys_path: Option<PathBuf>,
    /// Allowed clock skew for message timestamps, in seconds.
    #[serde(default = "default_timestamp_window")]
    pub timestamp_window_seconds: u64,
    /// Interval between nonce store sweeps, in seconds.
    #[serde(default = "default_nonce_cleanup_interval")]
    pub nonce_cleanup_interval_seconds: u64,
    /// Most nonces remembered per client within one window.
    #[serde(default = "default_max_nonces_per_client")]
    pub max_nonces_per_client: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format ("pretty" or "json").
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_socket_permissions() -> String {
    "0660".to_string()
}

fn default_max_message_size() -> usize {
    1_048_576 // 1MB
}

fn default_socket_timeout() -> u64 {
    30
}

fn default_max_concurrent() -> usize {
    100
}

fn default_drain_timeout() -> u64 {
    30
}

fn default_format() -> WireFormat {
    WireFormat::SignedJsonRpc
}

fn default_timestamp_window() -> u64 {
    DEFAULT_TIMESTAMP_WINDOW
}

fn default_nonce_cleanup_interval() -> u64 {
    60
}

fn default_max_nonces_per_client() -> usize {
    DEFAULT_MAX_NONCES_PER_CLIENT
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
            serializer: SerializerKind::default(),
            initial_counter: 0,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            keys_path: None,
            timestamp_window_seconds: default_timestamp_window(),
            nonce_cleanup_interval_seconds: default_nonce_cleanup_interval(),
            max_nonces_per_client: default_max_nonces_per_client(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl ServerConfig {
    /// Socket transport settings derived from this section.
    pub fn unix_server_config(&self) -> UnixServerConfig {
        UnixServerConfig {
            socket_path: self.socket_path.clone(),
            socket_permissions: self.socket_permissions.clone(),
            max_message_size: self.max_message_size,
            socket_timeout: Duration::from_secs(self.socket_timeout_seconds),
            max_concurrent_connections: self.max_concurrent_connections,
            drain_timeout: Duration::from_secs(self.drain_timeout_seconds),
        }
    }
}

impl Settings {
    /// Load settings from a TOML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RpcError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| RpcError::Config {
            message: format!("Failed to read config file '{}': {}", path.display(), e),
        })?;

        Self::parse(&content).map_err(|e| match e {
            RpcError::Config { message } => RpcError::Config {
                message: format!("{} (in '{}')", message, path.display()),
            },
            other => other,
        })
    }

    /// Parse and validate settings from TOML text.
    pub fn parse(content: &str) -> Result<Self, RpcError> {
        let settings: Settings = toml::from_str(content).map_err(|e| RpcError::Config {
            message: format!("Failed to parse config: {}", e),
        })?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate the settings.
    fn validate(&self) -> Result<(), RpcError> {
        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(config_error(format!(
                "Invalid log level '{}'. Valid levels: {:?}",
                self.logging.level, valid_levels
            )));
        }

        // Validate log format
        let valid_formats = ["pretty", "json"];
        if !valid_formats.contains(&self.logging.format.to_lowercase().as_str()) {
            return Err(config_error(format!(
                "Invalid log format '{}'. Valid formats: {:?}",
                self.logging.format, valid_formats
            )));
        }

        // Validate socket permissions format
        if self.server.socket_permissions.is_empty()
            || !self.server.socket_permissions.chars().all(|c| ('0'..='7').contains(&c))
        {
            return Err(config_error(format!(
                "Invalid socket permissions '{}'. Must be octal (e.g., '0660')",
                self.server.socket_permissions
            )));
        }

        if self.server.max_message_size == 0 {
            return Err(config_error("max_message_size must be positive".to_string()));
        }

        if self.server.max_concurrent_connections == 0 {
            return Err(config_error(
                "max_concurrent_connections must be positive".to_string(),
            ));
        }

        if self.protocol.initial_counter < 0 {
            return Err(config_error(format!(
                "initial_counter must not be negative, got {}",
                self.protocol.initial_counter
            )));
        }

        if self.protocol.format.is_signed() && self.security.keys_path.is_none() {
            return Err(config_error(format!(
                "Format '{}' requires security.keys_path",
                self.protocol.format
            )));
        }

        if self.security.timestamp_window_seconds == 0 {
            return Err(config_error(
                "timestamp_window_seconds must be positive".to_string(),
            ));
        }

        if self.security.nonce_cleanup_interval_seconds == 0 {
            return Err(config_error(
                "nonce_cleanup_interval_seconds must be positive".to_string(),
            ));
        }

        if self.security.max_nonces_per_client == 0 {
            return Err(config_error(
                "max_nonces_per_client must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

fn config_error(message: String) -> RpcError {
    RpcError::Config { message }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [server]
        socket_path = "/tmp/lumo-rpc.sock"

        [security]
        keys_path = "/etc/lumo/rpc-keys.toml"
    "#;

    #[test]
    fn test_default_values() {
        let settings = Settings::parse(MINIMAL).unwrap();
        assert_eq!(settings.server.socket_permissions, "0660");
        assert_eq!(settings.server.max_message_size, 1_048_576);
        assert_eq!(settings.protocol.format, WireFormat::SignedJsonRpc);
        assert_eq!(settings.protocol.serializer, SerializerKind::Json);
        assert_eq!(settings.security.timestamp_window_seconds, 3600);
        assert_eq!(settings.security.max_nonces_per_client, 100_000);
        assert_eq!(settings.logging.level, "info");
        assert_eq!(settings.logging.format, "pretty");
    }

    #[test]
    fn test_full_config() {
        let settings = Settings::parse(
            r#"
            [server]
            socket_path = "/run/lumo/rpc.sock"
            max_concurrent_connections = 8

            [protocol]
            format = "pyrpc"
            serializer = "msgpack"
            initial_counter = 41

            [logging]
            level = "debug"
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(settings.protocol.format, WireFormat::PyRpc);
        assert_eq!(settings.protocol.serializer, SerializerKind::Msgpack);
        assert_eq!(settings.protocol.initial_counter, 41);
        assert_eq!(
            settings.server.unix_server_config().max_concurrent_connections,
            8
        );
    }

    #[test]
    fn test_signed_format_requires_keys() {
        let err = Settings::parse(
            r#"
            [server]
            socket_path = "/tmp/x.sock"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("keys_path"));
    }

    #[test]
    fn test_zero_nonce_limit_rejected() {
        let content = MINIMAL.replace(
            "[security]\n",
            "[security]\n        max_nonces_per_client = 0\n",
        );
        let err = Settings::parse(&content).unwrap_err();
        assert!(err.to_string().contains("max_nonces_per_client"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        for (section, bad) in [
            ("logging", "level = \"loud\""),
            ("logging", "format = \"xml\""),
            ("protocol", "format = \"soap\""),
            ("server", "socket_permissions = \"0689\""),
        ] {
            let content = if section == "server" {
                format!(
                    "[server]\nsocket_path = \"/tmp/x.sock\"\n{}\n[security]\nkeys_path = \"/k\"\n",
                    bad
                )
            } else {
                format!("{}\n[{}]\n{}\n", MINIMAL, section, bad)
            };
            assert!(
                matches!(Settings::parse(&content), Err(RpcError::Config { .. })),
                "accepted: {}",
                bad
            );
        }
    }
}
