//! # Configuration Management
//!
//! Resolved configuration snapshot consumed by the transport core.
//!
//! Configuration *loading* (files, key/value providers) belongs to the
//! embedding application; this module only defines the resolved snapshot,
//! sensible defaults, and validation. TOML and environment loaders are
//! provided as conveniences and produce the same snapshot type.
//!
//! The snapshot is immutable after [`Transport::create`](crate::transport::Transport::create)
//! except for the small set of live-toggleable flags (TLS, compression,
//! encryption, timeouts, buffer size) that are routed through
//! `set_option` and guarded by the locks of the subsystem they affect.

use crate::error::{Result, TransportError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default number of pool worker tasks
pub const DEFAULT_WORKER_TASKS: usize = 4;

/// Max allowed message size (16 MB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Default socket I/O buffer size (64 KB)
pub const DEFAULT_IO_BUFFER_SIZE: usize = 64 * 1024;

/// Default bound on concurrently registered endpoints
pub const DEFAULT_MAX_ENDPOINTS: usize = 4096;

/// Default bound on client/server connection slots
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;

/// Transport configuration snapshot.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Number of worker tasks in the event pump pool. `0` selects
    /// single-threaded cooperative mode: no background workers exist and
    /// the caller must drive `process_events` itself.
    pub worker_tasks: usize,

    /// Timeout for outbound connection attempts
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Timeout for individual send/receive operations
    #[serde(with = "duration_serde")]
    pub operation_timeout: Duration,

    /// Maximum encoded packet size accepted on the wire
    pub max_message_size: usize,

    /// Maximum client/server connection slots
    pub max_connections: usize,

    /// Maximum concurrently registered endpoints
    pub max_endpoints: usize,

    /// Socket I/O buffer size in bytes
    pub io_buffer_size: usize,

    /// Whether outbound payloads are compressed by default
    pub compression_enabled: bool,

    /// Whether outbound payloads are encrypted by default
    pub encryption_enabled: bool,

    /// TLS settings
    #[serde(default)]
    pub tls: TlsConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            worker_tasks: DEFAULT_WORKER_TASKS,
            connect_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(3),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_endpoints: DEFAULT_MAX_ENDPOINTS,
            io_buffer_size: DEFAULT_IO_BUFFER_SIZE,
            compression_enabled: false,
            encryption_enabled: false,
            tls: TlsConfig::default(),
        }
    }
}

impl TransportConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            TransportError::InvalidParameters(format!("failed to read config file: {e}"))
        })?;
        Self::from_toml(&contents)
    }

    /// Load configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| TransportError::InvalidParameters(format!("failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables, starting from defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(workers) = std::env::var("RPC_TRANSPORT_WORKER_TASKS") {
            if let Ok(val) = workers.parse::<usize>() {
                config.worker_tasks = val;
            }
        }

        if let Ok(timeout) = std::env::var("RPC_TRANSPORT_CONNECT_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.connect_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(size) = std::env::var("RPC_TRANSPORT_MAX_MESSAGE_SIZE") {
            if let Ok(val) = size.parse::<usize>() {
                config.max_message_size = val;
            }
        }

        if let Ok(max) = std::env::var("RPC_TRANSPORT_MAX_ENDPOINTS") {
            if let Ok(val) = max.parse::<usize>() {
                config.max_endpoints = val;
            }
        }

        config
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Validate the configuration for common misconfigurations.
    ///
    /// Returns a list of validation errors. Empty list means the
    /// configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_message_size == 0 {
            errors.push("max_message_size cannot be 0".to_string());
        } else if self.max_message_size > 100 * 1024 * 1024 {
            errors.push(format!(
                "max_message_size too large: {} bytes (maximum: 100 MB)",
                self.max_message_size
            ));
        }

        if self.max_endpoints == 0 {
            errors.push("max_endpoints must be greater than 0".to_string());
        }

        if self.max_connections == 0 {
            errors.push("max_connections must be greater than 0".to_string());
        }

        if self.io_buffer_size == 0 {
            errors.push("io_buffer_size cannot be 0".to_string());
        }

        if self.connect_timeout.as_millis() < 10 {
            errors.push("connect_timeout too short (minimum: 10ms)".to_string());
        }

        if self.operation_timeout.as_millis() < 10 {
            errors.push("operation_timeout too short (minimum: 10ms)".to_string());
        }

        errors.extend(self.tls.validate());

        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(TransportError::InvalidParameters(format!(
                "configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }

    /// Replace invalid values with their defaults, field by field.
    ///
    /// `Transport::create` runs its input through this so a bad snapshot
    /// degrades to defaults instead of refusing to start.
    pub fn sanitized(&self) -> Self {
        let defaults = Self::default();
        let mut out = self.clone();

        if out.max_message_size == 0 || out.max_message_size > 100 * 1024 * 1024 {
            out.max_message_size = defaults.max_message_size;
        }
        if out.max_endpoints == 0 {
            out.max_endpoints = defaults.max_endpoints;
        }
        if out.max_connections == 0 {
            out.max_connections = defaults.max_connections;
        }
        if out.io_buffer_size == 0 {
            out.io_buffer_size = defaults.io_buffer_size;
        }
        if out.connect_timeout.as_millis() < 10 {
            out.connect_timeout = defaults.connect_timeout;
        }
        if out.operation_timeout.as_millis() < 10 {
            out.operation_timeout = defaults.operation_timeout;
        }

        out
    }
}

/// TLS settings: an enable flag and the PEM material paths the opaque TLS
/// handle is built from.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Whether TLS is enabled at startup
    pub enabled: bool,

    /// Path to the PEM certificate chain
    pub cert_path: Option<String>,

    /// Path to the PKCS#8 private key
    pub key_path: Option<String>,

    /// Path to a CA bundle used for peer verification
    pub ca_path: Option<String>,
}

impl TlsConfig {
    /// Validate TLS configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.enabled {
            if self.cert_path.is_none() {
                errors.push("tls.cert_path must be set when TLS is enabled".to_string());
            }
            if self.key_path.is_none() {
                errors.push("tls.key_path must be set when TLS is enabled".to_string());
            }
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(TransportConfig::default().validate().is_empty());
    }

    #[test]
    fn toml_roundtrip() {
        let config = TransportConfig::default_with_overrides(|c| {
            c.worker_tasks = 2;
            c.compression_enabled = true;
        });
        let text = toml::to_string(&config).unwrap();
        let parsed = TransportConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.worker_tasks, 2);
        assert!(parsed.compression_enabled);
    }

    #[test]
    fn tls_enabled_requires_material() {
        let config = TransportConfig::default_with_overrides(|c| {
            c.tls.enabled = true;
        });
        let errors = config.validate();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn sanitized_restores_defaults() {
        let config = TransportConfig::default_with_overrides(|c| {
            c.max_message_size = 0;
            c.io_buffer_size = 0;
        });
        let fixed = config.sanitized();
        assert_eq!(fixed.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
        assert_eq!(fixed.io_buffer_size, DEFAULT_IO_BUFFER_SIZE);
    }
}
