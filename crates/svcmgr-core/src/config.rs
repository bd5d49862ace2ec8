//! Centralized Configuration Management
//!
//! This module consolidates all configuration structures used by the Service Manager
//! and its clients to provide a unified, consistent configuration interface.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{ManagerError, Result};
use crate::protocol::{HashAlgorithm, WireFormat};
use crate::types::ManagerId;

// ----------------------------------------------------------------------------
// Session Configuration
// ----------------------------------------------------------------------------

/// Configuration for the login handshake and session lifetime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum number of concurrently live sessions
    pub max_logins: usize,
    /// Sliding idle timeout for an established session
    pub session_timeout_ms: u64,
    /// Fixed lifetime of a login handshake awaiting its credential
    pub login_timeout_ms: u64,
    /// Hex-encoded access evidence agreed out-of-band
    pub evidence_hex: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_logins: 8,
            session_timeout_ms: 20 * 60 * 1000, // 20 minutes
            login_timeout_ms: 30 * 1000,
            evidence_hex: String::new(),
        }
    }
}

impl SessionConfig {
    /// Decode the configured access evidence
    pub fn evidence_bytes(&self) -> Result<Vec<u8>> {
        hex::decode(&self.evidence_hex)
            .map_err(|e| ManagerError::config_error(format!("invalid evidence_hex: {}", e)))
    }

    /// Set the access evidence from raw bytes
    pub fn with_evidence(mut self, evidence: &[u8]) -> Self {
        self.evidence_hex = hex::encode(evidence);
        self
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_millis(self.login_timeout_ms)
    }
}

// ----------------------------------------------------------------------------
// Store Configuration
// ----------------------------------------------------------------------------

/// What happens to pending operations when the manager shuts down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Invoke every remaining entry's expiry callback
    Drain,
    /// Drop remaining entries without running callbacks
    Discard,
}

/// Configuration for the pending-operation store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Interval between expiry sweeps
    pub purge_interval_ms: u64,
    /// Shutdown behavior for remaining entries
    pub shutdown_policy: ShutdownPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            purge_interval_ms: 5_000,
            shutdown_policy: ShutdownPolicy::Drain,
        }
    }
}

impl StoreConfig {
    pub fn purge_interval(&self) -> Duration {
        Duration::from_millis(self.purge_interval_ms)
    }
}

// ----------------------------------------------------------------------------
// Transfer Configuration
// ----------------------------------------------------------------------------

/// Configuration for the chunked file transfer sub-protocol
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Accept client-to-manager uploads
    pub upload_enabled: bool,
    /// Serve manager-to-client downloads
    pub download_enabled: bool,
    /// Recommended segment size in bytes
    pub chunk_size: usize,
    /// Largest segment size a throttle may request
    pub max_chunk_size: usize,
    /// Base inter-segment delay, scaled by the number of in-flight transfers
    pub base_delay_ms: u64,
    /// Sliding idle timeout of an in-flight transfer
    pub transfer_timeout_ms: u64,
    /// Whole-file hash algorithm
    pub hash_algorithm: HashAlgorithm,
    /// Directory under which per-transfer staging directories are created
    pub staging_root: PathBuf,
    /// Directory that transfer and file operations are confined to
    pub file_root: PathBuf,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            upload_enabled: true,
            download_enabled: true,
            chunk_size: 64 * 1024,
            max_chunk_size: 1024 * 1024,
            base_delay_ms: 0,
            transfer_timeout_ms: 5 * 60 * 1000,
            hash_algorithm: HashAlgorithm::Sha256,
            staging_root: std::env::temp_dir().join("svcmgr-staging"),
            file_root: std::env::temp_dir().join("svcmgr-files"),
        }
    }
}

impl TransferConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }
}

// ----------------------------------------------------------------------------
// Log Stream Configuration
// ----------------------------------------------------------------------------

/// Configuration for streaming log queries to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogStreamConfig {
    /// Number of log entries per streamed message
    pub chunk_size: usize,
    /// Idle timeout of a log stream entry
    pub stream_timeout_ms: u64,
}

impl Default for LogStreamConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            stream_timeout_ms: 60 * 1000,
        }
    }
}

impl LogStreamConfig {
    pub fn stream_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_timeout_ms)
    }
}

// ----------------------------------------------------------------------------
// Manager Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for a Service Manager instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Identifies this manager and names its bus endpoint
    pub manager_id: String,
    /// Serializer used for every envelope
    pub wire_format: WireFormat,
    pub session: SessionConfig,
    pub store: StoreConfig,
    pub transfer: TransferConfig,
    pub logs: LogStreamConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            manager_id: "service-manager".to_string(),
            wire_format: WireFormat::Bincode,
            session: SessionConfig::default(),
            store: StoreConfig::default(),
            transfer: TransferConfig::default(),
            logs: LogStreamConfig::default(),
        }
    }
}

impl ManagerConfig {
    /// Create configuration for tests: short timeouts, fast sweeps, and
    /// private staging/file roots under the system temp directory
    pub fn testing(evidence: &[u8]) -> Self {
        let scratch = std::env::temp_dir().join(format!("svcmgr-test-{}", uuid::Uuid::new_v4()));
        Self {
            manager_id: "test-manager".to_string(),
            wire_format: WireFormat::Bincode,
            session: SessionConfig {
                max_logins: 4,
                session_timeout_ms: 60_000,
                login_timeout_ms: 10_000,
                evidence_hex: hex::encode(evidence),
            },
            store: StoreConfig {
                purge_interval_ms: 50,
                shutdown_policy: ShutdownPolicy::Drain,
            },
            transfer: TransferConfig {
                chunk_size: 1000,
                max_chunk_size: 64 * 1024,
                base_delay_ms: 0,
                transfer_timeout_ms: 30_000,
                staging_root: scratch.join("staging"),
                file_root: scratch.join("files"),
                ..TransferConfig::default()
            },
            logs: LogStreamConfig {
                chunk_size: 10,
                stream_timeout_ms: 30_000,
            },
        }
    }

    /// Manager id as a typed identifier
    pub fn manager_id(&self) -> ManagerId {
        ManagerId::new(self.manager_id.clone())
    }

    /// Check the configuration for values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.manager_id.is_empty() {
            return Err(ManagerError::config_error("manager_id cannot be empty"));
        }
        if self.session.max_logins == 0 {
            return Err(ManagerError::config_error("session.max_logins must be at least 1"));
        }
        if self.session.evidence_bytes()?.is_empty() {
            return Err(ManagerError::config_error("session.evidence_hex cannot be empty"));
        }
        if self.session.session_timeout_ms == 0 || self.session.login_timeout_ms == 0 {
            return Err(ManagerError::config_error("session timeouts must be non-zero"));
        }
        if self.store.purge_interval_ms == 0 {
            return Err(ManagerError::config_error("store.purge_interval_ms must be non-zero"));
        }
        if self.transfer.chunk_size == 0 {
            return Err(ManagerError::config_error("transfer.chunk_size must be non-zero"));
        }
        if self.transfer.chunk_size > self.transfer.max_chunk_size {
            return Err(ManagerError::config_error(format!(
                "transfer.chunk_size {} exceeds max_chunk_size {}",
                self.transfer.chunk_size, self.transfer.max_chunk_size
            )));
        }
        if self.logs.chunk_size == 0 {
            return Err(ManagerError::config_error("logs.chunk_size must be non-zero"));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Client Configuration
// ----------------------------------------------------------------------------

/// Configuration for a protocol client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Default deadline for a single response
    pub response_timeout_ms: u64,
    /// Serializer used for every envelope (must match the manager)
    pub wire_format: WireFormat,
    /// Directory under which download staging directories are created
    pub staging_root: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: 30_000,
            wire_format: WireFormat::Bincode,
            staging_root: std::env::temp_dir().join("svcmgr-client-staging"),
        }
    }
}

impl ClientConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_requires_evidence() {
        let config = ManagerConfig::default();
        assert!(config.validate().is_err());

        let mut config = ManagerConfig::default();
        config.session = config.session.with_evidence(b"secret");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_testing_config_is_valid() {
        let config = ManagerConfig::testing(b"evidence");
        config.validate().unwrap();
        assert_eq!(config.session.evidence_bytes().unwrap(), b"evidence".to_vec());
        assert_ne!(config.transfer.staging_root, config.transfer.file_root);
    }

    #[test]
    fn test_chunk_size_bounded_by_max() {
        let mut config = ManagerConfig::testing(b"evidence");
        config.transfer.chunk_size = config.transfer.max_chunk_size + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_evidence_hex() {
        let session = SessionConfig {
            evidence_hex: "zz".into(),
            ..SessionConfig::default()
        };
        assert!(session.evidence_bytes().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ManagerConfig =
            serde_json::from_str(r#"{"manager_id":"edge-01","session":{"max_logins":2}}"#)
                .unwrap();
        assert_eq!(config.manager_id, "edge-01");
        assert_eq!(config.session.max_logins, 2);
        assert_eq!(config.store.shutdown_policy, ShutdownPolicy::Drain);
    }
}
