//! Service Manager CLI Configuration
//!
//! The CLI reads a single TOML file with three tables: `[manager]` holds the
//! [`ManagerConfig`] of the manager it runs, `[client]` the [`ClientConfig`] of the
//! client it drives, and `[demo]` the settings of the demo scenario. Missing tables and
//! fields fall back to their defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use svcmgr_core::{ClientConfig, ManagerConfig};

use crate::error::{CliError, Result};

/// Evidence the demo preset shares between its manager and client
const DEMO_EVIDENCE: &[u8] = b"svcmgr-demo-evidence";

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the CLI application
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub manager: ManagerConfig,
    pub client: ClientConfig,
    pub demo: DemoConfig,
}

/// Settings of the `demo` scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Bus endpoint id of the demo client
    pub client_id: String,
    /// Number of synthetic log entries the demo log store holds
    pub log_entries: usize,
    /// Where the downloaded copy is written; a fresh temp directory when unset
    pub download_dir: Option<PathBuf>,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            client_id: "svcmgr-demo-client".to_string(),
            log_entries: 25,
            download_dir: None,
        }
    }
}

impl AppConfig {
    /// Ready-to-run configuration for the demo: valid evidence and private temp roots
    pub fn demo() -> Self {
        let mut manager = ManagerConfig::testing(DEMO_EVIDENCE);
        manager.manager_id = ManagerConfig::default().manager_id;
        Self {
            manager,
            client: ClientConfig::default(),
            demo: DemoConfig::default(),
        }
    }

    /// Per-user configuration file, if the platform has a config directory
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("svcmgr").join("svcmgr.toml"))
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        debug!(path = %path.display(), manager = %config.manager.manager_id, "Configuration loaded");
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check the manager settings and that the client can talk to that manager
    pub fn validate(&self) -> Result<()> {
        self.manager.validate()?;
        if self.client.response_timeout_ms == 0 {
            return Err(CliError::Config(
                "client.response_timeout_ms must be non-zero".to_string(),
            ));
        }
        if self.client.wire_format != self.manager.wire_format {
            return Err(CliError::Config(format!(
                "client wire format {:?} does not match manager wire format {:?}",
                self.client.wire_format, self.manager.wire_format
            )));
        }
        if self.demo.client_id.is_empty() || self.demo.client_id == self.manager.manager_id {
            return Err(CliError::Config(
                "demo.client_id must be set and differ from the manager id".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use svcmgr_core::WireFormat;

    #[test]
    fn test_demo_preset_is_valid() {
        let config = AppConfig::demo();
        assert!(config.validate().is_ok());
        assert_eq!(config.manager.manager_id, "service-manager");
    }

    #[test]
    fn test_default_config_lacks_evidence() {
        assert!(AppConfig::default().validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = AppConfig::demo();
        let text = config.to_toml().unwrap();
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.manager.session.evidence_hex, config.manager.session.evidence_hex);
        assert_eq!(parsed.manager.transfer.chunk_size, config.manager.transfer.chunk_size);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: AppConfig = toml::from_str(
            "[manager]\nmanager_id = \"edge-1\"\n\n[manager.session]\nevidence_hex = \"abcd\"\n",
        )
        .unwrap();
        assert_eq!(parsed.manager.manager_id, "edge-1");
        assert_eq!(parsed.manager.session.max_logins, 8);
        assert_eq!(parsed.demo.log_entries, 25);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_wire_format_mismatch_rejected() {
        let mut config = AppConfig::demo();
        config.client.wire_format = WireFormat::Json;
        assert!(matches!(config.validate(), Err(CliError::Config(_))));
    }
}
