//! Service Manager Builder API
//!
//! Provides a builder-style API for consumers (CLI, demos, tests) to wire a manager to
//! its bus endpoint and collaborators and start it.

use std::sync::Arc;

use tracing::info;

use svcmgr_core::{
    ComponentManager, CryptoProvider, InboundReceiver, LogStore, ManagerConfig, ManagerError,
    MessageBus, Result, SealedBoxCrypto,
};

use crate::logic::ManagerState;
use crate::runtime::ServiceManager;

// ----------------------------------------------------------------------------
// Service Manager Builder
// ----------------------------------------------------------------------------

/// Builder for a [`ServiceManager`]
///
/// The bus endpoint, the component manager and the log store are required; the crypto
/// provider defaults to [`SealedBoxCrypto`].
pub struct ServiceManagerBuilder {
    config: ManagerConfig,
    bus: Option<(Arc<dyn MessageBus>, InboundReceiver)>,
    crypto: Arc<dyn CryptoProvider>,
    components: Option<Arc<dyn ComponentManager>>,
    logs: Option<Arc<dyn LogStore>>,
}

impl Default for ServiceManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceManagerBuilder {
    pub fn new() -> Self {
        Self {
            config: ManagerConfig::default(),
            bus: None,
            crypto: Arc::new(SealedBoxCrypto::new()),
            components: None,
            logs: None,
        }
    }

    /// Set the manager configuration
    pub fn with_config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach the bus endpoint the manager listens on, with its inbound receiver
    pub fn with_bus(mut self, bus: Arc<dyn MessageBus>, inbound: InboundReceiver) -> Self {
        self.bus = Some((bus, inbound));
        self
    }

    /// Replace the default crypto provider
    pub fn with_crypto(mut self, crypto: Arc<dyn CryptoProvider>) -> Self {
        self.crypto = crypto;
        self
    }

    pub fn with_component_manager(mut self, components: Arc<dyn ComponentManager>) -> Self {
        self.components = Some(components);
        self
    }

    pub fn with_log_store(mut self, logs: Arc<dyn LogStore>) -> Self {
        self.logs = Some(logs);
        self
    }

    /// Validate the configuration, create the file and staging roots, then start ingress
    /// and the expiry sweep
    pub async fn build_and_start(self) -> Result<ServiceManager> {
        self.config.validate()?;
        let (bus, inbound) = self
            .bus
            .ok_or_else(|| ManagerError::config_error("a message bus endpoint is required"))?;
        let components = self
            .components
            .ok_or_else(|| ManagerError::config_error("a component manager is required"))?;
        let logs = self
            .logs
            .ok_or_else(|| ManagerError::config_error("a log store is required"))?;

        info!(manager = %self.config.manager_id, endpoint = %bus.local_id(), "Building service manager");
        let state = ManagerState::new(self.config, bus, self.crypto, components, logs)?;
        state.file_root.ensure().await?;
        state.staging.ensure().await?;

        Ok(ServiceManager::start(Arc::new(state), inbound))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use svcmgr_harness::{MemoryBus, MemoryLogStore, MockComponentManager};

    #[tokio::test]
    async fn test_builder_starts_and_stops_manager() {
        let hub = MemoryBus::new();
        let (endpoint, inbound) = hub.endpoint("test-manager");

        let mut manager = ServiceManagerBuilder::new()
            .with_config(ManagerConfig::testing(b"evidence"))
            .with_bus(endpoint, inbound)
            .with_component_manager(Arc::new(MockComponentManager::new()))
            .with_log_store(Arc::new(MemoryLogStore::new()))
            .build_and_start()
            .await
            .expect("Failed to start manager");

        assert!(manager.is_running());
        assert_eq!(manager.manager_id().as_str(), "test-manager");
        assert_eq!(manager.active_sessions(), 0);
        assert_eq!(manager.stats(), Default::default());

        manager.shutdown().await.expect("Failed to shutdown");
        assert!(!manager.is_running());
    }

    #[tokio::test]
    async fn test_builder_creates_file_and_staging_roots() {
        let hub = MemoryBus::new();
        let (endpoint, inbound) = hub.endpoint("test-manager");
        let config = ManagerConfig::testing(b"evidence");
        assert!(!config.transfer.staging_root.exists());

        let mut manager = ServiceManagerBuilder::new()
            .with_config(config.clone())
            .with_bus(endpoint, inbound)
            .with_component_manager(Arc::new(MockComponentManager::new()))
            .with_log_store(Arc::new(MemoryLogStore::new()))
            .build_and_start()
            .await
            .expect("Failed to start manager");

        assert!(config.transfer.file_root.is_dir());
        assert!(config.transfer.staging_root.is_dir());
        manager.shutdown().await.expect("Failed to shutdown");
    }

    #[tokio::test]
    async fn test_builder_requires_collaborators() {
        let result = ServiceManagerBuilder::new()
            .with_config(ManagerConfig::testing(b"evidence"))
            .build_and_start()
            .await;
        assert!(matches!(result, Err(ManagerError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_builder_rejects_invalid_config() {
        let hub = MemoryBus::new();
        let (endpoint, inbound) = hub.endpoint("service-manager");
        let result = ServiceManagerBuilder::new()
            .with_bus(endpoint, inbound)
            .with_component_manager(Arc::new(MockComponentManager::new()))
            .with_log_store(Arc::new(MemoryLogStore::new()))
            .build_and_start()
            .await;
        // The default configuration carries no access evidence.
        assert!(result.is_err());
    }
}
