//! Demo application
//!
//! Runs a complete Service Manager and a [`ManagerClient`] in one process, connected by
//! the harness's in-memory bus, and walks the client through a session: login, a file
//! upload and download with hash verification, a log stream, and logout.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use svcmgr_core::{ClientId, LogFilter, LogLevel, SealedBoxCrypto, ServiceState};
use svcmgr_harness::{MemoryBus, MemoryLogStore, MockComponentManager};
use svcmgr_runtime::{
    CancelSignal, GroupKey, ManagerClient, ManagerStats, ServiceManager, ServiceManagerBuilder,
    TransferReport,
};

use crate::config::AppConfig;
use crate::error::{CliError, Result};

/// What the demo did, printed as JSON at the end of a run
#[derive(Debug, Clone, Serialize)]
pub struct DemoSummary {
    pub manager_id: String,
    pub client_id: String,
    pub session_id: String,
    pub services: Vec<String>,
    pub upload: TransferReport,
    pub download: TransferReport,
    pub downloaded_to: PathBuf,
    pub hashes_match: bool,
    pub log_entries: usize,
    pub logout_was_active: bool,
    pub stats: ManagerStats,
}

/// A manager and a client wired together on an in-memory bus
pub struct DemoApp {
    config: AppConfig,
    manager: ServiceManager,
    client: ManagerClient,
    evidence: Vec<u8>,
}

impl DemoApp {
    /// Validate the configuration, start the manager and connect the client
    pub async fn start(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let evidence = config.manager.session.evidence_bytes()?;
        let bus = MemoryBus::new();

        let (manager_endpoint, manager_inbound) = bus.endpoint(&config.manager.manager_id);
        let components = MockComponentManager::new()
            .with_service("web", ServiceState::Running)
            .with_service("scheduler", ServiceState::Running)
            .with_service("backup", ServiceState::Stopped)
            .with_package("web", &["runtime"])
            .with_package("runtime", &[]);
        let logs = MemoryLogStore::generated("demo", config.demo.log_entries);

        let manager = ServiceManagerBuilder::new()
            .with_config(config.manager.clone())
            .with_bus(manager_endpoint, manager_inbound)
            .with_component_manager(Arc::new(components))
            .with_log_store(Arc::new(logs))
            .build_and_start()
            .await?;

        let (client_endpoint, client_inbound) = bus.endpoint(&config.demo.client_id);
        let client = ManagerClient::connect(
            client_endpoint,
            client_inbound,
            config.manager.manager_id(),
            Arc::new(SealedBoxCrypto::new()),
            config.client.clone(),
        );
        info!(manager = %manager.manager_id(), client = %config.demo.client_id, "Demo started");

        Ok(Self {
            config,
            manager,
            client,
            evidence,
        })
    }

    pub fn client_id(&self) -> &ClientId {
        self.client.local_id()
    }

    fn download_path(&self, name: &str) -> PathBuf {
        let dir = self.config.demo.download_dir.clone().unwrap_or_else(|| {
            std::env::temp_dir().join(format!("svcmgr-demo-{}", uuid::Uuid::new_v4()))
        });
        dir.join(name)
    }

    /// Round-trip `file` through the manager and report what happened
    pub async fn run(&self, file: &Path) -> Result<DemoSummary> {
        let name = file
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| CliError::Demo(format!("{} has no usable file name", file.display())))?
            .to_string();
        let cancel = CancelSignal::new();

        let manager_time = self.client.ping().await?;
        info!(manager_time = %manager_time, "Manager reachable");

        let session_id = self.client.login(&self.evidence, &cancel).await?;
        let services = self
            .client
            .list_services()
            .await?
            .into_iter()
            .map(|service| format!("{} ({:?})", service.id, service.state))
            .collect();

        let upload = self
            .client
            .upload(&GroupKey::generate(), file, &name, &cancel)
            .await?;

        let downloaded_to = self.download_path(&name);
        let download = self
            .client
            .download(&GroupKey::generate(), &name, &downloaded_to, true, &cancel)
            .await?;
        let hashes_match = upload.hash == download.hash && upload.bytes == download.bytes;
        if !hashes_match {
            return Err(CliError::Demo(format!(
                "round trip changed the file: uploaded {}, downloaded {}",
                upload.hash, download.hash
            )));
        }

        let filter = LogFilter {
            min_level: Some(LogLevel::Info),
            ..LogFilter::default()
        };
        let log_entries = self.client.get_logs(filter, &cancel).await?.len();
        let logout_was_active = self.client.logout().await?;

        Ok(DemoSummary {
            manager_id: self.manager.manager_id().to_string(),
            client_id: self.client_id().to_string(),
            session_id: session_id.to_string(),
            services,
            upload,
            download,
            downloaded_to,
            hashes_match,
            log_entries,
            logout_was_active,
            stats: self.manager.stats(),
        })
    }

    /// Stop the manager; returns how many operations were still pending
    pub async fn shutdown(mut self) -> Result<usize> {
        Ok(self.manager.shutdown().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_demo_round_trips_a_file() {
        let dir = std::env::temp_dir().join(format!("svcmgr-cli-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("payload.bin");
        let data: Vec<u8> = (0..2500u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&file, &data).unwrap();

        let mut config = AppConfig::demo();
        config.demo.download_dir = Some(dir.join("out"));
        let app = DemoApp::start(config).await.unwrap();
        let summary = app.run(&file).await.unwrap();

        assert!(summary.hashes_match);
        assert_eq!(summary.upload.bytes, 2500);
        assert_eq!(summary.upload.segments, 3);
        assert_eq!(std::fs::read(&summary.downloaded_to).unwrap(), data);
        assert!(summary.logout_was_active);
        assert_eq!(summary.services.len(), 3);
        // Info, warn and error entries out of the 25 generated ones
        assert_eq!(summary.log_entries, 18);

        app.shutdown().await.unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }
}
