//! Scripted component manager
//!
//! [`MockComponentManager`] keeps services, packages and custom configuration in memory
//! and records every call it receives. It can be told to panic inside one method, which
//! is how the gateway's panic isolation is exercised.

use async_trait::async_trait;
use hashbrown::{HashMap, HashSet};
use tokio::sync::Mutex;
use tracing::debug;

use svcmgr_core::{
    ComponentManager, ManagerError, PackageInfo, Result, ServiceAction, ServiceInfo, ServiceState,
};

#[derive(Default)]
struct Inventory {
    services: HashMap<String, ServiceInfo>,
    packages: HashMap<String, PackageInfo>,
    configs: HashMap<String, Vec<u8>>,
}

impl Inventory {
    fn service(&mut self, service_id: &str) -> Result<&mut ServiceInfo> {
        self.services
            .get_mut(service_id)
            .ok_or_else(|| ManagerError::service(format!("unknown service {}", service_id)))
    }

    fn package(&mut self, package_id: &str) -> Result<&mut PackageInfo> {
        self.packages
            .get_mut(package_id)
            .ok_or_else(|| ManagerError::service(format!("unknown package {}", package_id)))
    }

    /// Set every service matching `from` to `to`, returning the ids changed
    fn transition(&mut self, from: Option<ServiceState>, to: ServiceState) -> Vec<String> {
        let mut affected: Vec<String> = self
            .services
            .values_mut()
            .filter(|service| from.map_or(true, |from| service.state == from))
            .map(|service| {
                service.state = to;
                service.id.clone()
            })
            .collect();
        affected.sort();
        affected
    }
}

/// In-memory [`ComponentManager`]
#[derive(Default)]
pub struct MockComponentManager {
    inventory: Mutex<Inventory>,
    calls: Mutex<Vec<String>>,
    panic_on: Option<String>,
}

impl MockComponentManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a service in the given state
    pub fn with_service(mut self, id: &str, state: ServiceState) -> Self {
        let service = ServiceInfo {
            id: id.to_string(),
            name: format!("{} service", id),
            version: "1.0.0".to_string(),
            state,
        };
        self.inventory.get_mut().services.insert(id.to_string(), service);
        self
    }

    /// Add an enabled package depending on `dependencies`
    pub fn with_package(mut self, id: &str, dependencies: &[&str]) -> Self {
        let package = PackageInfo {
            id: id.to_string(),
            version: "1.0.0".to_string(),
            enabled: true,
            dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
        };
        self.inventory.get_mut().packages.insert(id.to_string(), package);
        self
    }

    /// Panic whenever `method` is called
    pub fn panicking_on(mut self, method: &str) -> Self {
        self.panic_on = Some(method.to_string());
        self
    }

    /// Names of the methods called so far, in call order
    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    async fn record(&self, method: &str) {
        debug!(method, "Component manager called");
        self.calls.lock().await.push(method.to_string());
        if self.panic_on.as_deref() == Some(method) {
            panic!("{} blew up", method);
        }
    }
}

#[async_trait]
impl ComponentManager for MockComponentManager {
    async fn list_services(&self) -> Result<Vec<ServiceInfo>> {
        self.record("list_services").await;
        let inventory = self.inventory.lock().await;
        let mut services: Vec<ServiceInfo> = inventory.services.values().cloned().collect();
        services.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(services)
    }

    async fn get_service(&self, service_id: &str) -> Result<ServiceInfo> {
        self.record("get_service").await;
        let mut inventory = self.inventory.lock().await;
        inventory.service(service_id).map(|service| service.clone())
    }

    async fn control_service(&self, service_id: &str, action: ServiceAction) -> Result<ServiceInfo> {
        self.record("control_service").await;
        let mut inventory = self.inventory.lock().await;
        let service = inventory.service(service_id)?;
        service.state = match action {
            ServiceAction::Start | ServiceAction::Restart => ServiceState::Running,
            ServiceAction::Stop => ServiceState::Stopped,
        };
        Ok(service.clone())
    }

    async fn stop_all(&self) -> Result<Vec<String>> {
        self.record("stop_all").await;
        let mut inventory = self.inventory.lock().await;
        Ok(inventory.transition(Some(ServiceState::Running), ServiceState::Stopped))
    }

    async fn start_all(&self) -> Result<Vec<String>> {
        self.record("start_all").await;
        let mut inventory = self.inventory.lock().await;
        Ok(inventory.transition(Some(ServiceState::Stopped), ServiceState::Running))
    }

    async fn rescan(&self) -> Result<Vec<String>> {
        self.record("rescan").await;
        Ok(Vec::new())
    }

    async fn restart_all(&self) -> Result<Vec<String>> {
        self.record("restart_all").await;
        let mut inventory = self.inventory.lock().await;
        Ok(inventory.transition(None, ServiceState::Running))
    }

    async fn list_packages(&self) -> Result<Vec<PackageInfo>> {
        self.record("list_packages").await;
        let inventory = self.inventory.lock().await;
        let mut packages: Vec<PackageInfo> = inventory.packages.values().cloned().collect();
        packages.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(packages)
    }

    async fn install_package(&self, package_id: &str, content: Vec<u8>) -> Result<PackageInfo> {
        self.record("install_package").await;
        if content.is_empty() {
            return Err(ManagerError::service("package content is empty"));
        }
        let package = PackageInfo {
            id: package_id.to_string(),
            version: "1.0.0".to_string(),
            enabled: true,
            dependencies: Vec::new(),
        };
        let mut inventory = self.inventory.lock().await;
        inventory.packages.insert(package_id.to_string(), package.clone());
        Ok(package)
    }

    async fn uninstall_package(&self, package_id: &str) -> Result<()> {
        self.record("uninstall_package").await;
        let mut inventory = self.inventory.lock().await;
        inventory
            .packages
            .remove(package_id)
            .map(|_| ())
            .ok_or_else(|| ManagerError::service(format!("unknown package {}", package_id)))
    }

    async fn set_package_enabled(&self, package_id: &str, enabled: bool) -> Result<PackageInfo> {
        self.record("set_package_enabled").await;
        let mut inventory = self.inventory.lock().await;
        let package = inventory.package(package_id)?;
        package.enabled = enabled;
        Ok(package.clone())
    }

    async fn dependency_chain(&self, package_id: &str) -> Result<Vec<String>> {
        self.record("dependency_chain").await;
        let mut inventory = self.inventory.lock().await;
        let mut frontier = inventory.package(package_id)?.dependencies.clone();
        let mut seen: HashSet<String> = HashSet::new();
        seen.insert(package_id.to_string());
        let mut chain = Vec::new();
        while !frontier.is_empty() {
            let mut next = Vec::new();
            for dependency in frontier {
                if !seen.insert(dependency.clone()) {
                    continue;
                }
                if let Some(package) = inventory.packages.get(&dependency) {
                    next.extend(package.dependencies.iter().cloned());
                }
                chain.push(dependency);
            }
            frontier = next;
        }
        Ok(chain)
    }

    async fn referenced_by(&self, package_id: &str) -> Result<Vec<String>> {
        self.record("referenced_by").await;
        let mut inventory = self.inventory.lock().await;
        inventory.package(package_id)?;
        let mut referrers: Vec<String> = inventory
            .packages
            .values()
            .filter(|package| package.dependencies.iter().any(|d| d == package_id))
            .map(|package| package.id.clone())
            .collect();
        referrers.sort();
        Ok(referrers)
    }

    async fn read_custom_config(&self, package_id: &str) -> Result<Vec<u8>> {
        self.record("read_custom_config").await;
        let mut inventory = self.inventory.lock().await;
        inventory.package(package_id)?;
        Ok(inventory.configs.get(package_id).cloned().unwrap_or_default())
    }

    async fn write_custom_config(&self, package_id: &str, content: Vec<u8>) -> Result<()> {
        self.record("write_custom_config").await;
        let mut inventory = self.inventory.lock().await;
        inventory.package(package_id)?;
        inventory.configs.insert(package_id.to_string(), content);
        Ok(())
    }
}
