//! Folder, service and package command handlers
//!
//! Folder operations work on paths resolved inside the configured file root. Service,
//! package and custom configuration commands are forwarded to the component manager
//! unchanged; the gateway has already validated the session.

use std::path::Path;
use std::time::UNIX_EPOCH;

use tokio::fs;
use tracing::{debug, info};

use svcmgr_core::protocol::message::FolderEntry;
use svcmgr_core::{ManagerError, RequestData, ResponseData, Result, TransferError};

use super::state::ManagerState;

fn modified_ms(metadata: &std::fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Metadata of an existing regular file, or `NotFound` under its client-facing name
async fn require_file(path: &Path, name: &str) -> Result<std::fs::Metadata> {
    let not_found = || {
        ManagerError::from(TransferError::NotFound {
            path: name.to_string(),
        })
    };
    let metadata = fs::metadata(path).await.map_err(|_| not_found())?;
    if !metadata.is_file() {
        return Err(not_found());
    }
    Ok(metadata)
}

/// Handlers for folder operations
pub struct FolderHandlers;

impl FolderHandlers {
    pub async fn handle_list_folder(state: &ManagerState, path: &str) -> Result<Vec<ResponseData>> {
        let folder = state.file_root.resolve(path)?;
        let mut reader = fs::read_dir(&folder).await.map_err(|_| {
            ManagerError::from(TransferError::NotFound {
                path: path.to_string(),
            })
        })?;

        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let metadata = entry.metadata().await?;
            entries.push(FolderEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: metadata.is_dir(),
                length: if metadata.is_file() { metadata.len() } else { 0 },
                modified_ms: modified_ms(&metadata),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(vec![ResponseData::ListFolderResponse { entries }])
    }

    /// Copy or move a file; an existing destination is only replaced with `overwrite`
    pub async fn handle_transfer_file(
        state: &ManagerState,
        source: &str,
        destination: &str,
        overwrite: bool,
        remove_source: bool,
    ) -> Result<Vec<ResponseData>> {
        let from = state.file_root.resolve(source)?;
        let to = state.file_root.resolve(destination)?;
        require_file(&from, source).await?;

        if !overwrite && fs::try_exists(&to).await? {
            return Err(TransferError::DestinationExists {
                path: destination.to_string(),
            }
            .into());
        }
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).await?;
        }

        if remove_source {
            fs::rename(&from, &to).await?;
            info!(source, destination, "File moved");
        } else {
            fs::copy(&from, &to).await?;
            info!(source, destination, "File copied");
        }
        Ok(vec![ResponseData::FileOperationResponse {
            path: destination.to_string(),
        }])
    }

    pub async fn handle_delete_file(state: &ManagerState, path: &str) -> Result<Vec<ResponseData>> {
        let target = state.file_root.resolve(path)?;
        require_file(&target, path).await?;
        fs::remove_file(&target).await?;
        info!(path, "File deleted");
        Ok(vec![ResponseData::FileOperationResponse {
            path: path.to_string(),
        }])
    }
}

/// Pass-through handlers for the component manager
pub struct ServiceHandlers;

impl ServiceHandlers {
    /// Forward a service, package or custom configuration command
    pub async fn handle(state: &ManagerState, data: &RequestData) -> Result<Vec<ResponseData>> {
        let components = state.components.as_ref();
        let response = match data {
            RequestData::ListServices => ResponseData::ListServicesResponse {
                services: components.list_services().await?,
            },
            RequestData::GetService { service_id } => ResponseData::GetServiceResponse {
                service: components.get_service(service_id).await?,
            },
            RequestData::ServiceCommand { service_id, action } => {
                let service = components.control_service(service_id, *action).await?;
                info!(service = %service_id, action = %action, state = ?service.state, "Service command applied");
                ResponseData::ServiceCommandResponse { service }
            }
            RequestData::StopAll => ResponseData::BulkOperationResponse {
                affected: components.stop_all().await?,
            },
            RequestData::StartAll => ResponseData::BulkOperationResponse {
                affected: components.start_all().await?,
            },
            RequestData::Rescan => ResponseData::BulkOperationResponse {
                affected: components.rescan().await?,
            },
            RequestData::RestartAll => ResponseData::BulkOperationResponse {
                affected: components.restart_all().await?,
            },
            RequestData::ListPackages => ResponseData::ListPackagesResponse {
                packages: components.list_packages().await?,
            },
            RequestData::InstallPackage {
                package_id,
                content,
            } => {
                let package = components.install_package(package_id, content.clone()).await?;
                info!(package = %package_id, version = %package.version, "Package installed");
                ResponseData::PackageOperationResponse {
                    package_id: package_id.clone(),
                    package: Some(package),
                }
            }
            RequestData::UninstallPackage { package_id } => {
                components.uninstall_package(package_id).await?;
                info!(package = %package_id, "Package uninstalled");
                ResponseData::PackageOperationResponse {
                    package_id: package_id.clone(),
                    package: None,
                }
            }
            RequestData::SetPackageEnabled {
                package_id,
                enabled,
            } => ResponseData::PackageOperationResponse {
                package_id: package_id.clone(),
                package: Some(components.set_package_enabled(package_id, *enabled).await?),
            },
            RequestData::DependencyChain { package_id } => ResponseData::DependencyChainResponse {
                package_id: package_id.clone(),
                chain: components.dependency_chain(package_id).await?,
            },
            RequestData::ReferencedBy { package_id } => ResponseData::ReferencedByResponse {
                package_id: package_id.clone(),
                referrers: components.referenced_by(package_id).await?,
            },
            RequestData::ReadCustomConfig { package_id } => ResponseData::ReadCustomConfigResponse {
                package_id: package_id.clone(),
                content: components.read_custom_config(package_id).await?,
            },
            RequestData::WriteCustomConfig {
                package_id,
                content,
            } => {
                components
                    .write_custom_config(package_id, content.clone())
                    .await?;
                debug!(package = %package_id, bytes = content.len(), "Custom configuration written");
                ResponseData::WriteCustomConfigResponse {
                    package_id: package_id.clone(),
                }
            }
            other => {
                return Err(ManagerError::invalid_request(format!(
                    "{} is not a component command",
                    other.command()
                )))
            }
        };
        Ok(vec![response])
    }
}
