//! The closed command taxonomy of the Service Manager protocol
//!
//! Every envelope's payload variant maps onto exactly one [`Command`]. The gateway uses
//! the command to decide whether a request needs a live session ([`Command::is_bootstrap`]).

use core::fmt;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Command Kinds
// ----------------------------------------------------------------------------

/// Message kinds carried by requests and responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    // Liveness
    Ping,
    PingResponse,
    SessionAlive,
    SessionAliveResponse,

    // Session
    LoginRequest,
    LoginRequestResponse,
    LoginCredential,
    LoginResponse,
    Logout,
    LogoutResponse,

    // Upload (client to manager)
    PutRequest,
    PutRequestResponse,
    PutInformation,
    PutReady,
    PutSegment,
    PutComplete,
    PutThrottle,

    // Download (manager to client)
    GetRequest,
    GetRequestResponse,
    GetInformation,
    GetInformationResponse,
    GetReady,
    GetSegment,
    GetComplete,
    GetThrottle,

    // Cancellation of a live operation
    Cancel,
    Canceled,

    // Folder and file operations
    ListFolder,
    ListFolderResponse,
    CopyFile,
    MoveFile,
    DeleteFile,
    FileOperationResponse,

    // Logs
    GetLogs,
    GetLogsResponse,
    GetLogsComplete,

    // Service control
    ListServices,
    ListServicesResponse,
    GetService,
    GetServiceResponse,
    ServiceCommand,
    ServiceCommandResponse,
    StopAll,
    StartAll,
    Rescan,
    RestartAll,
    BulkOperationResponse,

    // Packaging
    ListPackages,
    ListPackagesResponse,
    InstallPackage,
    UninstallPackage,
    SetPackageEnabled,
    PackageOperationResponse,
    DependencyChain,
    DependencyChainResponse,
    ReferencedBy,
    ReferencedByResponse,
    ReadCustomConfig,
    ReadCustomConfigResponse,
    WriteCustomConfig,
    WriteCustomConfigResponse,

    // Failure of any request
    Error,
}

impl Command {
    /// Commands handled without a live session
    pub const BOOTSTRAP: [Command; 5] = [
        Command::Ping,
        Command::SessionAlive,
        Command::LoginRequest,
        Command::LoginCredential,
        Command::Logout,
    ];

    /// Whether the gateway handles this command without a session
    pub fn is_bootstrap(self) -> bool {
        Self::BOOTSTRAP.contains(&self)
    }

    /// Commands addressed to the in-flight operation registered under the group key
    /// rather than to a stateless handler
    pub fn targets_live_operation(self) -> bool {
        matches!(
            self,
            Command::PutInformation
                | Command::PutSegment
                | Command::GetInformation
                | Command::GetReady
                | Command::GetThrottle
                | Command::Cancel
        )
    }

    /// Human-readable name, identical to the variant name
    pub fn name(self) -> &'static str {
        match self {
            Command::Ping => "Ping",
            Command::PingResponse => "PingResponse",
            Command::SessionAlive => "SessionAlive",
            Command::SessionAliveResponse => "SessionAliveResponse",
            Command::LoginRequest => "LoginRequest",
            Command::LoginRequestResponse => "LoginRequestResponse",
            Command::LoginCredential => "LoginCredential",
            Command::LoginResponse => "LoginResponse",
            Command::Logout => "Logout",
            Command::LogoutResponse => "LogoutResponse",
            Command::PutRequest => "PutRequest",
            Command::PutRequestResponse => "PutRequestResponse",
            Command::PutInformation => "PutInformation",
            Command::PutReady => "PutReady",
            Command::PutSegment => "PutSegment",
            Command::PutComplete => "PutComplete",
            Command::PutThrottle => "PutThrottle",
            Command::GetRequest => "GetRequest",
            Command::GetRequestResponse => "GetRequestResponse",
            Command::GetInformation => "GetInformation",
            Command::GetInformationResponse => "GetInformationResponse",
            Command::GetReady => "GetReady",
            Command::GetSegment => "GetSegment",
            Command::GetComplete => "GetComplete",
            Command::GetThrottle => "GetThrottle",
            Command::Cancel => "Cancel",
            Command::Canceled => "Canceled",
            Command::ListFolder => "ListFolder",
            Command::ListFolderResponse => "ListFolderResponse",
            Command::CopyFile => "CopyFile",
            Command::MoveFile => "MoveFile",
            Command::DeleteFile => "DeleteFile",
            Command::FileOperationResponse => "FileOperationResponse",
            Command::GetLogs => "GetLogs",
            Command::GetLogsResponse => "GetLogsResponse",
            Command::GetLogsComplete => "GetLogsComplete",
            Command::ListServices => "ListServices",
            Command::ListServicesResponse => "ListServicesResponse",
            Command::GetService => "GetService",
            Command::GetServiceResponse => "GetServiceResponse",
            Command::ServiceCommand => "ServiceCommand",
            Command::ServiceCommandResponse => "ServiceCommandResponse",
            Command::StopAll => "StopAll",
            Command::StartAll => "StartAll",
            Command::Rescan => "Rescan",
            Command::RestartAll => "RestartAll",
            Command::BulkOperationResponse => "BulkOperationResponse",
            Command::ListPackages => "ListPackages",
            Command::ListPackagesResponse => "ListPackagesResponse",
            Command::InstallPackage => "InstallPackage",
            Command::UninstallPackage => "UninstallPackage",
            Command::SetPackageEnabled => "SetPackageEnabled",
            Command::PackageOperationResponse => "PackageOperationResponse",
            Command::DependencyChain => "DependencyChain",
            Command::DependencyChainResponse => "DependencyChainResponse",
            Command::ReferencedBy => "ReferencedBy",
            Command::ReferencedByResponse => "ReferencedByResponse",
            Command::ReadCustomConfig => "ReadCustomConfig",
            Command::ReadCustomConfigResponse => "ReadCustomConfigResponse",
            Command::WriteCustomConfig => "WriteCustomConfig",
            Command::WriteCustomConfigResponse => "WriteCustomConfigResponse",
            Command::Error => "Error",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_set() {
        assert!(Command::Ping.is_bootstrap());
        assert!(Command::SessionAlive.is_bootstrap());
        assert!(Command::LoginRequest.is_bootstrap());
        assert!(Command::LoginCredential.is_bootstrap());
        assert!(Command::Logout.is_bootstrap());

        assert!(!Command::PutRequest.is_bootstrap());
        assert!(!Command::Cancel.is_bootstrap());
        assert!(!Command::ListServices.is_bootstrap());
    }

    #[test]
    fn test_display_uses_variant_name() {
        assert_eq!(Command::GetLogsComplete.to_string(), "GetLogsComplete");
        assert_eq!(format!("{:?}", Command::PutThrottle), Command::PutThrottle.name());
    }
}
