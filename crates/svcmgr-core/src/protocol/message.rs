//! Request/response envelopes and their typed payloads
//!
//! The polymorphic `data` payload of an envelope is a sum type keyed by command, so the
//! dispatcher matches exhaustively over [`RequestData`]. Payloads that cross the bus
//! before a session exists (credential, session grant, transfer negotiation) travel as
//! [`TunnelPayload`]s.

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::protocol::command::Command;
use crate::protocol::crypto::PublicKey;
use crate::protocol::file_transfer::{Pace, Segment, TransferOutcome};
use crate::protocol::tunnel::TunnelPayload;
use crate::services::{LogEntry, LogFilter, PackageInfo, ServiceAction, ServiceInfo};
use crate::types::{GroupKey, ManagerId, SessionId, Timestamp};

// ----------------------------------------------------------------------------
// Error Codes
// ----------------------------------------------------------------------------

/// Machine-readable failure reason carried by an error response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// The session id does not reference a live session
    InvalidSession,
    /// The session exists but belongs to another endpoint
    InvalidCaller,
    /// A correlation key is already in use
    DuplicateKey,
    /// A tunnel payload could not be opened or parsed
    MalformedCredential,
    InvalidRequest,
    /// The manager is at its session limit
    CapacityReached,
    /// The submitted access evidence was rejected
    AccessDenied,
    /// The requested feature is switched off on this manager
    FeatureDisabled,
    NotFound,
    InvalidPath,
    TransferFailed,
    /// A collaborator reported a failure
    ServiceFailure,
    Timeout,
    Canceled,
    Internal,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Payload of an error response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorInfo {
    pub fn new<M: Into<String>>(code: ErrorCode, message: M) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Tunneled Session Payloads
// ----------------------------------------------------------------------------

/// Client credential, sealed to the manager's login key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Client's ephemeral key; the session grant is sealed to it
    pub public_key: PublicKey,
    /// Proof-of-access evidence agreed out-of-band
    pub evidence: Vec<u8>,
}

/// Session grant, sealed to the client's credential key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionGrant {
    pub session_id: SessionId,
    pub success: bool,
    pub manager_id: ManagerId,
}

// ----------------------------------------------------------------------------
// Folder Payloads
// ----------------------------------------------------------------------------

/// One entry of a folder listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderEntry {
    pub name: String,
    pub is_dir: bool,
    pub length: u64,
    pub modified_ms: u64,
}

// ----------------------------------------------------------------------------
// Request Payloads
// ----------------------------------------------------------------------------

/// Typed payload of a request, one variant per request command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestData {
    Ping,
    SessionAlive,
    LoginRequest,
    LoginCredential { credential: TunnelPayload },
    Logout,

    PutRequest { public_key: PublicKey },
    /// Sealed [`crate::protocol::file_transfer::FileInfo`]
    PutInformation { info: TunnelPayload },
    PutSegment(Segment),

    GetRequest { public_key: PublicKey },
    /// Sealed [`crate::protocol::file_transfer::SourceRequest`]
    GetInformation { source: TunnelPayload },
    GetReady,
    GetThrottle(Pace),

    Cancel,

    ListFolder { path: String },
    CopyFile { source: String, destination: String, overwrite: bool },
    MoveFile { source: String, destination: String, overwrite: bool },
    DeleteFile { path: String },

    GetLogs { filter: LogFilter },

    ListServices,
    GetService { service_id: String },
    ServiceCommand { service_id: String, action: ServiceAction },
    StopAll,
    StartAll,
    Rescan,
    RestartAll,

    ListPackages,
    InstallPackage { package_id: String, content: Vec<u8> },
    UninstallPackage { package_id: String },
    SetPackageEnabled { package_id: String, enabled: bool },
    DependencyChain { package_id: String },
    ReferencedBy { package_id: String },
    ReadCustomConfig { package_id: String },
    WriteCustomConfig { package_id: String, content: Vec<u8> },
}

impl RequestData {
    pub fn command(&self) -> Command {
        match self {
            RequestData::Ping => Command::Ping,
            RequestData::SessionAlive => Command::SessionAlive,
            RequestData::LoginRequest => Command::LoginRequest,
            RequestData::LoginCredential { .. } => Command::LoginCredential,
            RequestData::Logout => Command::Logout,
            RequestData::PutRequest { .. } => Command::PutRequest,
            RequestData::PutInformation { .. } => Command::PutInformation,
            RequestData::PutSegment(_) => Command::PutSegment,
            RequestData::GetRequest { .. } => Command::GetRequest,
            RequestData::GetInformation { .. } => Command::GetInformation,
            RequestData::GetReady => Command::GetReady,
            RequestData::GetThrottle(_) => Command::GetThrottle,
            RequestData::Cancel => Command::Cancel,
            RequestData::ListFolder { .. } => Command::ListFolder,
            RequestData::CopyFile { .. } => Command::CopyFile,
            RequestData::MoveFile { .. } => Command::MoveFile,
            RequestData::DeleteFile { .. } => Command::DeleteFile,
            RequestData::GetLogs { .. } => Command::GetLogs,
            RequestData::ListServices => Command::ListServices,
            RequestData::GetService { .. } => Command::GetService,
            RequestData::ServiceCommand { .. } => Command::ServiceCommand,
            RequestData::StopAll => Command::StopAll,
            RequestData::StartAll => Command::StartAll,
            RequestData::Rescan => Command::Rescan,
            RequestData::RestartAll => Command::RestartAll,
            RequestData::ListPackages => Command::ListPackages,
            RequestData::InstallPackage { .. } => Command::InstallPackage,
            RequestData::UninstallPackage { .. } => Command::UninstallPackage,
            RequestData::SetPackageEnabled { .. } => Command::SetPackageEnabled,
            RequestData::DependencyChain { .. } => Command::DependencyChain,
            RequestData::ReferencedBy { .. } => Command::ReferencedBy,
            RequestData::ReadCustomConfig { .. } => Command::ReadCustomConfig,
            RequestData::WriteCustomConfig { .. } => Command::WriteCustomConfig,
        }
    }
}

// ----------------------------------------------------------------------------
// Response Payloads
// ----------------------------------------------------------------------------

/// Typed payload of a response, one variant per response command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseData {
    PingResponse { timestamp: Timestamp },
    SessionAliveResponse { alive: bool },
    LoginRequestResponse { public_key: PublicKey },
    /// Sealed [`SessionGrant`]
    LoginResponse { grant: TunnelPayload },
    LogoutResponse { was_active: bool },

    /// Sealed [`crate::protocol::file_transfer::TransferOffer`]
    PutRequestResponse { offer: TunnelPayload },
    PutReady,
    PutComplete(TransferOutcome),
    PutThrottle(Pace),

    /// Sealed [`crate::protocol::file_transfer::TransferOffer`]
    GetRequestResponse { offer: TunnelPayload },
    /// Sealed [`crate::protocol::file_transfer::FileInfo`]
    GetInformationResponse { info: TunnelPayload },
    GetSegment(Segment),
    GetComplete { elapsed_ms: u64 },

    Canceled { was_active: bool },

    ListFolderResponse { entries: Vec<FolderEntry> },
    FileOperationResponse { path: String },

    GetLogsResponse { entries: Vec<LogEntry>, sequence: u64 },
    GetLogsComplete { total: u64 },

    ListServicesResponse { services: Vec<ServiceInfo> },
    GetServiceResponse { service: ServiceInfo },
    ServiceCommandResponse { service: ServiceInfo },
    BulkOperationResponse { affected: Vec<String> },

    ListPackagesResponse { packages: Vec<PackageInfo> },
    PackageOperationResponse { package_id: String, package: Option<PackageInfo> },
    DependencyChainResponse { package_id: String, chain: Vec<String> },
    ReferencedByResponse { package_id: String, referrers: Vec<String> },
    ReadCustomConfigResponse { package_id: String, content: Vec<u8> },
    WriteCustomConfigResponse { package_id: String },

    Error(ErrorInfo),
}

impl ResponseData {
    pub fn command(&self) -> Command {
        match self {
            ResponseData::PingResponse { .. } => Command::PingResponse,
            ResponseData::SessionAliveResponse { .. } => Command::SessionAliveResponse,
            ResponseData::LoginRequestResponse { .. } => Command::LoginRequestResponse,
            ResponseData::LoginResponse { .. } => Command::LoginResponse,
            ResponseData::LogoutResponse { .. } => Command::LogoutResponse,
            ResponseData::PutRequestResponse { .. } => Command::PutRequestResponse,
            ResponseData::PutReady => Command::PutReady,
            ResponseData::PutComplete(_) => Command::PutComplete,
            ResponseData::PutThrottle(_) => Command::PutThrottle,
            ResponseData::GetRequestResponse { .. } => Command::GetRequestResponse,
            ResponseData::GetInformationResponse { .. } => Command::GetInformationResponse,
            ResponseData::GetSegment(_) => Command::GetSegment,
            ResponseData::GetComplete { .. } => Command::GetComplete,
            ResponseData::Canceled { .. } => Command::Canceled,
            ResponseData::ListFolderResponse { .. } => Command::ListFolderResponse,
            ResponseData::FileOperationResponse { .. } => Command::FileOperationResponse,
            ResponseData::GetLogsResponse { .. } => Command::GetLogsResponse,
            ResponseData::GetLogsComplete { .. } => Command::GetLogsComplete,
            ResponseData::ListServicesResponse { .. } => Command::ListServicesResponse,
            ResponseData::GetServiceResponse { .. } => Command::GetServiceResponse,
            ResponseData::ServiceCommandResponse { .. } => Command::ServiceCommandResponse,
            ResponseData::BulkOperationResponse { .. } => Command::BulkOperationResponse,
            ResponseData::ListPackagesResponse { .. } => Command::ListPackagesResponse,
            ResponseData::PackageOperationResponse { .. } => Command::PackageOperationResponse,
            ResponseData::DependencyChainResponse { .. } => Command::DependencyChainResponse,
            ResponseData::ReferencedByResponse { .. } => Command::ReferencedByResponse,
            ResponseData::ReadCustomConfigResponse { .. } => Command::ReadCustomConfigResponse,
            ResponseData::WriteCustomConfigResponse { .. } => Command::WriteCustomConfigResponse,
            ResponseData::Error(_) => Command::Error,
        }
    }

    /// Build an error payload
    pub fn error<M: Into<String>>(code: ErrorCode, message: M) -> Self {
        ResponseData::Error(ErrorInfo::new(code, message))
    }
}

// ----------------------------------------------------------------------------
// Envelopes
// ----------------------------------------------------------------------------

/// Envelope of every client-to-manager message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub group_key: GroupKey,
    /// Empty for bootstrap commands
    pub session_id: SessionId,
    /// Manager the request is addressed to
    pub manager_id: ManagerId,
    pub data: RequestData,
}

impl Request {
    pub fn new(
        group_key: GroupKey,
        session_id: SessionId,
        manager_id: ManagerId,
        data: RequestData,
    ) -> Self {
        Self {
            group_key,
            session_id,
            manager_id,
            data,
        }
    }

    pub fn command(&self) -> Command {
        self.data.command()
    }
}

/// Envelope of every manager-to-client message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Echoes the group key of the request being answered
    pub group_key: GroupKey,
    pub session_id: SessionId,
    /// Responding manager instance
    pub manager_id: ManagerId,
    pub data: ResponseData,
}

impl Response {
    pub fn new(
        group_key: GroupKey,
        session_id: SessionId,
        manager_id: ManagerId,
        data: ResponseData,
    ) -> Self {
        Self {
            group_key,
            session_id,
            manager_id,
            data,
        }
    }

    /// Answer a request, echoing its group key and session id
    pub fn reply(request: &Request, manager_id: ManagerId, data: ResponseData) -> Self {
        Self::new(
            request.group_key.clone(),
            request.session_id.clone(),
            manager_id,
            data,
        )
    }

    pub fn command(&self) -> Command {
        self.data.command()
    }

    /// Error payload, if this is an error response
    pub fn error(&self) -> Option<&ErrorInfo> {
        match &self.data {
            ResponseData::Error(info) => Some(info),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_echoes_group_key_and_session() {
        let request = Request::new(
            GroupKey::new("g-1").unwrap(),
            SessionId::new("abcd"),
            ManagerId::new("m"),
            RequestData::ListServices,
        );
        let response = Response::reply(
            &request,
            ManagerId::new("m"),
            ResponseData::ListServicesResponse { services: vec![] },
        );
        assert_eq!(response.group_key, request.group_key);
        assert_eq!(response.session_id, request.session_id);
        assert_eq!(response.command(), Command::ListServicesResponse);
        assert!(response.error().is_none());
    }

    #[test]
    fn test_payload_commands() {
        assert_eq!(RequestData::Cancel.command(), Command::Cancel);
        assert_eq!(
            RequestData::GetThrottle(Pace::new(10, 0)).command(),
            Command::GetThrottle
        );
        let err = ResponseData::error(ErrorCode::InvalidCaller, "not yours");
        assert_eq!(err.command(), Command::Error);
    }
}
