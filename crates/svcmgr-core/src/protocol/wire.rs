//! Envelope serialization
//!
//! The underlying bus carries opaque byte payloads. Envelopes are turned into bytes with
//! the serializer named by [`WireFormat`]; both ends of a deployment must agree on it.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::protocol::message::{Request, Response};

/// Serializer used for envelopes on the bus
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    /// Compact binary encoding
    #[default]
    Bincode,
    /// Human-readable encoding, useful when inspecting bus traffic
    Json,
}

impl WireFormat {
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            WireFormat::Bincode => Ok(bincode::serialize(value)?),
            WireFormat::Json => Ok(serde_json::to_vec(value)?),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            WireFormat::Bincode => Ok(bincode::deserialize(bytes)?),
            WireFormat::Json => Ok(serde_json::from_slice(bytes)?),
        }
    }

    pub fn encode_request(&self, request: &Request) -> Result<Vec<u8>> {
        self.encode(request)
    }

    pub fn decode_request(&self, bytes: &[u8]) -> Result<Request> {
        self.decode(bytes)
    }

    pub fn encode_response(&self, response: &Response) -> Result<Vec<u8>> {
        self.encode(response)
    }

    pub fn decode_response(&self, bytes: &[u8]) -> Result<Response> {
        self.decode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::protocol::crypto::{CryptoProvider, PublicKey, SealedBoxCrypto};
    use crate::protocol::file_transfer::{Pace, Segment, TransferOutcome};
    use crate::protocol::message::{ErrorCode, FolderEntry, RequestData, ResponseData};
    use crate::protocol::tunnel::TunnelPayload;
    use crate::services::{
        LogEntry, LogFilter, LogLevel, PackageInfo, ServiceAction, ServiceInfo, ServiceState,
    };
    use crate::types::{GroupKey, ManagerId, SessionId, Timestamp};

    const FORMATS: [WireFormat; 2] = [WireFormat::Bincode, WireFormat::Json];

    fn request(data: RequestData) -> Request {
        Request::new(
            GroupKey::new("group-1").unwrap(),
            SessionId::new("0011"),
            ManagerId::new("manager"),
            data,
        )
    }

    fn response(data: ResponseData) -> Response {
        Response::new(
            GroupKey::new("group-1").unwrap(),
            SessionId::new("0011"),
            ManagerId::new("manager"),
            data,
        )
    }

    fn keys() -> (PublicKey, TunnelPayload) {
        let crypto = SealedBoxCrypto::new();
        let key = crypto.generate_key_pair();
        let tunnel = TunnelPayload::seal(&crypto, &key.public_key(), b"sealed").unwrap();
        (key.public_key(), tunnel)
    }

    fn segment() -> Segment {
        Segment {
            sequence: 2,
            total: 3000,
            sent: 3000,
            data: vec![1; 1000],
        }
    }

    fn service() -> ServiceInfo {
        ServiceInfo {
            id: "web".into(),
            name: "Web".into(),
            version: "1.2.0".into(),
            state: ServiceState::Faulted,
        }
    }

    fn package() -> PackageInfo {
        PackageInfo {
            id: "pkg".into(),
            version: "0.3.1".into(),
            enabled: false,
            dependencies: vec!["runtime".into()],
        }
    }

    fn every_request() -> Vec<RequestData> {
        let (public_key, tunnel) = keys();
        vec![
            RequestData::Ping,
            RequestData::SessionAlive,
            RequestData::LoginRequest,
            RequestData::LoginCredential {
                credential: tunnel.clone(),
            },
            RequestData::Logout,
            RequestData::PutRequest { public_key },
            RequestData::PutInformation {
                info: tunnel.clone(),
            },
            RequestData::PutSegment(segment()),
            RequestData::GetRequest { public_key },
            RequestData::GetInformation { source: tunnel },
            RequestData::GetReady,
            RequestData::GetThrottle(Pace::new(512, 20)),
            RequestData::Cancel,
            RequestData::ListFolder { path: "docs".into() },
            RequestData::CopyFile {
                source: "a".into(),
                destination: "b".into(),
                overwrite: true,
            },
            RequestData::MoveFile {
                source: "b".into(),
                destination: "c".into(),
                overwrite: false,
            },
            RequestData::DeleteFile { path: "c".into() },
            RequestData::GetLogs {
                filter: LogFilter {
                    min_level: Some(LogLevel::Warn),
                    source: Some("core".into()),
                    contains: Some("disk".into()),
                    since: Some(Timestamp::new(1_000)),
                    limit: Some(10),
                },
            },
            RequestData::ListServices,
            RequestData::GetService {
                service_id: "web".into(),
            },
            RequestData::ServiceCommand {
                service_id: "svc".into(),
                action: ServiceAction::Restart,
            },
            RequestData::StopAll,
            RequestData::StartAll,
            RequestData::Rescan,
            RequestData::RestartAll,
            RequestData::ListPackages,
            RequestData::InstallPackage {
                package_id: "pkg".into(),
                content: vec![0, 1, 2, 255],
            },
            RequestData::UninstallPackage {
                package_id: "pkg".into(),
            },
            RequestData::SetPackageEnabled {
                package_id: "pkg".into(),
                enabled: true,
            },
            RequestData::DependencyChain {
                package_id: "pkg".into(),
            },
            RequestData::ReferencedBy {
                package_id: "runtime".into(),
            },
            RequestData::ReadCustomConfig {
                package_id: "pkg".into(),
            },
            RequestData::WriteCustomConfig {
                package_id: "pkg".into(),
                content: b"k=v".to_vec(),
            },
        ]
    }

    fn every_response() -> Vec<ResponseData> {
        let (public_key, tunnel) = keys();
        vec![
            ResponseData::PingResponse {
                timestamp: Timestamp::new(42),
            },
            ResponseData::SessionAliveResponse { alive: true },
            ResponseData::LoginRequestResponse { public_key },
            ResponseData::LoginResponse {
                grant: tunnel.clone(),
            },
            ResponseData::LogoutResponse { was_active: false },
            ResponseData::PutRequestResponse {
                offer: tunnel.clone(),
            },
            ResponseData::PutReady,
            ResponseData::PutComplete(TransferOutcome::failed(12, "hash")),
            ResponseData::PutThrottle(Pace::new(256, 5)),
            ResponseData::GetRequestResponse {
                offer: tunnel.clone(),
            },
            ResponseData::GetInformationResponse { info: tunnel },
            ResponseData::GetSegment(segment()),
            ResponseData::GetComplete { elapsed_ms: 40 },
            ResponseData::Canceled { was_active: true },
            ResponseData::ListFolderResponse {
                entries: vec![FolderEntry {
                    name: "a.txt".into(),
                    is_dir: false,
                    length: 5,
                    modified_ms: 1_700_000_000_000,
                }],
            },
            ResponseData::FileOperationResponse { path: "a.txt".into() },
            ResponseData::GetLogsResponse {
                entries: vec![LogEntry {
                    timestamp: Timestamp::new(1_000),
                    level: LogLevel::Error,
                    source: "core".into(),
                    message: "disk full".into(),
                }],
                sequence: 3,
            },
            ResponseData::GetLogsComplete { total: 31 },
            ResponseData::ListServicesResponse {
                services: vec![service()],
            },
            ResponseData::GetServiceResponse { service: service() },
            ResponseData::ServiceCommandResponse { service: service() },
            ResponseData::BulkOperationResponse {
                affected: vec!["web".into(), "db".into()],
            },
            ResponseData::ListPackagesResponse {
                packages: vec![package()],
            },
            ResponseData::PackageOperationResponse {
                package_id: "pkg".into(),
                package: Some(package()),
            },
            ResponseData::PackageOperationResponse {
                package_id: "gone".into(),
                package: None,
            },
            ResponseData::DependencyChainResponse {
                package_id: "pkg".into(),
                chain: vec!["runtime".into()],
            },
            ResponseData::ReferencedByResponse {
                package_id: "runtime".into(),
                referrers: vec!["pkg".into()],
            },
            ResponseData::ReadCustomConfigResponse {
                package_id: "pkg".into(),
                content: b"k=v".to_vec(),
            },
            ResponseData::WriteCustomConfigResponse {
                package_id: "pkg".into(),
            },
            ResponseData::error(ErrorCode::InvalidCaller, "not yours"),
        ]
    }

    #[test]
    fn test_every_request_survives_both_formats() {
        let requests: Vec<Request> = every_request().into_iter().map(request).collect();
        let commands: HashSet<_> = requests.iter().map(|r| r.command()).collect();
        assert_eq!(commands.len(), 33, "a request variant is missing from the table");

        for format in FORMATS {
            for original in &requests {
                let bytes = format.encode_request(original).unwrap();
                let decoded = format.decode_request(&bytes).unwrap();
                assert_eq!(&decoded, original, "{:?} {:?}", format, original.command());
            }
        }
    }

    #[test]
    fn test_every_response_survives_both_formats() {
        let responses: Vec<Response> = every_response().into_iter().map(response).collect();
        let commands: HashSet<_> = responses.iter().map(|r| r.command()).collect();
        assert_eq!(commands.len(), 29, "a response variant is missing from the table");

        for format in FORMATS {
            for original in &responses {
                let bytes = format.encode_response(original).unwrap();
                let decoded = format.decode_response(&bytes).unwrap();
                assert_eq!(&decoded, original, "{:?} {:?}", format, original.command());
            }
        }
    }

    #[test]
    fn test_garbage_does_not_decode() {
        assert!(WireFormat::Bincode.decode_request(&[0xff; 3]).is_err());
        assert!(WireFormat::Json.decode_request(b"{\"nope\":1}").is_err());
    }
}
