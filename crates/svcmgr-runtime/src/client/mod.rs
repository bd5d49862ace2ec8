//! Protocol client
//!
//! [`ManagerClient`] speaks the Service Manager protocol over a bus endpoint. A single
//! pump task decodes everything the manager sends and routes it by group key; each
//! operation registers its group key before sending its first request and then waits on
//! whichever of {response, cancel signal, deadline} resolves first.

pub mod router;
pub mod transfer;

pub use router::{ResponseRouter, ResponseStream};
pub use transfer::TransferReport;

use std::sync::{Arc, RwLock};

use tokio::task::JoinHandle;
use tracing::{debug, info};

use svcmgr_core::protocol::message::{Credential, FolderEntry, SessionGrant};
use svcmgr_core::{
    ClientConfig, ClientId, CryptoProvider, GroupKey, InboundReceiver, LogEntry, LogFilter,
    ManagerError, ManagerId, MessageBus, PackageInfo, ProtocolError, Request, RequestData,
    Response, ResponseData, Result, ServiceAction, ServiceInfo, SessionError, SessionId,
    Timestamp, TunnelPayload, WireFormat,
};

use crate::cancel::CancelSignal;

/// Turn an error response into [`ManagerError::Remote`]
pub(crate) fn into_data(response: Response) -> Result<ResponseData> {
    match response.data {
        ResponseData::Error(info) => Err(ManagerError::Remote {
            code: info.code,
            message: info.message,
        }),
        data => Ok(data),
    }
}

pub(crate) fn unexpected(expected: &str, actual: &ResponseData) -> ManagerError {
    ProtocolError::UnexpectedResponse {
        expected: expected.to_string(),
        actual: actual.command().to_string(),
    }
    .into()
}

async fn pump(
    mut inbound: InboundReceiver,
    router: Arc<ResponseRouter>,
    manager: ClientId,
    wire: WireFormat,
) {
    while let Some(message) = inbound.recv().await {
        if message.sender != manager {
            debug!(sender = %message.sender, "Ignoring payload from unexpected sender");
            continue;
        }
        match wire.decode_response(&message.payload) {
            Ok(response) => {
                let group_key = response.group_key.clone();
                if !router.deliver(response) {
                    debug!(group_key = %group_key, "No waiter for response");
                }
            }
            Err(err) => debug!(error = %err, "Ignoring undecodable response"),
        }
    }
    router.close_all();
}

/// Client side of the Service Manager protocol
pub struct ManagerClient {
    bus: Arc<dyn MessageBus>,
    manager_id: ManagerId,
    manager_endpoint: ClientId,
    crypto: Arc<dyn CryptoProvider>,
    config: ClientConfig,
    router: Arc<ResponseRouter>,
    session: RwLock<SessionId>,
    pump_handle: JoinHandle<()>,
}

impl ManagerClient {
    /// Attach to a bus endpoint and start routing the manager's responses
    pub fn connect(
        bus: Arc<dyn MessageBus>,
        inbound: InboundReceiver,
        manager_id: ManagerId,
        crypto: Arc<dyn CryptoProvider>,
        config: ClientConfig,
    ) -> Self {
        let router = Arc::new(ResponseRouter::new());
        let manager_endpoint = manager_id.endpoint();
        let pump_handle = tokio::spawn(pump(
            inbound,
            router.clone(),
            manager_endpoint.clone(),
            config.wire_format,
        ));
        Self {
            bus,
            manager_id,
            manager_endpoint,
            crypto,
            config,
            router,
            session: RwLock::new(SessionId::none()),
            pump_handle,
        }
    }

    pub fn local_id(&self) -> &ClientId {
        self.bus.local_id()
    }

    pub fn manager_id(&self) -> &ManagerId {
        &self.manager_id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Session id granted by the last successful login, empty when logged out
    pub fn session_id(&self) -> SessionId {
        match self.session.read() {
            Ok(session) => session.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_session(&self, session_id: SessionId) {
        match self.session.write() {
            Ok(mut session) => *session = session_id,
            Err(poisoned) => *poisoned.into_inner() = session_id,
        }
    }

    pub(crate) fn crypto(&self) -> &dyn CryptoProvider {
        self.crypto.as_ref()
    }

    pub(crate) fn crypto_handle(&self) -> Arc<dyn CryptoProvider> {
        self.crypto.clone()
    }

    pub(crate) fn register(&self, group_key: &GroupKey) -> Result<ResponseStream> {
        self.router.register(group_key.clone())
    }

    // ------------------------------------------------------------------------
    // Request plumbing
    // ------------------------------------------------------------------------

    pub(crate) fn request(&self, group_key: &GroupKey, data: RequestData) -> Request {
        Request::new(
            group_key.clone(),
            self.session_id(),
            self.manager_id.clone(),
            data,
        )
    }

    pub(crate) async fn send(&self, request: &Request) -> Result<()> {
        let payload = self.config.wire_format.encode_request(request)?;
        self.bus.send(&self.manager_endpoint, payload).await
    }

    /// Wait for the next response on `stream`, converting error responses
    pub(crate) async fn expect(
        &self,
        stream: &mut ResponseStream,
        cancel: &CancelSignal,
    ) -> Result<ResponseData> {
        into_data(stream.next(self.config.response_timeout(), cancel).await?)
    }

    /// One request, one response, under a fresh group key
    async fn call(&self, data: RequestData) -> Result<ResponseData> {
        let group_key = GroupKey::generate();
        let mut stream = self.register(&group_key)?;
        self.send(&self.request(&group_key, data)).await?;
        self.expect(&mut stream, &CancelSignal::new()).await
    }

    /// Fire-and-forget cancel for an operation of ours
    pub(crate) async fn send_cancel(&self, group_key: &GroupKey) {
        if let Err(err) = self.send(&self.request(group_key, RequestData::Cancel)).await {
            debug!(group_key = %group_key, error = %err, "Cancel not delivered");
        }
    }

    // ------------------------------------------------------------------------
    // Liveness and session
    // ------------------------------------------------------------------------

    /// Round-trip a ping, returning the manager's clock
    pub async fn ping(&self) -> Result<Timestamp> {
        match self.call(RequestData::Ping).await? {
            ResponseData::PingResponse { timestamp } => Ok(timestamp),
            other => Err(unexpected("PingResponse", &other)),
        }
    }

    /// Run the two-step login handshake and adopt the granted session
    pub async fn login(&self, evidence: &[u8], cancel: &CancelSignal) -> Result<SessionId> {
        let group_key = GroupKey::generate();
        let mut stream = self.register(&group_key)?;
        let bootstrap = |data| {
            Request::new(
                group_key.clone(),
                SessionId::none(),
                self.manager_id.clone(),
                data,
            )
        };

        self.send(&bootstrap(RequestData::LoginRequest)).await?;
        let manager_key = match self.expect(&mut stream, cancel).await? {
            ResponseData::LoginRequestResponse { public_key } => public_key,
            other => return Err(unexpected("LoginRequestResponse", &other)),
        };

        let key_pair = self.crypto.generate_key_pair();
        let credential = Credential {
            public_key: key_pair.public_key(),
            evidence: evidence.to_vec(),
        };
        let sealed = TunnelPayload::seal_value(self.crypto(), &manager_key, &credential)?;
        self.send(&bootstrap(RequestData::LoginCredential { credential: sealed }))
            .await?;

        let grant: SessionGrant = match self.expect(&mut stream, cancel).await? {
            ResponseData::LoginResponse { grant } => grant.open_value(self.crypto(), &key_pair)?,
            other => return Err(unexpected("LoginResponse", &other)),
        };
        if !grant.success {
            return Err(SessionError::AccessDenied.into());
        }

        self.set_session(grant.session_id.clone());
        info!(manager = %grant.manager_id, session = %grant.session_id, "Logged in");
        Ok(grant.session_id)
    }

    /// Whether the manager still holds our session
    pub async fn session_alive(&self) -> Result<bool> {
        match self.call(RequestData::SessionAlive).await? {
            ResponseData::SessionAliveResponse { alive } => Ok(alive),
            other => Err(unexpected("SessionAliveResponse", &other)),
        }
    }

    /// End the session; returns whether it was still live on the manager
    pub async fn logout(&self) -> Result<bool> {
        let was_active = match self.call(RequestData::Logout).await? {
            ResponseData::LogoutResponse { was_active } => was_active,
            other => return Err(unexpected("LogoutResponse", &other)),
        };
        self.set_session(SessionId::none());
        info!(was_active, "Logged out");
        Ok(was_active)
    }

    /// Cancel a live operation under `group_key`
    ///
    /// When the operation was started by this client and is still running locally, the
    /// cancel is only sent; the running operation observes the manager's answer and
    /// returns [`ManagerError::Canceled`].
    pub async fn cancel_operation(&self, group_key: &GroupKey) -> Result<bool> {
        let mut stream = match self.register(group_key) {
            Ok(stream) => stream,
            Err(_) => {
                self.send_cancel(group_key).await;
                return Ok(true);
            }
        };
        self.send(&self.request(group_key, RequestData::Cancel)).await?;
        match self.expect(&mut stream, &CancelSignal::new()).await? {
            ResponseData::Canceled { was_active } => Ok(was_active),
            other => Err(unexpected("Canceled", &other)),
        }
    }

    // ------------------------------------------------------------------------
    // Folder operations
    // ------------------------------------------------------------------------

    pub async fn list_folder(&self, path: &str) -> Result<Vec<FolderEntry>> {
        match self.call(RequestData::ListFolder { path: path.to_string() }).await? {
            ResponseData::ListFolderResponse { entries } => Ok(entries),
            other => Err(unexpected("ListFolderResponse", &other)),
        }
    }

    pub async fn copy_file(&self, source: &str, destination: &str, overwrite: bool) -> Result<String> {
        let data = RequestData::CopyFile {
            source: source.to_string(),
            destination: destination.to_string(),
            overwrite,
        };
        self.file_operation(data).await
    }

    pub async fn move_file(&self, source: &str, destination: &str, overwrite: bool) -> Result<String> {
        let data = RequestData::MoveFile {
            source: source.to_string(),
            destination: destination.to_string(),
            overwrite,
        };
        self.file_operation(data).await
    }

    pub async fn delete_file(&self, path: &str) -> Result<String> {
        self.file_operation(RequestData::DeleteFile { path: path.to_string() })
            .await
    }

    async fn file_operation(&self, data: RequestData) -> Result<String> {
        match self.call(data).await? {
            ResponseData::FileOperationResponse { path } => Ok(path),
            other => Err(unexpected("FileOperationResponse", &other)),
        }
    }

    // ------------------------------------------------------------------------
    // Logs
    // ------------------------------------------------------------------------

    /// Stream the entries matching `filter` until the manager reports completion
    pub async fn get_logs(&self, filter: LogFilter, cancel: &CancelSignal) -> Result<Vec<LogEntry>> {
        let group_key = GroupKey::generate();
        let mut stream = self.register(&group_key)?;
        self.send(&self.request(&group_key, RequestData::GetLogs { filter }))
            .await?;

        let mut entries = Vec::new();
        loop {
            let data = match self.expect(&mut stream, cancel).await {
                Ok(data) => data,
                Err(ManagerError::Canceled) => {
                    self.send_cancel(&group_key).await;
                    info!(group_key = %group_key, "Log stream canceled");
                    return Err(ManagerError::Canceled);
                }
                Err(err) => return Err(err),
            };
            match data {
                ResponseData::GetLogsResponse {
                    entries: chunk,
                    sequence,
                } => {
                    debug!(group_key = %group_key, sequence, entries = chunk.len(), "Log chunk received");
                    entries.extend(chunk);
                }
                ResponseData::GetLogsComplete { total } => {
                    if total != entries.len() as u64 {
                        return Err(ManagerError::internal(format!(
                            "log stream announced {} entries, received {}",
                            total,
                            entries.len()
                        )));
                    }
                    return Ok(entries);
                }
                ResponseData::Canceled { .. } => return Err(ManagerError::Canceled),
                other => return Err(unexpected("GetLogsResponse", &other)),
            }
        }
    }

    // ------------------------------------------------------------------------
    // Services
    // ------------------------------------------------------------------------

    pub async fn list_services(&self) -> Result<Vec<ServiceInfo>> {
        match self.call(RequestData::ListServices).await? {
            ResponseData::ListServicesResponse { services } => Ok(services),
            other => Err(unexpected("ListServicesResponse", &other)),
        }
    }

    pub async fn get_service(&self, service_id: &str) -> Result<ServiceInfo> {
        let data = RequestData::GetService {
            service_id: service_id.to_string(),
        };
        match self.call(data).await? {
            ResponseData::GetServiceResponse { service } => Ok(service),
            other => Err(unexpected("GetServiceResponse", &other)),
        }
    }

    pub async fn control_service(&self, service_id: &str, action: ServiceAction) -> Result<ServiceInfo> {
        let data = RequestData::ServiceCommand {
            service_id: service_id.to_string(),
            action,
        };
        match self.call(data).await? {
            ResponseData::ServiceCommandResponse { service } => Ok(service),
            other => Err(unexpected("ServiceCommandResponse", &other)),
        }
    }

    pub async fn stop_all(&self) -> Result<Vec<String>> {
        self.bulk(RequestData::StopAll).await
    }

    pub async fn start_all(&self) -> Result<Vec<String>> {
        self.bulk(RequestData::StartAll).await
    }

    pub async fn rescan(&self) -> Result<Vec<String>> {
        self.bulk(RequestData::Rescan).await
    }

    pub async fn restart_all(&self) -> Result<Vec<String>> {
        self.bulk(RequestData::RestartAll).await
    }

    async fn bulk(&self, data: RequestData) -> Result<Vec<String>> {
        match self.call(data).await? {
            ResponseData::BulkOperationResponse { affected } => Ok(affected),
            other => Err(unexpected("BulkOperationResponse", &other)),
        }
    }

    // ------------------------------------------------------------------------
    // Packages
    // ------------------------------------------------------------------------

    pub async fn list_packages(&self) -> Result<Vec<PackageInfo>> {
        match self.call(RequestData::ListPackages).await? {
            ResponseData::ListPackagesResponse { packages } => Ok(packages),
            other => Err(unexpected("ListPackagesResponse", &other)),
        }
    }

    pub async fn install_package(&self, package_id: &str, content: Vec<u8>) -> Result<PackageInfo> {
        let data = RequestData::InstallPackage {
            package_id: package_id.to_string(),
            content,
        };
        self.package_operation(data)
            .await?
            .ok_or_else(|| ManagerError::internal("install reported no package"))
    }

    pub async fn uninstall_package(&self, package_id: &str) -> Result<()> {
        let data = RequestData::UninstallPackage {
            package_id: package_id.to_string(),
        };
        self.package_operation(data).await.map(|_| ())
    }

    pub async fn set_package_enabled(&self, package_id: &str, enabled: bool) -> Result<PackageInfo> {
        let data = RequestData::SetPackageEnabled {
            package_id: package_id.to_string(),
            enabled,
        };
        self.package_operation(data)
            .await?
            .ok_or_else(|| ManagerError::internal("enable reported no package"))
    }

    async fn package_operation(&self, data: RequestData) -> Result<Option<PackageInfo>> {
        match self.call(data).await? {
            ResponseData::PackageOperationResponse { package, .. } => Ok(package),
            other => Err(unexpected("PackageOperationResponse", &other)),
        }
    }

    pub async fn dependency_chain(&self, package_id: &str) -> Result<Vec<String>> {
        let data = RequestData::DependencyChain {
            package_id: package_id.to_string(),
        };
        match self.call(data).await? {
            ResponseData::DependencyChainResponse { chain, .. } => Ok(chain),
            other => Err(unexpected("DependencyChainResponse", &other)),
        }
    }

    pub async fn referenced_by(&self, package_id: &str) -> Result<Vec<String>> {
        let data = RequestData::ReferencedBy {
            package_id: package_id.to_string(),
        };
        match self.call(data).await? {
            ResponseData::ReferencedByResponse { referrers, .. } => Ok(referrers),
            other => Err(unexpected("ReferencedByResponse", &other)),
        }
    }

    pub async fn read_custom_config(&self, package_id: &str) -> Result<Vec<u8>> {
        let data = RequestData::ReadCustomConfig {
            package_id: package_id.to_string(),
        };
        match self.call(data).await? {
            ResponseData::ReadCustomConfigResponse { content, .. } => Ok(content),
            other => Err(unexpected("ReadCustomConfigResponse", &other)),
        }
    }

    pub async fn write_custom_config(&self, package_id: &str, content: Vec<u8>) -> Result<()> {
        let data = RequestData::WriteCustomConfig {
            package_id: package_id.to_string(),
            content,
        };
        match self.call(data).await? {
            ResponseData::WriteCustomConfigResponse { .. } => Ok(()),
            other => Err(unexpected("WriteCustomConfigResponse", &other)),
        }
    }
}

impl Drop for ManagerClient {
    fn drop(&mut self) {
        self.pump_handle.abort();
    }
}
