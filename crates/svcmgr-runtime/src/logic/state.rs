//! Manager State
//!
//! Contains the state shared by every request handler, the payloads of the
//! pending-operation store, the outbound message path and the manager statistics.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use svcmgr_core::protocol::file_transfer::FileInfo;
use svcmgr_core::{
    ChannelState, ClientId, ComponentManager, CryptoProvider, GroupKey, KeyPair, LogStore,
    ManagerConfig, ManagerId, MessageBus, PublicKey, Request, Response, ResponseData, Result,
    SessionId, Timestamp, WireFormat,
};

use crate::cancel::CancelSignal;
use crate::managers::{FileRoot, PaceControl, PendingStore, SessionManager, StagingArea};

// ----------------------------------------------------------------------------
// Pending Operation Payloads
// ----------------------------------------------------------------------------

/// Payload of one pending-operation entry
#[derive(Debug, Clone)]
pub enum PendingOperation {
    /// Login awaiting its credential; keyed by group key
    Login { key_pair: KeyPair },
    /// Established session; keyed by session id
    Session { established: Timestamp },
    Upload(UploadState),
    Download(DownloadState),
    LogStream { cancel: CancelSignal },
}

impl PendingOperation {
    pub fn is_transfer(&self) -> bool {
        matches!(self, PendingOperation::Upload(_) | PendingOperation::Download(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PendingOperation::Login { .. } => "login",
            PendingOperation::Session { .. } => "session",
            PendingOperation::Upload(_) => "upload",
            PendingOperation::Download(_) => "download",
            PendingOperation::LogStream { .. } => "log stream",
        }
    }
}

/// Upload in progress, client to manager
#[derive(Debug, Clone)]
pub struct UploadState {
    pub key_pair: KeyPair,
    pub session_id: SessionId,
    pub started: Instant,
    pub cancel: CancelSignal,
    pub phase: UploadPhase,
}

#[derive(Debug, Clone)]
pub enum UploadPhase {
    /// Keys exchanged, waiting for the file announcement
    Negotiated,
    Receiving(UploadProgress),
}

#[derive(Debug, Clone)]
pub struct UploadProgress {
    pub received: u64,
    pub staging: PathBuf,
    pub destination: PathBuf,
    pub info: FileInfo,
}

/// Download in progress, manager to client
#[derive(Debug, Clone)]
pub struct DownloadState {
    pub key_pair: KeyPair,
    pub client_key: PublicKey,
    pub session_id: SessionId,
    pub started: Instant,
    pub cancel: CancelSignal,
    pub pace: Arc<PaceControl>,
    /// Set once the client has named the file to send
    pub source: Option<DownloadSource>,
    pub streaming: bool,
}

/// Resolved download source and the length announced for it
#[derive(Debug, Clone)]
pub struct DownloadSource {
    pub path: PathBuf,
    pub length: u64,
}

// ----------------------------------------------------------------------------
// Outbound Messages
// ----------------------------------------------------------------------------

/// Encodes responses and puts them on the bus
///
/// Expiry callbacks hold a clone of this rather than the whole manager state.
#[derive(Clone)]
pub struct Outbox {
    bus: Arc<dyn MessageBus>,
    wire: WireFormat,
    manager_id: ManagerId,
}

impl Outbox {
    pub fn new(bus: Arc<dyn MessageBus>, wire: WireFormat, manager_id: ManagerId) -> Self {
        Self {
            bus,
            wire,
            manager_id,
        }
    }

    pub fn manager_id(&self) -> &ManagerId {
        &self.manager_id
    }

    pub async fn send(&self, target: &ClientId, response: &Response) -> Result<()> {
        let payload = self.wire.encode_response(response)?;
        self.bus.send(target, payload).await
    }

    /// Send an unsolicited message for a group key, if the bus is still up
    pub async fn notify(
        &self,
        target: &ClientId,
        group_key: &GroupKey,
        session_id: &SessionId,
        data: ResponseData,
    ) {
        if self.bus.channel_state() != ChannelState::Connected {
            debug!(group_key = %group_key, "Bus disconnected, dropping notification");
            return;
        }
        let response = Response::new(
            group_key.clone(),
            session_id.clone(),
            self.manager_id.clone(),
            data,
        );
        if let Err(err) = self.send(target, &response).await {
            debug!(group_key = %group_key, target = %target, error = %err, "Notification not delivered");
        }
    }
}

// ----------------------------------------------------------------------------
// Statistics
// ----------------------------------------------------------------------------

/// Atomic counters owned by one manager instance
#[derive(Debug, Default)]
pub struct StatsCounters {
    pub received: AtomicU64,
    pub processed: AtomicU64,
    pub dropped: AtomicU64,
    pub errors: AtomicU64,
    pub active_handlers: AtomicU64,
}

impl StatsCounters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decr(counter: &AtomicU64) {
        let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    pub fn snapshot(&self) -> ManagerStats {
        ManagerStats {
            received: self.received.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            active_handlers: self.active_handlers.load(Ordering::Relaxed),
        }
    }
}

/// Read-only snapshot of the manager counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    /// Payloads taken off the bus
    pub received: u64,
    /// Requests handled successfully
    pub processed: u64,
    /// Undecodable payloads ignored without a response
    pub dropped: u64,
    /// Requests answered with an error response
    pub errors: u64,
    /// Handlers running right now
    pub active_handlers: u64,
}

// ----------------------------------------------------------------------------
// Manager State
// ----------------------------------------------------------------------------

/// State shared by all request handlers of one manager
pub struct ManagerState {
    pub config: ManagerConfig,
    pub manager_id: ManagerId,
    pub wire: WireFormat,
    pub outbox: Outbox,
    pub crypto: Arc<dyn CryptoProvider>,
    pub components: Arc<dyn ComponentManager>,
    pub logs: Arc<dyn LogStore>,
    pub store: PendingStore<PendingOperation>,
    pub sessions: Arc<SessionManager>,
    pub file_root: FileRoot,
    pub staging: StagingArea,
    pub stats: StatsCounters,
}

impl ManagerState {
    pub fn new(
        config: ManagerConfig,
        bus: Arc<dyn MessageBus>,
        crypto: Arc<dyn CryptoProvider>,
        components: Arc<dyn ComponentManager>,
        logs: Arc<dyn LogStore>,
    ) -> Result<Self> {
        let manager_id = config.manager_id();
        let sessions = Arc::new(SessionManager::new(&config.session)?);
        Ok(Self {
            manager_id: manager_id.clone(),
            wire: config.wire_format,
            outbox: Outbox::new(bus, config.wire_format, manager_id),
            crypto,
            components,
            logs,
            store: PendingStore::new(),
            sessions,
            file_root: FileRoot::new(config.transfer.file_root.clone()),
            staging: StagingArea::new(config.transfer.staging_root.clone()),
            stats: StatsCounters::default(),
            config,
        })
    }

    /// Build the response to `request` carrying `data`
    pub fn reply(&self, request: &Request, data: ResponseData) -> Response {
        Response::reply(request, self.manager_id.clone(), data)
    }

    /// Transfers currently holding a store entry
    pub fn in_flight_transfers(&self) -> usize {
        self.store.count_where(PendingOperation::is_transfer)
    }
}
