//! Request gateway
//!
//! Every inbound payload passes through [`Gateway::process`]:
//!
//! 1. The envelope is decoded. Payloads that do not decode (including unknown commands)
//!    are dropped without a response and counted.
//! 2. Bootstrap commands go straight to the login handlers. Any other command must carry
//!    the id of a live session owned by the sender: an unknown session is reported as
//!    `InvalidSession`, a session owned by another endpoint as `InvalidCaller`. A valid
//!    session has its idle timeout refreshed.
//! 3. The handler runs with panics caught. Handler errors and panics become error
//!    responses so one bad request never takes the manager down.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, error, warn};

use svcmgr_core::{
    ClientId, ErrorCode, InboundMessage, ManagerError, Request, RequestData, ResponseData, Result,
    SessionId,
};

use crate::logic::{
    FolderHandlers, LogHandlers, LoginHandlers, ManagerState, PendingOperation, ServiceHandlers,
    StatsCounters, TransferHandlers,
};

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Single entry point for inbound requests
pub struct Gateway;

impl Gateway {
    /// Decode, authorize, dispatch and answer one inbound payload
    pub async fn process(state: Arc<ManagerState>, message: InboundMessage) {
        StatsCounters::incr(&state.stats.received);
        let caller = message.sender;
        let request = match state.wire.decode_request(&message.payload) {
            Ok(request) => request,
            Err(err) => {
                StatsCounters::incr(&state.stats.dropped);
                debug!(sender = %caller, error = %err, "Dropping undecodable payload");
                return;
            }
        };

        let command = request.command();
        StatsCounters::incr(&state.stats.active_handlers);
        let outcome = AssertUnwindSafe(Self::route(&state, &caller, &request))
            .catch_unwind()
            .await;
        StatsCounters::decr(&state.stats.active_handlers);

        let responses = match outcome {
            Ok(Ok(responses)) => {
                StatsCounters::incr(&state.stats.processed);
                responses
            }
            Ok(Err(err)) => {
                StatsCounters::incr(&state.stats.errors);
                if command.targets_live_operation() {
                    debug!(group_key = %request.group_key, caller = %caller, %command, "Request rejected: {}", err);
                } else {
                    warn!(group_key = %request.group_key, caller = %caller, %command, "Request rejected: {}", err);
                }
                vec![ResponseData::error(err.code(), err.to_string())]
            }
            Err(panic) => {
                StatsCounters::incr(&state.stats.errors);
                error!(
                    group_key = %request.group_key,
                    caller = %caller,
                    %command,
                    "Handler panicked: {}",
                    panic_message(panic.as_ref())
                );
                vec![ResponseData::error(
                    ErrorCode::Internal,
                    format!("{} failed unexpectedly", command),
                )]
            }
        };

        for data in responses {
            let response = state.reply(&request, data);
            if let Err(err) = state.outbox.send(&caller, &response).await {
                debug!(group_key = %request.group_key, caller = %caller, error = %err, "Response not delivered");
            }
        }
    }

    async fn route(
        state: &Arc<ManagerState>,
        caller: &ClientId,
        request: &Request,
    ) -> Result<Vec<ResponseData>> {
        if request.group_key.is_empty() {
            return Err(ManagerError::invalid_request("group key cannot be empty"));
        }
        if !request.command().is_bootstrap() {
            Self::authorize(state, caller, &request.session_id)?;
        }

        match &request.data {
            RequestData::Ping
            | RequestData::SessionAlive
            | RequestData::LoginRequest
            | RequestData::LoginCredential { .. }
            | RequestData::Logout => LoginHandlers::handle(state, caller, request).await,

            RequestData::PutRequest { public_key } => {
                TransferHandlers::handle_put_request(state, caller, request, public_key).await
            }
            RequestData::PutInformation { info } => {
                TransferHandlers::handle_put_information(state, caller, request, info).await
            }
            RequestData::PutSegment(segment) => {
                TransferHandlers::handle_put_segment(state, caller, request, segment).await
            }
            RequestData::GetRequest { public_key } => {
                TransferHandlers::handle_get_request(state, caller, request, public_key).await
            }
            RequestData::GetInformation { source } => {
                TransferHandlers::handle_get_information(state, caller, request, source).await
            }
            RequestData::GetReady => TransferHandlers::handle_get_ready(state, caller, request).await,
            RequestData::GetThrottle(pace) => {
                TransferHandlers::handle_get_throttle(state, caller, request, *pace).await
            }
            RequestData::Cancel => TransferHandlers::handle_cancel(state, caller, request).await,

            RequestData::ListFolder { path } => FolderHandlers::handle_list_folder(state, path).await,
            RequestData::CopyFile {
                source,
                destination,
                overwrite,
            } => {
                FolderHandlers::handle_transfer_file(state, source, destination, *overwrite, false)
                    .await
            }
            RequestData::MoveFile {
                source,
                destination,
                overwrite,
            } => {
                FolderHandlers::handle_transfer_file(state, source, destination, *overwrite, true)
                    .await
            }
            RequestData::DeleteFile { path } => FolderHandlers::handle_delete_file(state, path).await,

            RequestData::GetLogs { filter } => {
                LogHandlers::handle_get_logs(state, caller, request, filter).await
            }

            RequestData::ListServices
            | RequestData::GetService { .. }
            | RequestData::ServiceCommand { .. }
            | RequestData::StopAll
            | RequestData::StartAll
            | RequestData::Rescan
            | RequestData::RestartAll
            | RequestData::ListPackages
            | RequestData::InstallPackage { .. }
            | RequestData::UninstallPackage { .. }
            | RequestData::SetPackageEnabled { .. }
            | RequestData::DependencyChain { .. }
            | RequestData::ReferencedBy { .. }
            | RequestData::ReadCustomConfig { .. }
            | RequestData::WriteCustomConfig { .. } => {
                ServiceHandlers::handle(state, &request.data).await
            }
        }
    }

    /// Require a live session owned by `caller` and refresh its idle timeout
    fn authorize(state: &ManagerState, caller: &ClientId, session_id: &SessionId) -> Result<()> {
        let key = session_id.as_str();
        let entry = state
            .store
            .peek(key)
            .filter(|entry| matches!(entry.payload, PendingOperation::Session { .. }))
            .ok_or_else(|| ManagerError::invalid_session(key))?;
        if &entry.owner != caller {
            return Err(ManagerError::invalid_caller(key, caller.as_str()));
        }
        state.store.touch(key);
        Ok(())
    }
}
