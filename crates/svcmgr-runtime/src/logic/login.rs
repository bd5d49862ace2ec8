//! Bootstrap command handlers
//!
//! Ping, session liveness, the two-step login handshake and logout are handled without
//! a session. Login proceeds as:
//!
//! 1. `LoginRequest`: capacity is checked, an ephemeral key pair is stored under the
//!    group key with a fixed TTL and its public half is returned.
//! 2. `LoginCredential`: the credential tunnel is opened with the stored private key and
//!    the evidence compared byte-for-byte. On success a session entry with a sliding TTL
//!    is created and the grant is sealed to the client's credential key.

use std::sync::Arc;

use tracing::{info, warn};

use svcmgr_core::protocol::message::{Credential, SessionGrant};
use svcmgr_core::{
    ClientId, ManagerError, ProtocolError, Request, RequestData, ResponseData, Result,
    SessionError, Timestamp, TunnelPayload,
};

use super::state::{ManagerState, PendingOperation};
use crate::managers::{on_expire, ExpiredEntry, TtlPolicy};

/// Handlers for commands in the bootstrap set
pub struct LoginHandlers;

impl LoginHandlers {
    /// Route a bootstrap command
    pub async fn handle(
        state: &Arc<ManagerState>,
        caller: &ClientId,
        request: &Request,
    ) -> Result<Vec<ResponseData>> {
        match &request.data {
            RequestData::Ping => Ok(vec![ResponseData::PingResponse {
                timestamp: Timestamp::now(),
            }]),
            RequestData::SessionAlive => Self::handle_session_alive(state, caller, request),
            RequestData::LoginRequest => Self::handle_login_request(state, caller, request),
            RequestData::LoginCredential { credential } => {
                Self::handle_login_credential(state, caller, request, credential)
            }
            RequestData::Logout => Self::handle_logout(state, caller, request),
            other => Err(ManagerError::invalid_request(format!(
                "{} is not a bootstrap command",
                other.command()
            ))),
        }
    }

    /// Report whether the caller's session is live; a live session counts as traffic
    fn handle_session_alive(
        state: &ManagerState,
        caller: &ClientId,
        request: &Request,
    ) -> Result<Vec<ResponseData>> {
        let key = request.session_id.as_str();
        let alive = match state.store.peek(key) {
            Some(entry) => {
                matches!(entry.payload, PendingOperation::Session { .. }) && &entry.owner == caller
            }
            None => false,
        };
        if alive {
            state.store.touch(key);
        }
        Ok(vec![ResponseData::SessionAliveResponse { alive }])
    }

    fn handle_login_request(
        state: &ManagerState,
        caller: &ClientId,
        request: &Request,
    ) -> Result<Vec<ResponseData>> {
        if let Err(err) = state.sessions.check_capacity() {
            warn!(caller = %caller, "Login refused: {}", err);
            return Err(err);
        }

        let key_pair = state.crypto.generate_key_pair();
        let public_key = key_pair.public_key();
        state.store.add(
            request.group_key.as_str(),
            caller.clone(),
            TtlPolicy::Fixed(state.sessions.timeouts().login_timeout),
            PendingOperation::Login { key_pair },
            None,
        )?;

        info!(group_key = %request.group_key, caller = %caller, "Login started");
        Ok(vec![ResponseData::LoginRequestResponse { public_key }])
    }

    fn handle_login_credential(
        state: &ManagerState,
        caller: &ClientId,
        request: &Request,
        credential: &TunnelPayload,
    ) -> Result<Vec<ResponseData>> {
        let group_key = request.group_key.as_str();
        let not_pending = || -> ManagerError {
            SessionError::LoginNotPending {
                group_key: group_key.to_string(),
            }
            .into()
        };

        // Checked before removal so a stranger cannot tear down someone else's login.
        let pending = state.store.peek(group_key).ok_or_else(not_pending)?;
        if &pending.owner != caller {
            return Err(ManagerError::invalid_caller(group_key, caller.as_str()));
        }
        let key_pair = match pending.payload {
            PendingOperation::Login { key_pair } => key_pair,
            other => {
                return Err(ManagerError::invalid_state(
                    group_key,
                    format!("{} is not a login", other.kind()),
                ))
            }
        };

        // One credential per handshake: the login entry is consumed whatever the outcome.
        state.store.remove(group_key).ok_or_else(not_pending)?;

        let credential: Credential = credential
            .open_value(state.crypto.as_ref(), &key_pair)
            .map_err(|err| ProtocolError::MalformedCredential {
                reason: err.to_string(),
            })?;

        if let Err(err) = state.sessions.verify_evidence(&credential.evidence) {
            warn!(group_key = %request.group_key, caller = %caller, "Login rejected: evidence mismatch");
            return Err(err);
        }

        state.sessions.reserve()?;
        let session_id = state.sessions.mint_session_id(state.crypto.as_ref());
        let sessions = state.sessions.clone();
        let added = state.store.add(
            session_id.as_str(),
            caller.clone(),
            TtlPolicy::Sliding(state.sessions.timeouts().idle_timeout),
            PendingOperation::Session {
                established: Timestamp::now(),
            },
            Some(on_expire(move |entry: ExpiredEntry<PendingOperation>| async move {
                sessions.release();
                info!(session = %entry.key, owner = %entry.owner, "Session expired");
            })),
        );
        if let Err(err) = added {
            state.sessions.release();
            return Err(err);
        }

        let grant = SessionGrant {
            session_id: session_id.clone(),
            success: true,
            manager_id: state.manager_id.clone(),
        };
        let sealed =
            TunnelPayload::seal_value(state.crypto.as_ref(), &credential.public_key, &grant)?;

        info!(
            group_key = %request.group_key,
            caller = %caller,
            session = %session_id,
            active = state.sessions.active_sessions(),
            "Session established"
        );
        Ok(vec![ResponseData::LoginResponse { grant: sealed }])
    }

    fn handle_logout(
        state: &ManagerState,
        caller: &ClientId,
        request: &Request,
    ) -> Result<Vec<ResponseData>> {
        let key = request.session_id.as_str();
        let is_session = state
            .store
            .peek(key)
            .is_some_and(|entry| matches!(entry.payload, PendingOperation::Session { .. }));
        if !is_session {
            return Ok(vec![ResponseData::LogoutResponse { was_active: false }]);
        }

        match state.store.remove_owned(key, caller) {
            crate::managers::OwnedRemoval::Removed(_) => {
                state.sessions.release();
                info!(session = %request.session_id, caller = %caller, "Logged out");
                Ok(vec![ResponseData::LogoutResponse { was_active: true }])
            }
            crate::managers::OwnedRemoval::NotOwned => {
                Err(ManagerError::invalid_caller(key, caller.as_str()))
            }
            crate::managers::OwnedRemoval::Missing => {
                Ok(vec![ResponseData::LogoutResponse { was_active: false }])
            }
        }
    }
}
