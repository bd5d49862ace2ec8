//! Log streaming handler
//!
//! `GetLogs` queries the log store once and streams the result back in fixed-size chunks
//! from a background task, under a `LogStream` entry keyed by the group key so the stream
//! can be canceled between chunks.

use std::sync::Arc;

use tracing::{debug, info};

use svcmgr_core::{
    ClientId, GroupKey, LogEntry, LogFilter, Request, Response, ResponseData, Result, SessionId,
};

use super::state::{ManagerState, PendingOperation};
use crate::cancel::CancelSignal;
use crate::managers::TtlPolicy;

/// Handler for log retrieval
pub struct LogHandlers;

impl LogHandlers {
    pub async fn handle_get_logs(
        state: &Arc<ManagerState>,
        caller: &ClientId,
        request: &Request,
        filter: &LogFilter,
    ) -> Result<Vec<ResponseData>> {
        let key = request.group_key.as_str();
        let cancel = CancelSignal::new();
        state.store.add(
            key,
            caller.clone(),
            TtlPolicy::Sliding(state.config.logs.stream_timeout()),
            PendingOperation::LogStream {
                cancel: cancel.clone(),
            },
            None,
        )?;

        let entries = match state.logs.query(filter).await {
            Ok(entries) => entries,
            Err(err) => {
                state.store.remove(key);
                return Err(err);
            }
        };

        debug!(group_key = %request.group_key, matched = entries.len(), "Streaming logs");
        tokio::spawn(Self::stream_logs(
            state.clone(),
            caller.clone(),
            request.group_key.clone(),
            request.session_id.clone(),
            entries,
            cancel,
        ));
        Ok(Vec::new())
    }

    async fn stream_logs(
        state: Arc<ManagerState>,
        owner: ClientId,
        group_key: GroupKey,
        session_id: SessionId,
        entries: Vec<LogEntry>,
        cancel: CancelSignal,
    ) {
        let key = group_key.as_str();
        let total = entries.len() as u64;
        let chunk_size = state.config.logs.chunk_size.max(1);

        for (sequence, chunk) in entries.chunks(chunk_size).enumerate() {
            if cancel.is_cancelled() || !state.store.touch(key) {
                debug!(group_key = %group_key, "Log stream stopped");
                return;
            }
            let response = Response::new(
                group_key.clone(),
                session_id.clone(),
                state.manager_id.clone(),
                ResponseData::GetLogsResponse {
                    entries: chunk.to_vec(),
                    sequence: sequence as u64,
                },
            );
            if let Err(err) = state.outbox.send(&owner, &response).await {
                if state.store.remove(key).is_some() {
                    info!(group_key = %group_key, error = %err, "Log stream abandoned");
                }
                return;
            }
            // Lets a Cancel that arrived meanwhile land before the next chunk.
            tokio::task::yield_now().await;
        }

        if state.store.remove(key).is_some() {
            state
                .outbox
                .notify(
                    &owner,
                    &group_key,
                    &session_id,
                    ResponseData::GetLogsComplete { total },
                )
                .await;
        }
    }
}
