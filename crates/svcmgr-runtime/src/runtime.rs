//! Service Manager runtime
//!
//! A running manager owns two background tasks: the ingress loop, which takes payloads
//! off the bus and spawns one gateway task per message, and the sweep, which reaps
//! expired pending operations every purge interval. [`ServiceManager`] is the handle
//! to both and to the manager's read-only statistics.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use svcmgr_core::protocol::file_transfer::Pace;
use svcmgr_core::{GroupKey, InboundReceiver, ManagerConfig, ManagerId, Result};

use crate::cancel::CancelSignal;
use crate::dispatch::Gateway;
use crate::logic::{ManagerState, ManagerStats, TransferHandlers};

/// Upper bound on how long shutdown waits for a background task to notice the stop signal
const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(5);

// ----------------------------------------------------------------------------
// Background Tasks
// ----------------------------------------------------------------------------

async fn ingress_loop(state: Arc<ManagerState>, mut inbound: InboundReceiver, stop: CancelSignal) {
    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            message = inbound.recv() => match message {
                Some(message) => {
                    tokio::spawn(Gateway::process(state.clone(), message));
                }
                None => {
                    info!(manager = %state.manager_id, "Inbound channel closed");
                    break;
                }
            }
        }
    }
    debug!(manager = %state.manager_id, "Ingress loop stopped");
}

async fn sweep_loop(state: Arc<ManagerState>, stop: CancelSignal) {
    let mut interval = tokio::time::interval(state.config.store.purge_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = interval.tick() => {
                let purged = state.store.purge_expired().await;
                if purged > 0 {
                    debug!(purged, remaining = state.store.len(), "Expired pending operations reaped");
                }
            }
        }
    }
    debug!(manager = %state.manager_id, "Sweep stopped");
}

// ----------------------------------------------------------------------------
// Service Manager Handle
// ----------------------------------------------------------------------------

/// Handle to a running Service Manager instance
pub struct ServiceManager {
    state: Arc<ManagerState>,
    stop: CancelSignal,
    ingress_handle: Option<JoinHandle<()>>,
    sweep_handle: Option<JoinHandle<()>>,
    running: bool,
}

impl ServiceManager {
    pub(crate) fn start(state: Arc<ManagerState>, inbound: InboundReceiver) -> Self {
        let stop = CancelSignal::new();
        let ingress_handle = tokio::spawn(ingress_loop(state.clone(), inbound, stop.clone()));
        let sweep_handle = tokio::spawn(sweep_loop(state.clone(), stop.clone()));
        info!(
            manager = %state.manager_id,
            max_sessions = state.sessions.max_sessions(),
            file_root = %state.file_root.path().display(),
            "Service manager started"
        );
        Self {
            state,
            stop,
            ingress_handle: Some(ingress_handle),
            sweep_handle: Some(sweep_handle),
            running: true,
        }
    }

    pub fn manager_id(&self) -> &ManagerId {
        &self.state.manager_id
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.state.config
    }

    /// Snapshot of the request counters
    pub fn stats(&self) -> ManagerStats {
        self.state.stats.snapshot()
    }

    pub fn active_sessions(&self) -> usize {
        self.state.sessions.active_sessions()
    }

    /// Entries in the pending-operation store, including expired ones not yet reaped
    pub fn pending_operations(&self) -> usize {
        self.state.store.len()
    }

    pub fn in_flight_transfers(&self) -> usize {
        self.state.in_flight_transfers()
    }

    /// Check if the manager is still serving requests
    pub fn is_running(&self) -> bool {
        self.running
            && self
                .ingress_handle
                .as_ref()
                .is_some_and(|handle| !handle.is_finished())
    }

    /// Run an expiry sweep immediately instead of waiting for the next interval
    pub async fn purge_now(&self) -> usize {
        self.state.store.purge_expired().await
    }

    /// Ask the client behind an upload to change chunk size and delay
    pub async fn throttle_upload(&self, group_key: &GroupKey, pace: Pace) -> Result<()> {
        TransferHandlers::throttle_upload(&self.state, group_key, pace).await
    }

    /// Stop ingress and the sweep, then empty the store per the shutdown policy
    ///
    /// Returns the number of pending operations that were still in the store.
    pub async fn shutdown(&mut self) -> Result<usize> {
        if !self.running {
            return Ok(0);
        }
        info!(manager = %self.state.manager_id, "Shutting down service manager");
        self.stop.cancel();

        for handle in [self.ingress_handle.take(), self.sweep_handle.take()]
            .into_iter()
            .flatten()
        {
            let abort = handle.abort_handle();
            if tokio::time::timeout(TASK_STOP_TIMEOUT, handle).await.is_err() {
                warn!("Background task did not stop in time, aborting");
                abort.abort();
            }
        }

        let policy = self.state.config.store.shutdown_policy;
        let drained = self.state.store.drain(policy).await;
        self.running = false;
        info!(
            manager = %self.state.manager_id,
            drained,
            policy = ?policy,
            "Service manager shut down"
        );
        Ok(drained)
    }
}

impl Drop for ServiceManager {
    fn drop(&mut self) {
        for handle in [self.ingress_handle.take(), self.sweep_handle.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
    }
}
