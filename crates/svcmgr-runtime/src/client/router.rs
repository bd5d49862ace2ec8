//! Per-group-key response routing
//!
//! A single receive pump decodes every payload arriving from the manager and hands it to
//! the [`ResponseRouter`], which forwards it to the [`ResponseStream`] registered for the
//! response's group key. Waiting on a stream is a plain channel receive raced against the
//! caller's cancel signal and a deadline, so no task ever polls shared state.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use svcmgr_core::{GroupKey, ManagerError, Response, Result, TransportError};

use crate::cancel::CancelSignal;

/// Routes decoded responses to the waiter registered for their group key
#[derive(Debug, Default)]
pub struct ResponseRouter {
    routes: DashMap<GroupKey, mpsc::UnboundedSender<Response>>,
}

impl ResponseRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start collecting responses for `group_key`
    ///
    /// Registering a key that already has a waiter is refused.
    pub fn register(self: &Arc<Self>, group_key: GroupKey) -> Result<ResponseStream> {
        match self.routes.entry(group_key.clone()) {
            Entry::Occupied(_) => Err(ManagerError::duplicate_key(group_key.as_str())),
            Entry::Vacant(vacant) => {
                let (sender, receiver) = mpsc::unbounded_channel();
                vacant.insert(sender);
                Ok(ResponseStream {
                    group_key,
                    receiver,
                    router: Arc::clone(self),
                })
            }
        }
    }

    /// Hand a response to its waiter; returns false when nobody is waiting for it
    pub fn deliver(&self, response: Response) -> bool {
        let Some(route) = self.routes.get(&response.group_key) else {
            return false;
        };
        route.send(response).is_ok()
    }

    pub fn unregister(&self, group_key: &GroupKey) {
        self.routes.remove(group_key);
    }

    /// Drop every route so all waiters observe a disconnect
    pub fn close_all(&self) {
        self.routes.clear();
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Responses for one group key, in arrival order
///
/// Dropping the stream unregisters the key.
#[derive(Debug)]
pub struct ResponseStream {
    group_key: GroupKey,
    receiver: mpsc::UnboundedReceiver<Response>,
    router: Arc<ResponseRouter>,
}

impl ResponseStream {
    pub fn group_key(&self) -> &GroupKey {
        &self.group_key
    }

    /// Wait for the next response, a cancel or the deadline, whichever comes first
    pub async fn next(&mut self, timeout: Duration, cancel: &CancelSignal) -> Result<Response> {
        if cancel.is_cancelled() {
            return Err(ManagerError::Canceled);
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ManagerError::Canceled),
            received = tokio::time::timeout(timeout, self.receiver.recv()) => match received {
                Ok(Some(response)) => Ok(response),
                Ok(None) => Err(TransportError::Disconnected.into()),
                Err(_) => {
                    debug!(group_key = %self.group_key, "Response wait timed out");
                    Err(ManagerError::Timeout {
                        duration_ms: timeout.as_millis() as u64,
                    })
                }
            }
        }
    }

    /// Take a response that has already arrived, without waiting
    pub fn try_next(&mut self) -> Option<Response> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for ResponseStream {
    fn drop(&mut self) {
        self.router.unregister(&self.group_key);
    }
}
