//! In-memory message bus
//!
//! A [`MemoryBus`] is a hub of named endpoints. Every endpoint gets an unbounded inbound
//! queue, so delivery is immediate and per-sender order is preserved. Endpoints can be
//! disconnected and reconnected to exercise transport failures.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use svcmgr_core::{
    ChannelState, ClientId, InboundMessage, InboundReceiver, InboundSender, MessageBus, Result,
    TransportError,
};

// ----------------------------------------------------------------------------
// Bus Hub
// ----------------------------------------------------------------------------

/// Delivery counters of a bus
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    pub delivered: u64,
    pub undeliverable: u64,
}

struct Slot {
    sender: InboundSender,
    connected: Arc<AtomicBool>,
}

#[derive(Default)]
struct BusInner {
    endpoints: DashMap<ClientId, Slot>,
    delivered: AtomicU64,
    undeliverable: AtomicU64,
}

/// Hub connecting in-memory endpoints
#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<BusInner>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an endpoint under `id`, replacing any previous endpoint with that id
    pub fn endpoint(&self, id: &str) -> (Arc<MemoryEndpoint>, InboundReceiver) {
        let id = ClientId::new(id);
        let (sender, receiver) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));
        self.inner.endpoints.insert(
            id.clone(),
            Slot {
                sender,
                connected: connected.clone(),
            },
        );
        debug!(endpoint = %id, "Endpoint attached");
        let endpoint = MemoryEndpoint {
            id,
            connected,
            bus: self.inner.clone(),
        };
        (Arc::new(endpoint), receiver)
    }

    /// Detach an endpoint: it can no longer send and nothing is delivered to it
    pub fn disconnect(&self, id: &str) -> bool {
        self.set_connected(id, false)
    }

    pub fn reconnect(&self, id: &str) -> bool {
        self.set_connected(id, true)
    }

    fn set_connected(&self, id: &str, connected: bool) -> bool {
        match self.inner.endpoints.get(&ClientId::new(id)) {
            Some(slot) => {
                slot.connected.store(connected, Ordering::Release);
                debug!(endpoint = id, connected, "Endpoint connectivity changed");
                true
            }
            None => false,
        }
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            delivered: self.inner.delivered.load(Ordering::Relaxed),
            undeliverable: self.inner.undeliverable.load(Ordering::Relaxed),
        }
    }
}

// ----------------------------------------------------------------------------
// Endpoint
// ----------------------------------------------------------------------------

/// Send side of one attached endpoint
pub struct MemoryEndpoint {
    id: ClientId,
    connected: Arc<AtomicBool>,
    bus: Arc<BusInner>,
}

impl MemoryEndpoint {
    fn undeliverable(&self, target: &ClientId) -> TransportError {
        self.bus.undeliverable.fetch_add(1, Ordering::Relaxed);
        TransportError::Unreachable {
            endpoint: target.to_string(),
        }
    }
}

#[async_trait]
impl MessageBus for MemoryEndpoint {
    fn local_id(&self) -> &ClientId {
        &self.id
    }

    async fn send(&self, target: &ClientId, payload: Vec<u8>) -> Result<()> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(TransportError::Disconnected.into());
        }
        let Some(slot) = self.bus.endpoints.get(target) else {
            return Err(self.undeliverable(target).into());
        };
        if !slot.connected.load(Ordering::Acquire) {
            return Err(self.undeliverable(target).into());
        }

        let length = payload.len();
        let message = InboundMessage {
            sender: self.id.clone(),
            payload,
        };
        if slot.sender.send(message).is_err() {
            return Err(self.undeliverable(target).into());
        }
        self.bus.delivered.fetch_add(1, Ordering::Relaxed);
        trace!(from = %self.id, to = %target, bytes = length, "Payload delivered");
        Ok(())
    }

    fn channel_state(&self) -> ChannelState {
        if self.connected.load(Ordering::Acquire) {
            ChannelState::Connected
        } else {
            ChannelState::Disconnected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use svcmgr_core::ManagerError;

    #[tokio::test]
    async fn test_delivery_tags_sender_and_keeps_order() {
        let bus = MemoryBus::new();
        let (alice, _alice_rx) = bus.endpoint("alice");
        let (_bob, mut bob_rx) = bus.endpoint("bob");

        for i in 0..3u8 {
            alice.send(&ClientId::new("bob"), vec![i]).await.unwrap();
        }
        for i in 0..3u8 {
            let message = bob_rx.recv().await.unwrap();
            assert_eq!(message.sender.as_str(), "alice");
            assert_eq!(message.payload, vec![i]);
        }
        assert_eq!(bus.stats().delivered, 3);
    }

    #[tokio::test]
    async fn test_unknown_target_is_unreachable() {
        let bus = MemoryBus::new();
        let (alice, _rx) = bus.endpoint("alice");
        let err = alice.send(&ClientId::new("nobody"), vec![1]).await.unwrap_err();
        assert!(matches!(
            err,
            ManagerError::Transport(TransportError::Unreachable { .. })
        ));
        assert_eq!(bus.stats().undeliverable, 1);
    }

    #[tokio::test]
    async fn test_disconnect_and_reconnect() {
        let bus = MemoryBus::new();
        let (alice, _alice_rx) = bus.endpoint("alice");
        let (_bob, mut bob_rx) = bus.endpoint("bob");
        let bob = ClientId::new("bob");

        assert!(bus.disconnect("alice"));
        assert_eq!(alice.channel_state(), ChannelState::Disconnected);
        let err = alice.send(&bob, vec![1]).await.unwrap_err();
        assert!(matches!(err, ManagerError::Transport(TransportError::Disconnected)));

        assert!(bus.reconnect("alice"));
        alice.send(&bob, vec![2]).await.unwrap();
        assert_eq!(bob_rx.recv().await.unwrap().payload, vec![2]);
        assert!(!bus.disconnect("carol"));
    }
}
