//! Message bus abstraction for the Service Manager protocol
//!
//! The protocol is layered over an abstract, message-oriented bus: payloads are sent
//! to a named endpoint and arrive at the receiver tagged with the sender's endpoint id.
//! The wire encoding of the bus itself is outside the protocol's concern.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::Result;
use crate::types::ClientId;

// ----------------------------------------------------------------------------
// Channel State
// ----------------------------------------------------------------------------

/// Connectivity of a bus endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// The endpoint can send and receive
    Connected,
    /// The endpoint is detached from the bus
    Disconnected,
}

// ----------------------------------------------------------------------------
// Inbound Messages
// ----------------------------------------------------------------------------

/// A payload delivered to an endpoint, with the sender attached
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Endpoint that sent the payload
    pub sender: ClientId,
    /// Encoded envelope
    pub payload: Vec<u8>,
}

pub type InboundSender = mpsc::UnboundedSender<InboundMessage>;
pub type InboundReceiver = mpsc::UnboundedReceiver<InboundMessage>;

// ----------------------------------------------------------------------------
// Message Bus Trait
// ----------------------------------------------------------------------------

/// Send side of a bus endpoint
///
/// Receiving is modeled as the [`InboundReceiver`] handed out together with the
/// endpoint, so the consumer owns its own receive loop.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Endpoint id of this side of the bus
    fn local_id(&self) -> &ClientId;

    /// Send an encoded payload to a target endpoint
    async fn send(&self, target: &ClientId, payload: Vec<u8>) -> Result<()>;

    /// Current connectivity of this endpoint
    fn channel_state(&self) -> ChannelState;
}
