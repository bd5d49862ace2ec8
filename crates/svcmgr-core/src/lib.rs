//! Service Manager Core Protocol
//!
//! This crate provides the stable API of the Service Manager command/control protocol:
//! the request/response envelope and its closed command taxonomy, the tunnel encryption
//! used during the login handshake and file transfer negotiation, the wire codec, the
//! configuration types, and the narrow contracts through which the engine consumes its
//! collaborators (message bus, crypto, component lifecycle, log store).
//!
//! The engine that implements the protocol lives in `svcmgr-runtime`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod errors;
pub mod protocol;
pub mod services;
pub mod transport;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::{
    ClientConfig, LogStreamConfig, ManagerConfig, SessionConfig, ShutdownPolicy, StoreConfig,
    TransferConfig,
};
pub use errors::{
    CryptographicError, ManagerError, ManagerResult, ProtocolError, Result, SessionError,
    TransferError, TransportError,
};
pub use protocol::{
    Command, CryptoProvider, ErrorCode, HashAlgorithm, KeyPair, PublicKey, Request, RequestData,
    Response, ResponseData, SealedBoxCrypto, TunnelPayload, WireFormat,
};
pub use services::{
    ComponentManager, LogEntry, LogFilter, LogLevel, LogStore, PackageInfo, ServiceAction,
    ServiceInfo, ServiceState,
};
pub use transport::{ChannelState, InboundMessage, InboundReceiver, InboundSender, MessageBus};
pub use types::{ClientId, GroupKey, ManagerId, SessionId, Timestamp};
