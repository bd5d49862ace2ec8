//! Service Manager Runtime Engine
//!
//! This crate contains the protocol engine that sits behind a Service Manager endpoint:
//! - `ServiceManager`: The running instance (ingress loop, expiry sweep, shutdown)
//! - `Gateway`: Decoding, session authorization and dispatch of every inbound request
//! - Login, transfer, folder, log and service handlers
//! - The pending-operation store and the session and transfer managers
//! - `ManagerClient`: The client side of the protocol
//!
//! `svcmgr-core` provides the stable API definitions this engine implements.

pub mod cancel;
pub mod client;
pub mod dispatch;
pub mod logic;
pub mod managers;
mod runtime;

pub mod builder;

pub use builder::ServiceManagerBuilder;
pub use cancel::CancelSignal;
pub use client::{ManagerClient, ResponseRouter, ResponseStream, TransferReport};
pub use dispatch::Gateway;
pub use logic::ManagerStats;
pub use managers::*;
pub use runtime::*;

// Re-export core types for convenience
pub use svcmgr_core::{
    ClientConfig, ClientId, ErrorCode, GroupKey, ManagerConfig, ManagerError, ManagerId,
    ManagerResult, MessageBus, Request, RequestData, Response, ResponseData, SessionId,
};
