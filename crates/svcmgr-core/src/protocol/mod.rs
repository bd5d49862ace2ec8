//! Service Manager Protocol Module
//!
//! This module contains the protocol definitions shared by managers and clients:
//! - `command`: The closed command taxonomy and the bootstrap set
//! - `message`: Request/response envelopes and their typed payloads
//! - `crypto`: Key pairs, block encryption, hashing and randomness
//! - `tunnel`: Chunk-wise asymmetric encryption of oversized payloads
//! - `file_transfer`: Payloads and helpers of the chunked transfer sub-protocol
//! - `wire`: Envelope serialization

pub mod command;
pub mod crypto;
pub mod file_transfer;
pub mod message;
pub mod tunnel;
pub mod wire;

// Re-export command types
pub use command::Command;

// Re-export crypto types
pub use crypto::{CryptoProvider, HashAlgorithm, KeyPair, PublicKey, SealedBoxCrypto};

// Re-export envelope types
pub use message::{ErrorCode, ErrorInfo, Request, RequestData, Response, ResponseData};

// Re-export tunnel and wire types
pub use tunnel::TunnelPayload;
pub use wire::WireFormat;
