//! Error types for the Service Manager protocol
//!
//! This module contains all error types used throughout the protocol engine,
//! including cryptographic errors, transport errors, session errors, protocol errors,
//! transfer errors, and the main ManagerError type that unifies them all.

use crate::protocol::ErrorCode;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Specific cryptographic error types
#[derive(Debug, thiserror::Error)]
pub enum CryptographicError {
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Decryption failed")]
    DecryptionFailed,
    #[error("Invalid key format")]
    InvalidKeyFormat,
    #[error("Block too large: {size} bytes (max: {max})")]
    BlockTooLarge { size: usize, max: usize },
    #[error("Malformed encrypted block ({length} bytes)")]
    MalformedBlock { length: usize },
}

/// Specific transport error types
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Endpoint not reachable: {endpoint}")]
    Unreachable { endpoint: String },
    #[error("Channel is disconnected")]
    Disconnected,
    #[error("Send failed to {endpoint}: {reason}")]
    SendFailed { endpoint: String, reason: String },
    #[error("Transport shutdown: {reason}")]
    Shutdown { reason: String },
}

/// Specific session error types
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Maximum sessions reached: {current}/{max}")]
    MaxSessionsReached { current: usize, max: usize },
    #[error("No login in progress for group {group_key}")]
    LoginNotPending { group_key: String },
    #[error("Access evidence rejected")]
    AccessDenied,
    #[error("Not logged in")]
    NotLoggedIn,
}

/// Protocol violations reported back to the caller
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid session: {session_id}")]
    InvalidSession { session_id: String },
    #[error("Invalid caller {caller} for session {session_id}")]
    InvalidCaller { session_id: String, caller: String },
    #[error("Duplicate correlation key: {key}")]
    DuplicateKey { key: String },
    #[error("Malformed credential: {reason}")]
    MalformedCredential { reason: String },
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },
    #[error("Unexpected response: expected {expected}, got {actual}")]
    UnexpectedResponse { expected: String, actual: String },
    #[error("Operation {key} is not in the expected state: {reason}")]
    InvalidState { key: String, reason: String },
}

/// File transfer error types
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("{direction} is disabled on this manager")]
    Disabled { direction: String },
    #[error("Integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },
    #[error("Destination already exists: {path}")]
    DestinationExists { path: String },
    #[error("Invalid path: {path}")]
    InvalidPath { path: String },
    #[error("File not found: {path}")]
    NotFound { path: String },
    #[error("Received {received} bytes, more than the declared {declared}")]
    LengthExceeded { received: u64, declared: u64 },
    #[error("Transfer expired")]
    Expired,
    #[error("Transfer failed: {reason}")]
    Failed { reason: String },
}

// ----------------------------------------------------------------------------
// Main Error Type
// ----------------------------------------------------------------------------

/// Core error types for the Service Manager protocol
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cryptographic error: {0}")]
    Crypto(#[from] CryptographicError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure reported by a component or log collaborator
    #[error("Service error: {reason}")]
    Service { reason: String },

    /// Configuration error
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    /// A bounded wait elapsed without a response
    #[error("Timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// The operation was canceled cooperatively
    #[error("Operation canceled")]
    Canceled,

    /// Error response received from the remote manager
    #[error("Remote error ({code:?}): {message}")]
    Remote { code: ErrorCode, message: String },

    /// Unexpected internal failure
    #[error("Internal error: {reason}")]
    Internal { reason: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl ManagerError {
    /// Create an invalid session error
    pub fn invalid_session<S: Into<String>>(session_id: S) -> Self {
        ManagerError::Protocol(ProtocolError::InvalidSession {
            session_id: session_id.into(),
        })
    }

    /// Create an invalid caller error
    pub fn invalid_caller<S: Into<String>, C: Into<String>>(session_id: S, caller: C) -> Self {
        ManagerError::Protocol(ProtocolError::InvalidCaller {
            session_id: session_id.into(),
            caller: caller.into(),
        })
    }

    /// Create a duplicate key error
    pub fn duplicate_key<K: Into<String>>(key: K) -> Self {
        ManagerError::Protocol(ProtocolError::DuplicateKey { key: key.into() })
    }

    /// Create an invalid request error
    pub fn invalid_request<R: Into<String>>(reason: R) -> Self {
        ManagerError::Protocol(ProtocolError::InvalidRequest {
            reason: reason.into(),
        })
    }

    /// Create an invalid state error for a pending operation
    pub fn invalid_state<K: Into<String>, R: Into<String>>(key: K, reason: R) -> Self {
        ManagerError::Protocol(ProtocolError::InvalidState {
            key: key.into(),
            reason: reason.into(),
        })
    }

    /// Create a service error with a reason
    pub fn service<R: Into<String>>(reason: R) -> Self {
        ManagerError::Service {
            reason: reason.into(),
        }
    }

    /// Create a configuration error with a reason
    pub fn config_error<R: Into<String>>(reason: R) -> Self {
        ManagerError::Configuration {
            reason: reason.into(),
        }
    }

    /// Create an internal error with a reason
    pub fn internal<R: Into<String>>(reason: R) -> Self {
        ManagerError::Internal {
            reason: reason.into(),
        }
    }

    /// Create a transfer failure with a reason
    pub fn transfer_failed<R: Into<String>>(reason: R) -> Self {
        ManagerError::Transfer(TransferError::Failed {
            reason: reason.into(),
        })
    }

    /// Map this error onto the code carried by an error response
    pub fn code(&self) -> ErrorCode {
        match self {
            ManagerError::Protocol(ProtocolError::InvalidSession { .. }) => {
                ErrorCode::InvalidSession
            }
            ManagerError::Protocol(ProtocolError::InvalidCaller { .. }) => ErrorCode::InvalidCaller,
            ManagerError::Protocol(ProtocolError::DuplicateKey { .. }) => ErrorCode::DuplicateKey,
            ManagerError::Protocol(ProtocolError::MalformedCredential { .. }) => {
                ErrorCode::MalformedCredential
            }
            ManagerError::Protocol(_) => ErrorCode::InvalidRequest,
            ManagerError::Session(SessionError::MaxSessionsReached { .. }) => {
                ErrorCode::CapacityReached
            }
            ManagerError::Session(SessionError::AccessDenied) => ErrorCode::AccessDenied,
            ManagerError::Session(_) => ErrorCode::InvalidRequest,
            ManagerError::Transfer(TransferError::Disabled { .. }) => ErrorCode::FeatureDisabled,
            ManagerError::Transfer(TransferError::NotFound { .. }) => ErrorCode::NotFound,
            ManagerError::Transfer(TransferError::InvalidPath { .. }) => ErrorCode::InvalidPath,
            ManagerError::Transfer(_) => ErrorCode::TransferFailed,
            ManagerError::Crypto(_) => ErrorCode::MalformedCredential,
            ManagerError::Serialization(_) | ManagerError::Json(_) => ErrorCode::InvalidRequest,
            ManagerError::Io(err) if err.kind() == std::io::ErrorKind::NotFound => {
                ErrorCode::NotFound
            }
            ManagerError::Service { .. } | ManagerError::Io(_) => ErrorCode::ServiceFailure,
            ManagerError::Remote { code, .. } => *code,
            ManagerError::Timeout { .. } => ErrorCode::Timeout,
            ManagerError::Canceled => ErrorCode::Canceled,
            ManagerError::Transport(_)
            | ManagerError::Configuration { .. }
            | ManagerError::Internal { .. } => ErrorCode::Internal,
        }
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, ManagerError>;
pub type ManagerResult<T> = Result<T>;
