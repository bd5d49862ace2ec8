//! Core Logic Module
//!
//! Request handling is split into focused components:
//! - `state`: State shared by every handler, store payloads, outbound path and statistics
//! - `login`: Bootstrap commands (ping, session liveness, login handshake, logout)
//! - `transfer`: Chunked upload and download, throttling and cancellation
//! - `logs`: Chunked log streaming
//! - `handlers`: Folder operations and component manager pass-throughs
//!
//! Handlers are plain async functions of `(state, caller, request)` returning the
//! responses to send back. Multi-step operations keep their state in the pending-operation
//! store under the request's group key, which is the only structure shared between
//! concurrently running handlers.

pub mod handlers;
pub mod login;
pub mod logs;
pub mod state;
pub mod transfer;

pub use handlers::{FolderHandlers, ServiceHandlers};
pub use login::LoginHandlers;
pub use logs::LogHandlers;
pub use state::{
    DownloadSource, DownloadState, ManagerState, ManagerStats, Outbox, PendingOperation,
    StatsCounters, UploadPhase, UploadProgress, UploadState,
};
pub use transfer::TransferHandlers;
