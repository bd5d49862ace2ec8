//! Stateful managers for the Service Manager runtime
//!
//! This module contains the manager structs that hold shared state for the protocol
//! handlers: the pending-operation store, session capacity accounting, and the
//! file-system side of transfers.

pub mod pending;
pub mod session;
pub mod transfer;

pub use pending::{
    on_expire, ExpiredEntry, ExpiryCallback, OwnedRemoval, PendingEntry, PendingStore,
    RemovedEntry, TtlPolicy,
};
pub use session::{SessionManager, SessionTimeouts};
pub use transfer::{FileRoot, PaceControl, StagingArea};
