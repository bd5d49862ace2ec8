//! Service Manager Harness
//!
//! In-process stand-ins for everything a manager talks to: an in-memory message bus,
//! a scripted component manager and an in-memory log store. The CLI demo runs a full
//! manager and client on top of them, and the runtime's tests use them as doubles.

pub mod bus;
pub mod components;
pub mod logs;

pub use bus::{BusStats, MemoryBus, MemoryEndpoint};
pub use components::MockComponentManager;
pub use logs::MemoryLogStore;
