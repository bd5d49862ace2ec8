//! Collaborator contracts for component lifecycle and log retrieval
//!
//! The engine treats service control, packaging and custom configuration as opaque
//! pass-through commands: it validates the session and forwards to a [`ComponentManager`].
//! Log queries go to a [`LogStore`] and are streamed back in fixed-size chunks.

use async_trait::async_trait;
use core::fmt;
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::types::Timestamp;

// ----------------------------------------------------------------------------
// Services
// ----------------------------------------------------------------------------

/// Lifecycle state of a managed component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceState {
    Running,
    Stopped,
    Faulted,
}

/// Snapshot of one managed component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub id: String,
    pub name: String,
    pub version: String,
    pub state: ServiceState,
}

/// Control action applied to a single component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
}

impl fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceAction::Start => write!(f, "start"),
            ServiceAction::Stop => write!(f, "stop"),
            ServiceAction::Restart => write!(f, "restart"),
        }
    }
}

// ----------------------------------------------------------------------------
// Packages
// ----------------------------------------------------------------------------

/// Installed package description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub id: String,
    pub version: String,
    pub enabled: bool,
    /// Package ids this package depends on
    pub dependencies: Vec<String>,
}

// ----------------------------------------------------------------------------
// Logs
// ----------------------------------------------------------------------------

/// Severity of a log entry, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// One entry returned by a log query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: Timestamp,
    pub level: LogLevel,
    /// Component that produced the entry
    pub source: String,
    pub message: String,
}

/// Predicate over log entries; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFilter {
    pub min_level: Option<LogLevel>,
    pub source: Option<String>,
    pub contains: Option<String>,
    pub since: Option<Timestamp>,
    /// Keep at most this many of the newest matching entries
    pub limit: Option<usize>,
}

impl LogFilter {
    /// Check a single entry against every set criterion
    pub fn matches(&self, entry: &LogEntry) -> bool {
        if let Some(min) = self.min_level {
            if entry.level < min {
                return false;
            }
        }
        if let Some(source) = &self.source {
            if &entry.source != source {
                return false;
            }
        }
        if let Some(needle) = &self.contains {
            if !entry.message.contains(needle.as_str()) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if entry.timestamp < since {
                return false;
            }
        }
        true
    }

    /// Keep the matching entries, then apply the limit to the newest ones
    pub fn select<I: IntoIterator<Item = LogEntry>>(&self, entries: I) -> Vec<LogEntry> {
        let mut selected: Vec<LogEntry> = entries.into_iter().filter(|e| self.matches(e)).collect();
        if let Some(limit) = self.limit {
            if selected.len() > limit {
                selected.drain(..selected.len() - limit);
            }
        }
        selected
    }
}

// ----------------------------------------------------------------------------
// Collaborator Traits
// ----------------------------------------------------------------------------

/// Component and package lifecycle collaborator
#[async_trait]
pub trait ComponentManager: Send + Sync {
    async fn list_services(&self) -> Result<Vec<ServiceInfo>>;

    async fn get_service(&self, service_id: &str) -> Result<ServiceInfo>;

    async fn control_service(&self, service_id: &str, action: ServiceAction) -> Result<ServiceInfo>;

    /// Stop every running component, returning the ids affected
    async fn stop_all(&self) -> Result<Vec<String>>;

    /// Start every stopped component, returning the ids affected
    async fn start_all(&self) -> Result<Vec<String>>;

    /// Look for newly installed components, returning the ids discovered
    async fn rescan(&self) -> Result<Vec<String>>;

    async fn restart_all(&self) -> Result<Vec<String>>;

    async fn list_packages(&self) -> Result<Vec<PackageInfo>>;

    async fn install_package(&self, package_id: &str, content: Vec<u8>) -> Result<PackageInfo>;

    async fn uninstall_package(&self, package_id: &str) -> Result<()>;

    async fn set_package_enabled(&self, package_id: &str, enabled: bool) -> Result<PackageInfo>;

    /// Transitive dependencies of a package, nearest first
    async fn dependency_chain(&self, package_id: &str) -> Result<Vec<String>>;

    /// Packages that depend on the given package
    async fn referenced_by(&self, package_id: &str) -> Result<Vec<String>>;

    async fn read_custom_config(&self, package_id: &str) -> Result<Vec<u8>>;

    async fn write_custom_config(&self, package_id: &str, content: Vec<u8>) -> Result<()>;
}

/// Log query collaborator
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Return the matching entries in chronological order
    async fn query(&self, filter: &LogFilter) -> Result<Vec<LogEntry>>;
}
