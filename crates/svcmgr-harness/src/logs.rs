//! In-memory log store

use async_trait::async_trait;
use tokio::sync::RwLock;

use svcmgr_core::{LogEntry, LogFilter, LogLevel, LogStore, ManagerError, Result, Timestamp};

/// [`LogStore`] over a vector of entries kept in chronological order
#[derive(Default)]
pub struct MemoryLogStore {
    entries: RwLock<Vec<LogEntry>>,
    unavailable: bool,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: Vec<LogEntry>) -> Self {
        Self {
            entries: RwLock::new(entries),
            unavailable: false,
        }
    }

    /// A store whose every query fails
    pub fn unavailable() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            unavailable: true,
        }
    }

    /// Generate `count` entries from `source`, one millisecond apart, cycling levels
    pub fn generated(source: &str, count: usize) -> Self {
        const LEVELS: [LogLevel; 4] = [LogLevel::Debug, LogLevel::Info, LogLevel::Warn, LogLevel::Error];
        let entries = (0..count)
            .map(|i| LogEntry {
                timestamp: Timestamp::new(1_000 + i as u64),
                level: LEVELS[i % LEVELS.len()],
                source: source.to_string(),
                message: format!("event {}", i),
            })
            .collect();
        Self::with_entries(entries)
    }

    pub async fn push(&self, entry: LogEntry) {
        self.entries.write().await.push(entry);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn query(&self, filter: &LogFilter) -> Result<Vec<LogEntry>> {
        if self.unavailable {
            return Err(ManagerError::service("log store unavailable"));
        }
        let entries = self.entries.read().await;
        Ok(filter.select(entries.iter().cloned()))
    }
}
