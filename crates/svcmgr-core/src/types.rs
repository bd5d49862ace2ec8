//! Core types for the Service Manager protocol
//!
//! This module defines the identifiers used throughout the protocol,
//! using newtype patterns for semantic validation and type safety.

use core::fmt;
use core::ops::{Add, Sub};
use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::errors::{ManagerError, Result};

// ----------------------------------------------------------------------------
// Group Key
// ----------------------------------------------------------------------------

/// Caller-chosen correlation id binding all messages of one multi-step exchange
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKey(String);

impl GroupKey {
    /// Create a group key, rejecting the empty string
    pub fn new<S: Into<String>>(key: S) -> Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(ManagerError::invalid_request("group key cannot be empty"));
        }
        Ok(Self(key))
    }

    /// Generate a fresh random group key
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether the key is empty (only possible for decoded, unvalidated input)
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GroupKey {
    type Err = ManagerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

// ----------------------------------------------------------------------------
// Session Identifier
// ----------------------------------------------------------------------------

/// Server-minted id identifying an authenticated, time-limited caller context
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Create from an existing string
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    /// The empty session id carried by bootstrap commands
    pub fn none() -> Self {
        Self(String::new())
    }

    /// Mint a session id from random bytes
    pub fn from_random(bytes: &[u8]) -> Self {
        Self(hex::encode(bytes))
    }

    /// Get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the empty (bootstrap) session id
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "<none>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

// ----------------------------------------------------------------------------
// Bus Endpoint Identifiers
// ----------------------------------------------------------------------------

/// Message-bus endpoint of a client
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientId(String);

impl ClientId {
    /// Create a new client id
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    /// Get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Identifies a responding manager instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManagerId(String);

impl ManagerId {
    /// Create a new manager id
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    /// Get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The bus endpoint this manager listens on
    pub fn endpoint(&self) -> ClientId {
        ClientId::new(self.0.clone())
    }
}

impl fmt::Display for ManagerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp since Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Add<u64> for Timestamp {
    type Output = Timestamp;

    fn add(self, other: u64) -> Timestamp {
        Timestamp(self.0.saturating_add(other))
    }
}

impl Sub for Timestamp {
    type Output = u64;

    fn sub(self, other: Timestamp) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl Timestamp {
    /// Create a new timestamp
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Get current wall-clock timestamp
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    /// Milliseconds since Unix epoch
    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_key_rejects_empty() {
        assert!(GroupKey::new("").is_err());
        assert!("".parse::<GroupKey>().is_err());
        assert_eq!(GroupKey::new("upload-1").unwrap().as_str(), "upload-1");
    }

    #[test]
    fn test_generated_group_keys_differ() {
        assert_ne!(GroupKey::generate(), GroupKey::generate());
    }

    #[test]
    fn test_session_id_from_random_is_hex() {
        let id = SessionId::from_random(&[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(id.as_str(), "deadbeef");
        assert!(!id.is_empty());
        assert!(SessionId::none().is_empty());
        assert_eq!(SessionId::none().to_string(), "<none>");
    }

    #[test]
    fn test_timestamp_arithmetic_saturates() {
        let early = Timestamp::new(10);
        let late = early + 5;
        assert_eq!(late - early, 5);
        assert_eq!(early - late, 0);
    }
}
