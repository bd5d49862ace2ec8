//! Chunked file transfer payloads
//!
//! Transfers run over discrete messages rather than a byte stream: the sender announces
//! the file (name, length, whole-file hash), then emits sequence-numbered segments at the
//! negotiated pace. The receiver persists each segment under a name derived from its
//! sequence marker so that a lexical sort reconstructs the original order.

use core::fmt;
use core::time::Duration;
use serde::{Deserialize, Serialize};

use crate::errors::{ManagerError, Result};
use crate::protocol::crypto::{HashAlgorithm, PublicKey};

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Prefix of persisted segment files inside a staging directory
pub const SEGMENT_PREFIX: &str = "segment_";

/// Name of the staged file holding segment `sequence`
///
/// Zero-padded to the full width of a `u64` so lexical and numeric order agree.
pub fn segment_file_name(sequence: u64) -> String {
    format!("{}{:020}", SEGMENT_PREFIX, sequence)
}

/// Recommended inter-segment delay, scaled by the number of in-flight transfers
pub fn recommended_delay_ms(base_delay_ms: u64, in_flight: usize) -> u64 {
    base_delay_ms.saturating_mul(in_flight.max(1) as u64)
}

/// Number of segments needed for `length` bytes at `chunk_size` bytes each
pub fn segment_count(length: u64, chunk_size: usize) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    length.div_ceil(chunk_size as u64)
}

// ----------------------------------------------------------------------------
// Direction
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferDirection {
    /// Client to manager
    Upload,
    /// Manager to client
    Download,
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferDirection::Upload => write!(f, "Upload"),
            TransferDirection::Download => write!(f, "Download"),
        }
    }
}

// ----------------------------------------------------------------------------
// Negotiation Payloads
// ----------------------------------------------------------------------------

/// Manager's answer to a transfer request, sealed to the client's key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOffer {
    /// Manager's ephemeral key for this transfer
    pub public_key: PublicKey,
    pub chunk_size: usize,
    pub delay_ms: u64,
    /// Algorithm the whole-file hash must use
    pub hash_algorithm: HashAlgorithm,
}

impl TransferOffer {
    pub fn pace(&self) -> Pace {
        Pace::new(self.chunk_size, self.delay_ms)
    }
}

/// Announced file: destination name on upload, source description on download
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub length: u64,
    pub hash: Vec<u8>,
}

impl FileInfo {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ManagerError::invalid_request("file name cannot be empty"));
        }
        if self.hash.is_empty() {
            return Err(ManagerError::invalid_request("file hash cannot be empty"));
        }
        Ok(())
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(&self.hash)
    }
}

/// Download source selection, sealed to the manager's transfer key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRequest {
    pub name: String,
}

// ----------------------------------------------------------------------------
// Segment Loop Payloads
// ----------------------------------------------------------------------------

/// One chunk of a transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Monotonically increasing sequence marker, starting at 0
    pub sequence: u64,
    /// Declared total length of the file
    pub total: u64,
    /// Bytes sent so far, including this segment
    pub sent: u64,
    pub data: Vec<u8>,
}

/// Chunk size and inter-segment delay of a running transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pace {
    pub chunk_size: usize,
    pub delay_ms: u64,
}

impl Pace {
    pub fn new(chunk_size: usize, delay_ms: u64) -> Self {
        Self {
            chunk_size,
            delay_ms,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Clamp the chunk size into `1..=max_chunk_size`
    pub fn clamped(self, max_chunk_size: usize) -> Self {
        Self {
            chunk_size: self.chunk_size.clamp(1, max_chunk_size.max(1)),
            delay_ms: self.delay_ms,
        }
    }
}

/// Final result of an upload, reported by the manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub success: bool,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

impl TransferOutcome {
    pub fn succeeded(elapsed_ms: u64) -> Self {
        Self {
            success: true,
            elapsed_ms,
            error: None,
        }
    }

    pub fn failed<E: Into<String>>(elapsed_ms: u64, error: E) -> Self {
        Self {
            success: false,
            elapsed_ms,
            error: Some(error.into()),
        }
    }
}
