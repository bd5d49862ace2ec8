//! Session manager for the Service Manager runtime
//!
//! Tracks the number of live sessions against the configured maximum, verifies access
//! evidence and mints session ids. The session entries themselves live in the
//! pending-operation store; this manager only owns the capacity accounting.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use svcmgr_core::{CryptoProvider, Result, SessionConfig, SessionError, SessionId};

/// Number of random bytes behind a session id
pub const SESSION_ID_BYTES: usize = 16;

// ----------------------------------------------------------------------------
// Session Timeouts
// ----------------------------------------------------------------------------

/// Session timeout configuration
#[derive(Debug, Clone, Copy)]
pub struct SessionTimeouts {
    /// Fixed lifetime of a login awaiting its credential
    pub login_timeout: Duration,
    /// Sliding idle timeout of an established session
    pub idle_timeout: Duration,
}

// ----------------------------------------------------------------------------
// Session Manager
// ----------------------------------------------------------------------------

/// Capacity accounting and credential checks for login handshakes
#[derive(Debug)]
pub struct SessionManager {
    active: AtomicUsize,
    max_sessions: usize,
    evidence: Vec<u8>,
    timeouts: SessionTimeouts,
}

impl SessionManager {
    pub fn new(config: &SessionConfig) -> Result<Self> {
        Ok(Self {
            active: AtomicUsize::new(0),
            max_sessions: config.max_logins,
            evidence: config.evidence_bytes()?,
            timeouts: SessionTimeouts {
                login_timeout: config.login_timeout(),
                idle_timeout: config.session_timeout(),
            },
        })
    }

    pub fn timeouts(&self) -> SessionTimeouts {
        self.timeouts
    }

    /// Live sessions right now
    pub fn active_sessions(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Refuse a login request when no session slot is free
    pub fn check_capacity(&self) -> Result<()> {
        let current = self.active_sessions();
        if current >= self.max_sessions {
            return Err(SessionError::MaxSessionsReached {
                current,
                max: self.max_sessions,
            }
            .into());
        }
        Ok(())
    }

    /// Claim a session slot; concurrent handshakes can never exceed the maximum
    pub fn reserve(&self) -> Result<()> {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < self.max_sessions).then_some(current + 1)
            })
            .map(|_| ())
            .map_err(|current| {
                SessionError::MaxSessionsReached {
                    current,
                    max: self.max_sessions,
                }
                .into()
            })
    }

    /// Return a slot claimed by [`SessionManager::reserve`]
    pub fn release(&self) {
        let _ = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            });
    }

    /// Exact byte-for-byte comparison against the configured evidence
    pub fn verify_evidence(&self, submitted: &[u8]) -> Result<()> {
        if submitted != self.evidence.as_slice() {
            return Err(SessionError::AccessDenied.into());
        }
        Ok(())
    }

    pub fn mint_session_id(&self, crypto: &dyn CryptoProvider) -> SessionId {
        SessionId::from_random(&crypto.random_bytes(SESSION_ID_BYTES))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
