//! Pending-operation store
//!
//! A keyed, time-limited cache of in-flight operations: login handshakes, sessions,
//! transfers and log streams. Entries are sharded across a [`DashMap`], so operations on
//! unrelated keys never contend on a store-wide lock, and the expiry sweep never holds a
//! shard lock while running an entry's expiry callback.
//!
//! Completion is at-most-once: an entry is removed from the map before anything acts on
//! its removal, so an explicit completion and a sweep-driven expiry can never both run
//! for the same entry.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::time::Instant;
use tracing::debug;

use svcmgr_core::{ClientId, ManagerError, Result, ShutdownPolicy};

// ----------------------------------------------------------------------------
// Expiry Policy
// ----------------------------------------------------------------------------

/// How an entry's deadline reacts to traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlPolicy {
    /// Deadline is pushed forward on every legitimate access
    Sliding(Duration),
    /// Deadline is set once at insertion
    Fixed(Duration),
}

impl TtlPolicy {
    pub fn duration(&self) -> Duration {
        match self {
            TtlPolicy::Sliding(d) | TtlPolicy::Fixed(d) => *d,
        }
    }

    pub fn is_sliding(&self) -> bool {
        matches!(self, TtlPolicy::Sliding(_))
    }
}

// ----------------------------------------------------------------------------
// Entry Views
// ----------------------------------------------------------------------------

/// Entry handed to an expiry callback, carrying its last payload
#[derive(Debug)]
pub struct ExpiredEntry<P> {
    pub key: String,
    pub owner: ClientId,
    pub payload: P,
}

/// Callback run exactly once when an entry is reaped (or drained on shutdown)
pub type ExpiryCallback<P> =
    Box<dyn FnOnce(ExpiredEntry<P>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Box an async closure as an [`ExpiryCallback`]
pub fn on_expire<P, F, Fut>(callback: F) -> ExpiryCallback<P>
where
    F: FnOnce(ExpiredEntry<P>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Box::new(move |entry| callback(entry).boxed())
}

/// Snapshot of a live entry
#[derive(Debug, Clone)]
pub struct PendingEntry<P> {
    pub key: String,
    pub owner: ClientId,
    pub payload: P,
    pub policy: TtlPolicy,
    /// Time left before the entry becomes eligible for the sweep
    pub remaining: Duration,
}

/// Entry taken out of the store by an explicit removal
///
/// The caller decides whether the expiry callback runs ([`RemovedEntry::run_cleanup`])
/// or is dropped unexecuted.
pub struct RemovedEntry<P> {
    pub key: String,
    pub owner: ClientId,
    pub payload: P,
    on_expire: Option<ExpiryCallback<P>>,
}

impl<P> RemovedEntry<P> {
    /// Run the entry's expiry callback under caller control
    pub async fn run_cleanup(self) {
        if let Some(callback) = self.on_expire {
            callback(ExpiredEntry {
                key: self.key,
                owner: self.owner,
                payload: self.payload,
            })
            .await;
        }
    }
}

impl<P: fmt::Debug> fmt::Debug for RemovedEntry<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemovedEntry")
            .field("key", &self.key)
            .field("owner", &self.owner)
            .field("payload", &self.payload)
            .field("has_cleanup", &self.on_expire.is_some())
            .finish()
    }
}

/// Outcome of a removal restricted to the entry's owner
#[derive(Debug)]
pub enum OwnedRemoval<P> {
    Removed(RemovedEntry<P>),
    /// The key is live but belongs to another endpoint; nothing was removed
    NotOwned,
    Missing,
}

// ----------------------------------------------------------------------------
// Pending Store
// ----------------------------------------------------------------------------

struct Slot<P> {
    owner: ClientId,
    payload: P,
    policy: TtlPolicy,
    deadline: Instant,
    on_expire: Option<ExpiryCallback<P>>,
}

impl<P> Slot<P> {
    fn is_live(&self, now: Instant) -> bool {
        self.deadline > now
    }

    fn refresh(&mut self, now: Instant) {
        if let TtlPolicy::Sliding(ttl) = self.policy {
            self.deadline = now + ttl;
        }
    }
}

/// Sharded, TTL-driven store of pending operations keyed by correlation id
pub struct PendingStore<P> {
    entries: DashMap<String, Slot<P>>,
}

impl<P> Default for PendingStore<P>
where
    P: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<P> fmt::Debug for PendingStore<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingStore")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl<P> PendingStore<P>
where
    P: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Insert a new entry; a live or not-yet-swept entry under `key` is a duplicate
    pub fn add<K: Into<String>>(
        &self,
        key: K,
        owner: ClientId,
        policy: TtlPolicy,
        payload: P,
        on_expire: Option<ExpiryCallback<P>>,
    ) -> Result<()> {
        let key = key.into();
        match self.entries.entry(key) {
            Entry::Occupied(occupied) => Err(ManagerError::duplicate_key(occupied.key().clone())),
            Entry::Vacant(vacant) => {
                vacant.insert(Slot {
                    owner,
                    payload,
                    policy,
                    deadline: Instant::now() + policy.duration(),
                    on_expire,
                });
                Ok(())
            }
        }
    }

    /// Look up a live entry, resetting its deadline when the policy is sliding
    pub fn find(&self, key: &str) -> Option<PendingEntry<P>> {
        let now = Instant::now();
        let mut slot = self.entries.get_mut(key)?;
        if !slot.is_live(now) {
            return None;
        }
        slot.refresh(now);
        Some(snapshot(key, &slot, now))
    }

    /// Look up a live entry without touching its deadline
    pub fn peek(&self, key: &str) -> Option<PendingEntry<P>> {
        let now = Instant::now();
        let slot = self.entries.get(key)?;
        if !slot.is_live(now) {
            return None;
        }
        Some(snapshot(key, &slot, now))
    }

    /// Reset a live entry's sliding deadline; returns whether the entry is live
    pub fn touch(&self, key: &str) -> bool {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut slot) if slot.is_live(now) => {
                slot.refresh(now);
                true
            }
            _ => false,
        }
    }

    /// Atomically replace a live entry's payload
    pub fn update_payload(&self, key: &str, payload: P) -> bool {
        self.with_payload_mut(key, |current| *current = payload).is_some()
    }

    /// Run `f` on a live entry's payload under the entry's shard lock
    ///
    /// `f` must not call back into the store.
    pub fn with_payload_mut<R>(&self, key: &str, f: impl FnOnce(&mut P) -> R) -> Option<R> {
        let now = Instant::now();
        let mut slot = self.entries.get_mut(key)?;
        if !slot.is_live(now) {
            return None;
        }
        slot.refresh(now);
        Some(f(&mut slot.payload))
    }

    /// Take a live entry out of the store; its cleanup is left to the caller
    pub fn remove(&self, key: &str) -> Option<RemovedEntry<P>> {
        let now = Instant::now();
        self.entries
            .remove_if(key, |_, slot| slot.is_live(now))
            .map(into_removed)
    }

    /// Take a live entry out of the store only if `owner` created it
    pub fn remove_owned(&self, key: &str, owner: &ClientId) -> OwnedRemoval<P> {
        let now = Instant::now();
        if let Some(removed) = self
            .entries
            .remove_if(key, |_, slot| slot.is_live(now) && &slot.owner == owner)
        {
            return OwnedRemoval::Removed(into_removed(removed));
        }
        match self.entries.get(key) {
            Some(slot) if slot.is_live(now) => OwnedRemoval::NotOwned,
            _ => OwnedRemoval::Missing,
        }
    }

    /// Reap every entry past its deadline, running each expiry callback once
    ///
    /// Returns the number of entries reaped.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|slot| !slot.is_live(now))
            .map(|slot| slot.key().clone())
            .collect();

        let mut purged = 0;
        for key in expired {
            // Re-checked under the shard lock: the entry may have been removed meanwhile.
            let Some((key, slot)) = self.entries.remove_if(&key, |_, slot| !slot.is_live(now))
            else {
                continue;
            };
            purged += 1;
            debug!(key = %key, owner = %slot.owner, "Pending operation expired");
            if let Some(callback) = slot.on_expire {
                callback(ExpiredEntry {
                    key,
                    owner: slot.owner,
                    payload: slot.payload,
                })
                .await;
            }
        }
        purged
    }

    /// Empty the store on shutdown
    ///
    /// `Drain` runs every remaining expiry callback; `Discard` drops entries untouched.
    pub async fn drain(&self, policy: ShutdownPolicy) -> usize {
        let keys: Vec<String> = self.entries.iter().map(|slot| slot.key().clone()).collect();
        let mut drained = 0;
        for key in keys {
            let Some((key, slot)) = self.entries.remove(&key) else {
                continue;
            };
            drained += 1;
            if policy == ShutdownPolicy::Drain {
                if let Some(callback) = slot.on_expire {
                    callback(ExpiredEntry {
                        key,
                        owner: slot.owner,
                        payload: slot.payload,
                    })
                    .await;
                }
            }
        }
        drained
    }

    /// Number of entries, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of live entries whose payload satisfies `predicate`
    pub fn count_where(&self, predicate: impl Fn(&P) -> bool) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|slot| slot.is_live(now) && predicate(&slot.payload))
            .count()
    }
}

fn snapshot<P: Clone>(key: &str, slot: &Slot<P>, now: Instant) -> PendingEntry<P> {
    PendingEntry {
        key: key.to_string(),
        owner: slot.owner.clone(),
        payload: slot.payload.clone(),
        policy: slot.policy,
        remaining: slot.deadline.saturating_duration_since(now),
    }
}

fn into_removed<P>((key, slot): (String, Slot<P>)) -> RemovedEntry<P> {
    RemovedEntry {
        key,
        owner: slot.owner,
        payload: slot.payload,
        on_expire: slot.on_expire,
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
