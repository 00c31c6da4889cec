//! Cache store: one entry per [`CacheKey`].
//!
//! Every transition happens while holding the entry's `DashMap` guard, and tag
//! index updates for a key happen under that same guard, so an entry and its
//! tag memberships are never observed half-updated. Lock order is always
//! entries → tag index.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::key::CacheKey;
use super::tags::{TagIndex, TagSet};
use crate::error::{ErrorInfo, StaleResultDiscarded};

/// Lifecycle state of a cache entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EntryState {
    /// Created but never fetched.
    #[default]
    Uninitialized,
    /// A request is in flight. Previous data or error is kept for display.
    Loading,
    /// The last request succeeded.
    Success,
    /// The last request failed.
    Error,
    /// Data or error is kept for display but needs refreshing.
    Stale,
}

/// Token identifying one issued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A point-in-time copy of one cache slot.
///
/// Invariants: `data` and `error` are never both present; `Success` implies
/// `data`; `Error` implies `error`; `Loading` implies `in_flight`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheEntry {
    pub state: EntryState,
    pub data: Option<Arc<Value>>,
    pub error: Option<ErrorInfo>,
    pub provided_tags: TagSet,
    pub subscriber_count: usize,
    pub in_flight: Option<RequestId>,
    /// When the last result landed. Freshness is measured from here.
    pub last_fetched_at: Option<Instant>,
}

impl CacheEntry {
    fn is_fresh(&self, stale_time: Duration) -> bool {
        matches!(self.state, EntryState::Success | EntryState::Error)
            && self
                .last_fetched_at
                .is_some_and(|at| at.elapsed() < stale_time)
    }
}

/// A partial update applied by [`CacheStore::put`].
#[derive(Debug)]
pub(crate) enum EntryPatch {
    Success {
        request: RequestId,
        data: Value,
        tags: TagSet,
    },
    Error {
        request: RequestId,
        error: ErrorInfo,
    },
}

impl EntryPatch {
    const fn request(&self) -> RequestId {
        match self {
            Self::Success { request, .. } | Self::Error { request, .. } => *request,
        }
    }
}

/// What the coordinator should do for a query call.
pub(crate) enum FetchPlan {
    /// The entry is fresh; no request needed.
    Fresh(CacheEntry),
    /// A request is already in flight; wait on it.
    Attach(watch::Receiver<CacheEntry>),
    /// A new request was registered; the caller must execute it.
    Issue {
        request: RequestId,
        receiver: watch::Receiver<CacheEntry>,
    },
}

/// Result of registering a subscriber.
pub(crate) struct Subscribed {
    pub(crate) receiver: watch::Receiver<CacheEntry>,
    pub(crate) needs_fetch: bool,
}

/// Result of an eviction timer firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Collect {
    Evicted,
    /// A request is still in flight; try again after another grace period.
    Rearm,
    /// The timer was superseded, or the entry gained a subscriber.
    Skipped,
}

/// Pending eviction of an unsubscribed entry.
#[derive(Debug, Clone)]
pub(crate) struct GcTimer {
    pub(crate) generation: u64,
    pub(crate) token: CancellationToken,
}

#[derive(Debug)]
struct Slot {
    endpoint: Arc<str>,
    args: Arc<Value>,
    entry: CacheEntry,
    /// Set when the entry was invalidated while loading; the result lands as
    /// `Stale`.
    invalidated_in_flight: bool,
    gc: Option<GcTimer>,
    notify: watch::Sender<CacheEntry>,
}

impl Slot {
    fn new(endpoint: Arc<str>, args: Arc<Value>) -> Self {
        let (notify, _) = watch::channel(CacheEntry::default());
        Self {
            endpoint,
            args,
            entry: CacheEntry::default(),
            invalidated_in_flight: false,
            gc: None,
            notify,
        }
    }

    /// Publishes the entry to every subscriber.
    fn publish(&self) {
        self.notify.send_replace(self.entry.clone());
    }

    /// Updates the published copy without waking subscribers.
    fn publish_quietly(&self) {
        let entry = self.entry.clone();
        self.notify.send_if_modified(|current| {
            *current = entry;
            false
        });
    }

    fn cancel_gc(&mut self) -> bool {
        match self.gc.take() {
            Some(timer) => {
                timer.token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Holds every cache entry and the tag index that points at them.
#[derive(Debug, Default)]
pub struct CacheStore {
    slots: DashMap<CacheKey, Slot>,
    tags: TagIndex,
    next_request: AtomicU64,
    next_generation: AtomicU64,
}

impl CacheStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the entry for `key`. Never triggers network activity.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.slots.get(key).map(|slot| slot.entry.clone())
    }

    /// Returns `true` if an entry exists for `key`.
    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.slots.contains_key(key)
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub const fn tags(&self) -> &TagIndex {
        &self.tags
    }

    /// Returns the endpoint name and arguments an entry was created with.
    pub(crate) fn origin(&self, key: &CacheKey) -> Option<(Arc<str>, Arc<Value>)> {
        self.slots
            .get(key)
            .map(|slot| (slot.endpoint.clone(), slot.args.clone()))
    }

    pub(crate) fn watch(&self, key: &CacheKey) -> Option<watch::Receiver<CacheEntry>> {
        self.slots.get(key).map(|slot| slot.notify.subscribe())
    }

    /// Decides how to serve a query, creating the entry if needed.
    ///
    /// Without `force`, a fresh entry is served as is and a loading entry is
    /// joined. Otherwise, or with `force`, a new request is registered and the
    /// entry moves to `Loading`, superseding any request already in flight.
    pub(crate) fn begin_fetch(
        &self,
        key: &CacheKey,
        endpoint: &Arc<str>,
        args: &Arc<Value>,
        force: bool,
        stale_time: Duration,
    ) -> FetchPlan {
        let mut slot = self
            .slots
            .entry(key.clone())
            .or_insert_with(|| Slot::new(endpoint.clone(), args.clone()));

        if !force {
            if slot.entry.is_fresh(stale_time) {
                return FetchPlan::Fresh(slot.entry.clone());
            }
            if slot.entry.state == EntryState::Loading {
                return FetchPlan::Attach(slot.notify.subscribe());
            }
        }

        let request = RequestId(self.next_request.fetch_add(1, Ordering::Relaxed));
        if let Some(previous) = slot.entry.in_flight {
            debug!(%key, %previous, %request, "superseding in-flight request");
        }
        slot.entry.state = EntryState::Loading;
        slot.entry.in_flight = Some(request);
        slot.invalidated_in_flight = false;
        slot.publish();

        FetchPlan::Issue {
            request,
            receiver: slot.notify.subscribe(),
        }
    }

    /// Writes a completed request into its entry.
    ///
    /// The write is rejected unless `request` is the entry's current in-flight
    /// request. Request ids only grow, so the accepted write is always the
    /// latest issued one.
    pub(crate) fn put(
        &self,
        key: &CacheKey,
        patch: EntryPatch,
    ) -> Result<(), StaleResultDiscarded> {
        let Some(mut slot) = self.slots.get_mut(key) else {
            return Err(StaleResultDiscarded::Evicted);
        };
        if slot.entry.in_flight != Some(patch.request()) {
            return Err(StaleResultDiscarded::Superseded);
        }

        let landed_stale = std::mem::take(&mut slot.invalidated_in_flight);
        match patch {
            EntryPatch::Success { data, tags, .. } => {
                slot.entry.state = if landed_stale {
                    EntryState::Stale
                } else {
                    EntryState::Success
                };
                slot.entry.data = Some(Arc::new(data));
                slot.entry.error = None;
                slot.entry.provided_tags = tags.clone();
                self.tags.set_provided(key, tags);
            }
            EntryPatch::Error { error, .. } => {
                slot.entry.state = if landed_stale {
                    EntryState::Stale
                } else {
                    EntryState::Error
                };
                slot.entry.data = None;
                slot.entry.error = Some(error);
            }
        }
        slot.entry.in_flight = None;
        slot.entry.last_fetched_at = Some(Instant::now());
        slot.publish();
        Ok(())
    }

    /// Marks entries stale, keeping their data or error.
    ///
    /// `Success` and `Error` entries become `Stale`. A `Loading` entry is
    /// flagged so its result lands as `Stale`. Returns the keys that have
    /// subscribers and should be refetched now.
    pub(crate) fn mark_stale<'a>(
        &self,
        keys: impl IntoIterator<Item = &'a CacheKey>,
    ) -> Vec<CacheKey> {
        let mut refetch = Vec::new();
        for key in keys {
            let Some(mut slot) = self.slots.get_mut(key) else {
                continue;
            };
            match slot.entry.state {
                EntryState::Success | EntryState::Error => {
                    slot.entry.state = EntryState::Stale;
                    slot.publish();
                }
                EntryState::Loading => slot.invalidated_in_flight = true,
                EntryState::Uninitialized | EntryState::Stale => {}
            }
            debug!(%key, subscribers = slot.entry.subscriber_count, "marked stale");
            if slot.entry.subscriber_count > 0 {
                refetch.push(key.clone());
            }
        }
        refetch
    }

    /// Removes an entry and its tag memberships. Returns `true` if it existed.
    pub(crate) fn evict(&self, key: &CacheKey) -> bool {
        match self.slots.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                occupied.get_mut().cancel_gc();
                self.tags.remove(key);
                occupied.remove();
                debug!(%key, "evicted");
                true
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Adds a subscriber, creating the entry if needed and cancelling any
    /// pending eviction.
    ///
    /// `needs_fetch` is set on the first subscriber of an entry that has no
    /// usable data (`Uninitialized` or `Stale`).
    pub(crate) fn subscribe(
        &self,
        key: &CacheKey,
        endpoint: &Arc<str>,
        args: &Arc<Value>,
    ) -> Subscribed {
        let mut slot = self
            .slots
            .entry(key.clone())
            .or_insert_with(|| Slot::new(endpoint.clone(), args.clone()));

        slot.entry.subscriber_count += 1;
        if slot.cancel_gc() {
            debug!(%key, "eviction cancelled by new subscriber");
        }
        let needs_fetch = slot.entry.subscriber_count == 1
            && matches!(slot.entry.state, EntryState::Uninitialized | EntryState::Stale);
        slot.publish_quietly();

        Subscribed {
            receiver: slot.notify.subscribe(),
            needs_fetch,
        }
    }

    /// Removes a subscriber. Returns the remaining count, or `None` if the
    /// entry no longer exists.
    pub(crate) fn release(&self, key: &CacheKey) -> Option<usize> {
        let mut slot = self.slots.get_mut(key)?;
        slot.entry.subscriber_count = slot.entry.subscriber_count.saturating_sub(1);
        slot.publish_quietly();
        Some(slot.entry.subscriber_count)
    }

    /// Starts (or restarts) the eviction timer of an unsubscribed entry.
    ///
    /// Returns `None` if the entry is gone or has subscribers.
    pub(crate) fn arm_gc(&self, key: &CacheKey) -> Option<GcTimer> {
        let mut slot = self.slots.get_mut(key)?;
        if slot.entry.subscriber_count > 0 {
            return None;
        }
        slot.cancel_gc();
        let timer = GcTimer {
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
            token: CancellationToken::new(),
        };
        slot.gc = Some(timer.clone());
        Some(timer)
    }

    /// Returns `true` if `key` has a pending eviction timer.
    pub(crate) fn gc_pending(&self, key: &CacheKey) -> bool {
        self.slots.get(key).is_some_and(|slot| slot.gc.is_some())
    }

    /// Handles an eviction timer that ran to completion.
    pub(crate) fn collect(&self, key: &CacheKey, generation: u64) -> Collect {
        let Entry::Occupied(mut occupied) = self.slots.entry(key.clone()) else {
            return Collect::Skipped;
        };
        let slot = occupied.get_mut();
        let current = slot.gc.as_ref().map(|timer| timer.generation);
        if current != Some(generation) || slot.entry.subscriber_count > 0 {
            return Collect::Skipped;
        }
        if slot.entry.state == EntryState::Loading {
            slot.gc = None;
            return Collect::Rearm;
        }

        self.tags.remove(key);
        occupied.remove();
        debug!(%key, "collected unused entry");
        Collect::Evicted
    }
}
