use std::fmt;
use std::marker::PhantomData;

use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, warn};

use super::QueryClient;
use super::cache::CacheEntry;
use super::key::CacheKey;
use super::query::QueryResult;

/// A live subscription to one query entry.
///
/// While at least one subscription is held, the entry is never evicted and
/// invalidations refetch it right away. Dropping the handle releases it.
pub struct QuerySubscription<T> {
    client: QueryClient,
    key: CacheKey,
    receiver: watch::Receiver<CacheEntry>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> QuerySubscription<T> {
    pub(crate) fn new(
        client: QueryClient,
        key: CacheKey,
        receiver: watch::Receiver<CacheEntry>,
    ) -> Self {
        Self {
            client,
            key,
            receiver,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub const fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Forces a new request for this entry, superseding any in flight.
    pub fn refetch(&self) {
        if let Err(err) = self.client.refetch_key(&self.key) {
            warn!(key = %self.key, error = %err, "refetch failed to start");
        }
    }

    /// Releases the subscription. Same as dropping it.
    pub fn release(self) {
        drop(self);
    }
}

impl<T: DeserializeOwned> QuerySubscription<T> {
    /// Returns the entry as it is now.
    #[must_use]
    pub fn current(&self) -> QueryResult<T> {
        QueryResult::from_entry(&self.receiver.borrow())
    }

    /// Waits for the entry to change and returns the new state. Returns
    /// `None` if the entry was evicted.
    pub async fn changed(&mut self) -> Option<QueryResult<T>> {
        self.receiver.changed().await.ok()?;
        Some(QueryResult::from_entry(&self.receiver.borrow_and_update()))
    }

    /// Returns the current state once it is settled, waiting through any
    /// loading or stale phase. Returns `None` if the entry was evicted.
    pub async fn settled(&mut self) -> Option<QueryResult<T>> {
        loop {
            let result = QueryResult::from_entry(&self.receiver.borrow_and_update());
            if result.is_settled() {
                return Some(result);
            }
            self.receiver.changed().await.ok()?;
        }
    }

    /// Turns the subscription into a stream of states, starting with the
    /// current one. The subscription is held until the stream is dropped.
    pub fn into_stream(self) -> impl Stream<Item = QueryResult<T>> + Send + 'static
    where
        T: Send + 'static,
    {
        let states = WatchStream::new(self.receiver.clone());
        states.map(move |entry| {
            let _held = &self;
            QueryResult::from_entry(&entry)
        })
    }
}

impl<T> Drop for QuerySubscription<T> {
    fn drop(&mut self) {
        let store = self.client.store();
        if let Some(remaining) = store.release(&self.key) {
            debug!(key = %self.key, remaining, "released");
            if remaining == 0 {
                self.client.schedule_gc(&self.key);
            }
        }
    }
}

impl<T> fmt::Debug for QuerySubscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySubscription")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}
