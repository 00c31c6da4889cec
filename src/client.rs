//! Query/mutation cache with tag-based invalidation.
//!
//! [`QueryClient`] is the coordinator. Queries go through the cache: fresh
//! entries are served without a network call, concurrent identical queries
//! share one request, and results land in request order. Mutations go
//! straight to the transport and, on success, invalidate every cached query
//! that provides one of the mutation's tags. Subscribed queries are refetched
//! right away; unsubscribed ones stay stale until the next read.
//!
//! # Example
//!
//! ```
//! use kakei::client::{MutationEndpoint, QueryClient, QueryEndpoint, Tag};
//! use kakei::transport::{Method, RequestDescriptor, mock::MockTransport};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), kakei::Error> {
//! let transport = MockTransport::from_fn(|request| match request.method {
//!     Method::Get => Ok(json!(["milk"])),
//!     _ => Ok(json!({"ok": true})),
//! });
//! let client = QueryClient::new(transport);
//!
//! let list = client.register_query(
//!     QueryEndpoint::<(), Vec<String>>::new("listItems", |()| {
//!         Ok(RequestDescriptor::get("/items"))
//!     })
//!     .provides([Tag::new("Item")]),
//! )?;
//! let add = client.register_mutation(
//!     MutationEndpoint::<String, serde_json::Value>::new("addItem", |item| {
//!         RequestDescriptor::post("/items").json(item)
//!     })
//!     .invalidates([Tag::new("Item")]),
//! )?;
//!
//! let items = client.query(&list, &()).await?;
//! assert_eq!(items.data(), Some(&vec!["milk".to_string()]));
//!
//! client.mutate(&add, &"eggs".to_string()).await?;
//! let cached = client.peek(&list, &())?.expect("entry is cached");
//! assert!(cached.is_stale());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod endpoint;
pub mod key;
pub mod mutation;
pub mod query;
pub mod subscription;
pub mod tags;

use std::fmt;
use std::sync::{Arc, Weak};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{Error, TransportError};
use crate::transport::{RequestDescriptor, Transport};

pub use cache::{CacheEntry, CacheStore, EntryState, RequestId};
pub use config::QueryConfig;
pub use endpoint::{
    EndpointDefinition, EndpointHandle, EndpointKind, EndpointRegistry, MutationEndpoint,
    MutationHandle, QueryEndpoint, QueryHandle,
};
pub use key::{CacheKey, NO_ARGS};
pub use mutation::{MutationResult, MutationState, MutationTrigger};
pub use query::QueryResult;
pub use subscription::QuerySubscription;
pub use tags::{Tag, TagIndex, TagSet};

use cache::{Collect, EntryPatch, FetchPlan, Subscribed};

/// Coordinates the endpoint registry, the cache store and the transport.
///
/// Cloning is cheap; clones share one cache.
#[derive(Clone)]
pub struct QueryClient {
    inner: Arc<Inner>,
}

struct Inner {
    registry: EndpointRegistry,
    store: CacheStore,
    transport: Arc<dyn Transport>,
    config: QueryConfig,
}

impl QueryClient {
    /// Creates a client with the default [`QueryConfig`].
    #[must_use]
    pub fn new(transport: impl Transport) -> Self {
        Self::with_config(transport, QueryConfig::default())
    }

    /// Creates a client with the given configuration.
    #[must_use]
    pub fn with_config(transport: impl Transport, config: QueryConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: EndpointRegistry::new(),
                store: CacheStore::new(),
                transport: Arc::new(transport),
                config,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &QueryConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn store(&self) -> &CacheStore {
        &self.inner.store
    }

    #[must_use]
    pub fn registry(&self) -> &EndpointRegistry {
        &self.inner.registry
    }

    /// Registers an erased endpoint definition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateEndpoint`] if the name is taken.
    pub fn register(&self, definition: EndpointDefinition) -> Result<EndpointHandle, Error> {
        self.inner.registry.register(definition)
    }

    /// Registers a query endpoint and returns its typed handle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateEndpoint`] if the name is taken.
    pub fn register_query<A, T>(
        &self,
        endpoint: QueryEndpoint<A, T>,
    ) -> Result<QueryHandle<A, T>, Error>
    where
        A: Serialize + DeserializeOwned + Send + Sync + 'static,
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let definition = endpoint.into_definition();
        let name = definition.shared_name().clone();
        self.register(definition)?;
        Ok(QueryHandle::new(name))
    }

    /// Registers a mutation endpoint and returns its typed handle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateEndpoint`] if the name is taken.
    pub fn register_mutation<A, T>(
        &self,
        endpoint: MutationEndpoint<A, T>,
    ) -> Result<MutationHandle<A, T>, Error>
    where
        A: Serialize + DeserializeOwned + Send + Sync + 'static,
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let definition = endpoint.into_definition();
        let name = definition.shared_name().clone();
        self.register(definition)?;
        Ok(MutationHandle::new(name))
    }

    /// Returns the cache key a query call with `args` maps to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encode`] if `args` cannot be serialized.
    pub fn key<A: Serialize, T>(
        &self,
        handle: &QueryHandle<A, T>,
        args: &A,
    ) -> Result<CacheKey, Error> {
        let args = serde_json::to_value(args).map_err(|e| Error::encode(&e))?;
        Ok(CacheKey::new(handle.name(), &args))
    }

    /// Reads the cached result for a query call without touching the network.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encode`] if `args` cannot be serialized.
    pub fn peek<A: Serialize, T: DeserializeOwned>(
        &self,
        handle: &QueryHandle<A, T>,
        args: &A,
    ) -> Result<Option<QueryResult<T>>, Error> {
        let key = self.key(handle, args)?;
        Ok(self.inner.store.get(&key).map(|entry| QueryResult::from_entry(&entry)))
    }

    /// Runs a query through the cache.
    ///
    /// A fresh entry is returned as is. A loading entry is joined. Anything
    /// else issues a request. The returned result is the entry once it has
    /// settled; transport failures are reported inside it, not as `Err`.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not a registered query, `args`
    /// cannot be encoded into a request, or no tokio runtime is running.
    pub async fn query<A, T>(
        &self,
        handle: &QueryHandle<A, T>,
        args: &A,
    ) -> Result<QueryResult<T>, Error>
    where
        A: Serialize,
        T: DeserializeOwned,
    {
        self.run_query(handle.name(), args, false).await
    }

    /// Like [`query`](Self::query), but always issues a new request,
    /// superseding any request already in flight for the same key.
    ///
    /// # Errors
    ///
    /// See [`query`](Self::query).
    pub async fn refetch<A, T>(
        &self,
        handle: &QueryHandle<A, T>,
        args: &A,
    ) -> Result<QueryResult<T>, Error>
    where
        A: Serialize,
        T: DeserializeOwned,
    {
        self.run_query(handle.name(), args, true).await
    }

    /// Subscribes to a query.
    ///
    /// The first subscriber of an entry with no usable data starts a fetch.
    /// Dropping the returned handle releases the subscription; once the last
    /// one is gone the entry is evicted after [`QueryConfig::cache_time`].
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not a registered query, `args`
    /// cannot be encoded into a request, or no tokio runtime is running.
    pub fn subscribe<A, T>(
        &self,
        handle: &QueryHandle<A, T>,
        args: &A,
    ) -> Result<QuerySubscription<T>, Error>
    where
        A: Serialize,
        T: DeserializeOwned,
    {
        let call = self.prepare_query(handle.name(), args)?;
        let runtime = current_runtime()?;
        let key = call.key.clone();
        let Subscribed {
            receiver,
            needs_fetch,
        } = self
            .inner
            .store
            .subscribe(&key, call.definition.shared_name(), &call.args);
        debug!(%key, needs_fetch, "subscribed");

        if needs_fetch {
            self.start(&runtime, call, false);
        }
        Ok(QuerySubscription::new(self.clone(), key, receiver))
    }

    /// Executes a mutation, then invalidates the tags it declares.
    ///
    /// Transport failures are returned to the caller and never touch the
    /// cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not a registered mutation, the
    /// request fails, or the response does not decode into `T`.
    pub async fn mutate<A, T>(&self, handle: &MutationHandle<A, T>, args: &A) -> Result<T, Error>
    where
        A: Serialize,
        T: DeserializeOwned,
    {
        let definition = self.inner.registry.get_kind(handle.name(), EndpointKind::Mutation)?;
        let args = serde_json::to_value(args).map_err(|e| Error::encode(&e))?;
        let request = definition.build_request(&args)?;
        debug!(endpoint = definition.name(), %request, "executing mutation");

        let data = self.inner.transport.execute(request).await?;

        match definition.tags(&args, &data) {
            Ok(tags) => {
                self.invalidate_tags(tags);
            }
            Err(err) => {
                warn!(endpoint = definition.name(), error = %err, "skipping invalidation");
            }
        }
        T::deserialize(&data).map_err(|e| Error::decode(&e))
    }

    /// Returns a trigger that runs `handle` and tracks its state.
    #[must_use]
    pub fn mutation<A, T>(&self, handle: &MutationHandle<A, T>) -> MutationTrigger<A, T>
    where
        T: Clone,
    {
        MutationTrigger::new(self.clone(), handle.clone())
    }

    /// Marks every entry providing one of `tags` stale and refetches the
    /// subscribed ones in the background. Returns the matched keys.
    pub fn invalidate_tags(&self, tags: impl IntoIterator<Item = Tag>) -> Vec<CacheKey> {
        let tags: TagSet = tags.into_iter().collect();
        if tags.is_empty() {
            return Vec::new();
        }

        let keys = self.inner.store.tags().resolve(&tags);
        let refetch = self.inner.store.mark_stale(&keys);
        debug!(?tags, matched = keys.len(), refetching = refetch.len(), "invalidated tags");

        for key in &refetch {
            if let Err(err) = self.refetch_key(key) {
                warn!(%key, error = %err, "background refetch failed to start");
            }
        }
        keys.into_iter().collect()
    }

    /// Forces a new request for an existing entry, using the endpoint and
    /// arguments it was created with. Without a runtime the entry is left
    /// as it is.
    pub(crate) fn refetch_key(&self, key: &CacheKey) -> Result<(), Error> {
        let Some((endpoint, args)) = self.inner.store.origin(key) else {
            return Ok(());
        };
        let runtime = current_runtime()?;
        let definition = self.inner.registry.get_kind(&endpoint, EndpointKind::Query)?;
        let request = definition.build_request(&args)?;
        self.start(
            &runtime,
            PreparedQuery {
                definition,
                key: key.clone(),
                args,
                request,
            },
            true,
        );
        Ok(())
    }

    /// Starts the eviction timer of an entry that has no subscribers left.
    pub(crate) fn schedule_gc(&self, key: &CacheKey) {
        schedule_gc(&self.inner, key);
    }

    async fn run_query<A, T>(
        &self,
        name: &str,
        args: &A,
        force: bool,
    ) -> Result<QueryResult<T>, Error>
    where
        A: Serialize,
        T: DeserializeOwned,
    {
        let call = self.prepare_query(name, args)?;
        let runtime = current_runtime()?;
        let key = call.key.clone();

        let entry = match self.start(&runtime, call, force) {
            Some(receiver) => settle(receiver).await,
            None => self.inner.store.get(&key).unwrap_or_default(),
        };
        self.schedule_gc(&key);
        Ok(QueryResult::from_entry(&entry))
    }

    fn prepare_query<A: Serialize>(&self, name: &str, args: &A) -> Result<PreparedQuery, Error> {
        let definition = self.inner.registry.get_kind(name, EndpointKind::Query)?;
        let args = serde_json::to_value(args).map_err(|e| Error::encode(&e))?;
        let request = definition.build_request(&args)?;
        Ok(PreparedQuery {
            key: CacheKey::new(definition.name(), &args),
            args: Arc::new(args),
            definition,
            request,
        })
    }

    /// Plans a fetch and spawns the request if one is needed. Returns a
    /// receiver to wait on, or `None` if the entry is fresh.
    fn start(
        &self,
        runtime: &Handle,
        call: PreparedQuery,
        force: bool,
    ) -> Option<watch::Receiver<CacheEntry>> {
        let plan = self.inner.store.begin_fetch(
            &call.key,
            call.definition.shared_name(),
            &call.args,
            force,
            self.inner.config.stale_time,
        );
        match plan {
            FetchPlan::Fresh(_) => {
                debug!(key = %call.key, "serving fresh entry");
                None
            }
            FetchPlan::Attach(receiver) => {
                debug!(key = %call.key, "joining in-flight request");
                Some(receiver)
            }
            FetchPlan::Issue {
                request: id,
                receiver,
            } => {
                debug!(key = %call.key, request = %id, "fetching");
                let inner = self.inner.clone();
                runtime.spawn(async move {
                    let PreparedQuery {
                        definition,
                        key,
                        args,
                        request,
                    } = call;
                    let patch = match inner.transport.execute(request).await {
                        Ok(data) => match definition.tags(&args, &data) {
                            Ok(tags) => EntryPatch::Success {
                                request: id,
                                data,
                                tags,
                            },
                            Err(err) => {
                                warn!(%key, error = %err, "response does not match the endpoint");
                                EntryPatch::Error {
                                    request: id,
                                    error: TransportError::Parse(err.to_string()),
                                }
                            }
                        },
                        Err(error) => EntryPatch::Error {
                            request: id,
                            error,
                        },
                    };
                    if let Err(reason) = inner.store.put(&key, patch) {
                        debug!(%key, request = %id, %reason, "discarded result");
                    }
                });
                Some(receiver)
            }
        }
    }
}

impl fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryClient")
            .field("endpoints", &self.inner.registry.len())
            .field("entries", &self.inner.store.len())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// A query call resolved against the registry.
struct PreparedQuery {
    definition: Arc<EndpointDefinition>,
    key: CacheKey,
    args: Arc<Value>,
    request: RequestDescriptor,
}

fn current_runtime() -> Result<Handle, Error> {
    Handle::try_current().map_err(|_| Error::NoRuntime)
}

/// Waits until the entry is no longer loading and returns it.
async fn settle(mut receiver: watch::Receiver<CacheEntry>) -> CacheEntry {
    loop {
        {
            let entry = receiver.borrow_and_update();
            if entry.state != EntryState::Loading {
                return entry.clone();
            }
        }
        if receiver.changed().await.is_err() {
            // The entry was evicted mid-flight; report what was last seen.
            return receiver.borrow().clone();
        }
    }
}

fn schedule_gc(inner: &Arc<Inner>, key: &CacheKey) {
    let Some(timer) = inner.store.arm_gc(key) else {
        return;
    };
    let Ok(runtime) = Handle::try_current() else {
        debug!(%key, "no runtime for the eviction timer, evicting now");
        inner.store.evict(key);
        return;
    };

    let weak: Weak<Inner> = Arc::downgrade(inner);
    let key = key.clone();
    let deadline = Instant::now() + inner.config.cache_time;
    runtime.spawn(async move {
        tokio::select! {
            () = timer.token.cancelled() => {}
            () = tokio::time::sleep_until(deadline) => {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if inner.store.collect(&key, timer.generation) == Collect::Rearm {
                    debug!(%key, "entry still loading, postponing eviction");
                    schedule_gc(&inner, &key);
                }
            }
        }
    });
}
