//! Endpoint definitions and the registry that holds them.
//!
//! Endpoints are declared with the typed builders [`QueryEndpoint`] and
//! [`MutationEndpoint`], then erased into an [`EndpointDefinition`] that works
//! on JSON values. The cache only ever sees the erased form; callers keep the
//! typed [`QueryHandle`] / [`MutationHandle`] returned by registration.
//!
//! # Example
//!
//! ```
//! use kakei::client::{QueryEndpoint, MutationEndpoint, Tag};
//! use kakei::transport::RequestDescriptor;
//!
//! let list = QueryEndpoint::<(), Vec<String>>::new("listNotes", |()| {
//!     Ok(RequestDescriptor::get("/notes"))
//! })
//! .provides([Tag::new("Note")]);
//!
//! let add = MutationEndpoint::<String, serde_json::Value>::new("addNote", |note| {
//!     RequestDescriptor::post("/notes").json(note)
//! })
//! .invalidates([Tag::new("Note")]);
//! # let _ = (list, add);
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::tags::{Tag, TagSet};
use crate::error::Error;
use crate::transport::RequestDescriptor;

/// Whether an endpoint reads (and is cached) or writes (and invalidates).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    Query,
    Mutation,
}

impl EndpointKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
        }
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type RequestFn = Arc<dyn Fn(&Value) -> Result<RequestDescriptor, Error> + Send + Sync>;
type TagFn = Arc<dyn Fn(&Value, &Value) -> Result<TagSet, Error> + Send + Sync>;

/// An endpoint in erased, JSON-level form.
///
/// `build_request` and `tags` must be pure: they may be called more than once
/// for the same logical call. For a query `tags` computes the provided tags,
/// for a mutation the invalidated ones.
#[derive(Clone)]
pub struct EndpointDefinition {
    name: Arc<str>,
    kind: EndpointKind,
    build_request: RequestFn,
    tags: TagFn,
}

impl EndpointDefinition {
    pub fn new<B, G>(
        name: impl Into<Arc<str>>,
        kind: EndpointKind,
        build_request: B,
        tags: G,
    ) -> Self
    where
        B: Fn(&Value) -> Result<RequestDescriptor, Error> + Send + Sync + 'static,
        G: Fn(&Value, &Value) -> Result<TagSet, Error> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind,
            build_request: Arc::new(build_request),
            tags: Arc::new(tags),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn kind(&self) -> EndpointKind {
        self.kind
    }

    pub(crate) const fn shared_name(&self) -> &Arc<str> {
        &self.name
    }

    /// Builds the request for `args`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encode`] if `args` do not fit the endpoint.
    pub fn build_request(&self, args: &Value) -> Result<RequestDescriptor, Error> {
        (self.build_request)(args)
    }

    /// Computes the provided (query) or invalidated (mutation) tags.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if `data` does not match the endpoint's
    /// response type.
    pub fn tags(&self, args: &Value, data: &Value) -> Result<TagSet, Error> {
        (self.tags)(args, data)
    }
}

impl fmt::Debug for EndpointDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointDefinition")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

type TypedRequestFn<A> = Arc<dyn Fn(&A) -> Result<RequestDescriptor, Error> + Send + Sync>;

enum TagSource<A, T> {
    Static(TagSet),
    Computed(Arc<dyn Fn(&A, &T) -> TagSet + Send + Sync>),
}

impl<A, T> TagSource<A, T>
where
    A: DeserializeOwned + 'static,
    T: DeserializeOwned + 'static,
{
    fn computed<F, I>(f: F) -> Self
    where
        F: Fn(&A, &T) -> I + Send + Sync + 'static,
        I: IntoIterator<Item = Tag>,
    {
        Self::Computed(Arc::new(move |args: &A, data: &T| f(args, data).into_iter().collect()))
    }

    fn erase(self) -> TagFn {
        match self {
            // Fixed tags do not depend on the response; skip decoding it.
            Self::Static(tags) => {
                Arc::new(move |_: &Value, _: &Value| -> Result<TagSet, Error> {
                    Ok(tags.clone())
                })
            }
            Self::Computed(f) => {
                Arc::new(move |args: &Value, data: &Value| -> Result<TagSet, Error> {
                    let args = A::deserialize(args).map_err(|e| Error::encode(&e))?;
                    let data = T::deserialize(data).map_err(|e| Error::decode(&e))?;
                    Ok(f(&args, &data))
                })
            }
        }
    }
}

fn erase_request<A>(build: TypedRequestFn<A>) -> RequestFn
where
    A: DeserializeOwned + 'static,
{
    Arc::new(move |args: &Value| -> Result<RequestDescriptor, Error> {
        let args = A::deserialize(args).map_err(|e| Error::encode(&e))?;
        build(&args)
    })
}

/// Typed declaration of a cached read endpoint taking `A` and returning `T`.
pub struct QueryEndpoint<A, T> {
    name: Arc<str>,
    build: TypedRequestFn<A>,
    provides: TagSource<A, T>,
}

impl<A, T> QueryEndpoint<A, T>
where
    A: Serialize + DeserializeOwned + Send + Sync + 'static,
    T: DeserializeOwned + Send + Sync + 'static,
{
    /// Declares a query. It provides no tags until [`provides`](Self::provides)
    /// or [`provides_tags`](Self::provides_tags) is called.
    pub fn new<F>(name: impl Into<Arc<str>>, build: F) -> Self
    where
        F: Fn(&A) -> Result<RequestDescriptor, Error> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            build: Arc::new(build),
            provides: TagSource::Static(TagSet::new()),
        }
    }

    /// Provides a fixed set of tags.
    #[must_use]
    pub fn provides(mut self, tags: impl IntoIterator<Item = Tag>) -> Self {
        self.provides = TagSource::Static(tags.into_iter().collect());
        self
    }

    /// Provides tags computed from the arguments and the response.
    #[must_use]
    pub fn provides_tags<F, I>(mut self, f: F) -> Self
    where
        F: Fn(&A, &T) -> I + Send + Sync + 'static,
        I: IntoIterator<Item = Tag>,
    {
        self.provides = TagSource::computed(f);
        self
    }

    #[must_use]
    pub fn into_definition(self) -> EndpointDefinition {
        EndpointDefinition {
            name: self.name,
            kind: EndpointKind::Query,
            build_request: erase_request(self.build),
            tags: self.provides.erase(),
        }
    }
}

/// Typed declaration of a write endpoint taking `A` and returning `T`.
pub struct MutationEndpoint<A, T> {
    name: Arc<str>,
    build: TypedRequestFn<A>,
    invalidates: TagSource<A, T>,
}

impl<A, T> MutationEndpoint<A, T>
where
    A: Serialize + DeserializeOwned + Send + Sync + 'static,
    T: DeserializeOwned + Send + Sync + 'static,
{
    /// Declares a mutation. It invalidates nothing until
    /// [`invalidates`](Self::invalidates) or
    /// [`invalidates_tags`](Self::invalidates_tags) is called.
    pub fn new<F>(name: impl Into<Arc<str>>, build: F) -> Self
    where
        F: Fn(&A) -> Result<RequestDescriptor, Error> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            build: Arc::new(build),
            invalidates: TagSource::Static(TagSet::new()),
        }
    }

    /// Invalidates a fixed set of tags on success.
    #[must_use]
    pub fn invalidates(mut self, tags: impl IntoIterator<Item = Tag>) -> Self {
        self.invalidates = TagSource::Static(tags.into_iter().collect());
        self
    }

    /// Invalidates tags computed from the arguments and the response.
    #[must_use]
    pub fn invalidates_tags<F, I>(mut self, f: F) -> Self
    where
        F: Fn(&A, &T) -> I + Send + Sync + 'static,
        I: IntoIterator<Item = Tag>,
    {
        self.invalidates = TagSource::computed(f);
        self
    }

    #[must_use]
    pub fn into_definition(self) -> EndpointDefinition {
        EndpointDefinition {
            name: self.name,
            kind: EndpointKind::Mutation,
            build_request: erase_request(self.build),
            tags: self.invalidates.erase(),
        }
    }
}

/// Untyped reference to a registered endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointHandle {
    name: Arc<str>,
    kind: EndpointKind,
}

impl EndpointHandle {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn kind(&self) -> EndpointKind {
        self.kind
    }
}

/// Typed reference to a registered query endpoint.
pub struct QueryHandle<A, T> {
    name: Arc<str>,
    _marker: PhantomData<fn(&A) -> T>,
}

impl<A, T> QueryHandle<A, T> {
    pub(crate) const fn new(name: Arc<str>) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<A, T> Clone for QueryHandle<A, T> {
    fn clone(&self) -> Self {
        Self::new(self.name.clone())
    }
}

impl<A, T> fmt::Debug for QueryHandle<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("QueryHandle").field(&self.name).finish()
    }
}

/// Typed reference to a registered mutation endpoint.
pub struct MutationHandle<A, T> {
    name: Arc<str>,
    _marker: PhantomData<fn(&A) -> T>,
}

impl<A, T> MutationHandle<A, T> {
    pub(crate) const fn new(name: Arc<str>) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<A, T> Clone for MutationHandle<A, T> {
    fn clone(&self) -> Self {
        Self::new(self.name.clone())
    }
}

impl<A, T> fmt::Debug for MutationHandle<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MutationHandle").field(&self.name).finish()
    }
}

/// Append-only set of endpoint definitions, keyed by name.
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    endpoints: DashMap<Arc<str>, Arc<EndpointDefinition>>,
}

impl EndpointRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `definition`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateEndpoint`] if the name is taken.
    pub fn register(&self, definition: EndpointDefinition) -> Result<EndpointHandle, Error> {
        match self.endpoints.entry(definition.name.clone()) {
            Entry::Occupied(_) => Err(Error::DuplicateEndpoint(definition.name.to_string())),
            Entry::Vacant(vacant) => {
                let handle = EndpointHandle {
                    name: definition.name.clone(),
                    kind: definition.kind,
                };
                vacant.insert(Arc::new(definition));
                Ok(handle)
            }
        }
    }

    /// Looks up an endpoint by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownEndpoint`] if nothing is registered under `name`.
    pub fn get(&self, name: &str) -> Result<Arc<EndpointDefinition>, Error> {
        self.endpoints
            .get(name)
            .map(|definition| definition.clone())
            .ok_or_else(|| Error::UnknownEndpoint(name.to_string()))
    }

    /// Looks up an endpoint by name and checks its kind.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownEndpoint`] or [`Error::KindMismatch`].
    pub fn get_kind(
        &self,
        name: &str,
        kind: EndpointKind,
    ) -> Result<Arc<EndpointDefinition>, Error> {
        let definition = self.get(name)?;
        if definition.kind == kind {
            Ok(definition)
        } else {
            Err(Error::KindMismatch {
                name: name.to_string(),
                expected: kind.as_str(),
                actual: definition.kind.as_str(),
            })
        }
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.endpoints.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
