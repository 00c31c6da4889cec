use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use super::key::CacheKey;

/// Label connecting what a query exposes to what a mutation affects.
///
/// A tag is a resource kind with an optional id. Invalidating a bare tag
/// (`Expense`) matches every provider of that kind, with or without an id.
/// Invalidating an id tag (`Expense:abc`) matches only providers of exactly
/// that tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag {
    kind: Arc<str>,
    id: Option<Arc<str>>,
}

impl Tag {
    pub fn new(kind: impl Into<Arc<str>>) -> Self {
        Self {
            kind: kind.into(),
            id: None,
        }
    }

    pub fn with_id(kind: impl Into<Arc<str>>, id: impl ToString) -> Self {
        Self {
            kind: kind.into(),
            id: Some(id.to_string().into()),
        }
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

impl From<&str> for Tag {
    fn from(kind: &str) -> Self {
        Self::new(kind)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}:{id}", self.kind),
            None => f.write_str(&self.kind),
        }
    }
}

pub type TagSet = BTreeSet<Tag>;

type Bucket = HashMap<Option<Arc<str>>, HashSet<CacheKey>>;

/// Reverse map from tag to the cache keys currently providing it.
///
/// Every key listed under a tag provides that tag, and a key that provides
/// nothing appears nowhere. Empty buckets are dropped.
#[derive(Debug, Default)]
pub struct TagIndex {
    /// kind → id → keys
    buckets: DashMap<Arc<str>, Bucket>,
    by_key: DashMap<CacheKey, TagSet>,
}

impl TagIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the tags provided by `key`, moving it between buckets.
    pub fn set_provided(&self, key: &CacheKey, tags: TagSet) {
        let mut current = self.by_key.entry(key.clone()).or_default();
        for tag in current.difference(&tags) {
            self.unlink(tag, key);
        }
        for tag in tags.difference(&current) {
            self.link(tag, key);
        }
        *current = tags;
        drop(current);

        self.by_key.remove_if(key, |_, tags| tags.is_empty());
    }

    /// Removes `key` from every bucket it appears in.
    pub fn remove(&self, key: &CacheKey) {
        if let Some((_, tags)) = self.by_key.remove(key) {
            for tag in &tags {
                self.unlink(tag, key);
            }
        }
    }

    /// Returns the tags `key` currently provides.
    #[must_use]
    pub fn provided(&self, key: &CacheKey) -> TagSet {
        self.by_key.get(key).map(|tags| tags.clone()).unwrap_or_default()
    }

    /// Returns every key providing at least one of `tags`.
    #[must_use]
    pub fn resolve(&self, tags: &TagSet) -> BTreeSet<CacheKey> {
        let mut keys = BTreeSet::new();
        for tag in tags {
            let Some(bucket) = self.buckets.get(&tag.kind) else {
                continue;
            };
            match &tag.id {
                None => keys.extend(bucket.values().flatten().cloned()),
                Some(id) => {
                    if let Some(ids) = bucket.get(&Some(id.clone())) {
                        keys.extend(ids.iter().cloned());
                    }
                }
            }
        }
        keys
    }

    /// Returns the number of keys providing at least one tag.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    fn link(&self, tag: &Tag, key: &CacheKey) {
        self.buckets
            .entry(tag.kind.clone())
            .or_default()
            .entry(tag.id.clone())
            .or_default()
            .insert(key.clone());
    }

    fn unlink(&self, tag: &Tag, key: &CacheKey) {
        let Some(mut bucket) = self.buckets.get_mut(&tag.kind) else {
            return;
        };
        if let Some(keys) = bucket.get_mut(&tag.id) {
            keys.remove(key);
            if keys.is_empty() {
                bucket.remove(&tag.id);
            }
        }
        let empty = bucket.is_empty();
        drop(bucket);

        if empty {
            self.buckets.remove_if(&tag.kind, |_, bucket| bucket.is_empty());
        }
    }
}
