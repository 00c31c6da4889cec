//! Transport executor: one network call per normalized request.
//!
//! The cache never talks to the network directly. It hands a
//! [`RequestDescriptor`] to a [`Transport`] and receives either the decoded JSON
//! body or a [`TransportError`]. No retries happen at this layer.
//!
//! Two implementations ship with the crate:
//!
//! - [`HttpTransport`](http::HttpTransport) (feature `http`): reqwest-backed.
//! - [`MockTransport`](mock::MockTransport): in-process, for tests.

#[cfg(feature = "http")]
pub mod http;
pub mod mock;

use std::fmt;

use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, TransportError};

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized request: path relative to the server root, method, query
/// parameters and an optional JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub path: String,
    pub method: Method,
    pub params: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl RequestDescriptor {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method,
            params: Vec::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    #[must_use]
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::Put, path)
    }

    #[must_use]
    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::Patch, path)
    }

    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    /// Appends a single query parameter.
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((key.into(), value.to_string()));
        self
    }

    /// Appends every field of a serializable struct as query parameters.
    ///
    /// `null` fields (unset `Option`s) are skipped, and a `null` value adds
    /// nothing at all, so `Option<Params>` can be passed directly.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encode`] if `params` does not serialize to an object of
    /// scalar values.
    pub fn query<Q>(mut self, params: &Q) -> Result<Self, Error>
    where
        Q: Serialize + ?Sized,
    {
        let map = match serde_json::to_value(params).map_err(|e| Error::encode(&e))? {
            Value::Null => return Ok(self),
            Value::Object(map) => map,
            other => {
                return Err(Error::Encode(format!(
                    "query parameters must be an object, got {other}"
                )));
            }
        };

        for (key, value) in map {
            let value = match value {
                Value::Null => continue,
                Value::String(s) => s,
                Value::Bool(_) | Value::Number(_) => value.to_string(),
                Value::Array(_) | Value::Object(_) => {
                    return Err(Error::Encode(format!(
                        "query parameter {key:?} must be a scalar"
                    )));
                }
            };
            self.params.push((key, value));
        }
        Ok(self)
    }

    /// Sets the JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encode`] if `body` fails to serialize.
    pub fn json<B>(mut self, body: &B) -> Result<Self, Error>
    where
        B: Serialize + ?Sized,
    {
        self.body = Some(serde_json::to_value(body).map_err(|e| Error::encode(&e))?);
        Ok(self)
    }
}

impl fmt::Display for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)?;
        for (i, (key, value)) in self.params.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{sep}{key}={value}")?;
        }
        Ok(())
    }
}

/// Performs a single network call.
///
/// Implementations must be cheap to share: the client keeps one behind an
/// `Arc` and calls it from spawned tasks.
pub trait Transport: Send + Sync + 'static {
    /// Executes `request`, resolving to the response body on success.
    fn execute(
        &self,
        request: RequestDescriptor,
    ) -> BoxFuture<'static, Result<Value, TransportError>>;
}
