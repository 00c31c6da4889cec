use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tracing::warn;

use super::cache::{CacheEntry, EntryState};
use crate::error::{ErrorInfo, TransportError};

/// Typed view of a cache entry, as handed to query consumers.
///
/// While a refetch is in flight the previous data (or error) stays visible,
/// so `is_fetching` and `data` can both be true at once.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult<T> {
    /// Lifecycle state of the underlying entry.
    pub state: EntryState,
    /// Last successfully fetched data.
    pub data: Option<T>,
    /// Last error, if the most recent request failed.
    pub error: Option<ErrorInfo>,
    /// When the data or error was requested.
    pub last_fetched_at: Option<Instant>,
}

impl<T> QueryResult<T> {
    /// Returns the data, if any is available.
    pub const fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    /// Returns the error from the most recent request, if it failed.
    pub const fn error(&self) -> Option<&ErrorInfo> {
        self.error.as_ref()
    }

    /// Returns `true` while the first result is still being fetched.
    pub const fn is_loading(&self) -> bool {
        matches!(self.state, EntryState::Uninitialized | EntryState::Loading)
            && self.data.is_none()
            && self.error.is_none()
    }

    /// Returns `true` while any request for this entry is in flight.
    pub const fn is_fetching(&self) -> bool {
        matches!(self.state, EntryState::Loading)
    }

    /// Returns `true` if the last request succeeded.
    pub const fn is_success(&self) -> bool {
        matches!(self.state, EntryState::Success)
    }

    /// Returns `true` if the last request failed.
    pub const fn is_error(&self) -> bool {
        matches!(self.state, EntryState::Error)
    }

    /// Returns `true` if the entry was invalidated and awaits a refetch.
    pub const fn is_stale(&self) -> bool {
        matches!(self.state, EntryState::Stale)
    }

    /// Returns `true` once the entry holds a result that is not being
    /// replaced.
    pub const fn is_settled(&self) -> bool {
        matches!(self.state, EntryState::Success | EntryState::Error)
    }
}

impl<T: DeserializeOwned> QueryResult<T> {
    /// Decodes `entry` into `T`.
    ///
    /// Data that does not fit `T` surfaces as a [`TransportError::Parse`]
    /// error, the same as an unparsable response body.
    pub(crate) fn from_entry(entry: &CacheEntry) -> Self {
        let mut result = Self {
            state: entry.state,
            data: None,
            error: entry.error.clone(),
            last_fetched_at: entry.last_fetched_at,
        };

        if let Some(value) = entry.data.as_deref() {
            match T::deserialize(value) {
                Ok(data) => result.data = Some(data),
                Err(err) => {
                    warn!(error = %err, "cached data does not decode");
                    if entry.state == EntryState::Success {
                        result.state = EntryState::Error;
                    }
                    result.error = Some(TransportError::Parse(err.to_string()));
                }
            }
        }
        result
    }
}
