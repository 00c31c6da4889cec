//! Stateful mutation triggers.
//!
//! [`QueryClient::mutate`] is a plain awaitable call. A [`MutationTrigger`]
//! wraps it for consumers that render the mutation's progress: it remembers
//! the state of the latest call and publishes every change on a watch channel.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;

use super::QueryClient;
use super::endpoint::MutationHandle;
use crate::error::Error;

/// The state of a mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationState<T> {
    /// Mutation is idle (not yet started).
    Idle,
    /// Mutation is in progress.
    Loading,
    /// Mutation succeeded with a result.
    Success(T),
    /// Mutation failed with an error.
    Error(Error),
}

/// A mutation result containing the current state.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationResult<T> {
    /// The current state of the mutation.
    pub state: MutationState<T>,
}

impl<T> MutationResult<T> {
    /// Returns the result data if the mutation succeeded, otherwise `None`.
    pub const fn data(&self) -> Option<&T> {
        match &self.state {
            MutationState::Success(data) => Some(data),
            _ => None,
        }
    }

    /// Returns the error if the mutation failed, otherwise `None`.
    pub const fn error(&self) -> Option<&Error> {
        match &self.state {
            MutationState::Error(err) => Some(err),
            _ => None,
        }
    }

    /// Returns `true` if no call has been made since creation or reset.
    pub const fn is_idle(&self) -> bool {
        matches!(self.state, MutationState::Idle)
    }

    /// Returns `true` if the mutation is currently loading.
    pub const fn is_loading(&self) -> bool {
        matches!(self.state, MutationState::Loading)
    }

    /// Returns `true` if the mutation succeeded.
    pub const fn is_success(&self) -> bool {
        matches!(self.state, MutationState::Success(_))
    }

    /// Returns `true` if the mutation failed.
    pub const fn is_error(&self) -> bool {
        matches!(self.state, MutationState::Error(_))
    }
}

/// Runs one mutation endpoint and tracks the state of its latest call.
///
/// Only the most recently started call writes its outcome; an older call
/// that finishes later still returns its result to its own caller.
pub struct MutationTrigger<A, T> {
    client: QueryClient,
    handle: MutationHandle<A, T>,
    state: Arc<watch::Sender<MutationState<T>>>,
    latest: Arc<AtomicU64>,
}

impl<A, T: Clone> MutationTrigger<A, T> {
    pub(crate) fn new(client: QueryClient, handle: MutationHandle<A, T>) -> Self {
        let (state, _) = watch::channel(MutationState::Idle);
        Self {
            client,
            handle,
            state: Arc::new(state),
            latest: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns the state of the latest call.
    #[must_use]
    pub fn result(&self) -> MutationResult<T> {
        MutationResult {
            state: self.state.borrow().clone(),
        }
    }

    /// Returns a receiver that observes every state change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<MutationState<T>> {
        self.state.subscribe()
    }

    /// Returns the trigger to [`MutationState::Idle`].
    pub fn reset(&self) {
        self.latest.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(MutationState::Idle);
    }

    /// Runs the mutation with `args`.
    ///
    /// # Errors
    ///
    /// Propagates the error from [`QueryClient::mutate`] unchanged.
    pub async fn trigger(&self, args: &A) -> Result<T, Error>
    where
        A: Serialize,
        T: DeserializeOwned,
    {
        let call = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_replace(MutationState::Loading);

        let result = self.client.mutate(&self.handle, args).await;

        if self.latest.load(Ordering::SeqCst) == call {
            self.state.send_replace(match &result {
                Ok(data) => MutationState::Success(data.clone()),
                Err(err) => MutationState::Error(err.clone()),
            });
        }
        result
    }
}

impl<A, T> Clone for MutationTrigger<A, T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            handle: self.handle.clone(),
            state: self.state.clone(),
            latest: self.latest.clone(),
        }
    }
}

impl<A, T> fmt::Debug for MutationTrigger<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationTrigger")
            .field("endpoint", &self.handle.name())
            .finish_non_exhaustive()
    }
}
