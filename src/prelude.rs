//! Prelude module for convenient imports.
//!
//! ```
//! use kakei::prelude::*;
//! ```
//!
//! # What's included
//!
//! - [`QueryClient`] - The cache coordinator
//! - [`QueryEndpoint`], [`MutationEndpoint`] - Endpoint builders
//! - [`QueryResult`], [`QuerySubscription`] - Reading query state
//! - [`Tag`] - Invalidation labels
//! - [`ExpenseApi`] and its request types

pub use crate::client::{
    MutationEndpoint, MutationHandle, MutationResult, MutationState, MutationTrigger, QueryClient,
    QueryConfig, QueryEndpoint, QueryHandle, QueryResult, QuerySubscription, Tag, TagSet,
};
pub use crate::error::{Error, TransportError};
pub use crate::expense::{
    Expense, ExpenseApi, ListExpensesParams, RecordExpenseRequest, RecordExpenseResponse,
};
pub use crate::transport::{RequestDescriptor, Transport};
