//! # Kakei - expense-recording client
//!
//! Kakei talks to a small expense server and keeps what it reads in a typed
//! query cache. Reads and writes are declared once as endpoints; the cache
//! takes care of keeping every reader up to date.
//!
//! ## Architecture
//!
//! 1. **Transport**: one network call per [`RequestDescriptor`](transport::RequestDescriptor)
//! 2. **Endpoints**: named queries that *provide* tags and mutations that *invalidate* them
//! 3. **Cache store**: one entry per endpoint and canonical arguments
//! 4. **Tag index**: which entries provide which tags
//! 5. **Subscriptions**: live handles that keep an entry alive and refreshed
//! 6. **Coordinator**: [`QueryClient`](client::QueryClient), tying it all together
//!
//! ## Core Components
//!
//! - [`QueryClient`](client::QueryClient): query, subscribe, mutate, invalidate
//! - [`QueryEndpoint`](client::QueryEndpoint) / [`MutationEndpoint`](client::MutationEndpoint):
//!   typed endpoint builders
//! - [`Transport`](transport::Transport): the network seam, with an HTTP and a mock
//!   implementation
//! - [`ExpenseApi`](expense::ExpenseApi): the expense endpoints used by the `kakei` binary
//!
//! ## Example
//!
//! ```rust,no_run
//! use kakei::prelude::*;
//! use kakei::transport::http::HttpTransport;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = HttpTransport::new("http://localhost:8080", Duration::from_secs(10))?;
//! let client = QueryClient::new(transport);
//! let api = ExpenseApi::register(&client)?;
//!
//! let mut listing = api.watch_list(ListExpensesParams::default())?;
//! api.record(&RecordExpenseRequest::new(2000, "食費", "ランチ", "2026-02-20")).await?;
//!
//! // The listing refetches on its own after the write.
//! let refreshed = listing.settled().await;
//! # let _ = refreshed;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod expense;
pub mod logging;
pub mod prelude;
pub mod transport;

pub use error::{Error, TransportError, ValidationError};
