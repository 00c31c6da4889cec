//! Mock transport for testing.
//!
//! [`MockTransport`] runs in-process and never touches the network. It has two
//! modes:
//!
//! - **Handler**: every request is answered synchronously by a closure.
//! - **Manual**: every request is parked and handed to a [`MockServer`]; the
//!   test decides when, and in which order, each one completes. This is what
//!   makes de-duplication and out-of-order completion deterministic to test.
//!
//! # Example
//!
//! ```
//! use kakei::transport::{RequestDescriptor, Transport, mock::MockTransport};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (transport, mut server) = MockTransport::manual();
//!
//! let call = tokio::spawn(transport.execute(RequestDescriptor::get("/expenses")));
//!
//! let pending = server.next_request().await.expect("request should arrive");
//! assert_eq!(pending.request().path, "/expenses");
//! pending.ok(json!([]));
//!
//! assert_eq!(call.await.unwrap(), Ok(json!([])));
//! assert_eq!(transport.calls(), 1);
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use super::{RequestDescriptor, Transport};
use crate::error::TransportError;

type Handler = Arc<dyn Fn(&RequestDescriptor) -> Result<Value, TransportError> + Send + Sync>;

#[derive(Clone)]
enum Mode {
    Handler(Handler),
    Manual(mpsc::UnboundedSender<PendingRequest>),
}

/// An in-process transport whose responses are controlled by the test.
///
/// Clones share the call counter and the response source.
#[derive(Clone)]
pub struct MockTransport {
    mode: Mode,
    calls: Arc<AtomicUsize>,
}

impl MockTransport {
    /// Creates a transport that answers every request with `handler`.
    #[must_use]
    pub fn from_fn<F>(handler: F) -> Self
    where
        F: Fn(&RequestDescriptor) -> Result<Value, TransportError> + Send + Sync + 'static,
    {
        Self {
            mode: Mode::Handler(Arc::new(handler)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Creates a transport whose requests are parked until the returned
    /// [`MockServer`] answers them.
    #[must_use]
    pub fn manual() -> (Self, MockServer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self {
            mode: Mode::Manual(tx),
            calls: Arc::new(AtomicUsize::new(0)),
        };
        (transport, MockServer { rx })
    }

    /// Returns the number of requests executed so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.mode {
            Mode::Handler(_) => "handler",
            Mode::Manual(_) => "manual",
        };
        f.debug_struct("MockTransport")
            .field("mode", &mode)
            .field("calls", &self.calls())
            .finish()
    }
}

impl Transport for MockTransport {
    fn execute(
        &self,
        request: RequestDescriptor,
    ) -> BoxFuture<'static, Result<Value, TransportError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        match &self.mode {
            Mode::Handler(handler) => {
                let result = handler(&request);
                Box::pin(async move { result })
            }
            Mode::Manual(tx) => {
                let (responder, rx) = oneshot::channel();
                let sent = tx.send(PendingRequest { request, responder });
                Box::pin(async move {
                    if sent.is_err() {
                        return Err(TransportError::Fetch("mock server is gone".to_string()));
                    }
                    rx.await.unwrap_or_else(|_| {
                        Err(TransportError::Fetch(
                            "mock server dropped the request".to_string(),
                        ))
                    })
                })
            }
        }
    }
}

/// Receiving side of a manual [`MockTransport`].
#[derive(Debug)]
pub struct MockServer {
    rx: mpsc::UnboundedReceiver<PendingRequest>,
}

impl MockServer {
    /// Waits for the next request. Returns `None` once every transport clone
    /// has been dropped.
    pub async fn next_request(&mut self) -> Option<PendingRequest> {
        self.rx.recv().await
    }

    /// Returns the next request if one is already waiting.
    pub fn try_next_request(&mut self) -> Option<PendingRequest> {
        self.rx.try_recv().ok()
    }
}

/// A request parked by a manual [`MockTransport`], waiting for an answer.
///
/// Dropping it without answering fails the request with
/// [`TransportError::Fetch`].
pub struct PendingRequest {
    request: RequestDescriptor,
    responder: oneshot::Sender<Result<Value, TransportError>>,
}

impl PendingRequest {
    #[must_use]
    pub const fn request(&self) -> &RequestDescriptor {
        &self.request
    }

    /// Completes the request with `result`.
    pub fn respond(self, result: Result<Value, TransportError>) {
        // The caller may have stopped waiting; that is not an error here.
        let _ = self.responder.send(result);
    }

    /// Completes the request successfully with `body`.
    pub fn ok(self, body: Value) {
        self.respond(Ok(body));
    }

    /// Completes the request with an HTTP error response.
    pub fn fail(self, status: u16, body: Value) {
        self.respond(Err(TransportError::Status { status, body }));
    }
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}
