//! reqwest-backed transport.

use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use super::{Method, RequestDescriptor, Transport};
use crate::config::ClientConfig;
use crate::error::TransportError;

/// Sends requests to a JSON HTTP API rooted at `base_url`.
///
/// Success bodies are decoded as JSON (an empty body or `204 No Content` is
/// `null`). Non-success responses become [`TransportError::Status`] with the
/// error payload parsed as JSON, falling back to the raw text.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Creates a transport with the given base URL and request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Fetch`] if the underlying client cannot be
    /// built (e.g. the TLS backend fails to initialize).
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Fetch(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Creates a transport from a loaded client configuration.
    ///
    /// # Errors
    ///
    /// See [`HttpTransport::new`].
    pub fn from_config(config: &ClientConfig) -> Result<Self, TransportError> {
        Self::new(&config.api_base_url, config.request_timeout())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Transport for HttpTransport {
    fn execute(
        &self,
        request: RequestDescriptor,
    ) -> BoxFuture<'static, Result<Value, TransportError>> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, self.url(&request.path));
        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        Box::pin(async move {
            debug!(%request, "sending request");
            let response = builder.send().await.map_err(map_reqwest_error)?;
            let status = response.status();
            let text = response.text().await.map_err(map_reqwest_error)?;

            if status.is_success() {
                if status == reqwest::StatusCode::NO_CONTENT || text.trim().is_empty() {
                    return Ok(Value::Null);
                }
                serde_json::from_str(&text).map_err(|e| TransportError::Parse(e.to_string()))
            } else {
                let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
                Err(TransportError::Status {
                    status: status.as_u16(),
                    body,
                })
            }
        })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_decode() {
        TransportError::Parse(err.to_string())
    } else {
        TransportError::Fetch(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_without_double_slash() -> Result<(), TransportError> {
        let transport = HttpTransport::new("http://localhost:8080/", Duration::from_secs(5))?;
        assert_eq!(transport.url("/expenses"), "http://localhost:8080/expenses");
        Ok(())
    }

    #[tokio::test]
    async fn test_unreachable_server_is_fetch_error() -> Result<(), TransportError> {
        // Port 9 (discard) is not expected to accept HTTP connections.
        let transport = HttpTransport::new("http://127.0.0.1:9", Duration::from_secs(2))?;
        let result = transport.execute(RequestDescriptor::get("/expenses")).await;
        assert!(matches!(
            result,
            Err(TransportError::Fetch(_) | TransportError::Timeout)
        ));
        Ok(())
    }
}
