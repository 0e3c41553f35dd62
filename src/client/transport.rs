//! The network seam.
//!
//! The client never talks to the network itself. Queries and mutations go
//! through a [`Transport`], supplied by the caller when the
//! [`Endpoint`](super::Endpoint) is built. [`HttpTransport`] is the default
//! implementation over `reqwest`; tests use [`MockTransport`](crate::mock::MockTransport).

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Error type for transport operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("http error: {0}")]
    Http(String),

    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("could not decode response: {0}")]
    Decode(String),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

/// A mutation request as handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRequest {
    pub method: &'static str,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
}

/// Performs the actual network calls.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetches a query URI and returns the decoded JSON payload.
    async fn fetch_query(&self, uri: &str) -> Result<Value, TransportError>;

    /// Sends a mutation to `endpoint` and returns the decoded JSON payload.
    async fn send_mutation(
        &self,
        endpoint: &str,
        request: MutationRequest,
    ) -> Result<Value, TransportError>;
}

#[cfg(feature = "http")]
pub use http::HttpTransport;

#[cfg(feature = "http")]
mod http {
    use std::collections::BTreeMap;

    use async_trait::async_trait;
    use reqwest::Client;
    use serde_json::Value;

    use super::{MutationRequest, Transport, TransportError};

    impl From<reqwest::Error> for TransportError {
        fn from(e: reqwest::Error) -> Self {
            match e.status() {
                Some(status) => Self::Status {
                    status: status.as_u16(),
                    url: e.url().map(ToString::to_string).unwrap_or_default(),
                },
                None if e.is_decode() => Self::Decode(e.to_string()),
                None => Self::Http(e.to_string()),
            }
        }
    }

    /// [`Transport`] over a shared `reqwest` client.
    #[derive(Debug, Clone, Default)]
    pub struct HttpTransport {
        client: Client,
        headers: BTreeMap<String, String>,
    }

    impl HttpTransport {
        #[must_use]
        pub fn new(client: Client) -> Self {
            Self {
                client,
                headers: BTreeMap::new(),
            }
        }

        /// Adds a header sent with every query fetch.
        #[must_use]
        pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
            self.headers.insert(name.into(), value.into());
            self
        }
    }

    #[async_trait]
    impl Transport for HttpTransport {
        async fn fetch_query(&self, uri: &str) -> Result<Value, TransportError> {
            let mut request = self.client.get(uri);
            for (name, value) in &self.headers {
                request = request.header(name, value);
            }
            let resp = request.send().await?.error_for_status()?;
            Ok(resp.json().await?)
        }

        async fn send_mutation(
            &self,
            endpoint: &str,
            request: MutationRequest,
        ) -> Result<Value, TransportError> {
            let method = reqwest::Method::from_bytes(request.method.as_bytes())
                .map_err(|e| TransportError::Other(e.to_string()))?;
            let mut builder = self.client.request(method, endpoint);
            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }
            let resp = builder.json(&request.body).send().await?.error_for_status()?;
            Ok(resp.json().await?)
        }
    }
}
