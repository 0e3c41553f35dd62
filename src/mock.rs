//! Mock transport for testing.
//!
//! This module provides a controllable [`Transport`] that answers from scripted
//! responses, records every call, and can hold requests in flight until the
//! test releases them. This makes de-duplication, race and suspension
//! behavior testable without a server or wall-clock timing.
//!
//! # Basic Usage
//!
//! ```
//! use booklist_query::client::{ClientConfig, Endpoint};
//! use booklist_query::mock::MockTransport;
//! use serde_json::json;
//!
//! let transport = MockTransport::new().with_query_response(json!({ "data": { "allBooks": [] } }));
//! let endpoint = Endpoint::new(ClientConfig::new("/graphql"), transport.clone());
//!
//! // The same handle is shared with the test, which can inspect calls later.
//! assert!(transport.query_calls().is_empty());
//! ```
//!
//! # Controlling Settlement
//!
//! ```rust,ignore
//! transport.hold();                 // requests issued from now on wait
//! endpoint.preload(QUERY, None);    // in flight
//! transport.release();              // every held request proceeds
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::watch;

use crate::client::{MutationRequest, Transport, TransportError};

type Responder = Arc<dyn Fn(&str, usize) -> Result<Value, TransportError> + Send + Sync>;

struct Inner {
    query_responder: Mutex<Responder>,
    mutation_responder: Mutex<Responder>,
    query_calls: Mutex<Vec<String>>,
    mutation_calls: Mutex<Vec<(String, MutationRequest)>>,
    gate: watch::Sender<bool>,
}

/// A scripted [`Transport`].
///
/// Clones share state, so one clone can be handed to the endpoint while the
/// test keeps another to script responses and inspect calls.
///
/// Unless scripted otherwise, every query and mutation answers
/// `{"data": {}}`.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Inner>,
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            inner: Arc::new(Inner {
                query_responder: Mutex::new(empty_data()),
                mutation_responder: Mutex::new(empty_data()),
                query_calls: Mutex::new(Vec::new()),
                mutation_calls: Mutex::new(Vec::new()),
                gate,
            }),
        }
    }

    /// Answers every query with `payload`.
    #[must_use]
    pub fn with_query_response(self, payload: Value) -> Self {
        self.on_query(move |_, _| Ok(payload.clone()))
    }

    /// Answers queries with `f(uri, call_index)`.
    #[must_use]
    pub fn on_query<F>(self, f: F) -> Self
    where
        F: Fn(&str, usize) -> Result<Value, TransportError> + Send + Sync + 'static,
    {
        *self.inner.query_responder.lock() = Arc::new(f);
        self
    }

    /// Answers every mutation with `payload`.
    #[must_use]
    pub fn with_mutation_response(self, payload: Value) -> Self {
        self.on_mutation(move |_, _| Ok(payload.clone()))
    }

    /// Answers mutations with `f(endpoint, call_index)`.
    #[must_use]
    pub fn on_mutation<F>(self, f: F) -> Self
    where
        F: Fn(&str, usize) -> Result<Value, TransportError> + Send + Sync + 'static,
    {
        *self.inner.mutation_responder.lock() = Arc::new(f);
        self
    }

    /// Makes every subsequent query fail with `error`.
    pub fn fail_queries(&self, error: TransportError) {
        *self.inner.query_responder.lock() = Arc::new(move |_, _| Err(error.clone()));
    }

    /// Makes every subsequent mutation fail with `error`.
    pub fn fail_mutations(&self, error: TransportError) {
        *self.inner.mutation_responder.lock() = Arc::new(move |_, _| Err(error.clone()));
    }

    /// Holds requests in flight until [`release`](Self::release) is called.
    pub fn hold(&self) {
        self.inner.gate.send_replace(false);
    }

    /// Lets every held request, and every later one, complete.
    pub fn release(&self) {
        self.inner.gate.send_replace(true);
    }

    /// URIs of all queries received so far, in order.
    pub fn query_calls(&self) -> Vec<String> {
        self.inner.query_calls.lock().clone()
    }

    /// Endpoints and requests of all mutations received so far, in order.
    pub fn mutation_calls(&self) -> Vec<(String, MutationRequest)> {
        self.inner.mutation_calls.lock().clone()
    }

    async fn wait_for_release(&self) -> Result<(), TransportError> {
        let mut gate = self.inner.gate.subscribe();
        let opened = gate.wait_for(|open| *open).await.is_ok();
        if opened {
            Ok(())
        } else {
            Err(TransportError::Other("mock transport dropped".into()))
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTransport")
            .field("query_calls", &self.inner.query_calls.lock().len())
            .field("mutation_calls", &self.inner.mutation_calls.lock().len())
            .field("held", &!*self.inner.gate.borrow())
            .finish()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch_query(&self, uri: &str) -> Result<Value, TransportError> {
        let index = {
            let mut calls = self.inner.query_calls.lock();
            calls.push(uri.to_string());
            calls.len() - 1
        };
        self.wait_for_release().await?;
        let responder = self.inner.query_responder.lock().clone();
        responder(uri, index)
    }

    async fn send_mutation(
        &self,
        endpoint: &str,
        request: MutationRequest,
    ) -> Result<Value, TransportError> {
        let index = {
            let mut calls = self.inner.mutation_calls.lock();
            calls.push((endpoint.to_string(), request));
            calls.len() - 1
        };
        self.wait_for_release().await?;
        let responder = self.inner.mutation_responder.lock().clone();
        responder(endpoint, index)
    }
}

fn empty_data() -> Responder {
    Arc::new(|_, _| Ok(json!({ "data": {} })))
}
