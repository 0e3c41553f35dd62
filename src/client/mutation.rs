//! Mutation execution.
//!
//! This module provides the [`MutationCoordinator`], the per-binding driver for
//! one mutation text.
//!
//! # Design Pattern: Transaction-based Operations
//!
//! Mutations are one-off operations with a clear start and end. Unlike
//! queries they keep no cache. A successful mutation is routed through
//! [`Endpoint::process_mutation`](super::Endpoint::process_mutation), which
//! notifies every matching mutation subscription so dependent queries can
//! clear or refresh their caches before the caller sees the response.
//!
//! # Example
//!
//! ```rust,ignore
//! use booklist_query::client::MutationCoordinator;
//!
//! let update_book = MutationCoordinator::new(endpoint.clone(), UPDATE_BOOK);
//! let mut state = update_book.subscribe();
//!
//! match update_book.run_mutation(Some(variables)).await {
//!     Ok(resp) => show_saved(resp),
//!     Err(e) => show_error(e.to_string()),
//! }
//! assert!(state.borrow_and_update().finished);
//! ```

use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

use super::endpoint::EndpointHandle;
use super::key::Variables;
use super::transport::TransportError;

/// Error type for mutation operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MutationError {
    #[error("transport failed: {0}")]
    Transport(#[from] TransportError),

    #[error("mutation returned errors: {0}")]
    Response(Value),

    #[error("mutation response had no data field")]
    MissingData,
}

/// The state of a mutation binding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationSnapshot {
    /// A run is in progress.
    pub running: bool,
    /// At least one run has completed.
    pub finished: bool,
}

impl MutationSnapshot {
    const RUNNING: Self = Self {
        running: true,
        finished: false,
    };

    const FINISHED: Self = Self {
        running: false,
        finished: true,
    };
}

/// Runs one mutation text and tracks whether it is running.
#[derive(Debug)]
pub struct MutationCoordinator {
    endpoint: EndpointHandle,
    mutation: String,
    state: watch::Sender<MutationSnapshot>,
}

impl MutationCoordinator {
    pub fn new(endpoint: EndpointHandle, mutation: impl Into<String>) -> Self {
        let (state, _) = watch::channel(MutationSnapshot::default());
        Self {
            endpoint,
            mutation: mutation.into(),
            state,
        }
    }

    pub fn mutation(&self) -> &str {
        &self.mutation
    }

    pub fn snapshot(&self) -> MutationSnapshot {
        *self.state.borrow()
    }

    /// Receives every state transition.
    pub fn subscribe(&self) -> watch::Receiver<MutationSnapshot> {
        self.state.subscribe()
    }

    /// Runs the mutation with `variables`.
    ///
    /// The state is `running` until the mutation settles and `finished`
    /// afterwards, whether it succeeded or not. Errors are returned as-is;
    /// nothing is retried.
    pub async fn run_mutation(&self, variables: Option<Variables>) -> Result<Value, MutationError> {
        self.state.send_replace(MutationSnapshot::RUNNING);
        let result = self
            .endpoint
            .process_mutation(&self.mutation, variables.as_ref())
            .await;
        self.state.send_replace(MutationSnapshot::FINISHED);

        if let Err(e) = &result {
            debug!(mutation = %self.mutation, error = %e, "mutation failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientConfig, Endpoint};
    use crate::mock::MockTransport;
    use serde_json::json;

    fn coordinator(transport: MockTransport) -> MutationCoordinator {
        let endpoint = Endpoint::new(ClientConfig::new("/graphql"), transport);
        MutationCoordinator::new(endpoint, "mutation { updateBook { _id } }")
    }

    #[test]
    fn test_initial_snapshot() {
        let coordinator = coordinator(MockTransport::new());
        assert_eq!(coordinator.snapshot(), MutationSnapshot::default());
        assert!(!coordinator.snapshot().running);
        assert!(!coordinator.snapshot().finished);
    }

    #[tokio::test]
    async fn test_running_then_finished() {
        let transport = MockTransport::new().with_mutation_response(json!({ "data": { "updateBook": { "_id": "b1" } } }));
        transport.hold();
        let coordinator = coordinator(transport.clone());

        let (result, ()) = tokio::join!(coordinator.run_mutation(None), async {
            tokio::task::yield_now().await;
            assert_eq!(coordinator.snapshot(), MutationSnapshot::RUNNING);
            transport.release();
        });

        assert_eq!(result, Ok(json!({ "updateBook": { "_id": "b1" } })));
        assert_eq!(coordinator.snapshot(), MutationSnapshot::FINISHED);
    }

    #[tokio::test]
    async fn test_failure_propagates_and_finishes() {
        let transport = MockTransport::new();
        transport.fail_mutations(TransportError::Other("offline".into()));
        let coordinator = coordinator(transport.clone());
        let mut state = coordinator.subscribe();

        let err = coordinator
            .run_mutation(None)
            .await
            .expect_err("transport failure should propagate");
        assert_eq!(err, MutationError::Transport(TransportError::Other("offline".into())));
        assert!(state.borrow_and_update().finished);
        assert_eq!(transport.mutation_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_variables_are_sent() {
        let transport = MockTransport::new().with_mutation_response(json!({ "data": { "updateBook": null } }));
        let coordinator = coordinator(transport.clone());

        let mut variables = Variables::new();
        variables.insert("_id".into(), json!("b1"));
        let result = coordinator.run_mutation(Some(variables)).await;

        assert_eq!(result, Ok(json!({ "updateBook": null })));
        let calls = transport.mutation_calls();
        assert_eq!(calls[0].1.body["variables"], json!({ "_id": "b1" }));
    }
}
