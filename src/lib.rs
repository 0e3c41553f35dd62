//! # booklist-query - cached GraphQL data fetching
//!
//! `booklist-query` is the data layer of a book-cataloging front end. It caches
//! query results per resolved request, drives the lifecycle of each query
//! binding, runs mutations, and propagates mutation results to the queries
//! that depend on them.
//!
//! ## Architecture
//!
//! 1. **Endpoint**: one data source; owns a result cache per query text and the
//!    mutation and force-refresh registries
//! 2. **ResultCache**: a bounded LRU map from resolved request to a pending or
//!    settled result
//! 3. **QueryCoordinator**: decides per render whether to serve from cache,
//!    wait on an in-flight request, or issue one
//! 4. **MutationCoordinator**: runs a mutation and fans its response out to
//!    matching subscriptions
//! 5. **Transport**: the caller-supplied request executor
//!
//! ## Core Components
//!
//! - [`Endpoint`](client::Endpoint): Shared per data source, passed explicitly
//! - [`QueryBinding`](client::QueryBinding): What a component renders from
//! - [`QueryCoordinator`](client::QueryCoordinator): The query state machine
//! - [`MutationCoordinator`](client::MutationCoordinator): Runs mutations
//! - [`Transport`](client::Transport): Executes requests
//!
//! ## Example
//!
//! ```
//! use booklist_query::prelude::*;
//! use booklist_query::mock::MockTransport;
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! const BOOKS: &str = "query Books { allBooks { title } }";
//!
//! let transport = MockTransport::new()
//!     .with_query_response(json!({ "data": { "allBooks": [{ "title": "Dune" }] } }));
//! let endpoint = Endpoint::new(ClientConfig::new("/graphql"), transport);
//!
//! let books = QueryBinding::new(endpoint.clone(), BOOKS, QueryOptions::default().suspense(true));
//! let snapshot = loop {
//!     match books.render(BOOKS, None) {
//!         Ok(snapshot) => break snapshot,
//!         Err(suspended) => suspended.await,
//!     }
//! };
//!
//! assert_eq!(snapshot.data, Some(json!({ "allBooks": [{ "title": "Dune" }] })));
//! # }
//! ```

pub mod client;
pub mod mock;
pub mod prelude;
