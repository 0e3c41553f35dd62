//! GraphQL query and mutation support with caching.
//!
//! This module provides cached queries and cache-invalidating mutations for the
//! booklist front end, similar to SWR or TanStack Query.
//!
//! # Features
//!
//! - **Queries**: per-binding [`QueryCoordinator`]s serving results from a
//!   bounded LRU [`ResultCache`], with at most one request in flight per key
//! - **Mutations**: [`MutationCoordinator`]s whose responses are routed to
//!   mutation subscriptions, so dependent queries can clear, reset or refresh
//! - **Suspension**: optional cooperative [`Suspended`] signalling instead of
//!   loading flags
//! - **Preloading**: [`Endpoint::preload`] warms the cache ahead of a binding
//!
//! # Example
//!
//! ```rust,ignore
//! use booklist_query::client::{ClientConfig, Endpoint, MutationCoordinator, QueryBinding, QueryOptions, SubscriptionSpec};
//!
//! let endpoint = Endpoint::http(ClientConfig::from_env()?);
//!
//! let books = QueryBinding::new(
//!     endpoint.clone(),
//!     BOOKS_QUERY,
//!     QueryOptions::default().on_mutation(SubscriptionSpec::new("updateBook", |ctx, _, _| {
//!         if let Some(target) = &ctx.target {
//!             target.hard_reset(None);
//!         }
//!     })),
//! );
//! let snapshot = books.render(BOOKS_QUERY, Some(&variables))?;
//!
//! let update_book = MutationCoordinator::new(endpoint.clone(), UPDATE_BOOK);
//! update_book.run_mutation(Some(changes)).await?;
//! // `books` has cleared its cache and is refetching.
//! ```

mod binding;
mod cache;
mod config;
mod endpoint;
mod key;
pub mod mutation;
pub mod query;
mod result;
mod subscription;
mod suspense;
mod transport;

// Re-export main types
pub use binding::QueryBinding;
pub use cache::{CacheEntry, CacheLookup, PendingId, PendingResult, ResultCache};
pub use config::{ClientConfig, ConfigError, DEFAULT_CACHE_SIZE, FetchOptions};
pub use endpoint::{Endpoint, EndpointHandle, Preloaded, Registration};
pub use key::{CacheKey, Variables, canonical_json, compress};
pub use mutation::{MutationCoordinator, MutationError, MutationSnapshot};
pub use query::{QueryCoordinator, QueryOptions, QuerySnapshot};
pub use result::{QueryError, QueryResult};
pub use subscription::{
    MatchSpec, MutationCallback, MutationContext, MutationTarget, SubscriptionOptions,
    SubscriptionSpec,
};
pub use suspense::{Scheduler, Suspended, Task};
#[cfg(feature = "http")]
pub use transport::HttpTransport;
pub use transport::{MutationRequest, Transport, TransportError};
