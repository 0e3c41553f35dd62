//! Prelude module for convenient imports.
//!
//! ```
//! use booklist_query::prelude::*;
//! ```
//!
//! # What's included
//!
//! - [`Endpoint`] and [`ClientConfig`] - The data source and its configuration
//! - [`QueryBinding`], [`QueryOptions`] and [`QuerySnapshot`] - For rendering queries
//! - [`MutationCoordinator`] - For running mutations
//! - [`SubscriptionSpec`] and [`MatchSpec`] - For reacting to mutations
//! - [`Suspended`] - The suspension signal
//! - [`Variables`] - Query variables

pub use crate::client::{
    ClientConfig, Endpoint, MatchSpec, MutationCoordinator, QueryBinding, QueryOptions,
    QuerySnapshot, SubscriptionSpec, Suspended, Variables,
};
