//! Mutation subscriptions: rules mapping a mutation's response to cache
//! invalidation and refresh actions.
//!
//! A subscription is a list of [`SubscriptionSpec`]s. After a mutation runs,
//! each spec whose [`MatchSpec`] matches one of the top-level keys of the
//! response payload has its callback invoked with a [`MutationContext`].
//!
//! # Example
//!
//! ```rust,ignore
//! use booklist_query::client::{MatchSpec, SubscriptionSpec};
//!
//! // Clear the subjects cache whenever any subject mutation runs.
//! let spec = SubscriptionSpec::new(
//!     MatchSpec::pattern(r"^(update|delete)Subject")?,
//!     |ctx, _resp, _vars| {
//!         if let Some(target) = &ctx.target {
//!             target.cache().clear();
//!         }
//!         ctx.refresh_active_queries(SUBJECTS_QUERY);
//!     },
//! );
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Weak};

use regex::Regex;
use serde_json::Value;

use super::cache::ResultCache;
use super::endpoint::Endpoint;
use super::key::Variables;
use super::suspense::Scheduler;

/// Which mutation response keys a spec reacts to.
#[derive(Clone)]
pub enum MatchSpec {
    /// The key is present in the response.
    Exact(String),
    /// Any of the keys is present in the response.
    AnyOf(BTreeSet<String>),
    /// Some response key matches the pattern.
    Pattern(Regex),
    /// Some response key satisfies the predicate.
    Predicate(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl MatchSpec {
    pub fn any_of<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::AnyOf(keys.into_iter().map(Into::into).collect())
    }

    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Self::Pattern)
    }

    pub fn predicate(f: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self::Predicate(Arc::new(f))
    }

    pub fn matches_key(&self, key: &str) -> bool {
        match self {
            Self::Exact(expected) => expected == key,
            Self::AnyOf(expected) => expected.contains(key),
            Self::Pattern(re) => re.is_match(key),
            Self::Predicate(f) => f(key),
        }
    }

    /// Returns `true` if any of `keys` matches.
    pub fn matches<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> bool {
        keys.into_iter().any(|key| self.matches_key(key))
    }
}

impl fmt::Debug for MatchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(key) => f.debug_tuple("Exact").field(key).finish(),
            Self::AnyOf(keys) => f.debug_tuple("AnyOf").field(keys).finish(),
            Self::Pattern(re) => f.debug_tuple("Pattern").field(&re.as_str()).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl From<&str> for MatchSpec {
    fn from(key: &str) -> Self {
        Self::Exact(key.to_string())
    }
}

impl From<String> for MatchSpec {
    fn from(key: String) -> Self {
        Self::Exact(key)
    }
}

impl From<Regex> for MatchSpec {
    fn from(re: Regex) -> Self {
        Self::Pattern(re)
    }
}

/// Controls a subscribing query exposes to mutation callbacks.
pub trait MutationTarget: Send + Sync {
    /// The cache backing the subscribing query.
    fn cache(&self) -> Arc<ResultCache>;

    /// Clears the cache and shows `new_results` without refetching.
    fn soft_reset(&self, new_results: Value);

    /// Clears the cache and refetches, optionally through `scheduler`.
    fn hard_reset(&self, scheduler: Option<Scheduler>);

    /// Re-reads the current key, fetching it if missing.
    fn refresh(&self);
}

/// What a matching spec's callback receives.
pub struct MutationContext<'a> {
    /// The subscriber's current data, if it supplied a reader.
    pub current_results: Option<Value>,
    /// The subscribing query, if it is still alive.
    pub target: Option<Arc<dyn MutationTarget>>,
    endpoint: &'a Endpoint,
}

impl<'a> MutationContext<'a> {
    pub(crate) const fn new(
        current_results: Option<Value>,
        target: Option<Arc<dyn MutationTarget>>,
        endpoint: &'a Endpoint,
    ) -> Self {
        Self {
            current_results,
            target,
            endpoint,
        }
    }

    /// Re-runs every active query bound to `query` text.
    pub fn refresh_active_queries(&self, query: &str) {
        self.endpoint.force_update(query);
    }
}

impl fmt::Debug for MutationContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationContext")
            .field("current_results", &self.current_results)
            .field("has_target", &self.target.is_some())
            .finish_non_exhaustive()
    }
}

pub type MutationCallback =
    Arc<dyn Fn(&MutationContext<'_>, &Value, Option<&Variables>) + Send + Sync>;

/// One rule of a mutation subscription.
#[derive(Clone)]
pub struct SubscriptionSpec {
    pub when: MatchSpec,
    pub run: MutationCallback,
}

impl SubscriptionSpec {
    pub fn new<F>(when: impl Into<MatchSpec>, run: F) -> Self
    where
        F: Fn(&MutationContext<'_>, &Value, Option<&Variables>) + Send + Sync + 'static,
    {
        Self {
            when: when.into(),
            run: Arc::new(run),
        }
    }
}

impl fmt::Debug for SubscriptionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionSpec")
            .field("when", &self.when)
            .finish_non_exhaustive()
    }
}

/// Options registered alongside a subscription's specs.
#[derive(Clone, Default)]
pub struct SubscriptionOptions {
    pub target: Option<Weak<dyn MutationTarget>>,
    pub current_results: Option<Arc<dyn Fn() -> Option<Value> + Send + Sync>>,
    /// When present and returning `false`, the subscription is skipped.
    pub is_active: Option<Arc<dyn Fn() -> bool + Send + Sync>>,
}

impl SubscriptionOptions {
    pub(crate) fn is_active(&self) -> bool {
        self.is_active.as_ref().is_none_or(|f| f())
    }

    pub(crate) fn context<'a>(&self, endpoint: &'a Endpoint) -> MutationContext<'a> {
        MutationContext::new(
            self.current_results.as_ref().and_then(|f| f()),
            self.target.as_ref().and_then(Weak::upgrade),
            endpoint,
        )
    }
}

pub(crate) struct MutationSubscription {
    pub specs: Vec<SubscriptionSpec>,
    pub options: SubscriptionOptions,
}
