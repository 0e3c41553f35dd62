//! The endpoint: one logical data source and everything shared across the
//! queries and mutations that talk to it.
//!
//! An [`Endpoint`] owns
//!
//! - one [`ResultCache`] per distinct query text,
//! - the registry of mutation subscriptions used for cache invalidation,
//! - the registry of force-refresh callbacks used to push-refresh active
//!   queries after a mutation.
//!
//! It is created once per data source and passed explicitly, as an
//! [`EndpointHandle`], to every coordinator that uses it.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::cache::{CacheLookup, PendingId, PendingResult, ResultCache};
use super::config::ClientConfig;
use super::key::{CacheKey, Variables};
use super::mutation::MutationError;
use super::result::QueryResult;
use super::subscription::{MutationSubscription, SubscriptionOptions, SubscriptionSpec};
use super::transport::{MutationRequest, Transport};

/// Shared handle to an [`Endpoint`].
pub type EndpointHandle = Arc<Endpoint>;

type RefreshCallback = Arc<dyn Fn() + Send + Sync>;

/// State of a key after [`Endpoint::preload`].
#[derive(Debug, Clone, PartialEq)]
pub enum Preloaded {
    Pending(PendingResult),
    Settled(QueryResult),
}

/// A client for one data source.
///
/// # Example
///
/// ```rust,ignore
/// use booklist_query::client::{ClientConfig, Endpoint, HttpTransport};
///
/// let endpoint = Endpoint::new(
///     ClientConfig::new("https://books.example.com/graphql").with_cache_size(20),
///     HttpTransport::default(),
/// );
///
/// // Warm the cache before the screen that needs it is shown.
/// endpoint.preload(BOOKS_QUERY, Some(&variables));
/// ```
pub struct Endpoint {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    caches: DashMap<String, Arc<ResultCache>>,
    mutation_listeners: Mutex<IndexMap<u64, Arc<MutationSubscription>>>,
    force_listeners: Mutex<HashMap<String, IndexMap<u64, RefreshCallback>>>,
    next_registration: AtomicU64,
    this: Weak<Endpoint>,
}

impl Endpoint {
    /// Creates an endpoint sending requests through `transport`.
    pub fn new(config: ClientConfig, transport: impl Transport + 'static) -> EndpointHandle {
        Self::with_transport(config, Arc::new(transport))
    }

    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> EndpointHandle {
        Arc::new_cyclic(|this| Self {
            config,
            transport,
            caches: DashMap::new(),
            mutation_listeners: Mutex::new(IndexMap::new()),
            force_listeners: Mutex::new(HashMap::new()),
            next_registration: AtomicU64::new(1),
            this: this.clone(),
        })
    }

    /// Creates an endpoint over HTTP with a default `reqwest` client.
    #[cfg(feature = "http")]
    pub fn http(config: ClientConfig) -> EndpointHandle {
        Self::new(config, super::transport::HttpTransport::default())
    }

    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The cache for `query`, if one was created.
    pub fn get_cache(&self, query: &str) -> Option<Arc<ResultCache>> {
        self.caches.get(query).map(|cache| cache.value().clone())
    }

    /// The cache for `query`, created with the configured capacity on first use.
    pub fn get_or_create_cache(&self, query: &str) -> Arc<ResultCache> {
        if let Some(cache) = self.get_cache(query) {
            return cache;
        }
        self.caches
            .entry(query.to_string())
            .or_insert_with(|| Arc::new(ResultCache::new(self.config.cache_size_to_use())))
            .value()
            .clone()
    }

    pub fn resolve_cache_key(&self, query: &str, variables: Option<&Variables>) -> CacheKey {
        CacheKey::resolve(&self.config.endpoint, query, variables)
    }

    /// Makes sure `query` with `variables` is loaded or loading.
    ///
    /// Returns the existing entry if there is one; otherwise issues the request.
    ///
    /// # Panics
    ///
    /// Panics if a request has to be issued outside a Tokio runtime; see
    /// [`execute`](Self::execute).
    pub fn preload(&self, query: &str, variables: Option<&Variables>) -> Preloaded {
        let cache = self.get_or_create_cache(query);
        let key = self.resolve_cache_key(query, variables);
        cache.get_from_cache(
            &key,
            Preloaded::Pending,
            Preloaded::Settled,
            || Preloaded::Pending(self.execute(&cache, &key)),
        )
    }

    /// Issues the request for `key` and records it as pending in `cache`.
    ///
    /// The request is driven on the Tokio runtime whether or not anyone awaits
    /// the returned handle. Its result is written back to `cache` before any
    /// awaiter is woken, unless the key was cleared or re-requested meanwhile.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime, since the request is spawned
    /// onto it.
    pub fn execute(&self, cache: &Arc<ResultCache>, key: &CacheKey) -> PendingResult {
        let id = PendingId::next();
        let transport = self.transport.clone();
        let weak_cache = Arc::downgrade(cache);
        let request_key = key.clone();

        debug!(%key, ?id, "issuing query");
        let pending = PendingResult::new(id, async move {
            let outcome = transport.fetch_query(request_key.as_str()).await;
            let result = QueryResult::from_response(outcome);
            if let Some(error) = &result.error {
                warn!(key = %request_key, %error, "query settled with an error");
            }
            if let Some(cache) = weak_cache.upgrade() {
                cache.set_results(id, &request_key, result.clone());
            }
            result
        });

        cache.set_pending_result(key.clone(), pending.clone());
        tokio::spawn(pending.clone());
        pending
    }

    /// Fetches `query` without consulting or filling any cache.
    pub async fn run_query(&self, query: &str, variables: Option<&Variables>) -> QueryResult {
        let key = self.resolve_cache_key(query, variables);
        QueryResult::from_response(self.transport.fetch_query(key.as_str()).await)
    }

    /// Registers a mutation subscription until the returned registration is
    /// unregistered.
    pub fn subscribe_mutation(
        &self,
        specs: Vec<SubscriptionSpec>,
        options: SubscriptionOptions,
    ) -> Registration {
        let id = self.next_registration.fetch_add(1, Ordering::Relaxed);
        self.mutation_listeners
            .lock()
            .insert(id, Arc::new(MutationSubscription { specs, options }));
        debug!(id, "mutation subscription registered");
        Registration {
            endpoint: self.this.clone(),
            kind: RegistrationKind::Mutation(id),
        }
    }

    /// Registers `refresh` to run whenever [`force_update`](Self::force_update)
    /// is called for `query`.
    pub fn register_query(
        &self,
        query: &str,
        refresh: impl Fn() + Send + Sync + 'static,
    ) -> Registration {
        let id = self.next_registration.fetch_add(1, Ordering::Relaxed);
        self.force_listeners
            .lock()
            .entry(query.to_string())
            .or_default()
            .insert(id, Arc::new(refresh));
        Registration {
            endpoint: self.this.clone(),
            kind: RegistrationKind::Query {
                query: query.to_string(),
                id,
            },
        }
    }

    /// Runs every refresh callback registered for `query`.
    pub fn force_update(&self, query: &str) {
        let callbacks: Vec<RefreshCallback> = self
            .force_listeners
            .lock()
            .get(query)
            .map(|listeners| listeners.values().cloned().collect())
            .unwrap_or_default();

        debug!(listeners = callbacks.len(), "forcing refresh of active queries");
        for refresh in callbacks {
            refresh();
        }
    }

    /// Sends a mutation and returns the `data` field of its response.
    pub async fn run_mutation(
        &self,
        mutation: &str,
        variables: Option<&Variables>,
    ) -> Result<Value, MutationError> {
        let mut headers = BTreeMap::from([
            ("Accept".to_string(), "application/json".to_string()),
            ("Content-Type".to_string(), "application/json".to_string()),
        ]);
        headers.extend(self.config.fetch_options.headers.clone());

        let request = MutationRequest {
            method: "POST",
            headers,
            body: json!({ "query": mutation, "variables": variables }),
        };

        let mut payload = self
            .transport
            .send_mutation(&self.config.endpoint, request)
            .await?;

        match payload.get("errors") {
            Some(errors) if !errors.is_null() => return Err(MutationError::Response(errors.clone())),
            _ => {}
        }
        payload
            .get_mut("data")
            .map(Value::take)
            .ok_or(MutationError::MissingData)
    }

    /// Runs a mutation, then notifies every matching subscription.
    ///
    /// All callbacks, including the force-refreshes they trigger, have run by
    /// the time this resolves.
    pub async fn process_mutation(
        &self,
        mutation: &str,
        variables: Option<&Variables>,
    ) -> Result<Value, MutationError> {
        let response = self.run_mutation(mutation, variables).await?;

        let keys: Vec<&str> = response
            .as_object()
            .map(|data| data.keys().map(String::as_str).collect())
            .unwrap_or_default();
        let listeners: Vec<Arc<MutationSubscription>> =
            self.mutation_listeners.lock().values().cloned().collect();

        let mut notified = 0usize;
        for subscription in &listeners {
            for spec in &subscription.specs {
                if !subscription.options.is_active() {
                    continue;
                }
                if spec.when.matches(keys.iter().copied()) {
                    let ctx = subscription.options.context(self);
                    (spec.run)(&ctx, &response, variables);
                    notified += 1;
                }
            }
        }
        debug!(?keys, notified, "mutation processed");

        Ok(response)
    }

    fn unregister(&self, kind: &RegistrationKind) -> bool {
        match kind {
            RegistrationKind::Mutation(id) => self.mutation_listeners.lock().shift_remove(id).is_some(),
            RegistrationKind::Query { query, id } => {
                let mut listeners = self.force_listeners.lock();
                let Some(callbacks) = listeners.get_mut(query) else {
                    return false;
                };
                let removed = callbacks.shift_remove(id).is_some();
                if callbacks.is_empty() {
                    listeners.remove(query);
                }
                removed
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn listener_counts(&self, query: &str) -> (usize, usize) {
        let mutations = self.mutation_listeners.lock().len();
        let refreshes = self
            .force_listeners
            .lock()
            .get(query)
            .map_or(0, IndexMap::len);
        (mutations, refreshes)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("config", &self.config)
            .field("caches", &self.caches.len())
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
enum RegistrationKind {
    Mutation(u64),
    Query { query: String, id: u64 },
}

/// A listener registered with an [`Endpoint`].
///
/// Dropping a registration leaves the listener in place; call
/// [`unregister`](Self::unregister) to remove it.
#[derive(Debug)]
#[must_use = "the listener stays registered until `unregister` is called"]
pub struct Registration {
    endpoint: Weak<Endpoint>,
    kind: RegistrationKind,
}

impl Registration {
    /// Removes the listener. Returns `false` if it was already gone.
    pub fn unregister(self) -> bool {
        self.endpoint
            .upgrade()
            .is_some_and(|endpoint| endpoint.unregister(&self.kind))
    }
}
