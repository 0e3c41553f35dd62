//! Query coordination with caching, de-duplication and suspension.
//!
//! This module provides the [`QueryCoordinator`], the state machine behind one
//! query binding. It decides whether a request can be served from the cache,
//! must wait on a request already in flight, or has to be issued.
//!
//! # Design Pattern: Cache-first State Machine
//!
//! A coordinator is bound to a query text and follows the variables it is
//! synced with:
//!
//! 1. If the resolved key has a settled result, it is published immediately
//! 2. If the key is already in flight, the coordinator waits on that request
//!    instead of issuing another one
//! 3. If the key is missing, the request is issued and recorded as pending
//! 4. When a mutation or a force-refresh asks for it, the key is re-read
//!
//! Every change is published as a [`QuerySnapshot`] on a `watch` channel.
//!
//! # Suspension
//!
//! A coordinator created with [`QueryOptions::suspense`] does not publish a
//! loading state while it waits. Its operations return `Err(Suspended)`, a
//! future the caller awaits before asking again.
//!
//! # Example
//!
//! ```rust,ignore
//! use booklist_query::client::{QueryCoordinator, QueryOptions, SubscriptionSpec};
//!
//! let books = QueryCoordinator::new(
//!     endpoint.clone(),
//!     BOOKS_QUERY,
//!     QueryOptions::default().on_mutation(SubscriptionSpec::new("updateBook", |ctx, _, _| {
//!         if let Some(target) = &ctx.target {
//!             target.hard_reset(None);
//!         }
//!     })),
//! );
//!
//! let mut snapshots = books.subscribe();
//! books.sync(BOOKS_QUERY, Some(&variables), true)?;
//! let loaded = snapshots.wait_for(|s| s.loaded).await?;
//! ```

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

use super::cache::{PendingId, PendingResult, ResultCache};
use super::endpoint::{EndpointHandle, Registration};
use super::key::{CacheKey, Variables};
use super::result::{QueryError, QueryResult};
use super::subscription::{MutationTarget, SubscriptionOptions, SubscriptionSpec};
use super::suspense::{Scheduler, Suspended, Task};

/// Options recognized when creating a [`QueryCoordinator`].
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Rules run when a mutation's response matches.
    pub on_mutation: Vec<SubscriptionSpec>,
    /// Whether the binding wants the query serviced.
    pub active: bool,
    /// Never issue requests; only show what is cached or already in flight.
    pub preload_only: bool,
    /// Return [`Suspended`] instead of publishing a loading state.
    pub suspense: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            on_mutation: Vec::new(),
            active: true,
            preload_only: false,
            suspense: false,
        }
    }
}

impl QueryOptions {
    #[must_use]
    pub fn on_mutation(mut self, spec: SubscriptionSpec) -> Self {
        self.on_mutation.push(spec);
        self
    }

    #[must_use]
    pub fn active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    #[must_use]
    pub fn preload_only(mut self, preload_only: bool) -> Self {
        self.preload_only = preload_only;
        self
    }

    #[must_use]
    pub fn suspense(mut self, suspense: bool) -> Self {
        self.suspense = suspense;
        self
    }
}

/// What a query binding renders from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySnapshot {
    pub data: Option<Value>,
    pub error: Option<QueryError>,
    /// A request for the current key is in flight.
    pub loading: bool,
    /// A result has been shown at least once.
    pub loaded: bool,
    /// The key the current `data`/`error` belong to.
    pub current_query: Option<CacheKey>,
}

impl QuerySnapshot {
    pub const fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

type ResyncHook = Arc<dyn Fn() -> Result<(), Suspended> + Send + Sync>;

struct State {
    query: String,
    cache: Arc<ResultCache>,
    current_uri: Option<CacheKey>,
    active: bool,
    disposed: bool,
    suspended: Option<(PendingId, Suspended)>,
}

#[derive(Default)]
struct Registrations {
    refresh: Option<Registration>,
    mutation: Option<Registration>,
}

/// Drives one query binding.
///
/// Created with [`new`](Self::new), which registers the coordinator for
/// force-refreshes of its query text and, if [`QueryOptions::on_mutation`] is
/// set, for mutation notifications. [`dispose`](Self::dispose) (or dropping
/// the last handle) removes both registrations.
///
/// Operations that may need to wait return `Result<(), Suspended>`. In
/// non-suspending mode they always return `Ok`.
///
/// Must be used from within a Tokio runtime: waiting on a request spawns the
/// continuation that re-reads the cache once it settles.
pub struct QueryCoordinator {
    endpoint: EndpointHandle,
    preload_only: bool,
    suspense: bool,
    state: Mutex<State>,
    snapshot: watch::Sender<QuerySnapshot>,
    registrations: Mutex<Registrations>,
    resync: Mutex<Option<ResyncHook>>,
    this: Weak<QueryCoordinator>,
}

impl QueryCoordinator {
    /// Creates an inactive coordinator for `query`; call [`sync`](Self::sync)
    /// to activate it.
    pub fn new(endpoint: EndpointHandle, query: &str, options: QueryOptions) -> Arc<Self> {
        let cache = endpoint.get_or_create_cache(query);
        let (snapshot, _) = watch::channel(QuerySnapshot::default());

        let coordinator = Arc::new_cyclic(|this| Self {
            endpoint,
            preload_only: options.preload_only,
            suspense: options.suspense,
            state: Mutex::new(State {
                query: query.to_string(),
                cache,
                current_uri: None,
                active: false,
                disposed: false,
                suspended: None,
            }),
            snapshot,
            registrations: Mutex::new(Registrations::default()),
            resync: Mutex::new(None),
            this: this.clone(),
        });
        coordinator.init(query, options.on_mutation);
        coordinator
    }

    fn init(&self, query: &str, on_mutation: Vec<SubscriptionSpec>) {
        let refresh = self.register_refresh(query);
        let mutation = (!on_mutation.is_empty()).then(|| {
            let target: Weak<dyn MutationTarget> = self.this.clone();
            let results = self.this.clone();
            let active = self.this.clone();
            self.endpoint.subscribe_mutation(
                on_mutation,
                SubscriptionOptions {
                    target: Some(target),
                    current_results: Some(Arc::new(move || {
                        results.upgrade().and_then(|this| this.snapshot().data)
                    })),
                    is_active: Some(Arc::new(move || {
                        active.upgrade().is_some_and(|this| this.is_active())
                    })),
                },
            )
        });

        let mut registrations = self.registrations.lock();
        registrations.refresh = Some(refresh);
        registrations.mutation = mutation;
    }

    fn register_refresh(&self, query: &str) -> Registration {
        let weak = self.this.clone();
        self.endpoint.register_query(query, move || {
            if let Some(this) = weak.upgrade() {
                let _ = this.refresh();
            }
        })
    }

    /// The latest published snapshot.
    pub fn snapshot(&self) -> QuerySnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receives every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<QuerySnapshot> {
        self.snapshot.subscribe()
    }

    /// The cache for the current query text.
    pub fn cache(&self) -> Arc<ResultCache> {
        self.state.lock().cache.clone()
    }

    pub fn current_key(&self) -> Option<CacheKey> {
        self.state.lock().current_uri.clone()
    }

    pub fn is_active(&self) -> bool {
        let state = self.state.lock();
        state.active && !state.disposed
    }

    /// The handle returned by the last suspension, until a snapshot is
    /// published.
    pub fn suspended(&self) -> Option<Suspended> {
        self.state.lock().suspended.as_ref().map(|(_, s)| s.clone())
    }

    /// Installs the binding's resync hook used by [`reload`](Self::reload).
    pub fn set_resync_hook(&self, hook: impl Fn() -> Result<(), Suspended> + Send + Sync + 'static) {
        *self.resync.lock() = Some(Arc::new(hook));
    }

    /// Points the coordinator at `query` with `variables`.
    ///
    /// Deactivating records the flag and drops any retained suspension.
    /// Activating with an empty query
    /// clears the current key without any network activity. Otherwise the
    /// cache is re-read if the key changed or the coordinator was inactive.
    pub fn sync(
        &self,
        query: &str,
        variables: Option<&Variables>,
        active: bool,
    ) -> Result<(), Suspended> {
        let mut text_changed = false;
        {
            let mut state = self.state.lock();
            if state.disposed {
                return Ok(());
            }
            let was_active = std::mem::replace(&mut state.active, active);
            if !active {
                state.suspended = None;
                return Ok(());
            }
            if query.is_empty() {
                state.current_uri = None;
                return Ok(());
            }
            if state.query != query {
                state.query = query.to_string();
                state.cache = self.endpoint.get_or_create_cache(query);
                text_changed = true;
            }

            let key = self.endpoint.resolve_cache_key(query, variables);
            let key_changed = state.current_uri.as_ref() != Some(&key);
            if key_changed {
                debug!(%key, "query key changed");
            }
            state.current_uri = Some(key);
            if !key_changed && was_active {
                return Ok(());
            }
        }

        if text_changed {
            let refresh = self.register_refresh(query);
            let previous = self.registrations.lock().refresh.replace(refresh);
            if let Some(previous) = previous {
                previous.unregister();
            }
        }
        self.update()
    }

    /// Reads the current key from the cache and acts on its state.
    pub fn update(&self) -> Result<(), Suspended> {
        let (cache, key) = {
            let state = self.state.lock();
            match (&state.current_uri, state.disposed) {
                (Some(key), false) => (state.cache.clone(), key.clone()),
                _ => return Ok(()),
            }
        };

        cache.get_from_cache(
            &key,
            |pending| self.wait_on(pending),
            |result| {
                self.publish_result(key.clone(), result);
                Ok(())
            },
            || {
                if self.preload_only {
                    return Ok(());
                }
                let pending = self.endpoint.execute(&cache, &key);
                self.wait_on(pending)
            },
        )
    }

    /// Re-reads the current key if the binding is active.
    pub fn refresh(&self) -> Result<(), Suspended> {
        if !self.is_active() {
            return Ok(());
        }
        self.update()
    }

    /// Clears the cache and shows `new_results` without refetching.
    pub fn soft_reset(&self, new_results: Value) {
        self.cache().clear();
        self.update_state(|s| s.data = Some(new_results));
    }

    /// Clears the cache and re-reads the current key through `scheduler`,
    /// immediately if none is given. The re-read is skipped if the
    /// coordinator is no longer active when the task runs.
    pub fn hard_reset(&self, scheduler: Option<Scheduler>) {
        let weak = self.this.clone();
        let task: Task = Box::new(move || {
            if let Some(this) = weak.upgrade() {
                this.cache().clear();
                let _ = this.refresh();
            }
        });
        scheduler.unwrap_or_default().schedule(task);
    }

    /// Clears the whole cache for this query text.
    pub fn clear_cache(&self) {
        self.cache().clear();
    }

    /// Drops the current key's entry and re-reads it.
    pub fn clear_cache_and_reload(&self) -> Result<(), Suspended> {
        if !self.remove_current() {
            return Ok(());
        }
        self.refresh()
    }

    /// Drops the current key's entry and asks the binding to resync, falling
    /// back to [`refresh`](Self::refresh) when no binding hook is installed.
    pub fn reload(&self) -> Result<(), Suspended> {
        if !self.remove_current() {
            return Ok(());
        }
        let hook = self.resync.lock().clone();
        match hook {
            Some(hook) => hook(),
            None => self.refresh(),
        }
    }

    /// Removes this coordinator's listener registrations. Safe to call more
    /// than once.
    pub fn dispose(&self) {
        {
            let mut state = self.state.lock();
            state.disposed = true;
            state.suspended = None;
        }
        let registrations = std::mem::take(&mut *self.registrations.lock());
        if let Some(mutation) = registrations.mutation {
            mutation.unregister();
        }
        if let Some(refresh) = registrations.refresh {
            refresh.unregister();
        }
    }

    fn remove_current(&self) -> bool {
        let state = self.state.lock();
        match &state.current_uri {
            Some(key) => {
                state.cache.remove(key);
                true
            }
            None => false,
        }
    }

    fn wait_on(&self, pending: PendingResult) -> Result<(), Suspended> {
        let id = pending.id();
        if self.suspense {
            if let Some((waiting, suspended)) = &self.state.lock().suspended {
                if *waiting == id {
                    return Err(suspended.clone());
                }
            }
        }

        let weak = self.this.clone();
        let continuation = Suspended::new(async move {
            pending.await;
            // The cache may have been cleared meanwhile; re-reading covers both cases.
            if let Some(this) = weak.upgrade() {
                if this.is_active() {
                    let _ = this.update();
                } else {
                    this.release_suspension(id);
                }
            }
        });
        tokio::spawn(continuation.clone());

        if self.suspense {
            debug!("query suspended");
            self.state.lock().suspended = Some((id, continuation.clone()));
            Err(continuation)
        } else {
            self.update_state(|s| s.loading = true);
            Ok(())
        }
    }

    fn release_suspension(&self, id: PendingId) {
        let mut state = self.state.lock();
        if state.suspended.as_ref().is_some_and(|(waiting, _)| *waiting == id) {
            state.suspended = None;
        }
    }

    fn publish_result(&self, key: CacheKey, result: QueryResult) {
        self.update_state(|s| {
            s.data = result.data;
            s.error = result.error;
            s.loading = false;
            s.loaded = true;
            s.current_query = Some(key);
        });
    }

    fn update_state(&self, f: impl FnOnce(&mut QuerySnapshot)) {
        self.state.lock().suspended = None;
        self.snapshot.send_modify(f);
    }
}

impl MutationTarget for QueryCoordinator {
    fn cache(&self) -> Arc<ResultCache> {
        QueryCoordinator::cache(self)
    }

    fn soft_reset(&self, new_results: Value) {
        QueryCoordinator::soft_reset(self, new_results);
    }

    fn hard_reset(&self, scheduler: Option<Scheduler>) {
        QueryCoordinator::hard_reset(self, scheduler);
    }

    fn refresh(&self) {
        let _ = QueryCoordinator::refresh(self);
    }
}

impl Drop for QueryCoordinator {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for QueryCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("QueryCoordinator")
            .field("query", &state.query)
            .field("current_uri", &state.current_uri)
            .field("active", &state.active)
            .field("suspense", &self.suspense)
            .field("preload_only", &self.preload_only)
            .finish_non_exhaustive()
    }
}
