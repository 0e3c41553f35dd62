//! The render-facing surface of a query.
//!
//! A [`QueryBinding`] is what a component holds: it is called on every render
//! with the query and variables the component currently wants, and it only
//! touches the coordinator when those actually changed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use super::endpoint::EndpointHandle;
use super::key::{CacheKey, Variables};
use super::query::{QueryCoordinator, QueryOptions, QuerySnapshot};
use super::suspense::Suspended;

type Synced = Arc<Mutex<Option<(bool, Option<CacheKey>)>>>;

/// Binds one [`QueryCoordinator`] to a render loop.
///
/// ```rust,ignore
/// let books = QueryBinding::new(endpoint.clone(), BOOKS_QUERY, QueryOptions::default().suspense(true));
///
/// loop {
///     match books.render(BOOKS_QUERY, Some(&variables)) {
///         Ok(snapshot) => break draw(snapshot),
///         Err(suspended) => suspended.await,
///     }
/// }
/// ```
#[derive(Debug)]
pub struct QueryBinding {
    endpoint: EndpointHandle,
    coordinator: Arc<QueryCoordinator>,
    active: AtomicBool,
    synced: Synced,
}

impl QueryBinding {
    pub fn new(endpoint: EndpointHandle, query: &str, options: QueryOptions) -> Self {
        let active = options.active;
        let coordinator = QueryCoordinator::new(endpoint.clone(), query, options);
        let synced = Synced::default();

        let forget = synced.clone();
        let weak = Arc::downgrade(&coordinator);
        coordinator.set_resync_hook(move || {
            *forget.lock() = None;
            weak.upgrade().map_or(Ok(()), |coordinator| coordinator.refresh())
        });

        Self {
            endpoint,
            coordinator,
            active: AtomicBool::new(active),
            synced,
        }
    }

    /// The coordinator behind this binding, for its controls
    /// (`reload`, `soft_reset`, `hard_reset` and friends).
    pub fn coordinator(&self) -> &Arc<QueryCoordinator> {
        &self.coordinator
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Takes effect on the next [`render`](Self::render).
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    /// Returns the snapshot for `query` with `variables`.
    ///
    /// The coordinator is synced only when the key or the active flag differs
    /// from the previous render. While an active, suspending coordinator is
    /// still waiting, every render returns the same [`Suspended`] handle.
    pub fn render(
        &self,
        query: &str,
        variables: Option<&Variables>,
    ) -> Result<QuerySnapshot, Suspended> {
        let active = self.is_active();
        let key = (!query.is_empty()).then(|| self.endpoint.resolve_cache_key(query, variables));
        let wanted = Some((active, key));

        let changed = {
            let mut synced = self.synced.lock();
            let changed = *synced != wanted;
            *synced = wanted;
            changed
        };

        if changed {
            self.coordinator.sync(query, variables, active)?;
        }
        match self.coordinator.suspended() {
            Some(suspended) if active => Err(suspended),
            _ => Ok(self.coordinator.snapshot()),
        }
    }

    /// Disposes the coordinator; later renders return the last snapshot.
    pub fn unmount(&self) {
        self.coordinator.dispose();
    }
}
