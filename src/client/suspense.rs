//! Cooperative suspension.
//!
//! A coordinator running in suspending mode does not report "loading" when
//! its data is not ready. It returns [`Suspended`] instead: a cloneable future
//! that resolves once the coordinator has re-read the cache. The caller (a
//! render loop, a test, any cooperative scheduler) awaits it and then resumes
//! the computation that asked for the data.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

static NEXT_SUSPENSION_ID: AtomicU64 = AtomicU64::new(1);

/// Signal that a query is waiting on an in-flight request.
///
/// Returned as the `Err` side of coordinator operations. Re-entering a
/// coordinator that is still waiting yields the same handle, so callers can
/// compare handles with `==` to detect that nothing new was issued.
#[derive(Clone)]
pub struct Suspended {
    id: u64,
    future: Shared<BoxFuture<'static, ()>>,
}

impl Suspended {
    pub(crate) fn new(future: impl Future<Output = ()> + Send + 'static) -> Self {
        Self {
            id: NEXT_SUSPENSION_ID.fetch_add(1, Ordering::Relaxed),
            future: future.boxed().shared(),
        }
    }

    /// Returns `true` once the awaited request has settled and the coordinator
    /// has re-read it.
    pub fn is_ready(&self) -> bool {
        self.future.peek().is_some()
    }
}

impl Future for Suspended {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.future.poll_unpin(cx)
    }
}

impl PartialEq for Suspended {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Suspended {}

impl fmt::Debug for Suspended {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suspended").field("id", &self.id).finish()
    }
}

impl fmt::Display for Suspended {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("query is waiting on an in-flight request")
    }
}

impl std::error::Error for Suspended {}

/// A unit of deferred work handed to a [`Scheduler`].
pub type Task = Box<dyn FnOnce() + Send>;

/// Decides when a hard reset's refetch runs.
///
/// Callers that want to keep urgent work responsive pass a scheduler that
/// defers, batches or drops refreshes; the default runs them immediately.
#[derive(Clone)]
pub struct Scheduler(Arc<dyn Fn(Task) + Send + Sync>);

impl Scheduler {
    pub fn new(f: impl Fn(Task) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Runs tasks inline.
    pub fn immediate() -> Self {
        Self::new(|task| task())
    }

    /// Runs tasks on the current Tokio runtime after yielding once.
    ///
    /// Must be used from within a Tokio runtime.
    pub fn deferred() -> Self {
        Self::new(|task| {
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                task();
            });
        })
    }

    pub fn schedule(&self, task: Task) {
        (self.0)(task);
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::immediate()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Scheduler(..)")
    }
}
