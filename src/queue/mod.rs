//! Rate-limited, deduplicating work queue
//!
//! Many producers may `add` concurrently; a single consumer `get`s items and
//! reports them `done`. An item is never handed out twice at the same time:
//! adding an item that is already queued is a no-op, and adding one that is
//! being processed defers it until `done`.

mod rate_limiter;

pub use rate_limiter::{Bucket, ItemExponentialFailure, RateLimiter};

use std::collections::{HashSet, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::trace;

#[derive(Debug)]
struct State<T> {
    queue: VecDeque<T>,
    dirty: HashSet<T>,
    processing: HashSet<T>,
    shutting_down: bool,
}

#[derive(Debug)]
struct Inner<T> {
    state: Mutex<State<T>>,
    limiter: Mutex<RateLimiter<T>>,
    ready: Notify,
    idle: Notify,
}

/// Handle to a shared work queue. Clones refer to the same queue.
#[derive(Debug)]
pub struct WorkQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

// A poisoned lock only means another thread panicked mid-update of plain
// collections; the data is still usable.
fn lock<S>(m: &Mutex<S>) -> MutexGuard<'_, S> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<T> WorkQueue<T>
where
    T: Clone + Eq + Hash + Debug + Send + 'static,
{
    pub fn new(limiter: RateLimiter<T>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    shutting_down: false,
                }),
                limiter: Mutex::new(limiter),
                ready: Notify::new(),
                idle: Notify::new(),
            }),
        }
    }

    /// Queue `item` unless an equal item is already waiting.
    pub fn add(&self, item: T) {
        {
            let mut state = lock(&self.inner.state);
            if state.shutting_down || state.dirty.contains(&item) {
                return;
            }
            state.dirty.insert(item.clone());
            if state.processing.contains(&item) {
                trace!(?item, "item in flight, deferring");
                return;
            }
            state.queue.push_back(item);
        }
        self.inner.ready.notify_waiters();
    }

    /// Wait for the next item. Returns `None` once the queue is shut down and empty.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.inner.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = lock(&self.inner.state);
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    return Some(item);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Mark `item` as processed, re-queueing it if it was added in the meantime.
    pub fn done(&self, item: &T) {
        let (requeued, idle) = {
            let mut state = lock(&self.inner.state);
            state.processing.remove(item);
            let requeued = state.dirty.contains(item);
            if requeued {
                state.queue.push_back(item.clone());
            }
            (requeued, state.processing.is_empty())
        };

        if requeued {
            self.inner.ready.notify_waiters();
        }
        if idle {
            self.inner.idle.notify_waiters();
        }
    }

    /// Queue `item` again after the rate limiter's delay for it.
    pub fn add_rate_limited(&self, item: T) {
        if self.is_shutting_down() {
            return;
        }

        let delay = lock(&self.inner.limiter).when(&item);
        if delay.is_zero() {
            self.add(item);
            return;
        }

        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(item);
        });
    }

    /// Number of times `item` went through `add_rate_limited` since it was last forgotten.
    pub fn num_requeues(&self, item: &T) -> u32 {
        lock(&self.inner.limiter).num_requeues(item)
    }

    /// Reset the retry accounting of `item`.
    pub fn forget(&self, item: &T) {
        lock(&self.inner.limiter).forget(item);
    }

    /// Number of items waiting to be handed out.
    pub fn len(&self) -> usize {
        lock(&self.inner.state).queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_shutting_down(&self) -> bool {
        lock(&self.inner.state).shutting_down
    }

    /// Stop accepting items. Items already queued are still handed out.
    pub fn shut_down(&self) {
        lock(&self.inner.state).shutting_down = true;
        self.inner.ready.notify_waiters();
    }

    /// Stop accepting items and wait until no item is being processed.
    pub async fn shut_down_with_drain(&self) {
        self.shut_down();
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if lock(&self.inner.state).processing.is_empty() {
                return;
            }
            notified.await;
        }
    }
}
