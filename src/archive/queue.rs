//! Shared FIFO handed to the archive workers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;

/// Result of one dequeue attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum Pop<T> {
    Item(T),
    /// Nothing arrived within the timeout, but more items may follow.
    Empty,
    /// The queue is empty and closed.
    Drained,
}

/// Multi-consumer FIFO with a `no_more` flag.
///
/// Producers [`extend`](Self::extend), then [`close`](Self::close); consumers pop until
/// [`Pop::Drained`].
#[derive(Debug)]
pub struct WorkQueue<T> {
    items: Mutex<VecDeque<T>>,
    no_more: AtomicBool,
    notify: Notify,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueue<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            no_more: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn extend(&self, items: impl IntoIterator<Item = T>) {
        self.lock().extend(items);
        self.notify.notify_waiters();
    }

    /// Marks that no more items will be added.
    pub fn close(&self) {
        self.no_more.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.no_more.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Takes the oldest item, waiting up to `timeout` for one to arrive.
    pub async fn pop(&self, timeout: Duration) -> Pop<T> {
        if let Some(item) = self.try_pop() {
            return item;
        }
        // A wakeup missed between the check and the wait only costs one timeout.
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
        self.try_pop().unwrap_or(Pop::Empty)
    }

    fn try_pop(&self) -> Option<Pop<T>> {
        let mut items = self.lock();
        match items.pop_front() {
            Some(item) => Some(Pop::Item(item)),
            None if self.is_closed() => Some(Pop::Drained),
            None => None,
        }
    }
}
