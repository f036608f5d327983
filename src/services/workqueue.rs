//! Keyed work queue with duplicate coalescing.
//!
//! Observations are keyed by `(namespace, name)`; at most one observation
//! per key is queued, and at most one is in flight. A key re-added while
//! its observation runs is marked dirty and re-enqueued when the worker
//! calls [`KeyedQueue::done`] — so bursts of events collapse into a single
//! re-observation and per-key processing stays serial.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Mutex;

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct QueueState<K> {
    queue: VecDeque<K>,
    queued: HashSet<K>,
    active: HashSet<K>,
    dirty: HashSet<K>,
    closed: bool,
}

/// Multi-producer, multi-worker queue of observation keys.
#[derive(Debug)]
pub struct KeyedQueue<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
}

impl<K: Eq + Hash + Clone> KeyedQueue<K> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                queued: HashSet::new(),
                active: HashSet::new(),
                dirty: HashSet::new(),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState<K>> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Enqueue a key. Duplicates of a queued key are dropped; duplicates of
    /// an in-flight key re-enqueue once the current run finishes. Adds to a
    /// closed queue are ignored.
    pub fn add(&self, key: K) {
        {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            if state.active.contains(&key) {
                state.dirty.insert(key);
                return;
            }
            if !state.queued.insert(key.clone()) {
                return;
            }
            state.queue.push_back(key);
        }
        self.notify.notify_waiters();
    }

    /// Next key to process, marking it in flight. Returns `None` once the
    /// queue is closed and drained.
    pub async fn next(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.queued.remove(&key);
                    state.active.insert(key.clone());
                    return Some(key);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Mark a key's observation finished; a dirty key goes straight back on
    /// the queue.
    pub fn done(&self, key: &K) {
        let requeued = {
            let mut state = self.lock();
            state.active.remove(key);
            if state.dirty.remove(key) && !state.closed && state.queued.insert(key.clone()) {
                state.queue.push_back(key.clone());
                true
            } else {
                false
            }
        };
        if requeued {
            self.notify.notify_waiters();
        }
    }

    /// Close the queue: pending keys drain, new adds are dropped, and idle
    /// workers wake up to exit.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn duplicate_queued_keys_coalesce() {
        let queue = KeyedQueue::new();
        queue.add("a");
        queue.add("a");
        queue.add("b");
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.next().await, Some("a"));
        assert_eq!(queue.next().await, Some("b"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn key_added_while_active_requeues_on_done() {
        let queue = KeyedQueue::new();
        queue.add("a");
        let key = queue.next().await.unwrap();

        // Event arrives while the observation is in flight.
        queue.add("a");
        assert!(queue.is_empty());

        queue.done(&key);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next().await, Some("a"));
    }

    #[tokio::test]
    async fn burst_while_active_collapses_to_one_rerun() {
        let queue = KeyedQueue::new();
        queue.add("a");
        let key = queue.next().await.unwrap();
        for _ in 0..10 {
            queue.add("a");
        }
        queue.done(&key);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn close_drains_then_signals_workers() {
        let queue = Arc::new(KeyedQueue::new());
        queue.add("a");
        queue.close();
        queue.add("b");

        assert_eq!(queue.next().await, Some("a"));
        assert_eq!(queue.next().await, None);
    }

    #[tokio::test]
    async fn waiting_worker_wakes_on_add() {
        let queue = Arc::new(KeyedQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.add("late");
        assert_eq!(waiter.await.unwrap(), Some("late"));
    }

    #[tokio::test]
    async fn waiting_worker_wakes_on_close() {
        let queue = Arc::new(KeyedQueue::<&str>::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();
        assert_eq!(waiter.await.unwrap(), None);
    }
}
