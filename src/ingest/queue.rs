//! Fixed-capacity hand-off between the HTTP handler and the workers.
//!
//! The producer side never waits: [`BoundedQueue::try_enqueue`] either takes
//! the item or hands it straight back. The consumer side
//! ([`BoundedQueue::dequeue`]) is shared by every worker and parks until an
//! item arrives or the queue is closed.
//!
//! Depth is mirrored into [`Counters`] on every change so `/health` can
//! report it without touching the lock.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

use crate::health::Counters;

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 500;

/// Why an item could not be enqueued. The item is handed back either way.
pub enum EnqueueError<T> {
    /// Queue is at capacity.
    Full(T),
    /// Queue has been closed for shutdown.
    Closed(T),
}

impl<T> EnqueueError<T> {
    pub fn into_inner(self) -> T {
        match self {
            EnqueueError::Full(item) | EnqueueError::Closed(item) => item,
        }
    }
}

impl<T> fmt::Debug for EnqueueError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnqueueError::Full(_) => f.write_str("Full(..)"),
            EnqueueError::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

impl<T> fmt::Display for EnqueueError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnqueueError::Full(_) => f.write_str("queue is full"),
            EnqueueError::Closed(_) => f.write_str("queue is closed"),
        }
    }
}

impl<T> std::error::Error for EnqueueError<T> {}

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// A bounded multi-consumer FIFO queue.
pub struct BoundedQueue<T> {
    inner: Mutex<Inner<T>>,
    capacity: usize,
    item_available: Notify,
    emptied: Notify,
    counters: Arc<Counters>,
}

impl<T> BoundedQueue<T> {
    /// Creates a queue holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize, counters: Arc<Counters>) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        BoundedQueue {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity,
            item_available: Notify::new(),
            emptied: Notify::new(),
            counters,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        // Nothing inside can be left half-updated by a panic, so a poisoned
        // lock is still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Adds an item without waiting.
    pub fn try_enqueue(&self, item: T) -> Result<(), EnqueueError<T>> {
        {
            let mut inner = self.lock();
            if inner.closed {
                return Err(EnqueueError::Closed(item));
            }
            if inner.items.len() >= self.capacity {
                return Err(EnqueueError::Full(item));
            }
            inner.items.push_back(item);
            self.counters.set_queue_depth(inner.items.len());
        }
        self.item_available.notify_one();
        Ok(())
    }

    /// Takes the oldest item, waiting for one if the queue is empty.
    ///
    /// Returns `None` once the queue is closed and fully drained.
    /// Cancel-safe: dropping the future never loses an item.
    pub async fn dequeue(&self) -> Option<T> {
        loop {
            let notified = self.item_available.notified();
            tokio::pin!(notified);
            // Register before checking so a push between the check and the
            // await still wakes us.
            notified.as_mut().enable();

            {
                let mut inner = self.lock();
                if let Some(item) = inner.items.pop_front() {
                    let remaining = inner.items.len();
                    self.counters.set_queue_depth(remaining);
                    let closed = inner.closed;
                    drop(inner);

                    if remaining == 0 {
                        self.emptied.notify_waiters();
                    } else {
                        // Pass the baton so another idle worker picks up the rest.
                        self.item_available.notify_one();
                    }
                    if closed && remaining == 0 {
                        self.item_available.notify_waiters();
                    }
                    return Some(item);
                }
                if inner.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Resolves once the queue holds no items.
    ///
    /// Items already taken by a worker may still be in progress.
    pub async fn wait_empty(&self) {
        loop {
            let notified = self.emptied.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Stops accepting new items. Queued items can still be dequeued.
    pub fn close(&self) {
        self.lock().closed = true;
        self.item_available.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn queue(capacity: usize) -> (Arc<BoundedQueue<u32>>, Arc<Counters>) {
        let counters = Arc::new(Counters::new());
        (
            Arc::new(BoundedQueue::new(capacity, Arc::clone(&counters))),
            counters,
        )
    }

    #[test]
    fn enqueue_fails_fast_when_full() {
        let (q, _) = queue(2);
        q.try_enqueue(1).unwrap();
        q.try_enqueue(2).unwrap();

        let err = q.try_enqueue(3).unwrap_err();
        assert!(matches!(err, EnqueueError::Full(3)));
        assert_eq!(err.into_inner(), 3);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn depth_gauge_tracks_length() {
        let (q, counters) = queue(10);
        q.try_enqueue(1).unwrap();
        q.try_enqueue(2).unwrap();
        assert_eq!(counters.queue_depth(), 2);
    }

    #[tokio::test]
    async fn dequeue_is_fifo() {
        let (q, counters) = queue(10);
        for i in 0..5 {
            q.try_enqueue(i).unwrap();
        }
        for i in 0..5 {
            assert_eq!(q.dequeue().await, Some(i));
        }
        assert_eq!(counters.queue_depth(), 0);
    }

    #[tokio::test]
    async fn dequeue_waits_for_item() {
        let (q, _) = queue(1);
        let consumer = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.dequeue().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        q.try_enqueue(42).unwrap();
        let got = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer should wake")
            .unwrap();
        assert_eq!(got, Some(42));
    }

    #[tokio::test]
    async fn multiple_consumers_each_get_distinct_items() {
        let (q, _) = queue(100);
        let mut consumers = Vec::new();
        for _ in 0..3 {
            let q = Arc::clone(&q);
            consumers.push(tokio::spawn(async move {
                let mut got = Vec::new();
                while let Some(item) = q.dequeue().await {
                    got.push(item);
                }
                got
            }));
        }

        for i in 0..60 {
            q.try_enqueue(i).unwrap();
        }
        q.wait_empty().await;
        q.close();

        let mut all = Vec::new();
        for c in consumers {
            all.extend(tokio::time::timeout(Duration::from_secs(1), c).await.unwrap().unwrap());
        }
        all.sort();
        assert_eq!(all, (0..60).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn close_rejects_new_items_but_drains_old() {
        let (q, _) = queue(4);
        q.try_enqueue(1).unwrap();
        q.close();

        assert!(matches!(q.try_enqueue(2), Err(EnqueueError::Closed(2))));
        assert_eq!(q.dequeue().await, Some(1));
        assert_eq!(q.dequeue().await, None);
    }

    #[tokio::test]
    async fn close_wakes_idle_consumers() {
        let (q, _) = queue(1);
        let consumer = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.dequeue().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        q.close();
        let got = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("close should wake the consumer")
            .unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn wait_empty_returns_immediately_on_empty_queue() {
        let (q, _) = queue(1);
        tokio::time::timeout(Duration::from_millis(100), q.wait_empty())
            .await
            .expect("empty queue should not wait");
    }

    #[tokio::test]
    async fn wait_empty_resolves_after_drain() {
        let (q, _) = queue(3);
        q.try_enqueue(1).unwrap();
        q.try_enqueue(2).unwrap();

        let waiter = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.wait_empty().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        q.dequeue().await;
        q.dequeue().await;
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should resolve once drained")
            .unwrap();
    }

    #[test]
    #[should_panic(expected = "queue capacity must be positive")]
    fn zero_capacity_panics() {
        let _ = BoundedQueue::<u32>::new(0, Arc::new(Counters::new()));
    }
}
