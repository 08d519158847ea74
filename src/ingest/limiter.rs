//! Cap on concurrent downstream calls.

use std::sync::Arc;

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

use crate::health::Counters;

/// Default number of dispatches allowed at once.
pub const DEFAULT_MAX_CONCURRENT_DISPATCH: usize = 10;

/// A counting permit pool backed by a [`Semaphore`].
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    max: usize,
    counters: Arc<Counters>,
}

/// Holds one slot of a [`ConcurrencyLimiter`]. The slot is released on drop.
#[derive(Debug)]
pub struct DispatchPermit {
    permit: Option<OwnedSemaphorePermit>,
    limiter: ConcurrencyLimiter,
}

impl Drop for DispatchPermit {
    fn drop(&mut self) {
        drop(self.permit.take());
        self.limiter.publish();
    }
}

impl ConcurrencyLimiter {
    /// # Panics
    ///
    /// Panics if `max` is zero.
    pub fn new(max: usize, counters: Arc<Counters>) -> Self {
        assert!(max > 0, "concurrency limit must be positive");
        ConcurrencyLimiter {
            semaphore: Arc::new(Semaphore::new(max)),
            max,
            counters,
        }
    }

    /// Waits for a free slot.
    ///
    /// Only fails if the semaphore was closed, which this type never does.
    pub async fn acquire(&self) -> Result<DispatchPermit, AcquireError> {
        let permit = Arc::clone(&self.semaphore).acquire_owned().await?;
        let guard = DispatchPermit {
            permit: Some(permit),
            limiter: self.clone(),
        };
        self.publish();
        Ok(guard)
    }

    pub fn in_use(&self) -> usize {
        self.max - self.semaphore.available_permits()
    }

    pub fn max(&self) -> usize {
        self.max
    }

    fn publish(&self) {
        self.counters.set_dispatch_in_flight(self.in_use());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn permits_are_counted_and_released_on_drop() {
        let counters = Arc::new(Counters::new());
        let limiter = ConcurrencyLimiter::new(2, Arc::clone(&counters));

        let a = limiter.acquire().await.unwrap();
        let b = limiter.acquire().await.unwrap();
        assert_eq!(limiter.in_use(), 2);
        assert_eq!(counters.dispatch_in_flight(), 2);

        drop(a);
        assert_eq!(limiter.in_use(), 1);
        assert_eq!(counters.dispatch_in_flight(), 1);
        drop(b);
        assert_eq!(limiter.in_use(), 0);
        assert_eq!(counters.dispatch_in_flight(), 0);
    }

    #[tokio::test]
    async fn acquire_waits_when_exhausted() {
        let limiter = ConcurrencyLimiter::new(1, Arc::new(Counters::new()));
        let held = limiter.acquire().await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should get the released permit")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn in_use_never_exceeds_max() {
        let limiter = ConcurrencyLimiter::new(3, Arc::new(Counters::new()));
        let peak = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let limiter = limiter.clone();
            let peak = Arc::clone(&peak);
            tasks.push(tokio::spawn(async move {
                let _permit = limiter.acquire().await.unwrap();
                peak.fetch_max(limiter.in_use(), std::sync::atomic::Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        assert!(peak.load(std::sync::atomic::Ordering::SeqCst) <= 3);
        assert_eq!(limiter.in_use(), 0);
    }
}
