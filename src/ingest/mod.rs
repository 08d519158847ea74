//! The in-process stages between the HTTP acknowledgement and dispatch.
//!
//! ```text
//! handler ──try_enqueue──► BoundedQueue ──dequeue──► worker ──► Deduplicator
//!                                                                   │
//!                                                                   ▼
//!          engine ◄── Dispatcher ◄── ConcurrencyLimiter ◄──────── Debouncer
//! ```

pub mod debounce;
pub mod dedupe;
pub mod limiter;
pub mod queue;

pub use debounce::{DEFAULT_DEBOUNCE_WINDOW, DEFAULT_MAX_PENDING_SENDERS, Debouncer};
pub use dedupe::{DEFAULT_DEDUP_TTL, DEFAULT_SWEEP_INTERVAL, Deduplicator};
pub use limiter::{ConcurrencyLimiter, DEFAULT_MAX_CONCURRENT_DISPATCH, DispatchPermit};
pub use queue::{BoundedQueue, DEFAULT_QUEUE_CAPACITY, EnqueueError};
