//! Worker pool that turns queued deliveries into debounced messages.
//!
//! # Module Structure
//!
//! - [`pool`]: the worker loop, per-envelope processing, and the pool handle

mod pool;


pub use pool::{ProcessError, ProcessSummary, WorkerContext, WorkerPool};
