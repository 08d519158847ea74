//! Webhook Ingest - an ack-first receiver for WhatsApp Cloud API webhooks.
//!
//! Deliveries are acknowledged immediately and queued. A worker pool then
//! verifies, parses, deduplicates and debounces them before handing each
//! message to a workflow engine under a concurrency limit.

pub mod cache;
pub mod config;
pub mod dispatch;
pub mod health;
pub mod ingest;
pub mod lifecycle;
pub mod pipeline;
pub mod server;
pub mod types;
pub mod webhooks;
pub mod worker;

#[cfg(test)]
mod test_utils;
