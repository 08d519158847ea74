//! Suppression of redelivered messages.
//!
//! The platform retries a delivery it believes failed, so the same message
//! id can arrive several times within a few minutes. Each id is remembered
//! until its TTL lapses (default 10 minutes, the platform's redelivery
//! window).
//!
//! # Expiry
//!
//! Expired ids are removed lazily when looked up, and in bulk by
//! [`Deduplicator::spawn_sweeper`] so ids that are never seen again do not
//! accumulate.
//!
//! # Durable tier
//!
//! With a [`DurableCache`] attached, first sightings are also written to the
//! cache under `dedup:<message-id>`, and an id found there is treated as a
//! duplicate even when this process has never seen it. Cache failures are
//! logged and ignored; the in-process map alone still decides.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::DurableCache;
use crate::health::Counters;
use crate::types::MessageId;

/// Default time an id is remembered.
pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(600);

/// Default interval between background sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

const CACHE_KEY_PREFIX: &str = "dedup:";

fn cache_key(id: &MessageId) -> String {
    format!("{}{}", CACHE_KEY_PREFIX, id.as_str())
}

pub struct Deduplicator {
    /// Message id → expiry instant.
    entries: Mutex<HashMap<MessageId, Instant>>,
    ttl: Duration,
    cache: Option<Arc<dyn DurableCache>>,
    counters: Arc<Counters>,
}

impl Deduplicator {
    pub fn new(ttl: Duration, counters: Arc<Counters>) -> Self {
        Deduplicator {
            entries: Mutex::new(HashMap::new()),
            ttl,
            cache: None,
            counters,
        }
    }

    /// Attaches a durable second tier.
    pub fn with_cache(mut self, cache: Arc<dyn DurableCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<MessageId, Instant>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of remembered ids, expired-but-unswept ones included.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if `id` was recorded and has not expired.
    pub fn seen(&self, id: &MessageId) -> bool {
        let mut entries = self.lock();
        let live = Self::live_in(&mut entries, id, Instant::now());
        self.counters.set_dedup_entries(entries.len());
        live
    }

    /// Remembers `id` for one TTL from now.
    pub fn record(&self, id: &MessageId) {
        let mut entries = self.lock();
        entries.insert(id.clone(), Instant::now() + self.ttl);
        self.counters.set_dedup_entries(entries.len());
    }

    /// Records `id` and returns true if this is its first sighting.
    ///
    /// The check and the insert happen under one lock, so of several
    /// concurrent callers with the same id exactly one gets `true`.
    pub async fn check_and_record(&self, id: &MessageId) -> bool {
        {
            let mut entries = self.lock();
            let now = Instant::now();
            if Self::live_in(&mut entries, id, now) {
                return false;
            }
            entries.insert(id.clone(), now + self.ttl);
            self.counters.set_dedup_entries(entries.len());
        }

        let Some(cache) = &self.cache else {
            return true;
        };

        let key = cache_key(id);
        match cache.get(&key).await {
            Ok(Some(_)) => {
                debug!(message_id = %id, "message id found in durable cache");
                return false;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(message_id = %id, error = %e, "dedup cache lookup failed");
                return true;
            }
        }
        if let Err(e) = cache.set_with_ttl(&key, "1", self.ttl).await {
            warn!(message_id = %id, error = %e, "dedup cache write failed");
        }
        true
    }

    /// Removes expired ids. Returns how many were removed.
    pub fn prune_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, expires_at| *expires_at > now);
        self.counters.set_dedup_entries(entries.len());
        before - entries.len()
    }

    /// Runs [`prune_expired`](Self::prune_expired) every `interval` until
    /// `shutdown` fires, purging the durable tier on the same schedule.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("dedup sweeper stopping");
                        return;
                    }
                    _ = ticker.tick() => {
                        let pruned = this.prune_expired();
                        if pruned > 0 {
                            debug!(pruned, remaining = this.len(), "pruned expired message ids");
                        }
                        if let Some(cache) = &this.cache {
                            match cache.purge_expired().await {
                                Ok(0) => {}
                                Ok(purged) => debug!(purged, "purged expired cache keys"),
                                Err(e) => warn!(error = %e, "dedup cache purge failed"),
                            }
                        }
                    }
                }
            }
        })
    }

    /// Lazy expiry: drops `id` if its entry has lapsed.
    fn live_in(entries: &mut HashMap<MessageId, Instant>, id: &MessageId, now: Instant) -> bool {
        match entries.get(id) {
            Some(expires_at) if *expires_at > now => true,
            Some(_) => {
                entries.remove(id);
                false
            }
            None => false,
        }
    }
}
