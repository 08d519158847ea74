//! Runtime configuration, read from the environment.
//!
//! | Variable | Default |
//! |---|---|
//! | `INGEST_BIND_ADDR` | `0.0.0.0:5000` |
//! | `WHATSAPP_APP_SECRET` | required |
//! | `WHATSAPP_VERIFY_TOKEN` | required |
//! | `INGEST_QUEUE_CAPACITY` | 500 |
//! | `INGEST_WORKERS` | 3 |
//! | `INGEST_MAX_CONCURRENT_DISPATCH` | 10 |
//! | `INGEST_DEDUP_TTL_SECS` | 600 |
//! | `MESSAGE_DEBOUNCE_MS` | 1000 |
//! | `INGEST_MAX_PENDING_SENDERS` | 500 |
//! | `INGEST_DRAIN_TIMEOUT_SECS` | 5 |
//! | `INGEST_INFLIGHT_TIMEOUT_SECS` | 10 |
//! | `WORKFLOW_ENGINE_URL` | unset (messages are only logged) |
//! | `REDIS_URL` | unset (dedup is process-local) |

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::ingest::{
    DEFAULT_DEBOUNCE_WINDOW, DEFAULT_DEDUP_TTL, DEFAULT_MAX_CONCURRENT_DISPATCH,
    DEFAULT_MAX_PENDING_SENDERS, DEFAULT_QUEUE_CAPACITY,
};
use crate::lifecycle::ShutdownTimeouts;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5000";

/// Default worker count.
pub const DEFAULT_WORKERS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),

    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Everything needed to build and run the pipeline.
#[derive(Clone, PartialEq, Eq)]
pub struct IngestConfig {
    pub bind_addr: SocketAddr,
    pub app_secret: String,
    pub verify_token: String,
    pub queue_capacity: usize,
    pub workers: usize,
    pub max_concurrent_dispatch: usize,
    pub dedup_ttl: Duration,
    pub debounce_window: Duration,
    pub max_pending_senders: usize,
    pub timeouts: ShutdownTimeouts,
    pub workflow_engine_url: Option<String>,
    pub redis_url: Option<String>,
}

// Secrets stay out of logs.
impl std::fmt::Debug for IngestConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestConfig")
            .field("bind_addr", &self.bind_addr)
            .field("app_secret", &"<redacted>")
            .field("verify_token", &"<redacted>")
            .field("queue_capacity", &self.queue_capacity)
            .field("workers", &self.workers)
            .field("max_concurrent_dispatch", &self.max_concurrent_dispatch)
            .field("dedup_ttl", &self.dedup_ttl)
            .field("debounce_window", &self.debounce_window)
            .field("max_pending_senders", &self.max_pending_senders)
            .field("timeouts", &self.timeouts)
            .field("workflow_engine_url", &self.workflow_engine_url)
            .field("redis_url", &self.redis_url.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl IngestConfig {
    /// Defaults for everything except the two secrets.
    pub fn new(app_secret: impl Into<String>, verify_token: impl Into<String>) -> Self {
        IngestConfig {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            app_secret: app_secret.into(),
            verify_token: verify_token.into(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            workers: DEFAULT_WORKERS,
            max_concurrent_dispatch: DEFAULT_MAX_CONCURRENT_DISPATCH,
            dedup_ttl: DEFAULT_DEDUP_TTL,
            debounce_window: DEFAULT_DEBOUNCE_WINDOW,
            max_pending_senders: DEFAULT_MAX_PENDING_SENDERS,
            timeouts: ShutdownTimeouts::default(),
            workflow_engine_url: None,
            redis_url: None,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let app_secret =
            get("WHATSAPP_APP_SECRET").ok_or(ConfigError::Missing("WHATSAPP_APP_SECRET"))?;
        let verify_token =
            get("WHATSAPP_VERIFY_TOKEN").ok_or(ConfigError::Missing("WHATSAPP_VERIFY_TOKEN"))?;

        let defaults = Self::new(app_secret, verify_token);
        let bind_addr = parse_or(&get, "INGEST_BIND_ADDR", defaults.bind_addr)?;
        let queue_capacity = positive(&get, "INGEST_QUEUE_CAPACITY", defaults.queue_capacity)?;
        let workers = positive(&get, "INGEST_WORKERS", defaults.workers)?;
        let max_concurrent_dispatch = positive(
            &get,
            "INGEST_MAX_CONCURRENT_DISPATCH",
            defaults.max_concurrent_dispatch,
        )?;
        let dedup_ttl = Duration::from_secs(positive(
            &get,
            "INGEST_DEDUP_TTL_SECS",
            defaults.dedup_ttl.as_secs(),
        )?);
        let debounce_window = Duration::from_millis(parse_or(
            &get,
            "MESSAGE_DEBOUNCE_MS",
            defaults.debounce_window.as_millis() as u64,
        )?);
        let max_pending_senders = positive(
            &get,
            "INGEST_MAX_PENDING_SENDERS",
            defaults.max_pending_senders,
        )?;
        let timeouts = ShutdownTimeouts {
            drain: Duration::from_secs(parse_or(
                &get,
                "INGEST_DRAIN_TIMEOUT_SECS",
                defaults.timeouts.drain.as_secs(),
            )?),
            in_flight: Duration::from_secs(parse_or(
                &get,
                "INGEST_INFLIGHT_TIMEOUT_SECS",
                defaults.timeouts.in_flight.as_secs(),
            )?),
        };

        Ok(IngestConfig {
            bind_addr,
            queue_capacity,
            workers,
            max_concurrent_dispatch,
            dedup_ttl,
            debounce_window,
            max_pending_senders,
            timeouts,
            workflow_engine_url: get("WORKFLOW_ENGINE_URL"),
            redis_url: get("REDIS_URL"),
            ..defaults
        })
    }
}

fn parse_or<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
    }
}

fn positive<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialEq + Default,
    G: Fn(&str) -> Option<String>,
{
    let value = parse_or(get, var, default)?;
    if value == T::default() {
        return Err(ConfigError::Invalid {
            var,
            value: get(var).unwrap_or_default(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    const SECRETS: [(&str, &str); 2] = [
        ("WHATSAPP_APP_SECRET", "app-secret"),
        ("WHATSAPP_VERIFY_TOKEN", "verify-token"),
    ];

    #[test]
    fn defaults_apply_when_only_secrets_are_set() {
        let config = IngestConfig::from_lookup(lookup(&SECRETS)).unwrap();

        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(config.queue_capacity, 500);
        assert_eq!(config.workers, 3);
        assert_eq!(config.max_concurrent_dispatch, 10);
        assert_eq!(config.dedup_ttl, Duration::from_secs(600));
        assert_eq!(config.debounce_window, Duration::from_millis(1000));
        assert_eq!(config.timeouts.drain, Duration::from_secs(5));
        assert_eq!(config.timeouts.in_flight, Duration::from_secs(10));
        assert_eq!(config.max_pending_senders, 500);
        assert_eq!(config.workflow_engine_url, None);
        assert_eq!(config.redis_url, None);
    }

    #[test]
    fn missing_secret_is_an_error() {
        let err = IngestConfig::from_lookup(lookup(&[("WHATSAPP_VERIFY_TOKEN", "t")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("WHATSAPP_APP_SECRET"));
    }

    #[test]
    fn blank_secret_counts_as_missing() {
        let err = IngestConfig::from_lookup(lookup(&[
            ("WHATSAPP_APP_SECRET", "s"),
            ("WHATSAPP_VERIFY_TOKEN", "  "),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::Missing("WHATSAPP_VERIFY_TOKEN"));
    }

    #[test]
    fn overrides_are_parsed() {
        let mut vars = SECRETS.to_vec();
        vars.extend([
            ("INGEST_BIND_ADDR", "127.0.0.1:8080"),
            ("INGEST_QUEUE_CAPACITY", "50"),
            ("INGEST_WORKERS", "8"),
            ("MESSAGE_DEBOUNCE_MS", "0"),
            ("INGEST_DRAIN_TIMEOUT_SECS", "1"),
            ("WORKFLOW_ENGINE_URL", "http://engine:5678/webhook/ingest"),
            ("INGEST_MAX_PENDING_SENDERS", "64"),
            ("REDIS_URL", "redis://:pw@cache:6379/0"),
        ]);
        let config = IngestConfig::from_lookup(lookup(&vars)).unwrap();

        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.queue_capacity, 50);
        assert_eq!(config.workers, 8);
        assert_eq!(config.debounce_window, Duration::ZERO);
        assert_eq!(config.timeouts.drain, Duration::from_secs(1));
        assert_eq!(
            config.workflow_engine_url.as_deref(),
            Some("http://engine:5678/webhook/ingest")
        );
        assert_eq!(config.max_pending_senders, 64);
        assert_eq!(config.redis_url.as_deref(), Some("redis://:pw@cache:6379/0"));
    }

    #[test]
    fn unparseable_value_is_reported() {
        let mut vars = SECRETS.to_vec();
        vars.push(("INGEST_WORKERS", "three"));
        assert_eq!(
            IngestConfig::from_lookup(lookup(&vars)).unwrap_err(),
            ConfigError::Invalid {
                var: "INGEST_WORKERS",
                value: "three".to_string()
            }
        );
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let mut vars = SECRETS.to_vec();
        vars.push(("INGEST_QUEUE_CAPACITY", "0"));
        assert!(matches!(
            IngestConfig::from_lookup(lookup(&vars)),
            Err(ConfigError::Invalid {
                var: "INGEST_QUEUE_CAPACITY",
                ..
            })
        ));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let config = IngestConfig {
            redis_url: Some("redis://:hunter2@cache:6379".to_string()),
            ..IngestConfig::new("super-secret", "token-value")
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("super-secret"));
        assert!(!debug.contains("token-value"));
    }
}
