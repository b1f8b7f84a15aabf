//! Per-host connection attempt limiting

use crate::context::CallContext;
use crate::error::{ErrorKind, SshError};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Default number of attempts admitted per window
pub const DEFAULT_MAX_ATTEMPTS: usize = 5;

/// Default sliding window length
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Guard against repeated connection attempts to the same host
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Record an attempt for `host` and report whether it is admitted
    ///
    /// A denied attempt is `Ok(false)`, not an error. Errors are reserved for
    /// an empty host and for the context ending while waiting for the lock.
    async fn allow(&self, ctx: &CallContext, host: &str) -> Result<bool, SshError>;
}

type HostAttempts = Arc<Mutex<VecDeque<Instant>>>;

/// Sliding-window limiter with one lock per host
pub struct WindowRateLimiter {
    /// Attempts admitted per window
    max_attempts: usize,
    /// Window length
    window: Duration,
    /// Attempt history by host; the outer lock only guards insertion
    hosts: RwLock<HashMap<String, HostAttempts>>,
}

impl WindowRateLimiter {
    /// Create a limiter admitting `max_attempts` per `window` per host
    pub fn new(max_attempts: usize, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
            hosts: RwLock::new(HashMap::new()),
        }
    }

    /// Attempts admitted per window
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Window length
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Fetch the per-host entry, creating it on first sight
    async fn host_entry(&self, host: &str) -> HostAttempts {
        if let Some(entry) = self.hosts.read().await.get(host) {
            return Arc::clone(entry);
        }

        let mut hosts = self.hosts.write().await;
        // Another caller may have inserted while we waited for the write lock
        let entry = hosts
            .entry(host.to_string())
            .or_insert_with(|| {
                debug!("Tracking connection attempts for host: {}", host);
                Arc::new(Mutex::new(VecDeque::new()))
            });
        Arc::clone(entry)
    }
}

impl Default for WindowRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_WINDOW)
    }
}

#[async_trait]
impl RateLimiter for WindowRateLimiter {
    async fn allow(&self, ctx: &CallContext, host: &str) -> Result<bool, SshError> {
        if host.is_empty() {
            return Err(SshError::new(ErrorKind::InvalidConfig, "rate limiter host must not be empty"));
        }

        let mut attempts = ctx
            .run(async {
                let entry = self.host_entry(host).await;
                entry.lock_owned().await
            })
            .await
            .map_err(|interrupt| {
                interrupt
                    .into_error(ErrorKind::ConnectionFailed, "rate limit check")
                    .with_context("host", host)
            })?;

        let now = Instant::now();
        while let Some(oldest) = attempts.front() {
            if now.duration_since(*oldest) >= self.window {
                attempts.pop_front();
            } else {
                break;
            }
        }

        if attempts.len() >= self.max_attempts {
            warn!(
                "Rate limit reached for {}: {} attempts in {:?}",
                host,
                attempts.len(),
                self.window
            );
            return Ok(false);
        }

        attempts.push_back(now);
        Ok(true)
    }
}

/// Limiter that admits every attempt, for trusted environments and tests
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRateLimiter;

#[async_trait]
impl RateLimiter for NoopRateLimiter {
    async fn allow(&self, _ctx: &CallContext, _host: &str) -> Result<bool, SshError> {
        Ok(true)
    }
}
