//! TTL cache shared by all requests.
//!
//! Reads and writes go to an optional networked primary while it reports
//! healthy, and to an in-process map otherwise. Failures never reach callers:
//! they are logged and treated as misses.

pub mod redis;

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::AppError;

const DEFAULT_PRIMARY_TIMEOUT: Duration = Duration::from_millis(500);
/// How long a primary that missed its deadline is bypassed before being tried again.
const PRIMARY_COOLDOWN: Duration = Duration::from_secs(5);

/// Networked key/value store with per-key TTL.
#[async_trait]
pub trait CachePrimary: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AppError>;
    async fn del(&self, key: &str) -> Result<(), AppError>;
    /// Health as driven by connect and error events. `true` means reachable.
    fn health(&self) -> watch::Receiver<bool>;
    /// Called when a call did not answer within the manager's deadline.
    fn mark_unresponsive(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Primary configured and healthy.
    Primary,
    /// Primary configured but currently unreachable.
    Fallback,
    /// No primary configured.
    Local,
}

struct LocalEntry {
    value: String,
    expires_at: Instant,
}

pub struct CacheManager {
    primary: Option<(Arc<dyn CachePrimary>, watch::Receiver<bool>)>,
    local: Arc<DashMap<String, LocalEntry>>,
    primary_timeout: Duration,
    /// Set when the primary misses a deadline; the primary is skipped until then.
    suspended_until: Mutex<Option<Instant>>,
    sweeper: CancellationToken,
}

impl CacheManager {
    /// Must be called inside a tokio runtime; spawns the expiry sweeper.
    pub fn new(primary: Option<Arc<dyn CachePrimary>>, sweep_interval: Duration) -> Self {
        let local = Arc::new(DashMap::new());
        let sweeper = CancellationToken::new();
        spawn_sweeper(Arc::clone(&local), sweep_interval, sweeper.clone());

        Self {
            primary: primary.map(|primary| {
                let health = primary.health();
                (primary, health)
            }),
            local,
            primary_timeout: DEFAULT_PRIMARY_TIMEOUT,
            suspended_until: Mutex::new(None),
            sweeper,
        }
    }

    pub fn local_only(sweep_interval: Duration) -> Self {
        Self::new(None, sweep_interval)
    }

    #[must_use]
    pub const fn with_primary_timeout(mut self, timeout: Duration) -> Self {
        self.primary_timeout = timeout;
        self
    }

    pub fn mode(&self) -> CacheMode {
        match &self.primary {
            None => CacheMode::Local,
            Some((_, health)) if *health.borrow() && !self.suspended() => CacheMode::Primary,
            Some(_) => CacheMode::Fallback,
        }
    }

    fn active_primary(&self) -> Option<&Arc<dyn CachePrimary>> {
        self.primary
            .as_ref()
            .filter(|(_, health)| *health.borrow() && !self.suspended())
            .map(|(primary, _)| primary)
    }

    fn suspended(&self) -> bool {
        let Ok(mut until) = self.suspended_until.lock() else {
            return false;
        };
        match *until {
            Some(deadline) if deadline > Instant::now() => true,
            Some(_) => {
                *until = None;
                false
            }
            None => false,
        }
    }

    fn suspend_primary(&self, primary: &dyn CachePrimary, operation: &str) {
        if let Ok(mut until) = self.suspended_until.lock() {
            *until = Instant::now().checked_add(PRIMARY_COOLDOWN);
        }
        primary.mark_unresponsive();
        warn!(
            operation,
            cooldown_secs = PRIMARY_COOLDOWN.as_secs(),
            "cache primary unresponsive; using local store"
        );
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.active_primary() {
            Some(primary) => match self.bounded(primary, "cache_get", primary.get(key)).await {
                Ok(value) => value,
                Err(err) => {
                    warn!(key, error = %err, "cache primary read failed; using local store");
                    self.local_get(key)
                }
            },
            None => self.local_get(key),
        }?;

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(key, error = %err, "discarding undecodable cache entry");
                None
            }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(key, error = %err, "cache value not serializable; skipping");
                return;
            }
        };

        if let Some(primary) = self.active_primary() {
            match self.bounded(primary, "cache_set", primary.set(key, &raw, ttl)).await {
                Ok(()) => return,
                Err(err) => {
                    warn!(key, error = %err, "cache primary write failed; using local store");
                }
            }
        }

        let Some(expires_at) = Instant::now().checked_add(ttl) else {
            warn!(key, "cache ttl out of range; skipping");
            return;
        };
        self.local.insert(
            key.to_string(),
            LocalEntry {
                value: raw,
                expires_at,
            },
        );
    }

    pub async fn invalidate(&self, key: &str) {
        self.local.remove(key);
        if let Some(primary) = self.active_primary() {
            if let Err(err) = self.bounded(primary, "cache_del", primary.del(key)).await {
                warn!(key, error = %err, "cache primary delete failed");
            }
        }
    }

    /// Evicts expired in-process entries, returning how many were removed.
    pub fn sweep_expired(&self) -> usize {
        sweep(&self.local)
    }

    fn local_get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let hit = self
            .local
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value.clone());
        if hit.is_none() {
            self.local.remove_if(key, |_, entry| entry.expires_at <= now);
        }
        hit
    }

    /// A missed deadline counts as an outage: the primary is bypassed for a cooldown.
    async fn bounded<F, T>(
        &self,
        primary: &Arc<dyn CachePrimary>,
        operation: &str,
        call: F,
    ) -> Result<T, AppError>
    where
        F: std::future::Future<Output = Result<T, AppError>>,
    {
        match tokio::time::timeout(self.primary_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                self.suspend_primary(primary.as_ref(), operation);
                Err(AppError::Timeout {
                    operation: operation.to_string(),
                })
            }
        }
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        self.sweeper.cancel();
    }
}

fn sweep(local: &DashMap<String, LocalEntry>) -> usize {
    let now = Instant::now();
    let before = local.len();
    local.retain(|_, entry| entry.expires_at > now);
    before.saturating_sub(local.len())
}

fn spawn_sweeper(
    local: Arc<DashMap<String, LocalEntry>>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let interval = interval.max(Duration::from_millis(10));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = sweep(&local);
                    if evicted > 0 {
                        debug!(evicted, "swept expired cache entries");
                    }
                }
            }
        }
    });
}
