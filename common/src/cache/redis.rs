use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, AsyncConnectionConfig, RedisError};
use tokio::sync::{watch, Notify};
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::AppError;

use super::CachePrimary;

const RECONNECT_ATTEMPTS: usize = 8;
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(5);

/// Redis-backed cache primary.
///
/// A supervisor task owns (re)connection. Commands clone the multiplexed
/// connection out of the slot, so no lock is held while talking to Redis.
/// Connection-level failures, including replies slower than the response
/// timeout, flip health to `false` and wake the supervisor.
pub struct RedisCache {
    key_prefix: String,
    connection: Arc<Mutex<Option<MultiplexedConnection>>>,
    health_tx: watch::Sender<bool>,
    reconnect: Arc<Notify>,
    shutdown: CancellationToken,
}

impl RedisCache {
    /// Validates the URL and starts connecting in the background; the cache
    /// reports unhealthy until the first connection succeeds.
    pub fn connect(
        redis_url: &str,
        key_prefix: impl Into<String>,
        response_timeout: Duration,
    ) -> Result<Arc<Self>, AppError> {
        let client = redis::Client::open(redis_url)?;
        let connection_config = AsyncConnectionConfig::new()
            .set_connection_timeout(response_timeout)
            .set_response_timeout(response_timeout);
        let (health_tx, _) = watch::channel(false);

        let cache = Arc::new(Self {
            key_prefix: key_prefix.into(),
            connection: Arc::new(Mutex::new(None)),
            health_tx,
            reconnect: Arc::new(Notify::new()),
            shutdown: CancellationToken::new(),
        });

        spawn_supervisor(client, connection_config, &cache);
        cache.reconnect.notify_one();
        Ok(cache)
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{key}", self.key_prefix.trim_end_matches(':'))
    }

    fn connection(&self) -> Result<MultiplexedConnection, AppError> {
        self.connection
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().cloned())
            .ok_or_else(|| AppError::Cache("redis connection unavailable".into()))
    }

    fn on_error(&self, err: RedisError) -> AppError {
        if err.is_io_error()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_timeout()
        {
            self.drop_connection(&err.to_string());
        }
        AppError::Redis(err)
    }

    /// Discards the current connection and asks the supervisor for a new one.
    fn drop_connection(&self, reason: &str) {
        if let Ok(mut slot) = self.connection.lock() {
            slot.take();
        }
        if self.health_tx.send_replace(false) {
            warn!(reason, "redis connection lost");
        }
        self.reconnect.notify_one();
    }
}

impl Drop for RedisCache {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn spawn_supervisor(
    client: redis::Client,
    connection_config: AsyncConnectionConfig,
    cache: &Arc<RedisCache>,
) {
    let slot = Arc::clone(&cache.connection);
    let health_tx = cache.health_tx.clone();
    let reconnect = Arc::clone(&cache.reconnect);
    let shutdown = cache.shutdown.clone();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = reconnect.notified() => {}
            }

            let strategy = ExponentialBackoff::from_millis(2)
                .factor(50)
                .max_delay(RECONNECT_MAX_DELAY)
                .map(jitter)
                .take(RECONNECT_ATTEMPTS);

            let attempt = tokio::select! {
                () = shutdown.cancelled() => break,
                result = Retry::spawn(strategy, || {
                    client.get_multiplexed_async_connection_with_config(&connection_config)
                }) => result,
            };

            match attempt {
                Ok(connection) => {
                    if let Ok(mut guard) = slot.lock() {
                        *guard = Some(connection);
                    }
                    health_tx.send_replace(true);
                    info!("redis cache primary connected");
                }
                Err(err) => {
                    warn!(error = %err, "redis reconnect attempts exhausted; retrying later");
                    let reconnect = Arc::clone(&reconnect);
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            () = shutdown.cancelled() => {}
                            () = tokio::time::sleep(RECONNECT_MAX_DELAY) => reconnect.notify_one(),
                        }
                    });
                }
            }
        }
    });
}

#[async_trait]
impl CachePrimary for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let mut conn = self.connection()?;
        conn.get(self.key(key)).await.map_err(|err| self.on_error(err))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AppError> {
        let mut conn = self.connection()?;
        conn.set_ex::<_, _, ()>(self.key(key), value, ttl.as_secs().max(1))
            .await
            .map_err(|err| self.on_error(err))
    }

    async fn del(&self, key: &str) -> Result<(), AppError> {
        let mut conn = self.connection()?;
        conn.del::<_, ()>(self.key(key))
            .await
            .map_err(|err| self.on_error(err))
    }

    fn health(&self) -> watch::Receiver<bool> {
        self.health_tx.subscribe()
    }

    fn mark_unresponsive(&self) {
        self.drop_connection("no reply within the cache deadline");
    }
}
