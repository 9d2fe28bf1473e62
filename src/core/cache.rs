//! String-keyed cache abstraction and the typed payload boundary on top of it.

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cannot serialize payload for key {key}: {source}")]
    Serialize {
        key: String,
        source: serde_json::Error,
    },

    #[error("cannot deserialize payload for key {key}: {source}")]
    Deserialize {
        key: String,
        source: serde_json::Error,
    },
}

/// A shared cache with per-entry expiration.
///
/// Keys and values are plain strings so that any backend (in-process map,
/// memcached and the like) can store them. Typed access goes through
/// [`get_json`] and [`put_json`].
#[async_trait]
pub trait Cache: Send + Sync {
    /// Returns the value unless it is absent or already expired.
    async fn get(&self, key: &str) -> Option<String>;

    /// Stores `value`, replacing any previous entry. `None` never expires.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>);

    /// Removes the entry regardless of its expiry.
    async fn delete(&self, key: &str);

    async fn clear(&self);

    /// Physically drops expired entries and returns how many went.
    async fn purge_expired(&self) -> usize;
}

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// Spawns the periodic expiry sweep over `cache`. Stops when `cancel` fires.
pub fn spawn_sweeper(
    cache: Arc<dyn Cache>,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(MIN_SWEEP_INTERVAL));
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Cache sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let removed = cache.purge_expired().await;
                    if removed > 0 {
                        debug!(removed, "Swept expired cache entries");
                    }
                }
            }
        }
    })
}

/// Reads and decodes a JSON payload.
///
/// `Ok(None)` is a plain miss, `Err` means the stored bytes could not be
/// decoded as `T`.
pub async fn get_json<T>(cache: &dyn Cache, key: &str) -> Result<Option<T>, CacheError>
where
    T: DeserializeOwned,
{
    match cache.get(key).await {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| CacheError::Deserialize {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

/// Same as [`get_json`] but an undecodable payload is logged and reported
/// as a miss.
pub async fn get_json_or_miss<T>(cache: &dyn Cache, key: &str) -> Option<T>
where
    T: DeserializeOwned,
{
    match get_json(cache, key).await {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "Ignoring unreadable cache entry");
            None
        }
    }
}

pub async fn put_json<T>(
    cache: &dyn Cache,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<(), CacheError>
where
    T: Serialize + ?Sized,
{
    let raw = serde_json::to_string(value).map_err(|source| CacheError::Serialize {
        key: key.to_string(),
        source,
    })?;
    cache.set(key, raw, ttl).await;
    Ok(())
}
