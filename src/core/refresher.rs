//! Keeps today's rates warm in the cache and the rate store.

use super::exchange::CurrencyExchange;
use super::today;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(1);

pub struct RateRefresher {
    exchange: Arc<CurrencyExchange>,
    currencies: Vec<String>,
    interval: Duration,
}

impl RateRefresher {
    pub fn new(exchange: Arc<CurrencyExchange>, currencies: &[String], interval: Duration) -> Self {
        Self {
            exchange,
            currencies: currencies.to_vec(),
            interval,
        }
    }

    /// Runs the warm-up and then spawns the periodic refresh task.
    pub async fn start(self, cancel: CancellationToken) -> JoinHandle<()> {
        self.warm_up().await;
        self.spawn(cancel)
    }

    /// Loads today's persisted rates into the cache, then fetches live rates
    /// if today is still not cached.
    pub async fn warm_up(&self) {
        let day = today();
        match self.exchange.warm_from_store(day, &self.currencies).await {
            Ok(true) => debug!(%day, "Loaded persisted rates"),
            Ok(false) => debug!(%day, "No persisted rates for today"),
            Err(e) => warn!(error = %e, "Cannot load persisted rates"),
        }
        self.refresh_today().await;
    }

    /// Fetches live rates unless today's rates are already cached.
    /// Returns whether a fetch happened and succeeded.
    pub async fn refresh_today(&self) -> bool {
        let day = today();
        if self.exchange.is_cached(day).await {
            return false;
        }
        match self.exchange.fetch_live(day).await {
            Ok(rates) => {
                info!(%day, count = rates.len(), "Refreshed today's rates");
                true
            }
            Err(e) => {
                warn!(error = %e, "Cannot refresh today's rates");
                false
            }
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval.max(MIN_REFRESH_INTERVAL));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Rate refresher stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.refresh_today().await;
                    }
                }
            }
        })
    }
}
