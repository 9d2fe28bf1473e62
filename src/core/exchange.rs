//! Currency multiplier resolution over cache, rate store and rate provider.

use super::cache::{Cache, get_json_or_miss, put_json};
use super::rates::{RateProvider, RateStore, RateTable, rates_cache_key};
use super::today;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, instrument, warn};

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("unrecognized currency: {0}")]
    UnrecognizedCurrency(String),

    #[error("rate provider unavailable")]
    UpstreamUnavailable(#[source] anyhow::Error),

    #[error("rate store unavailable")]
    StoreUnavailable(#[source] anyhow::Error),
}

/// Resolves `(currency, day)` to a multiplier relative to the base currency.
///
/// Lookup order is cache, then rate store, then the remote provider. Every
/// successful lookup below the cache is written back into it.
pub struct CurrencyExchange {
    base_currency: String,
    cache: Arc<dyn Cache>,
    rate_store: Arc<dyn RateStore>,
    provider: Arc<dyn RateProvider>,
    rates_ttl: Duration,
}

impl CurrencyExchange {
    pub fn new(
        base_currency: &str,
        cache: Arc<dyn Cache>,
        rate_store: Arc<dyn RateStore>,
        provider: Arc<dyn RateProvider>,
        rates_ttl: Duration,
    ) -> Self {
        Self {
            base_currency: base_currency.to_string(),
            cache,
            rate_store,
            provider,
            rates_ttl,
        }
    }

    pub fn base_currency(&self) -> &str {
        &self.base_currency
    }

    #[instrument(name = "GetMultiplier", skip_all, fields(currency = %currency, date = %date))]
    pub async fn get_multiplier(
        &self,
        currency: &str,
        date: NaiveDate,
    ) -> Result<Decimal, ExchangeError> {
        if currency == self.base_currency {
            return Ok(Decimal::ONE);
        }

        let key = rates_cache_key(date);
        if let Some(day) = get_json_or_miss::<RateTable>(self.cache.as_ref(), &key).await {
            if let Some(multiplier) = day.get(currency) {
                debug!(source = "cache", %multiplier, "Resolved multiplier");
                return Ok(multiplier);
            }
            debug!("Cached day has no rate for currency");
        }

        let stored = self
            .rate_store
            .get_batch(&[date], &[currency.to_string()])
            .await
            .map_err(|e| {
                error!(error = %e, "Cannot query stored rates");
                ExchangeError::StoreUnavailable(e)
            })?;
        if let Some(day) = stored.get(&date) {
            self.write_through(date, day).await;
            if let Some(multiplier) = day.get(currency) {
                debug!(source = "store", %multiplier, "Resolved multiplier");
                return Ok(multiplier);
            }
        }

        let fetched = self.fetch_and_store(date).await?;
        match fetched.get(currency) {
            Some(multiplier) => {
                debug!(source = "provider", %multiplier, "Resolved multiplier");
                Ok(multiplier)
            }
            None => {
                warn!("Provider returned no rate for currency");
                Err(ExchangeError::UnrecognizedCurrency(currency.to_string()))
            }
        }
    }

    /// Loads the stored rates of `date` for `currencies` into the cache.
    /// Returns whether anything was found.
    pub async fn warm_from_store(
        &self,
        date: NaiveDate,
        currencies: &[String],
    ) -> Result<bool, ExchangeError> {
        let stored = self
            .rate_store
            .get_batch(&[date], currencies)
            .await
            .map_err(ExchangeError::StoreUnavailable)?;
        for (day, rates) in &stored {
            self.write_through(*day, rates).await;
        }
        Ok(!stored.is_empty())
    }

    /// Whether the cache currently holds any rates for `date`.
    pub async fn is_cached(&self, date: NaiveDate) -> bool {
        self.cache.get(&rates_cache_key(date)).await.is_some()
    }

    /// Makes sure the rate store holds `currency` for `date`.
    ///
    /// A day already cached is persisted as is, since an earlier save may
    /// have failed after the fetch. Anything else is resolved as usual.
    pub async fn ensure_stored(
        &self,
        currency: &str,
        date: NaiveDate,
    ) -> Result<Decimal, ExchangeError> {
        if currency == self.base_currency {
            return Ok(Decimal::ONE);
        }
        let key = rates_cache_key(date);
        if let Some(day) = get_json_or_miss::<RateTable>(self.cache.as_ref(), &key).await {
            if let Some(multiplier) = day.get(currency) {
                self.rate_store
                    .save_all(&day, date)
                    .await
                    .map_err(ExchangeError::StoreUnavailable)?;
                debug!(%currency, %date, "Persisted cached rates");
                return Ok(multiplier);
            }
        }
        self.get_multiplier(currency, date).await
    }

    /// Fetches a full day from the provider, persists it and caches it.
    ///
    /// Today uses the live endpoint, every other day the historical one.
    /// A failed save is logged and the fetched rates are still used.
    pub async fn fetch_and_store(&self, date: NaiveDate) -> Result<RateTable, ExchangeError> {
        if date == today() {
            self.fetch_live(date).await
        } else {
            let result = self.provider.historical(date).await;
            self.keep_fetched("historical", date, result).await
        }
    }

    /// Fetches current rates and files them under `date`.
    pub async fn fetch_live(&self, date: NaiveDate) -> Result<RateTable, ExchangeError> {
        let result = self.provider.live().await;
        self.keep_fetched("live", date, result).await
    }

    async fn keep_fetched(
        &self,
        endpoint: &'static str,
        date: NaiveDate,
        result: anyhow::Result<RateTable>,
    ) -> Result<RateTable, ExchangeError> {
        let rates = result.map_err(|e| {
            error!(error = %e, endpoint, %date, "Cannot get rates from provider");
            ExchangeError::UpstreamUnavailable(e)
        })?;
        debug!(endpoint, %date, count = rates.len(), "Fetched rates from provider");

        if let Err(e) = self.rate_store.save_all(&rates, date).await {
            error!(error = %e, %date, "Cannot persist fetched rates");
        }
        self.write_through(date, &rates).await;
        Ok(rates)
    }

    /// Merges `rates` into the cached day so that currencies cached earlier
    /// for the same day are kept.
    async fn write_through(&self, date: NaiveDate, rates: &RateTable) {
        if rates.is_empty() {
            return;
        }
        let key = rates_cache_key(date);
        let mut day = get_json_or_miss::<RateTable>(self.cache.as_ref(), &key)
            .await
            .unwrap_or_default();
        day.merge(rates);
        if let Err(e) = put_json(self.cache.as_ref(), &key, &day, Some(self.rates_ttl)).await {
            warn!(error = %e, "Cannot cache rates");
        }
    }
}
