//! Category spend over rolling windows, with per-day report caching.

use super::cache::{Cache, get_json_or_miss, put_json};
use super::exchange::CurrencyExchange;
use super::period::Period;
use super::rates::{DATE_FORMAT, RateStore};
use super::today;
use super::transactions::{Expenses, TransactionStore, UserId};
use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate, Utc};
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_REPORT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_BACKFILL_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_BACKFILL_DATES: usize = 30;

pub fn report_cache_key(date: NaiveDate, user_id: UserId, currency: &str, days: u32) -> String {
    format!(
        "CALC_{}_{}_{}_{}",
        date.format(DATE_FORMAT),
        user_id,
        currency,
        days
    )
}

/// Throttling of historical rate lookups made while building a report.
#[derive(Debug, Clone, Copy)]
pub struct BackfillPolicy {
    pub delay: Duration,
    pub max_dates: usize,
}

impl Default for BackfillPolicy {
    fn default() -> Self {
        Self {
            delay: DEFAULT_BACKFILL_DELAY,
            max_dates: DEFAULT_MAX_BACKFILL_DATES,
        }
    }
}

pub struct ExpenseCalculator {
    exchange: Arc<CurrencyExchange>,
    transactions: Arc<dyn TransactionStore>,
    rate_store: Arc<dyn RateStore>,
    cache: Arc<dyn Cache>,
    report_ttl: Duration,
    backfill: BackfillPolicy,
    report_currencies: Mutex<BTreeSet<String>>,
    cancel: CancellationToken,
}

impl ExpenseCalculator {
    pub fn new(
        exchange: Arc<CurrencyExchange>,
        transactions: Arc<dyn TransactionStore>,
        rate_store: Arc<dyn RateStore>,
        cache: Arc<dyn Cache>,
    ) -> Self {
        let report_currencies = BTreeSet::from([exchange.base_currency().to_string()]);
        Self {
            exchange,
            transactions,
            rate_store,
            cache,
            report_ttl: DEFAULT_REPORT_TTL,
            backfill: BackfillPolicy::default(),
            report_currencies: Mutex::new(report_currencies),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_report_ttl(mut self, ttl: Duration) -> Self {
        self.report_ttl = ttl;
        self
    }

    pub fn with_backfill(mut self, backfill: BackfillPolicy) -> Self {
        self.backfill = backfill;
        self
    }

    /// Currencies whose cached reports are dropped by [`Self::invalidate_reports`]
    /// in addition to the base currency and any currency reported on since.
    pub fn with_tracked_currencies(self, currencies: &[String]) -> Self {
        if let Ok(mut known) = self.report_currencies.lock() {
            known.extend(currencies.iter().cloned());
        }
        self
    }

    /// Stops in-flight backfills early once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn exchange(&self) -> &CurrencyExchange {
        &self.exchange
    }

    /// Spend per category over the last `days` days, in `currency`.
    #[instrument(name = "CalcExpenses", skip(self))]
    pub async fn aggregate(&self, user_id: UserId, days: u32, currency: &str) -> Result<Expenses> {
        let now = Utc::now();
        let since = now - chrono::Duration::days(i64::from(days));
        let key = report_cache_key(now.date_naive(), user_id, currency, days);

        if let Some(report) = get_json_or_miss::<Expenses>(self.cache.as_ref(), &key).await {
            debug!(source = "cache", "Report served from cache");
            return Ok(report);
        }
        self.remember_currency(currency);

        if currency != self.exchange.base_currency() {
            self.backfill(user_id, since, currency).await?;
        }

        let report = self
            .transactions
            .sum_by_category_and_period(user_id, since, currency)
            .await
            .with_context(|| format!("Failed to sum expenses of user {user_id}"))?;

        if let Err(e) = put_json(self.cache.as_ref(), &key, &report, Some(self.report_ttl)).await {
            warn!(error = %e, "Cannot cache report");
        }
        debug!(categories = report.len(), "Computed report");
        Ok(report)
    }

    pub async fn calc_by_period(
        &self,
        user_id: UserId,
        period: Period,
        currency: &str,
    ) -> Result<Expenses> {
        self.aggregate(user_id, period.days(), currency).await
    }

    pub async fn calc_by_current_week(&self, user_id: UserId, currency: &str) -> Result<Expenses> {
        self.calc_by_period(user_id, Period::Week, currency).await
    }

    pub async fn calc_by_current_month(&self, user_id: UserId, currency: &str) -> Result<Expenses> {
        self.calc_by_period(user_id, Period::Month, currency).await
    }

    pub async fn calc_by_current_year(&self, user_id: UserId, currency: &str) -> Result<Expenses> {
        self.calc_by_period(user_id, Period::Year, currency).await
    }

    /// Spend over the last `day_of_month` days, where today counts as day N.
    pub async fn calc_since_start_of_month(
        &self,
        user_id: UserId,
        currency: &str,
    ) -> Result<Expenses> {
        self.aggregate(user_id, today().day(), currency).await
    }

    /// Drops every cached report of `user_id` computed today.
    #[instrument(skip(self))]
    pub async fn invalidate_reports(&self, user_id: UserId) {
        let keys = self.report_keys(today(), user_id);
        join_all(keys.iter().map(|key| self.cache.delete(key))).await;
        debug!(count = keys.len(), "Invalidated reports");
    }

    fn report_keys(&self, day: NaiveDate, user_id: UserId) -> Vec<String> {
        let windows: BTreeSet<u32> = Period::ALL
            .iter()
            .map(Period::days)
            .chain(std::iter::once(day.day()))
            .collect();
        let currencies = self
            .report_currencies
            .lock()
            .map(|known| known.clone())
            .unwrap_or_default();

        currencies
            .iter()
            .flat_map(|currency| {
                windows
                    .iter()
                    .map(move |days| report_cache_key(day, user_id, currency, *days))
            })
            .collect()
    }

    fn remember_currency(&self, currency: &str) {
        if let Ok(mut known) = self.report_currencies.lock() {
            known.insert(currency.to_string());
        }
    }

    /// Resolves rates for the user's transaction days that have none stored,
    /// one provider call at a time. Failures are logged and skipped since
    /// the sum treats a missing rate as one.
    async fn backfill(
        &self,
        user_id: UserId,
        since: chrono::DateTime<Utc>,
        currency: &str,
    ) -> Result<usize> {
        let mut dates = self
            .rate_store
            .dates_without_rate(user_id, since, currency)
            .await
            .with_context(|| format!("Failed to list days without {currency} rate"))?;
        if dates.is_empty() {
            return Ok(0);
        }

        let max_dates = self.backfill.max_dates;
        if dates.len() > max_dates {
            warn!(
                missing = dates.len(),
                max_dates, "Too many days without a rate, backfilling the most recent ones"
            );
            dates = dates.split_off(dates.len() - max_dates);
        }

        let mut filled = 0;
        for (i, date) in dates.iter().enumerate() {
            if i > 0 {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        info!(filled, remaining = dates.len() - i, "Backfill interrupted");
                        break;
                    }
                    _ = tokio::time::sleep(self.backfill.delay) => {}
                }
            }
            match self.exchange.ensure_stored(currency, *date).await {
                Ok(_) => filled += 1,
                Err(e) => warn!(error = %e, %date, "Cannot backfill rate"),
            }
        }
        debug!(filled, requested = dates.len(), "Backfill finished");
        Ok(filled)
    }
}
