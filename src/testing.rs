//! Fakes with call counters shared by the unit tests.

use crate::core::cache::Cache;
use crate::core::limits::{Limit, LimitStore};
use crate::core::rates::{RateProvider, RateStore, RateTable};
use crate::core::transactions::{Expenses, Transaction, TransactionStore, UserId};
use crate::store::memory::{MemoryCache, MemoryStore};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

pub(crate) fn rates(entries: &[(&str, Decimal)]) -> RateTable {
    entries.iter().map(|(c, m)| (c.to_string(), *m)).collect()
}

pub(crate) struct MockRateProvider {
    rates: Option<RateTable>,
    pub live_calls: AtomicUsize,
    pub historical_calls: AtomicUsize,
    requested: Mutex<Vec<NaiveDate>>,
    call_times: Mutex<Vec<Instant>>,
}

impl MockRateProvider {
    /// Serves `rates` from both endpoints.
    pub fn new(rates: RateTable) -> Self {
        Self {
            rates: Some(rates),
            live_calls: AtomicUsize::new(0),
            historical_calls: AtomicUsize::new(0),
            requested: Mutex::new(Vec::new()),
            call_times: Mutex::new(Vec::new()),
        }
    }

    /// Fails every request.
    pub fn failing() -> Self {
        Self {
            rates: None,
            ..Self::new(RateTable::new())
        }
    }

    pub fn calls(&self) -> usize {
        self.live_calls.load(Ordering::SeqCst) + self.historical_calls.load(Ordering::SeqCst)
    }

    pub fn requested_dates(&self) -> Vec<NaiveDate> {
        self.requested.lock().unwrap().clone()
    }

    /// Tokio clock readings taken at every request, in call order.
    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().unwrap().clone()
    }

    fn respond(&self) -> Result<RateTable> {
        self.call_times.lock().unwrap().push(Instant::now());
        self.rates
            .clone()
            .ok_or_else(|| anyhow!("HTTP error: 503 Service Unavailable"))
    }
}

#[async_trait]
impl RateProvider for MockRateProvider {
    async fn live(&self) -> Result<RateTable> {
        self.live_calls.fetch_add(1, Ordering::SeqCst);
        self.respond()
    }

    async fn historical(&self, date: NaiveDate) -> Result<RateTable> {
        self.historical_calls.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().unwrap().push(date);
        self.respond()
    }
}

/// [`MemoryStore`] that counts calls and can be told to fail writes.
pub(crate) struct CountingStore {
    inner: MemoryStore,
    pub get_batch_calls: AtomicUsize,
    pub save_calls: AtomicUsize,
    pub missing_dates_calls: AtomicUsize,
    pub sum_calls: AtomicUsize,
    pub fail_saves: AtomicBool,
}

impl CountingStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            get_batch_calls: AtomicUsize::new(0),
            save_calls: AtomicUsize::new(0),
            missing_dates_calls: AtomicUsize::new(0),
            sum_calls: AtomicUsize::new(0),
            fail_saves: AtomicBool::new(false),
        }
    }

    /// Calls that touched the rate table.
    pub fn rate_calls(&self) -> usize {
        self.get_batch_calls.load(Ordering::SeqCst) + self.save_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RateStore for CountingStore {
    async fn get_batch(
        &self,
        dates: &[NaiveDate],
        currencies: &[String],
    ) -> Result<HashMap<NaiveDate, RateTable>> {
        self.get_batch_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get_batch(dates, currencies).await
    }

    async fn save_all(&self, rates: &RateTable, date: NaiveDate) -> Result<()> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(anyhow!("connection reset"));
        }
        self.inner.save_all(rates, date).await
    }

    async fn dates_without_rate(
        &self,
        user_id: UserId,
        since: DateTime<Utc>,
        currency: &str,
    ) -> Result<Vec<NaiveDate>> {
        self.missing_dates_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.dates_without_rate(user_id, since, currency).await
    }
}

#[async_trait]
impl TransactionStore for CountingStore {
    async fn add_operation(&self, user_id: UserId, transaction: Transaction) -> Result<()> {
        self.inner.add_operation(user_id, transaction).await
    }

    async fn sum_by_category_and_period(
        &self,
        user_id: UserId,
        since: DateTime<Utc>,
        currency: &str,
    ) -> Result<Expenses> {
        self.sum_calls.fetch_add(1, Ordering::SeqCst);
        self.inner
            .sum_by_category_and_period(user_id, since, currency)
            .await
    }
}

#[async_trait]
impl LimitStore for CountingStore {
    async fn set_limit(&self, user_id: UserId, category_id: &str, limit: Limit) -> Result<()> {
        self.inner.set_limit(user_id, category_id, limit).await
    }

    async fn get_limit(&self, user_id: UserId, category_id: &str) -> Result<Option<Limit>> {
        self.inner.get_limit(user_id, category_id).await
    }
}

/// [`MemoryCache`] that counts every call.
pub(crate) struct CountingCache {
    inner: MemoryCache,
    calls: AtomicUsize,
    pub deleted: Mutex<Vec<String>>,
}

impl CountingCache {
    pub fn new() -> Self {
        Self {
            inner: MemoryCache::new(),
            calls: AtomicUsize::new(0),
            deleted: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Cache for CountingCache {
    async fn get(&self, key: &str) -> Option<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.deleted.lock().unwrap().push(key.to_string());
        self.inner.delete(key).await
    }

    async fn clear(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.clear().await
    }

    async fn purge_expired(&self) -> usize {
        self.inner.purge_expired().await
    }
}
