use crate::core::cache::Cache;
use crate::core::limits::{Limit, LimitStore};
use crate::core::rates::{RateStore, RateTable};
use crate::core::transactions::{
    Expenses, Transaction, TransactionStore, UserId, sum_by_category,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

struct CacheValue {
    value: String,
    expires_at: Option<Instant>,
}

impl CacheValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= now)
    }
}

/// In-memory TTL cache.
///
/// Reads share the lock, writes and sweeps take it exclusively. Expired
/// entries are hidden from reads right away and physically dropped by
/// [`crate::core::cache::spawn_sweeper`].
#[derive(Clone, Default)]
pub struct MemoryCache {
    inner: Arc<RwLock<HashMap<String, CacheValue>>>,
}

impl MemoryCache {
    /// Creates a new MemoryCache instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired or not.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        let cache = self.inner.read().await;
        if let Some(entry) = cache.get(key) {
            if entry.is_expired(Instant::now()) {
                debug!("Cache entry expired for key: {}", key);
                return None;
            }
            debug!("Cache HIT for key: {}", key);
            return Some(entry.value.clone());
        }
        debug!("Cache MISS for key: {}", key);
        None
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) {
        // A TTL past the clock's range never expires.
        let expires_at = ttl.and_then(|duration| Instant::now().checked_add(duration));
        let cache_value = CacheValue { value, expires_at };

        let mut cache = self.inner.write().await;
        debug!("Cache PUT for key: {}", key);
        cache.insert(key.to_string(), cache_value);
    }

    async fn delete(&self, key: &str) {
        let mut cache = self.inner.write().await;
        cache.remove(key);
        debug!("Cache REMOVE for key: {}", key);
    }

    async fn clear(&self) {
        let mut cache = self.inner.write().await;
        cache.clear();
        debug!("Cache CLEAR");
    }

    async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut cache = self.inner.write().await;
        let before = cache.len();
        cache.retain(|_, entry| !entry.is_expired(now));
        before - cache.len()
    }
}

/// Rate, transaction and limit store kept in process memory.
#[derive(Default)]
pub struct MemoryStore {
    rates: RwLock<HashMap<NaiveDate, RateTable>>,
    transactions: RwLock<HashMap<UserId, Vec<Transaction>>>,
    limits: RwLock<HashMap<(UserId, String), Limit>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateStore for MemoryStore {
    async fn get_batch(
        &self,
        dates: &[NaiveDate],
        currencies: &[String],
    ) -> Result<HashMap<NaiveDate, RateTable>> {
        let rates = self.rates.read().await;
        let found = dates
            .iter()
            .filter_map(|date| {
                let day = rates.get(date)?.select(currencies);
                (!day.is_empty()).then_some((*date, day))
            })
            .collect();
        Ok(found)
    }

    async fn save_all(&self, rates: &RateTable, date: NaiveDate) -> Result<()> {
        if rates.is_empty() {
            return Ok(());
        }
        let mut stored = self.rates.write().await;
        stored.entry(date).or_default().merge(rates);
        Ok(())
    }

    async fn dates_without_rate(
        &self,
        user_id: UserId,
        since: DateTime<Utc>,
        currency: &str,
    ) -> Result<Vec<NaiveDate>> {
        let transactions = self.transactions.read().await;
        let rates = self.rates.read().await;
        let missing: BTreeSet<NaiveDate> = transactions
            .get(&user_id)
            .into_iter()
            .flatten()
            .filter(|tx| tx.created_at >= since)
            .map(Transaction::rate_date)
            .filter(|date| {
                rates
                    .get(date)
                    .and_then(|day| day.get(currency))
                    .is_none()
            })
            .collect();
        Ok(missing.into_iter().collect())
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn add_operation(&self, user_id: UserId, transaction: Transaction) -> Result<()> {
        let mut transactions = self.transactions.write().await;
        transactions.entry(user_id).or_default().push(transaction);
        Ok(())
    }

    async fn sum_by_category_and_period(
        &self,
        user_id: UserId,
        since: DateTime<Utc>,
        currency: &str,
    ) -> Result<Expenses> {
        let transactions = self.transactions.read().await;
        let rates = self.rates.read().await;
        Ok(sum_by_category(
            transactions.get(&user_id).into_iter().flatten(),
            since,
            |date| rates.get(&date).and_then(|day| day.get(currency)),
        ))
    }
}

#[async_trait]
impl LimitStore for MemoryStore {
    async fn set_limit(&self, user_id: UserId, category_id: &str, limit: Limit) -> Result<()> {
        let mut limits = self.limits.write().await;
        limits.insert((user_id, category_id.to_string()), limit);
        Ok(())
    }

    async fn get_limit(&self, user_id: UserId, category_id: &str) -> Result<Option<Limit>> {
        let limits = self.limits.read().await;
        Ok(limits.get(&(user_id, category_id.to_string())).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache::spawn_sweeper;
    use crate::testing::rates;
    use chrono::TimeZone;
    use futures::future::join_all;
    use rust_decimal::Decimal;
    use tokio::time::sleep;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_cache_get_set() {
        let cache = MemoryCache::new();

        // Initially, cache is empty
        assert!(cache.get("key1").await.is_none());

        cache.set("key1", "123".to_string(), None).await;
        assert_eq!(cache.get("key1").await, Some("123".to_string()));

        // Get a non-existent key
        assert!(cache.get("key2").await.is_none());
    }

    #[tokio::test]
    async fn test_cache_set_overwrites() {
        let cache = MemoryCache::new();

        cache.set("key1", "old".to_string(), Some(Duration::from_millis(5))).await;
        cache.set("key1", "new".to_string(), None).await;
        sleep(Duration::from_millis(10)).await;

        assert_eq!(cache.get("key1").await, Some("new".to_string()));
    }

    #[tokio::test]
    async fn test_cache_ttl_expiration() {
        let cache = MemoryCache::new();

        // Put value with 10ms TTL
        cache
            .set("key1", "123".to_string(), Some(Duration::from_millis(10)))
            .await;
        assert_eq!(cache.get("key1").await, Some("123".to_string()));

        // Wait for TTL expiration, no sweep has run yet
        sleep(Duration::from_millis(20)).await;
        assert!(cache.get("key1").await.is_none());
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_cache_huge_ttl_never_expires() {
        let cache = MemoryCache::new();

        cache
            .set("key1", "123".to_string(), Some(Duration::from_secs(u64::MAX)))
            .await;

        assert_eq!(cache.get("key1").await, Some("123".to_string()));
        assert_eq!(cache.purge_expired().await, 0);
    }

    #[tokio::test]
    async fn test_cache_delete() {
        let cache = MemoryCache::new();

        cache.set("key1", "123".to_string(), None).await;
        cache.delete("key1").await;
        assert!(cache.get("key1").await.is_none());

        // Deleting a missing key is a no-op
        cache.delete("key1").await;
    }

    #[tokio::test]
    async fn test_cache_clear() {
        let cache = MemoryCache::new();

        cache.set("key1", "123".to_string(), None).await;
        cache.set("key2", "456".to_string(), None).await;
        cache.clear().await;

        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_purge_keeps_live_entries() {
        let cache = MemoryCache::new();

        cache
            .set("short", "1".to_string(), Some(Duration::from_millis(5)))
            .await;
        cache.set("forever", "2".to_string(), None).await;
        cache
            .set("long", "3".to_string(), Some(Duration::from_secs(60)))
            .await;
        sleep(Duration::from_millis(15)).await;

        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get("forever").await, Some("2".to_string()));
    }

    #[tokio::test]
    async fn test_sweeper_removes_expired_and_stops_on_cancel() {
        let cache = MemoryCache::new();
        let cancel = CancellationToken::new();
        let handle = spawn_sweeper(
            Arc::new(cache.clone()),
            Duration::from_millis(5),
            cancel.clone(),
        );

        cache
            .set("key1", "123".to_string(), Some(Duration::from_millis(1)))
            .await;
        sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.len().await, 0);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_access_never_tears_values() {
        let cache = MemoryCache::new();
        let writers = (0..16).map(|i| {
            let cache = cache.clone();
            tokio::spawn(async move {
                for j in 0..50 {
                    let value = format!("{i}-{j}-{}", "x".repeat(64));
                    cache.set("shared", value, None).await;
                }
            })
        });
        let readers = (0..16).map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move {
                for _ in 0..50 {
                    if let Some(value) = cache.get("shared").await {
                        assert!(value.ends_with(&"x".repeat(64)));
                    }
                }
            })
        });

        for result in join_all(writers.chain(readers)).await {
            result.unwrap();
        }
        assert!(cache.get("shared").await.is_some());
    }

    #[tokio::test]
    async fn test_store_rates_upsert_and_batch() {
        let store = MemoryStore::new();
        let day = NaiveDate::from_ymd_opt(2022, 10, 18).unwrap();
        let other = NaiveDate::from_ymd_opt(2022, 10, 19).unwrap();

        store
            .save_all(&rates(&[("USD", Decimal::new(3, 2)), ("EUR", Decimal::new(2, 2))]), day)
            .await
            .unwrap();
        store
            .save_all(&rates(&[("USD", Decimal::new(4, 2))]), day)
            .await
            .unwrap();

        let batch = store
            .get_batch(&[day, other], &["USD".to_string()])
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[&day], rates(&[("USD", Decimal::new(4, 2))]));
    }

    #[tokio::test]
    async fn test_store_dates_without_rate() {
        let store = MemoryStore::new();
        let at = |day| Utc.with_ymd_and_hms(2022, 10, day, 10, 0, 0).unwrap();
        for day in [17, 18, 18, 19] {
            store
                .add_operation(
                    42,
                    Transaction {
                        category_id: "CLOTHES".to_string(),
                        amount: Decimal::from(100),
                        created_at: at(day),
                    },
                )
                .await
                .unwrap();
        }
        store
            .save_all(
                &rates(&[("USD", Decimal::new(3, 2))]),
                NaiveDate::from_ymd_opt(2022, 10, 19).unwrap(),
            )
            .await
            .unwrap();

        let missing = store.dates_without_rate(42, at(18), "USD").await.unwrap();
        assert_eq!(missing, vec![NaiveDate::from_ymd_opt(2022, 10, 18).unwrap()]);

        let none_for_stranger = store.dates_without_rate(7, at(1), "USD").await.unwrap();
        assert!(none_for_stranger.is_empty());
    }

    #[tokio::test]
    async fn test_store_sum_uses_stored_rates() {
        let store = MemoryStore::new();
        let created_at = Utc.with_ymd_and_hms(2022, 10, 18, 10, 0, 0).unwrap();
        store
            .add_operation(
                42,
                Transaction {
                    category_id: "CLOTHES".to_string(),
                    amount: Decimal::from(100),
                    created_at,
                },
            )
            .await
            .unwrap();
        store
            .save_all(&rates(&[("USD", Decimal::new(3, 2))]), created_at.date_naive())
            .await
            .unwrap();

        let since = created_at - chrono::Duration::days(1);
        let usd = store.sum_by_category_and_period(42, since, "USD").await.unwrap();
        let rub = store.sum_by_category_and_period(42, since, "RUB").await.unwrap();

        assert_eq!(usd["CLOTHES"], Decimal::from(3));
        assert_eq!(rub["CLOTHES"], Decimal::from(100));
    }

    #[tokio::test]
    async fn test_store_limit_is_replaced_per_category() {
        let store = MemoryStore::new();
        let until = Utc::now() + chrono::Duration::days(1);
        let limit = |border: i64| Limit {
            upper_border: Decimal::from(border),
            until,
        };

        store.set_limit(42, "CLOTHES", limit(100)).await.unwrap();
        store.set_limit(42, "CLOTHES", limit(300)).await.unwrap();

        assert_eq!(store.get_limit(42, "CLOTHES").await.unwrap(), Some(limit(300)));
        assert_eq!(store.get_limit(42, "BEAUTY").await.unwrap(), None);
        assert_eq!(store.get_limit(7, "CLOTHES").await.unwrap(), None);

        let check = store
            .check_limit(42, "CLOTHES", Decimal::from(350))
            .await
            .unwrap();
        assert!(check.exceeded);
        assert_eq!(check.over_by, Decimal::from(50));
    }
}
