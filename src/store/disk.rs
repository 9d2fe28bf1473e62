use crate::core::cache::Cache;
use crate::core::limits::{Limit, LimitStore};
use crate::core::rates::{DATE_FORMAT, RateStore, RateTable};
use crate::core::transactions::{
    Expenses, Transaction, TransactionStore, UserId, sum_by_category,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use fjall::{Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tracing::debug;

const RATES_PARTITION: &str = "rates";
const TRANSACTIONS_PARTITION: &str = "transactions";
const LIMITS_PARTITION: &str = "limits";
const CACHE_PARTITION: &str = "cache";

/// Rate and transaction store backed by a fjall keyspace.
///
/// Rates live under `<date>/<currency>`, transactions under
/// `<user>/<created micros>/<seq>` so that a user's history is one prefix.
pub struct DiskStore {
    keyspace: Keyspace,
    rates: PartitionHandle,
    transactions: PartitionHandle,
    limits: PartitionHandle,
    sequence: AtomicU64,
}

impl DiskStore {
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create data directory: {}", path.display()))?;

        let keyspace = fjall::Config::new(path)
            .open()
            .with_context(|| format!("Failed to open store at {}", path.display()))?;
        let rates = keyspace.open_partition(RATES_PARTITION, PartitionCreateOptions::default())?;
        let transactions =
            keyspace.open_partition(TRANSACTIONS_PARTITION, PartitionCreateOptions::default())?;
        let limits = keyspace.open_partition(LIMITS_PARTITION, PartitionCreateOptions::default())?;
        debug!("Opened store at {}", path.display());

        Ok(Self {
            keyspace,
            rates,
            transactions,
            limits,
            sequence: AtomicU64::new(0),
        })
    }

    /// Cache kept in the same keyspace, so entries outlive the process.
    pub fn cache(&self) -> Result<DiskCache> {
        let entries = self
            .keyspace
            .open_partition(CACHE_PARTITION, PartitionCreateOptions::default())
            .context("Failed to open cache partition")?;
        Ok(DiskCache {
            keyspace: self.keyspace.clone(),
            entries,
        })
    }

    fn limit_key(user_id: UserId, category_id: &str) -> String {
        format!("{}{category_id}", Self::user_prefix(user_id))
    }

    fn rate_key(date: NaiveDate, currency: &str) -> String {
        format!("{}/{}", date.format(DATE_FORMAT), currency)
    }

    fn user_prefix(user_id: UserId) -> String {
        format!("{user_id}/")
    }

    fn rate(&self, date: NaiveDate, currency: &str) -> Result<Option<Decimal>> {
        match self.rates.get(Self::rate_key(date, currency))? {
            Some(raw) => {
                let text = std::str::from_utf8(&raw).context("Stored rate is not UTF-8")?;
                let multiplier = text
                    .parse::<Decimal>()
                    .with_context(|| format!("Invalid stored rate: {text}"))?;
                Ok(Some(multiplier))
            }
            None => Ok(None),
        }
    }

    fn user_transactions(&self, user_id: UserId, since: DateTime<Utc>) -> Result<Vec<Transaction>> {
        let mut transactions = Vec::new();
        for item in self.transactions.prefix(Self::user_prefix(user_id)) {
            let (_, value) = item?;
            let tx: Transaction =
                serde_json::from_slice(&value).context("Failed to decode stored transaction")?;
            if tx.created_at >= since {
                transactions.push(tx);
            }
        }
        Ok(transactions)
    }
}

#[async_trait]
impl RateStore for DiskStore {
    async fn get_batch(
        &self,
        dates: &[NaiveDate],
        currencies: &[String],
    ) -> Result<HashMap<NaiveDate, RateTable>> {
        let mut found = HashMap::new();
        for date in dates {
            let mut day = RateTable::new();
            for currency in currencies {
                if let Some(multiplier) = self.rate(*date, currency)? {
                    day.insert(currency.clone(), multiplier);
                }
            }
            if !day.is_empty() {
                found.insert(*date, day);
            }
        }
        Ok(found)
    }

    async fn save_all(&self, rates: &RateTable, date: NaiveDate) -> Result<()> {
        if rates.is_empty() {
            return Ok(());
        }
        let mut batch = self.keyspace.batch();
        for (currency, multiplier) in rates.iter() {
            batch.insert(
                &self.rates,
                Self::rate_key(date, currency),
                multiplier.to_string(),
            );
        }
        batch.commit().context("Failed to save rates")?;
        self.keyspace.persist(PersistMode::SyncAll)?;
        debug!(%date, count = rates.len(), "Saved rates");
        Ok(())
    }

    async fn dates_without_rate(
        &self,
        user_id: UserId,
        since: DateTime<Utc>,
        currency: &str,
    ) -> Result<Vec<NaiveDate>> {
        let dates: BTreeSet<NaiveDate> = self
            .user_transactions(user_id, since)?
            .iter()
            .map(Transaction::rate_date)
            .collect();
        let mut missing = Vec::new();
        for date in dates {
            if self.rate(date, currency)?.is_none() {
                missing.push(date);
            }
        }
        Ok(missing)
    }
}

#[async_trait]
impl TransactionStore for DiskStore {
    async fn add_operation(&self, user_id: UserId, transaction: Transaction) -> Result<()> {
        let key = format!(
            "{}{:020}/{:010}",
            Self::user_prefix(user_id),
            transaction.created_at.timestamp_micros(),
            self.sequence.fetch_add(1, Ordering::SeqCst)
        );
        let value = serde_json::to_vec(&transaction)?;
        self.transactions
            .insert(key, value)
            .context("Failed to save transaction")?;
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }

    async fn sum_by_category_and_period(
        &self,
        user_id: UserId,
        since: DateTime<Utc>,
        currency: &str,
    ) -> Result<Expenses> {
        let transactions = self.user_transactions(user_id, since)?;
        let dates: BTreeSet<NaiveDate> = transactions.iter().map(Transaction::rate_date).collect();
        let mut rates = HashMap::new();
        for date in dates {
            if let Some(multiplier) = self.rate(date, currency)? {
                rates.insert(date, multiplier);
            }
        }
        Ok(sum_by_category(&transactions, since, |date| {
            rates.get(&date).copied()
        }))
    }
}

#[async_trait]
impl LimitStore for DiskStore {
    async fn set_limit(&self, user_id: UserId, category_id: &str, limit: Limit) -> Result<()> {
        let value = serde_json::to_vec(&limit)?;
        self.limits
            .insert(Self::limit_key(user_id, category_id), value)
            .context("Failed to save limit")?;
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }

    async fn get_limit(&self, user_id: UserId, category_id: &str) -> Result<Option<Limit>> {
        match self.limits.get(Self::limit_key(user_id, category_id))? {
            Some(raw) => Ok(Some(
                serde_json::from_slice(&raw).context("Failed to decode stored limit")?,
            )),
            None => Ok(None),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct CacheEntry {
    value: String,
    expires_at: Option<SystemTime>,
}

impl CacheEntry {
    fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

/// [`Cache`] over a fjall partition. Entries are JSON `CacheEntry` values
/// with a wall-clock expiry, dropped lazily on read and by the sweeper.
#[derive(Clone)]
pub struct DiskCache {
    keyspace: Keyspace,
    entries: PartitionHandle,
}

impl DiskCache {
    fn read(&self, key: &str) -> Result<Option<String>> {
        let Some(raw) = self.entries.get(key)? else {
            return Ok(None);
        };
        let entry: CacheEntry = serde_json::from_slice(&raw)?;
        if entry.is_expired(SystemTime::now()) {
            self.entries.remove(key)?;
            return Ok(None);
        }
        Ok(Some(entry.value))
    }

    fn write(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        // A TTL past the clock's range never expires.
        let expires_at = ttl.and_then(|duration| SystemTime::now().checked_add(duration));
        let entry = CacheEntry { value, expires_at };
        self.entries.insert(key.as_bytes(), serde_json::to_vec(&entry)?)?;
        self.keyspace.persist(PersistMode::Buffer)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key)?;
        self.keyspace.persist(PersistMode::Buffer)?;
        Ok(())
    }

    fn remove_where(&self, mut doomed: impl FnMut(&[u8]) -> bool) -> Result<usize> {
        let mut keys = Vec::new();
        for item in self.entries.iter() {
            let (key, value) = item?;
            if doomed(&value) {
                keys.push(key);
            }
        }
        let mut batch = self.keyspace.batch();
        for key in &keys {
            batch.remove(&self.entries, key.clone());
        }
        batch.commit()?;
        self.keyspace.persist(PersistMode::Buffer)?;
        Ok(keys.len())
    }
}

#[async_trait]
impl Cache for DiskCache {
    async fn get(&self, key: &str) -> Option<String> {
        self.read(key).unwrap_or_else(|e| {
            debug!(key, "DiskCache get error: {}", e);
            None
        })
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) {
        if let Err(e) = self.write(key, value, ttl) {
            debug!(key, "DiskCache set error: {}", e);
        }
    }

    async fn delete(&self, key: &str) {
        if let Err(e) = self.remove(key) {
            debug!(key, "DiskCache delete error: {}", e);
        }
    }

    async fn clear(&self) {
        if let Err(e) = self.remove_where(|_| true) {
            debug!("DiskCache clear error: {}", e);
        }
    }

    async fn purge_expired(&self) -> usize {
        let now = SystemTime::now();
        // Unreadable entries go too, nothing can decode them later.
        let purged = self.remove_where(|raw| {
            serde_json::from_slice::<CacheEntry>(raw).map_or(true, |entry| entry.is_expired(now))
        });
        purged.unwrap_or_else(|e| {
            debug!("DiskCache purge error: {}", e);
            0
        })
    }
}
