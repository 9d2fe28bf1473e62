//! Exchange rate types and the rate source abstractions

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::transactions::UserId;

/// Day format shared by cache keys, the rate store and the rates API.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Cache key holding every tracked rate of one calendar day.
pub fn rates_cache_key(date: NaiveDate) -> String {
    format!("CURRENCY_{}", date.format(DATE_FORMAT))
}

/// Multipliers of one day, keyed by currency code.
///
/// A multiplier is the number of foreign currency units bought by one unit
/// of the base currency. The base currency itself never appears here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RateTable(BTreeMap<String, Decimal>);

impl RateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, currency: &str) -> Option<Decimal> {
        self.0.get(currency).copied()
    }

    pub fn insert(&mut self, currency: impl Into<String>, multiplier: Decimal) {
        self.0.insert(currency.into(), multiplier);
    }

    /// Copies every rate of `other` into `self`, overwriting duplicates.
    pub fn merge(&mut self, other: &RateTable) {
        for (currency, multiplier) in other.iter() {
            self.0.insert(currency.to_string(), multiplier);
        }
    }

    /// Returns the subset of rates for the given currencies.
    pub fn select(&self, currencies: &[String]) -> RateTable {
        currencies
            .iter()
            .filter_map(|c| self.get(c).map(|m| (c.clone(), m)))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Decimal)> {
        self.0.iter().map(|(c, m)| (c.as_str(), *m))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Decimal)> for RateTable {
    fn from_iter<I: IntoIterator<Item = (String, Decimal)>>(iter: I) -> Self {
        RateTable(iter.into_iter().collect())
    }
}

/// Remote source of rates relative to a fixed base currency.
///
/// Implementations are expected to be quota limited (about one call per
/// second), callers must pace bulk requests themselves.
#[async_trait]
pub trait RateProvider: Send + Sync {
    async fn live(&self) -> Result<RateTable>;
    async fn historical(&self, date: NaiveDate) -> Result<RateTable>;
}

/// Durable `(currency, date) -> multiplier` table.
#[async_trait]
pub trait RateStore: Send + Sync {
    /// Returns stored rates for every requested date that has at least one
    /// of the requested currencies. Dates without any match are omitted.
    async fn get_batch(
        &self,
        dates: &[NaiveDate],
        currencies: &[String],
    ) -> Result<HashMap<NaiveDate, RateTable>>;

    /// Upserts all rates of `date`.
    async fn save_all(&self, rates: &RateTable, date: NaiveDate) -> Result<()>;

    /// Distinct transaction dates of `user_id` on or after `since` that have
    /// no stored rate for `currency`, in ascending order.
    async fn dates_without_rate(
        &self,
        user_id: UserId,
        since: DateTime<Utc>,
        currency: &str,
    ) -> Result<Vec<NaiveDate>>;
}
