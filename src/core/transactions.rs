//! Expense records and the transaction store abstraction

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type UserId = i64;

/// Spend per category, in a single currency.
pub type Expenses = HashMap<String, Decimal>;

/// A single expense. `amount` is always held in the base currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub category_id: String,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Calendar day used to look up the rate of this transaction.
    pub fn rate_date(&self) -> NaiveDate {
        self.created_at.date_naive()
    }
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn add_operation(&self, user_id: UserId, transaction: Transaction) -> Result<()>;

    /// Sums `amount * rate(currency, day)` per category over every
    /// transaction of `user_id` created on or after `since`. A day without a
    /// stored rate counts with a multiplier of one.
    async fn sum_by_category_and_period(
        &self,
        user_id: UserId,
        since: DateTime<Utc>,
        currency: &str,
    ) -> Result<Expenses>;
}

/// Shared aggregation used by the store backends.
pub fn sum_by_category<'a, I, F>(transactions: I, since: DateTime<Utc>, rate_for: F) -> Expenses
where
    I: IntoIterator<Item = &'a Transaction>,
    F: Fn(NaiveDate) -> Option<Decimal>,
{
    let mut expenses = Expenses::new();
    for tx in transactions.into_iter().filter(|tx| tx.created_at >= since) {
        let multiplier = rate_for(tx.rate_date()).unwrap_or(Decimal::ONE);
        *expenses
            .entry(tx.category_id.clone())
            .or_insert(Decimal::ZERO) += tx.amount * multiplier;
    }
    expenses
}
