//! Transaction write path.

use super::exchange::CurrencyExchange;
use super::limits::{Limit, LimitStore, start_of_next_month};
use super::report::ExpenseCalculator;
use super::today;
use super::transactions::{Transaction, TransactionStore, UserId};
use anyhow::{Context, Result, bail};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument};

/// Outcome of recording one expense, all amounts in base currency.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedExpense {
    pub base_amount: Decimal,
    pub month_to_date: Decimal,
    /// Month-to-date spend minus the category limit, zero without a limit.
    pub over_limit: Decimal,
    pub limit_exceeded: bool,
}

pub struct ExpenseRecorder {
    exchange: Arc<CurrencyExchange>,
    transactions: Arc<dyn TransactionStore>,
    limits: Arc<dyn LimitStore>,
    calculator: Arc<ExpenseCalculator>,
}

impl ExpenseRecorder {
    pub fn new(
        exchange: Arc<CurrencyExchange>,
        transactions: Arc<dyn TransactionStore>,
        limits: Arc<dyn LimitStore>,
        calculator: Arc<ExpenseCalculator>,
    ) -> Self {
        Self {
            exchange,
            transactions,
            limits,
            calculator,
        }
    }

    async fn to_base(&self, amount: Decimal, currency: &str) -> Result<Decimal> {
        if amount <= Decimal::ZERO {
            bail!("Amount must be positive, got {amount}");
        }
        let multiplier = self
            .exchange
            .get_multiplier(currency, today())
            .await
            .with_context(|| format!("Failed to get {currency} rate"))?;
        amount
            .checked_div(multiplier)
            .with_context(|| format!("Cannot convert {amount} {currency} at rate {multiplier}"))
    }

    /// Sets the category limit for the rest of the current month, converted
    /// to base currency at today's rate.
    #[instrument(name = "SetLimit", skip(self, amount), fields(%amount))]
    pub async fn set_limit(
        &self,
        user_id: UserId,
        category_id: &str,
        amount: Decimal,
        currency: &str,
    ) -> Result<Limit> {
        let upper_border = self.to_base(amount, currency).await?;
        let until = start_of_next_month(Utc::now()).context("Month end is out of range")?;
        let limit = Limit {
            upper_border,
            until,
        };
        self.limits
            .set_limit(user_id, category_id, limit.clone())
            .await
            .context("Failed to save limit")?;
        info!(%upper_border, %until, "Limit set");
        Ok(limit)
    }

    /// Converts `amount` from `currency` at today's rate, stores it and drops
    /// the user's cached reports before reading the month-to-date spend.
    #[instrument(name = "AddOperation", skip(self, amount), fields(%amount))]
    pub async fn record(
        &self,
        user_id: UserId,
        category_id: &str,
        amount: Decimal,
        currency: &str,
    ) -> Result<RecordedExpense> {
        let base_amount = self.to_base(amount, currency).await?;

        self.transactions
            .add_operation(
                user_id,
                Transaction {
                    category_id: category_id.to_string(),
                    amount: base_amount,
                    created_at: Utc::now(),
                },
            )
            .await
            .context("Failed to save expense")?;
        self.calculator.invalidate_reports(user_id).await;

        let base_currency = self.exchange.base_currency();
        let month = self
            .calculator
            .calc_since_start_of_month(user_id, base_currency)
            .await?;
        let month_to_date = month.get(category_id).copied().unwrap_or(Decimal::ZERO);
        let limit = self
            .limits
            .check_limit(user_id, category_id, month_to_date)
            .await
            .context("Failed to check limit")?;
        info!(%base_amount, %month_to_date, limit_exceeded = limit.exceeded, "Recorded expense");

        Ok(RecordedExpense {
            base_amount,
            month_to_date,
            over_limit: limit.over_by,
            limit_exceeded: limit.exceeded,
        })
    }
}
