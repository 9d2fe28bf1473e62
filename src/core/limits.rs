//! Monthly spending limits per category

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Months, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::transactions::UserId;

/// Upper border of spend for one category, in base currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Limit {
    pub upper_border: Decimal,
    pub until: DateTime<Utc>,
}

impl Limit {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.until > now
    }
}

/// Result of comparing spend with a limit.
///
/// `over_by` is `spent - upper_border`, negative while there is headroom.
/// Without an active limit it is zero and never exceeded.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LimitCheck {
    pub over_by: Decimal,
    pub exceeded: bool,
}

impl LimitCheck {
    pub fn against(limit: Option<&Limit>, spent: Decimal, now: DateTime<Utc>) -> Self {
        match limit.filter(|limit| limit.is_active(now)) {
            Some(limit) => LimitCheck {
                over_by: spent - limit.upper_border,
                exceeded: limit.upper_border < spent,
            },
            None => LimitCheck::default(),
        }
    }
}

#[async_trait]
pub trait LimitStore: Send + Sync {
    /// Sets the limit of a category, replacing any previous one.
    async fn set_limit(&self, user_id: UserId, category_id: &str, limit: Limit) -> Result<()>;

    async fn get_limit(&self, user_id: UserId, category_id: &str) -> Result<Option<Limit>>;

    async fn check_limit(
        &self,
        user_id: UserId,
        category_id: &str,
        spent: Decimal,
    ) -> Result<LimitCheck> {
        let limit = self.get_limit(user_id, category_id).await?;
        Ok(LimitCheck::against(limit.as_ref(), spent, Utc::now()))
    }
}

/// Midnight UTC of the first day of the month after `now`.
pub fn start_of_next_month(now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    now.date_naive()
        .with_day(1)?
        .checked_add_months(Months::new(1))?
        .and_hms_opt(0, 0, 0)
        .map(|start| start.and_utc())
}
