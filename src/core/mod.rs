//! Rate resolution, caching and expense aggregation

pub mod cache;
pub mod config;
pub mod exchange;
pub mod limits;
pub mod log;
pub mod period;
pub mod rates;
pub mod recorder;
pub mod refresher;
pub mod report;
pub mod transactions;

use chrono::{NaiveDate, Utc};

// Re-export main types for cleaner imports
pub use cache::{Cache, CacheError};
pub use exchange::{CurrencyExchange, ExchangeError};
pub use limits::{Limit, LimitCheck, LimitStore};
pub use period::Period;
pub use rates::{RateProvider, RateStore, RateTable};
pub use recorder::{ExpenseRecorder, RecordedExpense};
pub use refresher::RateRefresher;
pub use report::{BackfillPolicy, ExpenseCalculator};
pub use transactions::{Expenses, Transaction, TransactionStore, UserId};

/// Current calendar day in UTC, the day all rate and report keys use.
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}
