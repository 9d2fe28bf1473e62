pub mod cli;
pub mod core;
pub mod providers;
pub mod store;

#[cfg(test)]
mod testing;

pub use crate::core::config;

use crate::core::cache::spawn_sweeper;
use crate::core::{
    Cache, CurrencyExchange, ExpenseCalculator, ExpenseRecorder, Period, RateRefresher, UserId,
    today,
};
use crate::providers::abstract_api::AbstractApiProvider;
use crate::store::disk::DiskStore;
use anyhow::Result;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub enum AppCommand {
    Rate {
        currency: String,
        date: Option<NaiveDate>,
    },
    Add {
        user_id: UserId,
        category: String,
        amount: Decimal,
        currency: Option<String>,
    },
    Limit {
        user_id: UserId,
        category: String,
        amount: Decimal,
        currency: Option<String>,
    },
    Report {
        user_id: UserId,
        period: Period,
        currency: Option<String>,
    },
    Sync,
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("finbot starting...");

    let config = match config_path {
        Some(path) => config::AppConfig::load_from_path(path)?,
        None => config::AppConfig::load()?,
    };
    debug!(
        base_currency = %config.base_currency,
        currencies = ?config.currencies,
        "Loaded config"
    );

    let data_path = config.default_data_path()?;
    let store = Arc::new(DiskStore::open(&data_path)?);
    let cache: Arc<dyn Cache> = Arc::new(store.cache()?);

    let api = &config.providers.abstract_api;
    let provider = Arc::new(AbstractApiProvider::new(
        &api.base_url,
        &api.api_key,
        &config.base_currency,
        &config.currencies,
    )?);
    let exchange = Arc::new(CurrencyExchange::new(
        &config.base_currency,
        cache.clone(),
        store.clone(),
        provider,
        config.cache.rates_ttl(),
    ));

    let cancel = CancellationToken::new();
    let sweeper = spawn_sweeper(cache.clone(), config.cache.sweep_interval(), cancel.clone());

    let calculator = Arc::new(
        ExpenseCalculator::new(exchange.clone(), store.clone(), store.clone(), cache)
            .with_report_ttl(config.cache.report_ttl())
            .with_backfill((&config.backfill).into())
            .with_tracked_currencies(&config.currencies)
            .with_cancellation(cancel.clone()),
    );
    let recorder = ExpenseRecorder::new(
        exchange.clone(),
        store.clone(),
        store.clone(),
        calculator.clone(),
    );
    let base_currency = config.base_currency.clone();

    let result = match command {
        AppCommand::Rate { currency, date } => {
            cli::rate::run(&exchange, &currency, date.unwrap_or_else(today)).await
        }
        AppCommand::Add {
            user_id,
            category,
            amount,
            currency,
        } => {
            cli::add::run(
                &recorder,
                &base_currency,
                user_id,
                &category,
                amount,
                currency.as_deref().unwrap_or(&base_currency),
            )
            .await
        }
        AppCommand::Limit {
            user_id,
            category,
            amount,
            currency,
        } => {
            cli::limit::run(
                &recorder,
                &base_currency,
                user_id,
                &category,
                amount,
                currency.as_deref().unwrap_or(&base_currency),
            )
            .await
        }
        AppCommand::Report {
            user_id,
            period,
            currency,
        } => {
            cli::report::run(
                &calculator,
                user_id,
                period,
                currency.as_deref().unwrap_or(&base_currency),
            )
            .await
        }
        AppCommand::Sync => {
            let refresher =
                RateRefresher::new(exchange.clone(), &config.currencies, config.refresh_interval());
            cli::sync::run(refresher, cancel.clone()).await
        }
    };

    cancel.cancel();
    if let Err(e) = sweeper.await {
        warn!(error = %e, "Cache sweeper task failed");
    }
    result
}
