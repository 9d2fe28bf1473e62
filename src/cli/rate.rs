use super::ui;
use crate::core::CurrencyExchange;
use anyhow::{Context, Result};
use chrono::NaiveDate;

pub async fn run(exchange: &CurrencyExchange, currency: &str, date: NaiveDate) -> Result<()> {
    let multiplier = exchange
        .get_multiplier(currency, date)
        .await
        .with_context(|| format!("Failed to resolve {currency} rate for {date}"))?;

    println!(
        "{} 1 {} = {} {}",
        ui::style_text(&date.to_string(), ui::StyleType::Subtle),
        exchange.base_currency(),
        ui::style_text(&multiplier.normalize().to_string(), ui::StyleType::TotalValue),
        currency
    );
    Ok(())
}
