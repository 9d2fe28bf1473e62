use super::ui;
use crate::core::{ExpenseRecorder, UserId};
use anyhow::Result;
use rust_decimal::Decimal;

pub async fn run(
    recorder: &ExpenseRecorder,
    base_currency: &str,
    user_id: UserId,
    category: &str,
    amount: Decimal,
    currency: &str,
) -> Result<()> {
    let limit = recorder.set_limit(user_id, category, amount, currency).await?;

    println!(
        "Limit for {} set to {} {} until {}",
        category,
        ui::style_text(&ui::format_amount(limit.upper_border), ui::StyleType::TotalValue),
        base_currency,
        ui::style_text(&limit.until.date_naive().to_string(), ui::StyleType::Subtle)
    );
    Ok(())
}
