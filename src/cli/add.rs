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
    let recorded = recorder.record(user_id, category, amount, currency).await?;

    println!(
        "Recorded {} {} in {}",
        ui::style_text(&ui::format_amount(recorded.base_amount), ui::StyleType::TotalValue),
        base_currency,
        category
    );
    println!(
        "{} {} {}",
        ui::style_text("Spent this month:", ui::StyleType::TotalLabel),
        ui::format_amount(recorded.month_to_date),
        base_currency
    );
    if recorded.limit_exceeded {
        println!(
            "{}",
            ui::style_text(
                &format!(
                    "Monthly limit for {} exceeded by {} {}",
                    category,
                    ui::format_amount(recorded.over_limit),
                    base_currency
                ),
                ui::StyleType::Warning
            )
        );
    }
    Ok(())
}
