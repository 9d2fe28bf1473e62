use super::ui;
use crate::core::{ExpenseCalculator, Expenses, Period, UserId, today};
use anyhow::Result;
use comfy_table::Cell;
use rust_decimal::Decimal;
use tracing::warn;

/// A computed report ready for display.
pub struct ExpenseReport {
    pub user_id: UserId,
    pub period: Period,
    pub currency: String,
    pub expenses: Expenses,
}

impl ExpenseReport {
    pub fn total(&self) -> Decimal {
        self.expenses.values().copied().sum()
    }

    pub fn display_as_table(&self) -> String {
        let title = format!(
            "Expenses of user {} for the last {}",
            self.user_id, self.period
        );
        let mut output = format!("{}\n\n", ui::style_text(&title, ui::StyleType::Title));

        if self.expenses.is_empty() {
            output.push_str(&ui::style_text("No expenses", ui::StyleType::Subtle));
            return output;
        }

        let mut table = ui::new_styled_table();
        table.set_header(vec![
            ui::header_cell("Category"),
            ui::header_cell(&format!("Amount ({})", self.currency)),
        ]);

        let mut rows: Vec<(&String, &Decimal)> = self.expenses.iter().collect();
        rows.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        for (category, amount) in rows {
            table.add_row(vec![Cell::new(category), ui::amount_cell(*amount)]);
        }
        output.push_str(&table.to_string());

        output.push_str(&format!(
            "\n\nTotal ({}): {}",
            ui::style_text(&self.currency, ui::StyleType::TotalLabel),
            ui::style_text(&ui::format_amount(self.total()), ui::StyleType::TotalValue)
        ));
        output
    }
}

/// Prints the user's report, falling back to the base currency when
/// today's rate for `currency` cannot be resolved.
pub async fn run(
    calculator: &ExpenseCalculator,
    user_id: UserId,
    period: Period,
    currency: &str,
) -> Result<()> {
    let exchange = calculator.exchange();
    let mut currency = currency.to_string();
    if let Err(e) = exchange.get_multiplier(&currency, today()).await {
        warn!(error = %e, "Falling back to base currency");
        println!(
            "{}",
            ui::style_text(
                &format!(
                    "Cannot convert to {currency}, showing {}",
                    exchange.base_currency()
                ),
                ui::StyleType::Warning
            )
        );
        currency = exchange.base_currency().to_string();
    }

    let expenses = calculator.calc_by_period(user_id, period, &currency).await?;
    let report = ExpenseReport {
        user_id,
        period,
        currency,
        expenses,
    };
    println!("{}", report.display_as_table());
    Ok(())
}
