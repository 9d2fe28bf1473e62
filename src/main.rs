use anyhow::Result;
use chrono::NaiveDate;
use clap::{CommandFactory, Parser, Subcommand};
use finbot::core::{Period, UserId};
use finbot::core::log::init_logging;
use rust_decimal::Decimal;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl From<Commands> for finbot::AppCommand {
    fn from(cmd: Commands) -> finbot::AppCommand {
        match cmd {
            Commands::Rate { currency, date } => finbot::AppCommand::Rate {
                currency: currency.to_uppercase(),
                date,
            },
            Commands::Add {
                user_id,
                category,
                amount,
                currency,
            } => finbot::AppCommand::Add {
                user_id,
                category: category.to_uppercase(),
                amount,
                currency: currency.map(|c| c.to_uppercase()),
            },
            Commands::Limit {
                user_id,
                category,
                amount,
                currency,
            } => finbot::AppCommand::Limit {
                user_id,
                category: category.to_uppercase(),
                amount,
                currency: currency.map(|c| c.to_uppercase()),
            },
            Commands::Report {
                user_id,
                period,
                currency,
            } => finbot::AppCommand::Report {
                user_id,
                period,
                currency: currency.map(|c| c.to_uppercase()),
            },
            Commands::Sync => finbot::AppCommand::Sync,
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Show the multiplier of a currency against the base currency
    Rate {
        currency: String,
        /// Day of the rate, defaults to today (YYYY-MM-DD)
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
    /// Record an expense
    Add {
        user_id: UserId,
        category: String,
        amount: Decimal,
        /// Currency of the amount, defaults to the base currency
        #[arg(long)]
        currency: Option<String>,
    },
    /// Set a category's spending limit for the current month
    Limit {
        user_id: UserId,
        category: String,
        amount: Decimal,
        /// Currency of the amount, defaults to the base currency
        #[arg(long)]
        currency: Option<String>,
    },
    /// Display spend per category
    Report {
        user_id: UserId,
        /// week, month or year
        #[arg(short, long, default_value = "month")]
        period: Period,
        /// Currency of the report, defaults to the base currency
        #[arg(long)]
        currency: Option<String>,
    },
    /// Keep today's rates fresh until interrupted
    Sync,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose)?;

    let result = match cli.command {
        Some(Commands::Setup) => match cli.config_path.as_deref() {
            Some(path) => finbot::cli::setup::setup_at_path(path),
            None => finbot::cli::setup::setup(),
        },
        Some(cmd) => finbot::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
