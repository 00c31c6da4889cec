use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use tracing::info;

use kakei::client::{QueryClient, QueryResult};
use kakei::config::ClientConfig;
use kakei::expense::{Expense, ExpenseApi, ListExpensesParams, RecordExpenseRequest};
use kakei::logging;
use kakei::transport::http::HttpTransport;

/// Record and list expenses.
#[derive(Debug, Parser)]
#[command(name = "kakei", version, about)]
struct Cli {
    /// Path to a TOML configuration file (defaults to $KAKEI_CONFIG).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print recorded expenses.
    List {
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        offset: Option<u32>,
    },
    /// Record an expense, then print the refreshed listing.
    Record {
        /// Amount in yen.
        #[arg(long)]
        amount: i64,
        #[arg(long)]
        category: String,
        #[arg(long, default_value = "")]
        memo: String,
        /// Day of the expense, YYYY-MM-DD (defaults to today).
        #[arg(long)]
        date: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    logging::init_logging()?;

    let cli = Cli::parse();
    let config =
        ClientConfig::load(cli.config.as_deref()).wrap_err("failed to load configuration")?;
    let transport = HttpTransport::from_config(&config)?;
    let client = QueryClient::with_config(transport, config.query_config());
    let api = ExpenseApi::register(&client)?;

    match cli.command {
        Command::List { limit, offset } => {
            let listing = api.list(ListExpensesParams::new(limit, offset)).await?;
            print_listing(&listing)
        }
        Command::Record {
            amount,
            category,
            memo,
            date,
        } => {
            let date = date.unwrap_or_else(|| {
                chrono::Local::now()
                    .date_naive()
                    .format("%Y-%m-%d")
                    .to_string()
            });
            let request = RecordExpenseRequest::new(amount, category, memo, date);

            let mut listing = api.watch_list(ListExpensesParams::default())?;
            listing.settled().await;

            let recorded = api.record(&request).await.wrap_err("failed to record expense")?;
            info!(id = %recorded.id, "expense recorded");

            let refreshed = listing
                .settled()
                .await
                .ok_or_else(|| eyre!("expense listing went away"))?;
            print_listing(&refreshed)
        }
    }
}

fn print_listing(listing: &QueryResult<Vec<Expense>>) -> Result<()> {
    if let Some(err) = listing.error() {
        let reason = err.message().map_or_else(|| err.to_string(), str::to_string);
        return Err(eyre!("failed to fetch expenses: {reason}"));
    }
    let expenses = listing.data().map(Vec::as_slice).unwrap_or_default();
    if expenses.is_empty() {
        println!("no expenses recorded");
        return Ok(());
    }

    println!("{:<10}  {:<12}  {:<20}  {:>10}", "date", "category", "memo", "amount");
    for expense in expenses {
        println!(
            "{:<10}  {:<12}  {:<20}  {:>9}円",
            expense.date, expense.category, expense.memo, expense.amount
        );
    }
    Ok(())
}
