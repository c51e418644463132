use anyhow::Result;
use chrono::{Local, NaiveDateTime};
use clap::Parser;
use libtally::parser::parse_timestamp;
use libtally::{
    BalanceSummary, CostBasisMethod, Currency, Item, Ledger, Options, PeriodSummary, RatePolicy,
};
use log::debug;

use std::path::PathBuf;
use std::process;

#[derive(Parser, Debug)]
#[command(name = "tally")]
#[command(about = "Balances, conversions and share positions of a plain text ledger")]
struct Cli {
    /// Ledger file to read, `include`s are followed.
    book: PathBuf,

    /// Compute as of this point in time (`YYYY-MM-DD` or `YYYY-MM-DDTHH:MM`).
    #[arg(long, value_parser = parse_timestamp)]
    now: Option<NaiveDateTime>,

    /// Report in this currency instead of the ledger's default.
    #[arg(long)]
    currency: Option<Currency>,

    /// Skip exchange rates dated after `--now`.
    #[arg(long)]
    gated_rates: bool,

    /// Restart the cost basis whenever a position is sold out.
    #[arg(long)]
    reset_cost_basis: bool,
}

impl Cli {
    fn options(&self, now: NaiveDateTime) -> Options {
        let mut options = Options::at(now);
        if let Some(currency) = self.currency {
            options = options.with_default_currency(currency);
        }
        if self.gated_rates {
            options = options.with_rate_policy(RatePolicy::Gated);
        }
        if self.reset_cost_basis {
            options = options.with_cost_basis(CostBasisMethod::ResetWhenFlat);
        }
        options
    }
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let now = cli.now.unwrap_or_else(|| Local::now().naive_local());
    debug!("computing {} as of {}", cli.book.display(), now);

    let items = libtally::parse_file(&cli.book)?;
    let ledger = Ledger::compute(&items, cli.options(now))?;

    print_accounts(&ledger);
    print_summary(&items, &ledger, now)
}

fn print_accounts(ledger: &Ledger) {
    for account in ledger.accounts().iter() {
        let status = if account.active { "" } else { " (closed)" };
        println!(
            "{} {} {}{}",
            account.reference(),
            account.balance,
            account.currency,
            status
        );

        let shares = match account.shares.as_ref() {
            Some(shares) => shares,
            None => continue,
        };
        for (company, position) in shares {
            println!(
                "  {} shares={} basis={} value={} return={} dividends={}",
                company,
                position.shares_held,
                position.cost_basis.round_dp(2),
                position.market_value.round_dp(2),
                position.total_return.round_dp(2),
                position.dividends.round_dp(2),
            );
        }
    }
}

fn print_summary(items: &[Item], ledger: &Ledger, now: NaiveDateTime) -> Result<()> {
    let balance = BalanceSummary::of(ledger)?;
    println!();
    println!(
        "cash {} {}, equity {} {}, total {} {} ({} converted)",
        balance.cash.round_dp(2),
        balance.currency,
        balance.equity.round_dp(2),
        balance.currency,
        balance.total.round_dp(2),
        balance.currency,
        balance.converted
    );

    let month = PeriodSummary::month(items, ledger, now)?;
    println!(
        "this month: expenses {} revenues {} net {} ({}% spent)",
        month.expenses.round_dp(2),
        month.revenues.round_dp(2),
        month.net().round_dp(2),
        month.expense_ratio()?.round_dp(1)
    );

    if let Some(budget) = ledger.config().budget {
        println!(
            "budget: {} left, {} per day",
            budget.available(&month)?.round_dp(2),
            budget.daily_cap(&month, now)?.round_dp(2)
        );
    }
    Ok(())
}
