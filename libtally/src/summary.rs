//! Read-only figures over a computed [`Ledger`], all in its default currency.

use crate::account::AccountKind;
use crate::amount::{Currency, Money};
use crate::config::Budget;
use crate::ledger::Ledger;
use crate::statement::Item;
use crate::transaction::{Leg, Transaction, TxKind};
use crate::LedgerError;

use anyhow::{anyhow, Context, Result};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;

#[derive(Clone, Debug, PartialEq)]
pub struct BalanceSummary {
    pub currency: Currency,
    /// Asset and liability balances.
    pub cash: Decimal,
    /// Market value of every share position.
    pub equity: Decimal,
    pub total: Decimal,
    /// How many accounts are not kept in `currency`.
    pub converted: usize,
}

impl BalanceSummary {
    pub fn of(ledger: &Ledger) -> Result<BalanceSummary> {
        let currency = ledger.default_currency();
        let mut summary = BalanceSummary {
            currency,
            cash: Decimal::ZERO,
            equity: Decimal::ZERO,
            total: Decimal::ZERO,
            converted: 0,
        };

        for account in ledger.accounts().iter() {
            let amount = match account.kind {
                AccountKind::Asset | AccountKind::Liability => account.balance,
                AccountKind::Equity => account
                    .totals
                    .as_ref()
                    .map(|t| t.market_value)
                    .unwrap_or_default(),
            };
            let value = ledger
                .convert(Money::new(amount, account.currency), currency)
                .with_context(|| format!("cannot value {}", account.reference()))?
                .amount;
            if account.currency != currency {
                summary.converted += 1;
            }
            let sum = match account.kind {
                AccountKind::Equity => &mut summary.equity,
                _ => &mut summary.cash,
            };
            *sum = sum
                .checked_add(value)
                .ok_or_else(|| overflow("balances"))?;
        }

        summary.total = summary
            .cash
            .checked_add(summary.equity)
            .ok_or_else(|| overflow("balances"))?;
        Ok(summary)
    }
}

/// Expenses and revenues effective within `[from, to)`.
#[derive(Clone, Debug, PartialEq)]
pub struct PeriodSummary {
    pub currency: Currency,
    pub from: NaiveDateTime,
    pub to: NaiveDateTime,
    /// Money spent, as a positive number.
    pub expenses: Decimal,
    pub revenues: Decimal,
}

impl PeriodSummary {
    /// Items effective after the ledger's `now` are left out, as in the ledger itself.
    pub fn collect(
        items: &[Item],
        ledger: &Ledger,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<PeriodSummary> {
        let mut summary = PeriodSummary {
            currency: ledger.default_currency(),
            from,
            to,
            expenses: Decimal::ZERO,
            revenues: Decimal::ZERO,
        };

        for item in items {
            let tx = match item {
                Item::Transaction(tx) => tx,
                _ => continue,
            };
            let when = tx.effective_date();
            if when < from || when >= to || when > ledger.now() {
                continue;
            }
            let (sum, value) = match tx.kind {
                TxKind::Expense => (&mut summary.expenses, expense_value(tx, ledger)?),
                TxKind::Revenue => (&mut summary.revenues, owned_value(tx, &tx.outs, ledger)?),
                _ => continue,
            };
            *sum = sum
                .checked_add(value)
                .ok_or_else(|| LedgerError::overflow(&tx.location))?;
        }
        Ok(summary)
    }

    /// The calendar month `now` falls in.
    pub fn month(items: &[Item], ledger: &Ledger, now: NaiveDateTime) -> Result<PeriodSummary> {
        let first = month_start(now.date())?;
        let next = next_month_start(now.date())?;
        Self::collect(items, ledger, midnight(first)?, midnight(next)?)
    }

    pub fn net(&self) -> Decimal {
        self.revenues - self.expenses
    }

    /// Expenses as a percentage of revenues; 100 when there were no revenues.
    pub fn expense_ratio(&self) -> Result<Decimal> {
        if self.revenues.is_zero() {
            return Ok(Decimal::ONE_HUNDRED);
        }
        self.expenses
            .checked_div(self.revenues)
            .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
            .ok_or_else(|| overflow("the expense ratio"))
    }

    pub fn daily_average(&self) -> Decimal {
        let days = (self.to - self.from).num_days().max(1);
        self.expenses / Decimal::from(days)
    }
}

/// Owned legs of `legs` in the default currency.
fn owned_value(tx: &Transaction, legs: &[Leg], ledger: &Ledger) -> Result<Decimal> {
    let mut total = Decimal::ZERO;
    for money in legs.iter().filter(|leg| leg.is_owned()).filter_map(|leg| leg.money) {
        let value = ledger
            .in_default_currency(money)
            .with_context(|| format!("cannot value transaction at {}", tx.location))?
            .amount;
        total = total
            .checked_add(value)
            .ok_or_else(|| LedgerError::overflow(&tx.location))?;
    }
    Ok(total)
}

/// `calculate_as:` replaces the converted value of the owned legs.
fn expense_value(tx: &Transaction, ledger: &Ledger) -> Result<Decimal> {
    let value = match tx.tags.calculate_as() {
        Some(money) => ledger
            .in_default_currency(*money)
            .with_context(|| format!("cannot value transaction at {}", tx.location))?
            .amount,
        None => owned_value(tx, &tx.ins, ledger)?,
    };
    Ok(value.abs())
}

fn overflow(what: &str) -> anyhow::Error {
    anyhow!(format!("amount overflow computing {}", what))
}

fn month_start(date: NaiveDate) -> Result<NaiveDate> {
    date.with_day(1)
        .ok_or(anyhow!(format!("no first day in month of {}", date)))
}

fn next_month_start(date: NaiveDate) -> Result<NaiveDate> {
    let (year, month) = match date.month() {
        12 => (date.year() + 1, 1),
        m => (date.year(), m + 1),
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or(anyhow!(format!("no month after {}", date)))
}

fn midnight(date: NaiveDate) -> Result<NaiveDateTime> {
    date.and_hms_opt(0, 0, 0)
        .ok_or(anyhow!(format!("no midnight on {}", date)))
}

impl Budget {
    /// What is left to spend in the period.
    pub fn available(&self, period: &PeriodSummary) -> Result<Decimal> {
        let limit = match self {
            Budget::Fixed(limit) => Some(*limit),
            Budget::Percent(percent) => period
                .revenues
                .checked_mul(*percent)
                .and_then(|share| share.checked_div(Decimal::ONE_HUNDRED)),
        };
        limit
            .and_then(|limit| limit.checked_sub(period.expenses))
            .ok_or_else(|| overflow("the budget"))
    }

    /// What may be spent per day for the rest of the month, today included.
    pub fn daily_cap(&self, period: &PeriodSummary, now: NaiveDateTime) -> Result<Decimal> {
        let today = now.date();
        let days_left = (next_month_start(today)? - today).num_days().max(1);
        Ok(self.available(period)? / Decimal::from(days_left))
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{Budget, Options};
    use crate::ledger::Ledger;
    use crate::parser::parse_str;
    use crate::summary::{BalanceSummary, PeriodSummary};
    use chrono::{NaiveDate, NaiveDateTime};
    use rust_decimal_macros::dec;

    use anyhow::{anyhow, Result};

    fn ts(y: i32, m: u32, d: u32) -> Result<NaiveDateTime> {
        NaiveDate::from_ymd_opt(y, m, d)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .ok_or(anyhow!("invalid date"))
    }

    const BOOK: &str = r#"
set default_currency PLN
currency_rates 2021-01-01
EUR/PLN 4.00
USD/PLN 4.00
end
open account 2021-01-01 asset checking
balance: 1000.00 PLN
end
open account 2021-01-01 asset euro
balance: 100.00 EUR
end
open account 2021-01-01 liability card
balance: -200.00 PLN
end
open account 2021-01-01 asset usd
balance: 2000 USD
end
open account 2021-01-01 equity broker
balance: 0 USD
end
tx 2021-01-02
asset/usd -1000 USD
equity/broker 1000 USD
with
shares: ACME 10
end
balance 2021-01-03
equity/broker ACME 110 USD
end
rx 2021-01-10
employer
asset/checking 3000.00 PLN
end
ex 2021-01-11
asset/checking -150.00 PLN
Grocery
end
ex 2021-01-12
asset/euro -10.00 EUR
Cafe
end
ex 2021-01-13
asset/checking -80.00 PLN
Restaurant
with
calculate_as: 50.00 PLN
end
dividend 2021-01-20
equity/broker ACME
asset/usd 25 USD
end
ex 2021-02-01
asset/checking -999.00 PLN
Landlord
end
"#;

    #[test]
    fn balance_summary() -> Result<()> {
        let items = parse_str(BOOK)?;
        let ledger = Ledger::compute(&items, Options::at(ts(2021, 1, 31)?))?;
        let summary = BalanceSummary::of(&ledger)?;

        // 1000 + 3000 - 150 - 80, 90 EUR, -200, 1025 USD
        assert_eq!(summary.cash, dec!(3770) + dec!(360) - dec!(200) + dec!(4100));
        // 10 shares at 110 USD
        assert_eq!(summary.equity, dec!(4400));
        assert_eq!(summary.total, summary.cash + summary.equity);
        assert_eq!(summary.converted, 3);
        Ok(())
    }

    #[test]
    fn period_summary() -> Result<()> {
        let items = parse_str(BOOK)?;
        let now = ts(2021, 1, 31)?;
        let ledger = Ledger::compute(&items, Options::at(now))?;
        let month = PeriodSummary::month(&items, &ledger, now)?;

        assert_eq!(month.from, ts(2021, 1, 1)?);
        assert_eq!(month.to, ts(2021, 2, 1)?);
        // 150 + 40 + 50 (calculated as)
        assert_eq!(month.expenses, dec!(240));
        // salary and dividend
        assert_eq!(month.revenues, dec!(3100));
        assert_eq!(month.net(), dec!(2860));
        assert_eq!(month.expense_ratio()?, dec!(240) / dec!(3100) * dec!(100));
        assert_eq!(month.daily_average(), dec!(240) / dec!(31));
        Ok(())
    }

    #[test]
    fn budgets() -> Result<()> {
        let items = parse_str(BOOK)?;
        let now = ts(2021, 1, 22)?;
        let ledger = Ledger::compute(&items, Options::at(now))?;
        let month = PeriodSummary::month(&items, &ledger, now)?;

        let fixed = Budget::Fixed(dec!(1000));
        assert_eq!(fixed.available(&month)?, dec!(760));
        // 22nd to 31st
        assert_eq!(fixed.daily_cap(&month, now)?, dec!(76));

        let percent = Budget::Percent(dec!(10));
        assert_eq!(percent.available(&month)?, dec!(70));
        Ok(())
    }
}
