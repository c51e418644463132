use crate::account::{AccountKind, AccountRef};
use crate::amount::{checked_sum, diff_less_than, Currency, Money};
use crate::loader::SourceLocation;
use crate::parser::{located, next, parse_timestamp, parse_with, Locator, Rule};
use crate::statement::{parse_next, MatchPattern};
use crate::tag::{ShareTag, Tag, Tags};
use crate::LedgerError;

use anyhow::{anyhow, Result};
use chrono::NaiveDateTime;
use log::debug;
use pest::iterators::Pair;
use rust_decimal::Decimal;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Relative tolerance between the converted source and the destination amount
/// of a cross-currency transfer.
pub const ALLOWED_CONVERSION_DIFFERENCE: Decimal = Decimal::from_parts(5, 0, 0, false, 3);

/// Who is on the other end of a leg.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Owner {
    Owned(AccountRef),
    /// A counterparty without a tracked balance, e.g. a shop or an employer.
    External(String),
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Owned(account) => write!(f, "{}", account),
            Owner::External(label) => f.write_str(label),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Leg {
    pub owner: Owner,
    /// Always set for owned legs, never for external ones.
    pub money: Option<Money>,
    pub location: SourceLocation,
}

impl Leg {
    pub fn owned(account: AccountRef, money: Money, location: SourceLocation) -> Self {
        Self {
            owner: Owner::Owned(account),
            money: Some(money),
            location,
        }
    }

    pub fn external<S: Into<String>>(label: S, location: SourceLocation) -> Self {
        Self {
            owner: Owner::External(label.into()),
            money: None,
            location,
        }
    }

    fn parse(token: Pair<'_, Rule>, location: SourceLocation) -> Result<Leg> {
        match token.as_rule() {
            Rule::owned_leg => {
                let mut pairs = token.into_inner();
                let account = parse_next!(AccountRef, pairs);
                let money = parse_next!(Money, pairs);
                Ok(Leg::owned(account, money, location))
            }
            Rule::external_leg => {
                let label = token.as_str().trim();
                if AccountRef::is_owned(label) {
                    return Err(LedgerError::syntax(
                        &location,
                        format!("expected `<amount> <currency>` after account: {}", label),
                    ));
                }
                Ok(Leg::external(label, location))
            }
            _ => Err(anyhow!(format!("unexpected leg: {}", token.as_str()))),
        }
    }

    pub fn account(&self) -> Option<&AccountRef> {
        match &self.owner {
            Owner::Owned(account) => Some(account),
            Owner::External(_) => None,
        }
    }

    pub fn label(&self) -> Option<&str> {
        match &self.owner {
            Owner::Owned(_) => None,
            Owner::External(label) => Some(label),
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self.owner, Owner::Owned(_))
    }

    /// Signed amount, zero for external legs.
    pub fn value(&self) -> Decimal {
        self.money.map(|m| m.amount).unwrap_or_default()
    }

    pub fn currency(&self) -> Option<Currency> {
        self.money.map(|m| m.currency)
    }
}

/// The statement keyword a transaction was written with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Keyword {
    Expense,
    Revenue,
    Transfer,
    Dividend,
}

impl FromStr for Keyword {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ex" => Ok(Keyword::Expense),
            "rx" => Ok(Keyword::Revenue),
            "tx" => Ok(Keyword::Transfer),
            "dividend" => Ok(Keyword::Dividend),
            _ => Err(anyhow!(format!("unknown transaction keyword: {}", s))),
        }
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Keyword::Expense => "ex",
            Keyword::Revenue => "rx",
            Keyword::Transfer => "tx",
            Keyword::Dividend => "dividend",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxKind {
    Expense,
    Revenue,
    /// Cash moved between owned accounts.
    Transfer,
    /// Shares bought, sold or moved; a `tx` carrying a `shares:` tag.
    Equity,
    Dividend { company: String },
}

/// Where a transaction came from. Anything but `Ledger` was emitted by the
/// parser on behalf of another statement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    Ledger,
    /// Revenue mirror of a `dividend`, seen by summaries but never applied.
    DividendRevenue,
    /// The fee of a cash transfer, booked as an expense.
    TransferFee,
}

/// Sources are in `ins`, destinations in `outs`.
#[derive(Clone, Debug, PartialEq)]
pub struct Transaction {
    pub kind: TxKind,
    pub timestamp: NaiveDateTime,
    pub ins: Vec<Leg>,
    pub outs: Vec<Leg>,
    pub tags: Tags,
    pub origin: Origin,
    pub location: SourceLocation,
}

impl Transaction {
    pub fn effective_date(&self) -> NaiveDateTime {
        self.tags.effective_date().copied().unwrap_or(self.timestamp)
    }

    pub fn legs(&self) -> impl Iterator<Item = &Leg> {
        self.ins.iter().chain(self.outs.iter())
    }

    pub fn owned_legs(&self) -> impl Iterator<Item = (&AccountRef, Money)> {
        self.legs()
            .filter_map(|leg| leg.account().zip(leg.money))
    }

    /// The external label of an expense or revenue.
    pub fn counterparty(&self) -> Option<&str> {
        self.legs().find_map(Leg::label)
    }

    pub fn labels(&self) -> BTreeSet<String> {
        self.tags.labels()
    }

    pub(crate) fn parse(
        token: Pair<'_, Rule>,
        locator: &Locator<'_>,
        patterns: &[MatchPattern],
    ) -> Result<Vec<Transaction>> {
        let location = locator.at(&token);
        let keyword = match token.as_rule() {
            Rule::expense_statement => Keyword::Expense,
            Rule::revenue_statement => Keyword::Revenue,
            Rule::transfer_statement => Keyword::Transfer,
            Rule::dividend_statement => return dividend(token, locator, patterns),
            _ => return Err(anyhow!(format!("unexpected token: {}", token.as_str()))),
        };

        let mut pairs = token.into_inner();
        let timestamp = parse_timestamp(next(&mut pairs, "timestamp")?.as_str())?;
        let legs = next(&mut pairs, "legs")?
            .into_inner()
            .map(|leg| {
                let at = locator.at(&leg);
                Leg::parse(leg, at.clone()).map_err(|e| located(&at, e))
            })
            .collect::<Result<Vec<_>>>()?;
        let mut tags = match pairs.next() {
            Some(block) => Tags::new(parse_with(block, locator)?),
            None => Tags::default(),
        };
        apply_patterns(patterns, keyword, legs.iter().map(|l| &l.owner), &mut tags);

        let record = Record {
            timestamp,
            legs,
            tags,
            location,
        };
        match keyword {
            Keyword::Expense => expense(record),
            Keyword::Revenue => revenue(record),
            Keyword::Transfer => transfer(record),
            Keyword::Dividend => unreachable!(),
        }
    }
}

fn apply_patterns<'o, I>(patterns: &[MatchPattern], keyword: Keyword, owners: I, tags: &mut Tags)
where
    I: Iterator<Item = &'o Owner> + Clone,
{
    for pattern in patterns {
        if pattern.matches(keyword, owners.clone()) {
            tags.extend(pattern.tags.iter().cloned());
        }
    }
}

/// A parsed `ex`/`rx`/`tx` body, not yet validated.
struct Record {
    timestamp: NaiveDateTime,
    legs: Vec<Leg>,
    tags: Tags,
    location: SourceLocation,
}

impl Record {
    fn into_transaction(self, kind: TxKind, ins: Vec<Leg>, outs: Vec<Leg>) -> Transaction {
        Transaction {
            kind,
            timestamp: self.timestamp,
            ins,
            outs,
            tags: self.tags,
            origin: Origin::Ledger,
            location: self.location,
        }
    }
}

/// Negative owned legs are sources, everything else a destination.
fn bucket(legs: Vec<Leg>) -> (Vec<Leg>, Vec<Leg>) {
    legs.into_iter().partition(|leg| leg.value() < Decimal::ZERO)
}

fn external_and_owned(record: &mut Record, what: &str) -> Result<(Leg, Vec<Leg>)> {
    let (owned, mut external): (Vec<Leg>, Vec<Leg>) =
        record.legs.drain(..).partition(Leg::is_owned);
    if external.len() != 1 {
        return Err(LedgerError::semantic(
            &record.location,
            format!(
                "{} needs exactly one external account, found {}",
                what,
                external.len()
            ),
        ));
    }
    if owned.is_empty() {
        return Err(LedgerError::semantic(
            &record.location,
            format!("{} needs at least one owned account", what),
        ));
    }
    Ok((external.remove(0), owned))
}

fn expense(mut record: Record) -> Result<Vec<Transaction>> {
    let (payee, owned) = external_and_owned(&mut record, "expense")?;
    if let Some(leg) = owned.iter().find(|leg| leg.value() >= Decimal::ZERO) {
        return Err(LedgerError::semantic(
            &leg.location,
            format!(
                "expense from {} must be negative, got {}",
                leg.owner,
                leg.value()
            ),
        ));
    }

    let (ins, mut outs) = bucket(owned);
    outs.push(payee);
    Ok(vec![record.into_transaction(TxKind::Expense, ins, outs)])
}

fn revenue(mut record: Record) -> Result<Vec<Transaction>> {
    let (payer, owned) = external_and_owned(&mut record, "revenue")?;
    let (mut ins, outs) = bucket(owned);
    ins.push(payer);
    Ok(vec![record.into_transaction(TxKind::Revenue, ins, outs)])
}

fn transfer(record: Record) -> Result<Vec<Transaction>> {
    if let Some(leg) = record.legs.iter().find(|leg| !leg.is_owned()) {
        return Err(LedgerError::semantic(
            &leg.location,
            format!("invalid account for transfer (not owned): {}", leg.owner),
        ));
    }
    if record.legs.len() < 2 {
        return Err(LedgerError::semantic(
            &record.location,
            "transfer needs at least two accounts",
        ));
    }

    let fee = record.tags.fee().copied();
    if let Some(shares) = record.tags.shares().cloned() {
        return equity(record, shares, fee);
    }

    let (mut ins, outs) = bucket(record.legs.clone());
    if ins.is_empty() || outs.is_empty() {
        return Err(LedgerError::semantic(
            &record.location,
            "transfer needs a source (negative) and a destination leg",
        ));
    }
    let source = ins[0].clone();
    let source_account = source.account().cloned().ok_or(anyhow!("unowned source"))?;
    let source_currency = source.currency().ok_or(anyhow!("source without currency"))?;
    check_fee(&record, fee, source_currency)?;
    let fee_amount = fee.map(|f| f.amount).unwrap_or_default();

    let currencies: BTreeSet<Currency> = record.legs.iter().filter_map(Leg::currency).collect();
    if currencies.len() == 1 {
        check_balanced(&record, fee_amount, source_currency)?;
    } else {
        check_conversion(&record, &ins, &outs, fee_amount)?;
    }

    let mut transactions = Vec::new();
    if let (Some(fee), false) = (fee, fee_amount.is_zero()) {
        if let Some(money) = ins[0].money.as_mut() {
            money.amount = money
                .amount
                .checked_add(fee.amount)
                .ok_or_else(|| LedgerError::overflow(&record.location))?;
        }
        let intermediary = record
            .tags
            .intermediary()
            .cloned()
            .ok_or(anyhow!("fee without intermediary"))?;
        let mut tags = vec![Tag::Labels(record.tags.labels().into_iter().collect())];
        if let Some(date) = record.tags.effective_date() {
            tags.push(Tag::EffectiveDate(*date));
        }
        debug!(
            "{}: transfer fee of {} paid to {} booked as expense",
            record.location, fee, intermediary
        );
        transactions.push(Transaction {
            kind: TxKind::Expense,
            timestamp: record.timestamp,
            ins: vec![Leg::owned(source_account, -fee, source.location.clone())],
            outs: vec![Leg::external(intermediary, record.location.clone())],
            tags: Tags::new(tags),
            origin: Origin::TransferFee,
            location: record.location.clone(),
        });
    }

    transactions.insert(0, record.into_transaction(TxKind::Transfer, ins, outs));
    Ok(transactions)
}

fn equity(record: Record, shares: ShareTag, fee: Option<Money>) -> Result<Vec<Transaction>> {
    if record.legs.len() != 2 {
        return Err(LedgerError::semantic(
            &record.location,
            format!(
                "equity transaction needs exactly two accounts, found {}",
                record.legs.len()
            ),
        ));
    }
    let currencies: BTreeSet<Currency> = record.legs.iter().filter_map(Leg::currency).collect();
    if currencies.len() != 1 {
        return Err(LedgerError::semantic(
            &record.location,
            format!(
                "currencies do not match on equity transaction: {}",
                currencies
                    .iter()
                    .map(Currency::code)
                    .collect::<Vec<_>>()
                    .join(" != ")
            ),
        ));
    }
    if shares.count.is_zero() {
        return Err(LedgerError::semantic(
            &record.location,
            format!("amount of shares of {} must not be 0", shares.company),
        ));
    }

    let (ins, outs) = bucket(record.legs.clone());
    if ins.len() != 1 || outs.len() != 1 {
        return Err(LedgerError::semantic(
            &record.location,
            "equity transaction needs a source (negative) and a destination leg",
        ));
    }
    let (source, destination) = (&ins[0], &outs[0]);
    let is_equity = |leg: &Leg| leg.account().map(|a| a.kind) == Some(AccountKind::Equity);
    let buying = is_equity(destination);
    if !buying && !is_equity(source) {
        return Err(LedgerError::semantic(
            &record.location,
            format!(
                "equity transaction from {} to {} has no equity account",
                source.owner, destination.owner
            ),
        ));
    }
    if buying != (shares.count > Decimal::ZERO) {
        return Err(LedgerError::semantic(
            &record.location,
            format!(
                "share count {} of {} does not match a transfer from {} to {}",
                shares.count, shares.company, source.owner, destination.owner
            ),
        ));
    }

    let currency = source.currency().ok_or(anyhow!("source without currency"))?;
    check_fee(&record, fee, currency)?;
    check_balanced(
        &record,
        fee.map(|f| f.amount).unwrap_or_default(),
        currency,
    )?;

    Ok(vec![record.into_transaction(TxKind::Equity, ins, outs)])
}

fn check_fee(record: &Record, fee: Option<Money>, source_currency: Currency) -> Result<()> {
    let fee = match fee {
        Some(fee) => fee,
        None => return Ok(()),
    };
    if fee.amount < Decimal::ZERO {
        return Err(LedgerError::semantic(
            &record.location,
            format!("fee must not be negative: {}", fee),
        ));
    }
    if record.tags.intermediary().is_none() {
        return Err(LedgerError::semantic(
            &record.location,
            format!("fee of {} without an intermediary", fee),
        ));
    }
    if fee.currency != source_currency {
        return Err(LedgerError::semantic(
            &record.location,
            format!(
                "mismatched fee currency: {} != {}",
                fee.currency, source_currency
            ),
        ));
    }
    Ok(())
}

/// Single currency legs plus the fee paid on top must net to zero.
fn check_balanced(record: &Record, fee: Decimal, currency: Currency) -> Result<()> {
    let left = checked_sum(record.legs.iter().map(Leg::value).chain([fee]))
        .ok_or_else(|| LedgerError::overflow(&record.location))?;
    if !left.is_zero() {
        return Err(LedgerError::semantic(
            &record.location,
            format!(
                "amounts are not balanced: {} {} left over (fee {} {})",
                left,
                currency,
                fee,
                currency
            ),
        ));
    }
    Ok(())
}

fn check_conversion(record: &Record, ins: &[Leg], outs: &[Leg], fee: Decimal) -> Result<()> {
    if ins.len() != 1 || outs.len() != 1 {
        return Err(LedgerError::semantic(
            &record.location,
            "cross-currency transfer needs exactly one source and one destination",
        ));
    }
    let (source, destination) = (&ins[0], &outs[0]);
    let (src, dst) = match (source.money, destination.money) {
        (Some(src), Some(dst)) => (src, dst),
        _ => return Err(anyhow!("transfer leg without amount")),
    };
    let rate = record.tags.rate().ok_or(LedgerError::semantic(
        &record.location,
        format!(
            "no rate on transfer from {} to {}",
            source.owner, destination.owner
        ),
    ))?;

    let overflow = || LedgerError::overflow(&record.location);
    let amount = src.amount.abs().checked_sub(fee).ok_or_else(overflow)?;
    let per_unit = rate
        .per_unit()
        .map_err(|e| LedgerError::semantic(&record.location, format!("{}", e)))?;
    let converted = if (rate.src, rate.dst) == (src.currency, dst.currency) {
        amount.checked_mul(per_unit).ok_or_else(overflow)?
    } else if (rate.src, rate.dst) == (dst.currency, src.currency) {
        amount.checked_div(per_unit).ok_or_else(overflow)?
    } else {
        return Err(LedgerError::semantic(
            &record.location,
            format!(
                "rate {}/{} does not apply to transfer from {} to {}",
                rate.src, rate.dst, src.currency, dst.currency
            ),
        ));
    };

    if !diff_less_than(converted, dst.amount, ALLOWED_CONVERSION_DIFFERENCE) {
        return Err(LedgerError::semantic(
            &record.location,
            format!(
                "discrepancy in transfer from {} to {}: {} != {} (== {} {})",
                source.owner,
                destination.owner,
                src,
                dst,
                converted.round_dp(4),
                dst.currency
            ),
        ));
    }
    Ok(())
}

fn dividend(
    token: Pair<'_, Rule>,
    locator: &Locator<'_>,
    patterns: &[MatchPattern],
) -> Result<Vec<Transaction>> {
    let location = locator.at(&token);
    let mut pairs = token.into_inner();
    let timestamp = parse_timestamp(next(&mut pairs, "timestamp")?.as_str())?;

    let source = next(&mut pairs, "dividend source")?;
    let source_location = locator.at(&source);
    let mut source = source.into_inner();
    let account = parse_next!(AccountRef, source);
    let company = next(&mut source, "company")?.as_str().to_string();

    let cash = next(&mut pairs, "dividend destination")?;
    let cash_location = locator.at(&cash);
    let cash = Leg::parse(cash, cash_location.clone()).map_err(|e| located(&cash_location, e))?;

    let mut tags = match pairs.next() {
        Some(block) => Tags::new(parse_with(block, locator)?),
        None => Tags::default(),
    };

    if account.kind != AccountKind::Equity {
        return Err(LedgerError::semantic(
            &source_location,
            format!("dividend source must be an equity account: {}", account),
        ));
    }
    let money = cash.money.ok_or(anyhow!("dividend without amount"))?;
    if money.amount <= Decimal::ZERO {
        return Err(LedgerError::semantic(
            &cash_location,
            format!("dividend must be positive, got {}", money),
        ));
    }

    let equity_leg = Leg::owned(account, -money, source_location);
    let owners = [equity_leg.owner.clone(), cash.owner.clone()];
    apply_patterns(patterns, Keyword::Dividend, owners.iter(), &mut tags);

    let paid = Transaction {
        kind: TxKind::Dividend { company },
        timestamp,
        ins: vec![equity_leg],
        outs: vec![cash],
        tags,
        origin: Origin::Ledger,
        location,
    };
    let revenue = Transaction {
        kind: TxKind::Revenue,
        origin: Origin::DividendRevenue,
        ..paid.clone()
    };
    Ok(vec![paid, revenue])
}

#[cfg(test)]
mod tests {
    use crate::amount::{Currency, Money};
    use crate::parser::parse_str;
    use crate::statement::Item;
    use crate::transaction::{Origin, Owner, Transaction, TxKind};
    use crate::LedgerError;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use anyhow::{anyhow, Result};

    fn transactions(input: &str) -> Result<Vec<Transaction>> {
        Ok(parse_str(input)?
            .into_iter()
            .filter_map(|item| match item {
                Item::Transaction(tx) => Some(tx),
                _ => None,
            })
            .collect())
    }

    fn semantic_message(input: &str) -> String {
        match parse_str(input).map_err(|e| e.downcast::<LedgerError>()) {
            Err(Ok(LedgerError::Semantic { message, .. })) => message,
            other => panic!("expected a semantic error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn expense_legs_are_bucketed() -> Result<()> {
        let txs = transactions(
            "ex 2021-01-01\nasset/checking -10.00 EUR\nliability/card -5.00 EUR\nBakery\nwith\ntags: food\nend\n",
        )?;
        let tx = txs.first().ok_or(anyhow!("no transaction"))?;
        assert_eq!(tx.kind, TxKind::Expense);
        assert_eq!(tx.ins.len(), 2);
        assert_eq!(tx.outs.len(), 1);
        assert_eq!(tx.outs[0].owner, Owner::External("Bakery".to_string()));
        assert_eq!(tx.counterparty(), Some("Bakery"));
        assert_eq!(tx.ins[1].location.line, 3);
        assert!(tx.labels().contains("food"));
        Ok(())
    }

    #[test]
    fn positive_expense_is_rejected() {
        let message = semantic_message("ex 2021-01-01\nasset/checking 10.00 EUR\nBakery\nend\n");
        assert!(message.starts_with("expense from asset/checking must be negative"));
    }

    #[test]
    fn expense_needs_one_payee() {
        let message = semantic_message(
            "ex 2021-01-01\nasset/checking -10.00 EUR\nBakery\nButcher\nend\n",
        );
        assert_eq!(message, "expense needs exactly one external account, found 2");
        let message = semantic_message("ex 2021-01-01\nBakery\nend\n");
        assert_eq!(message, "expense needs at least one owned account");
    }

    #[test]
    fn revenue_payer_goes_to_ins() -> Result<()> {
        let txs = transactions("rx 2021-01-25\nemployer\nasset/checking 100.00 EUR\nend\n")?;
        assert_eq!(txs[0].kind, TxKind::Revenue);
        assert_eq!(txs[0].ins[0].label(), Some("employer"));
        assert_eq!(txs[0].outs[0].value(), dec!(100.00));
        Ok(())
    }

    #[test]
    fn owned_prefix_without_amount_is_a_syntax_error() {
        let err = parse_str("ex 2021-01-01\nasset/checking\nBakery\nend\n").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LedgerError>(),
            Some(LedgerError::Syntax { location, .. }) if location.line == 2
        ));
    }

    #[test]
    fn transfer_must_balance() {
        let message = semantic_message(
            "tx 2021-01-01\nasset/checking -10.00 EUR\nasset/savings 9.00 EUR\nend\n",
        );
        assert!(message.starts_with("amounts are not balanced"));
    }

    #[test]
    fn transfer_legs_must_be_owned() {
        let message = semantic_message(
            "tx 2021-01-01\nasset/checking -10.00 EUR\nSomeone\nend\n",
        );
        assert_eq!(message, "invalid account for transfer (not owned): Someone");
    }

    #[test]
    fn transfer_fee_becomes_an_expense() -> Result<()> {
        let txs = transactions(
            "tx 2021-01-01\nasset/checking -101.00 EUR\nasset/savings 100.00 EUR\nwith\nfee: 1.00 EUR\nintermediary: Bank\ntags: savings\neffective_date: 2021-01-03\nend\n",
        )?;
        assert_eq!(txs.len(), 2);

        let transfer = &txs[0];
        assert_eq!(transfer.kind, TxKind::Transfer);
        assert_eq!(transfer.ins[0].value(), dec!(-100.00));
        let sum: Decimal = transfer.legs().map(|l| l.value()).sum();
        assert_eq!(sum, Decimal::ZERO);

        let fee = &txs[1];
        assert_eq!(fee.kind, TxKind::Expense);
        assert_eq!(fee.origin, Origin::TransferFee);
        assert_eq!(fee.ins[0].money, Some(Money::new(dec!(-1.00), Currency::EUR)));
        assert_eq!(fee.counterparty(), Some("Bank"));
        assert!(fee.labels().contains("savings"));
        assert_eq!(fee.effective_date(), transfer.effective_date());
        Ok(())
    }

    #[test]
    fn fee_needs_an_intermediary() {
        let message = semantic_message(
            "tx 2021-01-01\nasset/checking -101.00 EUR\nasset/savings 100.00 EUR\nwith\nfee: 1.00 EUR\nend\n",
        );
        assert_eq!(message, "fee of 1.00 EUR without an intermediary");
    }

    #[test]
    fn fee_in_foreign_currency() {
        let message = semantic_message(
            "tx 2021-01-01\nasset/checking -101.00 EUR\nasset/savings 100.00 EUR\nwith\nfee: 1.00 USD\nintermediary: Bank\nend\n",
        );
        assert_eq!(message, "mismatched fee currency: USD != EUR");
    }

    #[test]
    fn cross_currency_within_tolerance() -> Result<()> {
        let txs = transactions(
            "tx 2021-01-01\nasset/eur -100 EUR\nasset/pln 433.0 PLN\nwith\nrate: EUR/PLN 4.33\nend\n",
        )?;
        assert_eq!(txs.len(), 1);

        // the rate may be written in either direction
        transactions(
            "tx 2021-01-01\nasset/pln -433.0 PLN\nasset/eur 100 EUR\nwith\nrate: EUR/PLN 4.33\nend\n",
        )?;
        Ok(())
    }

    #[test]
    fn cross_currency_discrepancy() {
        let message = semantic_message(
            "tx 2021-01-01\nasset/eur -100 EUR\nasset/pln 500 PLN\nwith\nrate: EUR/PLN 4.33\nend\n",
        );
        assert!(message.starts_with("discrepancy in transfer from asset/eur to asset/pln"));
    }

    #[test]
    fn cross_currency_needs_a_rate() {
        let message = semantic_message(
            "tx 2021-01-01\nasset/eur -100 EUR\nasset/pln 433 PLN\nend\n",
        );
        assert_eq!(message, "no rate on transfer from asset/eur to asset/pln");
    }

    #[test]
    fn oversized_amounts_are_reported() {
        let max = "79228162514264337593543950335";
        let message = semantic_message(&format!(
            "tx 2021-01-01\nasset/eur -{} EUR\nasset/pln 1 PLN\nwith\nrate: EUR/PLN 4.33\nend\n",
            max
        ));
        assert_eq!(message, "amount overflow");

        let message = semantic_message(&format!(
            "tx 2021-01-01\nasset/a {max} EUR\nasset/b {max} EUR\nasset/c -1 EUR\nend\n",
            max = max
        ));
        assert_eq!(message, "amount overflow");
    }

    #[test]
    fn cross_currency_rate_with_units() -> Result<()> {
        transactions(
            "tx 2021-01-01\nasset/pln -350 PLN\nasset/jpy 10000 JPY\nwith\nrate: JPY/PLN 3.50 100\nend\n",
        )?;
        Ok(())
    }

    #[test]
    fn buying_shares() -> Result<()> {
        let txs = transactions(
            "tx 2021-01-01\nasset/usd -1005 USD\nequity/broker 1000 USD\nwith\nshares: ACME 10\nfee: 5 USD\nintermediary: Broker Inc\nend\n",
        )?;
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].kind, TxKind::Equity);
        assert_eq!(txs[0].ins[0].value(), dec!(-1005));
        Ok(())
    }

    #[test]
    fn share_count_must_match_direction() {
        let message = semantic_message(
            "tx 2021-01-01\nequity/broker -1000 USD\nasset/usd 1000 USD\nwith\nshares: ACME 10\nend\n",
        );
        assert!(message.starts_with("share count 10 of ACME does not match"));

        let message = semantic_message(
            "tx 2021-01-01\nasset/usd -1000 USD\nequity/broker 1000 USD\nwith\nshares: ACME 0\nend\n",
        );
        assert_eq!(message, "amount of shares of ACME must not be 0");
    }

    #[test]
    fn equity_needs_an_equity_account() {
        let message = semantic_message(
            "tx 2021-01-01\nasset/usd -1000 USD\nasset/other 1000 USD\nwith\nshares: ACME 10\nend\n",
        );
        assert_eq!(
            message,
            "equity transaction from asset/usd to asset/other has no equity account"
        );
    }

    #[test]
    fn equity_in_one_currency() {
        let message = semantic_message(
            "tx 2021-01-01\nasset/eur -1000 EUR\nequity/broker 1000 USD\nwith\nshares: ACME 10\nend\n",
        );
        assert_eq!(message, "currencies do not match on equity transaction: EUR != USD");
    }

    #[test]
    fn dividend_emits_revenue() -> Result<()> {
        let txs = transactions(
            "dividend 2021-06-01\nequity/broker ACME\nasset/usd 50 USD\nend\n",
        )?;
        assert_eq!(txs.len(), 2);
        assert_eq!(
            txs[0].kind,
            TxKind::Dividend {
                company: "ACME".to_string()
            }
        );
        assert_eq!(txs[0].ins[0].value(), dec!(-50));
        assert_eq!(txs[0].outs[0].value(), dec!(50));
        assert_eq!(txs[1].kind, TxKind::Revenue);
        assert_eq!(txs[1].origin, Origin::DividendRevenue);
        Ok(())
    }

    #[test]
    fn dividend_from_cash_account() {
        let message = semantic_message(
            "dividend 2021-06-01\nasset/usd ACME\nasset/other 50 USD\nend\n",
        );
        assert_eq!(message, "dividend source must be an equity account: asset/usd");
    }

    #[test]
    fn match_patterns_apply_to_later_statements() -> Result<()> {
        let txs = transactions(
            "ex 2021-01-01\nasset/checking -1 EUR\nBakery\nend\n\
             match ex\nBakery\nwith\ntags: food\nend\n\
             ex 2021-01-02\nasset/checking -1 EUR\nBakery\nend\n\
             rx 2021-01-02\nBakery\nasset/checking 1 EUR\nend\n\
             match dividend\nequity/broker\nwith\ntags: passive\nend\n\
             dividend 2021-06-01\nequity/broker ACME\nasset/usd 50 USD\nend\n",
        )?;
        assert!(!txs[0].labels().contains("food"));
        assert!(txs[1].labels().contains("food"));
        assert!(!txs[2].labels().contains("food"));
        assert!(txs[3].labels().contains("passive"));
        assert!(txs[4].labels().contains("passive"));
        Ok(())
    }
}
