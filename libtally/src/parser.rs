use crate::loader::{ingest, ingest_str, LedgerLine, SourceLocation};
use crate::statement::{
    AccountClose, AccountOpen, BalanceAssertion, ConfigDirective, ExchangeRateSet, Group, Item,
    MatchPattern,
};
use crate::tag::Tag;
use crate::transaction::Transaction;
use crate::LedgerError;

use anyhow::{anyhow, Result};
use chrono::{NaiveDate, NaiveDateTime};
use log::debug;
use pest::error::{Error as PestError, LineColLocation};
use pest::iterators::{Pair, Pairs};
use pest::Parser;

use std::path::Path;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M";
pub const DAYSTAMP_FORMAT: &str = "%Y-%m-%d";

#[derive(Parser)]
#[grammar = "ledger.pest"]
pub struct LedgerParser;

pub fn parse_file(path: &Path) -> Result<Vec<Item>> {
    parse(&ingest(path)?)
}

pub fn parse_str(input: &str) -> Result<Vec<Item>> {
    parse(&ingest_str(input, "<input>")?)
}

/// Turn loaded lines into IR items, in file order.
pub fn parse(lines: &[LedgerLine]) -> Result<Vec<Item>> {
    let mut input = String::new();
    for line in lines {
        input.push_str(&line.text);
        input.push('\n');
    }

    let locator = Locator { lines };
    let mut ast = LedgerParser::parse(Rule::ledger, &input).map_err(|e| locator.syntax(e))?;
    let ledger = next(&mut ast, "ledger")?;

    let mut parser = StatementParser {
        locator: &locator,
        patterns: Vec::new(),
        items: Vec::new(),
    };
    for statement in ledger.into_inner() {
        if statement.as_rule() == Rule::EOI {
            continue;
        }
        let location = locator.at(&statement);
        parser
            .statement(statement)
            .map_err(|e| located(&location, e))?;
    }

    Ok(parser.items)
}

/// Maps positions in the joined parser input back to the lines they came from.
pub(crate) struct Locator<'l> {
    lines: &'l [LedgerLine],
}

impl<'l> Locator<'l> {
    fn line(&self, line: usize) -> SourceLocation {
        let idx = line.saturating_sub(1).min(self.lines.len().saturating_sub(1));
        self.lines
            .get(idx)
            .map(|l| l.location.clone())
            .unwrap_or_else(|| SourceLocation::new("<empty>", 0))
    }

    pub(crate) fn at(&self, pair: &Pair<'_, Rule>) -> SourceLocation {
        self.line(pair.as_span().start_pos().line_col().0)
    }

    fn syntax(&self, err: PestError<Rule>) -> anyhow::Error {
        let line = match err.line_col {
            LineColLocation::Pos((line, _)) | LineColLocation::Span((line, _), _) => line,
        };
        let location = self.line(line);
        let text = self
            .lines
            .get(line.saturating_sub(1))
            .map(|l| l.text.as_str())
            .unwrap_or("end of input");
        LedgerError::syntax(&location, format!("{} in `{}`", err.variant.message(), text))
    }
}

/// Errors raised by helpers that know nothing about locations become syntax
/// errors at `location`.
pub(crate) fn located(location: &SourceLocation, err: anyhow::Error) -> anyhow::Error {
    if err.downcast_ref::<LedgerError>().is_some() {
        err
    } else {
        LedgerError::syntax(location, format!("{}", err))
    }
}

struct StatementParser<'p> {
    locator: &'p Locator<'p>,
    patterns: Vec<MatchPattern>,
    items: Vec<Item>,
}

impl<'p> StatementParser<'p> {
    fn statement(&mut self, statement: Pair<'_, Rule>) -> Result<()> {
        let locator = self.locator;
        match statement.as_rule() {
            Rule::set_statement => self
                .items
                .push(Item::Config(ConfigDirective::parse(statement, locator)?)),
            Rule::open_statement => self
                .items
                .push(Item::AccountOpen(AccountOpen::parse(statement, locator)?)),
            Rule::close_statement => self
                .items
                .push(Item::AccountClose(AccountClose::parse(statement, locator)?)),
            Rule::rates_statement => self
                .items
                .push(Item::ExchangeRates(ExchangeRateSet::parse(statement, locator)?)),
            Rule::balance_statement => self
                .items
                .push(Item::BalanceAssertion(BalanceAssertion::parse(statement, locator)?)),
            Rule::group_statement => self
                .items
                .push(Item::Group(Group::parse(statement, locator)?)),
            Rule::match_statement => {
                let pattern = MatchPattern::parse(statement, locator)?;
                debug!("registered {} pattern for {:?}", pattern.keyword, pattern.accounts);
                self.patterns.push(pattern);
            }
            Rule::expense_statement
            | Rule::revenue_statement
            | Rule::transfer_statement
            | Rule::dividend_statement => {
                let transactions = Transaction::parse(statement, locator, &self.patterns)?;
                self.items
                    .extend(transactions.into_iter().map(Item::Transaction));
            }
            _ => {
                return Err(anyhow!(format!(
                    "unexpected token: {}",
                    statement.as_str()
                )))
            }
        };
        Ok(())
    }
}

/// Parse every tag line of a `with_block`, each at its own location.
pub(crate) fn parse_with(block: Pair<'_, Rule>, locator: &Locator<'_>) -> Result<Vec<Tag>> {
    block
        .into_inner()
        .map(|tag| {
            let location = locator.at(&tag);
            Tag::parse(tag, &location)
        })
        .collect()
}

pub fn next<'a>(pairs: &mut Pairs<'a, Rule>, what: &str) -> Result<Pair<'a, Rule>> {
    pairs
        .next()
        .ok_or(anyhow!(format!("invalid next token, expected {}", what)))
}

/// `YYYY-MM-DDTHH:MM`, or `YYYY-MM-DD` for midnight.
pub fn parse_timestamp(s: &str) -> Result<NaiveDateTime> {
    if let Ok(ts) = NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT) {
        return Ok(ts);
    }
    NaiveDate::parse_from_str(s, DAYSTAMP_FORMAT)
        .map_err(|e| anyhow!(format!("invalid timestamp '{}': {}", s, e)))?
        .and_hms_opt(0, 0, 0)
        .ok_or(anyhow!(format!("invalid timestamp '{}'", s)))
}
