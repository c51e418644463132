use crate::account::{AccountKind, AccountRef};
use crate::amount::Money;
use crate::loader::SourceLocation;
use crate::parser::{located, next, parse_timestamp, parse_with, Locator, Rule};
use crate::tag::{parse_rate, RateTag, Tag, Tags};
use crate::transaction::{Keyword, Owner, Transaction};
use crate::LedgerError;

use anyhow::Result;
use chrono::NaiveDateTime;
use pest::iterators::Pair;

use std::collections::BTreeSet;

macro_rules! parse_next {
    ($parser:ident, $pairs:ident) => {
        $parser::parse(crate::parser::next(&mut $pairs, stringify!($parser))?)?
    };
}

pub(crate) use parse_next;

/// One unit of the intermediate representation. Items are created once by the
/// parser and never mutated afterwards.
#[derive(Clone, Debug, PartialEq)]
pub enum Item {
    AccountOpen(AccountOpen),
    AccountClose(AccountClose),
    BalanceAssertion(BalanceAssertion),
    Transaction(Transaction),
    ExchangeRates(ExchangeRateSet),
    Config(ConfigDirective),
    Group(Group),
}

impl Item {
    /// Config and groups are timeless, they sort before everything else.
    pub fn timestamp(&self) -> NaiveDateTime {
        match self {
            Item::AccountOpen(open) => open.timestamp,
            Item::AccountClose(close) => close.timestamp,
            Item::BalanceAssertion(assertion) => assertion.timestamp,
            Item::Transaction(tx) => tx.timestamp,
            Item::ExchangeRates(rates) => rates.timestamp,
            Item::Config(_) | Item::Group(_) => NaiveDateTime::default(),
        }
    }

    pub fn effective_date(&self) -> NaiveDateTime {
        match self {
            Item::Transaction(tx) => tx.effective_date(),
            _ => self.timestamp(),
        }
    }

    pub fn location(&self) -> &SourceLocation {
        match self {
            Item::AccountOpen(open) => &open.location,
            Item::AccountClose(close) => &close.location,
            Item::BalanceAssertion(assertion) => &assertion.location,
            Item::Transaction(tx) => &tx.location,
            Item::ExchangeRates(rates) => &rates.location,
            Item::Config(config) => &config.location,
            Item::Group(group) => &group.location,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AccountOpen {
    pub timestamp: NaiveDateTime,
    pub account: AccountRef,
    pub opening_balance: Money,
    pub tags: BTreeSet<String>,
    pub location: SourceLocation,
}

impl AccountOpen {
    pub(crate) fn parse(token: Pair<'_, Rule>, locator: &Locator<'_>) -> Result<AccountOpen> {
        let location = locator.at(&token);
        let mut pairs = token.into_inner();
        let timestamp = parse_timestamp(next(&mut pairs, "timestamp")?.as_str())?;
        let kind: AccountKind = next(&mut pairs, "account kind")?.as_str().parse()?;
        let name = next(&mut pairs, "account name")?.as_str();
        let opening_balance = parse_next!(Money, pairs);
        let tags = match pairs.next() {
            Some(block) => Tags::new(parse_with(block, locator)?).labels(),
            None => BTreeSet::new(),
        };

        Ok(AccountOpen {
            timestamp,
            account: AccountRef::new(kind, name),
            opening_balance,
            tags,
            location,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AccountClose {
    pub timestamp: NaiveDateTime,
    pub account: AccountRef,
    pub location: SourceLocation,
}

impl AccountClose {
    pub(crate) fn parse(token: Pair<'_, Rule>, locator: &Locator<'_>) -> Result<AccountClose> {
        let location = locator.at(&token);
        let mut pairs = token.into_inner();
        let timestamp = parse_timestamp(next(&mut pairs, "timestamp")?.as_str())?;
        let kind: AccountKind = next(&mut pairs, "account kind")?.as_str().parse()?;
        let name = next(&mut pairs, "account name")?.as_str();

        Ok(AccountClose {
            timestamp,
            account: AccountRef::new(kind, name),
            location,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Assertion {
    /// The balance of an asset or liability account.
    Cash(Money),
    /// The current price of one share held in an equity account.
    SharePrice { company: String, price: Money },
}

#[derive(Clone, Debug, PartialEq)]
pub struct BalanceEntry {
    pub account: AccountRef,
    pub assertion: Assertion,
    pub location: SourceLocation,
}

impl BalanceEntry {
    fn parse(token: Pair<'_, Rule>, location: SourceLocation) -> Result<BalanceEntry> {
        let mut pairs = token.into_inner();
        let account = parse_next!(AccountRef, pairs);
        let value = next(&mut pairs, "balance")?;

        let assertion = match (account.kind, value.as_rule()) {
            (AccountKind::Equity, Rule::price_entry) => {
                let mut price = value.into_inner();
                let company = next(&mut price, "company")?.as_str().to_string();
                Assertion::SharePrice {
                    company,
                    price: parse_next!(Money, price),
                }
            }
            (AccountKind::Equity, _) => {
                return Err(LedgerError::syntax(
                    &location,
                    format!(
                        "balance of {} must name a company and a share price",
                        account
                    ),
                ))
            }
            (_, Rule::amount) => Assertion::Cash(Money::parse(value)?),
            _ => {
                return Err(LedgerError::syntax(
                    &location,
                    format!("balance of {} must be an amount", account),
                ))
            }
        };

        Ok(BalanceEntry {
            account,
            assertion,
            location,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BalanceAssertion {
    pub timestamp: NaiveDateTime,
    pub entries: Vec<BalanceEntry>,
    pub location: SourceLocation,
}

impl BalanceAssertion {
    pub(crate) fn parse(
        token: Pair<'_, Rule>,
        locator: &Locator<'_>,
    ) -> Result<BalanceAssertion> {
        let location = locator.at(&token);
        let mut pairs = token.into_inner();
        let timestamp = parse_timestamp(next(&mut pairs, "timestamp")?.as_str())?;
        let entries = pairs
            .map(|entry| {
                let at = locator.at(&entry);
                BalanceEntry::parse(entry, at.clone()).map_err(|e| located(&at, e))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(BalanceAssertion {
            timestamp,
            entries,
            location,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExchangeRateSet {
    pub timestamp: NaiveDateTime,
    pub rates: Vec<RateTag>,
    pub location: SourceLocation,
}

impl ExchangeRateSet {
    pub(crate) fn parse(token: Pair<'_, Rule>, locator: &Locator<'_>) -> Result<ExchangeRateSet> {
        let location = locator.at(&token);
        let mut pairs = token.into_inner();
        let timestamp = parse_timestamp(next(&mut pairs, "timestamp")?.as_str())?;
        let rates = pairs
            .map(|line| {
                let at = locator.at(&line);
                let raw = line.as_str().to_string();
                parse_rate(line.into_inner())
                    .map_err(|e| LedgerError::syntax(&at, format!("{}: {}", raw, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ExchangeRateSet {
            timestamp,
            rates,
            location,
        })
    }
}

/// `set <key> <value>`
#[derive(Clone, Debug, PartialEq)]
pub struct ConfigDirective {
    pub key: String,
    pub value: String,
    pub location: SourceLocation,
}

impl ConfigDirective {
    pub(crate) fn parse(token: Pair<'_, Rule>, locator: &Locator<'_>) -> Result<ConfigDirective> {
        let location = locator.at(&token);
        let mut pairs = token.into_inner();
        let key = next(&mut pairs, "config key")?.as_str().to_string();
        let value = next(&mut pairs, "config value")?.as_str().trim().to_string();
        Ok(ConfigDirective {
            key,
            value,
            location,
        })
    }
}

/// A named list of labels, kept for display purposes only.
#[derive(Clone, Debug, PartialEq)]
pub struct Group {
    pub name: String,
    pub members: Vec<String>,
    pub location: SourceLocation,
}

impl Group {
    pub(crate) fn parse(token: Pair<'_, Rule>, locator: &Locator<'_>) -> Result<Group> {
        let location = locator.at(&token);
        let mut pairs = token.into_inner();
        let name = next(&mut pairs, "group name")?.as_str().trim().to_string();
        let members = pairs.map(|m| m.as_str().trim().to_string()).collect();
        Ok(Group {
            name,
            members,
            location,
        })
    }
}

/// `match <keyword>` block: every later transaction of that keyword touching
/// one of `accounts` gets `tags` appended.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchPattern {
    pub keyword: Keyword,
    pub accounts: BTreeSet<String>,
    pub tags: Vec<Tag>,
}

impl MatchPattern {
    pub(crate) fn parse(token: Pair<'_, Rule>, locator: &Locator<'_>) -> Result<MatchPattern> {
        let mut pairs = token.into_inner();
        let keyword: Keyword = next(&mut pairs, "transaction keyword")?.as_str().parse()?;
        let mut accounts = BTreeSet::new();
        let mut tags = Vec::new();
        for pair in pairs {
            match pair.as_rule() {
                Rule::match_account => {
                    accounts.insert(pair.as_str().trim().to_string());
                }
                Rule::with_block => tags.extend(parse_with(pair, locator)?),
                _ => {}
            }
        }

        Ok(MatchPattern {
            keyword,
            accounts,
            tags,
        })
    }

    pub fn matches<'o, I>(&self, keyword: Keyword, mut owners: I) -> bool
    where
        I: Iterator<Item = &'o Owner>,
    {
        self.keyword == keyword && owners.any(|owner| self.accounts.contains(&owner.to_string()))
    }
}
