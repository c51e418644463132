use chrono::NaiveDateTime;
use indexmap::IndexMap;
use rust_decimal::Decimal;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::amount::Currency;
use crate::loader::SourceLocation;
use crate::parser::Rule;
use crate::statement::{AccountClose, AccountOpen, Item};
use crate::valuation::{EquityTotals, SharePosition};
use crate::LedgerError;
use pest::iterators::Pair;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AccountKind {
    Asset,
    Liability,
    Equity,
}

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountKind::Asset => "asset",
            AccountKind::Liability => "liability",
            AccountKind::Equity => "equity",
        }
    }

    /// Asset and liability accounts hold cash only.
    pub fn is_cash(&self) -> bool {
        !matches!(self, AccountKind::Equity)
    }
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asset" => Ok(AccountKind::Asset),
            "liability" => Ok(AccountKind::Liability),
            "equity" => Ok(AccountKind::Equity),
            _ => Err(anyhow::Error::msg(format!(
                "input `{}' is not a valid account kind",
                s
            ))),
        }
    }
}

/// `<kind>/<name>`, e.g. `asset/checking`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AccountRef {
    pub kind: AccountKind,
    pub name: String,
}

impl AccountRef {
    pub fn new<S: Into<String>>(kind: AccountKind, name: S) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    /// Parse an `owned` token.
    pub fn parse(token: Pair<'_, Rule>) -> anyhow::Result<AccountRef> {
        let mut pairs = token.into_inner();
        let kind = crate::parser::next(&mut pairs, "account kind")?;
        let name = crate::parser::next(&mut pairs, "account name")?;
        Ok(AccountRef::new(kind.as_str().parse()?, name.as_str()))
    }

    /// `true` if `s` names an owned account, i.e. starts with `asset/`,
    /// `liability/` or `equity/`.
    pub fn is_owned(s: &str) -> bool {
        s.split_once('/')
            .map(|(kind, _)| kind.parse::<AccountKind>().is_ok())
            .unwrap_or(false)
    }
}

impl fmt::Display for AccountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

impl FromStr for AccountRef {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, name) = s.split_once('/').ok_or(anyhow::Error::msg(format!(
            "input `{}' is not a valid account",
            s
        )))?;
        if name.is_empty() {
            return Err(anyhow::Error::msg(format!(
                "input `{}' is not a valid account",
                s
            )));
        }
        Ok(AccountRef::new(kind.parse()?, name))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Account {
    pub kind: AccountKind,
    pub name: String,
    pub currency: Currency,
    pub balance: Decimal,
    pub active: bool,
    pub tags: BTreeSet<String>,
    pub opened_at: NaiveDateTime,
    pub opened: SourceLocation,
    /// Only equity accounts track share positions.
    pub shares: Option<BTreeMap<String, SharePosition>>,
    /// Written by the valuation pass.
    pub totals: Option<EquityTotals>,
}

impl Account {
    fn from_open(open: &AccountOpen) -> Self {
        let is_equity = open.account.kind == AccountKind::Equity;
        Self {
            kind: open.account.kind,
            name: open.account.name.clone(),
            currency: open.opening_balance.currency,
            balance: open.opening_balance.amount,
            active: true,
            tags: open.tags.clone(),
            opened_at: open.timestamp,
            opened: open.location.clone(),
            shares: is_equity.then(BTreeMap::new),
            totals: None,
        }
    }

    pub fn reference(&self) -> AccountRef {
        AccountRef::new(self.kind, self.name.clone())
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn position(&self, company: &str) -> Option<&SharePosition> {
        self.shares.as_ref().and_then(|shares| shares.get(company))
    }
}

/// All accounts of a ledger, in the order they were opened.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AccountRegistry {
    accounts: IndexMap<AccountRef, Account>,
}

impl AccountRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn open(&mut self, open: &AccountOpen) -> anyhow::Result<()> {
        if let Some(existing) = self.accounts.get(&open.account) {
            return Err(LedgerError::semantic(
                &open.location,
                format!(
                    "account {} already exists, opened at {}",
                    open.account, existing.opened
                ),
            ));
        }

        self.accounts
            .insert(open.account.clone(), Account::from_open(open));
        Ok(())
    }

    pub fn close(&mut self, close: &AccountClose) -> anyhow::Result<()> {
        self.accounts
            .get_mut(&close.account)
            .map(|account| account.active = false)
            .ok_or(LedgerError::semantic(
                &close.location,
                format!("cannot close unknown account {}", close.account),
            ))
    }

    pub fn get(&self, account: &AccountRef) -> Option<&Account> {
        self.accounts.get(account)
    }

    pub fn get_mut(&mut self, account: &AccountRef) -> Option<&mut Account> {
        self.accounts.get_mut(account)
    }

    /// Like [`get`][Self::get], but an unknown account is an error at `location`.
    pub fn lookup(
        &self,
        account: &AccountRef,
        location: &SourceLocation,
    ) -> anyhow::Result<&Account> {
        self.accounts.get(account).ok_or(LedgerError::semantic(
            location,
            format!("unknown account {}", account),
        ))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Account> {
        self.accounts.values_mut()
    }

    pub fn of_kind(&self, kind: AccountKind) -> impl Iterator<Item = &Account> {
        self.accounts.values().filter(move |a| a.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// The account tagged `main`, or else the earliest opened asset account.
    pub fn main_account(&self) -> Option<&Account> {
        self.iter().find(|a| a.has_tag("main")).or_else(|| {
            self.of_kind(AccountKind::Asset)
                .min_by_key(|a| a.opened_at)
        })
    }
}

/// Build the registry from every `open` and `close`, in file order.
pub fn setup_accounts(registry: &mut AccountRegistry, items: &[Item]) -> anyhow::Result<()> {
    for item in items {
        match item {
            Item::AccountOpen(open) => registry.open(open)?,
            Item::AccountClose(close) => registry.close(close)?,
            _ => {}
        }
    }
    Ok(())
}
