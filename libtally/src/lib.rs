//! Tally - A plain text, multi-currency personal ledger
//! ---
//!
//! Tally reads a line oriented ledger language (`open`, `ex`, `rx`, `tx`, `dividend`,
//! `balance`, `currency_rates`, ...) into an ordered list of [`Item`]s, then replays
//! them chronologically to compute account balances, currency conversions and, for
//! equity accounts, cost basis, market value and total return of every share position.
//!
//! The computation is deterministic: the point in time used to decide which items are
//! already effective is always passed in explicitly through [`Options`].
//!
//! ```no_run
//! use libtally::{Ledger, Options};
//! use chrono::NaiveDate;
//!
//! # fn main() -> anyhow::Result<()> {
//! let now = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
//! let ledger = libtally::load("book.ledger".as_ref(), Options::at(now))?;
//! for account in ledger.accounts().iter() {
//!     println!("{} {} {}", account.reference(), account.balance, account.currency);
//! }
//! # Ok(())
//! # }
//! ```

extern crate pest;
#[macro_use]
extern crate pest_derive;

/// Accounts and the registry built from `open` and `close` statements.
///
/// Accounts are keyed by [`AccountRef`][account::AccountRef], e.g. `asset/checking`.
/// Unlike transactions, opening and closing is evaluated in file order, so a
/// duplicate `open` is always reported against the first one written.
pub mod account;

pub mod amount;
pub mod config;
pub mod currency;

/// The balance engine and the computed, read-only ledger state.
pub mod ledger;

/// Reading ledger files, following `include` directives.
pub mod loader;

/// Our main parser entrypoints.
pub mod parser;

pub mod statement;
pub mod summary;
pub mod tag;
pub mod transaction;
pub mod valuation;

use std::path::Path;

pub use account::{Account, AccountKind, AccountRef, AccountRegistry};
pub use amount::{Currency, Money};
pub use config::{Budget, Config, Options, RatePolicy};
pub use currency::CurrencyBasket;
pub use ledger::Ledger;
pub use loader::SourceLocation;
pub use parser::{parse, parse_file, parse_str};
pub use statement::Item;
pub use summary::{BalanceSummary, PeriodSummary};
pub use transaction::{Leg, Origin, Owner, Transaction, TxKind};
pub use valuation::{CostBasisMethod, SharePosition};

/// Errors that make a ledger unusable.
///
/// Every variant is fatal: there is no partially applied ledger. Functions in this
/// crate return [`anyhow::Result`], use `downcast_ref::<LedgerError>()` to inspect
/// the kind of failure.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Malformed statement, keyword or tag.
    #[error("{location}: syntax error: {message}")]
    Syntax {
        location: SourceLocation,
        message: String,
    },

    /// Well formed input that does not make sense, e.g. unbalanced legs or an
    /// account opened twice.
    #[error("{location}: {message}")]
    Semantic {
        location: SourceLocation,
        message: String,
    },

    #[error("no currency pair {from}/{to}")]
    MissingRate { from: Currency, to: Currency },
}

impl LedgerError {
    pub fn syntax<S: Into<String>>(location: &SourceLocation, message: S) -> anyhow::Error {
        LedgerError::Syntax {
            location: location.clone(),
            message: message.into(),
        }
        .into()
    }

    pub fn semantic<S: Into<String>>(location: &SourceLocation, message: S) -> anyhow::Error {
        LedgerError::Semantic {
            location: location.clone(),
            message: message.into(),
        }
        .into()
    }

    /// A sum or product of amounts at `location` that no longer fits a decimal.
    pub fn overflow(location: &SourceLocation) -> anyhow::Error {
        Self::semantic(location, "amount overflow")
    }

    pub fn location(&self) -> Option<&SourceLocation> {
        match self {
            LedgerError::Syntax { location, .. } | LedgerError::Semantic { location, .. } => {
                Some(location)
            }
            LedgerError::MissingRate { .. } => None,
        }
    }
}

/// Read, parse and compute the ledger rooted at `path`.
pub fn load(path: &Path, options: Options) -> anyhow::Result<Ledger> {
    let items = parse_file(path)?;
    Ledger::compute(&items, options)
}
