use crate::parser::Rule;
use anyhow::{anyhow, Result};
use pest::iterators::Pair;
use rust_decimal::Decimal;

use std::fmt;
use std::str::FromStr;

/// Currencies a ledger may use. Anything else is rejected while parsing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Currency {
    CHF,
    CZK,
    EUR,
    GBP,
    JPY,
    NOK,
    PLN,
    USD,
}

impl Currency {
    pub const ACCEPTED: [Currency; 8] = [
        Currency::CHF,
        Currency::CZK,
        Currency::EUR,
        Currency::GBP,
        Currency::JPY,
        Currency::NOK,
        Currency::PLN,
        Currency::USD,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Currency::CHF => "CHF",
            Currency::CZK => "CZK",
            Currency::EUR => "EUR",
            Currency::GBP => "GBP",
            Currency::JPY => "JPY",
            Currency::NOK => "NOK",
            Currency::PLN => "PLN",
            Currency::USD => "USD",
        }
    }
}

impl FromStr for Currency {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Currency::ACCEPTED
            .iter()
            .find(|c| c.code() == s)
            .copied()
            .ok_or(anyhow!(format!("invalid currency: {}", s)))
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Money {
    pub amount: Decimal,
    pub currency: Currency,
}

impl Money {
    pub fn new(amount: Decimal, currency: Currency) -> Self {
        Self { amount, currency }
    }

    pub fn zero(currency: Currency) -> Self {
        Self::new(Decimal::ZERO, currency)
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    /// Parse an `amount` token: `<number> <currency>`.
    pub fn parse(token: Pair<'_, Rule>) -> Result<Money> {
        if token.as_rule() != Rule::amount {
            return Err(anyhow!(format!(
                "unexpected token for amount: '{}'",
                token.as_str()
            )));
        }

        let mut amount = token.into_inner();
        Ok(Self {
            amount: parse_decimal(
                amount
                    .next()
                    .ok_or(anyhow!(format!("invalid nominal: '{}'", amount.as_str())))?,
            )?,
            currency: amount
                .next()
                .ok_or(anyhow!(format!("invalid currency: '{}'", amount.as_str())))?
                .as_str()
                .parse()?,
        })
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

impl std::ops::Neg for Money {
    type Output = Money;

    fn neg(self) -> Self::Output {
        Money::new(-self.amount, self.currency)
    }
}

pub fn parse_decimal(token: Pair<'_, Rule>) -> Result<Decimal> {
    let text = token.as_str();
    Decimal::from_str(text.strip_prefix('+').unwrap_or(text))
        .map_err(|e| anyhow!(format!("invalid number '{}': {}", text, e)))
}

/// `None` once the running total no longer fits.
pub fn checked_sum<I: IntoIterator<Item = Decimal>>(values: I) -> Option<Decimal> {
    values
        .into_iter()
        .try_fold(Decimal::ZERO, |sum, value| sum.checked_add(value))
}

/// `rate / units`, refusing results that overflow or round down to zero.
pub fn per_unit(rate: Decimal, units: Decimal) -> Result<Decimal> {
    match rate.checked_div(units) {
        Some(per_unit) if !per_unit.is_zero() => Ok(per_unit),
        _ => Err(anyhow!(format!(
            "rate {} per {} units is out of range",
            rate, units
        ))),
    }
}

/// `true` when `b` lies strictly within `a ± a·tolerance`.
/// Bounds that do not fit count as a mismatch.
pub fn diff_less_than(a: Decimal, b: Decimal, tolerance: Decimal) -> bool {
    let scaled = |factor: Option<Decimal>| factor.and_then(|f| a.checked_mul(f));
    let (a_more, a_less) = match (
        scaled(Decimal::ONE.checked_add(tolerance)),
        scaled(Decimal::ONE.checked_sub(tolerance)),
    ) {
        (Some(more), Some(less)) => (more, less),
        _ => return false,
    };
    let (low, high) = if a_less <= a_more {
        (a_less, a_more)
    } else {
        (a_more, a_less)
    };
    b > low && b < high
}
