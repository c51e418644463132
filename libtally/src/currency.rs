use crate::amount::{Currency, Money};
use crate::tag::RateTag;
use crate::LedgerError;

use anyhow::{anyhow, Result};
use rust_decimal::Decimal;

use std::collections::BTreeMap;

/// `units` of the source currency are worth `rate` of the destination.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rate {
    pub rate: Decimal,
    pub units: Decimal,
}

impl Rate {
    pub fn per_unit(&self) -> Result<Decimal> {
        crate::amount::per_unit(self.rate, self.units)
    }
}

/// Directional exchange rates. Only the latest rate of a pair or its reverse
/// is kept, there is no history.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CurrencyBasket {
    rates: BTreeMap<(Currency, Currency), Rate>,
}

impl CurrencyBasket {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn set(&mut self, rate: &RateTag) {
        self.rates.remove(&(rate.dst, rate.src));
        self.rates.insert(
            (rate.src, rate.dst),
            Rate {
                rate: rate.rate,
                units: rate.units,
            },
        );
    }

    pub fn get(&self, from: Currency, to: Currency) -> Option<&Rate> {
        self.rates.get(&(from, to))
    }

    /// How much one unit of `from` is worth in `to`, falling back to the
    /// inverse of the `to/from` pair.
    pub fn rate(&self, from: Currency, to: Currency) -> Result<Decimal> {
        if from == to {
            return Ok(Decimal::ONE);
        }
        if let Some(rate) = self.rates.get(&(from, to)) {
            return rate.per_unit();
        }
        if let Some(rate) = self.rates.get(&(to, from)) {
            return Decimal::ONE
                .checked_div(rate.per_unit()?)
                .ok_or(anyhow!(format!("rate {}/{} is out of range", to, from)));
        }
        Err(LedgerError::MissingRate { from, to }.into())
    }

    pub fn convert(&self, money: Money, to: Currency) -> Result<Money> {
        let amount = money
            .amount
            .checked_mul(self.rate(money.currency, to)?)
            .ok_or(anyhow!(format!("amount overflow converting {} to {}", money, to)))?;
        Ok(Money::new(amount, to))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(Currency, Currency), &Rate)> {
        self.rates.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}
