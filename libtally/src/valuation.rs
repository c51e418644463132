//! Share positions of equity accounts and what they are worth.
//!
//! The balance engine only records legs, dividends and prices. Everything
//! derived from them (cost basis, market value, total return) is computed once
//! the replay is done, by [`revalue`].

use crate::account::AccountRegistry;

use anyhow::{anyhow, Result};
use chrono::NaiveDateTime;
use rust_decimal::Decimal;

/// How the cost basis of a position is accumulated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CostBasisMethod {
    /// Every leg ever recorded counts, even after the position was sold out.
    #[default]
    Cumulative,
    /// Start over whenever the running share count returns to zero.
    ResetWhenFlat,
}

/// One buy, sell or move of shares.
#[derive(Clone, Debug, PartialEq)]
pub struct ShareLeg {
    /// Cash value of the leg, always positive.
    pub value: Decimal,
    /// Positive when shares came in, negative when they went out.
    pub signed_shares: Decimal,
    pub fee: Decimal,
    pub timestamp: NaiveDateTime,
}

impl ShareLeg {
    /// `value` carrying the direction of the shares.
    pub fn signed_value(&self) -> Decimal {
        if self.signed_shares < Decimal::ZERO {
            -self.value
        } else {
            self.value
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SharePosition {
    pub shares_held: Decimal,
    pub cost_basis: Decimal,
    pub fees: Decimal,
    pub dividends: Decimal,
    pub last_price_per_share: Decimal,
    pub market_value: Decimal,
    pub total_return: Decimal,
    pub legs: Vec<ShareLeg>,
}

impl SharePosition {
    /// `None`, with the position untouched, when a running total overflows.
    pub fn record(&mut self, leg: ShareLeg) -> Option<()> {
        let shares_held = self.shares_held.checked_add(leg.signed_shares)?;
        let fees = self.fees.checked_add(leg.fee)?;
        self.shares_held = shares_held;
        self.fees = fees;
        self.legs.push(leg);
        Some(())
    }

    pub fn cost_basis_with(&self, method: CostBasisMethod) -> Option<Decimal> {
        let mut held = Decimal::ZERO;
        let mut basis = Decimal::ZERO;
        for leg in &self.legs {
            basis = basis.checked_add(leg.signed_value())?.checked_add(leg.fee)?;
            held = held.checked_add(leg.signed_shares)?;
            if method == CostBasisMethod::ResetWhenFlat && held.is_zero() {
                basis = Decimal::ZERO;
            }
        }
        Some(basis)
    }

    pub fn revalue(&mut self, method: CostBasisMethod) -> Option<()> {
        let cost_basis = self.cost_basis_with(method)?;
        let market_value = self.shares_held.checked_mul(self.last_price_per_share)?;
        let total_return = market_value
            .checked_sub(cost_basis)?
            .checked_add(self.dividends)?;
        self.cost_basis = cost_basis;
        self.market_value = market_value;
        self.total_return = total_return;
        Some(())
    }

    /// Average price paid per share held, `None` without shares.
    pub fn average_price(&self) -> Option<Decimal> {
        if self.shares_held.is_zero() {
            return None;
        }
        Some(self.cost_basis.checked_div(self.shares_held)?.abs())
    }

    /// Total return relative to the cost basis, in percent.
    pub fn return_percent(&self) -> Option<Decimal> {
        if self.cost_basis.is_zero() {
            return None;
        }
        self.total_return
            .checked_div(self.cost_basis)?
            .checked_mul(Decimal::ONE_HUNDRED)
    }
}

/// Sums over every position of one equity account.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EquityTotals {
    pub cost_basis: Decimal,
    pub market_value: Decimal,
    pub total_return: Decimal,
}

impl EquityTotals {
    fn add(&mut self, position: &SharePosition) -> Option<()> {
        self.cost_basis = self.cost_basis.checked_add(position.cost_basis)?;
        self.market_value = self.market_value.checked_add(position.market_value)?;
        self.total_return = self.total_return.checked_add(position.total_return)?;
        Some(())
    }
}

pub fn revalue(registry: &mut AccountRegistry, method: CostBasisMethod) -> Result<()> {
    for account in registry.iter_mut() {
        let reference = account.reference();
        let shares = match account.shares.as_mut() {
            Some(shares) => shares,
            None => continue,
        };

        let mut totals = EquityTotals::default();
        for (company, position) in shares.iter_mut() {
            position
                .revalue(method)
                .and_then(|_| totals.add(position))
                .ok_or_else(|| {
                    anyhow!(format!(
                        "amount overflow valuing {} in {}",
                        company, reference
                    ))
                })?;
        }
        account.totals = Some(totals);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::valuation::{CostBasisMethod, ShareLeg, SharePosition};
    use chrono::NaiveDateTime;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use anyhow::{anyhow, Result};

    fn leg(value: Decimal, signed_shares: Decimal, fee: Decimal) -> ShareLeg {
        ShareLeg {
            value,
            signed_shares,
            fee,
            timestamp: NaiveDateTime::default(),
        }
    }

    fn position_of(legs: Vec<ShareLeg>) -> Result<SharePosition> {
        let mut position = SharePosition::default();
        for leg in legs {
            position.record(leg).ok_or(anyhow!("overflow"))?;
        }
        Ok(position)
    }

    fn revalued(mut position: SharePosition, method: CostBasisMethod) -> Result<SharePosition> {
        position.revalue(method).ok_or(anyhow!("overflow"))?;
        Ok(position)
    }

    #[test]
    fn two_buys_then_a_price() -> Result<()> {
        let mut position = position_of(vec![
            leg(dec!(1000), dec!(10), Decimal::ZERO),
            leg(dec!(600), dec!(5), Decimal::ZERO),
        ])?;
        position.last_price_per_share = dec!(120);
        let position = revalued(position, CostBasisMethod::Cumulative)?;

        assert_eq!(position.shares_held, dec!(15));
        assert_eq!(position.cost_basis, dec!(1600));
        assert_eq!(position.market_value, dec!(1800));
        assert_eq!(position.total_return, dec!(200));
        assert_eq!(position.average_price(), Some(dec!(1600) / dec!(15)));
        assert_eq!(position.return_percent(), Some(dec!(12.5)));
        Ok(())
    }

    #[test]
    fn fees_always_add_to_cost() -> Result<()> {
        let position = position_of(vec![
            leg(dec!(1000), dec!(10), dec!(5)),
            leg(dec!(600), dec!(-5), dec!(5)),
        ])?;
        let position = revalued(position, CostBasisMethod::Cumulative)?;

        assert_eq!(position.fees, dec!(10));
        assert_eq!(position.cost_basis, dec!(410));
        Ok(())
    }

    #[test]
    fn dividends_add_to_return() -> Result<()> {
        let mut position = position_of(vec![leg(dec!(1000), dec!(10), Decimal::ZERO)])?;
        position.last_price_per_share = dec!(100);
        let mut position = revalued(position, CostBasisMethod::Cumulative)?;
        let before = position.total_return;

        position.dividends += dec!(50);
        let position = revalued(position, CostBasisMethod::Cumulative)?;
        assert_eq!(position.total_return - before, dec!(50));
        Ok(())
    }

    #[test]
    fn reset_when_flat() -> Result<()> {
        let position = position_of(vec![
            leg(dec!(1000), dec!(10), Decimal::ZERO),
            leg(dec!(1200), dec!(-10), Decimal::ZERO),
            leg(dec!(500), dec!(5), Decimal::ZERO),
        ])?;

        assert_eq!(position.cost_basis_with(CostBasisMethod::Cumulative), Some(dec!(300)));
        assert_eq!(
            position.cost_basis_with(CostBasisMethod::ResetWhenFlat),
            Some(dec!(500))
        );
        assert_eq!(position.shares_held, dec!(5));
        Ok(())
    }

    #[test]
    fn empty_position_has_no_ratios() {
        let position = SharePosition::default();
        assert_eq!(position.average_price(), None);
        assert_eq!(position.return_percent(), None);
    }

    #[test]
    fn overflowing_leg_leaves_position_untouched() -> Result<()> {
        let mut position = position_of(vec![leg(dec!(1000), Decimal::MAX, Decimal::ZERO)])?;
        assert_eq!(position.record(leg(dec!(1), dec!(1), Decimal::ZERO)), None);
        assert_eq!(position.shares_held, Decimal::MAX);
        assert_eq!(position.legs.len(), 1);

        position.last_price_per_share = dec!(2);
        assert_eq!(position.revalue(CostBasisMethod::Cumulative), None);
        assert_eq!(position.market_value, Decimal::ZERO);
        Ok(())
    }
}
