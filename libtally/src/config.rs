use crate::amount::Currency;
use crate::statement::{ConfigDirective, Item};
use crate::valuation::CostBasisMethod;
use crate::LedgerError;

use anyhow::{anyhow, Result};
use chrono::NaiveDateTime;
use log::debug;
use rust_decimal::Decimal;

use std::collections::BTreeMap;
use std::str::FromStr;

pub const DEFAULT_CURRENCY: Currency = Currency::PLN;

/// Spending limit from `set budget <limit> <%|$>`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Budget {
    /// A fixed amount of the default currency per month.
    Fixed(Decimal),
    /// A share of the month's revenues, in percent.
    Percent(Decimal),
}

impl FromStr for Budget {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (limit, kind) = s
            .split_once(char::is_whitespace)
            .ok_or(anyhow!(format!("invalid budget `{}', expected `<limit> <%|$>'", s)))?;
        let limit = Decimal::from_str(limit.trim())
            .map_err(|e| anyhow!(format!("invalid budget limit `{}': {}", limit, e)))?;
        match kind.trim() {
            "$" => Ok(Budget::Fixed(limit)),
            "%" => Ok(Budget::Percent(limit)),
            other => Err(anyhow!(format!(
                "invalid budget kind `{}', expected `%' or `$'",
                other
            ))),
        }
    }
}

/// Typed view over the `set` directives of a ledger.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Config {
    pub default_currency: Option<Currency>,
    pub budget: Option<Budget>,
    /// Keys we do not know about, kept verbatim.
    pub extra: BTreeMap<String, String>,
}

impl Config {
    /// Later directives override earlier ones.
    pub fn from_items(items: &[Item]) -> Result<Config> {
        let mut config = Config::default();
        for item in items {
            if let Item::Config(directive) = item {
                config.set(directive)?;
            }
        }
        Ok(config)
    }

    pub fn set(&mut self, directive: &ConfigDirective) -> Result<()> {
        let invalid = |e: anyhow::Error| LedgerError::semantic(&directive.location, format!("{}", e));
        match directive.key.as_str() {
            "default_currency" => {
                self.default_currency = Some(directive.value.parse().map_err(invalid)?)
            }
            "budget" => self.budget = Some(directive.value.parse().map_err(invalid)?),
            key => {
                debug!("{}: keeping unknown setting `{}'", directive.location, key);
                self.extra
                    .insert(key.to_string(), directive.value.clone());
            }
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.extra.get(key)
    }
}

/// Whether exchange rates dated after `now` are registered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RatePolicy {
    #[default]
    Unconditional,
    Gated,
}

/// Inputs of a ledger computation that do not come from the ledger itself.
#[derive(Clone, Debug, PartialEq)]
pub struct Options {
    /// Items effective after this point are not applied.
    pub now: NaiveDateTime,
    /// Overrides `set default_currency`.
    pub default_currency: Option<Currency>,
    pub rate_policy: RatePolicy,
    pub cost_basis: CostBasisMethod,
}

impl Options {
    pub fn at(now: NaiveDateTime) -> Self {
        Self {
            now,
            default_currency: None,
            rate_policy: RatePolicy::default(),
            cost_basis: CostBasisMethod::default(),
        }
    }

    pub fn with_default_currency(mut self, currency: Currency) -> Self {
        self.default_currency = Some(currency);
        self
    }

    pub fn with_rate_policy(mut self, policy: RatePolicy) -> Self {
        self.rate_policy = policy;
        self
    }

    pub fn with_cost_basis(mut self, method: CostBasisMethod) -> Self {
        self.cost_basis = method;
        self
    }

    /// Options, then the ledger, then PLN.
    pub fn resolve_currency(&self, config: &Config) -> Currency {
        self.default_currency
            .or(config.default_currency)
            .unwrap_or(DEFAULT_CURRENCY)
    }
}

#[cfg(test)]
mod tests {
    use crate::amount::Currency;
    use crate::config::{Budget, Config, Options};
    use crate::parser::parse_str;
    use chrono::NaiveDateTime;
    use rust_decimal_macros::dec;

    use anyhow::Result;

    #[test]
    fn parse_budget() -> Result<()> {
        assert_eq!("2000 $".parse::<Budget>()?, Budget::Fixed(dec!(2000)));
        assert_eq!("40 %".parse::<Budget>()?, Budget::Percent(dec!(40)));
        assert!("40".parse::<Budget>().is_err());
        assert!("40 EUR".parse::<Budget>().is_err());
        Ok(())
    }

    #[test]
    fn typed_settings() -> Result<()> {
        let items = parse_str(
            "set default_currency EUR\nset budget 1500.50 $\nset owner me\nset default_currency USD\n",
        )?;
        let config = Config::from_items(&items)?;
        assert_eq!(config.default_currency, Some(Currency::USD));
        assert_eq!(config.budget, Some(Budget::Fixed(dec!(1500.50))));
        assert_eq!(config.get("owner").map(String::as_str), Some("me"));
        Ok(())
    }

    #[test]
    fn invalid_setting_is_located() -> Result<()> {
        let items = parse_str("set a b\nset default_currency XYZ\n")?;
        let err = Config::from_items(&items).unwrap_err();
        assert_eq!(format!("{}", err), "<input>:2: invalid currency: XYZ");
        Ok(())
    }

    #[test]
    fn default_currency_precedence() -> Result<()> {
        let now = NaiveDateTime::default();
        let mut config = Config::default();
        assert_eq!(Options::at(now).resolve_currency(&config), Currency::PLN);
        config.default_currency = Some(Currency::EUR);
        assert_eq!(Options::at(now).resolve_currency(&config), Currency::EUR);
        assert_eq!(
            Options::at(now)
                .with_default_currency(Currency::GBP)
                .resolve_currency(&config),
            Currency::GBP
        );
        Ok(())
    }
}
