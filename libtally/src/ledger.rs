use crate::{
    account::{setup_accounts, AccountKind, AccountRef, AccountRegistry},
    amount::{Currency, Money},
    config::{Config, Options, RatePolicy},
    currency::CurrencyBasket,
    loader::SourceLocation,
    statement::{Assertion, BalanceAssertion, ExchangeRateSet, Group, Item},
    transaction::{Origin, Transaction, TxKind},
    valuation::{self, ShareLeg, SharePosition},
    LedgerError,
};
use anyhow::{anyhow, Result};
use chrono::NaiveDateTime;
use log::{debug, warn};
use rust_decimal::Decimal;

/// The computed state of a ledger: accounts with their balances and share
/// positions, and the exchange rates known at the end of the replay.
#[derive(Clone, Debug)]
pub struct Ledger {
    accounts: AccountRegistry,
    basket: CurrencyBasket,
    config: Config,
    groups: Vec<Group>,
    default_currency: Currency,
    now: NaiveDateTime,
}

impl Ledger {
    /// Replay `items` in chronological order. Replaying the same items with
    /// the same options always yields the same ledger.
    pub fn compute(items: &[Item], options: Options) -> Result<Ledger> {
        let config = Config::from_items(items)?;
        let default_currency = options.resolve_currency(&config);

        let mut accounts = AccountRegistry::new();
        setup_accounts(&mut accounts, items)?;

        let mut engine = Engine {
            accounts,
            basket: CurrencyBasket::new(),
            now: options.now,
            rate_policy: options.rate_policy,
        };

        let mut chronological: Vec<&Item> = items.iter().collect();
        chronological.sort_by_key(|item| item.effective_date());
        for item in chronological {
            engine.apply(item)?;
        }

        valuation::revalue(&mut engine.accounts, options.cost_basis)?;

        let groups = items
            .iter()
            .filter_map(|item| match item {
                Item::Group(group) => Some(group.clone()),
                _ => None,
            })
            .collect();

        Ok(Ledger {
            accounts: engine.accounts,
            basket: engine.basket,
            config,
            groups,
            default_currency,
            now: options.now,
        })
    }

    pub fn accounts(&self) -> &AccountRegistry {
        &self.accounts
    }

    pub fn basket(&self) -> &CurrencyBasket {
        &self.basket
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn default_currency(&self) -> Currency {
        self.default_currency
    }

    pub fn now(&self) -> NaiveDateTime {
        self.now
    }

    pub fn convert(&self, money: Money, to: Currency) -> Result<Money> {
        self.basket.convert(money, to)
    }

    /// `money` in the default currency.
    pub fn in_default_currency(&self, money: Money) -> Result<Money> {
        self.convert(money, self.default_currency)
    }
}

struct Engine {
    accounts: AccountRegistry,
    basket: CurrencyBasket,
    now: NaiveDateTime,
    rate_policy: RatePolicy,
}

impl Engine {
    fn apply(&mut self, item: &Item) -> Result<()> {
        match item {
            Item::Config(_) | Item::AccountOpen(_) | Item::AccountClose(_) | Item::Group(_) => {
                Ok(())
            }
            Item::ExchangeRates(rates) => self.exchange_rates(rates),
            _ if item.effective_date() > self.now => {
                debug!(
                    "{}: not effective until {}, skipping",
                    item.location(),
                    item.effective_date()
                );
                Ok(())
            }
            Item::BalanceAssertion(assertion) => self.balance(assertion),
            Item::Transaction(tx) => self.transaction(tx),
        }
    }

    fn exchange_rates(&mut self, rates: &ExchangeRateSet) -> Result<()> {
        if self.rate_policy == RatePolicy::Gated && rates.timestamp > self.now {
            debug!("{}: rates not effective yet, skipping", rates.location);
            return Ok(());
        }
        for rate in &rates.rates {
            self.basket.set(rate);
        }
        Ok(())
    }

    /// Look up an owned leg's account and make sure it is kept in `currency`.
    fn check(&self, account: &AccountRef, currency: Currency, location: &SourceLocation) -> Result<()> {
        let found = self.accounts.lookup(account, location)?;
        if found.currency != currency {
            return Err(LedgerError::semantic(
                location,
                format!(
                    "mismatched currency: {} is kept in {}, got {}",
                    account, found.currency, currency
                ),
            ));
        }
        Ok(())
    }

    fn existing_position(
        &self,
        account: &AccountRef,
        company: &str,
        location: &SourceLocation,
    ) -> Result<()> {
        match self.accounts.lookup(account, location)?.position(company) {
            Some(_) => Ok(()),
            None => Err(LedgerError::semantic(
                location,
                format!("company {} does not exist in account {}", company, account),
            )),
        }
    }

    fn position(&mut self, account: &AccountRef, company: &str) -> Result<&mut SharePosition> {
        let shares = self
            .accounts
            .get_mut(account)
            .and_then(|a| a.shares.as_mut())
            .ok_or(anyhow!(format!("{} cannot hold shares", account)))?;
        Ok(shares.entry(company.to_string()).or_default())
    }

    fn credit(
        &mut self,
        account: &AccountRef,
        amount: Decimal,
        location: &SourceLocation,
    ) -> Result<()> {
        if let Some(account) = self.accounts.get_mut(account) {
            account.balance = account
                .balance
                .checked_add(amount)
                .ok_or_else(|| LedgerError::overflow(location))?;
        }
        Ok(())
    }

    /// Every owned leg must name a known account kept in the leg's currency.
    fn check_legs(&self, tx: &Transaction) -> Result<()> {
        for leg in tx.legs() {
            if let (Some(account), Some(money)) = (leg.account(), leg.money) {
                self.check(account, money.currency, &leg.location)?;
            }
        }
        Ok(())
    }

    fn balance(&mut self, assertion: &BalanceAssertion) -> Result<()> {
        for entry in &assertion.entries {
            match &entry.assertion {
                Assertion::Cash(money) => {
                    self.check(&entry.account, money.currency, &entry.location)?
                }
                Assertion::SharePrice { company, price } => {
                    self.check(&entry.account, price.currency, &entry.location)?;
                    self.existing_position(&entry.account, company, &entry.location)?;
                }
            }
        }

        for entry in &assertion.entries {
            match &entry.assertion {
                Assertion::Cash(money) => {
                    if let Some(account) = self.accounts.get_mut(&entry.account) {
                        if account.balance != money.amount {
                            warn!(
                                "{}: {} holds {} {} as of {}, computed {}",
                                entry.location,
                                entry.account,
                                money.amount,
                                money.currency,
                                assertion.timestamp,
                                account.balance
                            );
                        }
                        account.balance = money.amount;
                    }
                }
                Assertion::SharePrice { company, price } => {
                    self.position(&entry.account, company)?.last_price_per_share = price.amount;
                }
            }
        }
        Ok(())
    }

    fn transaction(&mut self, tx: &Transaction) -> Result<()> {
        if tx.origin == Origin::DividendRevenue {
            return Ok(());
        }
        match &tx.kind {
            TxKind::Expense | TxKind::Revenue | TxKind::Transfer => {
                self.check_legs(tx)?;
                for leg in tx.legs() {
                    if let (Some(account), Some(money)) = (leg.account(), leg.money) {
                        self.credit(account, money.amount, &leg.location)?;
                    }
                }
                Ok(())
            }
            TxKind::Equity => {
                self.check_legs(tx)?;
                self.equity(tx)
            }
            TxKind::Dividend { company } => self.dividend(tx, company),
        }
    }

    fn equity(&mut self, tx: &Transaction) -> Result<()> {
        let shares = tx
            .tags
            .shares()
            .ok_or(anyhow!("equity transaction without shares"))?;
        let (source, destination) = match (tx.ins.first(), tx.outs.first()) {
            (Some(source), Some(destination)) => (source, destination),
            _ => return Err(anyhow!("equity transaction without source or destination")),
        };
        let (src, src_money) = source
            .account()
            .zip(source.money)
            .ok_or(anyhow!("equity source is not an owned account"))?;
        let (dst, dst_money) = destination
            .account()
            .zip(destination.money)
            .ok_or(anyhow!("equity destination is not an owned account"))?;

        let (holder, amount) = if dst.kind == AccountKind::Equity {
            (dst, dst_money.amount)
        } else {
            (src, src_money.amount)
        };
        let overflow = || LedgerError::overflow(&tx.location);
        let value = amount.abs();
        let price = value.checked_div(shares.count).ok_or_else(overflow)?.abs();
        let fee = tx.tags.fee().map(|f| f.amount).unwrap_or_default();
        let timestamp = tx.effective_date();

        self.credit(src, src_money.amount, &source.location)?;
        self.credit(dst, dst_money.amount, &destination.location)?;

        let position = self.position(holder, &shares.company)?;
        position
            .record(ShareLeg {
                value,
                signed_shares: shares.count,
                fee,
                timestamp,
            })
            .ok_or_else(overflow)?;
        position.last_price_per_share = price;

        if src.kind == AccountKind::Equity && dst.kind == AccountKind::Equity {
            let mirror = self.position(src, &shares.company)?;
            mirror
                .record(ShareLeg {
                    value,
                    signed_shares: -shares.count,
                    fee: Decimal::ZERO,
                    timestamp,
                })
                .ok_or_else(overflow)?;
            mirror.last_price_per_share = price;
        }

        debug!(
            "{}: {} shares of {} at {} via {}",
            tx.location, shares.count, shares.company, price, holder
        );
        Ok(())
    }

    fn dividend(&mut self, tx: &Transaction, company: &str) -> Result<()> {
        let source = tx
            .ins
            .first()
            .and_then(|leg| leg.account())
            .ok_or(anyhow!("dividend without an equity account"))?;
        let cash = tx
            .outs
            .first()
            .ok_or(anyhow!("dividend without a destination"))?;
        let (account, money) = cash
            .account()
            .zip(cash.money)
            .ok_or(anyhow!("dividend paid to an external account"))?;
        self.check(account, money.currency, &cash.location)?;
        self.existing_position(source, company, &tx.location)?;

        let held_in = self.accounts.lookup(source, &tx.location)?.currency;
        let earned = self.basket.convert(money, held_in).map_err(|e| {
            LedgerError::semantic(
                &tx.location,
                format!("cannot value dividend of {} in {}: {}", money, held_in, e),
            )
        })?;

        self.credit(account, money.amount, &cash.location)?;
        let position = self.position(source, company)?;
        position.dividends = position
            .dividends
            .checked_add(earned.amount)
            .ok_or_else(|| LedgerError::overflow(&tx.location))?;
        Ok(())
    }
}
