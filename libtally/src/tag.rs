//! Metadata attached to statements through a `with ... end` block.
//!
//! Tag lines are parsed once into [`Tag`]s; the rest of the crate only uses the
//! typed accessors on [`Tags`].

use crate::amount::{parse_decimal, Currency, Money};
use crate::loader::SourceLocation;
use crate::parser::{next, parse_timestamp, Rule};
use crate::LedgerError;

use anyhow::Result;
use chrono::NaiveDateTime;
use pest::iterators::Pair;
use rust_decimal::Decimal;

use std::collections::BTreeSet;

/// `shares: <company> <count>`
#[derive(Clone, Debug, PartialEq)]
pub struct ShareTag {
    pub company: String,
    pub count: Decimal,
}

/// `rate: <src>/<dst> <rate> [<units>]`, i.e. `units` of `src` are worth `rate` of `dst`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RateTag {
    pub src: Currency,
    pub dst: Currency,
    pub rate: Decimal,
    pub units: Decimal,
}

impl RateTag {
    pub fn per_unit(&self) -> Result<Decimal> {
        crate::amount::per_unit(self.rate, self.units)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Tag {
    Labels(Vec<String>),
    Fee(Money),
    Shares(ShareTag),
    Intermediary(String),
    Rate(RateTag),
    EffectiveDate(NaiveDateTime),
    CalculateAs(Money),
    Flag(String),
}

const KNOWN_KEYS: [&str; 7] = [
    "tags",
    "fee",
    "shares",
    "intermediary",
    "rate",
    "effective_date",
    "calculate_as",
];

impl Tag {
    pub fn parse(token: Pair<'_, Rule>, location: &SourceLocation) -> Result<Tag> {
        let rule = token.as_rule();
        let raw = token.as_str();
        let at = |e: anyhow::Error| LedgerError::syntax(location, format!("{}: {}", raw, e));
        let mut pairs = token.into_inner();

        let tag = match rule {
            Rule::fee_tag => Tag::Fee(Money::parse(next(&mut pairs, "fee")?).map_err(at)?),
            Rule::calculate_as_tag => Tag::CalculateAs(
                Money::parse(next(&mut pairs, "amount")?).map_err(at)?,
            ),
            Rule::shares_tag => {
                let company = next(&mut pairs, "company")?.as_str().to_string();
                let count = parse_decimal(next(&mut pairs, "share count")?).map_err(at)?;
                Tag::Shares(ShareTag { company, count })
            }
            Rule::intermediary_tag => Tag::Intermediary(
                next(&mut pairs, "intermediary")?
                    .as_str()
                    .trim()
                    .to_string(),
            ),
            Rule::rate_tag => Tag::Rate(parse_rate(pairs).map_err(at)?),
            Rule::effective_date_tag => Tag::EffectiveDate(
                parse_timestamp(next(&mut pairs, "timestamp")?.as_str()).map_err(at)?,
            ),
            Rule::tags_tag => Tag::Labels(
                pairs
                    .map(|p| p.as_str().trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            ),
            Rule::flag_tag => {
                let text = next(&mut pairs, "flag")?.as_str().trim();
                if let Some((key, _)) = text.split_once(':') {
                    let key = key.trim();
                    let message = if KNOWN_KEYS.contains(&key) {
                        format!("malformed `{}:` tag: {}", key, text)
                    } else {
                        format!("unknown tag `{}`", key)
                    };
                    return Err(LedgerError::syntax(location, message));
                }
                Tag::Flag(text.to_string())
            }
            _ => return Err(LedgerError::syntax(location, format!("unexpected tag: {}", raw))),
        };

        Ok(tag)
    }
}

/// Parse the inner pairs of a `rate_tag` or a `rate_line`.
pub fn parse_rate(mut pairs: pest::iterators::Pairs<'_, Rule>) -> Result<RateTag> {
    let src: Currency = next(&mut pairs, "source currency")?.as_str().parse()?;
    let dst: Currency = next(&mut pairs, "destination currency")?.as_str().parse()?;
    let rate = parse_decimal(next(&mut pairs, "rate")?)?;
    let units = match pairs.next() {
        Some(units) => parse_decimal(units)?,
        None => Decimal::ONE,
    };
    if rate <= Decimal::ZERO || units <= Decimal::ZERO {
        return Err(anyhow::anyhow!("rate and units must be positive"));
    }
    crate::amount::per_unit(rate, units)?;
    Ok(RateTag {
        src,
        dst,
        rate,
        units,
    })
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Tags(Vec<Tag>);

macro_rules! tag_accessors {
    ($($name:ident / $variant:ident -> $ty:ty),* $(,)?) => {
        $(
            pub fn $name(&self) -> Option<&$ty> {
                self.0.iter().find_map(|tag| match tag {
                    Tag::$variant(value) => Some(value),
                    _ => None,
                })
            }
        )*
    };
}

impl Tags {
    pub fn new(tags: Vec<Tag>) -> Self {
        Self(tags)
    }

    tag_accessors! {
        fee / Fee -> Money,
        shares / Shares -> ShareTag,
        intermediary / Intermediary -> String,
        rate / Rate -> RateTag,
        effective_date / EffectiveDate -> NaiveDateTime,
        calculate_as / CalculateAs -> Money,
    }

    /// Every `tags:` label and every bare flag, deduplicated and sorted.
    pub fn labels(&self) -> BTreeSet<String> {
        self.0
            .iter()
            .flat_map(|tag| match tag {
                Tag::Labels(labels) => labels.clone(),
                Tag::Flag(flag) => vec![flag.clone()],
                _ => vec![],
            })
            .collect()
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.0
            .iter()
            .any(|tag| matches!(tag, Tag::Flag(f) if f == flag))
    }

    pub fn extend<I: IntoIterator<Item = Tag>>(&mut self, tags: I) {
        self.0.extend(tags)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use crate::amount::{Currency, Money};
    use crate::loader::SourceLocation;
    use crate::parser::{LedgerParser, Rule};
    use crate::tag::{ShareTag, Tag, Tags};
    use crate::LedgerError;
    use pest::Parser;
    use rust_decimal_macros::dec;

    use anyhow::Result;

    fn tags_of(block: &str) -> Result<Tags> {
        let location = SourceLocation::new("test", 1);
        let mut ast = LedgerParser::parse(Rule::with_block, block)?;
        let tags = ast
            .next()
            .unwrap()
            .into_inner()
            .map(|p| Tag::parse(p, &location))
            .collect::<Result<Vec<_>>>()?;
        Ok(Tags::new(tags))
    }

    #[test]
    fn parse_every_tag() -> Result<()> {
        let tags = tags_of(
            "with\ntags: food, groceries ,\nfee: 1.50 EUR\nshares: ACME 10\nintermediary: Big Broker\nrate: JPY/PLN 3.50 100\neffective_date: 2021-02-01\ncalculate_as: 12 PLN\nmain\n",
        )?;

        assert_eq!(tags.fee(), Some(&Money::new(dec!(1.50), Currency::EUR)));
        assert_eq!(
            tags.shares(),
            Some(&ShareTag {
                company: "ACME".to_string(),
                count: dec!(10)
            })
        );
        assert_eq!(tags.intermediary().map(String::as_str), Some("Big Broker"));
        let rate = tags.rate().unwrap();
        assert_eq!((rate.src, rate.dst), (Currency::JPY, Currency::PLN));
        assert_eq!(rate.per_unit()?, dec!(0.035));
        assert_eq!(
            tags.effective_date().map(|d| d.to_string()),
            Some("2021-02-01 00:00:00".to_string())
        );
        assert_eq!(tags.calculate_as(), Some(&Money::new(dec!(12), Currency::PLN)));
        assert!(tags.has_flag("main"));
        assert_eq!(
            tags.labels().into_iter().collect::<Vec<_>>(),
            vec!["food", "groceries", "main"]
        );
        Ok(())
    }

    #[test]
    fn malformed_known_tag() -> Result<()> {
        let err = tags_of("with\nfee: lots\n").unwrap_err();
        match err.downcast_ref::<LedgerError>() {
            Some(LedgerError::Syntax { message, .. }) => {
                assert_eq!(message, "malformed `fee:` tag: fee: lots")
            }
            other => panic!("unexpected error: {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn unknown_tag_key() {
        let err = tags_of("with\ncolour: blue\n").unwrap_err();
        assert!(format!("{}", err).ends_with("unknown tag `colour`"));
    }

    #[test]
    fn fee_in_unknown_currency() {
        let err = tags_of("with\nfee: 1 XYZ\n").unwrap_err();
        assert!(format!("{}", err).contains("invalid currency: XYZ"));
    }
}
