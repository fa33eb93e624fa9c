//! Human-readable quote numbers of the form `DEV-YYYYMM-NNNN`.
//!
//! The sequence restarts at 1 every calendar month (UTC). It is zero-padded
//! to four digits and widens past `9999`, so the largest existing number is
//! always chosen by numeric suffix rather than by string order.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

pub const QUOTE_NUMBER_PREFIX: &str = "DEV";
pub const SEQUENCE_MIN_WIDTH: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NumberingPeriod {
    year: i32,
    month: u32,
}

impl NumberingPeriod {
    pub fn new(year: i32, month: u32) -> Result<Self, DomainError> {
        if !(1..=12).contains(&month) || !(0..=9999).contains(&year) {
            return Err(DomainError::InvalidQuoteNumber(format!("period {year:04}{month:02}")));
        }
        Ok(Self { year, month })
    }

    pub fn containing(instant: DateTime<Utc>) -> Self {
        Self { year: instant.year(), month: instant.month() }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// `DEV-YYYYMM-`, shared by every number of the period.
    pub fn prefix(&self) -> String {
        format!("{QUOTE_NUMBER_PREFIX}-{:04}{:02}-", self.year, self.month)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QuoteNumber {
    period: NumberingPeriod,
    sequence: u32,
}

impl QuoteNumber {
    pub fn new(period: NumberingPeriod, sequence: u32) -> Result<Self, DomainError> {
        if sequence == 0 {
            return Err(DomainError::InvalidQuoteNumber(format!("{}0", period.prefix())));
        }
        Ok(Self { period, sequence })
    }

    pub fn first(period: NumberingPeriod) -> Self {
        Self { period, sequence: 1 }
    }

    pub fn period(&self) -> NumberingPeriod {
        self.period
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let invalid = || DomainError::InvalidQuoteNumber(raw.to_owned());

        let mut parts = raw.splitn(3, '-');
        let (Some(prefix), Some(period), Some(sequence)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };

        if prefix != QUOTE_NUMBER_PREFIX
            || period.len() != 6
            || !period.bytes().all(|byte| byte.is_ascii_digit())
            || sequence.len() < SEQUENCE_MIN_WIDTH
            || !sequence.bytes().all(|byte| byte.is_ascii_digit())
        {
            return Err(invalid());
        }

        let year = period[..4].parse::<i32>().map_err(|_| invalid())?;
        let month = period[4..].parse::<u32>().map_err(|_| invalid())?;
        let sequence = sequence.parse::<u32>().map_err(|_| invalid())?;

        let period = NumberingPeriod::new(year, month).map_err(|_| invalid())?;
        Self::new(period, sequence).map_err(|_| invalid())
    }
}

impl fmt::Display for QuoteNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:0width$}", self.period.prefix(), self.sequence, width = SEQUENCE_MIN_WIDTH)
    }
}

impl FromStr for QuoteNumber {
    type Err = DomainError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse(raw)
    }
}

impl TryFrom<String> for QuoteNumber {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<QuoteNumber> for String {
    fn from(value: QuoteNumber) -> Self {
        value.to_string()
    }
}

/// Next number for `period` given every number already issued.
///
/// Numbers from other periods and strings that do not parse are ignored.
pub fn next_quote_number<'a, I>(period: NumberingPeriod, existing: I) -> QuoteNumber
where
    I: IntoIterator<Item = &'a str>,
{
    let last = existing
        .into_iter()
        .filter_map(|raw| QuoteNumber::parse(raw).ok())
        .filter(|number| number.period == period)
        .map(|number| number.sequence)
        .max();

    match last {
        Some(sequence) => QuoteNumber { period, sequence: sequence.saturating_add(1) },
        None => QuoteNumber::first(period),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{next_quote_number, NumberingPeriod, QuoteNumber};

    fn october() -> NumberingPeriod {
        NumberingPeriod::new(2026, 10).expect("valid period")
    }

    #[test]
    fn first_number_of_a_month_starts_at_one() {
        let number = next_quote_number(october(), Vec::<&str>::new());
        assert_eq!(number.to_string(), "DEV-202610-0001");
    }

    #[test]
    fn sequence_increments_in_creation_order() {
        let mut issued: Vec<String> = Vec::new();
        for _ in 0..3 {
            let next = next_quote_number(october(), issued.iter().map(String::as_str));
            issued.push(next.to_string());
        }

        assert_eq!(issued, vec!["DEV-202610-0001", "DEV-202610-0002", "DEV-202610-0003"]);
    }

    #[test]
    fn new_month_resets_sequence_regardless_of_prior_counts() {
        let existing = ["DEV-202610-0001", "DEV-202610-0002", "DEV-202610-0047"];
        let november = NumberingPeriod::new(2026, 11).expect("valid period");

        let number = next_quote_number(november, existing);

        assert_eq!(number.to_string(), "DEV-202611-0001");
    }

    #[test]
    fn sequence_widens_past_four_digits_and_keeps_numeric_order() {
        let existing = ["DEV-202610-9998", "DEV-202610-9999"];
        let widened = next_quote_number(october(), existing);
        assert_eq!(widened.to_string(), "DEV-202610-10000");

        let after = next_quote_number(october(), ["DEV-202610-9999", "DEV-202610-10000"]);
        assert_eq!(after.to_string(), "DEV-202610-10001");
    }

    #[test]
    fn unparseable_and_foreign_numbers_are_ignored() {
        let existing = ["DEV-202610-00A1", "legacy-42", "DEV-202609-0100", "DEV-202610-0004"];
        let number = next_quote_number(october(), existing);
        assert_eq!(number.to_string(), "DEV-202610-0005");
    }

    #[test]
    fn parse_round_trips_display() {
        let number = QuoteNumber::parse("DEV-202601-0042").expect("valid number");
        assert_eq!(number.sequence(), 42);
        assert_eq!(number.period().year(), 2026);
        assert_eq!(number.period().month(), 1);
        assert_eq!(number.to_string(), "DEV-202601-0042");
    }

    #[test]
    fn parse_rejects_malformed_numbers() {
        for raw in ["", "DEV-202613-0001", "DEV-2026-0001", "INV-202610-0001", "DEV-202610-001"] {
            assert!(QuoteNumber::parse(raw).is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn period_comes_from_the_instant_month() {
        let instant = Utc.with_ymd_and_hms(2026, 12, 31, 23, 59, 59).single().expect("instant");
        assert_eq!(NumberingPeriod::containing(instant).prefix(), "DEV-202612-");
    }

    #[test]
    fn serializes_as_plain_string() {
        let number = QuoteNumber::parse("DEV-202610-0007").expect("valid number");
        let json = serde_json::to_string(&number).expect("serialize");
        assert_eq!(json, "\"DEV-202610-0007\"");

        let back: QuoteNumber = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, number);
    }
}
