use chrono::{DateTime, Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::client::ClientId;
use crate::errors::DomainError;
use crate::numbering::QuoteNumber;
use crate::pricing::{line_amount, normalize_unit_price, TaxBreakdown};

/// Days a quote stays valid when no validity date is given.
pub const QUOTE_VALIDITY_DAYS: u64 = 30;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuoteId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineItemId(pub i64);

impl std::fmt::Display for QuoteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for LineItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    #[default]
    Draft,
    Sent,
    Accepted,
    Rejected,
}

impl QuoteStatus {
    pub const OPEN: [QuoteStatus; 2] = [QuoteStatus::Draft, QuoteStatus::Sent];
    pub const CLOSED: [QuoteStatus; 2] = [QuoteStatus::Accepted, QuoteStatus::Rejected];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "sent" => Some(Self::Sent),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Label printed on exported documents.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Draft => "Brouillon",
            Self::Sent => "Envoyé",
            Self::Accepted => "Accepté",
            Self::Rejected => "Refusé",
        }
    }

    /// Still awaiting an answer from the client.
    pub fn is_open(&self) -> bool {
        Self::OPEN.contains(self)
    }
}

impl std::fmt::Display for QuoteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QuoteStatus {
    type Err = DomainError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse(raw).ok_or_else(|| DomainError::UnknownQuoteStatus(raw.to_owned()))
    }
}

/// Which quotes a listing returns: everything, the open ones (`draft`, `sent`)
/// or the closed ones (`accepted`, `rejected`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteFilter {
    #[default]
    All,
    Open,
    Closed,
}

impl QuoteFilter {
    pub fn statuses(&self) -> &'static [QuoteStatus] {
        match self {
            Self::All => &[
                QuoteStatus::Draft,
                QuoteStatus::Sent,
                QuoteStatus::Accepted,
                QuoteStatus::Rejected,
            ],
            Self::Open => &QuoteStatus::OPEN,
            Self::Closed => &QuoteStatus::CLOSED,
        }
    }

    pub fn matches(&self, status: QuoteStatus) -> bool {
        self.statuses().contains(&status)
    }
}

/// Answer recorded by the finalize action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeDecision {
    Accept,
    Reject,
}

impl FinalizeDecision {
    pub fn status(&self) -> QuoteStatus {
        match self {
            Self::Accept => QuoteStatus::Accepted,
            Self::Reject => QuoteStatus::Rejected,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub id: QuoteId,
    pub number: QuoteNumber,
    pub client_id: ClientId,
    pub created_at: DateTime<Utc>,
    pub valid_until: NaiveDate,
    pub pre_tax_total: Decimal,
    pub payment_terms: String,
    pub notes: Option<String>,
    pub status: QuoteStatus,
    pub created_by: Option<String>,
}

impl Quote {
    pub fn taxes(&self) -> TaxBreakdown {
        TaxBreakdown::from_pre_tax(self.pre_tax_total)
    }

    pub fn tax_inclusive_total(&self) -> Decimal {
        self.taxes().tax_inclusive_total
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: LineItemId,
    pub quote_id: QuoteId,
    pub description: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub amount: Decimal,
}

/// Line as submitted by a caller. The amount is never part of the input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemDraft {
    pub description: String,
    pub quantity: u32,
    pub unit_price: Decimal,
}

/// Validated line with its derived amount, ready to persist.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PricedLine {
    pub description: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub amount: Decimal,
}

impl LineItemDraft {
    pub fn price(&self) -> Result<PricedLine, DomainError> {
        let description = self.description.trim();
        if description.is_empty() {
            return Err(DomainError::validation("description", "line description is required"));
        }

        let unit_price = normalize_unit_price(self.unit_price)?;
        Ok(PricedLine {
            description: description.to_owned(),
            quantity: self.quantity,
            unit_price,
            amount: line_amount(self.quantity, unit_price)?,
        })
    }
}

pub fn price_lines(drafts: &[LineItemDraft]) -> Result<Vec<PricedLine>, DomainError> {
    drafts.iter().map(LineItemDraft::price).collect()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteDraft {
    pub client_id: ClientId,
    #[serde(default)]
    pub valid_until: Option<NaiveDate>,
    #[serde(default)]
    pub payment_terms: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub lines: Vec<LineItemDraft>,
}

impl QuoteDraft {
    pub fn valid_until_or_default(&self, created_at: DateTime<Utc>) -> NaiveDate {
        self.valid_until.unwrap_or_else(|| default_valid_until(created_at))
    }
}

/// Header changes; `lines`, when present, replaces every line of the quote.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteUpdate {
    pub client_id: ClientId,
    pub valid_until: NaiveDate,
    #[serde(default)]
    pub payment_terms: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub lines: Option<Vec<LineItemDraft>>,
}

pub fn default_valid_until(created_at: DateTime<Utc>) -> NaiveDate {
    let created_on = created_at.date_naive();
    created_on.checked_add_days(Days::new(QUOTE_VALIDITY_DAYS)).unwrap_or(created_on)
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{default_valid_until, FinalizeDecision, LineItemDraft, QuoteFilter, QuoteStatus};
    use crate::errors::DomainError;

    #[test]
    fn default_validity_is_thirty_days_after_creation() {
        let created = Utc.with_ymd_and_hms(2026, 10, 19, 15, 0, 0).single().expect("instant");
        assert_eq!(
            default_valid_until(created),
            NaiveDate::from_ymd_opt(2026, 11, 18).expect("date")
        );
    }

    #[test]
    fn line_amount_is_derived_from_quantity_and_price() {
        let line = LineItemDraft {
            description: "  Pose de carrelage ".to_string(),
            quantity: 3,
            unit_price: Decimal::from_str("19.99").expect("decimal"),
        }
        .price()
        .expect("valid line");

        assert_eq!(line.description, "Pose de carrelage");
        assert_eq!(line.amount.to_string(), "59.97");
    }

    #[test]
    fn line_without_description_is_rejected() {
        let error = LineItemDraft {
            description: " ".to_string(),
            quantity: 1,
            unit_price: Decimal::ONE,
        }
        .price()
        .expect_err("blank description");
        assert!(matches!(error, DomainError::Validation { field: "description", .. }));
    }

    #[test]
    fn huge_quantity_and_price_are_rejected() {
        let huge_price = LineItemDraft {
            description: "Lot".to_string(),
            quantity: 1_000_000_000,
            unit_price: Decimal::from_str("100000000000000000000").expect("decimal"),
        }
        .price()
        .expect_err("price above the cap");
        assert!(matches!(huge_price, DomainError::Validation { field: "unit_price", .. }));

        let huge_quantity = LineItemDraft {
            description: "Lot".to_string(),
            quantity: u32::MAX,
            unit_price: Decimal::from_str("99999999.99").expect("decimal"),
        }
        .price()
        .expect_err("amount above the cap");
        assert!(matches!(huge_quantity, DomainError::Validation { field: "quantity", .. }));
    }

    #[test]
    fn status_parsing_and_open_set() {
        assert_eq!(QuoteStatus::parse("Accepted"), Some(QuoteStatus::Accepted));
        assert_eq!(QuoteStatus::parse("archived"), None);
        assert!(QuoteStatus::from_str("archived").is_err());
        assert!(QuoteStatus::Draft.is_open());
        assert!(QuoteStatus::Sent.is_open());
        assert!(!QuoteStatus::Accepted.is_open());
        assert!(!QuoteStatus::Rejected.is_open());
    }

    #[test]
    fn finalize_decisions_map_to_closed_statuses() {
        assert_eq!(FinalizeDecision::Accept.status(), QuoteStatus::Accepted);
        assert_eq!(FinalizeDecision::Reject.status(), QuoteStatus::Rejected);
        assert!(QuoteStatus::CLOSED.contains(&FinalizeDecision::Reject.status()));
    }

    #[test]
    fn filters_split_open_and_closed_quotes() {
        assert!(QuoteFilter::Open.matches(QuoteStatus::Sent));
        assert!(!QuoteFilter::Open.matches(QuoteStatus::Accepted));
        assert!(QuoteFilter::Closed.matches(QuoteStatus::Rejected));
        assert!(!QuoteFilter::Closed.matches(QuoteStatus::Draft));
        assert_eq!(QuoteFilter::All.statuses().len(), 4);
    }
}
