use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::quote::{Quote, QuoteStatus};
use crate::pricing::TaxBreakdown;

/// Per-client aggregates over the client's quotes. Recomputed on every read.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientQuoteStats {
    pub total: u64,
    pub active: u64,
    pub accepted: u64,
    /// Sum of tax-inclusive totals of accepted quotes.
    pub accepted_total: Decimal,
}

impl ClientQuoteStats {
    pub fn from_quotes<'a, I>(quotes: I) -> Self
    where
        I: IntoIterator<Item = &'a Quote>,
    {
        Self::from_status_totals(
            quotes.into_iter().map(|quote| (quote.status, quote.pre_tax_total)),
        )
    }

    /// Same aggregation over `(status, pre_tax_total)` pairs.
    pub fn from_status_totals<I>(quotes: I) -> Self
    where
        I: IntoIterator<Item = (QuoteStatus, Decimal)>,
    {
        let mut stats = Self::default();
        for (status, pre_tax_total) in quotes {
            stats.total += 1;
            if status.is_open() {
                stats.active += 1;
            }
            if status == QuoteStatus::Accepted {
                stats.accepted += 1;
                stats.accepted_total += TaxBreakdown::from_pre_tax(pre_tax_total).tax_inclusive_total;
            }
        }
        stats
    }
}
