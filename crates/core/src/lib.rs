pub mod audit;
pub mod clock;
pub mod config;
pub mod document;
pub mod domain;
pub mod errors;
pub mod export;
pub mod numbering;
pub mod pricing;
pub mod stats;

pub use audit::{ClientAuditSink, ClientCreated, CsvFileAuditSink, InMemoryAuditSink, NoopAuditSink};
pub use clock::{Clock, FixedClock, SharedClock, SystemClock};
pub use document::QuoteDocument;
pub use domain::client::{Client, ClientDraft, ClientId};
pub use domain::quote::{
    FinalizeDecision, LineItem, LineItemDraft, LineItemId, PricedLine, Quote, QuoteDraft,
    QuoteFilter, QuoteId, QuoteStatus, QuoteUpdate,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use numbering::{NumberingPeriod, QuoteNumber};
pub use pricing::TaxBreakdown;
pub use stats::ClientQuoteStats;
