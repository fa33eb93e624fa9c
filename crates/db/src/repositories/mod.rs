use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use devis_core::domain::client::{Client, ClientDraft, ClientId};
use devis_core::domain::quote::{
    LineItem, LineItemDraft, LineItemId, Quote, QuoteDraft, QuoteFilter, QuoteId, QuoteStatus,
    QuoteUpdate,
};
use devis_core::errors::{ApplicationError, DomainError};

pub mod client;
pub mod memory;
pub mod quote;

pub use client::SqlClientRepository;
pub use memory::{InMemoryClientRepository, InMemoryQuoteRepository, InMemoryStore};
pub use quote::{SqlQuoteRepository, MAX_NUMBERING_ATTEMPTS};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Validation(#[from] DomainError),
}

impl From<RepositoryError> for ApplicationError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Validation(domain) => Self::Domain(domain),
            RepositoryError::NotFound(what) => Self::NotFound(format!("{what} not found")),
            RepositoryError::Conflict(message) => Self::Conflict(message),
            RepositoryError::Database(error) => Self::Persistence(error.to_string()),
            RepositoryError::Decode(message) => Self::Persistence(message),
        }
    }
}

#[async_trait]
pub trait ClientRepository: Send + Sync {
    async fn create(&self, draft: ClientDraft) -> Result<Client, RepositoryError>;
    async fn update(&self, id: ClientId, draft: ClientDraft) -> Result<Client, RepositoryError>;
    async fn find_by_id(&self, id: ClientId) -> Result<Option<Client>, RepositoryError>;
    /// All clients ordered by name.
    async fn list(&self) -> Result<Vec<Client>, RepositoryError>;
    /// Refuses with `Conflict` while the client still owns quotes.
    async fn delete(&self, id: ClientId) -> Result<(), RepositoryError>;
}

/// Quote persistence. Every line mutation recomputes and stores the owning
/// quote's pre-tax total in the same transaction.
#[async_trait]
pub trait QuoteRepository: Send + Sync {
    /// Assigns the next `DEV-YYYYMM-NNNN` number and inserts the quote with its lines.
    async fn create(&self, draft: QuoteDraft) -> Result<Quote, RepositoryError>;
    async fn find_by_id(&self, id: QuoteId) -> Result<Option<Quote>, RepositoryError>;
    /// Newest first.
    async fn list(&self, filter: QuoteFilter) -> Result<Vec<Quote>, RepositoryError>;
    async fn list_for_client(&self, client_id: ClientId) -> Result<Vec<Quote>, RepositoryError>;
    async fn update(&self, id: QuoteId, update: QuoteUpdate) -> Result<Quote, RepositoryError>;
    async fn set_status(&self, id: QuoteId, status: QuoteStatus) -> Result<Quote, RepositoryError>;
    async fn delete(&self, id: QuoteId) -> Result<(), RepositoryError>;

    async fn lines(&self, id: QuoteId) -> Result<Vec<LineItem>, RepositoryError>;
    async fn add_line(&self, id: QuoteId, line: LineItemDraft)
        -> Result<LineItem, RepositoryError>;
    async fn update_line(
        &self,
        id: QuoteId,
        line_id: LineItemId,
        line: LineItemDraft,
    ) -> Result<LineItem, RepositoryError>;
    async fn remove_line(&self, id: QuoteId, line_id: LineItemId) -> Result<(), RepositoryError>;
    /// Deletes every line, inserts `lines`, then recomputes once.
    async fn replace_lines(
        &self,
        id: QuoteId,
        lines: Vec<LineItemDraft>,
    ) -> Result<Vec<LineItem>, RepositoryError>;

    /// Sums the persisted line amounts into the quote's pre-tax total.
    async fn recompute_total(&self, id: QuoteId) -> Result<Decimal, RepositoryError>;
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}
