//! JSON API for clients and quotes.
//!
//! Clients:
//! - `GET    /api/v1/clients`                       list, ordered by name
//! - `POST   /api/v1/clients`                       create (recorded in the audit log)
//! - `GET    /api/v1/clients/export.csv`            clients CSV with statistics
//! - `GET    /api/v1/clients/{id}`                  detail with quotes and statistics
//! - `PUT    /api/v1/clients/{id}`                  update
//! - `DELETE /api/v1/clients/{id}`                  delete, refused while quotes exist
//!
//! Quotes:
//! - `GET    /api/v1/quotes?state=open|closed`      list, newest first
//! - `POST   /api/v1/quotes`                        create with optional lines
//! - `GET    /api/v1/quotes/export.csv`             quotes CSV
//! - `GET    /api/v1/quotes/{id}`                   detail with lines and taxes
//! - `PUT    /api/v1/quotes/{id}`                   update header, optionally replace lines
//! - `DELETE /api/v1/quotes/{id}`                   delete with its lines
//! - `POST   /api/v1/quotes/{id}/lines`             add a line
//! - `PUT    /api/v1/quotes/{id}/lines/{line_id}`   update a line
//! - `DELETE /api/v1/quotes/{id}/lines/{line_id}`   remove a line
//! - `POST   /api/v1/quotes/{id}/finalize`          accept or reject
//! - `POST   /api/v1/quotes/{id}/send`              mark as sent
//! - `GET    /api/v1/quotes/{id}/document`          PDF, or printable HTML

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{FromRequest, FromRequestParts, Path, Query, Request, State};
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use devis_core::audit::{ClientAuditSink, ClientCreated};
use devis_core::clock::SharedClock;
use devis_core::document::QuoteDocument;
use devis_core::domain::client::{Client, ClientDraft, ClientId};
use devis_core::domain::quote::{
    FinalizeDecision, LineItem, LineItemDraft, LineItemId, Quote, QuoteDraft, QuoteFilter,
    QuoteId, QuoteStatus, QuoteUpdate,
};
use devis_core::errors::{ApplicationError, DomainError, InterfaceError};
use devis_core::export::{clients_csv, export_file_name, quotes_csv, ExportKind};
use devis_core::pricing::TaxBreakdown;
use devis_core::stats::ClientQuoteStats;
use devis_db::repositories::{ClientRepository, QuoteRepository};

use crate::pdf::DocumentRenderer;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct ApiState {
    pub clients: Arc<dyn ClientRepository>,
    pub quotes: Arc<dyn QuoteRepository>,
    pub audit: Arc<dyn ClientAuditSink>,
    pub documents: Arc<DocumentRenderer>,
    pub company_name: String,
    pub clock: SharedClock,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/clients", get(list_clients).post(create_client))
        .route("/api/v1/clients/export.csv", get(export_clients))
        .route(
            "/api/v1/clients/{id}",
            get(client_detail).put(update_client).delete(delete_client),
        )
        .route("/api/v1/quotes", get(list_quotes).post(create_quote))
        .route("/api/v1/quotes/export.csv", get(export_quotes))
        .route("/api/v1/quotes/{id}", get(quote_detail).put(update_quote).delete(delete_quote))
        .route("/api/v1/quotes/{id}/lines", post(add_line))
        .route("/api/v1/quotes/{id}/lines/{line_id}", put(update_line).delete(remove_line))
        .route("/api/v1/quotes/{id}/finalize", post(finalize_quote))
        .route("/api/v1/quotes/{id}/send", post(send_quote))
        .route("/api/v1/quotes/{id}/document", get(quote_document))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Correlation and errors
// ---------------------------------------------------------------------------

/// Taken from the `x-correlation-id` request header, or a fresh uuid v4.
#[derive(Clone, Debug)]
pub struct CorrelationId(pub String);

impl<S: Send + Sync> FromRequestParts<S> for CorrelationId {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(existing) = parts.extensions.get::<CorrelationId>() {
            return Ok(existing.clone());
        }

        let supplied = parts
            .headers
            .get(CORRELATION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty() && value.len() <= 64);

        let id = Self(supplied.map(str::to_owned).unwrap_or_else(|| Uuid::new_v4().to_string()));
        parts.extensions.insert(id.clone());
        Ok(id)
    }
}

async fn correlation_of<S: Send + Sync>(parts: &mut Parts, state: &S) -> CorrelationId {
    CorrelationId::from_request_parts(parts, state).await.unwrap_or_else(|never| match never {})
}

/// `Json` whose rejections render as the API error body.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        let (mut parts, body) = request.into_parts();
        let correlation = correlation_of(&mut parts, state).await;

        match Json::<T>::from_request(Request::from_parts(parts, body), state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(correlation.malformed("request.body", "body", rejection.body_text())),
        }
    }
}

/// `Path` whose rejections render as the API error body.
pub struct ApiPath<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiPath<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let correlation = correlation_of(parts, state).await;
        match Path::<T>::from_request_parts(parts, state).await {
            Ok(Path(value)) => Ok(Self(value)),
            Err(rejection) => Err(correlation.malformed("request.path", "path", rejection.body_text())),
        }
    }
}

/// `Query` whose rejections render as the API error body.
pub struct ApiQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let correlation = correlation_of(parts, state).await;
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(Self(value)),
            Err(rejection) => {
                Err(correlation.malformed("request.query", "query", rejection.body_text()))
            }
        }
    }
}

impl CorrelationId {
    fn fail(&self, operation: &'static str, error: impl Into<ApplicationError>) -> ApiError {
        let error = error.into();
        match &error {
            ApplicationError::Persistence(_)
            | ApplicationError::Configuration(_)
            | ApplicationError::Rendering(_) => error!(
                event_name = "api.request.failed",
                correlation_id = %self.0,
                operation,
                error = %error,
                "request failed"
            ),
            _ => warn!(
                event_name = "api.request.rejected",
                correlation_id = %self.0,
                operation,
                error = %error,
                "request rejected"
            ),
        }
        ApiError(error.into_interface(self.0.clone()))
    }

    fn malformed(&self, operation: &'static str, field: &'static str, message: String) -> ApiError {
        self.fail(operation, DomainError::validation(field, message))
    }

    fn not_found(&self, operation: &'static str, what: String) -> ApiError {
        self.fail(operation, ApplicationError::NotFound(format!("{what} not found")))
    }
}

#[derive(Debug)]
pub struct ApiError(InterfaceError);

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
    correlation_id: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            InterfaceError::BadRequest { .. } => (StatusCode::BAD_REQUEST, "bad_request"),
            InterfaceError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            InterfaceError::Conflict { .. } => (StatusCode::CONFLICT, "conflict"),
            InterfaceError::ServiceUnavailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable")
            }
            InterfaceError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };

        // Persistence and configuration details stay in the logs.
        let error = match &self.0 {
            InterfaceError::BadRequest { message, .. }
            | InterfaceError::NotFound { message, .. }
            | InterfaceError::Conflict { message, .. } => message.clone(),
            other => other.user_message().to_owned(),
        };

        let body =
            ErrorBody { error, code, correlation_id: self.0.correlation_id().to_owned() };
        (status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct QuoteListQuery {
    pub state: QuoteFilter,
}

#[derive(Debug, Deserialize)]
pub struct FinalizeRequest {
    pub decision: FinalizeDecision,
}

#[derive(Debug, Serialize)]
pub struct QuoteSummary {
    #[serde(flatten)]
    pub quote: Quote,
    pub client_name: Option<String>,
    pub taxes: TaxBreakdown,
}

impl QuoteSummary {
    fn new(quote: Quote, client_name: Option<String>) -> Self {
        let taxes = quote.taxes().rounded();
        Self { quote, client_name, taxes }
    }
}

#[derive(Debug, Serialize)]
pub struct QuoteDetail {
    #[serde(flatten)]
    pub summary: QuoteSummary,
    pub lines: Vec<LineItem>,
}

#[derive(Debug, Serialize)]
pub struct ClientDetail {
    #[serde(flatten)]
    pub client: Client,
    pub stats: ClientQuoteStats,
    pub quotes: Vec<QuoteSummary>,
}

#[derive(Debug, Serialize)]
pub struct LineChange {
    pub line: LineItem,
    pub quote: QuoteSummary,
}

// ---------------------------------------------------------------------------
// Client handlers
// ---------------------------------------------------------------------------

async fn list_clients(
    State(state): State<ApiState>,
    correlation: CorrelationId,
) -> Result<Json<Vec<Client>>, ApiError> {
    let clients = state.clients.list().await.map_err(|error| correlation.fail("client.list", error))?;
    Ok(Json(clients))
}

async fn create_client(
    State(state): State<ApiState>,
    correlation: CorrelationId,
    ApiJson(draft): ApiJson<ClientDraft>,
) -> Result<(StatusCode, Json<Client>), ApiError> {
    let client =
        state.clients.create(draft).await.map_err(|error| correlation.fail("client.create", error))?;

    // Audit sinks do blocking file I/O.
    let audit = Arc::clone(&state.audit);
    let record = ClientCreated::from(&client);
    if let Err(error) = tokio::task::spawn_blocking(move || audit.client_created(&record)).await {
        warn!(
            event_name = "client.audit.join_failed",
            correlation_id = %correlation.0,
            client_id = %client.id,
            error = %error,
            "client audit task did not complete"
        );
    }

    info!(
        event_name = "client.created",
        correlation_id = %correlation.0,
        client_id = %client.id,
        "client created"
    );
    Ok((StatusCode::CREATED, Json(client)))
}

async fn client_detail(
    State(state): State<ApiState>,
    correlation: CorrelationId,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<ClientDetail>, ApiError> {
    let id = ClientId(id);
    let client = state
        .clients
        .find_by_id(id)
        .await
        .map_err(|error| correlation.fail("client.detail", error))?
        .ok_or_else(|| correlation.not_found("client.detail", format!("client {id}")))?;

    let quotes = state
        .quotes
        .list_for_client(id)
        .await
        .map_err(|error| correlation.fail("client.detail", error))?;
    let stats = ClientQuoteStats::from_quotes(&quotes);
    let quotes = quotes
        .into_iter()
        .map(|quote| QuoteSummary::new(quote, Some(client.name.clone())))
        .collect();

    Ok(Json(ClientDetail { client, stats, quotes }))
}

async fn update_client(
    State(state): State<ApiState>,
    correlation: CorrelationId,
    ApiPath(id): ApiPath<i64>,
    ApiJson(draft): ApiJson<ClientDraft>,
) -> Result<Json<Client>, ApiError> {
    let client = state
        .clients
        .update(ClientId(id), draft)
        .await
        .map_err(|error| correlation.fail("client.update", error))?;
    Ok(Json(client))
}

async fn delete_client(
    State(state): State<ApiState>,
    correlation: CorrelationId,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode, ApiError> {
    let id = ClientId(id);
    state.clients.delete(id).await.map_err(|error| correlation.fail("client.delete", error))?;

    info!(
        event_name = "client.deleted",
        correlation_id = %correlation.0,
        client_id = %id,
        "client deleted"
    );
    Ok(StatusCode::NO_CONTENT)
}

async fn export_clients(
    State(state): State<ApiState>,
    correlation: CorrelationId,
) -> Result<Response, ApiError> {
    let clients =
        state.clients.list().await.map_err(|error| correlation.fail("client.export", error))?;

    let mut rows = Vec::with_capacity(clients.len());
    for client in &clients {
        let quotes = state
            .quotes
            .list_for_client(client.id)
            .await
            .map_err(|error| correlation.fail("client.export", error))?;
        rows.push((client, ClientQuoteStats::from_quotes(&quotes)));
    }

    let body = clients_csv(rows).map_err(|error| {
        correlation.fail("client.export", ApplicationError::Rendering(error.to_string()))
    })?;
    Ok(csv_response(export_file_name(ExportKind::Clients, state.clock.now()), body))
}

// ---------------------------------------------------------------------------
// Quote handlers
// ---------------------------------------------------------------------------

async fn list_quotes(
    State(state): State<ApiState>,
    correlation: CorrelationId,
    ApiQuery(query): ApiQuery<QuoteListQuery>,
) -> Result<Json<Vec<QuoteSummary>>, ApiError> {
    let quotes =
        state.quotes.list(query.state).await.map_err(|error| correlation.fail("quote.list", error))?;
    let names = client_names(&state, &correlation, "quote.list").await?;

    Ok(Json(
        quotes
            .into_iter()
            .map(|quote| {
                let client_name = names.get(&quote.client_id).cloned();
                QuoteSummary::new(quote, client_name)
            })
            .collect(),
    ))
}

async fn create_quote(
    State(state): State<ApiState>,
    correlation: CorrelationId,
    ApiJson(draft): ApiJson<QuoteDraft>,
) -> Result<(StatusCode, Json<QuoteDetail>), ApiError> {
    let quote =
        state.quotes.create(draft).await.map_err(|error| correlation.fail("quote.create", error))?;

    info!(
        event_name = "quote.created",
        correlation_id = %correlation.0,
        quote_id = %quote.id,
        client_id = %quote.client_id,
        quote_number = %quote.number,
        "quote created"
    );
    let detail = quote_detail_of(&state, &correlation, quote).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

async fn quote_detail(
    State(state): State<ApiState>,
    correlation: CorrelationId,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<QuoteDetail>, ApiError> {
    let quote = load_quote(&state, &correlation, QuoteId(id)).await?;
    Ok(Json(quote_detail_of(&state, &correlation, quote).await?))
}

async fn update_quote(
    State(state): State<ApiState>,
    correlation: CorrelationId,
    ApiPath(id): ApiPath<i64>,
    ApiJson(update): ApiJson<QuoteUpdate>,
) -> Result<Json<QuoteDetail>, ApiError> {
    let quote = state
        .quotes
        .update(QuoteId(id), update)
        .await
        .map_err(|error| correlation.fail("quote.update", error))?;
    Ok(Json(quote_detail_of(&state, &correlation, quote).await?))
}

async fn delete_quote(
    State(state): State<ApiState>,
    correlation: CorrelationId,
    ApiPath(id): ApiPath<i64>,
) -> Result<StatusCode, ApiError> {
    let id = QuoteId(id);
    state.quotes.delete(id).await.map_err(|error| correlation.fail("quote.delete", error))?;

    info!(event_name = "quote.deleted", correlation_id = %correlation.0, quote_id = %id, "quote deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn add_line(
    State(state): State<ApiState>,
    correlation: CorrelationId,
    ApiPath(id): ApiPath<i64>,
    ApiJson(line): ApiJson<LineItemDraft>,
) -> Result<(StatusCode, Json<LineChange>), ApiError> {
    let id = QuoteId(id);
    let line =
        state.quotes.add_line(id, line).await.map_err(|error| correlation.fail("line.add", error))?;
    let quote = summary_of(&state, &correlation, load_quote(&state, &correlation, id).await?).await?;
    Ok((StatusCode::CREATED, Json(LineChange { line, quote })))
}

async fn update_line(
    State(state): State<ApiState>,
    correlation: CorrelationId,
    ApiPath((id, line_id)): ApiPath<(i64, i64)>,
    ApiJson(line): ApiJson<LineItemDraft>,
) -> Result<Json<LineChange>, ApiError> {
    let id = QuoteId(id);
    let line = state
        .quotes
        .update_line(id, LineItemId(line_id), line)
        .await
        .map_err(|error| correlation.fail("line.update", error))?;
    let quote = summary_of(&state, &correlation, load_quote(&state, &correlation, id).await?).await?;
    Ok(Json(LineChange { line, quote }))
}

async fn remove_line(
    State(state): State<ApiState>,
    correlation: CorrelationId,
    ApiPath((id, line_id)): ApiPath<(i64, i64)>,
) -> Result<Json<QuoteSummary>, ApiError> {
    let id = QuoteId(id);
    state
        .quotes
        .remove_line(id, LineItemId(line_id))
        .await
        .map_err(|error| correlation.fail("line.remove", error))?;
    let quote = load_quote(&state, &correlation, id).await?;
    Ok(Json(summary_of(&state, &correlation, quote).await?))
}

async fn finalize_quote(
    State(state): State<ApiState>,
    correlation: CorrelationId,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<FinalizeRequest>,
) -> Result<Json<QuoteSummary>, ApiError> {
    let status = request.decision.status();
    let quote = change_status(&state, &correlation, QuoteId(id), status).await?;
    Ok(Json(summary_of(&state, &correlation, quote).await?))
}

async fn send_quote(
    State(state): State<ApiState>,
    correlation: CorrelationId,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<QuoteSummary>, ApiError> {
    let quote = change_status(&state, &correlation, QuoteId(id), QuoteStatus::Sent).await?;
    Ok(Json(summary_of(&state, &correlation, quote).await?))
}

async fn quote_document(
    State(state): State<ApiState>,
    correlation: CorrelationId,
    ApiPath(id): ApiPath<i64>,
) -> Result<Response, ApiError> {
    let quote = load_quote(&state, &correlation, QuoteId(id)).await?;
    let client = state
        .clients
        .find_by_id(quote.client_id)
        .await
        .map_err(|error| correlation.fail("quote.document", error))?
        .ok_or_else(|| correlation.not_found("quote.document", format!("client {}", quote.client_id)))?;
    let lines =
        state.quotes.lines(quote.id).await.map_err(|error| correlation.fail("quote.document", error))?;

    let document = QuoteDocument::build(&state.company_name, &quote, &client, &lines);
    let rendered = state.documents.render(&document).await.map_err(|error| {
        correlation.fail("quote.document", ApplicationError::Rendering(error.to_string()))
    })?;

    info!(
        event_name = "quote.document.rendered",
        correlation_id = %correlation.0,
        quote_id = %quote.id,
        quote_number = %quote.number,
        "quote document rendered"
    );
    Ok(rendered.into_response(&document.file_name("pdf")))
}

async fn export_quotes(
    State(state): State<ApiState>,
    correlation: CorrelationId,
) -> Result<Response, ApiError> {
    let quotes = state
        .quotes
        .list(QuoteFilter::All)
        .await
        .map_err(|error| correlation.fail("quote.export", error))?;
    let names = client_names(&state, &correlation, "quote.export").await?;

    let body = quotes_csv(&quotes, |quote| names.get(&quote.client_id).map(String::as_str))
        .map_err(|error| {
            correlation.fail("quote.export", ApplicationError::Rendering(error.to_string()))
        })?;
    Ok(csv_response(export_file_name(ExportKind::Quotes, state.clock.now()), body))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn load_quote(
    state: &ApiState,
    correlation: &CorrelationId,
    id: QuoteId,
) -> Result<Quote, ApiError> {
    state
        .quotes
        .find_by_id(id)
        .await
        .map_err(|error| correlation.fail("quote.load", error))?
        .ok_or_else(|| correlation.not_found("quote.load", format!("quote {id}")))
}

async fn change_status(
    state: &ApiState,
    correlation: &CorrelationId,
    id: QuoteId,
    status: QuoteStatus,
) -> Result<Quote, ApiError> {
    let quote = state
        .quotes
        .set_status(id, status)
        .await
        .map_err(|error| correlation.fail("quote.status", error))?;

    info!(
        event_name = "quote.status_changed",
        correlation_id = %correlation.0,
        quote_id = %quote.id,
        status = %status,
        "quote status changed"
    );
    Ok(quote)
}

async fn summary_of(
    state: &ApiState,
    correlation: &CorrelationId,
    quote: Quote,
) -> Result<QuoteSummary, ApiError> {
    let client_name = state
        .clients
        .find_by_id(quote.client_id)
        .await
        .map_err(|error| correlation.fail("quote.summary", error))?
        .map(|client| client.name);
    Ok(QuoteSummary::new(quote, client_name))
}

async fn quote_detail_of(
    state: &ApiState,
    correlation: &CorrelationId,
    quote: Quote,
) -> Result<QuoteDetail, ApiError> {
    let lines =
        state.quotes.lines(quote.id).await.map_err(|error| correlation.fail("quote.detail", error))?;
    let summary = summary_of(state, correlation, quote).await?;
    Ok(QuoteDetail { summary, lines })
}

async fn client_names(
    state: &ApiState,
    correlation: &CorrelationId,
    operation: &'static str,
) -> Result<HashMap<ClientId, String>, ApiError> {
    let clients = state.clients.list().await.map_err(|error| correlation.fail(operation, error))?;
    Ok(clients.into_iter().map(|client| (client.id, client.name)).collect())
}

fn csv_response(file_name: String, body: String) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{file_name}\"")),
        ],
        body,
    )
        .into_response()
}
