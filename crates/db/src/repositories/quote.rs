use std::str::FromStr;
use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tracing::warn;

use devis_core::clock::{SharedClock, SystemClock};
use devis_core::domain::client::ClientId;
use devis_core::domain::quote::{
    price_lines, LineItem, LineItemDraft, LineItemId, PricedLine, Quote, QuoteDraft, QuoteFilter,
    QuoteId, QuoteStatus, QuoteUpdate,
};
use devis_core::numbering::{next_quote_number, NumberingPeriod, QuoteNumber};
use devis_core::pricing::pre_tax_total;

use super::{format_timestamp, parse_timestamp, QuoteRepository, RepositoryError};
use crate::DbPool;

/// Creation attempts before a numbering collision is reported as a conflict.
pub const MAX_NUMBERING_ATTEMPTS: u32 = 5;

const QUOTE_COLUMNS: &str = "id, number, client_id, created_at, valid_until, pre_tax_total, \
                             payment_terms, notes, status, created_by";
const LINE_COLUMNS: &str = "id, quote_id, description, quantity, unit_price, amount";
const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct SqlQuoteRepository {
    pool: DbPool,
    clock: SharedClock,
}

impl SqlQuoteRepository {
    pub fn new(pool: DbPool) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    pub fn with_clock(pool: DbPool, clock: SharedClock) -> Self {
        Self { pool, clock }
    }

    async fn try_create(
        &self,
        draft: &QuoteDraft,
        lines: &[PricedLine],
    ) -> Result<QuoteId, RepositoryError> {
        let created_at = self.clock.now();
        let period = NumberingPeriod::containing(created_at);
        let mut tx = self.pool.begin().await?;

        // Takes the write lock and checks the client in one statement.
        let client = sqlx::query("UPDATE client SET name = name WHERE id = ?")
            .bind(draft.client_id.0)
            .execute(&mut *tx)
            .await?;
        if client.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("client {}", draft.client_id)));
        }

        let existing: Vec<String> = sqlx::query_scalar("SELECT number FROM quote WHERE number LIKE ?")
            .bind(format!("{}%", period.prefix()))
            .fetch_all(&mut *tx)
            .await?;
        let number = next_quote_number(period, existing.iter().map(String::as_str));

        let total = pre_tax_total(lines.iter().map(|line| line.amount))?;
        let timestamp = format_timestamp(created_at);
        let result = sqlx::query(
            "INSERT INTO quote (number, client_id, created_at, valid_until, pre_tax_total,
                                payment_terms, notes, status, created_by, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(number.to_string())
        .bind(draft.client_id.0)
        .bind(&timestamp)
        .bind(draft.valid_until_or_default(created_at).format(DATE_FORMAT).to_string())
        .bind(total.to_string())
        .bind(draft.payment_terms.trim())
        .bind(&draft.notes)
        .bind(QuoteStatus::Draft.as_str())
        .bind(&draft.created_by)
        .bind(&timestamp)
        .execute(&mut *tx)
        .await?;

        let id = QuoteId(result.last_insert_rowid());
        insert_lines(&mut tx, id, lines).await?;
        recompute_in(&mut tx, id).await?;
        tx.commit().await?;
        Ok(id)
    }

    async fn fetch(&self, id: QuoteId) -> Result<Quote, RepositoryError> {
        self.find_by_id(id).await?.ok_or_else(|| RepositoryError::NotFound(format!("quote {id}")))
    }
}

fn quote_from_row(row: &SqliteRow) -> Result<Quote, RepositoryError> {
    let number: String = row.try_get("number")?;
    let status: String = row.try_get("status")?;

    Ok(Quote {
        id: QuoteId(row.try_get("id")?),
        number: QuoteNumber::parse(&number)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?,
        client_id: ClientId(row.try_get("client_id")?),
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        valid_until: parse_date("valid_until", row.try_get("valid_until")?)?,
        pre_tax_total: parse_money("pre_tax_total", row.try_get("pre_tax_total")?)?,
        payment_terms: row.try_get("payment_terms")?,
        notes: row.try_get("notes")?,
        status: QuoteStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown quote status `{status}`")))?,
        created_by: row.try_get("created_by")?,
    })
}

fn line_from_row(row: &SqliteRow) -> Result<LineItem, RepositoryError> {
    Ok(LineItem {
        id: LineItemId(row.try_get("id")?),
        quote_id: QuoteId(row.try_get("quote_id")?),
        description: row.try_get("description")?,
        quantity: parse_u32("quantity", row.try_get("quantity")?)?,
        unit_price: parse_money("unit_price", row.try_get("unit_price")?)?,
        amount: parse_money("amount", row.try_get("amount")?)?,
    })
}

fn parse_money(column: &str, value: String) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(&value).map_err(|error| {
        RepositoryError::Decode(format!("invalid amount in `{column}`: `{value}` ({error})"))
    })
}

fn parse_date(column: &str, value: String) -> Result<NaiveDate, RepositoryError> {
    NaiveDate::parse_from_str(&value, DATE_FORMAT).map_err(|error| {
        RepositoryError::Decode(format!("invalid date in `{column}`: `{value}` ({error})"))
    })
}

fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

/// Unique-number collisions and lock contention are worth another attempt.
fn is_retryable(error: &RepositoryError) -> bool {
    let RepositoryError::Database(error) = error else {
        return false;
    };
    let Some(database_error) = error.as_database_error() else {
        return false;
    };
    database_error.is_unique_violation()
        || matches!(database_error.code().as_deref(), Some("5" | "261" | "517"))
}

/// Touches the quote row so the transaction owns the write lock before reading lines.
async fn lock_quote(
    conn: &mut SqliteConnection,
    id: QuoteId,
    updated_at: &str,
) -> Result<(), RepositoryError> {
    let result = sqlx::query("UPDATE quote SET updated_at = ? WHERE id = ?")
        .bind(updated_at)
        .bind(id.0)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(RepositoryError::NotFound(format!("quote {id}")));
    }
    Ok(())
}

async fn insert_lines(
    conn: &mut SqliteConnection,
    id: QuoteId,
    lines: &[PricedLine],
) -> Result<Vec<LineItem>, RepositoryError> {
    let mut inserted = Vec::with_capacity(lines.len());
    for line in lines {
        let result = sqlx::query(
            "INSERT INTO line_item (quote_id, description, quantity, unit_price, amount)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id.0)
        .bind(&line.description)
        .bind(i64::from(line.quantity))
        .bind(line.unit_price.to_string())
        .bind(line.amount.to_string())
        .execute(&mut *conn)
        .await?;

        inserted.push(LineItem {
            id: LineItemId(result.last_insert_rowid()),
            quote_id: id,
            description: line.description.clone(),
            quantity: line.quantity,
            unit_price: line.unit_price,
            amount: line.amount,
        });
    }
    Ok(inserted)
}

async fn recompute_in(conn: &mut SqliteConnection, id: QuoteId) -> Result<Decimal, RepositoryError> {
    let amounts: Vec<String> = sqlx::query_scalar("SELECT amount FROM line_item WHERE quote_id = ?")
        .bind(id.0)
        .fetch_all(&mut *conn)
        .await?;
    let amounts =
        amounts.into_iter().map(|amount| parse_money("amount", amount)).collect::<Result<Vec<_>, _>>()?;
    let total = pre_tax_total(amounts)?;

    sqlx::query("UPDATE quote SET pre_tax_total = ? WHERE id = ?")
        .bind(total.to_string())
        .bind(id.0)
        .execute(&mut *conn)
        .await?;
    Ok(total)
}

async fn client_exists(conn: &mut SqliteConnection, id: ClientId) -> Result<bool, RepositoryError> {
    let exists: i64 = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM client WHERE id = ?)")
        .bind(id.0)
        .fetch_one(&mut *conn)
        .await?;
    Ok(exists == 1)
}

#[async_trait::async_trait]
impl QuoteRepository for SqlQuoteRepository {
    async fn create(&self, draft: QuoteDraft) -> Result<Quote, RepositoryError> {
        let lines = price_lines(&draft.lines)?;

        let mut attempt = 1;
        let id = loop {
            match self.try_create(&draft, &lines).await {
                Ok(id) => break id,
                Err(error) if is_retryable(&error) => {
                    if attempt >= MAX_NUMBERING_ATTEMPTS {
                        return Err(RepositoryError::Conflict(format!(
                            "could not assign a unique quote number after {attempt} attempts"
                        )));
                    }
                    warn!(
                        event_name = "quote.numbering.retry",
                        client_id = draft.client_id.0,
                        attempt,
                        error = %error,
                        "quote number collided, retrying"
                    );
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        };

        self.fetch(id).await
    }

    async fn find_by_id(&self, id: QuoteId) -> Result<Option<Quote>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {QUOTE_COLUMNS} FROM quote WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(quote_from_row).transpose()
    }

    async fn list(&self, filter: QuoteFilter) -> Result<Vec<Quote>, RepositoryError> {
        let statuses = filter.statuses();
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "SELECT {QUOTE_COLUMNS} FROM quote WHERE status IN ({placeholders})
             ORDER BY created_at DESC, id DESC"
        );

        let mut query = sqlx::query(&sql);
        for status in statuses {
            query = query.bind(status.as_str());
        }
        let rows = query.fetch_all(&self.pool).await?;

        rows.iter().map(quote_from_row).collect()
    }

    async fn list_for_client(&self, client_id: ClientId) -> Result<Vec<Quote>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {QUOTE_COLUMNS} FROM quote WHERE client_id = ? ORDER BY created_at DESC, id DESC"
        ))
        .bind(client_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(quote_from_row).collect()
    }

    async fn update(&self, id: QuoteId, update: QuoteUpdate) -> Result<Quote, RepositoryError> {
        let lines = update.lines.as_deref().map(price_lines).transpose()?;
        let mut tx = self.pool.begin().await?;

        lock_quote(&mut tx, id, &format_timestamp(self.clock.now())).await?;
        if !client_exists(&mut tx, update.client_id).await? {
            return Err(RepositoryError::NotFound(format!("client {}", update.client_id)));
        }

        sqlx::query(
            "UPDATE quote SET client_id = ?, valid_until = ?, payment_terms = ?, notes = ?
             WHERE id = ?",
        )
        .bind(update.client_id.0)
        .bind(update.valid_until.format(DATE_FORMAT).to_string())
        .bind(update.payment_terms.trim())
        .bind(&update.notes)
        .bind(id.0)
        .execute(&mut *tx)
        .await?;

        if let Some(lines) = lines {
            sqlx::query("DELETE FROM line_item WHERE quote_id = ?").bind(id.0).execute(&mut *tx).await?;
            insert_lines(&mut tx, id, &lines).await?;
            recompute_in(&mut tx, id).await?;
        }

        tx.commit().await?;
        self.fetch(id).await
    }

    async fn set_status(&self, id: QuoteId, status: QuoteStatus) -> Result<Quote, RepositoryError> {
        let result = sqlx::query("UPDATE quote SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(format_timestamp(self.clock.now()))
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("quote {id}")));
        }

        self.fetch(id).await
    }

    async fn delete(&self, id: QuoteId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM quote WHERE id = ?").bind(id.0).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("quote {id}")));
        }
        Ok(())
    }

    async fn lines(&self, id: QuoteId) -> Result<Vec<LineItem>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {LINE_COLUMNS} FROM line_item WHERE quote_id = ? ORDER BY id"
        ))
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(line_from_row).collect()
    }

    async fn add_line(&self, id: QuoteId, line: LineItemDraft) -> Result<LineItem, RepositoryError> {
        let priced = line.price()?;
        let mut tx = self.pool.begin().await?;

        lock_quote(&mut tx, id, &format_timestamp(self.clock.now())).await?;
        let mut inserted = insert_lines(&mut tx, id, std::slice::from_ref(&priced)).await?;
        recompute_in(&mut tx, id).await?;
        tx.commit().await?;

        inserted.pop().ok_or_else(|| RepositoryError::Decode("line insert returned no row".to_owned()))
    }

    async fn update_line(
        &self,
        id: QuoteId,
        line_id: LineItemId,
        line: LineItemDraft,
    ) -> Result<LineItem, RepositoryError> {
        let priced = line.price()?;
        let mut tx = self.pool.begin().await?;

        lock_quote(&mut tx, id, &format_timestamp(self.clock.now())).await?;
        let result = sqlx::query(
            "UPDATE line_item SET description = ?, quantity = ?, unit_price = ?, amount = ?
             WHERE id = ? AND quote_id = ?",
        )
        .bind(&priced.description)
        .bind(i64::from(priced.quantity))
        .bind(priced.unit_price.to_string())
        .bind(priced.amount.to_string())
        .bind(line_id.0)
        .bind(id.0)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("line {line_id} of quote {id}")));
        }

        recompute_in(&mut tx, id).await?;
        tx.commit().await?;

        Ok(LineItem {
            id: line_id,
            quote_id: id,
            description: priced.description,
            quantity: priced.quantity,
            unit_price: priced.unit_price,
            amount: priced.amount,
        })
    }

    async fn remove_line(&self, id: QuoteId, line_id: LineItemId) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        lock_quote(&mut tx, id, &format_timestamp(self.clock.now())).await?;
        let result = sqlx::query("DELETE FROM line_item WHERE id = ? AND quote_id = ?")
            .bind(line_id.0)
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("line {line_id} of quote {id}")));
        }

        recompute_in(&mut tx, id).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn replace_lines(
        &self,
        id: QuoteId,
        lines: Vec<LineItemDraft>,
    ) -> Result<Vec<LineItem>, RepositoryError> {
        let priced = price_lines(&lines)?;
        let mut tx = self.pool.begin().await?;

        lock_quote(&mut tx, id, &format_timestamp(self.clock.now())).await?;
        sqlx::query("DELETE FROM line_item WHERE quote_id = ?").bind(id.0).execute(&mut *tx).await?;
        let inserted = insert_lines(&mut tx, id, &priced).await?;
        recompute_in(&mut tx, id).await?;
        tx.commit().await?;

        Ok(inserted)
    }

    async fn recompute_total(&self, id: QuoteId) -> Result<Decimal, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        lock_quote(&mut tx, id, &format_timestamp(self.clock.now())).await?;
        let total = recompute_in(&mut tx, id).await?;
        tx.commit().await?;

        Ok(total)
    }
}
