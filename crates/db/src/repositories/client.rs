use std::sync::Arc;

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use devis_core::clock::{SharedClock, SystemClock};
use devis_core::domain::client::{Client, ClientDraft, ClientId};

use super::{format_timestamp, parse_timestamp, ClientRepository, RepositoryError};
use crate::DbPool;

const CLIENT_COLUMNS: &str = "id, name, email, phone, address, notes, created_at, created_by";

pub struct SqlClientRepository {
    pool: DbPool,
    clock: SharedClock,
}

impl SqlClientRepository {
    pub fn new(pool: DbPool) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    pub fn with_clock(pool: DbPool, clock: SharedClock) -> Self {
        Self { pool, clock }
    }
}

fn client_from_row(row: &SqliteRow) -> Result<Client, RepositoryError> {
    Ok(Client {
        id: ClientId(row.try_get("id")?),
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        address: row.try_get("address")?,
        notes: row.try_get("notes")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        created_by: row.try_get("created_by")?,
    })
}

#[async_trait::async_trait]
impl ClientRepository for SqlClientRepository {
    async fn create(&self, draft: ClientDraft) -> Result<Client, RepositoryError> {
        let draft = draft.normalized()?;
        let created_at = self.clock.now();

        let result = sqlx::query(
            "INSERT INTO client (name, email, phone, address, notes, created_at, created_by)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&draft.name)
        .bind(&draft.email)
        .bind(&draft.phone)
        .bind(&draft.address)
        .bind(&draft.notes)
        .bind(format_timestamp(created_at))
        .bind(&draft.created_by)
        .execute(&self.pool)
        .await?;

        let id = ClientId(result.last_insert_rowid());
        self.find_by_id(id).await?.ok_or_else(|| RepositoryError::NotFound(format!("client {id}")))
    }

    async fn update(&self, id: ClientId, draft: ClientDraft) -> Result<Client, RepositoryError> {
        let draft = draft.normalized()?;

        // The creator reference is set once, at creation.
        let result = sqlx::query(
            "UPDATE client SET name = ?, email = ?, phone = ?, address = ?, notes = ? WHERE id = ?",
        )
        .bind(&draft.name)
        .bind(&draft.email)
        .bind(&draft.phone)
        .bind(&draft.address)
        .bind(&draft.notes)
        .bind(id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("client {id}")));
        }

        self.find_by_id(id).await?.ok_or_else(|| RepositoryError::NotFound(format!("client {id}")))
    }

    async fn find_by_id(&self, id: ClientId) -> Result<Option<Client>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {CLIENT_COLUMNS} FROM client WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(client_from_row).transpose()
    }

    async fn list(&self) -> Result<Vec<Client>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {CLIENT_COLUMNS} FROM client ORDER BY name COLLATE NOCASE, id"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(client_from_row).collect()
    }

    async fn delete(&self, id: ClientId) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // Write first so the transaction holds the lock before counting.
        let locked = sqlx::query("UPDATE client SET name = name WHERE id = ?")
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        if locked.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("client {id}")));
        }

        let quote_count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM quote WHERE client_id = ?")
            .bind(id.0)
            .fetch_one(&mut *tx)
            .await?;
        if quote_count > 0 {
            return Err(RepositoryError::Conflict(format!(
                "client {id} still has {quote_count} quote(s) and cannot be deleted"
            )));
        }

        sqlx::query("DELETE FROM client WHERE id = ?").bind(id.0).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }
}
