use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tracing::warn;

use devis_core::clock::SharedClock;
use devis_db::migrations::MIGRATOR;
use devis_db::{ping, DbPool};

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    clock: SharedClock,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Readiness {
    pub ready: bool,
    pub detail: String,
}

impl Readiness {
    fn ready(detail: impl Into<String>) -> Self {
        Self { ready: true, detail: detail.into() }
    }

    fn degraded(detail: impl Into<String>) -> Self {
        Self { ready: false, detail: detail.into() }
    }
}

/// `/health` payload: the store answers and its schema is current.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub database: Readiness,
    pub schema: Readiness,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, clock: SharedClock) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, clock })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthReport>) {
    let database = match ping(&state.db_pool).await {
        Ok(()) => Readiness::ready("database answered"),
        Err(error) => Readiness::degraded(format!("database unreachable: {error}")),
    };
    let schema = if database.ready {
        schema_readiness(&state.db_pool).await
    } else {
        Readiness::degraded("skipped: database unreachable")
    };

    let ready = database.ready && schema.ready;
    if !ready {
        warn!(
            event_name = "system.health.degraded",
            database = %database.detail,
            schema = %schema.detail,
            "health check degraded"
        );
    }

    let report = HealthReport {
        status: if ready { "ready" } else { "degraded" },
        database,
        schema,
        checked_at: state.clock.now().to_rfc3339(),
    };
    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(report))
}

/// Compares the applied migrations with the ones compiled into the binary.
async fn schema_readiness(pool: &DbPool) -> Readiness {
    let expected =
        MIGRATOR.iter().filter(|migration| !migration.migration_type.is_down_migration()).count();
    let applied: Result<i64, sqlx::Error> =
        sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
            .fetch_one(pool)
            .await;

    match applied {
        Ok(applied) if applied == expected as i64 => {
            Readiness::ready(format!("{applied}/{expected} migrations applied"))
        }
        Ok(applied) => Readiness::degraded(format!("{applied}/{expected} migrations applied")),
        Err(error) => Readiness::degraded(format!("migration history unreadable: {error}")),
    }
}
