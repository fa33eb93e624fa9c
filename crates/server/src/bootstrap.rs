use std::sync::Arc;

use devis_core::audit::{ClientAuditSink, CsvFileAuditSink, NoopAuditSink};
use devis_core::clock::{SharedClock, SystemClock};
use devis_core::config::{AppConfig, ConfigError, LoadOptions};
use devis_db::repositories::{SqlClientRepository, SqlQuoteRepository};
use devis_db::{connect_with_settings, migrations, DbPool};
use thiserror::Error;
use tracing::info;

use crate::api::ApiState;
use crate::pdf::{DocumentError, DocumentRenderer};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub api_state: ApiState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("document renderer failed to initialize: {0}")]
    Documents(#[from] DocumentError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let audit: Arc<dyn ClientAuditSink> = if config.audit.enabled {
        info!(
            event_name = "system.bootstrap.audit_enabled",
            correlation_id = "bootstrap",
            path = %config.audit.clients_csv_path.display(),
            "client audit log enabled"
        );
        Arc::new(CsvFileAuditSink::new(config.audit.clients_csv_path.clone()))
    } else {
        Arc::new(NoopAuditSink)
    };

    let documents = DocumentRenderer::new(config.documents.wkhtmltopdf)?;
    info!(
        event_name = "system.bootstrap.documents_ready",
        correlation_id = "bootstrap",
        pdf_conversion = documents.converts_to_pdf(),
        "quote document renderer ready"
    );

    let clock: SharedClock = Arc::new(SystemClock);
    let api_state = ApiState {
        clients: Arc::new(SqlClientRepository::with_clock(db_pool.clone(), clock.clone())),
        quotes: Arc::new(SqlQuoteRepository::with_clock(db_pool.clone(), clock.clone())),
        audit,
        documents: Arc::new(documents),
        company_name: config.documents.company_name.clone(),
        clock,
    };

    Ok(Application { config, db_pool, api_state })
}

#[cfg(test)]
mod tests {
    use devis_core::config::{ConfigOverrides, LoadOptions};
    use devis_db::repositories::ClientRepository;

    use crate::bootstrap::{bootstrap, BootstrapError};

    #[tokio::test]
    async fn bootstrap_fails_fast_on_unsupported_database_url() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("postgres://localhost/devis".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let error = result.err().expect("bootstrap should fail");
        assert!(matches!(error, BootstrapError::Config(_)));
        assert!(error.to_string().contains("database.url"));
    }

    #[tokio::test]
    async fn bootstrap_migrates_and_wires_repositories() {
        let app = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                audit_enabled: Some(false),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await
        .expect("bootstrap should succeed with valid overrides");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('client', 'quote', 'line_item')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("tables should exist after bootstrap");
        assert_eq!(table_count, 3);

        let clients = app.api_state.clients.list().await.expect("list clients");
        assert!(clients.is_empty());

        app.db_pool.close().await;
    }
}
