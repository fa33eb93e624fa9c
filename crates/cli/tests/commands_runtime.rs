use std::env;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use devis_cli::commands::{config, doctor, migrate, seed};
use devis_core::domain::client::ClientDraft;
use devis_db::repositories::{ClientRepository, SqlClientRepository};
use devis_db::{connect, migrations};
use serde_json::Value;

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("DEVIS_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_for_non_sqlite_url() {
    with_env(&[("DEVIS_DATABASE_URL", "postgres://localhost/devis")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn seed_lists_demo_quotes() {
    with_env(&[("DEVIS_DATABASE_URL", "sqlite::memory:")], || {
        let result = seed::run();
        assert_eq!(result.exit_code, 0, "expected seed success: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "seed");
        assert_eq!(payload["status"], "ok");

        let message = payload["message"].as_str().unwrap_or("");
        assert!(message.starts_with("demo dataset loaded: 3 clients, 4 quotes"));
        assert!(message.contains("Atelier Roux (accepted, 1876.00 HT)"));
        assert!(message.contains("Boulangerie Marchand"));
    });
}

#[test]
fn seed_leaves_populated_database_untouched() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = sqlite_file_url(&dir.path().join("devis.db"));

    with_env(&[("DEVIS_DATABASE_URL", url.as_str())], || {
        let first = seed::run();
        assert_eq!(first.exit_code, 0, "expected first seed invocation success");

        let second = seed::run();
        assert_eq!(second.exit_code, 0, "expected second seed invocation success");
        let payload = parse_payload(&second.output);
        assert_eq!(payload["status"], "ok");
        assert!(payload["message"].as_str().unwrap_or("").contains("already holds clients"));
    });
}

#[test]
fn seed_skips_verification_when_database_holds_other_clients() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = sqlite_file_url(&dir.path().join("devis.db"));

    let runtime =
        tokio::runtime::Builder::new_current_thread().enable_all().build().expect("runtime");
    runtime.block_on(async {
        let pool = connect(&url).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        SqlClientRepository::new(pool.clone())
            .create(ClientDraft {
                name: "Menuiserie Dubois".to_string(),
                email: "contact@dubois.fr".to_string(),
                ..ClientDraft::default()
            })
            .await
            .expect("create client");
        pool.close().await;
    });

    with_env(&[("DEVIS_DATABASE_URL", url.as_str())], || {
        let result = seed::run();
        assert_eq!(result.exit_code, 0, "expected seed success: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "ok");
        assert!(payload["message"].as_str().unwrap_or("").contains("already holds clients"));
    });
}

#[test]
fn doctor_reports_pass_as_json() {
    let dir = tempfile::tempdir().expect("tempdir");
    let audit_path = dir.path().join("clients_audit.csv");

    with_env(
        &[
            ("DEVIS_DATABASE_URL", "sqlite::memory:"),
            ("DEVIS_AUDIT_CLIENTS_CSV_PATH", audit_path.to_str().expect("utf-8 path")),
        ],
        || {
            let result = doctor::run(true);
            assert_eq!(result.exit_code, 0, "expected doctor pass: {}", result.output);

            let payload = parse_payload(&result.output);
            assert_eq!(payload["overall_status"], "pass");
            let names: Vec<&str> = payload["checks"]
                .as_array()
                .expect("checks")
                .iter()
                .filter_map(|check| check["name"].as_str())
                .collect();
            assert_eq!(
                names,
                vec!["config_validation", "database_connectivity", "audit_log_destination"]
            );
        },
    );
}

#[test]
fn doctor_fails_with_config_exit_code() {
    with_env(&[("DEVIS_DATABASE_URL", "mysql://localhost/devis")], || {
        let result = doctor::run(false);
        assert_eq!(result.exit_code, 2);
        assert!(result.output.starts_with("doctor: one or more readiness checks failed"));
        assert!(result.output.contains("- [skip] database_connectivity"));
    });
}

#[test]
fn config_attributes_env_sources() {
    with_env(
        &[("DEVIS_DATABASE_URL", "sqlite::memory:"), ("DEVIS_LOG_LEVEL", "debug")],
        || {
            let output = config::run();
            assert!(output
                .contains("- database.url = sqlite::memory: (source: env (DEVIS_DATABASE_URL))"));
            assert!(output.contains("- logging.level = debug (source: env (DEVIS_LOG_LEVEL))"));
            assert!(output.contains("- server.port = 8080 (source: default)"));
        },
    );
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn sqlite_file_url(path: &Path) -> String {
    format!("sqlite://{}", path.display())
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "DEVIS_DATABASE_URL",
        "DEVIS_DATABASE_MAX_CONNECTIONS",
        "DEVIS_DATABASE_TIMEOUT_SECS",
        "DEVIS_SERVER_BIND_ADDRESS",
        "DEVIS_SERVER_PORT",
        "DEVIS_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "DEVIS_AUDIT_ENABLED",
        "DEVIS_AUDIT_CLIENTS_CSV_PATH",
        "DEVIS_DOCUMENTS_COMPANY_NAME",
        "DEVIS_DOCUMENTS_WKHTMLTOPDF",
        "DEVIS_LOGGING_LEVEL",
        "DEVIS_LOGGING_FORMAT",
        "DEVIS_LOG_LEVEL",
        "DEVIS_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
