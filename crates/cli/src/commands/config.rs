use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use devis_core::config::{AppConfig, LoadOptions, DEFAULT_CONFIG_FILE};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in effective_values(&config) {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    lines.join("\n")
}

struct ConfigField {
    key: &'static str,
    env_keys: &'static [&'static str],
    value: String,
}

fn field(key: &'static str, env_keys: &'static [&'static str], value: impl ToString) -> ConfigField {
    ConfigField { key, env_keys, value: value.to_string() }
}

fn effective_values(config: &AppConfig) -> Vec<ConfigField> {
    vec![
        field("database.url", &["DEVIS_DATABASE_URL"], &config.database.url),
        field(
            "database.max_connections",
            &["DEVIS_DATABASE_MAX_CONNECTIONS"],
            config.database.max_connections,
        ),
        field("database.timeout_secs", &["DEVIS_DATABASE_TIMEOUT_SECS"], config.database.timeout_secs),
        field("server.bind_address", &["DEVIS_SERVER_BIND_ADDRESS"], &config.server.bind_address),
        field("server.port", &["DEVIS_SERVER_PORT"], config.server.port),
        field(
            "server.graceful_shutdown_secs",
            &["DEVIS_SERVER_GRACEFUL_SHUTDOWN_SECS"],
            config.server.graceful_shutdown_secs,
        ),
        field("audit.enabled", &["DEVIS_AUDIT_ENABLED"], config.audit.enabled),
        field(
            "audit.clients_csv_path",
            &["DEVIS_AUDIT_CLIENTS_CSV_PATH"],
            config.audit.clients_csv_path.display(),
        ),
        field(
            "documents.company_name",
            &["DEVIS_DOCUMENTS_COMPANY_NAME"],
            &config.documents.company_name,
        ),
        field("documents.wkhtmltopdf", &["DEVIS_DOCUMENTS_WKHTMLTOPDF"], config.documents.wkhtmltopdf),
        field("logging.level", &["DEVIS_LOGGING_LEVEL", "DEVIS_LOG_LEVEL"], &config.logging.level),
        field(
            "logging.format",
            &["DEVIS_LOGGING_FORMAT", "DEVIS_LOG_FORMAT"],
            format!("{:?}", config.logging.format),
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from(DEFAULT_CONFIG_FILE), Path::new("config").join(DEFAULT_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
