use std::fs::OpenOptions;
use std::path::Path;

use devis_core::config::{AppConfig, AuditConfig, LoadOptions};
use devis_db::{connect_with_settings, ping};
use serde::Serialize;

use crate::commands::{CommandResult, EXIT_CONFIG, EXIT_DB_CONNECTIVITY, EXIT_RUNTIME};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Skipped, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

impl DoctorReport {
    /// Skipped checks never fail the report.
    fn from_checks(checks: Vec<DoctorCheck>) -> Self {
        let all_pass = checks.iter().all(|check| check.status != CheckStatus::Fail);
        let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
        let summary = if all_pass {
            "doctor: all readiness checks passed".to_string()
        } else {
            "doctor: one or more readiness checks failed".to_string()
        };

        Self { overall_status, summary, checks }
    }

    fn exit_code(&self) -> u8 {
        let failed = |name: &str| {
            self.checks.iter().any(|check| check.name == name && check.status == CheckStatus::Fail)
        };

        if failed("config_validation") {
            EXIT_CONFIG
        } else if failed("database_connectivity") {
            EXIT_DB_CONNECTIVITY
        } else if self.overall_status == CheckStatus::Fail {
            EXIT_RUNTIME
        } else {
            0
        }
    }
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = report.exit_code();

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let checks = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => vec![
            DoctorCheck::pass("config_validation", "configuration loaded and validated"),
            check_database_connectivity(&config),
            check_audit_destination(&config.audit),
        ],
        Err(error) => vec![
            DoctorCheck::fail("config_validation", error.to_string()),
            DoctorCheck::skipped(
                "database_connectivity",
                "skipped because configuration did not load",
            ),
            DoctorCheck::skipped(
                "audit_log_destination",
                "skipped because configuration did not load",
            ),
        ],
    };

    DoctorReport::from_checks(checks)
}

fn check_database_connectivity(config: &AppConfig) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck::fail(
                "database_connectivity",
                format!("failed to initialize async runtime: {error}"),
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| format!("failed to connect to database: {error}"))?;

        let pinged = ping(&pool).await.map_err(|error| format!("database ping failed: {error}"));
        pool.close().await;
        pinged
    });

    match result {
        Ok(()) => DoctorCheck::pass(
            "database_connectivity",
            format!("connected using `{}`", config.database.url),
        ),
        Err(error) => DoctorCheck::fail("database_connectivity", error),
    }
}

fn check_audit_destination(audit: &AuditConfig) -> DoctorCheck {
    const NAME: &str = "audit_log_destination";

    if !audit.enabled {
        return DoctorCheck::skipped(NAME, "client audit log is disabled");
    }

    let path = audit.clients_csv_path.as_path();
    if path.is_dir() {
        return DoctorCheck::fail(NAME, format!("`{}` is a directory", path.display()));
    }

    if path.exists() {
        return match OpenOptions::new().append(true).open(path) {
            Ok(_) => DoctorCheck::pass(NAME, format!("`{}` is writable", path.display())),
            Err(error) => {
                DoctorCheck::fail(NAME, format!("cannot append to `{}`: {error}", path.display()))
            }
        };
    }

    match nearest_existing_ancestor(path) {
        Some(ancestor) if ancestor.is_dir() => DoctorCheck::pass(
            NAME,
            format!("`{}` will be created on the first client", path.display()),
        ),
        Some(ancestor) => DoctorCheck::fail(
            NAME,
            format!("`{}` is not a directory", ancestor.display()),
        ),
        None => DoctorCheck::pass(
            NAME,
            format!("`{}` will be created on the first client", path.display()),
        ),
    }
}

fn nearest_existing_ancestor(path: &Path) -> Option<&Path> {
    path.ancestors()
        .skip(1)
        .filter(|ancestor| !ancestor.as_os_str().is_empty())
        .find(|ancestor| ancestor.exists())
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
