//! Self-checks for the query store.
//!
//! Run once before the server accepts requests, and again for every
//! `GET /api/system/health`. Each check guards something the service cannot
//! work without, so any failure keeps the server from starting.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::Config;
use crate::DbPool;

/// Tables created by the initial migration
const REQUIRED_TABLES: [&str; 3] = ["users", "sessions", "synthetic_client_queries"];

/// Outcome of one self-check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfCheck {
    pub name: String,
    pub passed: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl SelfCheck {
    fn passed(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            message: message.into(),
            details: None,
        }
    }

    fn failed(name: &str, message: impl Into<String>, details: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            message: message.into(),
            details: Some(details.to_string()),
        }
    }
}

/// All self-checks from one run
#[derive(Debug, Clone, Serialize)]
pub struct StartupReport {
    pub checks: Vec<SelfCheck>,
}

impl StartupReport {
    /// Whether the server may start
    pub fn is_ready(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &SelfCheck> {
        self.checks.iter().filter(|c| !c.passed)
    }

    pub fn summary(&self) -> String {
        let failing: Vec<&str> = self.failures().map(|c| c.name.as_str()).collect();
        let passed = self.checks.len() - failing.len();
        if failing.is_empty() {
            format!("{}/{} self-checks passed", passed, self.checks.len())
        } else {
            format!(
                "{}/{} self-checks passed, failing: {}",
                passed,
                self.checks.len(),
                failing.join(", ")
            )
        }
    }
}

/// Check the store and the data directory before serving
pub async fn run_startup_checks(config: &Config, db: &DbPool) -> StartupReport {
    let mut checks = store_checks(db).await;
    checks.push(check_data_dir(config));
    let report = StartupReport { checks };

    for check in &report.checks {
        if check.passed {
            debug!(check = %check.name, "{}", check.message);
        } else {
            error!(check = %check.name, details = ?check.details, "{}", check.message);
        }
    }
    info!(summary = %report.summary(), ready = report.is_ready(), "Self-checks finished");

    report
}

async fn store_checks(db: &DbPool) -> Vec<SelfCheck> {
    vec![check_database(db).await, check_tables(db).await]
}

async fn check_database(db: &DbPool) -> SelfCheck {
    match sqlx::query("SELECT 1").fetch_one(db).await {
        Ok(_) => SelfCheck::passed("database", "Query store is reachable"),
        Err(e) => SelfCheck::failed("database", "Query store is unreachable", e),
    }
}

async fn check_tables(db: &DbPool) -> SelfCheck {
    let tables: Result<Vec<String>, _> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
    )
    .fetch_all(db)
    .await;

    let tables = match tables {
        Ok(tables) => tables,
        Err(e) => return SelfCheck::failed("schema", "Could not list tables", e),
    };

    let missing: Vec<&str> = REQUIRED_TABLES
        .into_iter()
        .filter(|t| !tables.iter().any(|name| name == t))
        .collect();

    if missing.is_empty() {
        SelfCheck::passed("schema", "User, session and query tables are present")
    } else {
        SelfCheck::failed(
            "schema",
            "Required tables are missing",
            format!("Missing: {}", missing.join(", ")),
        )
    }
}

fn check_data_dir(config: &Config) -> SelfCheck {
    let data_dir = &config.server.data_dir;
    let marker = data_dir.join(".cqms_write_test");

    match std::fs::write(&marker, b"ok") {
        Ok(()) => {
            let _ = std::fs::remove_file(&marker);
            SelfCheck::passed("data_dir", format!("{} is writable", data_dir.display()))
        }
        Err(e) => {
            SelfCheck::failed("data_dir", format!("{} is not writable", data_dir.display()), e)
        }
    }
}

/// Body of `GET /api/system/health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealthStatus {
    pub healthy: bool,
    pub checks: Vec<SelfCheck>,
    pub version: String,
}

/// Re-run the store checks for the health endpoint
pub async fn get_system_health(db: &DbPool) -> SystemHealthStatus {
    let checks = store_checks(db).await;
    SystemHealthStatus {
        healthy: checks.iter().all(|c| c.passed),
        checks,
        version: env!("CARGO_PKG_VERSION").to_string(),
    }
}
