//! CLI module for the cqms command-line interface.
//!
//! Without a subcommand the binary starts the server. Subcommands:
//! - `status` - Show server health and version
//! - `queries list|show|close` - Work with client queries through the API
//! - `users create` - Register an account directly in the database
//! - `config check` - Validate configuration file

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Client;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::api::error::ErrorResponse;
use crate::api::validation::{validate_email, validate_password, validate_username};
use crate::config::Config;
use crate::db::{Query, QuerySummary, User, UserRole};
use crate::startup::SystemHealthStatus;

/// CLI arguments structure
#[derive(Parser, Debug)]
#[command(name = "cqms")]
#[command(author, version, about = "Client query management service", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "cqms.toml")]
    pub config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Skip startup self-checks (for development only)
    #[arg(long)]
    pub skip_checks: bool,

    /// API URL to connect to (default: http://localhost:8080)
    #[arg(long, env = "CQMS_API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    /// Session token from `POST /api/auth/login` (can also be set via CQMS_TOKEN)
    #[arg(long, env = "CQMS_TOKEN")]
    pub token: Option<String>,

    /// Subcommand to run (if none, starts the server)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show server status (health, version)
    Status,

    /// Client query commands (admin token required)
    #[command(subcommand)]
    Queries(QueriesCommands),

    /// User account commands
    #[command(subcommand)]
    Users(UsersCommands),

    /// Configuration management commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Queries subcommands
#[derive(Subcommand, Debug)]
pub enum QueriesCommands {
    /// List queries, newest first
    List {
        /// Open, Closed or All
        #[arg(long)]
        status: Option<String>,
        /// Exact heading, e.g. "Bug Report"
        #[arg(long)]
        heading: Option<String>,
    },
    /// Show a single query
    Show {
        /// Query ID, e.g. Q0015
        id: String,
    },
    /// Close an open query
    Close {
        /// Query ID, e.g. Q0015
        id: String,
        /// Heading to store on the closed query
        #[arg(long)]
        heading: String,
        /// Description to store on the closed query
        #[arg(long)]
        description: String,
    },
}

/// Users subcommands
#[derive(Subcommand, Debug)]
pub enum UsersCommands {
    /// Register an account directly in the configured database
    Create {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        /// Client or Admin
        #[arg(long, default_value = "Client")]
        role: UserRole,
        #[arg(long, env = "CQMS_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Validate configuration file
    Check,
}

/// Body of `GET /api/queries`
#[derive(Debug, Deserialize)]
struct QueryList {
    queries: Vec<Query>,
    total: usize,
}

/// Create an HTTP client with the given token
fn create_client(token: Option<&str>) -> Result<Client> {
    let mut headers = reqwest::header::HeaderMap::new();
    if let Some(token) = token {
        headers.insert(
            reqwest::header::AUTHORIZATION,
            format!("Bearer {}", token)
                .parse()
                .context("Invalid token format")?,
        );
    }

    Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(30))
        .build()
        .context("Failed to create HTTP client")
}

/// Turn a non-success response into an error carrying the server's message
async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == reqwest::StatusCode::UNAUTHORIZED {
        anyhow::bail!(
            "Authentication required. Use --token or set CQMS_TOKEN environment variable."
        );
    }

    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(err) => anyhow::bail!("Server returned error {}: {}", status, err.error.message),
        Err(_) => anyhow::bail!("Server returned error {}: {}", status, body),
    }
}

/// Run a CLI command
pub async fn run_command(cli: &Cli, config: &Config) -> Result<()> {
    match &cli.command {
        Some(Commands::Status) => cmd_status(cli).await,
        Some(Commands::Queries(QueriesCommands::List { status, heading })) => {
            cmd_queries_list(cli, status.as_deref(), heading.as_deref()).await
        }
        Some(Commands::Queries(QueriesCommands::Show { id })) => cmd_queries_show(cli, id).await,
        Some(Commands::Queries(QueriesCommands::Close {
            id,
            heading,
            description,
        })) => cmd_queries_close(cli, id, heading, description).await,
        Some(Commands::Users(UsersCommands::Create {
            username,
            email,
            role,
            password,
        })) => cmd_users_create(config, username, email, *role, password).await,
        Some(Commands::Config(ConfigCommands::Check)) => cmd_config_check(cli),
        None => {
            // No subcommand means start the server - this is handled in main.rs
            Ok(())
        }
    }
}

/// Display server status
async fn cmd_status(cli: &Cli) -> Result<()> {
    let client = create_client(cli.token.as_deref())?;
    let base_url = &cli.api_url;

    println!("Connecting to {}...", base_url);

    let health_url = format!("{}/api/system/health", base_url);
    let response = client
        .get(&health_url)
        .send()
        .await
        .context("Failed to connect to server. Is cqms running?")?;

    // 503 still carries a health report
    let status = response.status();
    let health: SystemHealthStatus = if status.is_success()
        || status == reqwest::StatusCode::SERVICE_UNAVAILABLE
    {
        response
            .json()
            .await
            .context("Failed to parse health response")?
    } else {
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("Server returned error {}: {}", status, body);
    };

    println!();
    println!("=== cqms Server Status ===");
    println!();

    let health_icon = if health.healthy { "[OK]" } else { "[!!]" };
    println!("Version:    v{}", health.version);
    println!(
        "Status:     {} {}",
        health_icon,
        if health.healthy {
            "Healthy"
        } else {
            "Unhealthy"
        }
    );

    println!();
    println!("Self-checks:");
    for check in &health.checks {
        let icon = if check.passed { "[OK]" } else { "[!!]" };
        println!("  {} {:18} {}", icon, check.name, check.message);
    }

    // Open/closed counts need an admin token; skip quietly otherwise
    if cli.token.is_some() {
        let summary_url = format!("{}/api/queries/summary", base_url);
        let summary: Option<QuerySummary> = match client.get(&summary_url).send().await {
            Ok(resp) if resp.status().is_success() => resp.json().await.ok(),
            _ => None,
        };
        if let Some(summary) = summary {
            println!();
            println!("Queries:");
            println!("  Open:       {}", summary.open);
            println!("  Closed:     {}", summary.closed);
            println!("  Total:      {}", summary.total);
        }
    }

    let failing: Vec<_> = health.checks.iter().filter(|c| !c.passed).collect();
    if !failing.is_empty() {
        println!();
        println!("Check Details:");
        for check in failing {
            println!("  [FAILED] {}: {}", check.name, check.message);
            if let Some(details) = &check.details {
                println!("           {}", details);
            }
        }
    }

    println!();
    Ok(())
}

/// List queries with optional filters
async fn cmd_queries_list(cli: &Cli, status: Option<&str>, heading: Option<&str>) -> Result<()> {
    let client = create_client(cli.token.as_deref())?;
    let url = format!("{}/api/queries", cli.api_url);

    let mut params: Vec<(&str, &str)> = Vec::new();
    if let Some(status) = status {
        params.push(("status", status));
    }
    if let Some(heading) = heading {
        params.push(("heading", heading));
    }

    let response = client
        .get(&url)
        .query(&params)
        .send()
        .await
        .context("Failed to connect to server")?;
    let list: QueryList = ensure_success(response)
        .await?
        .json()
        .await
        .context("Failed to parse queries response")?;

    if list.queries.is_empty() {
        println!("No queries found.");
        return Ok(());
    }

    println!();
    println!(
        "{:<8}  {:<7}  {:<26}  {:<28}  {:<20}",
        "ID", "STATUS", "HEADING", "EMAIL", "RAISED"
    );
    println!("{}", "-".repeat(97));

    for query in &list.queries {
        println!(
            "{:<8}  {:<7}  {:<26}  {:<28}  {:<20}",
            query.query_id,
            query.query_status,
            truncate(&query.query_heading, 26),
            truncate(&query.client_email, 28),
            short_timestamp(&query.date_raised)
        );
    }

    println!();
    println!("{} queries", list.total);
    Ok(())
}

async fn cmd_queries_show(cli: &Cli, id: &str) -> Result<()> {
    let client = create_client(cli.token.as_deref())?;
    let url = format!("{}/api/queries/{}", cli.api_url, id);

    let response = client
        .get(&url)
        .send()
        .await
        .context("Failed to connect to server")?;
    let query: Query = ensure_success(response)
        .await?
        .json()
        .await
        .context("Failed to parse query response")?;

    print_query(&query);
    Ok(())
}

async fn cmd_queries_close(cli: &Cli, id: &str, heading: &str, description: &str) -> Result<()> {
    let client = create_client(cli.token.as_deref())?;
    let url = format!("{}/api/queries/{}/close", cli.api_url, id);

    let response = client
        .post(&url)
        .json(&serde_json::json!({
            "query_heading": heading,
            "query_description": description,
        }))
        .send()
        .await
        .context("Failed to close query")?;
    let query: Query = ensure_success(response)
        .await?
        .json()
        .await
        .context("Failed to parse query response")?;

    println!("[OK] Query {} closed", query.query_id);
    print_query(&query);
    Ok(())
}

fn print_query(query: &Query) {
    println!();
    println!("=== Query: {} ===", query.query_id);
    println!();
    println!("Status:      {}", query.query_status);
    println!("Heading:     {}", query.query_heading);
    println!("Email:       {}", query.client_email);
    println!("Mobile:      {}", query.client_mobile);
    println!("Raised:      {}", query.date_raised);
    println!(
        "Closed:      {}",
        query.date_closed.as_deref().unwrap_or("-")
    );
    println!();
    println!("{}", query.query_description);
    println!();
}

/// Register an account against the configured database, bypassing the API
async fn cmd_users_create(
    config: &Config,
    username: &str,
    email: &str,
    role: UserRole,
    password: &str,
) -> Result<()> {
    let username = username.trim();
    let email = email.trim();
    validate_username(username).map_err(anyhow::Error::msg)?;
    validate_email(email).map_err(anyhow::Error::msg)?;
    validate_password(password, password).map_err(anyhow::Error::msg)?;

    let db = crate::db::init(config).await?;
    let registered = User::register(&db, username, password, email, role)
        .await
        .context("Failed to register user")?;
    db.close().await;

    if !registered {
        anyhow::bail!("Username or email already exists");
    }

    println!("[OK] Created {} account '{}'", role, username);
    Ok(())
}

/// Validate configuration file
fn cmd_config_check(cli: &Cli) -> Result<()> {
    let config_path = &cli.config;

    println!("Checking configuration file: {}", config_path.display());
    println!();

    if !config_path.exists() {
        println!(
            "[!!] Configuration file not found: {}",
            config_path.display()
        );
        println!();
        println!("A default configuration will be used when starting the server.");
        return Ok(());
    }

    match Config::load(config_path) {
        Ok(config) => {
            println!("[OK] Configuration file is valid!");
            println!();
            println!("=== Configuration Summary ===");
            println!();
            println!("Server:");
            println!("  Listen:       {}", config.listen_addr());
            println!("  Data Dir:     {}", config.server.data_dir.display());
            println!();
            println!("Database:");
            println!("  Path:         {}", config.database_path().display());
            println!("  Connections:  {}", config.database.max_connections);
            println!();
            println!("Auth:");
            println!("  Session TTL:  {}h", config.auth.session_ttl_hours);
            println!(
                "  Admin Signup: {}",
                if config.auth.allow_admin_registration {
                    "Enabled"
                } else {
                    "Disabled"
                }
            );
            println!();
            println!("Queries:");
            println!("  ID Floor:     {}", config.queries.id_floor);
            println!();

            let mut warnings = Vec::new();
            if config.auth.allow_admin_registration {
                warnings.push("Anyone can register an Admin account through the API");
            }

            if !warnings.is_empty() {
                println!("Warnings:");
                for warning in warnings {
                    println!("  [!] {}", warning);
                }
                println!();
            }

            Ok(())
        }
        Err(e) => {
            println!("[!!] Configuration file is invalid!");
            println!();
            println!("Error: {:#}", e);
            println!();
            println!("Please check the configuration file syntax and try again.");
            anyhow::bail!("Invalid configuration file");
        }
    }
}

/// Trim an RFC 3339 timestamp to `YYYY-MM-DD HH:MM:SS`
fn short_timestamp(ts: &str) -> String {
    ts.get(..19)
        .map(|s| s.replace('T', " "))
        .unwrap_or_else(|| ts.to_string())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_no_subcommand_starts_server() {
        let cli = Cli::try_parse_from(["cqms"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config, PathBuf::from("cqms.toml"));
    }

    #[test]
    fn test_parse_queries_close() {
        let cli = Cli::try_parse_from([
            "cqms",
            "queries",
            "close",
            "Q0015",
            "--heading",
            "Bug Report",
            "--description",
            "Fixed in 1.2",
        ])
        .unwrap();

        match cli.command {
            Some(Commands::Queries(QueriesCommands::Close {
                id,
                heading,
                description,
            })) => {
                assert_eq!(id, "Q0015");
                assert_eq!(heading, "Bug Report");
                assert_eq!(description, "Fixed in 1.2");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_users_create_role() {
        let cli = Cli::try_parse_from([
            "cqms",
            "users",
            "create",
            "--username",
            "root",
            "--email",
            "root@example.com",
            "--role",
            "admin",
            "--password",
            "correct horse",
        ])
        .unwrap();

        match cli.command {
            Some(Commands::Users(UsersCommands::Create { role, .. })) => {
                assert_eq!(role, UserRole::Admin)
            }
            other => panic!("unexpected command: {:?}", other),
        }

        assert!(Cli::try_parse_from([
            "cqms",
            "users",
            "create",
            "--username",
            "root",
            "--email",
            "root@example.com",
            "--role",
            "superuser",
            "--password",
            "x",
        ])
        .is_err());
    }

    #[tokio::test]
    async fn test_users_create_writes_account() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.server.data_dir = dir.path().to_path_buf();

        cmd_users_create(&config, "root", "root@example.com", UserRole::Admin, "correct horse")
            .await
            .unwrap();

        let err = cmd_users_create(
            &config,
            "root",
            "other@example.com",
            UserRole::Admin,
            "correct horse",
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("already exists"));

        let db = crate::db::init(&config).await.unwrap();
        let user = User::authenticate(&db, "root", "correct horse", UserRole::Admin)
            .await
            .unwrap();
        assert!(user.is_some());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("Bug Report", 26), "Bug Report");
        assert_eq!(truncate("Subscription Cancellation", 10), "Subscri...");
    }

    #[test]
    fn test_short_timestamp() {
        assert_eq!(
            short_timestamp("2024-03-01T09:30:00.000000Z"),
            "2024-03-01 09:30:00"
        );
        assert_eq!(short_timestamp("bad"), "bad");
    }
}
