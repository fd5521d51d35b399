use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Longest login session the server will issue (one year)
pub const MAX_SESSION_TTL_HOURS: i64 = 24 * 366;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub queries: QueryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Database file, relative to `server.data_dir` unless absolute
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Seconds to wait for a pooled connection before giving up
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("cqms.db")
}

fn default_max_connections() -> u32 {
    5
}

fn default_acquire_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Lifetime of a login session in hours
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: i64,
    /// Whether the public registration endpoint may create Admin accounts
    #[serde(default = "default_allow_admin_registration")]
    pub allow_admin_registration: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl_hours: default_session_ttl_hours(),
            allow_admin_registration: default_allow_admin_registration(),
        }
    }
}

fn default_session_ttl_hours() -> i64 {
    24 * 7
}

fn default_allow_admin_registration() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    /// Lowest numeric suffix handed out by the query ID allocator
    #[serde(default = "default_id_floor")]
    pub id_floor: i64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            id_floor: default_id_floor(),
        }
    }
}

fn default_id_floor() -> i64 {
    crate::db::DEFAULT_ID_FLOOR
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::parse(&content)?
        } else {
            info!("No config file found, using defaults");
            Config::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would only fail later, at request time
    pub fn validate(&self) -> Result<()> {
        let ttl = self.auth.session_ttl_hours;
        if !(1..=MAX_SESSION_TTL_HOURS).contains(&ttl) {
            anyhow::bail!(
                "auth.session_ttl_hours must be between 1 and {}, got {}",
                MAX_SESSION_TTL_HOURS,
                ttl
            );
        }
        if self.queries.id_floor < 0 {
            anyhow::bail!(
                "queries.id_floor must not be negative, got {}",
                self.queries.id_floor
            );
        }
        if self.database.max_connections == 0 {
            anyhow::bail!("database.max_connections must be at least 1");
        }
        Ok(())
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse configuration file")
    }

    /// Apply `CQMS_*` overrides. The lookup is injected so tests don't touch
    /// the process environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("CQMS_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("CQMS_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("Invalid CQMS_PORT value: {}", port))?;
        }
        if let Some(dir) = lookup("CQMS_DATA_DIR") {
            self.server.data_dir = PathBuf::from(dir);
        }
        if let Some(db) = lookup("CQMS_DATABASE") {
            self.database.path = PathBuf::from(db);
        }
        if let Some(level) = lookup("CQMS_LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Full path of the SQLite database file
    pub fn database_path(&self) -> PathBuf {
        if self.database.path.is_absolute() {
            self.database.path.clone()
        } else {
            self.server.data_dir.join(&self.database.path)
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            auth: AuthConfig::default(),
            queries: QueryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
