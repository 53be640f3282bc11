//! authstore configuration
//! Resolves the database connection string and pool tunables

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Environment variable holding the connection string (required)
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

/// Environment variable overriding the config file location
pub const CONFIG_PATH_ENV: &str = "AUTHSTORE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("DATABASE_URL is not set")]
    MissingDatabaseUrl,

    #[error("invalid database url '{url}': {reason}")]
    InvalidDatabaseUrl { url: String, reason: String },

    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

/// authstore configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Connection string; normally supplied through `DATABASE_URL`
    #[serde(default)]
    pub database_url: Option<String>,

    /// Maximum number of pooled connections
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,

    /// How long to wait for a free pooled connection
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// How long a statement waits on a locked database
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Trace every SQL statement (debugging only)
    #[serde(default)]
    pub log_statements: bool,

    /// Lifetime of a freshly created login session
    #[serde(default = "default_session_ttl_days")]
    pub session_ttl_days: i64,
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_connection_timeout_ms() -> u64 {
    5_000
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_session_ttl_days() -> i64 {
    crate::session::DEFAULT_SESSION_TTL_DAYS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            pool_max_size: default_pool_max_size(),
            connection_timeout_ms: default_connection_timeout_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            log_statements: false,
            session_ttl_days: default_session_ttl_days(),
        }
    }
}

impl Config {
    /// Load config: `.env`, then the YAML file (if any), then `DATABASE_URL`
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = match Self::config_path(path) {
            Some(config_path) if config_path.exists() => Self::from_file(&config_path)?,
            Some(config_path) => {
                debug!("No config file at {:?}, using defaults", config_path);
                Config::default()
            }
            None => Config::default(),
        };

        let config = config.with_env_override(std::env::var(DATABASE_URL_ENV).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML config file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Config = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Defaults with an explicit connection string
    pub fn with_database_url(url: impl Into<String>) -> Self {
        Self {
            database_url: Some(url.into()),
            ..Config::default()
        }
    }

    /// A non-empty environment value wins over the file
    pub fn with_env_override(mut self, env_url: Option<String>) -> Self {
        if let Some(url) = env_url.filter(|u| !u.trim().is_empty()) {
            self.database_url = Some(url);
        }
        self
    }

    /// Reject tunables that would make the pool unusable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_max_size == 0 {
            return Err(ConfigError::InvalidValue(
                "pool_max_size must be at least 1".to_string(),
            ));
        }
        if self.session_ttl_days <= 0 {
            return Err(ConfigError::InvalidValue(
                "session_ttl_days must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse the configured connection string
    pub fn database_url(&self) -> Result<DatabaseUrl, ConfigError> {
        match self.database_url.as_deref().map(str::trim) {
            None | Some("") => Err(ConfigError::MissingDatabaseUrl),
            Some(url) => url.parse(),
        }
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.session_ttl_days)
    }

    /// Get the config file path: env override, explicit flag, then home dir
    fn config_path(path: Option<&str>) -> Option<PathBuf> {
        if let Ok(env_path) = std::env::var(CONFIG_PATH_ENV) {
            return Some(PathBuf::from(env_path));
        }

        if let Some(p) = path {
            return Some(PathBuf::from(p));
        }

        dirs::home_dir().map(|home| home.join(".authstore").join("config.yml"))
    }
}

/// A parsed `DATABASE_URL`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseUrl {
    /// `sqlite://<path>` or `sqlite:<path>`
    File(PathBuf),
    /// `sqlite::memory:`
    Memory,
}

impl FromStr for DatabaseUrl {
    type Err = ConfigError;

    fn from_str(url: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidDatabaseUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        let rest = url
            .strip_prefix("sqlite:")
            .ok_or_else(|| invalid("expected a sqlite: url"))?;

        if rest == ":memory:" || rest == "//:memory:" {
            return Ok(DatabaseUrl::Memory);
        }

        let path = rest.strip_prefix("//").unwrap_or(rest);
        // Query options such as `?mode=rwc` are accepted and ignored
        let path = path.split('?').next().unwrap_or_default();

        if path.is_empty() {
            return Err(invalid("missing database path"));
        }

        Ok(DatabaseUrl::File(PathBuf::from(path)))
    }
}

impl std::fmt::Display for DatabaseUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseUrl::File(path) => write!(f, "sqlite://{}", path.display()),
            DatabaseUrl::Memory => write!(f, "sqlite::memory:"),
        }
    }
}
