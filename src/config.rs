use std::{fmt, path::PathBuf, time::Duration};

use crate::utils::{get_env_cast_or, get_env_or, ConfigError};

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub http_listen_host: String,
    pub http_listen_port: u16,
    /// SQLite database file holding both the registry and the dynamic tables.
    pub database_path: PathBuf,
    /// Maximum number of pooled datastore connections.
    pub pool_size: u32,
    /// How long a statement waits on a locked database before giving up.
    pub busy_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            http_listen_host: "127.0.0.1".into(),
            http_listen_port: 8824,
            database_path: PathBuf::from("tabula.db"),
            pool_size: 8,
            busy_timeout: Duration::from_millis(5000),
        }
    }
}

impl Config {
    /// Load configuration from `TABULA_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let default = Config::default();
        Ok(Config {
            http_listen_host: get_env_or("TABULA_HTTP_LISTEN_HOST", default.http_listen_host),
            http_listen_port: get_env_cast_or("TABULA_HTTP_LISTEN_PORT", default.http_listen_port)?,
            database_path: PathBuf::from(get_env_or(
                "TABULA_DATABASE_PATH",
                default.database_path.to_string_lossy().into_owned(),
            )),
            pool_size: get_env_cast_or("TABULA_POOL_SIZE", default.pool_size)?,
            busy_timeout: Duration::from_millis(get_env_cast_or(
                "TABULA_BUSY_TIMEOUT_MS",
                default.busy_timeout.as_millis() as u64,
            )?),
        })
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "HTTP listen host: {}", self.http_listen_host)?;
        writeln!(f, "HTTP listen port: {}", self.http_listen_port)?;
        writeln!(f, "Database path: {}", self.database_path.display())?;
        writeln!(f, "Connection pool size: {}", self.pool_size)?;
        write!(f, "Busy timeout: {} ms", self.busy_timeout.as_millis())
    }
}
