use crate::utils::{is_valid_identifier, DEFAULT_LOCK_TIMEOUT, DEFAULT_MIGRATIONS_TABLE};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("DATABASE_URL environment variable is not set")]
    MissingDatabaseUrl,

    #[error("Migrations path is not set")]
    MissingMigrationsPath,

    #[error("Migrations path does not exist or is not a directory: {0}")]
    MigrationsPathNotFound(PathBuf),

    #[error("Invalid migrations table name: {0}")]
    InvalidTableName(String),

    #[error("Cannot locate default migrations folder: {0}")]
    ExecutableDir(#[from] std::io::Error),
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct MigrateConfig {
    /// Connection string of the target database
    pub database_url: String,
    /// Directory holding `{version}_{title}.{up|down}.sql` files
    pub migrations_path: PathBuf,
    /// Name of the version table
    pub migrations_table: String,
    /// How long to wait for another migration to release the lock
    pub lock_timeout: Duration,
}

impl MigrateConfig {
    pub fn new(database_url: impl Into<String>, migrations_path: impl Into<PathBuf>) -> Self {
        Self {
            database_url: database_url.into(),
            migrations_path: migrations_path.into(),
            migrations_table: DEFAULT_MIGRATIONS_TABLE.to_string(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Build a config from optional raw values, applying defaults.
    ///
    /// A missing migrations path falls back to `../migrations` next to the
    /// running executable.
    pub fn from_parts(
        database_url: Option<String>,
        migrations_path: Option<String>,
        migrations_table: Option<String>,
        lock_timeout: Option<Duration>,
    ) -> Result<Self, ConfigError> {
        let database_url = database_url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .ok_or(ConfigError::MissingDatabaseUrl)?;

        let migrations_path = match migrations_path.filter(|p| !p.trim().is_empty()) {
            Some(path) => parse_migrations_path(&path),
            None => default_migrations_path()?,
        };

        let mut config = Self::new(database_url, migrations_path);
        if let Some(table) = migrations_table {
            config.migrations_table = table;
        }
        if let Some(timeout) = lock_timeout {
            config.lock_timeout = timeout;
        }
        Ok(config)
    }

    /// Check that everything the engine needs is present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::MissingDatabaseUrl);
        }
        if self.migrations_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingMigrationsPath);
        }
        if !self.migrations_path.is_dir() {
            return Err(ConfigError::MigrationsPathNotFound(
                self.migrations_path.clone(),
            ));
        }
        if !is_valid_identifier(&self.migrations_table) {
            return Err(ConfigError::InvalidTableName(self.migrations_table.clone()));
        }
        Ok(())
    }
}

/// Accept both plain paths and `file://` URLs
pub fn parse_migrations_path(raw: &str) -> PathBuf {
    let raw = raw.trim();
    PathBuf::from(raw.strip_prefix("file://").unwrap_or(raw))
}

/// `<exe dir>/../migrations`
fn default_migrations_path() -> Result<PathBuf, ConfigError> {
    let exe = std::env::current_exe()?;
    let base = exe.parent().unwrap_or_else(|| Path::new("."));
    Ok(base.join("..").join("migrations"))
}
