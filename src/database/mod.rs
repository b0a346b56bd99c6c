//! Database drivers.
//!
//! A driver is the narrow surface the engine needs from a target database:
//! reading and replacing the version record, running a changeset body,
//! holding a database-scoped advisory lock and dropping every schema object.
//! Everything above this module is database agnostic.

mod postgres;
mod sqlite;

pub use postgres::PostgresDatabase;
pub use sqlite::SqliteDatabase;

use crate::store::VersionRecord;
use crate::utils::is_valid_identifier;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Error types for database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported database URL: {0}")]
    UnsupportedUrl(String),

    #[error("Invalid migrations table name: {0}")]
    InvalidTableName(String),

    #[error("Version table holds an out-of-range version: {0}")]
    CorruptVersion(i64),

    #[error("Database task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("Database connection mutex poisoned")]
    Poisoned,
}

/// Operations a target database must support.
#[async_trait]
pub trait Database: Send + Sync {
    /// Read the version record. `None` when no migration has ever run.
    async fn read_version(&self) -> Result<Option<VersionRecord>, DatabaseError>;

    /// Atomically replace the version record.
    async fn write_version(&self, record: VersionRecord) -> Result<(), DatabaseError>;

    /// Run one changeset body to completion.
    async fn run(&self, body: &str) -> Result<(), DatabaseError>;

    /// Try to take the advisory lock without waiting.
    ///
    /// Returns `false` when another session holds it.
    async fn try_lock(&self) -> Result<bool, DatabaseError>;

    /// Release the advisory lock. Releasing a lock that is not held is a no-op.
    async fn unlock(&self) -> Result<(), DatabaseError>;

    /// Drop every table and view, including the version table.
    async fn drop_all(&self) -> Result<(), DatabaseError>;
}

/// In-process half of an advisory lock.
///
/// A database session that already holds its advisory lock is granted it
/// again, so tasks sharing one driver are excluded here first.
#[derive(Debug, Default)]
pub(crate) struct HeldFlag(AtomicBool);

impl HeldFlag {
    /// Claim the flag; `false` if another task already holds it.
    pub(crate) fn try_claim(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn is_held(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Open a driver for `url`.
///
/// `postgres://` and `postgresql://` URLs use PostgreSQL; `sqlite://path`,
/// `sqlite::memory:` and bare file paths use SQLite.
pub async fn connect(url: &str, table: &str) -> Result<Arc<dyn Database>, DatabaseError> {
    if !is_valid_identifier(table) {
        return Err(DatabaseError::InvalidTableName(table.to_string()));
    }

    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        let db = PostgresDatabase::connect(url, table).await?;
        return Ok(Arc::new(db));
    }

    if url == "sqlite::memory:" {
        return Ok(Arc::new(SqliteDatabase::open_in_memory(table)?));
    }

    if let Some(path) = url.strip_prefix("sqlite://") {
        return Ok(Arc::new(SqliteDatabase::open(path, table)?));
    }

    if url.contains("://") {
        return Err(DatabaseError::UnsupportedUrl(url.to_string()));
    }

    Ok(Arc::new(SqliteDatabase::open(url, table)?))
}
