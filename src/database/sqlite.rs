//! SQLite driver.
//!
//! SQLite runs DDL transactionally, so every changeset body executes inside
//! its own transaction. The advisory lock is an exclusive write transaction
//! held on a sidecar lock database next to the target file; SQLite file locks
//! die with the process, so a crashed holder never wedges the lock.

use super::{Database, DatabaseError, HeldFlag};
use crate::store::VersionRecord;
use async_trait::async_trait;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Suffix of the sidecar file backing the advisory lock
const LOCK_FILE_SUFFIX: &str = ".migrate-lock";

enum SqliteLock {
    /// Exclusive transaction on a sidecar database file.
    Sidecar {
        path: PathBuf,
        holder: Arc<Mutex<Option<Connection>>>,
    },
    /// In-memory databases are private to one connection.
    InProcess { held: HeldFlag },
}

/// Driver for a SQLite database file.
pub struct SqliteDatabase {
    conn: Arc<Mutex<Connection>>,
    table: String,
    lock: SqliteLock,
}

impl SqliteDatabase {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>, table: &str) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;

        let mut lock_path = path.as_os_str().to_owned();
        lock_path.push(LOCK_FILE_SUFFIX);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            table: table.to_string(),
            lock: SqliteLock::Sidecar {
                path: PathBuf::from(lock_path),
                holder: Arc::new(Mutex::new(None)),
            },
        })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory(table: &str) -> Result<Self, DatabaseError> {
        Ok(Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
            table: table.to_string(),
            lock: SqliteLock::InProcess {
                held: HeldFlag::default(),
            },
        })
    }

    /// Run a blocking closure against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&mut Connection, &str) -> Result<T, DatabaseError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let table = self.table.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| DatabaseError::Poisoned)?;
            f(&mut *guard, &table)
        })
        .await?
    }
}

fn ensure_version_table(conn: &Connection, table: &str) -> Result<(), DatabaseError> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (version INTEGER NOT NULL PRIMARY KEY, dirty INTEGER NOT NULL)"
    ))?;
    Ok(())
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::DatabaseBusy || e.code == ErrorCode::DatabaseLocked
    )
}

fn try_lock_sidecar(
    path: &Path,
    holder: &Mutex<Option<Connection>>,
) -> Result<bool, DatabaseError> {
    let mut holder = holder.lock().map_err(|_| DatabaseError::Poisoned)?;
    if holder.is_some() {
        return Ok(false);
    }

    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::ZERO)?;
    let attempt = conn
        .execute_batch("CREATE TABLE IF NOT EXISTS migrate_lock (id INTEGER PRIMARY KEY)")
        .and_then(|_| conn.execute_batch("BEGIN EXCLUSIVE"));
    match attempt {
        Ok(()) => {
            *holder = Some(conn);
            Ok(true)
        }
        Err(e) if is_busy(&e) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn read_version(&self) -> Result<Option<VersionRecord>, DatabaseError> {
        self.with_conn(|conn, table| {
            ensure_version_table(conn, table)?;
            let row: Option<(i64, bool)> = conn
                .query_row(
                    &format!("SELECT version, dirty FROM {table} LIMIT 1"),
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            row.map(|(version, dirty)| {
                let version =
                    u64::try_from(version).map_err(|_| DatabaseError::CorruptVersion(version))?;
                Ok(VersionRecord { version, dirty })
            })
            .transpose()
        })
        .await
    }

    async fn write_version(&self, record: VersionRecord) -> Result<(), DatabaseError> {
        let version = i64::try_from(record.version)
            .map_err(|_| DatabaseError::CorruptVersion(i64::MAX))?;

        self.with_conn(move |conn, table| {
            ensure_version_table(conn, table)?;
            let tx = conn.transaction()?;
            tx.execute(&format!("DELETE FROM {table}"), [])?;
            tx.execute(
                &format!("INSERT INTO {table} (version, dirty) VALUES (?1, ?2)"),
                params![version, record.dirty],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn run(&self, body: &str) -> Result<(), DatabaseError> {
        let body = body.to_string();
        self.with_conn(move |conn, _| {
            let tx = conn.transaction()?;
            tx.execute_batch(&body)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn try_lock(&self) -> Result<bool, DatabaseError> {
        match &self.lock {
            SqliteLock::InProcess { held } => Ok(held.try_claim()),
            SqliteLock::Sidecar { path, holder } => {
                let path = path.clone();
                let holder = Arc::clone(holder);
                tokio::task::spawn_blocking(move || try_lock_sidecar(&path, &holder)).await?
            }
        }
    }

    async fn unlock(&self) -> Result<(), DatabaseError> {
        match &self.lock {
            SqliteLock::InProcess { held } => {
                held.clear();
                Ok(())
            }
            SqliteLock::Sidecar { holder, .. } => {
                let conn = holder.lock().map_err(|_| DatabaseError::Poisoned)?.take();
                if let Some(conn) = conn {
                    // Rollback ends the exclusive transaction; dropping closes the file.
                    conn.execute_batch("ROLLBACK")?;
                }
                Ok(())
            }
        }
    }

    async fn drop_all(&self) -> Result<(), DatabaseError> {
        self.with_conn(|conn, _| {
            let objects: Vec<(String, String)> = {
                let mut stmt = conn.prepare(
                    "SELECT type, name FROM sqlite_master \
                     WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' \
                     ORDER BY CASE type WHEN 'view' THEN 0 ELSE 1 END",
                )?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            };

            conn.execute_batch("PRAGMA foreign_keys = OFF")?;
            let tx = conn.transaction()?;
            for (kind, name) in &objects {
                let quoted = name.replace('"', "\"\"");
                let statement = match kind.as_str() {
                    "view" => format!("DROP VIEW IF EXISTS \"{}\"", quoted),
                    _ => format!("DROP TABLE IF EXISTS \"{}\"", quoted),
                };
                tx.execute_batch(&statement)?;
            }
            tx.commit()?;

            debug!(count = objects.len(), "Dropped SQLite schema objects");
            Ok(())
        })
        .await
    }
}
