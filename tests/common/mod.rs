#![allow(dead_code)]

use schemactl::{connect, ChangesetCatalog, MigrationEngine};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const TABLE: &str = "schema_migrations";

/// Create a temporary directory for a test database and migrations
pub fn create_test_dir() -> TempDir {
    tempfile::tempdir().expect("Should create temp dir")
}

/// Path of the SQLite database inside a test dir
pub fn db_path(dir: &Path) -> PathBuf {
    dir.join("app.db")
}

/// Create (if needed) and return the migrations folder inside a test dir
pub fn migrations_dir(dir: &Path) -> PathBuf {
    let path = dir.join("migrations");
    std::fs::create_dir_all(&path).expect("Should create migrations dir");
    path
}

/// Write a `{version}_{name}.up.sql` file and, optionally, its down file
pub fn write_changeset(dir: &Path, version: u64, name: &str, up: &str, down: Option<&str>) {
    std::fs::write(dir.join(format!("{}_{}.up.sql", version, name)), up)
        .expect("Should write up script");
    if let Some(down) = down {
        std::fs::write(dir.join(format!("{}_{}.down.sql", version, name)), down)
            .expect("Should write down script");
    }
}

/// Write reversible changesets creating tables `t1..tN`
pub fn write_table_changesets(dir: &Path, versions: &[u64]) {
    for version in versions {
        write_changeset(
            dir,
            *version,
            &format!("create_t{}", version),
            &format!("CREATE TABLE t{} (id INTEGER PRIMARY KEY);", version),
            Some(&format!("DROP TABLE t{};", version)),
        );
    }
}

/// Open an engine over the test dir's database and migrations folder
pub async fn open_engine(dir: &Path, lock_timeout: Duration) -> MigrationEngine {
    let catalog = ChangesetCatalog::load_dir(&migrations_dir(dir))
        .await
        .expect("Should load catalog");
    let db = connect(&db_path(dir).to_string_lossy(), TABLE)
        .await
        .expect("Should open database");
    MigrationEngine::new(Arc::new(catalog), db, lock_timeout)
}

/// Check whether a table exists, using a separate connection
pub fn table_exists(dir: &Path, table: &str) -> bool {
    let conn = rusqlite::Connection::open(db_path(dir)).expect("Should open database");
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )
        .expect("Should query sqlite_master");
    count > 0
}
