//! PostgreSQL driver.
//!
//! Uses a single session for everything so the session-level advisory lock
//! and the migration statements share one connection. The lock is released
//! by the server if the session ends abnormally.

use super::{Database, DatabaseError, HeldFlag};
use crate::store::VersionRecord;
use crate::utils::advisory_lock_key;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error};

/// Driver for a PostgreSQL database.
pub struct PostgresDatabase {
    client: Mutex<Client>,
    table: String,
    lock_key: i64,
    held: HeldFlag,
}

impl PostgresDatabase {
    /// Connect and derive the advisory lock key for this database and table.
    pub async fn connect(url: &str, table: &str) -> Result<Self, DatabaseError> {
        let (client, connection) = tokio_postgres::connect(url, NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection closed with error");
            }
        });

        let row = client
            .query_one("SELECT current_database(), current_schema()", &[])
            .await?;
        let database: String = row.get(0);
        let schema: Option<String> = row.get(1);
        let schema = schema.unwrap_or_else(|| "public".to_string());
        let lock_key = advisory_lock_key(&database, &schema, table);

        debug!(database = %database, schema = %schema, lock_key, "Connected to PostgreSQL");

        Ok(Self {
            client: Mutex::new(client),
            table: table.to_string(),
            lock_key,
            held: HeldFlag::default(),
        })
    }

    async fn ensure_version_table(&self, client: &Client) -> Result<(), DatabaseError> {
        client
            .batch_execute(&format!(
                "CREATE TABLE IF NOT EXISTS {} (version BIGINT NOT NULL PRIMARY KEY, dirty BOOLEAN NOT NULL)",
                self.table
            ))
            .await?;
        Ok(())
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[async_trait]
impl Database for PostgresDatabase {
    async fn read_version(&self) -> Result<Option<VersionRecord>, DatabaseError> {
        let client = self.client.lock().await;
        self.ensure_version_table(&client).await?;

        let row = client
            .query_opt(
                &format!("SELECT version, dirty FROM {} LIMIT 1", self.table),
                &[],
            )
            .await?;

        row.map(|row| {
            let version: i64 = row.get(0);
            let dirty: bool = row.get(1);
            let version =
                u64::try_from(version).map_err(|_| DatabaseError::CorruptVersion(version))?;
            Ok(VersionRecord { version, dirty })
        })
        .transpose()
    }

    async fn write_version(&self, record: VersionRecord) -> Result<(), DatabaseError> {
        let version = i64::try_from(record.version)
            .map_err(|_| DatabaseError::CorruptVersion(i64::MAX))?;

        let mut client = self.client.lock().await;
        self.ensure_version_table(&client).await?;

        let tx = client.transaction().await?;
        tx.batch_execute(&format!("TRUNCATE {}", self.table)).await?;
        tx.execute(
            &format!("INSERT INTO {} (version, dirty) VALUES ($1, $2)", self.table),
            &[&version, &record.dirty],
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn run(&self, body: &str) -> Result<(), DatabaseError> {
        // A multi-statement simple query runs as one implicit transaction.
        let client = self.client.lock().await;
        client.batch_execute(body).await?;
        Ok(())
    }

    async fn try_lock(&self) -> Result<bool, DatabaseError> {
        // Session advisory locks are re-entrant; exclude other tasks on this session first.
        if !self.held.try_claim() {
            return Ok(false);
        }

        let acquired = async {
            let client = self.client.lock().await;
            let row = client
                .query_one("SELECT pg_try_advisory_lock($1)", &[&self.lock_key])
                .await?;
            Ok::<bool, DatabaseError>(row.get(0))
        }
        .await;

        if !matches!(acquired, Ok(true)) {
            self.held.clear();
        }
        acquired
    }

    async fn unlock(&self) -> Result<(), DatabaseError> {
        if !self.held.is_held() {
            return Ok(());
        }

        let client = self.client.lock().await;
        let result = client
            .execute("SELECT pg_advisory_unlock($1)", &[&self.lock_key])
            .await;
        self.held.clear();
        result?;
        Ok(())
    }

    async fn drop_all(&self) -> Result<(), DatabaseError> {
        let mut client = self.client.lock().await;
        let views: Vec<String> = client
            .query(
                "SELECT viewname FROM pg_views WHERE schemaname = current_schema()",
                &[],
            )
            .await?
            .iter()
            .map(|row| row.get(0))
            .collect();
        let tables: Vec<String> = client
            .query(
                "SELECT tablename FROM pg_tables WHERE schemaname = current_schema()",
                &[],
            )
            .await?
            .iter()
            .map(|row| row.get(0))
            .collect();

        let tx = client.transaction().await?;
        for view in &views {
            tx.batch_execute(&format!(
                "DROP VIEW IF EXISTS {} CASCADE",
                quote_identifier(view)
            ))
            .await?;
        }
        for table in &tables {
            tx.batch_execute(&format!(
                "DROP TABLE IF EXISTS {} CASCADE",
                quote_identifier(table)
            ))
            .await?;
        }
        tx.commit().await?;

        debug!(
            views = views.len(),
            tables = tables.len(),
            "Dropped PostgreSQL schema objects"
        );
        Ok(())
    }
}
