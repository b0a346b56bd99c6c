//! Version store.
//!
//! Owns the `(version, dirty)` record kept inside the target database. Every
//! read goes to the database; nothing is cached between calls.
//!
//! A step is bracketed by `begin_step`, which commits a dirty marker naming
//! the version being moved to, and `commit_step`, which clears it. If the
//! changeset body fails or the process dies in between, the dirty marker is
//! what the next invocation sees.

mod types;

pub use types::{EngineState, StepToken, VersionRecord};

use crate::database::{Database, DatabaseError};
use std::sync::Arc;
use tracing::{debug, warn};

/// Narrow transactional API over the version record.
#[derive(Clone)]
pub struct VersionStore {
    db: Arc<dyn Database>,
}

impl VersionStore {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Read the current record; `None` means the database was never migrated.
    pub async fn read_current(&self) -> Result<Option<VersionRecord>, DatabaseError> {
        let record = self.db.read_version().await?;
        if let Some(VersionRecord {
            version,
            dirty: true,
        }) = record
        {
            warn!(version, "Version record is dirty");
        }
        Ok(record)
    }

    /// Read the current record as an engine state.
    pub async fn read_state(&self) -> Result<EngineState, DatabaseError> {
        Ok(self.read_current().await?.into())
    }

    /// Mark a step as in flight before its body runs.
    pub async fn begin_step(&self, to: u64) -> Result<StepToken, DatabaseError> {
        self.db.write_version(VersionRecord::dirty(to)).await?;
        debug!(version = to, "Wrote dirty marker");
        Ok(StepToken { version: to })
    }

    /// Record a step as applied. Call only after its body succeeded.
    pub async fn commit_step(&self, token: StepToken) -> Result<(), DatabaseError> {
        self.db
            .write_version(VersionRecord::clean(token.version))
            .await?;
        debug!(version = token.version, "Committed step");
        Ok(())
    }

    /// Overwrite the record without running anything.
    pub async fn force_set(&self, version: u64) -> Result<(), DatabaseError> {
        self.db.write_version(VersionRecord::clean(version)).await
    }
}
