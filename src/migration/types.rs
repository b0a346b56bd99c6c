//! Types for the migration engine.

use crate::catalog::{Changeset, CatalogError};
use crate::config::ConfigError;
use crate::database::DatabaseError;
use crate::lock::LockError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Error types for migration operations.
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Version store error: {0}")]
    Store(#[from] DatabaseError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database is dirty at version {version}; fix the schema and run `force <VERSION>` first")]
    DirtyState { version: u64 },

    #[error("Changeset {version} has no down script and cannot be reverted")]
    Irreversible { version: u64 },

    #[error("Changeset {version} ({direction}) failed: {source}")]
    ScriptExecution {
        version: u64,
        direction: MigrationDirection,
        #[source]
        source: DatabaseError,
    },

    #[error("No changeset with version {0}")]
    UnknownVersion(u64),

    #[error("Database is at version {0}, which no changeset in the catalog matches")]
    MissingChangeset(u64),

    #[error("Plan was built from {planned} but the database is now {actual}")]
    StalePlan {
        planned: crate::store::EngineState,
        actual: crate::store::EngineState,
    },
}

/// Direction of migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationDirection {
    /// Applying a changeset's up script.
    Up,
    /// Applying a changeset's down script.
    Down,
}

impl fmt::Display for MigrationDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationDirection::Up => write!(f, "up"),
            MigrationDirection::Down => write!(f, "down"),
        }
    }
}

/// Version an operator asks the engine to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Highest version in the catalog.
    Latest,
    /// Version 0, every changeset reverted.
    Initial,
    /// Move this many changesets forward (positive) or backward (negative).
    Steps(i64),
    /// An exact version; must be 0 or present in the catalog.
    Version(u64),
}

/// One changeset applied in one direction.
#[derive(Debug, Clone)]
pub struct PlannedStep {
    pub changeset: Arc<Changeset>,
    pub direction: MigrationDirection,
    /// Version recorded before the step.
    pub from: u64,
    /// Version recorded once the step commits, and named by the dirty marker
    /// while it runs.
    pub to: u64,
}

impl PlannedStep {
    pub fn version(&self) -> u64 {
        self.changeset.version()
    }

    /// The script body to run for this step's direction.
    pub fn body(&self) -> Option<&str> {
        match self.direction {
            MigrationDirection::Up => Some(self.changeset.up()),
            MigrationDirection::Down => self.changeset.down(),
        }
    }
}

impl fmt::Display for PlannedStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {}: {}",
            self.direction,
            self.from,
            self.to,
            self.changeset.description()
        )
    }
}

/// A step that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedStep {
    pub version: u64,
    pub direction: MigrationDirection,
    pub description: String,
    pub duration: Duration,
}

/// Result of a migration run.
///
/// An empty `applied` list is the "no change" outcome and is not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationResult {
    /// The version we migrated from.
    pub from_version: u64,
    /// The version we migrated to.
    pub to_version: u64,
    /// Steps that were applied, in order.
    pub applied: Vec<AppliedStep>,
    /// Requested steps that fell past the end of the catalog and were skipped.
    pub shortfall: u64,
}

impl MigrationResult {
    pub fn is_no_change(&self) -> bool {
        self.applied.is_empty()
    }
}
