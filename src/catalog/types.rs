//! Types for the changeset catalog.

use std::path::PathBuf;
use thiserror::Error;

/// Highest version the version table can store (a signed 64-bit column).
pub const MAX_VERSION: u64 = i64::MAX as u64;

/// Error types for catalog loading.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read changeset source {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed changeset file name: {0}")]
    InvalidFileName(String),

    #[error("Invalid changeset version in {0}: versions must be integers from 1 to 9223372036854775807")]
    InvalidVersion(String),

    #[error("Duplicate {direction} changeset for version {version}: {first} and {second}")]
    DuplicateVersion {
        version: u64,
        direction: &'static str,
        first: String,
        second: String,
    },

    #[error("Changeset {0} has a down script but no up script")]
    MissingUp(u64),
}

/// A single versioned schema transformation.
///
/// Changesets are immutable once loaded. The `down` body is optional; a
/// changeset without one cannot be reverted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Changeset {
    version: u64,
    description: String,
    up: String,
    down: Option<String>,
}

impl Changeset {
    /// Create a forward-only changeset.
    pub fn new(version: u64, description: impl Into<String>, up: impl Into<String>) -> Self {
        Self {
            version,
            description: description.into(),
            up: up.into(),
            down: None,
        }
    }

    /// Attach a reverse script.
    pub fn with_down(mut self, down: impl Into<String>) -> Self {
        self.down = Some(down.into());
        self
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// The forward script body.
    pub fn up(&self) -> &str {
        &self.up
    }

    /// The reverse script body, if any.
    pub fn down(&self) -> Option<&str> {
        self.down.as_deref()
    }

    pub fn is_reversible(&self) -> bool {
        self.down.is_some()
    }
}
