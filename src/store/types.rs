//! Types for the version store.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The single row of engine state kept inside the target database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version: u64,
    pub dirty: bool,
}

impl VersionRecord {
    pub fn clean(version: u64) -> Self {
        Self {
            version,
            dirty: false,
        }
    }

    pub fn dirty(version: u64) -> Self {
        Self {
            version,
            dirty: true,
        }
    }
}

/// Engine state derived from the version record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// The last transition completed; the schema is at this version.
    Clean(u64),
    /// A transition to this version was interrupted.
    Dirty(u64),
}

impl EngineState {
    pub fn version(&self) -> u64 {
        match self {
            EngineState::Clean(v) | EngineState::Dirty(v) => *v,
        }
    }

    pub fn is_dirty(&self) -> bool {
        matches!(self, EngineState::Dirty(_))
    }
}

impl From<Option<VersionRecord>> for EngineState {
    /// A missing record is the unmigrated state, `Clean(0)`.
    fn from(record: Option<VersionRecord>) -> Self {
        match record {
            None => EngineState::Clean(0),
            Some(VersionRecord {
                version,
                dirty: false,
            }) => EngineState::Clean(version),
            Some(VersionRecord {
                version,
                dirty: true,
            }) => EngineState::Dirty(version),
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Clean(v) => write!(f, "Clean({})", v),
            EngineState::Dirty(v) => write!(f, "Dirty({})", v),
        }
    }
}

/// Marker returned by `begin_step`; names the version the step will commit.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a started step must be committed or left dirty deliberately"]
pub struct StepToken {
    pub(crate) version: u64,
}

impl StepToken {
    pub fn version(&self) -> u64 {
        self.version
    }
}
