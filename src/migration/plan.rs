//! Plan computation.
//!
//! A plan is the ordered list of steps between the current state and a
//! target. Planning is pure: it reads the catalog and a state, never the
//! database, and fails before anything runs.

use super::types::{MigrationDirection, MigrationError, PlannedStep, Target};
use crate::catalog::ChangesetCatalog;
use crate::store::EngineState;
use std::sync::Arc;

/// Ordered steps from one version to another. Consumed once by execution.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    from: EngineState,
    target: u64,
    shortfall: u64,
    steps: Vec<PlannedStep>,
}

impl MigrationPlan {
    /// State the plan was computed from.
    pub fn from(&self) -> EngineState {
        self.from
    }

    pub fn from_version(&self) -> u64 {
        self.from.version()
    }

    pub fn target_version(&self) -> u64 {
        self.target
    }

    /// Requested steps that fell past the end of the catalog.
    pub fn shortfall(&self) -> u64 {
        self.shortfall
    }

    pub fn steps(&self) -> &[PlannedStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }
}

/// Turn an operator target into an absolute version.
///
/// `Steps` past either end of the catalog stops at that end.
pub fn resolve_target(
    catalog: &ChangesetCatalog,
    current: u64,
    target: Target,
) -> Result<u64, MigrationError> {
    match target {
        Target::Latest => Ok(catalog.latest_version().unwrap_or(0)),
        Target::Initial => Ok(0),
        Target::Version(version) => {
            if version == 0 || catalog.contains(version) {
                Ok(version)
            } else {
                Err(MigrationError::UnknownVersion(version))
            }
        }
        Target::Steps(n) => Ok(step_target(catalog, current, n).0),
    }
}

/// Version `n` catalog positions away from `current`, clamped to the
/// catalog, and the number of requested steps that fell past its end.
fn step_target(catalog: &ChangesetCatalog, current: u64, n: i64) -> (u64, u64) {
    let position = catalog.position_of(current);
    let distance = usize::try_from(n.unsigned_abs()).unwrap_or(usize::MAX);

    let (new_position, taken) = if n >= 0 {
        let taken = distance.min(catalog.len() - position);
        (position + taken, taken)
    } else {
        let taken = distance.min(position);
        (position - taken, taken)
    };

    let version = catalog.version_at(new_position).unwrap_or(current);
    (version, n.unsigned_abs() - taken as u64)
}

/// Compute the steps needed to move from `state` to `target`.
///
/// Fails with `DirtyState` without computing anything when the state is
/// dirty, and with `Irreversible` when a backward plan crosses a changeset
/// that has no down script.
pub fn build_plan(
    catalog: &ChangesetCatalog,
    state: EngineState,
    target: Target,
) -> Result<MigrationPlan, MigrationError> {
    let current = match state {
        EngineState::Dirty(version) => return Err(MigrationError::DirtyState { version }),
        EngineState::Clean(version) => version,
    };

    if current != 0 && !catalog.contains(current) {
        return Err(MigrationError::MissingChangeset(current));
    }

    let (target_version, shortfall) = match target {
        Target::Steps(n) => step_target(catalog, current, n),
        other => (resolve_target(catalog, current, other)?, 0),
    };

    let steps = if target_version > current {
        catalog
            .iter()
            .filter(|c| c.version() > current && c.version() <= target_version)
            .map(|c| PlannedStep {
                changeset: Arc::clone(c),
                direction: MigrationDirection::Up,
                from: catalog.previous_version(c.version()),
                to: c.version(),
            })
            .collect()
    } else if target_version < current {
        let steps: Vec<PlannedStep> = catalog
            .iter()
            .rev()
            .filter(|c| c.version() > target_version && c.version() <= current)
            .map(|c| PlannedStep {
                changeset: Arc::clone(c),
                direction: MigrationDirection::Down,
                from: c.version(),
                to: catalog.previous_version(c.version()),
            })
            .collect();

        if let Some(step) = steps.iter().find(|s| !s.changeset.is_reversible()) {
            return Err(MigrationError::Irreversible {
                version: step.version(),
            });
        }
        steps
    } else {
        Vec::new()
    };

    Ok(MigrationPlan {
        from: state,
        target: target_version,
        shortfall,
        steps,
    })
}
