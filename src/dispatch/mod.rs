//! Command dispatcher.
//!
//! Maps operator commands onto the engine. Destructive commands (`down`,
//! `force`, `drop`) are gated behind a [`Confirm`] implementation; the
//! dispatcher itself does no terminal I/O.

use crate::migration::{MigrationEngine, MigrationError, MigrationResult, Target};
use crate::store::VersionRecord;
use crate::utils::AFFIRMATIVE_ANSWER;
use std::fmt;
use tracing::{info, warn};

/// An operator command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Apply every pending changeset.
    Up,
    /// Revert every changeset.
    Down,
    /// Move N changesets forward, or back when negative.
    Steps(i64),
    /// Migrate to an exact version.
    Goto(u64),
    /// Report the version record.
    Version,
    /// Overwrite the version record.
    Force(u64),
    /// Drop every schema object.
    Drop,
}

/// Asks the operator to confirm a destructive command.
pub trait Confirm {
    /// Show `prompt` and return whether the operator agreed.
    fn confirm(&self, prompt: &str) -> bool;
}

/// Answers every prompt with the same decision.
pub struct AutoConfirm(pub bool);

impl Confirm for AutoConfirm {
    fn confirm(&self, _prompt: &str) -> bool {
        self.0
    }
}

/// Only the exact answer `yes` confirms; anything else cancels.
pub fn is_affirmative(answer: &str) -> bool {
    answer.trim() == AFFIRMATIVE_ANSWER
}

/// What a dispatched command did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Changesets ran.
    Migrated {
        message: String,
        result: MigrationResult,
    },
    /// Nothing to do; a successful no-op.
    NoChange { message: String },
    /// Current version record; `None` for an unmigrated database.
    Version(Option<VersionRecord>),
    /// The record was overwritten.
    Forced(u64),
    /// All schema objects were dropped.
    Dropped,
    /// The operator declined a confirmation prompt.
    Cancelled,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Migrated { message, .. } | Outcome::NoChange { message } => {
                write!(f, "{}", message)
            }
            Outcome::Version(None)
            | Outcome::Version(Some(VersionRecord {
                version: 0,
                dirty: false,
            })) => write!(f, "Database is at initial version (no migrations applied)"),
            Outcome::Version(Some(record)) => {
                write!(
                    f,
                    "Current version: {}, Dirty state: {}",
                    record.version, record.dirty
                )?;
                if record.dirty {
                    writeln!(f)?;
                    writeln!(f, "WARNING: Database is in dirty state!")?;
                    writeln!(f, "Last migration was interrupted. Manual intervention required.")?;
                    write!(f, "Use 'force <VERSION>' to reset the state.")?;
                }
                Ok(())
            }
            Outcome::Forced(version) => write!(f, "Successfully forced version to {}", version),
            Outcome::Dropped => write!(f, "All tables dropped successfully"),
            Outcome::Cancelled => write!(f, "Operation cancelled"),
        }
    }
}

/// Runs commands against one engine.
pub struct Dispatcher {
    engine: MigrationEngine,
}

impl Dispatcher {
    pub fn new(engine: MigrationEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &MigrationEngine {
        &self.engine
    }

    /// Run one command, asking `confirm` first when it is destructive.
    pub async fn run(
        &self,
        command: Command,
        confirm: &dyn Confirm,
    ) -> Result<Outcome, MigrationError> {
        info!(?command, "Dispatching command");

        match command {
            Command::Up => {
                self.migrate(
                    Target::Latest,
                    "All migrations applied successfully".to_string(),
                    "No new migrations to apply",
                )
                .await
            }
            Command::Down => {
                if !confirm.confirm("Are you sure? This will delete all data! (yes/no): ") {
                    return Ok(Outcome::Cancelled);
                }
                self.migrate(
                    Target::Initial,
                    "All migrations rolled back successfully".to_string(),
                    "No migrations to roll back",
                )
                .await
            }
            Command::Steps(n) => {
                let result = self.engine.migrate(Target::Steps(n)).await?;
                if result.is_no_change() {
                    return Ok(Outcome::NoChange {
                        message: "No migrations to apply or rollback".to_string(),
                    });
                }
                let message = if result.shortfall > 0 {
                    format!(
                        "Applied {} of {} requested steps; no further migrations in that direction",
                        result.applied.len(),
                        n.unsigned_abs()
                    )
                } else {
                    format!("Successfully applied {} steps", n)
                };
                Ok(Outcome::Migrated { message, result })
            }
            Command::Goto(version) => {
                self.migrate(
                    Target::Version(version),
                    format!("Successfully migrated to version {}", version),
                    "Already at the specified version",
                )
                .await
            }
            Command::Version => {
                let record = self.engine.version().await?;
                if let Some(VersionRecord {
                    version,
                    dirty: true,
                }) = record
                {
                    warn!(version, "Database is in dirty state; use `force <VERSION>`");
                }
                Ok(Outcome::Version(record))
            }
            Command::Force(version) => {
                let prompt = format!(
                    "Forcing version to {}...\nWARNING: This does NOT run migrations! Continue? (yes/no): ",
                    version
                );
                if !confirm.confirm(&prompt) {
                    return Ok(Outcome::Cancelled);
                }
                self.engine.force(version).await?;
                Ok(Outcome::Forced(version))
            }
            Command::Drop => {
                if !confirm.confirm("Are you sure? This will delete ALL DATA! (yes/no): ") {
                    return Ok(Outcome::Cancelled);
                }
                self.engine.drop_all().await?;
                Ok(Outcome::Dropped)
            }
        }
    }

    async fn migrate(
        &self,
        target: Target,
        success: String,
        no_change: &str,
    ) -> Result<Outcome, MigrationError> {
        let result = self.engine.migrate(target).await?;
        if result.is_no_change() {
            return Ok(Outcome::NoChange {
                message: no_change.to_string(),
            });
        }
        Ok(Outcome::Migrated {
            message: success,
            result,
        })
    }
}
