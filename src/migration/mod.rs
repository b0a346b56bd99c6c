//! Migration engine.
//!
//! This module turns an operator target into a plan and runs it against the
//! database, keeping the version record consistent across failures.
//!
//! # Overview
//!
//! - `build_plan` computes the ordered steps between the current state and a
//!   target, and refuses to plan from a dirty state
//! - `MigrationEngine` takes the database lock once per operation, re-reads
//!   the version record, and runs each step between a dirty marker and a
//!   commit
//! - A failed step leaves the record dirty at the attempted version and stops
//!   the run; nothing is retried or rolled back automatically
//! - `force` is the only way out of a dirty state
//!
//! # Usage
//!
//! ```ignore
//! let engine = MigrationEngine::connect(&config).await?;
//! let result = engine.migrate(Target::Latest).await?;
//! if result.is_no_change() {
//!     println!("No new migrations to apply");
//! }
//! ```

mod executor;
mod plan;
mod types;

pub use executor::MigrationEngine;
pub use plan::{build_plan, resolve_target, MigrationPlan};
pub use types::{
    AppliedStep, MigrationDirection, MigrationError, MigrationResult, PlannedStep, Target,
};
