pub mod catalog;
pub mod config;
pub mod database;
pub mod dispatch;
pub mod lock;
pub mod migration;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use catalog::{Changeset, ChangesetCatalog, CatalogError};
pub use config::{ConfigError, MigrateConfig};
pub use database::{connect, Database, DatabaseError, PostgresDatabase, SqliteDatabase};
pub use dispatch::{is_affirmative, AutoConfirm, Command, Confirm, Dispatcher, Outcome};
pub use lock::{LockError, LockGuard, LockManager};
pub use migration::{
    build_plan, AppliedStep, MigrationDirection, MigrationEngine, MigrationError, MigrationPlan,
    MigrationResult, PlannedStep, Target,
};
pub use store::{EngineState, StepToken, VersionRecord, VersionStore};
