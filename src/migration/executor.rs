//! Migration engine: plans and runs changesets under the migration lock.

use super::plan::{build_plan, MigrationPlan};
use super::types::{AppliedStep, MigrationError, MigrationResult, PlannedStep, Target};
use crate::catalog::ChangesetCatalog;
use crate::config::MigrateConfig;
use crate::database::{self, Database};
use crate::lock::{LockGuard, LockManager};
use crate::store::{EngineState, VersionRecord, VersionStore};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Orchestrates planning and execution against one database.
///
/// The engine never caches the version record: every operation that mutates
/// state takes the lock first and then re-reads the record, so a caller that
/// queued behind another migration always plans from the true state.
pub struct MigrationEngine {
    catalog: Arc<ChangesetCatalog>,
    db: Arc<dyn Database>,
    store: VersionStore,
    locks: LockManager,
    lock_timeout: Duration,
}

impl MigrationEngine {
    /// Create an engine over an already-open database.
    pub fn new(catalog: Arc<ChangesetCatalog>, db: Arc<dyn Database>, lock_timeout: Duration) -> Self {
        Self {
            catalog,
            store: VersionStore::new(Arc::clone(&db)),
            locks: LockManager::new(Arc::clone(&db)),
            db,
            lock_timeout,
        }
    }

    /// Validate the configuration, load the catalog and connect.
    pub async fn connect(config: &MigrateConfig) -> Result<Self, MigrationError> {
        config.validate()?;
        let catalog = ChangesetCatalog::load_dir(&config.migrations_path).await?;
        let db = database::connect(&config.database_url, &config.migrations_table).await?;
        Ok(Self::new(Arc::new(catalog), db, config.lock_timeout))
    }

    /// Replace the lock manager, e.g. to poll at a different interval.
    pub fn with_lock_manager(mut self, locks: LockManager) -> Self {
        self.locks = locks;
        self
    }

    pub fn catalog(&self) -> &ChangesetCatalog {
        &self.catalog
    }

    /// Current version record, read without taking the lock.
    pub async fn version(&self) -> Result<Option<VersionRecord>, MigrationError> {
        Ok(self.store.read_current().await?)
    }

    /// Current engine state, read without taking the lock.
    pub async fn state(&self) -> Result<EngineState, MigrationError> {
        Ok(self.store.read_state().await?)
    }

    /// Preview the plan for `target` from the current state.
    pub async fn plan(&self, target: Target) -> Result<MigrationPlan, MigrationError> {
        let state = self.store.read_state().await?;
        build_plan(&self.catalog, state, target)
    }

    /// Move the database to `target`.
    pub async fn migrate(&self, target: Target) -> Result<MigrationResult, MigrationError> {
        let mut guard = self.locks.acquire(self.lock_timeout).await?;
        let result = self.migrate_locked(target).await;
        self.finish(&mut guard, result).await
    }

    /// Run a previously computed plan.
    ///
    /// Fails with `StalePlan` if the database moved since the plan was built.
    pub async fn execute(&self, plan: MigrationPlan) -> Result<MigrationResult, MigrationError> {
        let mut guard = self.locks.acquire(self.lock_timeout).await?;
        let result = self.execute_locked(plan).await;
        self.finish(&mut guard, result).await
    }

    /// Overwrite the version record without running any changeset.
    ///
    /// Clears a dirty state. The version is trusted as given.
    pub async fn force(&self, version: u64) -> Result<(), MigrationError> {
        let mut guard = self.locks.acquire(self.lock_timeout).await?;
        let result = self.force_locked(version).await;
        self.finish(&mut guard, result).await
    }

    /// Drop every table and view, including the version table.
    pub async fn drop_all(&self) -> Result<(), MigrationError> {
        let mut guard = self.locks.acquire(self.lock_timeout).await?;
        let result = self.db.drop_all().await.map_err(MigrationError::from);
        if result.is_ok() {
            warn!("Dropped all schema objects");
        }
        self.finish(&mut guard, result).await
    }

    async fn migrate_locked(&self, target: Target) -> Result<MigrationResult, MigrationError> {
        let state = self.store.read_state().await?;
        let plan = build_plan(&self.catalog, state, target)?;
        self.run_plan(&plan).await
    }

    async fn execute_locked(&self, plan: MigrationPlan) -> Result<MigrationResult, MigrationError> {
        let actual = self.store.read_state().await?;
        if let EngineState::Dirty(version) = actual {
            return Err(MigrationError::DirtyState { version });
        }
        if actual != plan.from() {
            return Err(MigrationError::StalePlan {
                planned: plan.from(),
                actual,
            });
        }
        self.run_plan(&plan).await
    }

    async fn force_locked(&self, version: u64) -> Result<(), MigrationError> {
        let previous = self.store.read_state().await?;
        self.store.force_set(version).await?;
        warn!(from = %previous, to = version, "Forced version without running changesets");
        Ok(())
    }

    async fn run_plan(&self, plan: &MigrationPlan) -> Result<MigrationResult, MigrationError> {
        let from_version = plan.from_version();
        let to_version = plan.target_version();
        let shortfall = plan.shortfall();

        if shortfall > 0 {
            warn!(
                shortfall,
                to = to_version,
                "Requested more steps than the catalog has; stopping at its end"
            );
        }

        if plan.is_empty() {
            info!(version = from_version, "No migrations needed, already at target version");
            return Ok(MigrationResult {
                from_version,
                to_version,
                applied: vec![],
                shortfall,
            });
        }

        info!(
            from = from_version,
            to = to_version,
            steps = plan.len(),
            "Starting migration"
        );

        let mut applied = Vec::with_capacity(plan.len());
        for step in plan.steps() {
            applied.push(self.run_step(step).await?);
        }

        info!(
            from = from_version,
            to = to_version,
            count = applied.len(),
            "Migration completed successfully"
        );

        Ok(MigrationResult {
            from_version,
            to_version,
            applied,
            shortfall,
        })
    }

    async fn run_step(&self, step: &PlannedStep) -> Result<AppliedStep, MigrationError> {
        let body = step.body().ok_or(MigrationError::Irreversible {
            version: step.version(),
        })?;

        info!(migration = %step, "Applying changeset");
        let started = Instant::now();

        let token = self.store.begin_step(step.to).await?;
        if let Err(e) = self.db.run(body).await {
            error!(
                migration = %step,
                dirty_version = step.to,
                error = %e,
                "Changeset failed; database left dirty"
            );
            return Err(MigrationError::ScriptExecution {
                version: step.version(),
                direction: step.direction,
                source: e,
            });
        }
        self.store.commit_step(token).await?;

        let duration = started.elapsed();
        info!(migration = %step, ?duration, "Applied changeset");

        Ok(AppliedStep {
            version: step.version(),
            direction: step.direction,
            description: step.changeset.description().to_string(),
            duration,
        })
    }

    /// Release the lock, keeping the operation's own error if it had one.
    async fn finish<T>(
        &self,
        guard: &mut LockGuard,
        result: Result<T, MigrationError>,
    ) -> Result<T, MigrationError> {
        match guard.release().await {
            Ok(()) => result,
            Err(release_err) => {
                warn!(error = %release_err, "Failed to release migration lock");
                match result {
                    Ok(_) => Err(release_err.into()),
                    Err(e) => Err(e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Changeset;
    use crate::database::SqliteDatabase;
    use crate::migration::MigrationDirection;

    fn engine(changesets: Vec<Changeset>) -> MigrationEngine {
        let catalog = ChangesetCatalog::from_changesets(changesets).unwrap();
        let db = SqliteDatabase::open_in_memory("schema_migrations").unwrap();
        MigrationEngine::new(Arc::new(catalog), Arc::new(db), Duration::from_millis(200))
    }

    fn table_changeset(version: u64) -> Changeset {
        Changeset::new(
            version,
            format!("create t{}", version),
            format!("CREATE TABLE t{} (id INTEGER)", version),
        )
        .with_down(format!("DROP TABLE t{}", version))
    }

    #[tokio::test]
    async fn test_migrate_up_and_back() {
        let engine = engine(vec![table_changeset(1), table_changeset(2)]);

        let result = engine.migrate(Target::Latest).await.unwrap();
        assert_eq!(result.from_version, 0);
        assert_eq!(result.to_version, 2);
        assert_eq!(result.applied.len(), 2);
        assert_eq!(engine.state().await.unwrap(), EngineState::Clean(2));

        let result = engine.migrate(Target::Initial).await.unwrap();
        assert!(result
            .applied
            .iter()
            .all(|s| s.direction == MigrationDirection::Down));
        assert_eq!(engine.state().await.unwrap(), EngineState::Clean(0));
    }

    #[tokio::test]
    async fn test_failed_step_leaves_dirty_and_stops() {
        let engine = engine(vec![
            table_changeset(1),
            Changeset::new(2, "broken", "CREATE TABLE nope (").with_down("SELECT 1"),
            table_changeset(3),
        ]);

        let err = engine.migrate(Target::Latest).await.unwrap_err();
        assert!(matches!(
            err,
            MigrationError::ScriptExecution {
                version: 2,
                direction: MigrationDirection::Up,
                ..
            }
        ));
        assert_eq!(engine.state().await.unwrap(), EngineState::Dirty(2));

        // Changeset 3 never ran
        assert!(engine.db.run("CREATE TABLE t3 (id INTEGER)").await.is_ok());
    }

    #[tokio::test]
    async fn test_execute_rejects_stale_plan() {
        let engine = engine(vec![table_changeset(1), table_changeset(2)]);
        let plan = engine.plan(Target::Latest).await.unwrap();

        engine.migrate(Target::Version(1)).await.unwrap();

        let err = engine.execute(plan).await.unwrap_err();
        assert!(matches!(err, MigrationError::StalePlan { .. }));
        assert_eq!(engine.state().await.unwrap(), EngineState::Clean(1));
    }

    #[tokio::test]
    async fn test_execute_runs_fresh_plan() {
        let engine = engine(vec![table_changeset(1), table_changeset(2)]);
        let plan = engine.plan(Target::Steps(1)).await.unwrap();
        let result = engine.execute(plan).await.unwrap();
        assert_eq!(result.to_version, 1);
        assert_eq!(engine.state().await.unwrap(), EngineState::Clean(1));
    }

    #[tokio::test]
    async fn test_execute_refuses_dirty_record() {
        let engine = engine(vec![table_changeset(1), table_changeset(2), table_changeset(3)]);
        engine.migrate(Target::Version(1)).await.unwrap();
        let plan = engine.plan(Target::Latest).await.unwrap();
        assert_eq!(plan.from(), EngineState::Clean(1));

        // Simulate a run that died after writing its dirty marker
        let _token = engine.store.begin_step(2).await.unwrap();

        let err = engine.execute(plan).await.unwrap_err();
        assert!(matches!(err, MigrationError::DirtyState { version: 2 }));
        assert_eq!(
            engine.version().await.unwrap(),
            Some(VersionRecord::dirty(2))
        );

        // The lock was released, so a repair can proceed
        engine.force(1).await.unwrap();
        assert_eq!(engine.state().await.unwrap(), EngineState::Clean(1));
    }

    #[tokio::test]
    async fn test_steps_past_catalog_end_apply_what_exists() {
        let engine = engine(vec![table_changeset(1), table_changeset(2), table_changeset(3)]);
        engine.migrate(Target::Version(2)).await.unwrap();

        let result = engine.migrate(Target::Steps(2)).await.unwrap();
        assert_eq!(result.applied.len(), 1);
        assert_eq!(result.applied[0].version, 3);
        assert_eq!(result.to_version, 3);
        assert_eq!(result.shortfall, 1);
        assert_eq!(engine.state().await.unwrap(), EngineState::Clean(3));

        let result = engine.migrate(Target::Steps(-5)).await.unwrap();
        assert_eq!(result.applied.len(), 3);
        assert_eq!(result.shortfall, 2);
        assert_eq!(engine.state().await.unwrap(), EngineState::Clean(0));
    }

    #[tokio::test]
    async fn test_lock_is_released_after_failure() {
        let engine = engine(vec![Changeset::new(1, "broken", "NOT SQL")]);
        assert!(engine.migrate(Target::Latest).await.is_err());

        // Force must be able to take the lock again
        engine.force(0).await.unwrap();
        assert_eq!(engine.state().await.unwrap(), EngineState::Clean(0));
    }
}
