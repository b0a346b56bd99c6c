mod common;

use common::{
    create_test_dir, migrations_dir, open_engine, table_exists, write_changeset,
    write_table_changesets,
};
use schemactl::{
    EngineState, LockError, LockManager, MigrationDirection, MigrationError, Target,
    VersionRecord,
};
use std::time::Duration;

const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_end_to_end_scenario() {
    let temp_dir = create_test_dir();
    write_table_changesets(&migrations_dir(temp_dir.path()), &[1, 2, 3]);
    let engine = open_engine(temp_dir.path(), LOCK_TIMEOUT).await;

    // Fresh database is Clean(0) with no record
    assert_eq!(engine.version().await.unwrap(), None);

    // up
    let result = engine.migrate(Target::Latest).await.expect("up should succeed");
    let versions: Vec<u64> = result.applied.iter().map(|s| s.version).collect();
    assert_eq!(versions, vec![1, 2, 3]);
    assert_eq!(engine.state().await.unwrap(), EngineState::Clean(3));
    assert!(table_exists(temp_dir.path(), "t3"));

    // steps -1
    let result = engine.migrate(Target::Steps(-1)).await.unwrap();
    assert_eq!(result.applied.len(), 1);
    assert_eq!(result.applied[0].version, 3);
    assert_eq!(result.applied[0].direction, MigrationDirection::Down);
    assert_eq!(engine.state().await.unwrap(), EngineState::Clean(2));
    assert!(!table_exists(temp_dir.path(), "t3"));

    // goto 0
    let result = engine.migrate(Target::Version(0)).await.unwrap();
    let versions: Vec<u64> = result.applied.iter().map(|s| s.version).collect();
    assert_eq!(versions, vec![2, 1]);
    assert_eq!(engine.state().await.unwrap(), EngineState::Clean(0));
    assert!(!table_exists(temp_dir.path(), "t1"));
}

#[tokio::test]
async fn test_failure_recovery_scenario() {
    let temp_dir = create_test_dir();
    let dir = migrations_dir(temp_dir.path());
    write_table_changesets(&dir, &[1, 3]);
    write_changeset(
        &dir,
        2,
        "broken",
        "CREATE TABLE t2 (id INTEGER); INSERT INTO missing_table VALUES (1);",
        Some("DROP TABLE t2;"),
    );

    let engine = open_engine(temp_dir.path(), LOCK_TIMEOUT).await;
    engine.migrate(Target::Version(1)).await.unwrap();
    assert_eq!(engine.state().await.unwrap(), EngineState::Clean(1));

    // up fails in forward 2
    let err = engine.migrate(Target::Latest).await.unwrap_err();
    assert!(matches!(
        err,
        MigrationError::ScriptExecution {
            version: 2,
            direction: MigrationDirection::Up,
            ..
        }
    ));
    assert_eq!(
        engine.version().await.unwrap(),
        Some(VersionRecord::dirty(2))
    );
    assert!(!table_exists(temp_dir.path(), "t3"), "steps after the failure must not run");

    // Retrying without force is refused and leaves the record alone
    let err = engine.migrate(Target::Latest).await.unwrap_err();
    assert!(matches!(err, MigrationError::DirtyState { version: 2 }));
    assert!(matches!(
        engine.plan(Target::Version(0)).await,
        Err(MigrationError::DirtyState { version: 2 })
    ));
    assert_eq!(
        engine.version().await.unwrap(),
        Some(VersionRecord::dirty(2))
    );

    // Repair the script, force back to 1, retry
    write_changeset(
        &dir,
        2,
        "broken",
        "CREATE TABLE t2 (id INTEGER);",
        Some("DROP TABLE t2;"),
    );
    let engine = open_engine(temp_dir.path(), LOCK_TIMEOUT).await;
    engine.force(1).await.unwrap();
    assert_eq!(engine.state().await.unwrap(), EngineState::Clean(1));

    let result = engine.migrate(Target::Latest).await.unwrap();
    let versions: Vec<u64> = result.applied.iter().map(|s| s.version).collect();
    assert_eq!(versions, vec![2, 3]);
    assert_eq!(engine.state().await.unwrap(), EngineState::Clean(3));
}

#[tokio::test]
async fn test_failure_at_first_step_of_three() {
    let temp_dir = create_test_dir();
    let dir = migrations_dir(temp_dir.path());
    write_changeset(&dir, 1, "broken", "NOT VALID SQL", None);
    write_table_changesets(&dir, &[2, 3]);

    let engine = open_engine(temp_dir.path(), LOCK_TIMEOUT).await;
    assert!(engine.migrate(Target::Latest).await.is_err());

    assert_eq!(engine.state().await.unwrap(), EngineState::Dirty(1));
    assert!(!table_exists(temp_dir.path(), "t2"));
}

#[tokio::test]
async fn test_failed_down_step_marks_target_version() {
    let temp_dir = create_test_dir();
    let dir = migrations_dir(temp_dir.path());
    write_table_changesets(&dir, &[1, 2]);
    write_changeset(
        &dir,
        3,
        "bad_down",
        "CREATE TABLE t3 (id INTEGER);",
        Some("DROP TABLE does_not_exist;"),
    );

    let engine = open_engine(temp_dir.path(), LOCK_TIMEOUT).await;
    engine.migrate(Target::Latest).await.unwrap();

    let err = engine.migrate(Target::Initial).await.unwrap_err();
    assert!(matches!(
        err,
        MigrationError::ScriptExecution {
            version: 3,
            direction: MigrationDirection::Down,
            ..
        }
    ));
    // The dirty marker names the version the failed step was moving to
    assert_eq!(engine.state().await.unwrap(), EngineState::Dirty(2));
    assert!(table_exists(temp_dir.path(), "t2"));
}

#[tokio::test]
async fn test_no_op_commands_run_nothing() {
    let temp_dir = create_test_dir();
    write_table_changesets(&migrations_dir(temp_dir.path()), &[1, 2]);
    let engine = open_engine(temp_dir.path(), LOCK_TIMEOUT).await;

    engine.migrate(Target::Latest).await.unwrap();

    let result = engine.migrate(Target::Latest).await.unwrap();
    assert!(result.is_no_change());

    let result = engine.migrate(Target::Version(2)).await.unwrap();
    assert!(result.is_no_change());

    let result = engine.migrate(Target::Steps(0)).await.unwrap();
    assert!(result.is_no_change());
    assert_eq!(engine.state().await.unwrap(), EngineState::Clean(2));
}

#[tokio::test]
async fn test_irreversible_changeset_blocks_down_before_running() {
    let temp_dir = create_test_dir();
    let dir = migrations_dir(temp_dir.path());
    write_table_changesets(&dir, &[1, 3]);
    write_changeset(&dir, 2, "one_way", "CREATE TABLE t2 (id INTEGER);", None);

    let engine = open_engine(temp_dir.path(), LOCK_TIMEOUT).await;
    engine.migrate(Target::Latest).await.unwrap();

    let err = engine.migrate(Target::Initial).await.unwrap_err();
    assert!(matches!(err, MigrationError::Irreversible { version: 2 }));

    // Nothing ran: t3 still exists and the record is untouched
    assert!(table_exists(temp_dir.path(), "t3"));
    assert_eq!(
        engine.version().await.unwrap(),
        Some(VersionRecord::clean(3))
    );
}

#[tokio::test]
async fn test_drop_resets_to_initial() {
    let temp_dir = create_test_dir();
    write_table_changesets(&migrations_dir(temp_dir.path()), &[1, 2]);
    let engine = open_engine(temp_dir.path(), LOCK_TIMEOUT).await;

    engine.migrate(Target::Latest).await.unwrap();
    engine.drop_all().await.unwrap();

    assert!(!table_exists(temp_dir.path(), "t1"));
    assert_eq!(engine.state().await.unwrap(), EngineState::Clean(0));

    // Everything can be applied again
    let result = engine.migrate(Target::Latest).await.unwrap();
    assert_eq!(result.applied.len(), 2);
}

#[tokio::test]
async fn test_held_lock_times_out_second_engine() {
    let temp_dir = create_test_dir();
    write_table_changesets(&migrations_dir(temp_dir.path()), &[1]);

    let holder = schemactl::connect(
        &common::db_path(temp_dir.path()).to_string_lossy(),
        common::TABLE,
    )
    .await
    .unwrap();
    let mut guard = LockManager::new(holder)
        .acquire(Duration::from_secs(1))
        .await
        .unwrap();

    let engine = open_engine(temp_dir.path(), Duration::from_millis(200)).await;
    let err = engine.migrate(Target::Latest).await.unwrap_err();
    assert!(matches!(err, MigrationError::Lock(LockError::Timeout { .. })));
    assert_eq!(engine.version().await.unwrap(), None);
    assert!(!table_exists(temp_dir.path(), "t1"));

    guard.release().await.unwrap();
    engine.migrate(Target::Latest).await.unwrap();
    assert_eq!(engine.state().await.unwrap(), EngineState::Clean(1));
}

#[tokio::test]
async fn test_concurrent_engines_never_double_apply() {
    let temp_dir = create_test_dir();
    write_table_changesets(&migrations_dir(temp_dir.path()), &[1, 2, 3]);

    let first = open_engine(temp_dir.path(), LOCK_TIMEOUT).await;
    let second = open_engine(temp_dir.path(), LOCK_TIMEOUT).await;

    let (a, b) = tokio::join!(
        first.migrate(Target::Latest),
        second.migrate(Target::Latest)
    );
    let a = a.expect("first engine should succeed");
    let b = b.expect("second engine should succeed");

    // Whichever ran second re-read the record under the lock and saw Clean(3)
    let mut applied = vec![a.applied.len(), b.applied.len()];
    applied.sort();
    assert_eq!(applied, vec![0, 3]);
    assert_eq!(first.state().await.unwrap(), EngineState::Clean(3));
}
