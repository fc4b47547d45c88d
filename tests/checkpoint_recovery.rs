//! # Checkpoint and Recovery Tests
//!
//! Writing a table out at a consistent snapshot and rebuilding it from the
//! file:
//!
//! - R1: a checkpointed table recovers with an equal row multiset (no varlen)
//! - R2: the same holds with varlen columns and rows wider than the
//!   checkpoint writer's buffer
//! - R3: several tables checkpointed under one transaction recover from the
//!   single file group
//! - R4: the newest checkpoint file is discovered by encoded timestamp, and
//!   unlink removes every checkpoint file

mod common;

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;

use stratadb::{
    BlockStore, CheckpointConfig, CheckpointManager, SqlTable, TableOid, TransactionManager,
};

fn checkpoint_manager(dir: &std::path::Path) -> CheckpointManager {
    CheckpointManager::new(CheckpointConfig::new(dir).with_prefix("checkpoint_file"))
}

fn recover_into(
    manager: &TransactionManager,
    checkpoints: &mut CheckpointManager,
    targets: Vec<Arc<SqlTable>>,
) {
    let (path, _start) = checkpoints
        .get_latest_checkpoint_filename()
        .unwrap()
        .expect("a checkpoint file must exist");
    let mut recovery_txn = manager.begin_transaction();
    checkpoints.start_recovery();
    for table in targets {
        checkpoints.register_table(table);
    }
    checkpoints.recover(&mut recovery_txn, &path).unwrap();
    manager.commit(recovery_txn, || {});
}

fn roundtrip_one_table(num_columns: usize, varlen: bool, seed: u64) {
    let dir = tempfile::tempdir().unwrap();
    let mut checkpoints = checkpoint_manager(dir.path());
    let manager = TransactionManager::new(None, false);
    let store = Arc::new(BlockStore::new(10_000));

    let mut rng = StdRng::seed_from_u64(seed);
    let schema = common::random_schema(num_columns, varlen, &mut rng);
    let source = Arc::new(SqlTable::new(
        Arc::clone(&store),
        schema.clone(),
        TableOid(0),
    ));
    common::populate_random(&manager, &source, &schema, 100, 0.2, &mut rng);

    let checkpoint_txn = manager.begin_transaction();
    checkpoints
        .process(&checkpoint_txn, &source, &schema)
        .unwrap();
    manager.commit(checkpoint_txn, || {});

    let recovered = Arc::new(SqlTable::new(
        Arc::clone(&store),
        schema.clone(),
        TableOid(0),
    ));
    recover_into(&manager, &mut checkpoints, vec![Arc::clone(&recovered)]);

    let original = common::table_contents(&manager, &source, &schema);
    let rebuilt = common::table_contents(&manager, &recovered, &schema);
    assert_eq!(original.len(), 100);
    assert_eq!(original, rebuilt);
    checkpoints.unlink_checkpoint_files().unwrap();
}

#[test]
fn checkpoint_recovery_no_varlen() {
    roundtrip_one_table(3, false, 13523);
}

#[test]
fn checkpoint_recovery_with_varlen() {
    roundtrip_one_table(3, true, 13523777);
}

#[test]
fn checkpoint_recovery_with_huge_rows() {
    // 512 mixed columns: a single serialized row dwarfs the writer's
    // internal buffering.
    roundtrip_one_table(512, true, 13523777);
}

#[test]
fn multi_table_checkpoint_recovers_both() {
    let dir = tempfile::tempdir().unwrap();
    let mut checkpoints = checkpoint_manager(dir.path());
    let manager = TransactionManager::new(None, false);
    let store = Arc::new(BlockStore::new(10_000));
    let mut rng = StdRng::seed_from_u64(13523777);

    let schema_a = common::random_schema(3, true, &mut rng);
    let schema_b = common::random_schema(4, true, &mut rng);
    let table_a = Arc::new(SqlTable::new(Arc::clone(&store), schema_a.clone(), TableOid(1)));
    let table_b = Arc::new(SqlTable::new(Arc::clone(&store), schema_b.clone(), TableOid(2)));
    common::populate_random(&manager, &table_a, &schema_a, 100, 0.2, &mut rng);
    common::populate_random(&manager, &table_b, &schema_b, 100, 0.2, &mut rng);

    let txn = manager.begin_transaction();
    checkpoints.start_checkpoint(&txn).unwrap();
    checkpoints.checkpoint(&txn, &table_a, &schema_a).unwrap();
    checkpoints.checkpoint(&txn, &table_b, &schema_b).unwrap();
    checkpoints.end_checkpoint().unwrap();
    manager.commit(txn, || {});

    let recovered_a = Arc::new(SqlTable::new(Arc::clone(&store), schema_a.clone(), TableOid(1)));
    let recovered_b = Arc::new(SqlTable::new(Arc::clone(&store), schema_b.clone(), TableOid(2)));
    recover_into(
        &manager,
        &mut checkpoints,
        vec![Arc::clone(&recovered_a), Arc::clone(&recovered_b)],
    );

    assert_eq!(
        common::table_contents(&manager, &table_a, &schema_a),
        common::table_contents(&manager, &recovered_a, &schema_a)
    );
    assert_eq!(
        common::table_contents(&manager, &table_b, &schema_b),
        common::table_contents(&manager, &recovered_b, &schema_b)
    );
    checkpoints.unlink_checkpoint_files().unwrap();
}

#[test]
fn latest_checkpoint_wins_and_unlink_clears_the_directory() {
    let dir = tempfile::tempdir().unwrap();
    let mut checkpoints = checkpoint_manager(dir.path());
    let manager = TransactionManager::new(None, false);
    let store = Arc::new(BlockStore::new(100));
    let mut rng = StdRng::seed_from_u64(99);

    let schema = common::random_schema(2, false, &mut rng);
    let table = Arc::new(SqlTable::new(Arc::clone(&store), schema.clone(), TableOid(0)));
    common::populate_random(&manager, &table, &schema, 5, 0.0, &mut rng);

    let mut starts = Vec::new();
    for _ in 0..3 {
        let txn = manager.begin_transaction();
        starts.push(txn.start_time());
        checkpoints.process(&txn, &table, &schema).unwrap();
        manager.commit(txn, || {});
    }

    let (_path, latest) = checkpoints
        .get_latest_checkpoint_filename()
        .unwrap()
        .unwrap();
    assert_eq!(latest, *starts.last().unwrap());

    checkpoints.unlink_checkpoint_files().unwrap();
    assert!(checkpoints.get_latest_checkpoint_filename().unwrap().is_none());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn unregistered_section_is_skipped_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut checkpoints = checkpoint_manager(dir.path());
    let manager = TransactionManager::new(None, false);
    let store = Arc::new(BlockStore::new(1_000));
    let mut rng = StdRng::seed_from_u64(21);

    let schema_a = common::random_schema(3, true, &mut rng);
    let schema_b = common::random_schema(3, true, &mut rng);
    let table_a = Arc::new(SqlTable::new(Arc::clone(&store), schema_a.clone(), TableOid(1)));
    let table_b = Arc::new(SqlTable::new(Arc::clone(&store), schema_b.clone(), TableOid(2)));
    common::populate_random(&manager, &table_a, &schema_a, 10, 0.2, &mut rng);
    common::populate_random(&manager, &table_b, &schema_b, 10, 0.2, &mut rng);

    let txn = manager.begin_transaction();
    checkpoints.start_checkpoint(&txn).unwrap();
    checkpoints.checkpoint(&txn, &table_a, &schema_a).unwrap();
    checkpoints.checkpoint(&txn, &table_b, &schema_b).unwrap();
    checkpoints.end_checkpoint().unwrap();
    manager.commit(txn, || {});

    // Register only table 2; table 1's section must be skipped cleanly.
    let recovered_b = Arc::new(SqlTable::new(Arc::clone(&store), schema_b.clone(), TableOid(2)));
    recover_into(&manager, &mut checkpoints, vec![Arc::clone(&recovered_b)]);
    assert_eq!(
        common::table_contents(&manager, &table_b, &schema_b),
        common::table_contents(&manager, &recovered_b, &schema_b)
    );
    checkpoints.unlink_checkpoint_files().unwrap();
}
