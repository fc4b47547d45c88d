//! # WAL Recovery Tests
//!
//! Durability through the redo log, alone and composed with checkpoints:
//!
//! - R1: a table is rebuilt from the log alone (no checkpoint file)
//! - R2: checkpoint + log tail converges to the source's final row multiset
//!   under a concurrent mixed workload, periodic checkpoints, logging and GC
//! - R3: commit callbacks fire once the WAL accepts the transaction

mod common;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use stratadb::{
    BlockStore, CheckpointConfig, CheckpointManager, GarbageCollector, LogManager, PeriodicTask,
    SqlTable, TableOid, TransactionManager,
};

const LOG_FILE_NAME: &str = "test.log";

#[test]
fn recovery_from_logs_alone() {
    let dir = tempfile::tempdir().unwrap();
    let log = Arc::new(LogManager::new(dir.path().join(LOG_FILE_NAME)).unwrap());
    let manager = Arc::new(TransactionManager::new(Some(Arc::clone(&log)), true));
    let store = Arc::new(BlockStore::new(10_000));
    let mut rng = StdRng::seed_from_u64(13523777);

    let schema = common::random_schema(10, true, &mut rng);
    let source = Arc::new(SqlTable::new(Arc::clone(&store), schema.clone(), TableOid(0)));
    let slots = common::populate_random(&manager, &source, &schema, 100, 0.2, &mut rng);

    let acks = Arc::new(AtomicUsize::new(0));
    {
        let mut gc = GarbageCollector::new(Arc::clone(&manager));
        let log_pump = {
            let log = Arc::clone(&log);
            PeriodicTask::spawn(Duration::from_millis(10), move || log.process().map(|_| ()))
        };

        let result = common::run_mixed_workload(
            &manager, &source, &schema, &slots, 100, 5, 0.5, 4, 0xFEED,
        );
        assert!(result.committed > 0);
        log_pump.stop();
        gc.perform_gc();
        gc.perform_gc();
        let ack_probe = Arc::clone(&acks);
        let mut probe_txn = manager.begin_transaction();
        let probe_row = common::random_row(&source, &schema, 0.2, &mut rng);
        source.insert(&mut probe_txn, &probe_row).unwrap();
        manager.commit(probe_txn, move || {
            ack_probe.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(acks.load(Ordering::SeqCst), 0, "not durable before process");
        log.process().unwrap();
        assert_eq!(acks.load(Ordering::SeqCst), 1, "acknowledged after flush");
    }

    let original = common::table_contents(&manager, &source, &schema);

    let mut checkpoints =
        CheckpointManager::new(CheckpointConfig::new(dir.path()).with_prefix("checkpoint_file"));
    let recovered = Arc::new(SqlTable::new(Arc::clone(&store), schema.clone(), TableOid(0)));
    let mut recovery_txn = manager.begin_transaction();
    checkpoints.start_recovery();
    checkpoints.register_table(Arc::clone(&recovered));
    checkpoints
        .recover_from_logs(&mut recovery_txn, &dir.path().join(LOG_FILE_NAME), 0)
        .unwrap();
    manager.commit(recovery_txn, || {});

    let rebuilt = common::table_contents(&manager, &recovered, &schema);
    assert_eq!(original, rebuilt);
    log.shutdown().unwrap();
}

#[test]
fn checkpoint_plus_log_tail_converges_under_concurrency() {
    let dir = tempfile::tempdir().unwrap();
    let log = Arc::new(LogManager::new(dir.path().join(LOG_FILE_NAME)).unwrap());
    let manager = Arc::new(TransactionManager::new(Some(Arc::clone(&log)), true));
    let store = Arc::new(BlockStore::new(10_000));
    let mut rng = StdRng::seed_from_u64(13523);

    let schema = common::random_schema(10, true, &mut rng);
    let source = Arc::new(SqlTable::new(Arc::clone(&store), schema.clone(), TableOid(0)));
    let slots = common::populate_random(&manager, &source, &schema, 100, 0.2, &mut rng);

    let checkpoints = Arc::new(Mutex::new(CheckpointManager::new(
        CheckpointConfig::new(dir.path()).with_prefix("checkpoint_file"),
    )));
    let gc = Arc::new(Mutex::new(GarbageCollector::new(Arc::clone(&manager))));

    // Background cadence mirroring a running system: WAL flush, snapshot
    // checkpoints, garbage collection, all concurrent with the workload.
    let log_pump = {
        let log = Arc::clone(&log);
        PeriodicTask::spawn(Duration::from_millis(10), move || log.process().map(|_| ()))
    };
    let checkpointer = {
        let checkpoints = Arc::clone(&checkpoints);
        let manager = Arc::clone(&manager);
        let source = Arc::clone(&source);
        let schema = schema.clone();
        PeriodicTask::spawn(Duration::from_millis(50), move || {
            let txn = manager.begin_transaction();
            let result = checkpoints.lock().process(&txn, &source, &schema);
            // The snapshot transaction is read-only; commit it even if the
            // checkpoint failed so the GC watermark keeps advancing.
            manager.commit(txn, || {});
            result
        })
    };
    let collector = {
        let gc = Arc::clone(&gc);
        PeriodicTask::spawn(Duration::from_millis(10), move || {
            gc.lock().perform_gc();
            Ok(())
        })
    };

    let result = common::run_mixed_workload(
        &manager, &source, &schema, &slots, 100, 5, 0.5, 4, 0xC0FFEE,
    );
    assert!(result.committed > 0);

    // Give the checkpointer time for at least one full snapshot, then stop
    // everything and drain the log.
    std::thread::sleep(Duration::from_millis(120));
    checkpointer.stop();
    log_pump.stop();
    log.process().unwrap();
    collector.stop();
    {
        let mut gc = gc.lock();
        gc.perform_gc();
        gc.perform_gc();
    }

    let original = common::table_contents(&manager, &source, &schema);

    let (checkpoint_path, checkpoint_start) = checkpoints
        .lock()
        .get_latest_checkpoint_filename()
        .unwrap()
        .expect("at least one checkpoint must have completed");

    let recovered = Arc::new(SqlTable::new(Arc::clone(&store), schema.clone(), TableOid(0)));
    let mut recovery_txn = manager.begin_transaction();
    {
        let mut checkpoints = checkpoints.lock();
        checkpoints.start_recovery();
        checkpoints.register_table(Arc::clone(&recovered));
        checkpoints.recover(&mut recovery_txn, &checkpoint_path).unwrap();
        checkpoints
            .recover_from_logs(
                &mut recovery_txn,
                &dir.path().join(LOG_FILE_NAME),
                checkpoint_start,
            )
            .unwrap();
    }
    manager.commit(recovery_txn, || {});

    let rebuilt = common::table_contents(&manager, &recovered, &schema);
    assert_eq!(original, rebuilt);

    checkpoints.lock().unlink_checkpoint_files().unwrap();
    log.shutdown().unwrap();
}
