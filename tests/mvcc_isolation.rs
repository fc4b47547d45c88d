//! # MVCC Isolation Tests
//!
//! The transactional contract over one table:
//!
//! - R1: a reader sees exactly the versions committed at or before its start
//! - R2: of two concurrent writers to one slot, exactly one succeeds
//! - R3: nothing an aborted transaction did is ever observed
//! - R4: two GC passes after quiescence release all committed undo memory

mod common;

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use stratadb::storage::projection::AttrValue;
use stratadb::{
    BlockStore, ColOid, Column, GarbageCollector, Schema, SqlTable, TableOid, TransactionManager,
    TypeId,
};

fn counter_table() -> (Arc<SqlTable>, Schema) {
    let schema = Schema::new(vec![
        Column::new("id", TypeId::Integer, false, ColOid(1)),
        Column::new("value", TypeId::BigInt, false, ColOid(2)),
    ]);
    let table = SqlTable::new(
        Arc::new(BlockStore::new(100)),
        schema.clone(),
        TableOid(1),
    );
    (Arc::new(table), schema)
}

#[test]
fn readers_see_their_snapshot_not_later_commits() {
    let (table, _schema) = counter_table();
    let manager = TransactionManager::new(None, false);
    let (init, map) = table.initializer_for_projected_row(&[ColOid(1), ColOid(2)]);

    let mut setup = manager.begin_transaction();
    let mut row = init.initialize();
    row.set_value(map[&ColOid(1)], Some(AttrValue::integer(1)));
    row.set_value(map[&ColOid(2)], Some(AttrValue::bigint(10)));
    let slot = table.insert(&mut setup, &row).unwrap();
    manager.commit(setup, || {});

    let old_reader = manager.begin_transaction();

    for value in [20i64, 30i64] {
        let mut writer = manager.begin_transaction();
        let mut row = init.initialize();
        row.set_value(map[&ColOid(1)], Some(AttrValue::integer(1)));
        row.set_value(map[&ColOid(2)], Some(AttrValue::bigint(value)));
        assert!(table.update(&mut writer, slot, &row).unwrap());
        manager.commit(writer, || {});
    }

    let mut out = init.initialize();
    assert!(table.select(&old_reader, slot, &mut out));
    assert_eq!(
        out.value(1).unwrap().as_fixed().unwrap().as_bytes(),
        &10i64.to_le_bytes(),
        "snapshot reader must see the value as of its start"
    );
    manager.commit(old_reader, || {});

    let fresh = manager.begin_transaction();
    assert!(table.select(&fresh, slot, &mut out));
    assert_eq!(
        out.value(1).unwrap().as_fixed().unwrap().as_bytes(),
        &30i64.to_le_bytes()
    );
    manager.commit(fresh, || {});
}

#[test]
fn exactly_one_concurrent_writer_wins() {
    let (table, schema) = counter_table();
    let manager = Arc::new(TransactionManager::new(None, false));
    let mut rng = StdRng::seed_from_u64(3);
    let slots = common::populate_random(&manager, &table, &schema, 1, 0.0, &mut rng);
    let slot = slots[0];

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let wins = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for worker in 0..threads {
        let table = Arc::clone(&table);
        let manager = Arc::clone(&manager);
        let barrier = Arc::clone(&barrier);
        let wins = Arc::clone(&wins);
        let schema = schema.clone();
        handles.push(thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(worker as u64);
            let row = common::random_row(&table, &schema, 0.0, &mut rng);
            let mut txn = manager.begin_transaction();
            barrier.wait();
            if table.update(&mut txn, slot, &row).unwrap() {
                wins.fetch_add(1, Ordering::SeqCst);
                manager.commit(txn, || {});
            } else {
                manager.abort(txn);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    // Every writer started before any update ran, so each loser sees either
    // the winner's in-flight record or a commit newer than its own start.
    assert_eq!(wins.load(Ordering::SeqCst), 1);
}

#[test]
fn aborted_effects_are_never_observed() {
    let (table, _schema) = counter_table();
    let manager = TransactionManager::new(None, false);
    let (init, map) = table.initializer_for_projected_row(&[ColOid(1), ColOid(2)]);

    let mut setup = manager.begin_transaction();
    let mut row = init.initialize();
    row.set_value(map[&ColOid(1)], Some(AttrValue::integer(1)));
    row.set_value(map[&ColOid(2)], Some(AttrValue::bigint(10)));
    let updated_slot = table.insert(&mut setup, &row).unwrap();
    manager.commit(setup, || {});

    let mut doomed = manager.begin_transaction();
    let mut row = init.initialize();
    row.set_value(map[&ColOid(1)], Some(AttrValue::integer(2)));
    row.set_value(map[&ColOid(2)], Some(AttrValue::bigint(999)));
    let inserted_slot = table.insert(&mut doomed, &row).unwrap();
    let mut row = init.initialize();
    row.set_value(map[&ColOid(1)], Some(AttrValue::integer(1)));
    row.set_value(map[&ColOid(2)], Some(AttrValue::bigint(777)));
    assert!(table.update(&mut doomed, updated_slot, &row).unwrap());
    manager.abort(doomed);

    let reader = manager.begin_transaction();
    let mut out = init.initialize();
    assert!(
        !table.select(&reader, inserted_slot, &mut out),
        "aborted insert must stay invisible"
    );
    assert!(table.select(&reader, updated_slot, &mut out));
    assert_eq!(
        out.value(1).unwrap().as_fixed().unwrap().as_bytes(),
        &10i64.to_le_bytes(),
        "aborted update must leave the old value"
    );
    manager.commit(reader, || {});
}

#[test]
fn same_value_update_still_takes_the_write_lock() {
    let (table, schema) = counter_table();
    let manager = TransactionManager::new(None, false);
    let mut rng = StdRng::seed_from_u64(11);
    let slot = common::populate_random(&manager, &table, &schema, 1, 0.0, &mut rng)[0];

    let (init, _) = table.initializer_for_projected_row(&schema.all_oids());
    let mut current = init.initialize();
    let probe = manager.begin_transaction();
    assert!(table.select(&probe, slot, &mut current));
    manager.commit(probe, || {});

    // Write back the value already stored. The no-op delta must still
    // conflict with a concurrent writer.
    let mut first = manager.begin_transaction();
    assert!(table.update(&mut first, slot, &current).unwrap());
    let mut second = manager.begin_transaction();
    assert!(!table.update(&mut second, slot, &current).unwrap());
    manager.abort(second);
    manager.commit(first, || {});
}

#[test]
fn two_gc_passes_release_all_committed_undo_memory() {
    let (table, schema) = counter_table();
    let manager = Arc::new(TransactionManager::new(None, true));
    let mut gc = GarbageCollector::new(Arc::clone(&manager));
    let mut rng = StdRng::seed_from_u64(5);

    let slots = common::populate_random(&manager, &table, &schema, 20, 0.0, &mut rng);
    for chunk in slots.chunks(4) {
        let mut txn = manager.begin_transaction();
        for &slot in chunk {
            let row = common::random_row(&table, &schema, 0.2, &mut rng);
            assert!(table.update(&mut txn, slot, &row).unwrap());
        }
        manager.commit(txn, || {});
    }
    assert!(manager.live_undo_records() > 0);

    let first = gc.perform_gc();
    assert!(first.unlinked > 0);
    let second = gc.perform_gc();
    assert!(second.deallocated > 0);
    assert_eq!(
        manager.live_undo_records(),
        0,
        "all committed undo records must be freed after two passes"
    );
    assert_eq!(gc.backlog(), 0);

    // The table still answers correctly from the base images.
    let txn = manager.begin_transaction();
    let (init, _) = table.initializer_for_projected_row(&schema.all_oids());
    let mut out = init.initialize();
    for &slot in &slots {
        assert!(table.select(&txn, slot, &mut out));
    }
    manager.commit(txn, || {});
    gc.perform_gc();
    gc.perform_gc();
}
