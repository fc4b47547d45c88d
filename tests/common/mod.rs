//! Shared helpers for the integration tests: seeded random schemas and
//! rows, a canonical row printer for multiset comparison, and a small
//! multi-threaded OLTP driver.

#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::thread;

use stratadb::storage::projection::{AttrValue, ProjectedRow};
use stratadb::{
    ColOid, Column, Schema, SqlTable, TransactionContext, TransactionManager, TupleSlot, TypeId,
};

const FIXED_TYPES: &[TypeId] = &[
    TypeId::TinyInt,
    TypeId::SmallInt,
    TypeId::Integer,
    TypeId::BigInt,
];

/// A schema of `num_columns` nullable columns with oids 1..=n, mixing fixed
/// and (optionally) varlen types.
pub fn random_schema(num_columns: usize, varlen_allowed: bool, rng: &mut StdRng) -> Schema {
    let mut columns = Vec::with_capacity(num_columns);
    for i in 0..num_columns {
        let type_id = if varlen_allowed && rng.gen_bool(0.3) {
            TypeId::Varchar
        } else {
            FIXED_TYPES[rng.gen_range(0..FIXED_TYPES.len())]
        };
        let mut column = Column::new(format!("c{i}"), type_id, true, ColOid(i as u64 + 1));
        if type_id.is_varlen() {
            column = column.with_max_varlen_size(64);
        }
        columns.push(column);
    }
    Schema::new(columns)
}

pub fn random_value(type_id: TypeId, rng: &mut StdRng) -> AttrValue {
    match type_id {
        TypeId::TinyInt => AttrValue::tinyint(rng.gen()),
        TypeId::SmallInt => AttrValue::smallint(rng.gen()),
        TypeId::Integer => AttrValue::integer(rng.gen()),
        TypeId::BigInt => AttrValue::bigint(rng.gen()),
        TypeId::Varchar | TypeId::Varbinary => {
            let len = rng.gen_range(1..=48);
            let bytes: Vec<u8> = (0..len).map(|_| rng.gen_range(b'a'..=b'z')).collect();
            AttrValue::varlen(&bytes)
        }
    }
}

/// A full row over `schema`'s columns in declaration order; each column is
/// null with probability `null_bias`.
pub fn random_row(
    table: &SqlTable,
    schema: &Schema,
    null_bias: f64,
    rng: &mut StdRng,
) -> ProjectedRow {
    let (init, _) = table.initializer_for_projected_row(&schema.all_oids());
    let mut row = init.initialize();
    for (idx, column) in schema.columns().iter().enumerate() {
        let value = if rng.gen_bool(null_bias) {
            None
        } else {
            Some(random_value(column.type_id(), rng))
        };
        row.set_value(idx as u16, value);
    }
    row
}

/// Inserts `num_rows` random rows in one committed transaction, returning
/// their slots.
pub fn populate_random(
    manager: &TransactionManager,
    table: &SqlTable,
    schema: &Schema,
    num_rows: usize,
    null_bias: f64,
    rng: &mut StdRng,
) -> Vec<TupleSlot> {
    let mut txn = manager.begin_transaction();
    let mut slots = Vec::with_capacity(num_rows);
    for _ in 0..num_rows {
        let row = random_row(table, schema, null_bias, rng);
        slots.push(table.insert(&mut txn, &row).unwrap());
    }
    manager.commit(txn, || {});
    slots
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Canonical text form of one row: column oids with hex contents, varlen by
/// content only. Two tables hold the same logical data iff their sorted
/// printouts are equal.
pub fn print_row(schema: &Schema, values: &[Option<&AttrValue>]) -> String {
    let mut out = String::new();
    for (column, value) in schema.columns().iter().zip(values) {
        let rendered = match value {
            None => "NULL".to_string(),
            Some(AttrValue::Fixed(v)) => hex(v.as_bytes()),
            Some(AttrValue::Varlen(v)) => format!("varlen:{}", hex(v.as_bytes())),
        };
        out.push_str(&format!("col {}: {rendered}\n", column.oid().0));
    }
    out
}

/// Prints every row visible to `txn`, appending to `out`.
pub fn print_all_rows(
    txn: &TransactionContext,
    table: &SqlTable,
    schema: &Schema,
    out: &mut Vec<String>,
) {
    let (init, _) = table.initializer_for_projected_columns(&schema.all_oids(), 256);
    let mut columns = init.initialize();
    let mut iter = table.begin();
    loop {
        table.scan(txn, &mut iter, &mut columns);
        if columns.num_tuples() == 0 {
            break;
        }
        for row in columns.rows() {
            let values: Vec<Option<&AttrValue>> =
                (0..row.num_columns()).map(|i| row.value(i)).collect();
            out.push(print_row(schema, &values));
        }
    }
}

/// Sorted multiset snapshot of a table under a fresh transaction.
pub fn table_contents(
    manager: &TransactionManager,
    table: &SqlTable,
    schema: &Schema,
) -> Vec<String> {
    let txn = manager.begin_transaction();
    let mut rows = Vec::new();
    print_all_rows(&txn, table, schema, &mut rows);
    manager.commit(txn, || {});
    rows.sort();
    rows
}

/// Outcome counts of a mixed workload run.
#[derive(Debug, Default, Clone, Copy)]
pub struct WorkloadResult {
    pub committed: usize,
    pub aborted: usize,
}

/// Runs `num_txns` transactions of `txn_len` operations (updates with
/// probability `update_ratio`, selects otherwise) over the given slots,
/// split across `threads` worker threads. A failed update aborts its
/// transaction, as the write-conflict contract requires.
pub fn run_mixed_workload(
    manager: &Arc<TransactionManager>,
    table: &Arc<SqlTable>,
    schema: &Schema,
    slots: &[TupleSlot],
    num_txns: usize,
    txn_len: usize,
    update_ratio: f64,
    threads: usize,
    seed: u64,
) -> WorkloadResult {
    let schema = Arc::new(schema.clone());
    let slots = Arc::new(slots.to_vec());
    let mut handles = Vec::new();
    for worker in 0..threads {
        let manager = Arc::clone(manager);
        let table = Arc::clone(table);
        let schema = Arc::clone(&schema);
        let slots = Arc::clone(&slots);
        let budget = num_txns / threads + usize::from(worker < num_txns % threads);
        handles.push(thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(seed ^ (worker as u64 + 1).wrapping_mul(0x9E37_79B9));
            let mut result = WorkloadResult::default();
            let (select_init, _) = table.initializer_for_projected_row(&schema.all_oids());
            let mut select_buffer = select_init.initialize();
            for _ in 0..budget {
                let mut txn = manager.begin_transaction();
                let mut doomed = false;
                for _ in 0..txn_len {
                    let slot = slots[rng.gen_range(0..slots.len())];
                    if rng.gen_bool(update_ratio) {
                        let row = random_row(&table, &schema, 0.2, &mut rng);
                        if !table.update(&mut txn, slot, &row).unwrap() {
                            doomed = true;
                            break;
                        }
                    } else {
                        table.select(&txn, slot, &mut select_buffer);
                    }
                }
                if doomed {
                    manager.abort(txn);
                    result.aborted += 1;
                } else {
                    manager.commit(txn, || {});
                    result.committed += 1;
                }
            }
            result
        }));
    }
    let mut total = WorkloadResult::default();
    for handle in handles {
        let partial = handle.join().unwrap();
        total.committed += partial.committed;
        total.aborted += partial.aborted;
    }
    total
}
