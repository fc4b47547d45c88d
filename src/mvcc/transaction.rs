//! # Transactions
//!
//! Timestamp allocation and the per-transaction context. A transaction is
//! owned by exactly one thread from `begin_transaction` to commit or abort;
//! the only parts of it other threads ever observe are the undo records it
//! shares with version chains, and those publish through one atomic
//! timestamp each.
//!
//! ## Timestamps
//!
//! One global atomic counter orders everything: begin draws a start
//! timestamp, commit draws a commit timestamp, so the set of commits at or
//! before any start timestamp is exactly the reader's snapshot.
//!
//! ## Commit publication
//!
//! Commit stamps every owned undo record with the commit timestamp while
//! holding the commit latch exclusively; begin takes the latch shared. A
//! transaction that begins after a commit timestamp was drawn therefore
//! always observes fully stamped records, and a reader that races the stamp
//! sees the owned sentinel and treats the record as uncommitted, which is
//! correct, because that reader's snapshot predates the commit.
//!
//! ## Lifecycle after commit/abort
//!
//! With garbage collection enabled the finished context is queued for the
//! collector, which unlinks its records on one pass and drops the context on
//! the next. Without it the context is dropped immediately; chains keep
//! their shared records alive until the table itself is dropped.

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

use super::undo::UndoRecord;
use super::Timestamp;
use crate::storage::data_table::DataTable;
use crate::wal::log_manager::LogManager;
use crate::wal::record::RedoRecord;

/// A transaction's private state. Single-owner; never shared across threads.
pub struct TransactionContext {
    start_time: Timestamp,
    redo_records: Vec<RedoRecord>,
    undo_records: Vec<Arc<UndoRecord>>,
    varlen_frees_on_commit: Vec<(Weak<DataTable>, u64)>,
    varlen_frees_on_abort: Vec<(Weak<DataTable>, u64)>,
    aborted: bool,
    live_undo_records: Arc<AtomicUsize>,
}

impl TransactionContext {
    fn new(start_time: Timestamp, live_undo_records: Arc<AtomicUsize>) -> Self {
        Self {
            start_time,
            redo_records: Vec::new(),
            undo_records: Vec::new(),
            varlen_frees_on_commit: Vec::new(),
            varlen_frees_on_abort: Vec::new(),
            aborted: false,
            live_undo_records,
        }
    }

    pub fn start_time(&self) -> Timestamp {
        self.start_time
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Stages an after-image into the private redo buffer. The buffer is
    /// handed to the log manager on commit, in staging order.
    pub fn stage_write(&mut self, redo: RedoRecord) -> &mut RedoRecord {
        self.redo_records.push(redo);
        self.redo_records
            .last_mut()
            .expect("redo buffer cannot be empty after a push")
    }

    pub fn redo_records(&self) -> &[RedoRecord] {
        &self.redo_records
    }

    /// Takes ownership of an undo record this transaction installed.
    pub(crate) fn track_undo(&mut self, record: Arc<UndoRecord>) {
        self.live_undo_records.fetch_add(1, Ordering::Relaxed);
        self.undo_records.push(record);
    }

    pub(crate) fn undo_records(&self) -> &[Arc<UndoRecord>] {
        &self.undo_records
    }

    /// Schedules an out-of-line varlen buffer this transaction displaced for
    /// reclamation once the transaction commits and ages out of all
    /// snapshots.
    pub(crate) fn defer_varlen_free_on_commit(&mut self, table: Weak<DataTable>, handle: u64) {
        self.varlen_frees_on_commit.push((table, handle));
    }

    /// Schedules an out-of-line varlen buffer this transaction created for
    /// reclamation if the transaction aborts.
    pub(crate) fn defer_varlen_free_on_abort(&mut self, table: Weak<DataTable>, handle: u64) {
        self.varlen_frees_on_abort.push((table, handle));
    }

    fn take_redo_records(&mut self) -> Vec<RedoRecord> {
        std::mem::take(&mut self.redo_records)
    }

    pub(crate) fn varlen_frees_on_commit(&self) -> &[(Weak<DataTable>, u64)] {
        &self.varlen_frees_on_commit
    }

    pub(crate) fn varlen_frees_on_abort(&self) -> &[(Weak<DataTable>, u64)] {
        &self.varlen_frees_on_abort
    }
}

impl Drop for TransactionContext {
    fn drop(&mut self) {
        self.live_undo_records
            .fetch_sub(self.undo_records.len(), Ordering::Relaxed);
    }
}

/// How a finished transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransactionOutcome {
    Committed(Timestamp),
    Aborted,
}

/// A finished transaction awaiting garbage collection.
pub(crate) struct CompletedTransaction {
    pub(crate) outcome: TransactionOutcome,
    pub(crate) ctx: TransactionContext,
}

pub struct TransactionManager {
    time: AtomicU64,
    commit_latch: RwLock<()>,
    active: Mutex<BTreeSet<Timestamp>>,
    completed: Mutex<VecDeque<CompletedTransaction>>,
    gc_enabled: bool,
    log_manager: Option<Arc<LogManager>>,
    live_undo_records: Arc<AtomicUsize>,
}

impl TransactionManager {
    pub fn new(log_manager: Option<Arc<LogManager>>, gc_enabled: bool) -> Self {
        Self {
            time: AtomicU64::new(1),
            commit_latch: RwLock::new(()),
            active: Mutex::new(BTreeSet::new()),
            completed: Mutex::new(VecDeque::new()),
            gc_enabled,
            log_manager,
            live_undo_records: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Starts a transaction at the next timestamp.
    pub fn begin_transaction(&self) -> TransactionContext {
        let _shared = self.commit_latch.read();
        let start = self.time.fetch_add(1, Ordering::SeqCst);
        self.active.lock().insert(start);
        TransactionContext::new(start, Arc::clone(&self.live_undo_records))
    }

    /// Commits: draws the commit timestamp, publishes it on every owned undo
    /// record, and hands the redo buffer to the log manager. `callback` runs
    /// once the WAL has durably accepted the records, or immediately for
    /// read-only transactions and when logging is disabled.
    pub fn commit(
        &self,
        mut txn: TransactionContext,
        callback: impl FnOnce() + Send + 'static,
    ) -> Timestamp {
        debug_assert!(!txn.aborted, "cannot commit an aborted transaction");
        let commit_ts;
        {
            let _exclusive = self.commit_latch.write();
            commit_ts = self.time.fetch_add(1, Ordering::SeqCst);
            for record in txn.undo_records() {
                record.publish_commit(commit_ts);
            }
            self.active.lock().remove(&txn.start_time);

            let redos = txn.take_redo_records();
            match &self.log_manager {
                Some(log) if !redos.is_empty() => {
                    // Enqueued under the latch so the log's transaction order
                    // matches commit order.
                    log.enqueue(txn.start_time, commit_ts, redos, Box::new(callback));
                }
                _ => callback(),
            }
        }
        self.finish(CompletedTransaction {
            outcome: TransactionOutcome::Committed(commit_ts),
            ctx: txn,
        });
        commit_ts
    }

    /// Aborts: rewinds every owned undo record, newest first, restoring
    /// before-images in place. Nothing this transaction staged reaches the
    /// WAL.
    pub fn abort(&self, mut txn: TransactionContext) {
        txn.aborted = true;
        for record in txn.undo_records.iter().rev() {
            if let Some(table) = record.table().upgrade() {
                table.rollback(record);
            }
        }
        self.active.lock().remove(&txn.start_time);
        debug!(start = txn.start_time, "transaction aborted");
        self.finish(CompletedTransaction {
            outcome: TransactionOutcome::Aborted,
            ctx: txn,
        });
    }

    fn finish(&self, done: CompletedTransaction) {
        if self.gc_enabled {
            self.completed.lock().push_back(done);
        }
        // Without GC the context drops here; chains keep shared records
        // alive until their table goes away.
    }

    /// Start timestamp of the oldest live transaction, if any.
    pub fn oldest_active_start(&self) -> Option<Timestamp> {
        self.active.lock().first().copied()
    }

    pub fn num_active(&self) -> usize {
        self.active.lock().len()
    }

    /// Undo records created and not yet released; backs the GC tests.
    pub fn live_undo_records(&self) -> usize {
        self.live_undo_records.load(Ordering::Relaxed)
    }

    pub(crate) fn drain_completed(&self) -> Vec<CompletedTransaction> {
        self.completed.lock().drain(..).collect()
    }
}
