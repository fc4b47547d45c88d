//! # Log Manager
//!
//! Durable append-only redo log. Commit hands a transaction's staged redo
//! records plus a commit marker to the in-memory queue; `process()` drains
//! the queue, serializes in commit order, appends to the log file, fsyncs,
//! and only then runs the commit callbacks. A crash after the fsync loses
//! nothing; a crash before it loses whole transactions, never parts of one.
//!
//! Read-only transactions never reach this queue (see
//! `TransactionManager::commit`), so the log carries no empty commit
//! markers.

use eyre::{Result, WrapErr};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use super::record::{self, RedoRecord};
use crate::mvcc::Timestamp;

type CommitCallback = Box<dyn FnOnce() + Send>;

struct LogBatch {
    txn_begin: Timestamp,
    commit_ts: Timestamp,
    redos: Vec<RedoRecord>,
    callback: CommitCallback,
}

pub struct LogManager {
    path: PathBuf,
    file: Mutex<File>,
    queue: Mutex<VecDeque<LogBatch>>,
}

impl LogManager {
    /// Opens (or creates) the log file for appending.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .wrap_err_with(|| format!("failed to open WAL file at {:?}", path))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
            queue: Mutex::new(VecDeque::new()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queues one committed transaction. Called by the transaction manager
    /// under its commit latch, which is what makes queue order commit order.
    pub(crate) fn enqueue(
        &self,
        txn_begin: Timestamp,
        commit_ts: Timestamp,
        redos: Vec<RedoRecord>,
        callback: CommitCallback,
    ) {
        self.queue.lock().push_back(LogBatch {
            txn_begin,
            commit_ts,
            redos,
            callback,
        });
    }

    pub fn pending_batches(&self) -> usize {
        self.queue.lock().len()
    }

    /// Drains the queue to disk and acknowledges the drained commits.
    /// Returns how many transactions were flushed.
    pub fn process(&self) -> Result<usize> {
        let batches: Vec<LogBatch> = {
            let mut queue = self.queue.lock();
            queue.drain(..).collect()
        };
        if batches.is_empty() {
            return Ok(0);
        }

        let mut bytes = Vec::new();
        for batch in &batches {
            record::serialize_transaction(&mut bytes, batch.txn_begin, batch.commit_ts, &batch.redos);
        }

        {
            let mut file = self.file.lock();
            record::write_all(&mut *file, &bytes)?;
            file.sync_all()
                .wrap_err_with(|| format!("failed to sync WAL at {:?}", self.path))?;
        }
        trace!(
            transactions = batches.len(),
            bytes = bytes.len(),
            "wal flush"
        );

        let flushed = batches.len();
        for batch in batches {
            (batch.callback)();
        }
        Ok(flushed)
    }

    /// Flushes whatever is queued and syncs the file one last time.
    pub fn shutdown(&self) -> Result<usize> {
        let flushed = self.process()?;
        self.file
            .lock()
            .sync_all()
            .wrap_err("failed to sync WAL during shutdown")?;
        debug!(transactions = flushed, "wal shutdown");
        Ok(flushed)
    }
}
