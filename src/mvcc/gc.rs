//! # Garbage Collector
//!
//! Reclaims the undo records of finished transactions in two phases per
//! pass:
//!
//! 1. **Unlink**: a committed transaction whose commit timestamp is older
//!    than every live start timestamp can no longer define any reader's
//!    snapshot; its records are detached from their version chains. Aborted
//!    transactions already popped their records during rollback and go
//!    straight through.
//! 2. **Deallocate**: contexts unlinked on the *previous* pass are dropped,
//!    together with their deferred varlen frees. The one-pass delay
//!    guarantees no reader that cloned a chain head before the unlink still
//!    holds a reference into freed state.
//!
//! A complete purge therefore takes two consecutive passes with no new
//! transactions in between.

use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

use super::transaction::{CompletedTransaction, TransactionManager, TransactionOutcome};
use super::Timestamp;

/// What one pass accomplished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcPassReport {
    /// Transactions whose records were detached from version chains.
    pub unlinked: usize,
    /// Transactions whose memory was released.
    pub deallocated: usize,
}

pub struct GarbageCollector {
    txn_manager: Arc<TransactionManager>,
    pending_unlink: VecDeque<CompletedTransaction>,
    pending_deallocate: Vec<CompletedTransaction>,
}

impl GarbageCollector {
    pub fn new(txn_manager: Arc<TransactionManager>) -> Self {
        Self {
            txn_manager,
            pending_unlink: VecDeque::new(),
            pending_deallocate: Vec::new(),
        }
    }

    /// Runs one unlink-then-deallocate pass.
    pub fn perform_gc(&mut self) -> GcPassReport {
        self.pending_unlink
            .extend(self.txn_manager.drain_completed());
        let oldest_active = self
            .txn_manager
            .oldest_active_start()
            .unwrap_or(Timestamp::MAX);

        let mut newly_unlinked = Vec::new();
        let mut still_pending = VecDeque::new();
        for done in self.pending_unlink.drain(..) {
            match done.outcome {
                TransactionOutcome::Aborted => {
                    // Rollback already popped the records off their chains.
                    newly_unlinked.push(done);
                }
                TransactionOutcome::Committed(commit) if commit < oldest_active => {
                    for record in done.ctx.undo_records() {
                        if let Some(table) = record.table().upgrade() {
                            table.unlink(record);
                        }
                    }
                    newly_unlinked.push(done);
                }
                TransactionOutcome::Committed(_) => still_pending.push_back(done),
            }
        }
        self.pending_unlink = still_pending;

        let report = GcPassReport {
            unlinked: newly_unlinked.len(),
            deallocated: self.pending_deallocate.len(),
        };
        for done in self.pending_deallocate.drain(..) {
            let frees = match done.outcome {
                TransactionOutcome::Committed(_) => done.ctx.varlen_frees_on_commit(),
                TransactionOutcome::Aborted => done.ctx.varlen_frees_on_abort(),
            };
            for (table, handle) in frees {
                if let Some(table) = table.upgrade() {
                    table.varlen_pool().remove(*handle);
                }
            }
            // Dropping the context releases the owning references to its
            // undo records.
        }
        self.pending_deallocate = newly_unlinked;

        if report.unlinked > 0 || report.deallocated > 0 {
            debug!(
                unlinked = report.unlinked,
                deallocated = report.deallocated,
                "gc pass"
            );
        }
        report
    }

    /// Transactions still waiting for either phase.
    pub fn backlog(&self) -> usize {
        self.pending_unlink.len() + self.pending_deallocate.len()
    }
}
