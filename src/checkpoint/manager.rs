//! # Checkpoint Manager
//!
//! Serializes every tuple a transaction can see into a self-contained file,
//! and rebuilds tables from that file plus the WAL tail.
//!
//! ## Writing
//!
//! A checkpoint runs inside an ordinary transaction, so its content is the
//! snapshot at that transaction's start timestamp even while writers are
//! active. The file is written under a temporary name and renamed into its
//! final `<prefix>_<start_timestamp_hex>` form only when complete; a crash
//! mid-checkpoint leaves nothing discovery would pick up.
//!
//! ## Recovery
//!
//! `recover` reinserts every checkpointed tuple into the registered table
//! named by each section header (nothing is hard-coded; the file is the
//! authority), building an old-slot → new-slot map as it goes.
//! `recover_from_logs` then replays the WAL in two passes: the first
//! collects commit timestamps so only transactions that committed after the
//! checkpoint's snapshot survive, the second applies their INSERT/UPDATE
//! records in file order, resolving slots through the map. Records for
//! unregistered tables are skipped and logged.

use eyre::{eyre, Result, WrapErr};
use hashbrown::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::codec::{TupleReader, TupleWriter};
use crate::catalog::{ColOid, Schema, TableOid};
use crate::error::StorageError;
use crate::mvcc::{Timestamp, TransactionContext};
use crate::storage::{SqlTable, TupleSlot};
use crate::wal::record::{read_frame, KIND_COMMIT, KIND_INSERT, KIND_UPDATE};

/// Tuples scanned per projection buffer while checkpointing.
const SCAN_BATCH: u32 = 1024;

#[derive(Debug, Clone)]
pub struct CheckpointConfig {
    pub directory: PathBuf,
    pub prefix: String,
}

impl CheckpointConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            prefix: "checkpoint".to_string(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn temp_path(&self) -> PathBuf {
        self.directory.join(format!("{}.tmp", self.prefix))
    }

    fn file_path(&self, start: Timestamp) -> PathBuf {
        self.directory.join(format!("{}_{start:x}", self.prefix))
    }
}

pub struct CheckpointManager {
    config: CheckpointConfig,
    out: Option<TupleWriter>,
    start_ts: Timestamp,
    tables: HashMap<TableOid, Arc<SqlTable>>,
    slot_map: HashMap<(TableOid, TupleSlot), TupleSlot>,
}

impl CheckpointManager {
    pub fn new(config: CheckpointConfig) -> Self {
        Self {
            config,
            out: None,
            start_ts: 0,
            tables: HashMap::new(),
            slot_map: HashMap::new(),
        }
    }

    /// Writes a complete single-table checkpoint within `txn`'s snapshot.
    pub fn process(
        &mut self,
        txn: &TransactionContext,
        table: &SqlTable,
        schema: &Schema,
    ) -> Result<()> {
        self.start_checkpoint(txn)?;
        self.checkpoint(txn, table, schema)?;
        self.end_checkpoint()
    }

    /// Opens a checkpoint file group under a temporary name.
    pub fn start_checkpoint(&mut self, txn: &TransactionContext) -> Result<()> {
        debug_assert!(self.out.is_none(), "checkpoint already in progress");
        fs::create_dir_all(&self.config.directory).wrap_err_with(|| {
            format!(
                "failed to create checkpoint directory {:?}",
                self.config.directory
            )
        })?;
        self.out = Some(TupleWriter::create(&self.config.temp_path())?);
        self.start_ts = txn.start_time();
        debug!(start = self.start_ts, "checkpoint started");
        Ok(())
    }

    /// Serializes one table into the open checkpoint: a sequential scan with
    /// a large projection buffer, every visible tuple including varlen
    /// payloads inline.
    pub fn checkpoint(
        &mut self,
        txn: &TransactionContext,
        table: &SqlTable,
        schema: &Schema,
    ) -> Result<()> {
        let writer = self
            .out
            .as_mut()
            .ok_or_else(|| eyre!("no checkpoint in progress"))?;
        writer.begin_section(table.oid(), schema)?;

        let oids = schema.all_oids();
        let (init, _) = table.initializer_for_projected_columns(&oids, SCAN_BATCH);
        let mut columns = init.initialize();
        let mut iter = table.begin();
        let mut written = 0u64;
        loop {
            table.scan(txn, &mut iter, &mut columns);
            if columns.num_tuples() == 0 {
                break;
            }
            for row in columns.rows() {
                writer.write_tuple(schema, &row)?;
            }
            written += columns.num_tuples() as u64;
        }
        writer.end_section()?;
        debug!(table = table.oid().0, tuples = written, "table checkpointed");
        Ok(())
    }

    /// Seals the file group and publishes it under its timestamped name.
    pub fn end_checkpoint(&mut self) -> Result<()> {
        let writer = self
            .out
            .take()
            .ok_or_else(|| eyre!("no checkpoint in progress"))?;
        writer.finish()?;
        let final_path = self.config.file_path(self.start_ts);
        fs::rename(self.config.temp_path(), &final_path)
            .wrap_err_with(|| format!("failed to publish checkpoint at {:?}", final_path))?;
        info!(start = self.start_ts, path = ?final_path, "checkpoint complete");
        Ok(())
    }

    /// Newest checkpoint in the configured directory, by the timestamp
    /// encoded in the filename.
    pub fn get_latest_checkpoint_filename(&self) -> Result<Option<(PathBuf, Timestamp)>> {
        let marker = format!("{}_", self.config.prefix);
        let mut latest: Option<(PathBuf, Timestamp)> = None;
        let entries = match fs::read_dir(&self.config.directory) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).wrap_err_with(|| {
                    format!(
                        "cannot open checkpoint directory {:?}",
                        self.config.directory
                    )
                })
            }
        };
        for entry in entries {
            let entry = entry.wrap_err("failed to read checkpoint directory entry")?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(suffix) = name.strip_prefix(&marker) else {
                continue;
            };
            let Ok(timestamp) = u64::from_str_radix(suffix, 16) else {
                continue;
            };
            if latest.as_ref().map_or(true, |(_, best)| timestamp > *best) {
                latest = Some((entry.path(), timestamp));
            }
        }
        Ok(latest)
    }

    /// Removes every checkpoint file with the configured prefix, stale
    /// temporary files included.
    pub fn unlink_checkpoint_files(&self) -> Result<()> {
        let entries = match fs::read_dir(&self.config.directory) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(e).wrap_err_with(|| {
                    format!(
                        "cannot open checkpoint directory {:?}",
                        self.config.directory
                    )
                })
            }
        };
        for entry in entries {
            let entry = entry.wrap_err("failed to read checkpoint directory entry")?;
            if entry
                .file_name()
                .to_string_lossy()
                .starts_with(&self.config.prefix)
            {
                fs::remove_file(entry.path())
                    .wrap_err_with(|| format!("failed to unlink {:?}", entry.path()))?;
            }
        }
        Ok(())
    }

    /// Clears recovery state; call before registering tables.
    pub fn start_recovery(&mut self) {
        self.tables.clear();
        self.slot_map.clear();
    }

    /// Makes a table available as a recovery target, keyed by its oid.
    pub fn register_table(&mut self, table: Arc<SqlTable>) {
        self.tables.insert(table.oid(), table);
    }

    fn registered(&self, oid: TableOid) -> Result<Arc<SqlTable>, StorageError> {
        self.tables
            .get(&oid)
            .cloned()
            .ok_or(StorageError::UnregisteredTable(oid))
    }

    /// Rehydrates registered tables from a checkpoint file, inserting every
    /// tuple under `txn` and recording the old-slot → new-slot mapping for
    /// the log replay that follows.
    pub fn recover(&mut self, txn: &mut TransactionContext, path: &Path) -> Result<()> {
        let mut reader = TupleReader::open(path)?;
        let mut restored = 0u64;
        while let Some(header) = reader.next_section()? {
            let table = match self.registered(header.table_oid) {
                Ok(table) => table,
                Err(e) => {
                    warn!("{e}, skipping checkpoint section");
                    while reader.next_tuple(&header)?.is_some() {}
                    continue;
                }
            };

            let oids: Vec<ColOid> = header.columns.iter().map(|c| c.oid).collect();
            if oids.iter().any(|&oid| table.col_id_for_oid(oid).is_none()) {
                warn!(
                    table = header.table_oid.0,
                    "checkpoint section does not match the registered schema, skipping"
                );
                while reader.next_tuple(&header)?.is_some() {}
                continue;
            }
            let (init, _) = table.initializer_for_projected_row(&oids);

            while let Some((old_slot, values)) = reader.next_tuple(&header)? {
                let mut row = init.initialize();
                for (idx, value) in values.into_iter().enumerate() {
                    row.set_value(idx as u16, value);
                }
                let new_slot = table.insert(txn, &row)?;
                let previous = self
                    .slot_map
                    .insert((header.table_oid, old_slot), new_slot);
                debug_assert!(
                    previous.is_none(),
                    "slot appears twice in one checkpoint"
                );
                restored += 1;
            }
        }
        info!(tuples = restored, path = ?path, "checkpoint recovered");
        Ok(())
    }

    /// Replays WAL records whose transactions committed after
    /// `since_timestamp` against the registered tables.
    pub fn recover_from_logs(
        &mut self,
        txn: &mut TransactionContext,
        log_path: &Path,
        since_timestamp: Timestamp,
    ) -> Result<()> {
        // Pass one: which transactions committed late enough to matter.
        // Aborted transactions have no commit record and drop out here.
        let mut committed: HashSet<Timestamp> = HashSet::new();
        {
            let file = File::open(log_path)
                .wrap_err_with(|| format!("failed to open WAL at {:?}", log_path))?;
            let mut reader = BufReader::new(file);
            loop {
                match read_frame(&mut reader) {
                    Ok(Some(frame)) if frame.kind == KIND_COMMIT => {
                        if frame.parse_commit()? > since_timestamp {
                            committed.insert(frame.txn_begin);
                        }
                    }
                    Ok(Some(_)) => {}
                    Ok(None) => break,
                    Err(e) => {
                        warn!("WAL tail unreadable, stopping first pass: {e:#}");
                        break;
                    }
                }
            }
        }

        // Pass two: apply surviving INSERT/UPDATE records in file order.
        let file = File::open(log_path)
            .wrap_err_with(|| format!("failed to open WAL at {:?}", log_path))?;
        let mut reader = BufReader::new(file);
        let mut applied = 0u64;
        loop {
            let frame = match read_frame(&mut reader) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    warn!("WAL tail unreadable, stopping replay: {e:#}");
                    break;
                }
            };
            if frame.kind == KIND_COMMIT || !committed.contains(&frame.txn_begin) {
                continue;
            }
            let table_oid = frame.redo_table_oid()?;
            let table = match self.registered(table_oid) {
                Ok(table) => table,
                Err(e) => {
                    warn!("{e}, skipping WAL record");
                    continue;
                }
            };
            let decoded = frame.parse_redo(table.data_table().layout())?;
            match frame.kind {
                KIND_INSERT => {
                    let new_slot = table.insert(txn, &decoded.delta)?;
                    self.slot_map.insert((table_oid, decoded.slot), new_slot);
                    applied += 1;
                }
                KIND_UPDATE => match self.slot_map.get(&(table_oid, decoded.slot)) {
                    Some(&new_slot) => {
                        // The recovery transaction owns every version it has
                        // written; a conflict here means the log is not in
                        // commit order and the table state can no longer be
                        // trusted past this point.
                        if !table.update(txn, new_slot, &decoded.delta)? {
                            return Err(StorageError::WriteConflict(new_slot).into());
                        }
                        applied += 1;
                    }
                    None => {
                        warn!(slot = ?decoded.slot, "update for unmapped slot, skipping");
                    }
                },
                _ => unreachable!("commit frames filtered above"),
            }
        }
        info!(records = applied, since = since_timestamp, "log replay complete");
        Ok(())
    }
}
