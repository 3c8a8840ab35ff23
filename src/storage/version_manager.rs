// Copyright 2025 Mica Project Authors. Licensed under Apache-2.0.

//! Per-row-group MVCC visibility bookkeeping.
//!
//! Visibility is tracked per vector-sized chunk of rows. A chunk starts out
//! with a single `(insert_id, delete_id)` pair and is upgraded to per-row
//! arrays the moment any two of its rows diverge in insert or delete
//! transaction id.

use parking_lot::Mutex;

use crate::vector::{SelVector, DEFAULT_VECTOR_CAPACITY};

use super::{StorageError, StorageResult, NOT_DELETED_ID, TRANSACTION_ID_START};

/// The acting transaction of an operation: its own id and the start time of
/// its snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransactionData {
    pub transaction_id: u64,
    pub start_time: u64,
}

impl TransactionData {
    pub fn new(transaction_id: u64, start_time: u64) -> Self {
        Self {
            transaction_id,
            start_time,
        }
    }
}

/// Visibility predicate of a snapshot read: a version is visible iff it was
/// committed before the snapshot started or belongs to the acting
/// transaction itself.
struct TransactionVersionOp;

/// Visibility predicate of committed-only scans (checkpoints, index builds):
/// insertions always count; a deletion counts unless it was committed before
/// the lowest active transaction.
struct CommittedVersionOp;

trait VersionOp {
    fn use_inserted_version(start_time: u64, transaction_id: u64, id: u64) -> bool;
    fn use_deleted_version(start_time: u64, transaction_id: u64, id: u64) -> bool;
}

impl VersionOp for TransactionVersionOp {
    fn use_inserted_version(start_time: u64, transaction_id: u64, id: u64) -> bool {
        id < start_time || id == transaction_id
    }

    fn use_deleted_version(start_time: u64, transaction_id: u64, id: u64) -> bool {
        !Self::use_inserted_version(start_time, transaction_id, id)
    }
}

impl VersionOp for CommittedVersionOp {
    fn use_inserted_version(_start_time: u64, _transaction_id: u64, _id: u64) -> bool {
        true
    }

    fn use_deleted_version(min_start_time: u64, _min_transaction_id: u64, id: u64) -> bool {
        (id >= min_start_time && id < TRANSACTION_ID_START) || id == NOT_DELETED_ID
    }
}

fn use_version(transaction: TransactionData, id: u64) -> bool {
    TransactionVersionOp::use_inserted_version(
        transaction.start_time,
        transaction.transaction_id,
        id,
    )
}

/// Visibility of one chunk, with the whole-chunk fast path.
pub enum ChunkInfo {
    Constant(ChunkConstantInfo),
    Vector(Box<ChunkVectorInfo>),
}

/// One `(insert_id, delete_id)` pair covering the whole chunk.
pub struct ChunkConstantInfo {
    pub start: u64,
    pub insert_id: u64,
    pub delete_id: u64,
}

impl ChunkConstantInfo {
    fn new(start: u64) -> Self {
        Self {
            start,
            insert_id: 0,
            delete_id: NOT_DELETED_ID,
        }
    }

    fn templated_sel_vector<OP: VersionOp>(
        &self,
        start_time: u64,
        transaction_id: u64,
        max_count: u64,
    ) -> u64 {
        if OP::use_inserted_version(start_time, transaction_id, self.insert_id)
            && OP::use_deleted_version(start_time, transaction_id, self.delete_id)
        {
            max_count
        } else {
            0
        }
    }

    fn fetch(&self, transaction: TransactionData) -> bool {
        use_version(transaction, self.insert_id) && !use_version(transaction, self.delete_id)
    }

    fn commit_append(&mut self, commit_id: u64, start: u64, end: u64) {
        debug_assert!(start == 0 && end == DEFAULT_VECTOR_CAPACITY as u64);
        self.insert_id = commit_id;
    }

    fn committed_deleted_count(&self, max_count: u64) -> u64 {
        if self.delete_id < TRANSACTION_ID_START {
            max_count
        } else {
            0
        }
    }

    fn cleanup(&self, lowest_transaction: u64) -> bool {
        self.delete_id == NOT_DELETED_ID && self.insert_id <= lowest_transaction
    }
}

/// Per-row insert and delete transaction ids for one chunk.
pub struct ChunkVectorInfo {
    pub start: u64,
    pub inserted: Vec<u64>,
    pub insert_id: u64,
    pub same_inserted_id: bool,
    pub deleted: Vec<u64>,
    pub any_deleted: bool,
}

impl ChunkVectorInfo {
    fn new(start: u64) -> Self {
        Self {
            start,
            inserted: vec![0; DEFAULT_VECTOR_CAPACITY],
            insert_id: 0,
            same_inserted_id: true,
            deleted: vec![NOT_DELETED_ID; DEFAULT_VECTOR_CAPACITY],
            any_deleted: false,
        }
    }

    fn templated_sel_vector<OP: VersionOp>(
        &self,
        start_time: u64,
        transaction_id: u64,
        sel: &mut SelVector,
        max_count: u64,
    ) -> u64 {
        let mut count = 0;
        if self.same_inserted_id && !self.any_deleted {
            if OP::use_inserted_version(start_time, transaction_id, self.insert_id) {
                return max_count;
            }
            return 0;
        } else if self.same_inserted_id {
            if !OP::use_inserted_version(start_time, transaction_id, self.insert_id) {
                return 0;
            }
            for i in 0..max_count {
                if OP::use_deleted_version(start_time, transaction_id, self.deleted[i as usize]) {
                    sel.set(count as usize, i as usize);
                    count += 1;
                }
            }
        } else if !self.any_deleted {
            for i in 0..max_count {
                if OP::use_inserted_version(start_time, transaction_id, self.inserted[i as usize]) {
                    sel.set(count as usize, i as usize);
                    count += 1;
                }
            }
        } else {
            for i in 0..max_count {
                if OP::use_inserted_version(start_time, transaction_id, self.inserted[i as usize])
                    && OP::use_deleted_version(
                        start_time,
                        transaction_id,
                        self.deleted[i as usize],
                    )
                {
                    sel.set(count as usize, i as usize);
                    count += 1;
                }
            }
        }
        count
    }

    fn fetch(&self, transaction: TransactionData, row: usize) -> bool {
        use_version(transaction, self.inserted[row])
            && !use_version(transaction, self.deleted[row])
    }

    /// Marks rows deleted by `transaction_id`, compacting the actually
    /// deleted offsets to the front of `rows`. Re-deleting a row this
    /// transaction already deleted is a tolerated no-op; any other overlap
    /// is a write-write conflict.
    fn delete_rows(
        &mut self,
        transaction_id: u64,
        rows: &mut [i64],
        count: u64,
    ) -> StorageResult<u64> {
        self.any_deleted = true;
        let mut deleted_tuples = 0usize;
        for i in 0..count as usize {
            let row = rows[i] as usize;
            if self.deleted[row] == transaction_id {
                continue;
            }
            if self.deleted[row] != NOT_DELETED_ID {
                return Err(StorageError::Conflict("Conflict on tuple deletion!"));
            }
            self.deleted[row] = transaction_id;
            rows[deleted_tuples] = rows[i];
            deleted_tuples += 1;
        }
        Ok(deleted_tuples as u64)
    }

    fn commit_delete(&mut self, commit_id: u64, rows: &[u16]) {
        for row in rows {
            self.deleted[*row as usize] = commit_id;
        }
    }

    fn append(&mut self, start: u64, end: u64, commit_id: u64) {
        if start == 0 {
            self.insert_id = commit_id;
        } else if self.insert_id != commit_id {
            self.same_inserted_id = false;
            self.insert_id = NOT_DELETED_ID;
        }
        for i in start..end {
            self.inserted[i as usize] = commit_id;
        }
    }

    fn commit_append(&mut self, commit_id: u64, start: u64, end: u64) {
        if self.same_inserted_id {
            self.insert_id = commit_id;
        }
        for i in start..end {
            self.inserted[i as usize] = commit_id;
        }
    }

    fn cleanup(&self, lowest_transaction: u64) -> bool {
        if self.any_deleted {
            return false;
        }
        if !self.same_inserted_id {
            self.inserted.iter().all(|id| *id <= lowest_transaction)
        } else {
            self.insert_id <= lowest_transaction
        }
    }

    fn committed_deleted_count(&self, max_count: u64) -> u64 {
        if !self.any_deleted {
            return 0;
        }
        self.deleted[..max_count as usize]
            .iter()
            .filter(|id| **id < TRANSACTION_ID_START)
            .count() as u64
    }
}

impl ChunkInfo {
    fn sel_vector(
        &self,
        transaction: TransactionData,
        sel: &mut SelVector,
        max_count: u64,
    ) -> u64 {
        match self {
            ChunkInfo::Constant(info) => info.templated_sel_vector::<TransactionVersionOp>(
                transaction.start_time,
                transaction.transaction_id,
                max_count,
            ),
            ChunkInfo::Vector(info) => info.templated_sel_vector::<TransactionVersionOp>(
                transaction.start_time,
                transaction.transaction_id,
                sel,
                max_count,
            ),
        }
    }

    fn committed_sel_vector(
        &self,
        min_start_id: u64,
        min_transaction_id: u64,
        sel: &mut SelVector,
        max_count: u64,
    ) -> u64 {
        match self {
            ChunkInfo::Constant(info) => info.templated_sel_vector::<CommittedVersionOp>(
                min_start_id,
                min_transaction_id,
                max_count,
            ),
            ChunkInfo::Vector(info) => info.templated_sel_vector::<CommittedVersionOp>(
                min_start_id,
                min_transaction_id,
                sel,
                max_count,
            ),
        }
    }

    fn fetch(&self, transaction: TransactionData, row: usize) -> bool {
        match self {
            ChunkInfo::Constant(info) => info.fetch(transaction),
            ChunkInfo::Vector(info) => info.fetch(transaction, row),
        }
    }

    fn commit_append(&mut self, commit_id: u64, start: u64, end: u64) {
        match self {
            ChunkInfo::Constant(info) => info.commit_append(commit_id, start, end),
            ChunkInfo::Vector(info) => info.commit_append(commit_id, start, end),
        }
    }

    fn committed_deleted_count(&self, max_count: u64) -> u64 {
        match self {
            ChunkInfo::Constant(info) => info.committed_deleted_count(max_count),
            ChunkInfo::Vector(info) => info.committed_deleted_count(max_count),
        }
    }

    fn has_deletes(&self) -> bool {
        match self {
            ChunkInfo::Constant(info) => {
                info.insert_id >= TRANSACTION_ID_START || info.delete_id < TRANSACTION_ID_START
            }
            ChunkInfo::Vector(info) => info.any_deleted,
        }
    }

    /// Whether the chunk's bookkeeping can be discarded once the lowest
    /// active transaction has advanced past every id recorded in it.
    fn cleanup(&self, lowest_transaction: u64) -> bool {
        match self {
            ChunkInfo::Constant(info) => info.cleanup(lowest_transaction),
            ChunkInfo::Vector(info) => info.cleanup(lowest_transaction),
        }
    }
}

struct VersionState {
    start: u64,
    info: Vec<Option<ChunkInfo>>,
    has_changes: bool,
}

/// The MVCC index of one row group: one [`ChunkInfo`] per vector chunk,
/// created lazily on the first append, delete or upgrade that touches it.
pub struct RowVersionManager {
    state: Mutex<VersionState>,
}

impl RowVersionManager {
    pub fn new(start: u64) -> Self {
        Self {
            state: Mutex::new(VersionState {
                start,
                info: vec![],
                has_changes: false,
            }),
        }
    }

    pub fn start(&self) -> u64 {
        self.state.lock().start
    }

    /// Re-anchors the manager (and every chunk) at a new global start row.
    pub fn set_start(&self, new_start: u64) {
        let mut state = self.state.lock();
        state.start = new_start;
        let mut current = new_start;
        for info in state.info.iter_mut().flatten() {
            match info {
                ChunkInfo::Constant(c) => c.start = current,
                ChunkInfo::Vector(v) => v.start = current,
            }
            current += DEFAULT_VECTOR_CAPACITY as u64;
        }
    }

    pub fn has_changes(&self) -> bool {
        self.state.lock().has_changes
    }

    /// Rows of `count` whose deletion has committed.
    pub fn committed_deleted_count(&self, count: u64) -> u64 {
        let state = self.state.lock();
        let cap = DEFAULT_VECTOR_CAPACITY as u64;
        let mut deleted = 0;
        let mut remaining = count;
        for (i, info) in state.info.iter().enumerate() {
            let offset = i as u64 * cap;
            if offset >= count {
                break;
            }
            let max_count = remaining.min(cap);
            if let Some(info) = info {
                deleted += info.committed_deleted_count(max_count);
            }
            remaining -= max_count;
        }
        deleted
    }

    /// Materializes the visible row offsets of one chunk for a snapshot
    /// read. No chunk info means the chunk is fully visible.
    pub fn sel_vector(
        &self,
        transaction: TransactionData,
        vector_idx: u64,
        sel: &mut SelVector,
        max_count: u64,
    ) -> u64 {
        let state = self.state.lock();
        match state.info.get(vector_idx as usize).and_then(|i| i.as_ref()) {
            None => max_count,
            Some(info) => info.sel_vector(transaction, sel, max_count),
        }
    }

    /// Committed-only variant, tested against the lowest-active-transaction
    /// watermark instead of an acting transaction.
    pub fn committed_sel_vector(
        &self,
        min_start_id: u64,
        min_transaction_id: u64,
        vector_idx: u64,
        sel: &mut SelVector,
        max_count: u64,
    ) -> u64 {
        let state = self.state.lock();
        match state.info.get(vector_idx as usize).and_then(|i| i.as_ref()) {
            None => max_count,
            Some(info) => info.committed_sel_vector(min_start_id, min_transaction_id, sel, max_count),
        }
    }

    /// Visibility of a single row-group-relative row.
    pub fn fetch(&self, transaction: TransactionData, row: u64) -> bool {
        let state = self.state.lock();
        let vector_idx = row / DEFAULT_VECTOR_CAPACITY as u64;
        match state.info.get(vector_idx as usize).and_then(|i| i.as_ref()) {
            None => true,
            Some(info) => info.fetch(
                transaction,
                (row - vector_idx * DEFAULT_VECTOR_CAPACITY as u64) as usize,
            ),
        }
    }

    /// Records `transaction` as the inserter of row-group-relative rows
    /// `[row_group_start, row_group_end)`. Chunks covered in full get the
    /// constant fast-path representation.
    pub fn append_version_info(
        &self,
        transaction: TransactionData,
        row_group_start: u64,
        row_group_end: u64,
    ) -> StorageResult<()> {
        let mut state = self.state.lock();
        state.has_changes = true;
        let cap = DEFAULT_VECTOR_CAPACITY as u64;
        let start_vector_idx = row_group_start / cap;
        let end_vector_idx = (row_group_end - 1) / cap;
        if state.info.len() <= end_vector_idx as usize {
            state.info.resize_with(end_vector_idx as usize + 1, || None);
        }
        let manager_start = state.start;

        for vector_idx in start_vector_idx..=end_vector_idx {
            let vector_start = if vector_idx == start_vector_idx {
                row_group_start - start_vector_idx * cap
            } else {
                0
            };
            let vector_end = if vector_idx == end_vector_idx {
                row_group_end - end_vector_idx * cap
            } else {
                cap
            };
            let chunk_start = manager_start + vector_idx * cap;
            let slot = &mut state.info[vector_idx as usize];
            if vector_start == 0 && vector_end == cap {
                let mut constant = ChunkConstantInfo::new(chunk_start);
                constant.insert_id = transaction.transaction_id;
                *slot = Some(ChunkInfo::Constant(constant));
            } else {
                let vector_info = match slot {
                    None => {
                        *slot = Some(ChunkInfo::Vector(Box::new(ChunkVectorInfo::new(
                            chunk_start,
                        ))));
                        match slot.as_mut().unwrap() {
                            ChunkInfo::Vector(v) => v,
                            _ => unreachable!(),
                        }
                    }
                    Some(ChunkInfo::Vector(v)) => v,
                    Some(ChunkInfo::Constant(_)) => {
                        return Err(StorageError::internal(
                            "expected per-row version info or none when appending partial chunks",
                        ));
                    }
                };
                vector_info.append(vector_start, vector_end, transaction.transaction_id);
            }
        }
        Ok(())
    }

    /// Rewrites the insert ids of `[row_group_start, row_group_start +
    /// count)` to the commit id.
    pub fn commit_append(&self, commit_id: u64, row_group_start: u64, count: u64) {
        if count == 0 {
            return;
        }
        let mut state = self.state.lock();
        let cap = DEFAULT_VECTOR_CAPACITY as u64;
        let row_group_end = row_group_start + count;
        let start_vector_idx = row_group_start / cap;
        let end_vector_idx = (row_group_end - 1) / cap;
        for vector_idx in start_vector_idx..=end_vector_idx {
            let vstart = if vector_idx == start_vector_idx {
                row_group_start - start_vector_idx * cap
            } else {
                0
            };
            let vend = if vector_idx == end_vector_idx {
                row_group_end - end_vector_idx * cap
            } else {
                cap
            };
            if let Some(info) = state.info.get_mut(vector_idx as usize).and_then(|i| i.as_mut())
            {
                info.commit_append(commit_id, vstart, vend);
            }
        }
    }

    /// Discards per-chunk bookkeeping for fully covered chunks whose every
    /// recorded id is below the lowest active transaction, reclaiming them
    /// to the "always visible" state.
    pub fn cleanup_append(
        &self,
        lowest_active_transaction: u64,
        row_group_start: u64,
        count: u64,
    ) {
        if count == 0 {
            return;
        }
        let mut state = self.state.lock();
        let cap = DEFAULT_VECTOR_CAPACITY as u64;
        let row_group_end = row_group_start + count;
        let start_vector_idx = row_group_start / cap;
        let end_vector_idx = (row_group_end - 1) / cap;
        for vector_idx in start_vector_idx..=end_vector_idx {
            let vcount = if vector_idx == end_vector_idx {
                row_group_end - end_vector_idx * cap
            } else {
                cap
            };
            if vcount != cap {
                continue;
            }
            let Some(slot) = state.info.get_mut(vector_idx as usize) else {
                continue;
            };
            if let Some(info) = slot {
                if info.cleanup(lowest_active_transaction) {
                    tracing::trace!(vector_idx, "reclaim chunk version info");
                    *slot = None;
                }
            }
        }
    }

    /// Drops version info for every chunk at or past `start_row`.
    pub fn revert_append(&self, start_row: u64) {
        let mut state = self.state.lock();
        let cap = DEFAULT_VECTOR_CAPACITY as u64;
        let start_vector_idx = (start_row + cap - 1) / cap;
        for slot in state.info.iter_mut().skip(start_vector_idx as usize) {
            *slot = None;
        }
    }

    /// Marks rows of one chunk deleted by `transaction_id`, compacting the
    /// deleted offsets to the front of `rows` and returning their number.
    pub fn delete_rows(
        &self,
        vector_idx: u64,
        transaction_id: u64,
        rows: &mut [i64],
        count: u64,
    ) -> StorageResult<u64> {
        let mut state = self.state.lock();
        state.has_changes = true;
        let vector_info = Self::vector_info(&mut state, vector_idx);
        vector_info.delete_rows(transaction_id, rows, count)
    }

    /// Rewrites the delete ids of the given chunk rows to the commit id.
    pub fn commit_delete(&self, vector_idx: u64, commit_id: u64, rows: &[u16]) {
        let mut state = self.state.lock();
        state.has_changes = true;
        Self::vector_info(&mut state, vector_idx).commit_delete(commit_id, rows);
    }

    pub fn has_deletes(&self) -> bool {
        let state = self.state.lock();
        state.info.iter().flatten().any(|info| info.has_deletes())
    }

    /// Upgrades (or creates) the chunk info to the per-row representation.
    fn vector_info<'a>(state: &'a mut VersionState, vector_idx: u64) -> &'a mut ChunkVectorInfo {
        let cap = DEFAULT_VECTOR_CAPACITY as u64;
        if state.info.len() <= vector_idx as usize {
            state.info.resize_with(vector_idx as usize + 1, || None);
        }
        let chunk_start = state.start + vector_idx * cap;
        let slot = &mut state.info[vector_idx as usize];
        match slot {
            None => {
                *slot = Some(ChunkInfo::Vector(Box::new(ChunkVectorInfo::new(
                    chunk_start,
                ))));
            }
            Some(ChunkInfo::Constant(constant)) => {
                // Upgrade: the constant insert id fans out to every row.
                let mut vector_info = ChunkVectorInfo::new(chunk_start);
                vector_info.insert_id = constant.insert_id;
                vector_info.inserted.fill(constant.insert_id);
                *slot = Some(ChunkInfo::Vector(Box::new(vector_info)));
            }
            Some(ChunkInfo::Vector(_)) => {}
        }
        match slot.as_mut().unwrap() {
            ChunkInfo::Vector(v) => v,
            _ => unreachable!(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAP: u64 = DEFAULT_VECTOR_CAPACITY as u64;
    const TXN: u64 = TRANSACTION_ID_START;

    fn sel() -> SelVector {
        SelVector::with_capacity(DEFAULT_VECTOR_CAPACITY)
    }

    #[test]
    fn own_uncommitted_inserts_are_visible() {
        let manager = RowVersionManager::new(0);
        manager
            .append_version_info(TransactionData::new(TXN, 10), 0, CAP)
            .unwrap();

        let mut s = sel();
        // The inserting transaction sees its own rows.
        let visible = manager.sel_vector(TransactionData::new(TXN, 10), 0, &mut s, CAP);
        assert_eq!(visible, CAP);
        // A snapshot started earlier by another transaction does not.
        let visible = manager.sel_vector(TransactionData::new(TXN + 1, 10), 0, &mut s, CAP);
        assert_eq!(visible, 0);
    }

    #[test]
    fn commit_append_publishes_rows() {
        let manager = RowVersionManager::new(0);
        manager
            .append_version_info(TransactionData::new(TXN, 10), 0, CAP)
            .unwrap();
        manager.commit_append(20, 0, CAP);

        let mut s = sel();
        // Snapshot started after the commit sees the rows.
        let visible = manager.sel_vector(TransactionData::new(TXN + 1, 21), 0, &mut s, CAP);
        assert_eq!(visible, CAP);
        // Snapshot started before the commit does not.
        let visible = manager.sel_vector(TransactionData::new(TXN + 1, 15), 0, &mut s, CAP);
        assert_eq!(visible, 0);
    }

    #[test]
    fn partial_chunk_uses_vector_info() {
        let manager = RowVersionManager::new(0);
        manager
            .append_version_info(TransactionData::new(TXN, 10), 0, 10)
            .unwrap();
        manager
            .append_version_info(TransactionData::new(TXN + 1, 12), 10, 20)
            .unwrap();
        let mut s = sel();
        let visible = manager.sel_vector(TransactionData::new(TXN, 10), 0, &mut s, 20);
        assert_eq!(visible, 10);
        for i in 0..10 {
            assert_eq!(s.get(i), i);
        }
    }

    #[test]
    fn delete_visibility_and_conflict() {
        let manager = RowVersionManager::new(0);
        manager
            .append_version_info(TransactionData::new(TXN, 10), 0, CAP)
            .unwrap();
        manager.commit_append(20, 0, CAP);

        assert!(!manager.has_deletes());
        let mut rows = [3i64, 5];
        let deleted = manager.delete_rows(0, TXN + 5, &mut rows, 2).unwrap();
        assert_eq!(deleted, 2);
        assert!(manager.has_deletes());
        assert!(manager.has_changes());

        // The deleting transaction no longer sees the rows.
        let mut s = sel();
        let visible = manager.sel_vector(TransactionData::new(TXN + 5, 30), 0, &mut s, CAP);
        assert_eq!(visible, CAP - 2);
        // Other snapshots still do while the delete is uncommitted.
        let visible = manager.sel_vector(TransactionData::new(TXN + 6, 30), 0, &mut s, CAP);
        assert_eq!(visible, CAP);

        // Re-delete by the same transaction is a no-op.
        let mut rows = [3i64];
        let deleted = manager.delete_rows(0, TXN + 5, &mut rows, 1).unwrap();
        assert_eq!(deleted, 0);

        // Delete by another transaction conflicts.
        let mut rows = [5i64];
        let err = manager.delete_rows(0, TXN + 6, &mut rows, 1).unwrap_err();
        assert_eq!(err, StorageError::Conflict("Conflict on tuple deletion!"));

        // After commit the rows disappear for later snapshots.
        manager.commit_delete(0, 40, &[3, 5]);
        let visible = manager.sel_vector(TransactionData::new(TXN + 7, 41), 0, &mut s, CAP);
        assert_eq!(visible, CAP - 2);
        assert_eq!(manager.committed_deleted_count(CAP), 2);
    }

    #[test]
    fn committed_scan_ignores_old_deletes() {
        let manager = RowVersionManager::new(0);
        manager
            .append_version_info(TransactionData::new(TXN, 10), 0, CAP)
            .unwrap();
        manager.commit_append(20, 0, CAP);
        let mut rows = [0i64];
        manager.delete_rows(0, TXN + 1, &mut rows, 1).unwrap();
        manager.commit_delete(0, 25, &[0]);

        let mut s = sel();
        // Watermark above the delete commit: the row is gone for good.
        let visible = manager.committed_sel_vector(30, 30, 0, &mut s, CAP);
        assert_eq!(visible, CAP - 1);
        // Watermark below the delete commit: the delete still counts as
        // potentially visible to some active transaction.
        let visible = manager.committed_sel_vector(20, 20, 0, &mut s, CAP);
        assert_eq!(visible, CAP);
    }

    #[test]
    fn cleanup_discards_settled_chunks() {
        let manager = RowVersionManager::new(0);
        manager
            .append_version_info(TransactionData::new(TXN, 10), 0, CAP)
            .unwrap();
        manager.commit_append(20, 0, CAP);
        manager.cleanup_append(25, 0, CAP);
        // Bookkeeping is gone; everything is visible to everyone.
        let mut s = sel();
        let visible = manager.sel_vector(TransactionData::new(TXN + 9, 1), 0, &mut s, CAP);
        assert_eq!(visible, CAP);
    }

    #[test]
    fn revert_append_drops_tail_chunks() {
        let manager = RowVersionManager::new(0);
        manager
            .append_version_info(TransactionData::new(TXN, 10), 0, 2 * CAP)
            .unwrap();
        manager.revert_append(CAP);
        let mut s = sel();
        // First chunk keeps its version info.
        let visible = manager.sel_vector(TransactionData::new(TXN + 1, 5), 0, &mut s, CAP);
        assert_eq!(visible, 0);
        // Second chunk was reverted and is "always visible" again.
        let visible = manager.sel_vector(TransactionData::new(TXN + 1, 5), 1, &mut s, CAP);
        assert_eq!(visible, CAP);
    }

    #[test]
    fn fetch_single_row() {
        let manager = RowVersionManager::new(0);
        manager
            .append_version_info(TransactionData::new(TXN, 10), 0, CAP)
            .unwrap();
        assert!(manager.fetch(TransactionData::new(TXN, 10), 5));
        assert!(!manager.fetch(TransactionData::new(TXN + 1, 5), 5));
    }

    #[test]
    fn set_start_reanchors_chunks() {
        let manager = RowVersionManager::new(0);
        manager
            .append_version_info(TransactionData::new(TXN, 10), 0, 2 * CAP)
            .unwrap();
        assert_eq!(manager.start(), 0);
        manager.set_start(4096);
        assert_eq!(manager.start(), 4096);
    }
}
