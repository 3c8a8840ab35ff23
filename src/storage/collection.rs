// Copyright 2025 Mica Project Authors. Licensed under Apache-2.0.

//! The full row storage of one table: an ordered segment tree of row
//! groups, an atomic row count, and the append / merge / delete / update
//! entry points.
//!
//! Schema evolution is copy-on-write: `add_column`/`remove_column` build a
//! sibling collection whose row groups share every unmodified column with
//! the original, and the original stops being the root of its table — any
//! further write against it is an error.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use crate::buffer::BufferManager;
use crate::types::{DataValue, LogicalType};
use crate::vector::{DataChunk, DEFAULT_VECTOR_CAPACITY};

use super::{
    ColumnFetchState, ColumnSegmentInfo, CollectionScanState, RowGroup, RowGroupAppendState,
    SegmentNode, SegmentTree, SegmentTreeGuard, StorageError, StorageIndex, StorageOptions,
    StorageResult, TableFilterSet, TableScanType, TransactionData, MAX_ROW_ID,
};

/// Definition of a column added through schema evolution.
#[derive(Clone, Debug)]
pub struct ColumnDefinition {
    pub name: String,
    pub ty: LogicalType,
    pub default_value: DataValue,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, ty: LogicalType) -> Self {
        Self {
            name: name.into(),
            ty,
            default_value: DataValue::Null,
        }
    }

    pub fn with_default(mut self, value: DataValue) -> Self {
        self.default_value = value;
        self
    }
}

/// Append state of one batched table append. Holds the collection's append
/// lock for its whole lifetime.
pub struct TableAppendState<'a> {
    _append_guard: MutexGuard<'a, ()>,
    pub transaction: TransactionData,
    pub row_start: u64,
    pub current_row: u64,
    pub total_append_count: u64,
    pub start_row_group: Option<Arc<RowGroup>>,
    pub append_state: RowGroupAppendState,
}

pub struct Collection {
    buffer_manager: Arc<BufferManager>,
    row_group_size: u64,
    total_rows: AtomicU64,
    types: Vec<LogicalType>,
    row_start: u64,
    row_groups: Arc<SegmentTree<RowGroup>>,
    allocation_size: AtomicUsize,
    append_lock: Mutex<()>,
    /// Cleared when schema evolution produces a successor collection.
    is_root: AtomicBool,
}

impl Collection {
    pub fn new(
        buffer_manager: Arc<BufferManager>,
        types: Vec<LogicalType>,
        row_start: u64,
        total_rows: u64,
        options: &StorageOptions,
    ) -> StorageResult<Arc<Self>> {
        options.validate()?;
        debug_assert!(row_start < MAX_ROW_ID);
        Ok(Arc::new(Self {
            buffer_manager,
            row_group_size: options.row_group_size,
            total_rows: AtomicU64::new(total_rows),
            types,
            row_start,
            row_groups: Arc::new(SegmentTree::new()),
            allocation_size: AtomicUsize::new(0),
            append_lock: Mutex::new(()),
            is_root: AtomicBool::new(true),
        }))
    }

    pub fn types(&self) -> &[LogicalType] {
        &self.types
    }

    pub fn total_rows(&self) -> u64 {
        self.total_rows.load(Ordering::Acquire)
    }

    pub fn row_start(&self) -> u64 {
        self.row_start
    }

    pub fn row_group_size(&self) -> u64 {
        self.row_group_size
    }

    pub fn allocation_size(&self) -> usize {
        self.allocation_size.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.row_groups.is_empty()
    }

    pub fn is_root(&self) -> bool {
        self.is_root.load(Ordering::Acquire)
    }

    pub fn row_group(&self, index: i64) -> Option<Arc<RowGroup>> {
        self.row_groups.segment_at(index)
    }

    pub fn row_group_count(&self) -> usize {
        self.row_groups.segment_count()
    }

    fn ensure_root(&self) -> StorageResult<()> {
        if !self.is_root() {
            return Err(StorageError::invalid_state(
                "collection was superseded by schema evolution and no longer accepts writes",
            ));
        }
        Ok(())
    }

    fn append_row_group(
        &self,
        guard: &mut SegmentTreeGuard<'_, RowGroup>,
        start_row: u64,
    ) {
        debug_assert!(start_row >= self.row_start);
        let row_group = RowGroup::new(
            self.buffer_manager.clone(),
            self.row_group_size,
            start_row,
            &self.types,
        );
        debug!(start_row, "allocate row group");
        guard.append_segment(Arc::new(row_group));
    }

    // ===== scanning =====

    /// Positions `state` for a scan of `column_ids` over all committed-or-
    /// own-visible rows.
    pub fn initialize_scan(
        &self,
        state: &mut CollectionScanState,
        column_ids: Vec<StorageIndex>,
        table_filters: Option<&TableFilterSet>,
    ) -> StorageResult<()> {
        state.column_ids = column_ids;
        if let Some(filters) = table_filters {
            state.filters = super::ScanFilterInfo::initialize(filters, &state.column_ids);
        }
        state.row_groups = Some(self.row_groups.clone());
        state.max_row = self.row_start + self.total_rows();
        state.initialize(&self.types);
        let mut row_group = self.row_groups.root_segment();
        while let Some(current) = row_group {
            if current.initialize_scan(state)? {
                break;
            }
            row_group = self.row_groups.next_segment(&current);
            if row_group.is_none() {
                state.row_group = None;
            }
        }
        Ok(())
    }

    /// Positions `state` on the batch containing `start_row`, bounding the
    /// scan at `end_row`.
    pub fn initialize_scan_with_offset(
        &self,
        state: &mut CollectionScanState,
        column_ids: Vec<StorageIndex>,
        start_row: u64,
        end_row: u64,
    ) -> StorageResult<()> {
        state.column_ids = column_ids;
        state.row_groups = Some(self.row_groups.clone());
        state.max_row = end_row;
        state.initialize(&self.types);
        let row_group = self.row_groups.get_segment(start_row)?;
        let start_vector = (start_row - row_group.start()) / DEFAULT_VECTOR_CAPACITY as u64;
        if !row_group.initialize_scan_with_offset(state, start_vector)? {
            return Err(StorageError::internal(
                "failed to initialize row group scan with offset",
            ));
        }
        Ok(())
    }

    /// Scans `column_ids` with the given snapshot, invoking `fun` per batch.
    /// Stops early (returning `false`) when `fun` returns `false`.
    pub fn scan(
        &self,
        transaction: TransactionData,
        column_ids: &[StorageIndex],
        table_filters: Option<&TableFilterSet>,
        mut fun: impl FnMut(&DataChunk) -> bool,
    ) -> StorageResult<bool> {
        let scan_types: Vec<LogicalType> = column_ids
            .iter()
            .map(|c| {
                if c.is_row_id_column() {
                    LogicalType::BigInt
                } else {
                    self.types[c.primary_index() as usize].clone()
                }
            })
            .collect();
        let mut chunk = DataChunk::new(&scan_types);
        let mut state = CollectionScanState::new(transaction);
        self.initialize_scan(&mut state, column_ids.to_vec(), table_filters)?;
        loop {
            chunk.reset();
            state.scan(&mut chunk)?;
            if chunk.size() == 0 {
                return Ok(true);
            }
            if !fun(&chunk) {
                return Ok(false);
            }
        }
    }

    /// Scans every column with the given snapshot.
    pub fn scan_all(
        &self,
        transaction: TransactionData,
        fun: impl FnMut(&DataChunk) -> bool,
    ) -> StorageResult<bool> {
        let column_ids: Vec<StorageIndex> = (0..self.types.len())
            .map(|i| StorageIndex::new(i as u64))
            .collect();
        self.scan(transaction, &column_ids, None, fun)
    }

    /// Committed-only scan against a lowest-active-transaction watermark,
    /// for checkpoint and index-build style readers.
    pub fn scan_committed(
        &self,
        watermark: u64,
        column_ids: &[StorageIndex],
        scan_type: TableScanType,
        mut fun: impl FnMut(&DataChunk) -> bool,
    ) -> StorageResult<bool> {
        let scan_types: Vec<LogicalType> = column_ids
            .iter()
            .map(|c| self.types[c.primary_index() as usize].clone())
            .collect();
        let mut chunk = DataChunk::new(&scan_types);
        let mut state = CollectionScanState::new(TransactionData::new(watermark, watermark));
        self.initialize_scan(&mut state, column_ids.to_vec(), None)?;
        loop {
            chunk.reset();
            state.scan_committed(&mut chunk, scan_type)?;
            if chunk.size() == 0 {
                return Ok(true);
            }
            if !fun(&chunk) {
                return Ok(false);
            }
        }
    }

    /// Point-fetches `row_ids` into `result`, skipping ids that fall
    /// outside the collection.
    pub fn fetch(
        &self,
        result: &mut DataChunk,
        column_ids: &[StorageIndex],
        row_ids: &[i64],
    ) -> StorageResult<()> {
        let mut states: Vec<ColumnFetchState> = column_ids
            .iter()
            .map(|_| ColumnFetchState::default())
            .collect();
        let mut count = 0;
        for row_id in row_ids {
            let row_group = {
                let mut guard = self.row_groups.lock();
                match guard.try_segment_index(*row_id as u64)? {
                    None => continue,
                    Some(index) => guard
                        .segment_at(index as i64)
                        .expect("segment index out of sync"),
                }
            };
            row_group.fetch_row(&mut states, column_ids, *row_id, result, count)?;
            count += 1;
        }
        result.set_cardinality(count);
        Ok(())
    }

    // ===== appending =====

    /// Starts a batched append under `transaction`, taking the append lock.
    pub fn initialize_append(
        &self,
        transaction: TransactionData,
    ) -> StorageResult<TableAppendState<'_>> {
        self.ensure_root()?;
        let guard = self.append_lock.lock();
        let row_start = self.row_start + self.total_rows();
        let mut state = TableAppendState {
            _append_guard: guard,
            transaction,
            row_start,
            current_row: row_start,
            total_append_count: 0,
            start_row_group: None,
            append_state: RowGroupAppendState::default(),
        };
        {
            let mut tree = self.row_groups.lock();
            if tree.is_empty() {
                self.append_row_group(&mut tree, self.row_start);
            }
            let last = tree
                .last_segment()
                .expect("append without a row group");
            drop(tree);
            debug_assert_eq!(
                self.row_start + self.total_rows(),
                last.start() + last.count()
            );
            last.initialize_append(&mut state.append_state)?;
            state.start_row_group = Some(last);
        }
        Ok(state)
    }

    /// Appends one chunk, growing the last row group until it reaches the
    /// configured capacity and then allocating new ones. Returns whether a
    /// new row group was created.
    pub fn append(
        &self,
        chunk: &DataChunk,
        state: &mut TableAppendState<'_>,
    ) -> StorageResult<bool> {
        debug_assert_eq!(chunk.column_count(), self.types.len());
        let mut new_row_group = false;
        let total_append_count = chunk.size();
        let mut remaining = chunk.size();
        let mut offset = 0usize;
        state.total_append_count += total_append_count as u64;
        loop {
            let current_row_group = state
                .append_state
                .row_group
                .clone()
                .ok_or_else(|| StorageError::internal("append without a positioned row group"))?;
            let append_count = remaining
                .min((self.row_group_size - state.append_state.offset_in_row_group) as usize);
            if append_count > 0 {
                let previous_allocation = current_row_group.allocation_size();
                current_row_group.append(&mut state.append_state, chunk, offset, append_count)?;
                self.allocation_size.fetch_add(
                    current_row_group.allocation_size() - previous_allocation,
                    Ordering::Relaxed,
                );
            }
            remaining -= append_count;
            if remaining == 0 {
                break;
            }
            offset += append_count;
            new_row_group = true;
            let next_start = current_row_group.start() + state.append_state.offset_in_row_group;
            let mut tree = self.row_groups.lock();
            self.append_row_group(&mut tree, next_start);
            let last = tree.last_segment().expect("fresh row group vanished");
            drop(tree);
            last.initialize_append(&mut state.append_state)?;
        }
        state.current_row += total_append_count as u64;
        Ok(new_row_group)
    }

    /// Publishes the appended rows to the version managers and the total
    /// row count.
    pub fn finalize_append(&self, state: &mut TableAppendState<'_>) -> StorageResult<()> {
        let mut remaining = state.total_append_count;
        let mut row_group = state.start_row_group.clone();
        while remaining > 0 {
            let current = row_group
                .ok_or_else(|| StorageError::internal("finalize_append ran out of row groups"))?;
            let append_count = remaining.min(self.row_group_size - current.count());
            current.append_version_info(state.transaction, append_count)?;
            remaining -= append_count;
            row_group = self.row_groups.next_segment(&current);
        }
        self.total_rows
            .fetch_add(state.total_append_count, Ordering::AcqRel);
        state.total_append_count = 0;
        state.start_row_group = None;
        Ok(())
    }

    /// Rewrites the insert ids of `[row_start, row_start + count)` to
    /// `commit_id`.
    pub fn commit_append(&self, commit_id: u64, row_start: u64, count: u64) -> StorageResult<()> {
        self.for_row_range(row_start, count, |row_group, relative_start, n| {
            row_group.commit_append(commit_id, relative_start, n);
            Ok(())
        })
    }

    /// Reclaims version bookkeeping of `[row_start, row_start + count)`
    /// once `lowest_active_transaction` has advanced past it.
    pub fn cleanup_append(
        &self,
        lowest_active_transaction: u64,
        row_start: u64,
        count: u64,
    ) -> StorageResult<()> {
        self.for_row_range(row_start, count, |row_group, relative_start, n| {
            row_group.cleanup_append(lowest_active_transaction, relative_start, n);
            Ok(())
        })
    }

    fn for_row_range(
        &self,
        row_start: u64,
        count: u64,
        mut f: impl FnMut(&Arc<RowGroup>, u64, u64) -> StorageResult<()>,
    ) -> StorageResult<()> {
        if count == 0 {
            return Ok(());
        }
        let end = row_start + count;
        let mut row = row_start;
        while row < end {
            let row_group = self.row_groups.get_segment(row)?;
            let relative_start = row - row_group.start();
            let n = (end - row).min(row_group.count() - relative_start);
            f(&row_group, relative_start, n)?;
            row += n;
        }
        Ok(())
    }

    /// Truncates the collection back to global row `start_row`, undoing an
    /// uncommitted append.
    pub fn revert_append(&self, start_row: u64) -> StorageResult<()> {
        let _guard = self.append_lock.lock();
        if start_row == self.row_start + self.total_rows() {
            return Ok(());
        }
        let row_group = {
            let mut tree = self.row_groups.lock();
            let index = tree.segment_index(start_row)?;
            tree.erase_after(index);
            tree.segment_at(index as i64)
                .expect("revert target row group vanished")
        };
        row_group.revert_append(start_row)?;
        self.total_rows
            .store(start_row - self.row_start, Ordering::Release);
        Ok(())
    }

    /// Detaches `other`'s row groups and re-anchors them into this
    /// collection's row-id space (merging transaction-local inserts into the
    /// shared table). `other` is left empty.
    pub fn merge_storage(&self, other: &Collection) -> StorageResult<()> {
        self.ensure_root()?;
        if other.types != self.types {
            return Err(StorageError::invalid_state(
                "cannot merge collections with different schemas",
            ));
        }
        let start_index = self.row_start + self.total_rows();
        let mut index = start_index;
        let segments = other.row_groups.lock().move_segments();
        let merged_rows: u64 = segments.iter().map(|s| s.node.count()).sum();
        for entry in segments {
            let row_group = entry.node;
            row_group.move_to(index)?;
            index += row_group.count();
            self.row_groups.append_segment(row_group);
        }
        self.total_rows.fetch_add(merged_rows, Ordering::AcqRel);
        other.total_rows.store(0, Ordering::Release);
        debug!(merged_rows, "merge storage");
        Ok(())
    }

    // ===== deletes =====

    /// Marks `ids` deleted by `transaction_id`. Ids must be grouped by row
    /// group (ascending ids always are).
    pub fn delete_rows(&self, transaction_id: u64, ids: &[i64]) -> StorageResult<u64> {
        self.ensure_root()?;
        if ids.is_empty() {
            return Ok(0);
        }
        let mut delete_count = 0;
        let mut pos = 0;
        while pos < ids.len() {
            let start = pos;
            let row_group = self.row_groups.get_segment(ids[start] as u64)?;
            let rg_start = row_group.start();
            let rg_end = rg_start + row_group.count();
            pos += 1;
            while pos < ids.len() {
                debug_assert!(ids[pos] >= 0);
                let row = ids[pos] as u64;
                if row < rg_start || row >= rg_end {
                    break;
                }
                pos += 1;
            }
            delete_count += row_group.delete_rows(transaction_id, &ids[start..pos])?;
        }
        Ok(delete_count)
    }

    /// Rewrites the delete ids of previously deleted rows to `commit_id`.
    pub fn commit_delete(&self, commit_id: u64, ids: &[i64]) -> StorageResult<()> {
        let mut pos = 0;
        while pos < ids.len() {
            let start = pos;
            let row_group = self.row_groups.get_segment(ids[start] as u64)?;
            let rg_start = row_group.start();
            let rg_end = rg_start + row_group.count();
            pos += 1;
            while pos < ids.len() && (ids[pos] as u64) >= rg_start && (ids[pos] as u64) < rg_end {
                pos += 1;
            }
            row_group.commit_delete(commit_id, &ids[start..pos])?;
        }
        Ok(())
    }

    // ===== updates =====

    /// Applies `updates` to the rows in `ids` for `column_ids`. Ids must be
    /// grouped per vector chunk (ascending ids always are).
    pub fn update(
        &self,
        ids: &[i64],
        column_ids: &[u64],
        updates: &DataChunk,
    ) -> StorageResult<()> {
        self.ensure_root()?;
        if updates.size() == 0 {
            return Ok(());
        }
        let cap = DEFAULT_VECTOR_CAPACITY as u64;
        let mut pos = 0;
        while pos < updates.size() {
            let start = pos;
            let row_group = self.row_groups.get_segment(ids[pos] as u64)?;
            let base_id =
                row_group.start() + (ids[pos] as u64 - row_group.start()) / cap * cap;
            let max_id = (base_id + cap).min(row_group.start() + row_group.count());
            pos += 1;
            while pos < updates.size() {
                debug_assert!(ids[pos] >= 0);
                let row = ids[pos] as u64;
                if row < base_id || row >= max_id {
                    break;
                }
                pos += 1;
            }
            row_group.update(updates, ids, start, pos - start, column_ids)?;
        }
        Ok(())
    }

    /// Routes a nested-column update through a dotted path. Transaction-
    /// local rows cannot be updated this way.
    pub fn update_column(
        &self,
        row_ids: &[i64],
        column_path: &[u64],
        updates: &DataChunk,
    ) -> StorageResult<()> {
        self.ensure_root()?;
        let first_id = row_ids
            .first()
            .copied()
            .ok_or_else(|| StorageError::invalid_state("update_column with no row ids"))?;
        if first_id as u64 >= MAX_ROW_ID {
            return Err(StorageError::invalid_state(
                "cannot update a column path on transaction-local data",
            ));
        }
        let row_group = self.row_groups.get_segment(first_id as u64)?;
        row_group.update_column(updates, row_ids, column_path)
    }

    /// Folds every outstanding update into the committed state.
    pub fn commit_updates(&self) -> StorageResult<()> {
        for row_group in self.row_groups.segments() {
            row_group.commit_updates()?;
        }
        Ok(())
    }

    /// Discards every outstanding update.
    pub fn rollback_updates(&self) -> StorageResult<()> {
        for row_group in self.row_groups.segments() {
            row_group.rollback_updates()?;
        }
        Ok(())
    }

    // ===== schema evolution =====

    /// Builds a sibling collection with one added column. Unmodified column
    /// data is shared, not copied; this collection stops accepting writes.
    pub fn add_column(&self, new_column: ColumnDefinition) -> StorageResult<Arc<Collection>> {
        self.ensure_root()?;
        let mut new_types = self.types.clone();
        new_types.push(new_column.ty.clone());
        let options = StorageOptions {
            block_size: self.buffer_manager.block_size(),
            row_group_size: self.row_group_size,
        };
        let result = Collection::new(
            self.buffer_manager.clone(),
            new_types,
            self.row_start,
            self.total_rows(),
            &options,
        )?;
        for row_group in self.row_groups.segments() {
            let new_row_group = row_group.add_column(
                self.row_group_size,
                new_column.ty.clone(),
                &new_column.default_value,
            )?;
            result.row_groups.append_segment(Arc::new(new_row_group));
        }
        self.is_root.store(false, Ordering::Release);
        Ok(result)
    }

    /// Builds a sibling collection without column `col_idx`. Remaining
    /// column data is shared, not copied; this collection stops accepting
    /// writes.
    pub fn remove_column(&self, col_idx: usize) -> StorageResult<Arc<Collection>> {
        self.ensure_root()?;
        if col_idx >= self.types.len() {
            return Err(StorageError::invalid_state(format!(
                "cannot remove column {col_idx} from a table with {} columns",
                self.types.len()
            )));
        }
        let mut new_types = self.types.clone();
        new_types.remove(col_idx);
        let options = StorageOptions {
            block_size: self.buffer_manager.block_size(),
            row_group_size: self.row_group_size,
        };
        let result = Collection::new(
            self.buffer_manager.clone(),
            new_types,
            self.row_start,
            self.total_rows(),
            &options,
        )?;
        for row_group in self.row_groups.segments() {
            let new_row_group = row_group.remove_column(self.row_group_size, col_idx)?;
            result.row_groups.append_segment(Arc::new(new_row_group));
        }
        self.is_root.store(false, Ordering::Release);
        Ok(result)
    }

    // ===== introspection =====

    pub fn column_segment_info(&self) -> Vec<ColumnSegmentInfo> {
        let mut result = vec![];
        for row_group in self.row_groups.segments() {
            row_group.column_segment_info(row_group.index(), &mut result);
        }
        result
    }
}
