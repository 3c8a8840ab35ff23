// Copyright 2025 Mica Project Authors. Licensed under Apache-2.0.

//! A fixed-row-capacity horizontal slice of the table: one column data per
//! table column, all sharing the same start, plus a lazily-created row
//! version manager for MVCC.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::buffer::BufferManager;
use crate::types::{DataValue, LogicalType};
use crate::vector::{DataChunk, SelVector, Vector, VectorKind, DEFAULT_VECTOR_CAPACITY};

use super::{
    filter_sel, ColumnData, ColumnFetchState, CollectionScanState, FilterPropagateResult,
    RowVersionManager, SegmentNode, StorageError, StorageIndex, StorageResult, TableScanType,
    TransactionData, COLUMN_IDENTIFIER_ROW_ID,
};

pub struct RowGroup {
    start: AtomicU64,
    count: AtomicU64,
    index: AtomicU64,
    row_group_size: u64,
    buffer_manager: Arc<BufferManager>,
    columns: Vec<Arc<ColumnData>>,
    version_info: RwLock<Option<Arc<RowVersionManager>>>,
    allocation_size: AtomicUsize,
}

impl SegmentNode for RowGroup {
    fn start(&self) -> u64 {
        self.start.load(Ordering::Acquire)
    }

    fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    fn index(&self) -> u64 {
        self.index.load(Ordering::Relaxed)
    }

    fn set_index(&self, index: u64) {
        self.index.store(index, Ordering::Relaxed);
    }
}

impl RowGroup {
    /// An empty row group with one column per type.
    pub fn new(
        buffer_manager: Arc<BufferManager>,
        row_group_size: u64,
        start: u64,
        types: &[LogicalType],
    ) -> Self {
        let columns = types
            .iter()
            .enumerate()
            .map(|(i, ty)| {
                Arc::new(ColumnData::create(
                    buffer_manager.clone(),
                    i as u64,
                    start,
                    ty.clone(),
                ))
            })
            .collect();
        Self {
            start: AtomicU64::new(start),
            count: AtomicU64::new(0),
            index: AtomicU64::new(0),
            row_group_size,
            buffer_manager,
            columns,
            version_info: RwLock::new(None),
            allocation_size: AtomicUsize::new(0),
        }
    }

    /// A row group sharing existing column data, used by copy-on-write
    /// schema evolution.
    pub(crate) fn with_columns(
        buffer_manager: Arc<BufferManager>,
        row_group_size: u64,
        start: u64,
        count: u64,
        columns: Vec<Arc<ColumnData>>,
        version_info: Option<Arc<RowVersionManager>>,
    ) -> Self {
        Self {
            start: AtomicU64::new(start),
            count: AtomicU64::new(count),
            index: AtomicU64::new(0),
            row_group_size,
            buffer_manager,
            columns,
            version_info: RwLock::new(version_info),
            allocation_size: AtomicUsize::new(0),
        }
    }

    pub fn row_group_size(&self) -> u64 {
        self.row_group_size
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Arc<ColumnData>] {
        &self.columns
    }

    pub fn allocation_size(&self) -> usize {
        self.allocation_size.load(Ordering::Relaxed)
    }

    fn column(&self, index: &StorageIndex) -> StorageResult<&Arc<ColumnData>> {
        self.column_by_idx(index.primary_index())
    }

    fn column_by_idx(&self, idx: u64) -> StorageResult<&Arc<ColumnData>> {
        self.columns.get(idx as usize).ok_or_else(|| {
            StorageError::internal(format!("column index {idx} out of range"))
        })
    }

    // ===== version info =====

    pub fn version_info(&self) -> Option<Arc<RowVersionManager>> {
        self.version_info.read().clone()
    }

    pub fn get_or_create_version_info(&self) -> Arc<RowVersionManager> {
        if let Some(info) = self.version_info.read().clone() {
            return info;
        }
        let mut guard = self.version_info.write();
        guard
            .get_or_insert_with(|| Arc::new(RowVersionManager::new(self.start())))
            .clone()
    }

    fn sel_vector(
        &self,
        transaction: TransactionData,
        vector_idx: u64,
        sel: &mut SelVector,
        max_count: u64,
    ) -> u64 {
        match self.version_info() {
            None => max_count,
            Some(info) => info.sel_vector(transaction, vector_idx, sel, max_count),
        }
    }

    fn committed_sel_vector(
        &self,
        watermark: TransactionData,
        vector_idx: u64,
        sel: &mut SelVector,
        max_count: u64,
    ) -> u64 {
        match self.version_info() {
            None => max_count,
            Some(info) => info.committed_sel_vector(
                watermark.start_time,
                watermark.transaction_id,
                vector_idx,
                sel,
                max_count,
            ),
        }
    }

    // ===== scanning =====

    /// Positions `state` at the first batch of this row group; `false` if
    /// nothing of it lies below `state.max_row`.
    pub fn initialize_scan(
        self: &Arc<Self>,
        state: &mut CollectionScanState,
    ) -> StorageResult<bool> {
        self.initialize_scan_with_offset(state, 0)
    }

    /// As [`initialize_scan`](Self::initialize_scan), starting at batch
    /// `vector_offset`.
    pub fn initialize_scan_with_offset(
        self: &Arc<Self>,
        state: &mut CollectionScanState,
        vector_offset: u64,
    ) -> StorageResult<bool> {
        let start = self.start();
        state.row_group = Some(self.clone());
        state.vector_index = vector_offset;
        state.max_row_group_row = if start > state.max_row {
            0
        } else {
            self.count().min(state.max_row - start)
        };
        if state.max_row_group_row == 0 {
            return Ok(false);
        }
        // Zonemap verdicts are per row group; re-arm the filters.
        state.filters.check_all_filters();
        let row_number = start + vector_offset * DEFAULT_VECTOR_CAPACITY as u64;
        debug_assert!(!state.column_scans.is_empty());
        for i in 0..state.column_ids.len() {
            let column = state.column_ids[i].clone();
            if column.is_row_id_column() {
                state.column_scans[i].current = None;
                continue;
            }
            let column_data = self.column(&column)?;
            if vector_offset == 0 {
                column_data.initialize_scan(&mut state.column_scans[i]);
            } else {
                column_data
                    .initialize_scan_with_offset(&mut state.column_scans[i], row_number)?;
            }
        }
        Ok(true)
    }

    pub fn scan(
        self: &Arc<Self>,
        state: &mut CollectionScanState,
        result: &mut DataChunk,
    ) -> StorageResult<()> {
        self.scan_internal(state, result, TableScanType::Regular)
    }

    pub fn scan_committed(
        self: &Arc<Self>,
        state: &mut CollectionScanState,
        result: &mut DataChunk,
        scan_type: TableScanType,
    ) -> StorageResult<()> {
        self.scan_internal(state, result, scan_type)
    }

    /// Skips one whole batch, advancing every projected column cursor.
    pub fn next_vector(&self, state: &mut CollectionScanState) -> StorageResult<()> {
        state.vector_index += 1;
        for i in 0..state.column_ids.len() {
            let column = state.column_ids[i].clone();
            if column.is_row_id_column() {
                continue;
            }
            self.column(&column)?
                .skip(&mut state.column_scans[i], DEFAULT_VECTOR_CAPACITY as u64)?;
        }
        Ok(())
    }

    /// Zonemap pruning: when the first non-trivial filter is provably
    /// `ALWAYS_FALSE` over the current segment, the scan skips forward by
    /// whole batches. Returns `false` if batches were skipped and the caller
    /// should re-enter its loop.
    fn check_zonemap_segments(&self, state: &mut CollectionScanState) -> StorageResult<bool> {
        for filter_idx in 0..state.filters.filter_list().len() {
            let (always_true, scan_column_index, table_column_index) = {
                let entry = &state.filters.filter_list()[filter_idx];
                (
                    entry.always_true,
                    entry.scan_column_index,
                    entry.table_column_index,
                )
            };
            if always_true || table_column_index == COLUMN_IDENTIFIER_ROW_ID {
                continue;
            }
            let prune_result = {
                let entry = &state.filters.filter_list()[filter_idx];
                self.column_by_idx(table_column_index)?
                    .check_zonemap(&state.column_scans[scan_column_index as usize], &entry.filter)
            };
            let Some(current) = state.column_scans[scan_column_index as usize].current.clone()
            else {
                continue;
            };
            let segment_end = current.start() + current.count();
            if matches!(
                prune_result,
                FilterPropagateResult::AlwaysTrue | FilterPropagateResult::TrueOrNull
            ) {
                // The segment passes the filter in full; if it covers the
                // rest of this row group's scan range, the filter can be
                // disarmed until the next row group.
                let row_group_scan_end =
                    (self.start() + state.max_row_group_row).min(state.max_row);
                if segment_end >= row_group_scan_end {
                    state.filters.set_filter_always_true(filter_idx);
                }
                continue;
            }
            if prune_result != FilterPropagateResult::AlwaysFalse {
                continue;
            }
            let mut target_row = segment_end;
            if target_row >= state.max_row {
                target_row = state.max_row;
            }
            debug_assert!(target_row >= self.start());
            debug_assert!(target_row <= self.start() + self.count());
            let target_vector_index =
                (target_row - self.start()) / DEFAULT_VECTOR_CAPACITY as u64;
            if state.vector_index == target_vector_index {
                // The filter prunes the whole segment but we cannot skip
                // forward within the current batch.
                return Ok(true);
            }
            while state.vector_index < target_vector_index {
                self.next_vector(state)?;
            }
            return Ok(false);
        }
        Ok(true)
    }

    fn scan_internal(
        self: &Arc<Self>,
        state: &mut CollectionScanState,
        result: &mut DataChunk,
        scan_type: TableScanType,
    ) -> StorageResult<()> {
        let allow_updates = !matches!(
            scan_type,
            TableScanType::CommittedRowsDisallowUpdates
                | TableScanType::CommittedRowsOmitPermanentlyDeleted
        );
        let cap = DEFAULT_VECTOR_CAPACITY as u64;
        loop {
            if state.vector_index * cap >= state.max_row_group_row {
                return Ok(());
            }
            let current_row = state.vector_index * cap;
            let max_count = cap.min(state.max_row_group_row - current_row);

            if !self.check_zonemap_segments(state)? {
                continue;
            }

            let count = match scan_type {
                TableScanType::Regular => {
                    let count = self.sel_vector(
                        state.transaction,
                        state.vector_index,
                        &mut state.valid_sel,
                        max_count,
                    );
                    if count == 0 {
                        // Nothing in this batch is visible; skip it wholesale.
                        self.next_vector(state)?;
                        continue;
                    }
                    count
                }
                TableScanType::CommittedRowsOmitPermanentlyDeleted => {
                    let count = self.committed_sel_vector(
                        state.transaction,
                        state.vector_index,
                        &mut state.valid_sel,
                        max_count,
                    );
                    if count == 0 {
                        self.next_vector(state)?;
                        continue;
                    }
                    count
                }
                _ => max_count,
            };

            let has_filters = state.filters.has_filters();
            if count == max_count && !has_filters {
                // Fully visible batch and no filters: scan columns straight
                // into the result.
                for i in 0..state.column_ids.len() {
                    let column = state.column_ids[i].clone();
                    if column.is_row_id_column() {
                        result
                            .column_mut(i)
                            .sequence((self.start() + current_row) as i64, 1, count as usize);
                        continue;
                    }
                    let column_data = self.column(&column)?.clone();
                    if scan_type == TableScanType::Regular {
                        column_data.scan(
                            state.vector_index,
                            &mut state.column_scans[i],
                            result.column_mut(i),
                        )?;
                    } else {
                        column_data.scan_committed(
                            state.vector_index,
                            &mut state.column_scans[i],
                            result.column_mut(i),
                            allow_updates,
                        )?;
                    }
                }
                result.set_cardinality(count as usize);
            } else {
                let mut approved_tuple_count = count as usize;
                let mut sel = if count != max_count {
                    state.valid_sel.clone()
                } else {
                    let mut identity = SelVector::with_capacity(DEFAULT_VECTOR_CAPACITY);
                    for i in 0..max_count as usize {
                        identity.set(i, i);
                    }
                    identity
                };

                let filter_state = state.filters.begin_filter();
                if has_filters {
                    debug_assert!(allow_updates);
                    for i in 0..state.filters.filter_list().len() {
                        let filter_idx = state.filters.permutation(i);
                        let (always_true, scan_idx, column_idx) = {
                            let filter = &state.filters.filter_list()[filter_idx];
                            (
                                filter.always_true,
                                filter.scan_column_index as usize,
                                filter.table_column_index,
                            )
                        };
                        if always_true {
                            continue;
                        }
                        if column_idx == COLUMN_IDENTIFIER_ROW_ID {
                            // Materialize row ids at the selected offsets and
                            // filter on them like any other column.
                            let base = (self.start() + current_row) as i64;
                            let vector = result.column_mut(scan_idx);
                            vector.set_kind(VectorKind::Flat);
                            for k in 0..approved_tuple_count {
                                let idx = sel.get(k);
                                vector.data_mut::<i64>()[idx] = base + idx as i64;
                            }
                            let filter = &state.filters.filter_list()[filter_idx].filter;
                            filter_sel(
                                result.column(scan_idx),
                                max_count as usize,
                                filter,
                                &mut sel,
                                &mut approved_tuple_count,
                            )?;
                        } else {
                            let column_data = self.column_by_idx(column_idx)?.clone();
                            let filter = &state.filters.filter_list()[filter_idx].filter;
                            column_data.filter(
                                state.vector_index,
                                &mut state.column_scans[scan_idx],
                                result.column_mut(scan_idx),
                                &mut sel,
                                &mut approved_tuple_count,
                                filter,
                            )?;
                        }
                    }
                    for filter_idx in 0..state.filters.filter_list().len() {
                        let (always_true, scan_idx) = {
                            let filter = &state.filters.filter_list()[filter_idx];
                            (filter.always_true, filter.scan_column_index as usize)
                        };
                        if always_true {
                            continue;
                        }
                        result
                            .column_mut(scan_idx)
                            .slice(&sel, approved_tuple_count);
                    }
                }

                if approved_tuple_count == 0 {
                    debug_assert!(has_filters);
                    result.reset();
                    for i in 0..state.column_ids.len() {
                        let column = state.column_ids[i].clone();
                        if column.is_row_id_column() {
                            continue;
                        }
                        if has_filters && state.filters.column_has_filters(i) {
                            continue;
                        }
                        self.column(&column)?
                            .skip(&mut state.column_scans[i], cap)?;
                    }
                    state.vector_index += 1;
                    continue;
                }

                for i in 0..state.column_ids.len() {
                    if has_filters && state.filters.column_has_filters(i) {
                        continue;
                    }
                    let column = state.column_ids[i].clone();
                    if column.is_row_id_column() {
                        let base = (self.start() + current_row) as i64;
                        let vector = result.column_mut(i);
                        vector.set_kind(VectorKind::Flat);
                        for k in 0..approved_tuple_count {
                            vector.data_mut::<i64>()[k] = base + sel.get(k) as i64;
                        }
                        continue;
                    }
                    let column_data = self.column(&column)?.clone();
                    if scan_type == TableScanType::Regular {
                        column_data.select(
                            state.vector_index,
                            &mut state.column_scans[i],
                            result.column_mut(i),
                            &sel,
                            approved_tuple_count,
                        )?;
                    } else {
                        column_data.select_committed(
                            state.vector_index,
                            &mut state.column_scans[i],
                            result.column_mut(i),
                            &sel,
                            approved_tuple_count,
                            allow_updates,
                        )?;
                    }
                }
                state.filters.end_filter(filter_state);

                debug_assert!(approved_tuple_count > 0);
                result.set_cardinality(approved_tuple_count);
            }
            state.vector_index += 1;
            return Ok(());
        }
    }

    // ===== point lookups =====

    /// Fetches one row into `result[result_idx]`, one fetch state per
    /// projected column.
    pub fn fetch_row(
        &self,
        states: &mut [ColumnFetchState],
        column_ids: &[StorageIndex],
        row_id: i64,
        result: &mut DataChunk,
        result_idx: usize,
    ) -> StorageResult<()> {
        debug_assert_eq!(states.len(), column_ids.len());
        for (col_idx, column) in column_ids.iter().enumerate() {
            if column.is_row_id_column() {
                let vector = result.column_mut(col_idx);
                vector.set_kind(VectorKind::Flat);
                vector.data_mut::<i64>()[result_idx] = row_id;
                vector.validity_mut().set_valid(result_idx);
                continue;
            }
            let column_data = self.column(column)?.clone();
            column_data.fetch_row(
                &mut states[col_idx],
                row_id,
                result.column_mut(col_idx),
                result_idx,
            )?;
        }
        Ok(())
    }

    // ===== appending =====

    pub fn initialize_append(
        self: &Arc<Self>,
        state: &mut RowGroupAppendState,
    ) -> StorageResult<()> {
        state.row_group = Some(self.clone());
        state.offset_in_row_group = self.count();
        state.states.clear();
        for column in &self.columns {
            let mut column_state = super::ColumnAppendState::default();
            column.initialize_append(&mut column_state)?;
            state.states.push(column_state);
        }
        Ok(())
    }

    /// Appends `append_count` rows of `chunk` starting at `offset`.
    pub fn append(
        &self,
        state: &mut RowGroupAppendState,
        chunk: &DataChunk,
        offset: usize,
        append_count: usize,
    ) -> StorageResult<()> {
        debug_assert_eq!(chunk.column_count(), self.columns.len());
        for (i, column) in self.columns.iter().enumerate() {
            let previous_allocation = column.allocation_size();
            let vector = chunk.column(i);
            if offset > 0 {
                let mut flat = vector.clone();
                flat.flatten(offset + append_count);
                let window = flat.window(offset, append_count);
                column.append(&mut state.states[i], &window, append_count)?;
            } else {
                column.append(&mut state.states[i], vector, append_count)?;
            }
            self.allocation_size.fetch_add(
                column.allocation_size() - previous_allocation,
                Ordering::Relaxed,
            );
        }
        state.offset_in_row_group += append_count as u64;
        Ok(())
    }

    /// Publishes `count` freshly appended rows under the appending
    /// transaction's id and grows the row group.
    pub fn append_version_info(
        &self,
        transaction: TransactionData,
        count: u64,
    ) -> StorageResult<()> {
        let row_group_start = self.count();
        let mut row_group_end = row_group_start + count;
        if row_group_end > self.row_group_size {
            row_group_end = self.row_group_size;
        }
        self.get_or_create_version_info().append_version_info(
            transaction,
            row_group_start,
            row_group_end,
        )?;
        self.count.store(row_group_end, Ordering::Release);
        Ok(())
    }

    pub fn commit_append(&self, commit_id: u64, row_group_start: u64, count: u64) {
        if let Some(info) = self.version_info() {
            info.commit_append(commit_id, row_group_start, count);
        }
    }

    pub fn cleanup_append(&self, lowest_active_transaction: u64, row_group_start: u64, count: u64) {
        if let Some(info) = self.version_info() {
            info.cleanup_append(lowest_active_transaction, row_group_start, count);
        }
    }

    /// Truncates the row group back to global row `start_row`.
    pub fn revert_append(&self, start_row: u64) -> StorageResult<()> {
        if let Some(info) = self.version_info() {
            info.revert_append(start_row - self.start());
        }
        for column in &self.columns {
            column.revert_append(start_row)?;
        }
        self.count
            .store(start_row - self.start(), Ordering::Release);
        Ok(())
    }

    // ===== deletes =====

    /// Marks `ids` (global row ids within this row group) deleted by
    /// `transaction_id`, returning how many rows were newly deleted.
    pub fn delete_rows(&self, transaction_id: u64, ids: &[i64]) -> StorageResult<u64> {
        let cap = DEFAULT_VECTOR_CAPACITY as u64;
        let start = self.start();
        let mut delete_count = 0;
        let mut current_chunk: Option<u64> = None;
        let mut rows: Vec<i64> = Vec::with_capacity(DEFAULT_VECTOR_CAPACITY);
        let version_info = self.get_or_create_version_info();

        let mut flush =
            |chunk: Option<u64>, rows: &mut Vec<i64>| -> StorageResult<u64> {
                if rows.is_empty() {
                    return Ok(0);
                }
                let chunk = chunk.expect("delete rows without a chunk");
                let count = rows.len() as u64;
                let deleted = version_info.delete_rows(chunk, transaction_id, rows, count)?;
                rows.clear();
                Ok(deleted)
            };

        for id in ids {
            debug_assert!(*id >= 0);
            let row = *id as u64;
            debug_assert!(row >= start && row < start + self.count());
            let relative = row - start;
            let vector_idx = relative / cap;
            if current_chunk != Some(vector_idx) {
                delete_count += flush(current_chunk, &mut rows)?;
                current_chunk = Some(vector_idx);
            }
            rows.push((relative - vector_idx * cap) as i64);
        }
        delete_count += flush(current_chunk, &mut rows)?;
        debug!(delete_count, "row group delete");
        Ok(delete_count)
    }

    /// Rewrites the delete ids of previously deleted rows to a commit id.
    pub fn commit_delete(&self, commit_id: u64, ids: &[i64]) -> StorageResult<()> {
        let cap = DEFAULT_VECTOR_CAPACITY as u64;
        let start = self.start();
        let version_info = self.get_or_create_version_info();
        let mut current_chunk: Option<u64> = None;
        let mut rows: Vec<u16> = vec![];
        for id in ids {
            let relative = *id as u64 - start;
            let vector_idx = relative / cap;
            if current_chunk != Some(vector_idx) {
                if let Some(chunk) = current_chunk {
                    version_info.commit_delete(chunk, commit_id, &rows);
                    rows.clear();
                }
                current_chunk = Some(vector_idx);
            }
            rows.push((relative - vector_idx * cap) as u16);
        }
        if let Some(chunk) = current_chunk {
            version_info.commit_delete(chunk, commit_id, &rows);
        }
        Ok(())
    }

    /// Rows whose insertion is in and whose deletion (if any) has not
    /// committed.
    pub fn committed_row_count(&self) -> u64 {
        let count = self.count();
        match self.version_info() {
            None => count,
            Some(info) => count - info.committed_deleted_count(count),
        }
    }

    // ===== updates =====

    /// Applies `updates` to the rows `ids[offset..offset + count]`, one
    /// update chunk per touched column.
    pub fn update(
        &self,
        updates: &DataChunk,
        ids: &[i64],
        offset: usize,
        count: usize,
        column_ids: &[u64],
    ) -> StorageResult<()> {
        for (i, column) in column_ids.iter().enumerate() {
            debug_assert_ne!(*column, COLUMN_IDENTIFIER_ROW_ID);
            let column_data = self.column_by_idx(*column)?;
            debug_assert_eq!(column_data.ty(), updates.column(i).ty());
            if offset > 0 {
                let mut flat = updates.column(i).clone();
                flat.flatten(offset + count);
                let window = flat.window(offset, count);
                column_data.update(*column, &window, &ids[offset..offset + count])?;
            } else {
                column_data.update(*column, updates.column(i), &ids[..count])?;
            }
        }
        Ok(())
    }

    /// Routes a single-column update through a dotted path for nested
    /// columns.
    pub fn update_column(
        &self,
        updates: &DataChunk,
        row_ids: &[i64],
        column_path: &[u64],
    ) -> StorageResult<()> {
        debug_assert_eq!(updates.column_count(), 1);
        let primary_column_idx = column_path[0];
        debug_assert_ne!(primary_column_idx, COLUMN_IDENTIFIER_ROW_ID);
        let column_data = self.column_by_idx(primary_column_idx)?;
        column_data.update_column(column_path, updates.column(0), row_ids, 1)
    }

    // ===== schema evolution =====

    /// Builds a sibling row group with one extra column filled with
    /// `default_value`, sharing every existing column unmodified.
    pub fn add_column(
        &self,
        row_group_size: u64,
        ty: LogicalType,
        default_value: &DataValue,
    ) -> StorageResult<RowGroup> {
        let added = ColumnData::create(
            self.buffer_manager.clone(),
            self.columns.len() as u64,
            self.start(),
            ty.clone(),
        );
        let rows_to_write = self.count();
        if rows_to_write > 0 {
            let mut state = super::ColumnAppendState::default();
            added.initialize_append(&mut state)?;
            let mut vector = Vector::new(ty);
            vector.reference(default_value);
            let mut remaining = rows_to_write;
            while remaining > 0 {
                let rows = remaining.min(DEFAULT_VECTOR_CAPACITY as u64);
                added.append(&mut state, &vector, rows as usize)?;
                remaining -= rows;
            }
        }
        let mut columns = self.columns.clone();
        columns.push(Arc::new(added));
        Ok(RowGroup::with_columns(
            self.buffer_manager.clone(),
            row_group_size,
            self.start(),
            self.count(),
            columns,
            Some(self.get_or_create_version_info()),
        ))
    }

    /// Builds a sibling row group without `removed_column`, sharing every
    /// other column unmodified.
    pub fn remove_column(
        &self,
        row_group_size: u64,
        removed_column: usize,
    ) -> StorageResult<RowGroup> {
        debug_assert!(removed_column < self.columns.len());
        let columns = self
            .columns
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != removed_column)
            .map(|(_, c)| c.clone())
            .collect();
        Ok(RowGroup::with_columns(
            self.buffer_manager.clone(),
            row_group_size,
            self.start(),
            self.count(),
            columns,
            Some(self.get_or_create_version_info()),
        ))
    }

    /// Re-anchors the row group (and its columns and version info) at a new
    /// global start, when its storage merges into another collection.
    pub fn move_to(&self, new_start: u64) -> StorageResult<()> {
        self.start.store(new_start, Ordering::Release);
        for column in &self.columns {
            column.set_start(new_start)?;
        }
        if let Some(info) = self.version_info() {
            info.set_start(new_start);
        }
        Ok(())
    }

    pub fn column_segment_info(
        &self,
        row_group_index: u64,
        result: &mut Vec<super::ColumnSegmentInfo>,
    ) {
        for (col_idx, column) in self.columns.iter().enumerate() {
            column.column_segment_info(row_group_index, vec![col_idx as u64], result);
        }
    }

    /// Folds every column's outstanding updates into the committed state.
    pub fn commit_updates(&self) -> StorageResult<()> {
        for column in &self.columns {
            column.commit_updates()?;
        }
        Ok(())
    }

    /// Discards every column's outstanding updates.
    pub fn rollback_updates(&self) -> StorageResult<()> {
        for column in &self.columns {
            column.rollback_updates()?;
        }
        Ok(())
    }
}

/// Append cursor of one row group.
#[derive(Default)]
pub struct RowGroupAppendState {
    pub row_group: Option<Arc<RowGroup>>,
    pub states: Vec<super::ColumnAppendState>,
    pub offset_in_row_group: u64,
}
