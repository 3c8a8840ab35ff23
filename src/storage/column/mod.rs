// Copyright 2025 Mica Project Authors. Licensed under Apache-2.0.

//! Per-column storage: a segment tree of column segments plus an optional
//! update chain, with one variant per physical shape.
//!
//! The variants form a closed enum rather than a class hierarchy: `Validity`
//! is the universal null-bitmap leaf, `Standard` composes a value column
//! with a validity column, and `Struct`/`List`/`Array` add child columns.

mod nested;
mod state;

pub use self::state::*;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use itertools::Itertools;
use parking_lot::RwLock;

use crate::buffer::BufferManager;
use crate::types::{LogicalType, PhysicalType};
use crate::vector::{SelVector, Vector, VectorKind, DEFAULT_VECTOR_CAPACITY};

use super::{
    check_zonemap_comparison, filter_sel, ColumnSegment, FilterPropagateResult, SegmentNode,
    SegmentTree, SegmentTreeGuard, StorageError, StorageResult, TableFilter, UpdateSegment,
    MAX_ROW_ID,
};

/// How a batch will be scanned out of the segment data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanVectorType {
    /// The batch is served from one segment with no update overlay.
    ScanEntireVector,
    /// The batch crosses segments or carries updates; the result must be a
    /// flat vector.
    ScanFlatVector,
}

/// Committed-only scans distinguish whether committed update overlays may be
/// applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ColumnScanMode {
    Regular,
    Committed { allow_updates: bool },
}

/// Type-specific shape of a column.
pub enum ColumnVariant {
    Standard {
        validity: Box<ColumnData>,
    },
    Validity,
    Struct {
        children: Vec<ColumnData>,
        validity: Box<ColumnData>,
    },
    List {
        child: Box<ColumnData>,
        validity: Box<ColumnData>,
    },
    Array {
        child: Box<ColumnData>,
        validity: Box<ColumnData>,
        array_size: usize,
    },
}

/// Introspection record describing one column segment.
#[derive(Clone, Debug)]
pub struct ColumnSegmentInfo {
    pub row_group_index: u64,
    pub column_id: u64,
    pub column_path: String,
    pub segment_idx: u64,
    pub segment_start: u64,
    pub segment_count: u64,
    pub has_updates: bool,
}

/// The storage of one column within one row group.
pub struct ColumnData {
    column_index: u64,
    ty: LogicalType,
    start: AtomicU64,
    count: AtomicU64,
    buffer_manager: Arc<BufferManager>,
    pub(crate) data: SegmentTree<ColumnSegment>,
    updates: RwLock<Option<UpdateSegment>>,
    allocation_size: AtomicUsize,
    pub(crate) variant: ColumnVariant,
}

impl ColumnData {
    pub fn create(
        buffer_manager: Arc<BufferManager>,
        column_index: u64,
        start_row: u64,
        ty: LogicalType,
    ) -> Self {
        let variant = match ty.physical_type() {
            PhysicalType::Bit => ColumnVariant::Validity,
            PhysicalType::Struct => {
                let children = ty
                    .struct_fields()
                    .iter()
                    .enumerate()
                    .map(|(i, field)| {
                        ColumnData::create(
                            buffer_manager.clone(),
                            i as u64 + 1,
                            start_row,
                            field.ty.clone(),
                        )
                    })
                    .collect();
                ColumnVariant::Struct {
                    children,
                    validity: Box::new(ColumnData::create(
                        buffer_manager.clone(),
                        0,
                        start_row,
                        LogicalType::Validity,
                    )),
                }
            }
            PhysicalType::List => ColumnVariant::List {
                child: Box::new(ColumnData::create(
                    buffer_manager.clone(),
                    1,
                    start_row,
                    ty.child_type().clone(),
                )),
                validity: Box::new(ColumnData::create(
                    buffer_manager.clone(),
                    0,
                    start_row,
                    LogicalType::Validity,
                )),
            },
            PhysicalType::Array => ColumnVariant::Array {
                child: Box::new(ColumnData::create(
                    buffer_manager.clone(),
                    1,
                    start_row,
                    ty.child_type().clone(),
                )),
                validity: Box::new(ColumnData::create(
                    buffer_manager.clone(),
                    0,
                    start_row,
                    LogicalType::Validity,
                )),
                array_size: ty.array_size(),
            },
            _ => ColumnVariant::Standard {
                validity: Box::new(ColumnData::create(
                    buffer_manager.clone(),
                    0,
                    start_row,
                    LogicalType::Validity,
                )),
            },
        };
        Self {
            column_index,
            ty,
            start: AtomicU64::new(start_row),
            count: AtomicU64::new(0),
            buffer_manager,
            data: SegmentTree::new(),
            updates: RwLock::new(None),
            allocation_size: AtomicUsize::new(0),
            variant,
        }
    }

    pub fn ty(&self) -> &LogicalType {
        &self.ty
    }

    pub fn column_index(&self) -> u64 {
        self.column_index
    }

    pub fn start(&self) -> u64 {
        self.start.load(Ordering::Acquire)
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    /// Number of addressable entries. Struct columns delegate to their first
    /// child, which owns the actual value segments.
    pub fn max_entry(&self) -> u64 {
        match &self.variant {
            ColumnVariant::Struct { children, .. } => children[0].max_entry(),
            _ => self.count(),
        }
    }

    pub fn allocation_size(&self) -> usize {
        self.allocation_size.load(Ordering::Relaxed)
    }

    pub(crate) fn add_count(&self, delta: u64) {
        self.count.fetch_add(delta, Ordering::AcqRel);
    }

    pub(crate) fn store_count(&self, value: u64) {
        self.count.store(value, Ordering::Release);
    }

    pub fn has_updates(&self) -> bool {
        self.updates.read().is_some()
    }

    /// Re-anchors the column (and all segments and children) at a new
    /// global start row.
    pub fn set_start(&self, new_start: u64) -> StorageResult<()> {
        self.start.store(new_start, Ordering::Release);
        let mut offset = 0;
        for segment in self.data.segments() {
            segment.set_start(new_start + offset);
            offset += segment.count();
        }
        self.data.lock().reinitialize()?;
        match &self.variant {
            ColumnVariant::Standard { validity } => validity.set_start(new_start)?,
            ColumnVariant::Validity => {}
            ColumnVariant::Struct { children, validity } => {
                for child in children {
                    child.set_start(new_start)?;
                }
                validity.set_start(new_start)?;
            }
            ColumnVariant::List { child, validity }
            | ColumnVariant::Array { child, validity, .. } => {
                child.set_start(new_start)?;
                validity.set_start(new_start)?;
            }
        }
        Ok(())
    }

    pub(crate) fn vector_count(&self, vector_index: u64) -> usize {
        let current_row = vector_index * DEFAULT_VECTOR_CAPACITY as u64;
        (self.count() - current_row).min(DEFAULT_VECTOR_CAPACITY as u64) as usize
    }

    // ===== scan initialization =====

    /// Positions the cursor on the first segment.
    pub fn initialize_scan(&self, state: &mut ColumnScanState) {
        match &self.variant {
            ColumnVariant::Standard { validity } => {
                self.initialize_scan_base(state);
                validity.initialize_scan(&mut state.child_states[0]);
            }
            ColumnVariant::Validity => self.initialize_scan_base(state),
            ColumnVariant::Struct { children, validity } => {
                state.row_index = 0;
                state.current = None;
                validity.initialize_scan(&mut state.child_states[0]);
                for (i, child) in children.iter().enumerate() {
                    if state.scan_child_column.get(i).copied().unwrap_or(true) {
                        child.initialize_scan(&mut state.child_states[i + 1]);
                    }
                }
            }
            ColumnVariant::List { child, validity } => {
                self.initialize_scan_base(state);
                validity.initialize_scan(&mut state.child_states[0]);
                child.initialize_scan(&mut state.child_states[1]);
                state.last_offset = 0;
            }
            ColumnVariant::Array { child, validity, .. } => {
                state.row_index = 0;
                state.current = None;
                validity.initialize_scan(&mut state.child_states[0]);
                child.initialize_scan(&mut state.child_states[1]);
            }
        }
    }

    fn initialize_scan_base(&self, state: &mut ColumnScanState) {
        state.current = self.data.root_segment();
        state.row_index = state.current.as_ref().map(|s| s.start()).unwrap_or(0);
        state.internal_index = state.row_index;
        state.initialized = false;
        state.scan_state = None;
        state.last_offset = 0;
    }

    /// Positions the cursor on the segment containing `row_idx`.
    pub fn initialize_scan_with_offset(
        &self,
        state: &mut ColumnScanState,
        row_idx: u64,
    ) -> StorageResult<()> {
        match &self.variant {
            ColumnVariant::Standard { validity } => {
                self.initialize_scan_with_offset_base(state, row_idx)?;
                validity.initialize_scan_with_offset(&mut state.child_states[0], row_idx)
            }
            ColumnVariant::Validity => self.initialize_scan_with_offset_base(state, row_idx),
            ColumnVariant::Struct { children, validity } => {
                state.row_index = row_idx;
                state.current = None;
                validity.initialize_scan_with_offset(&mut state.child_states[0], row_idx)?;
                for (i, child) in children.iter().enumerate() {
                    if state.scan_child_column.get(i).copied().unwrap_or(true) {
                        child
                            .initialize_scan_with_offset(&mut state.child_states[i + 1], row_idx)?;
                    }
                }
                Ok(())
            }
            ColumnVariant::List { .. } => self.list_initialize_scan_with_offset(state, row_idx),
            ColumnVariant::Array { .. } => self.array_initialize_scan_with_offset(state, row_idx),
        }
    }

    fn initialize_scan_with_offset_base(
        &self,
        state: &mut ColumnScanState,
        row_idx: u64,
    ) -> StorageResult<()> {
        let segment = self.data.get_segment(row_idx)?;
        state.row_index = row_idx;
        state.internal_index = segment.start();
        state.current = Some(segment);
        state.initialized = false;
        state.scan_state = None;
        state.last_offset = 0;
        Ok(())
    }

    // ===== scanning =====

    /// Scans up to one full batch for chunk `vector_index` into `result`,
    /// applying pending updates.
    pub fn scan(
        &self,
        vector_index: u64,
        state: &mut ColumnScanState,
        result: &mut Vector,
    ) -> StorageResult<usize> {
        let target = self.vector_count(vector_index);
        self.scan_mode(vector_index, state, result, target, ColumnScanMode::Regular)
    }

    /// As [`scan`](Self::scan) with an explicit row target.
    pub fn scan_with_count(
        &self,
        vector_index: u64,
        state: &mut ColumnScanState,
        result: &mut Vector,
        count: usize,
    ) -> StorageResult<usize> {
        self.scan_mode(vector_index, state, result, count, ColumnScanMode::Regular)
    }

    /// Scans committed-only data. With `allow_updates` set, committed update
    /// overlays apply; without it, any outstanding uncommitted update is an
    /// error.
    pub fn scan_committed(
        &self,
        vector_index: u64,
        state: &mut ColumnScanState,
        result: &mut Vector,
        allow_updates: bool,
    ) -> StorageResult<usize> {
        let target = self.vector_count(vector_index);
        self.scan_mode(
            vector_index,
            state,
            result,
            target,
            ColumnScanMode::Committed { allow_updates },
        )
    }

    pub(crate) fn scan_mode(
        &self,
        vector_index: u64,
        state: &mut ColumnScanState,
        result: &mut Vector,
        count: usize,
        mode: ColumnScanMode,
    ) -> StorageResult<usize> {
        match &self.variant {
            ColumnVariant::Validity => {
                self.scan_vector_with_updates(vector_index, state, result, count, mode)
            }
            ColumnVariant::Standard { validity } => {
                debug_assert_eq!(state.row_index, state.child_states[0].row_index);
                let scan_count =
                    self.scan_vector_with_updates(vector_index, state, result, count, mode)?;
                validity.scan_mode(
                    vector_index,
                    &mut state.child_states[0],
                    result,
                    count,
                    mode,
                )?;
                Ok(scan_count)
            }
            ColumnVariant::Struct { .. } => {
                self.struct_scan(vector_index, state, result, count, mode)
            }
            ColumnVariant::List { .. } => self.list_scan_count(state, result, count),
            ColumnVariant::Array { .. } => self.array_scan_count(state, result, count),
        }
    }

    /// Scans `count` rows at the cursor without update handling; the path
    /// list and array children ride on.
    pub fn scan_count(
        &self,
        state: &mut ColumnScanState,
        result: &mut Vector,
        count: usize,
    ) -> StorageResult<usize> {
        if count == 0 {
            return Ok(0);
        }
        match &self.variant {
            ColumnVariant::Validity => {
                debug_assert!(!self.has_updates());
                self.scan_vector(state, result, count, ScanVectorType::ScanFlatVector)
            }
            ColumnVariant::Standard { validity } => {
                debug_assert!(!self.has_updates());
                let scan_count =
                    self.scan_vector(state, result, count, ScanVectorType::ScanFlatVector)?;
                validity.scan_count(&mut state.child_states[0], result, count)?;
                Ok(scan_count)
            }
            ColumnVariant::Struct { .. } => self.struct_scan_count(state, result, count),
            ColumnVariant::List { .. } => self.list_scan_count(state, result, count),
            ColumnVariant::Array { .. } => self.array_scan_count(state, result, count),
        }
    }

    /// Scans `count` committed rows starting at an absolute row-group
    /// offset, applying committed update overlays only.
    pub fn scan_committed_range(
        &self,
        row_group_start: u64,
        offset_in_row_group: u64,
        count: u64,
        result: &mut Vector,
    ) -> StorageResult<usize> {
        let mut state = ColumnScanState::default();
        state.initialize(&self.ty, &[]);
        self.initialize_scan_with_offset(&mut state, row_group_start + offset_in_row_group)?;
        let scan_count =
            self.scan_vector(&mut state, result, count as usize, ScanVectorType::ScanFlatVector)?;
        let updates = self.updates.read();
        if let Some(segment) = &*updates {
            debug_assert_eq!(result.kind(), VectorKind::Flat);
            result.flatten(scan_count);
            segment.fetch_committed_range(offset_in_row_group, count, result)?;
        }
        Ok(scan_count)
    }

    /// Advances the scan cursor by `count` rows without producing output.
    pub fn skip(&self, state: &mut ColumnScanState, count: u64) -> StorageResult<()> {
        match &self.variant {
            ColumnVariant::Standard { .. } | ColumnVariant::Validity => {
                state.next(count);
                Ok(())
            }
            ColumnVariant::Struct { .. } => self.struct_skip(state, count),
            ColumnVariant::List { .. } => self.list_skip(state, count),
            ColumnVariant::Array { .. } => self.array_skip(state, count),
        }
    }

    /// Scans then compacts through a selection.
    pub fn select(
        &self,
        vector_index: u64,
        state: &mut ColumnScanState,
        result: &mut Vector,
        sel: &SelVector,
        approved_count: usize,
    ) -> StorageResult<()> {
        self.scan(vector_index, state, result)?;
        result.slice(sel, approved_count);
        Ok(())
    }

    pub fn select_committed(
        &self,
        vector_index: u64,
        state: &mut ColumnScanState,
        result: &mut Vector,
        sel: &SelVector,
        approved_count: usize,
        allow_updates: bool,
    ) -> StorageResult<()> {
        self.scan_committed(vector_index, state, result, allow_updates)?;
        result.slice(sel, approved_count);
        Ok(())
    }

    /// Scans, then prunes the selection through `filter`.
    pub fn filter(
        &self,
        vector_index: u64,
        state: &mut ColumnScanState,
        result: &mut Vector,
        sel: &mut SelVector,
        approved_count: &mut usize,
        filter: &TableFilter,
    ) -> StorageResult<()> {
        let scan_count = self.scan(vector_index, state, result)?;
        filter_sel(result, scan_count, filter, sel, approved_count)
    }

    /// Scans a column that had no filter of its own, compacting to the rows
    /// approved so far.
    pub fn filter_scan(
        &self,
        vector_index: u64,
        state: &mut ColumnScanState,
        result: &mut Vector,
        sel: &SelVector,
        approved_count: usize,
    ) -> StorageResult<()> {
        self.scan(vector_index, state, result)?;
        result.slice(sel, approved_count);
        Ok(())
    }

    /// Probes the filter against the current segment's zonemap. Only
    /// standard columns carry statistics; everything else cannot prune.
    pub fn check_zonemap(
        &self,
        state: &ColumnScanState,
        filter: &TableFilter,
    ) -> FilterPropagateResult {
        match &self.variant {
            ColumnVariant::Standard { .. } => {
                let Some(current) = &state.current else {
                    return FilterPropagateResult::NoPruningPossible;
                };
                let Some((min, max)) = current.zonemap() else {
                    return FilterPropagateResult::NoPruningPossible;
                };
                check_zonemap_comparison(filter, &min, &max)
            }
            _ => FilterPropagateResult::NoPruningPossible,
        }
    }

    fn get_vector_scan_type(
        &self,
        state: &ColumnScanState,
        scan_count: usize,
        result: &Vector,
    ) -> ScanVectorType {
        if result.kind() != VectorKind::Flat {
            return ScanVectorType::ScanEntireVector;
        }
        if self.has_updates() {
            return ScanVectorType::ScanFlatVector;
        }
        let Some(current) = &state.current else {
            return ScanVectorType::ScanFlatVector;
        };
        let remaining_in_segment = current.start() + current.count() - state.row_index;
        if (remaining_in_segment as usize) < scan_count {
            return ScanVectorType::ScanFlatVector;
        }
        ScanVectorType::ScanEntireVector
    }

    fn scan_vector_with_updates(
        &self,
        vector_index: u64,
        state: &mut ColumnScanState,
        result: &mut Vector,
        target_scan: usize,
        mode: ColumnScanMode,
    ) -> StorageResult<usize> {
        let scan_type = self.get_vector_scan_type(state, target_scan, result);
        let scan_count = self.scan_vector(state, result, target_scan, scan_type)?;
        if scan_type != ScanVectorType::ScanEntireVector {
            let (committed, allow_updates) = match mode {
                ColumnScanMode::Regular => (false, true),
                ColumnScanMode::Committed { allow_updates } => (true, allow_updates),
            };
            self.fetch_updates(vector_index, result, scan_count, allow_updates, committed)?;
        }
        Ok(scan_count)
    }

    /// The segment-walking scan loop: copies `remaining` rows beginning at
    /// `state.row_index`, crossing segment boundaries as needed.
    pub(crate) fn scan_vector(
        &self,
        state: &mut ColumnScanState,
        result: &mut Vector,
        mut remaining: usize,
        scan_type: ScanVectorType,
    ) -> StorageResult<usize> {
        if scan_type == ScanVectorType::ScanFlatVector && result.kind() != VectorKind::Flat {
            return Err(StorageError::invalid_state(
                "scan_vector called for a flat scan but the result is not a flat vector",
            ));
        }
        if !state.initialized {
            let current = state
                .current
                .clone()
                .ok_or_else(|| StorageError::internal("scan on an unpositioned column cursor"))?;
            current.initialize_scan(state);
            state.internal_index = current.start();
            state.initialized = true;
        }
        debug_assert!(state.internal_index <= state.row_index);
        if state.internal_index < state.row_index {
            if let Some(current) = state.current.clone() {
                current.skip(state);
            }
        }

        let initial_remaining = remaining;
        loop {
            let current = state
                .current
                .clone()
                .ok_or_else(|| StorageError::internal("scan lost its current segment"))?;
            debug_assert!(
                state.row_index >= current.start()
                    && state.row_index <= current.start() + current.count()
            );
            debug_assert_eq!(current.ty(), &self.ty);
            let scan_count =
                remaining.min((current.start() + current.count() - state.row_index) as usize);
            let result_offset = initial_remaining - remaining;
            if scan_count > 0 {
                current.scan(&*state, scan_count, result, result_offset)?;
                state.row_index += scan_count as u64;
                remaining -= scan_count;
            }
            if remaining == 0 {
                break;
            }
            let Some(next) = self.data.next_segment(&current) else {
                break;
            };
            next.initialize_scan(state);
            state.current = Some(next);
        }
        state.internal_index = state.row_index;
        Ok(initial_remaining - remaining)
    }

    fn fetch_updates(
        &self,
        vector_index: u64,
        result: &mut Vector,
        scan_count: usize,
        allow_updates: bool,
        scan_committed: bool,
    ) -> StorageResult<()> {
        let updates = self.updates.read();
        let Some(segment) = &*updates else {
            return Ok(());
        };
        if !allow_updates && segment.has_uncommitted_updates(vector_index)? {
            return Err(StorageError::invalid_state(
                "cannot scan committed data with outstanding uncommitted updates",
            ));
        }
        result.flatten(scan_count);
        if scan_committed {
            segment.fetch_committed(vector_index, result)
        } else {
            segment.fetch_updates(vector_index, result)
        }
    }

    // ===== appending =====

    pub fn initialize_append(&self, state: &mut ColumnAppendState) -> StorageResult<()> {
        match &self.variant {
            ColumnVariant::Standard { validity } => {
                self.initialize_append_base(state)?;
                let mut child_append = ColumnAppendState::default();
                validity.initialize_append(&mut child_append)?;
                state.child_appends.push(child_append);
                Ok(())
            }
            ColumnVariant::Validity => self.initialize_append_base(state),
            ColumnVariant::Struct { children, validity } => {
                let mut validity_append = ColumnAppendState::default();
                validity.initialize_append(&mut validity_append)?;
                state.child_appends.push(validity_append);
                for child in children {
                    let mut child_append = ColumnAppendState::default();
                    child.initialize_append(&mut child_append)?;
                    state.child_appends.push(child_append);
                }
                Ok(())
            }
            ColumnVariant::List { child, validity } => {
                self.initialize_append_base(state)?;
                let mut validity_append = ColumnAppendState::default();
                validity.initialize_append(&mut validity_append)?;
                state.child_appends.push(validity_append);
                let mut child_append = ColumnAppendState::default();
                child.initialize_append(&mut child_append)?;
                state.child_appends.push(child_append);
                Ok(())
            }
            ColumnVariant::Array { child, validity, .. } => {
                let mut validity_append = ColumnAppendState::default();
                validity.initialize_append(&mut validity_append)?;
                state.child_appends.push(validity_append);
                let mut child_append = ColumnAppendState::default();
                child.initialize_append(&mut child_append)?;
                state.child_appends.push(child_append);
                Ok(())
            }
        }
    }

    pub(crate) fn initialize_append_base(
        &self,
        state: &mut ColumnAppendState,
    ) -> StorageResult<()> {
        let mut guard = self.data.lock();
        if guard.is_empty() {
            self.append_transient_segment(&mut guard, self.start());
        }
        let segment = guard
            .last_segment()
            .ok_or_else(|| StorageError::internal("append into a column with no segments"))?;
        drop(guard);
        segment.initialize_append(state);
        state.current = Some(segment);
        Ok(())
    }

    /// Appends a vector, flattening non-flat input first.
    pub fn append(
        &self,
        state: &mut ColumnAppendState,
        vector: &Vector,
        count: usize,
    ) -> StorageResult<()> {
        match &self.variant {
            ColumnVariant::Struct { .. } => return self.struct_append(state, vector, count),
            ColumnVariant::List { .. } => return self.list_append(state, vector, count),
            ColumnVariant::Array { .. } => return self.array_append(state, vector, count),
            _ => {}
        }
        if vector.kind() != VectorKind::Flat {
            let mut flat = vector.clone();
            flat.flatten(count);
            return self.append(state, &flat, count);
        }
        let uvf = vector.to_unified(count);
        self.append_data(state, &uvf, 0, count)
    }

    /// Appends rows of an already-unified view.
    pub fn append_data(
        &self,
        state: &mut ColumnAppendState,
        uvf: &crate::vector::UnifiedFormat<'_>,
        offset: usize,
        count: usize,
    ) -> StorageResult<()> {
        match &self.variant {
            ColumnVariant::Standard { validity } => {
                self.append_data_base(state, uvf, offset, count)?;
                validity.append_data(&mut state.child_appends[0], uvf, offset, count)
            }
            ColumnVariant::Validity => self.append_data_base(state, uvf, offset, count),
            _ => Err(StorageError::Unsupported(
                "append_data on a nested column; use append",
            )),
        }
    }

    pub(crate) fn append_data_base(
        &self,
        state: &mut ColumnAppendState,
        uvf: &crate::vector::UnifiedFormat<'_>,
        offset: usize,
        count: usize,
    ) -> StorageResult<()> {
        let mut offset = offset;
        let mut remaining = count;
        self.count.fetch_add(count as u64, Ordering::AcqRel);
        loop {
            let current = state
                .current
                .clone()
                .ok_or_else(|| StorageError::internal("append on an uninitialized column"))?;
            let copied = current.append(state, uvf, offset, remaining)?;
            if copied == remaining {
                break;
            }
            // The segment filled up; allocate the next transient segment.
            {
                let mut guard = self.data.lock();
                self.append_transient_segment(&mut guard, current.start() + current.count());
                let last = guard
                    .last_segment()
                    .ok_or_else(|| StorageError::internal("transient segment vanished"))?;
                drop(guard);
                last.initialize_append(state);
                state.current = Some(last);
            }
            offset += copied;
            remaining -= copied;
        }
        Ok(())
    }

    fn append_transient_segment(&self, guard: &mut SegmentTreeGuard<'_, ColumnSegment>, start_row: u64) {
        let block_size = self.buffer_manager.block_size();
        let type_size = self.ty.size();
        // Index-only columns appended at the row-id sentinel get one
        // batch-sized segment instead of a whole block.
        let vector_segment_size = if start_row == MAX_ROW_ID {
            DEFAULT_VECTOR_CAPACITY * type_size
        } else {
            block_size
        };
        let segment_size = block_size.min(vector_segment_size.max(1));
        self.allocation_size
            .fetch_add(segment_size, Ordering::Relaxed);
        let segment = ColumnSegment::create(
            self.buffer_manager.clone(),
            self.ty.clone(),
            start_row,
            segment_size,
        );
        guard.append_segment(segment);
    }

    /// Truncates the column back to `start_row`, undoing appends.
    pub fn revert_append(&self, start_row: u64) -> StorageResult<()> {
        match &self.variant {
            ColumnVariant::Standard { validity } => {
                self.revert_append_base(start_row)?;
                validity.revert_append(start_row)
            }
            ColumnVariant::Validity => self.revert_append_base(start_row),
            ColumnVariant::Struct { .. } => self.struct_revert_append(start_row),
            ColumnVariant::List { .. } => self.list_revert_append(start_row),
            ColumnVariant::Array { .. } => self.array_revert_append(start_row),
        }
    }

    pub(crate) fn revert_append_base(&self, start_row: u64) -> StorageResult<()> {
        let mut guard = self.data.lock();
        let Some(last) = guard.last_segment() else {
            return Ok(());
        };
        if start_row >= last.start() + last.count() {
            debug_assert_eq!(start_row, last.start() + last.count());
            return Ok(());
        }
        let segment_index = guard.segment_index(start_row)?;
        let segment = guard
            .segment_at(segment_index as i64)
            .ok_or_else(|| StorageError::internal("revert target segment vanished"))?;
        guard.erase_after(segment_index);
        drop(guard);
        self.count
            .store(start_row - self.start(), Ordering::Release);
        segment.revert_append(start_row);
        Ok(())
    }

    // ===== point lookups =====

    /// Scans the whole batch containing `row_id` into `result`, update
    /// overlays included; used to obtain pre-image chunks.
    pub fn fetch(
        &self,
        state: &mut ColumnScanState,
        row_id: i64,
        result: &mut Vector,
    ) -> StorageResult<usize> {
        match &self.variant {
            ColumnVariant::Standard { validity } => {
                if state.child_states.is_empty() {
                    state.child_states.push(ColumnScanState::default());
                }
                let scan_count = self.fetch_base(state, row_id, result)?;
                validity.fetch(&mut state.child_states[0], row_id, result)?;
                Ok(scan_count)
            }
            ColumnVariant::Validity => self.fetch_base(state, row_id, result),
            ColumnVariant::Struct { .. } => self.struct_fetch(state, row_id, result),
            ColumnVariant::List { .. } => {
                Err(StorageError::Unsupported("List fetch is not supported"))
            }
            ColumnVariant::Array { .. } => {
                Err(StorageError::Unsupported("Array fetch is not supported"))
            }
        }
    }

    fn fetch_base(
        &self,
        state: &mut ColumnScanState,
        row_id: i64,
        result: &mut Vector,
    ) -> StorageResult<usize> {
        debug_assert!(row_id >= 0 && row_id as u64 >= self.start());
        let cap = DEFAULT_VECTOR_CAPACITY as u64;
        let start = self.start();
        state.row_index = start + (row_id as u64 - start) / cap * cap;
        let segment = self.data.get_segment(state.row_index)?;
        state.internal_index = segment.start();
        state.current = Some(segment);
        state.initialized = false;
        let scan_count = self.scan_vector(
            state,
            result,
            DEFAULT_VECTOR_CAPACITY,
            ScanVectorType::ScanFlatVector,
        )?;
        let vector_index = (row_id as u64 - start) / cap;
        self.fetch_updates(vector_index, result, scan_count, true, false)?;
        Ok(scan_count)
    }

    /// Point lookup of one row into `result[result_idx]`, merging any
    /// update overlay.
    pub fn fetch_row(
        &self,
        state: &mut ColumnFetchState,
        row_id: i64,
        result: &mut Vector,
        result_idx: usize,
    ) -> StorageResult<()> {
        match &self.variant {
            ColumnVariant::Standard { validity } => {
                validity.fetch_row(state.child_state(0), row_id, result, result_idx)?;
                self.fetch_row_base(state, row_id, result, result_idx)
            }
            ColumnVariant::Validity => self.fetch_row_base(state, row_id, result, result_idx),
            ColumnVariant::Struct { .. } => self.struct_fetch_row(state, row_id, result, result_idx),
            ColumnVariant::List { .. } => self.list_fetch_row(state, row_id, result, result_idx),
            ColumnVariant::Array { .. } => self.array_fetch_row(state, row_id, result, result_idx),
        }
    }

    fn fetch_row_base(
        &self,
        state: &mut ColumnFetchState,
        row_id: i64,
        result: &mut Vector,
        result_idx: usize,
    ) -> StorageResult<()> {
        let segment = self.data.get_segment(row_id as u64)?;
        segment.fetch_row(state, row_id as u64, result, result_idx)?;
        self.fetch_update_row(row_id as u64, result, result_idx)
    }

    fn fetch_update_row(
        &self,
        row_id: u64,
        result: &mut Vector,
        result_idx: usize,
    ) -> StorageResult<()> {
        let updates = self.updates.read();
        if let Some(segment) = &*updates {
            segment.fetch_row(row_id, self.start(), result, result_idx)?;
        }
        Ok(())
    }

    // ===== updates =====

    /// Registers an in-place update of `row_ids` (all within one vector
    /// chunk) to the values in `update_vector`.
    pub fn update(
        &self,
        column_index: u64,
        update_vector: &Vector,
        row_ids: &[i64],
    ) -> StorageResult<()> {
        if row_ids.is_empty() {
            return Ok(());
        }
        match &self.variant {
            ColumnVariant::Standard { validity } => {
                self.update_base(column_index, update_vector, row_ids)?;
                validity.update(column_index, update_vector, row_ids)
            }
            ColumnVariant::Validity => self.update_base(column_index, update_vector, row_ids),
            ColumnVariant::Struct { .. } => self.struct_update(column_index, update_vector, row_ids),
            ColumnVariant::List { .. } => {
                Err(StorageError::Unsupported("List update is not supported"))
            }
            ColumnVariant::Array { .. } => {
                Err(StorageError::Unsupported("Array update is not supported"))
            }
        }
    }

    fn update_base(
        &self,
        column_index: u64,
        update_vector: &Vector,
        row_ids: &[i64],
    ) -> StorageResult<()> {
        let mut base_vector = Vector::with_capacity(self.ty.clone(), DEFAULT_VECTOR_CAPACITY);
        let mut state = ColumnScanState::default();
        let fetch_count = self.fetch_base(&mut state, row_ids[0], &mut base_vector)?;
        base_vector.flatten(fetch_count);

        let mut flat_update;
        let update_ref = if update_vector.kind() != VectorKind::Flat {
            flat_update = update_vector.clone();
            flat_update.flatten(row_ids.len());
            &flat_update
        } else {
            update_vector
        };

        let mut updates = self.updates.write();
        let segment = updates
            .get_or_insert_with(|| UpdateSegment::new(self.ty.physical_type()));
        segment.update(column_index, update_ref, row_ids, &base_vector, self.start())
    }

    /// Routes an update through a dotted column path for nested columns.
    pub fn update_column(
        &self,
        column_path: &[u64],
        update_vector: &Vector,
        row_ids: &[i64],
        depth: usize,
    ) -> StorageResult<()> {
        match &self.variant {
            ColumnVariant::Standard { validity } => {
                if depth >= column_path.len() {
                    self.update(column_path[0], update_vector, row_ids)
                } else {
                    validity.update_column(column_path, update_vector, row_ids, depth + 1)
                }
            }
            ColumnVariant::Validity => {
                if depth >= column_path.len() {
                    self.update(column_path[0], update_vector, row_ids)
                } else {
                    Err(StorageError::invalid_state(format!(
                        "column path of depth {} descends past a validity column",
                        column_path.len()
                    )))
                }
            }
            ColumnVariant::Struct { .. } => {
                self.struct_update_column(column_path, update_vector, row_ids, depth)
            }
            ColumnVariant::List { .. } => Err(StorageError::Unsupported(
                "List update column is not supported",
            )),
            ColumnVariant::Array { .. } => Err(StorageError::Unsupported(
                "Array update column is not supported",
            )),
        }
    }

    /// Folds every outstanding update of this column (and its children)
    /// into the committed state.
    pub fn commit_updates(&self) -> StorageResult<()> {
        {
            let mut updates = self.updates.write();
            if let Some(segment) = &mut *updates {
                for vector_index in segment.updated_vectors() {
                    segment.commit_updates(vector_index)?;
                }
            }
        }
        self.for_each_child(|child| child.commit_updates())
    }

    /// Discards every outstanding update of this column (and its children).
    pub fn rollback_updates(&self) -> StorageResult<()> {
        {
            let mut updates = self.updates.write();
            if let Some(segment) = &mut *updates {
                for vector_index in segment.updated_vectors() {
                    segment.rollback_updates(vector_index)?;
                }
            }
        }
        self.for_each_child(|child| child.rollback_updates())
    }

    fn for_each_child(
        &self,
        f: impl Fn(&ColumnData) -> StorageResult<()>,
    ) -> StorageResult<()> {
        match &self.variant {
            ColumnVariant::Standard { validity } => f(validity),
            ColumnVariant::Validity => Ok(()),
            ColumnVariant::Struct { children, validity } => {
                for child in children {
                    f(child)?;
                }
                f(validity)
            }
            ColumnVariant::List { child, validity }
            | ColumnVariant::Array { child, validity, .. } => {
                f(child)?;
                f(validity)
            }
        }
    }

    // ===== introspection =====

    pub fn column_segment_info(
        &self,
        row_group_index: u64,
        col_path: Vec<u64>,
        result: &mut Vec<ColumnSegmentInfo>,
    ) {
        debug_assert!(!col_path.is_empty());
        let path_str = format!("[{}]", col_path.iter().format(", "));
        for (segment_idx, segment) in self.data.segments().into_iter().enumerate() {
            result.push(ColumnSegmentInfo {
                row_group_index,
                column_id: col_path[0],
                column_path: path_str.clone(),
                segment_idx: segment_idx as u64,
                segment_start: segment.start(),
                segment_count: segment.count(),
                has_updates: self.has_updates(),
            });
        }
        match &self.variant {
            ColumnVariant::Standard { validity } => {
                let mut path = col_path;
                path.push(0);
                validity.column_segment_info(row_group_index, path, result);
            }
            ColumnVariant::Validity => {}
            ColumnVariant::Struct { children, validity } => {
                let mut path = col_path;
                path.push(0);
                validity.column_segment_info(row_group_index, path.clone(), result);
                for (i, child) in children.iter().enumerate() {
                    *path.last_mut().unwrap() = i as u64 + 1;
                    child.column_segment_info(row_group_index, path.clone(), result);
                }
            }
            ColumnVariant::List { child, validity }
            | ColumnVariant::Array { child, validity, .. } => {
                let mut path = col_path;
                path.push(0);
                validity.column_segment_info(row_group_index, path.clone(), result);
                *path.last_mut().unwrap() = 1;
                child.column_segment_info(row_group_index, path, result);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::types::{DataValue, StructField};

    use super::*;

    fn bigint_column() -> ColumnData {
        ColumnData::create(BufferManager::new(4096), 0, 0, LogicalType::BigInt)
    }

    fn append_values(column: &ColumnData, values: &[DataValue]) {
        let mut state = ColumnAppendState::default();
        column.initialize_append(&mut state).unwrap();
        let vector = Vector::from_values(column.ty().clone(), values);
        column.append(&mut state, &vector, values.len()).unwrap();
    }

    #[test]
    fn standard_column_roundtrip() {
        let column = bigint_column();
        append_values(
            &column,
            &[
                DataValue::Int64(7),
                DataValue::Null,
                DataValue::Int64(9),
            ],
        );
        assert_eq!(column.count(), 3);

        let mut state = ColumnScanState::default();
        state.initialize(&LogicalType::BigInt, &[]);
        column.initialize_scan(&mut state);
        let mut result = Vector::new(LogicalType::BigInt);
        let scanned = column.scan(0, &mut state, &mut result).unwrap();
        assert_eq!(scanned, 3);
        assert_eq!(result.value(0), DataValue::Int64(7));
        assert_eq!(result.value(1), DataValue::Null);
        assert_eq!(result.value(2), DataValue::Int64(9));
    }

    #[test]
    fn scan_crosses_segment_boundaries() {
        // A 256-byte segment holds 32 i64 rows; 100 rows span 4 segments.
        let buffer_manager = BufferManager::new(256);
        let column = ColumnData::create(buffer_manager, 0, 0, LogicalType::BigInt);
        let values: Vec<DataValue> = (0..100).map(DataValue::Int64).collect();
        append_values(&column, &values);
        assert!(column.data.segment_count() >= 3);

        let mut state = ColumnScanState::default();
        state.initialize(&LogicalType::BigInt, &[]);
        column.initialize_scan(&mut state);
        let mut result = Vector::new(LogicalType::BigInt);
        let scanned = column.scan(0, &mut state, &mut result).unwrap();
        assert_eq!(scanned, 100);
        for i in 0..100 {
            assert_eq!(result.value(i), DataValue::Int64(i as i64));
        }
    }

    #[test]
    fn filter_scan_compacts_through_selection() {
        let column = bigint_column();
        let values: Vec<DataValue> = (0..8).map(DataValue::Int64).collect();
        append_values(&column, &values);

        let mut state = ColumnScanState::default();
        state.initialize(&LogicalType::BigInt, &[]);
        column.initialize_scan(&mut state);
        let mut result = Vector::new(LogicalType::BigInt);
        let mut sel = SelVector::with_capacity(2);
        sel.set(0, 5);
        sel.set(1, 7);
        column
            .filter_scan(0, &mut state, &mut result, &sel, 2)
            .unwrap();
        assert_eq!(result.value(0), DataValue::Int64(5));
        assert_eq!(result.value(1), DataValue::Int64(7));
    }

    #[test]
    fn revert_append_shrinks_column() {
        let column = bigint_column();
        let values: Vec<DataValue> = (0..50).map(DataValue::Int64).collect();
        append_values(&column, &values);
        column.revert_append(20).unwrap();
        assert_eq!(column.count(), 20);

        let mut state = ColumnScanState::default();
        state.initialize(&LogicalType::BigInt, &[]);
        column.initialize_scan(&mut state);
        let mut result = Vector::new(LogicalType::BigInt);
        assert_eq!(column.scan(0, &mut state, &mut result).unwrap(), 20);
    }

    #[test]
    fn unsupported_nested_operations() {
        let buffer_manager = BufferManager::new(4096);
        let list = ColumnData::create(
            buffer_manager.clone(),
            0,
            0,
            LogicalType::List(Box::new(LogicalType::Integer)),
        );
        let mut state = ColumnScanState::default();
        state.initialize(list.ty(), &[]);
        let mut result = Vector::new(list.ty().clone());
        assert_eq!(
            list.fetch(&mut state, 0, &mut result).unwrap_err(),
            StorageError::Unsupported("List fetch is not supported")
        );

        let array = ColumnData::create(
            buffer_manager.clone(),
            0,
            0,
            LogicalType::Array(Box::new(LogicalType::Integer), 2),
        );
        let mut state = ColumnScanState::default();
        state.initialize(array.ty(), &[]);
        let mut result = Vector::new(array.ty().clone());
        assert_eq!(
            array.fetch(&mut state, 0, &mut result).unwrap_err(),
            StorageError::Unsupported("Array fetch is not supported")
        );
        let update = Vector::new(array.ty().clone());
        assert_eq!(
            array.update(0, &update, &[0]).unwrap_err(),
            StorageError::Unsupported("Array update is not supported")
        );
        assert_eq!(
            array.update_column(&[0, 1], &update, &[0], 1).unwrap_err(),
            StorageError::Unsupported("Array update column is not supported")
        );

        let structs = ColumnData::create(
            buffer_manager,
            0,
            0,
            LogicalType::Struct(vec![StructField::new("x", LogicalType::Integer)]),
        );
        let update = Vector::new(structs.ty().clone());
        // A path that ends on the struct itself cannot be updated directly.
        assert_eq!(
            structs.update_column(&[0], &update, &[0], 1).unwrap_err(),
            StorageError::Unsupported("cannot directly update a struct column")
        );
        // A path entry past the struct's children is out of range.
        assert!(matches!(
            structs.update_column(&[0, 5], &update, &[0], 1).unwrap_err(),
            StorageError::InvalidState(_)
        ));
    }
}
