// Copyright 2025 Mica Project Authors. Licensed under Apache-2.0.

//! Scan state: column projections, pushed-down filters and the row-group
//! cursor that drives batch-by-batch scanning.

use std::sync::Arc;

use crate::vector::{DataChunk, SelVector, DEFAULT_VECTOR_CAPACITY};

use super::{
    AdaptiveFilter, AdaptiveFilterState, ColumnScanState, RowGroup, SegmentNode, SegmentTree,
    StorageResult, TableFilter, TableFilterSet, TransactionData, COLUMN_IDENTIFIER_ROW_ID,
};
use crate::types::LogicalType;

/// A projected column of a scan: a table column index plus an optional
/// projection into struct children. The row-id sentinel selects the virtual
/// row-id column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageIndex {
    index: u64,
    child_indexes: Vec<StorageIndex>,
}

impl StorageIndex {
    pub fn new(index: u64) -> Self {
        Self {
            index,
            child_indexes: vec![],
        }
    }

    pub fn with_children(index: u64, child_indexes: Vec<StorageIndex>) -> Self {
        Self {
            index,
            child_indexes,
        }
    }

    pub fn row_id() -> Self {
        Self::new(COLUMN_IDENTIFIER_ROW_ID)
    }

    pub fn primary_index(&self) -> u64 {
        self.index
    }

    pub fn child_indexes(&self) -> &[StorageIndex] {
        &self.child_indexes
    }

    pub fn is_row_id_column(&self) -> bool {
        self.index == COLUMN_IDENTIFIER_ROW_ID
    }
}

/// Which rows a scan is allowed to observe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableScanType {
    /// Snapshot semantics of the acting transaction.
    Regular,
    /// Committed rows only, committed update overlays applied.
    CommittedRows,
    /// Committed rows only; outstanding uncommitted updates are an error.
    CommittedRowsDisallowUpdates,
    /// Committed rows, omitting rows whose deletion no active transaction
    /// can still observe.
    CommittedRowsOmitPermanentlyDeleted,
}

/// One pushed-down filter bound to its scan and table column positions.
pub struct ScanFilter {
    pub scan_column_index: u64,
    pub table_column_index: u64,
    pub filter: TableFilter,
    /// Set once the filter is known to pass every remaining row.
    pub always_true: bool,
}

/// Filter bookkeeping of one scan.
#[derive(Default)]
pub struct ScanFilterInfo {
    filter_list: Vec<ScanFilter>,
    adaptive_filter: Option<AdaptiveFilter>,
    column_has_filter: Vec<bool>,
    base_column_has_filter: Vec<bool>,
    always_true_filters: usize,
}

impl ScanFilterInfo {
    pub fn initialize(filters: &TableFilterSet, column_ids: &[StorageIndex]) -> Self {
        debug_assert!(!filters.is_empty());
        let mut filter_list = Vec::with_capacity(filters.len());
        for (&scan_idx, filter) in &filters.filters {
            filter_list.push(ScanFilter {
                scan_column_index: scan_idx,
                table_column_index: column_ids
                    .get(scan_idx as usize)
                    .map(|c| c.primary_index())
                    .unwrap_or(COLUMN_IDENTIFIER_ROW_ID),
                filter: filter.clone(),
                always_true: false,
            });
        }
        let column_has_filter: Vec<bool> = (0..column_ids.len())
            .map(|i| filters.filters.contains_key(&(i as u64)))
            .collect();
        Self {
            adaptive_filter: Some(AdaptiveFilter::new(filter_list.len())),
            filter_list,
            base_column_has_filter: column_has_filter.clone(),
            column_has_filter,
            always_true_filters: 0,
        }
    }

    pub fn has_filters(&self) -> bool {
        self.always_true_filters < self.filter_list.len()
    }

    pub fn filter_list(&self) -> &[ScanFilter] {
        &self.filter_list
    }

    pub fn column_has_filters(&self, column_idx: usize) -> bool {
        self.column_has_filter
            .get(column_idx)
            .copied()
            .unwrap_or(false)
    }

    /// The current evaluation order.
    pub fn permutation(&self, position: usize) -> usize {
        match &self.adaptive_filter {
            Some(adaptive) => adaptive.permutation[position],
            None => position,
        }
    }

    /// Re-arms every filter, e.g. when positioning on a new row group.
    pub fn check_all_filters(&mut self) {
        self.always_true_filters = 0;
        self.column_has_filter
            .copy_from_slice(&self.base_column_has_filter);
        for filter in &mut self.filter_list {
            filter.always_true = false;
        }
    }

    /// Disarms one filter for the remainder of the current row group.
    pub fn set_filter_always_true(&mut self, filter_idx: usize) {
        let filter = &mut self.filter_list[filter_idx];
        filter.always_true = true;
        if let Some(slot) = self
            .column_has_filter
            .get_mut(filter.scan_column_index as usize)
        {
            *slot = false;
        }
        self.always_true_filters += 1;
    }

    pub fn begin_filter(&self) -> AdaptiveFilterState {
        self.adaptive_filter.as_ref().and_then(|f| f.begin())
    }

    pub fn end_filter(&mut self, state: AdaptiveFilterState) {
        if let Some(adaptive) = &mut self.adaptive_filter {
            adaptive.end(state);
        }
    }
}

/// The cursor of a collection scan: *unpositioned* until a row group is
/// entered, then *positioned mid-batch* until the row group is exhausted and
/// the next one is initialized, finally *exhausted* past `max_row`.
pub struct CollectionScanState {
    pub transaction: TransactionData,
    pub column_ids: Vec<StorageIndex>,
    pub filters: ScanFilterInfo,
    pub row_group: Option<Arc<RowGroup>>,
    pub vector_index: u64,
    pub max_row_group_row: u64,
    pub column_scans: Vec<ColumnScanState>,
    pub row_groups: Option<Arc<SegmentTree<RowGroup>>>,
    pub max_row: u64,
    pub valid_sel: SelVector,
}

impl CollectionScanState {
    pub fn new(transaction: TransactionData) -> Self {
        Self {
            transaction,
            column_ids: vec![],
            filters: ScanFilterInfo::default(),
            row_group: None,
            vector_index: 0,
            max_row_group_row: 0,
            column_scans: vec![],
            row_groups: None,
            max_row: 0,
            valid_sel: SelVector::with_capacity(DEFAULT_VECTOR_CAPACITY),
        }
    }

    /// Builds per-column cursor skeletons for the projected columns.
    pub fn initialize(&mut self, types: &[LogicalType]) {
        self.column_scans = self.column_ids.iter().map(|_| Default::default()).collect();
        for (i, column) in self.column_ids.iter().enumerate() {
            if column.is_row_id_column() {
                continue;
            }
            let col_idx = column.primary_index() as usize;
            self.column_scans[i].initialize(&types[col_idx], column.child_indexes());
        }
    }

    /// Produces the next non-empty batch, advancing across row groups.
    /// Returns `false` once the scan is exhausted.
    pub fn scan(&mut self, result: &mut DataChunk) -> StorageResult<bool> {
        while let Some(row_group) = self.row_group.clone() {
            row_group.scan(self, result)?;
            if result.size() > 0 {
                return Ok(true);
            }
            if self.max_row <= row_group.start() + row_group.count() {
                self.row_group = None;
                return Ok(false);
            }
            let row_groups = self
                .row_groups
                .clone()
                .expect("scanning without a row group tree");
            let mut current = row_group;
            loop {
                match row_groups.next_segment(&current) {
                    None => {
                        self.row_group = None;
                        break;
                    }
                    Some(next) => {
                        if next.start() >= self.max_row {
                            self.row_group = None;
                            break;
                        }
                        let positioned = next.clone().initialize_scan(self)?;
                        if positioned {
                            break;
                        }
                        current = next;
                    }
                }
            }
        }
        Ok(false)
    }

    /// Committed-only variant of [`scan`](Self::scan).
    pub fn scan_committed(
        &mut self,
        result: &mut DataChunk,
        scan_type: TableScanType,
    ) -> StorageResult<bool> {
        while let Some(row_group) = self.row_group.clone() {
            row_group.scan_committed(self, result, scan_type)?;
            if result.size() > 0 {
                return Ok(true);
            }
            let row_groups = self
                .row_groups
                .clone()
                .expect("scanning without a row group tree");
            match row_groups.next_segment(&row_group) {
                None => self.row_group = None,
                Some(next) => {
                    next.clone().initialize_scan(self)?;
                }
            }
        }
        Ok(false)
    }
}
