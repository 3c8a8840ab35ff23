// Copyright 2025 Mica Project Authors. Licensed under Apache-2.0.

use std::collections::HashMap;
use std::sync::Arc;

use crate::buffer::{BlockId, BufferHandle, BufferManager};
use crate::types::{LogicalType, PhysicalType};

use super::super::{ColumnSegment, StorageIndex};

/// Cursor state of one column scan. Composite columns mirror their child
/// structure in `child_states`.
#[derive(Default)]
pub struct ColumnScanState {
    /// Segment the cursor is positioned on.
    pub current: Option<Arc<ColumnSegment>>,
    /// Global row offset of the cursor.
    pub row_index: u64,
    /// Global row offset the segment-internal state has advanced to.
    pub internal_index: u64,
    /// Pin on the current segment's block.
    pub scan_state: Option<BufferHandle>,
    pub child_states: Vec<ColumnScanState>,
    pub initialized: bool,
    /// For list columns: absolute child offset the scan has consumed up to.
    pub last_offset: u64,
    /// For struct columns: which children this scan materializes.
    pub scan_child_column: Vec<bool>,
}

impl ColumnScanState {
    /// Builds the child-state skeleton for a column of `ty`, honoring a
    /// struct projection given by `children`.
    pub fn initialize(&mut self, ty: &LogicalType, children: &[StorageIndex]) {
        match ty.physical_type() {
            PhysicalType::Struct => {
                let fields = ty.struct_fields();
                self.child_states.clear();
                // Child 0 tracks the validity column.
                self.child_states.push(ColumnScanState::default());
                if children.is_empty() {
                    self.scan_child_column = vec![true; fields.len()];
                    for field in fields {
                        let mut child = ColumnScanState::default();
                        child.initialize(&field.ty, &[]);
                        self.child_states.push(child);
                    }
                } else {
                    self.scan_child_column = vec![false; fields.len()];
                    for field in fields {
                        let mut child = ColumnScanState::default();
                        child.initialize(&field.ty, &[]);
                        self.child_states.push(child);
                    }
                    for child_index in children {
                        let idx = child_index.primary_index() as usize;
                        if idx < fields.len() {
                            self.scan_child_column[idx] = true;
                        }
                    }
                }
            }
            PhysicalType::List => {
                self.child_states = vec![ColumnScanState::default(), ColumnScanState::default()];
                self.child_states[1].initialize(ty.child_type(), &[]);
            }
            PhysicalType::Array => {
                self.child_states = vec![ColumnScanState::default(), ColumnScanState::default()];
                self.child_states[1].initialize(ty.child_type(), &[]);
            }
            PhysicalType::Bit => {}
            _ => {
                // Standard columns carry one validity child.
                self.child_states = vec![ColumnScanState::default()];
            }
        }
        self.initialized = false;
    }

    /// Advances the cursor by `count` rows without scanning, recursing into
    /// the children.
    pub fn next(&mut self, count: u64) {
        self.next_internal(count);
        for child in &mut self.child_states {
            child.next(count);
        }
    }

    pub fn next_internal(&mut self, count: u64) {
        self.row_index += count;
    }
}

/// Append state of one column: the segment being written plus a pin on its
/// block.
#[derive(Default)]
pub struct ColumnAppendState {
    pub current: Option<Arc<ColumnSegment>>,
    pub handle: Option<BufferHandle>,
    pub child_appends: Vec<ColumnAppendState>,
}

/// Point-lookup state: pinned block handles cached per block id.
#[derive(Default)]
pub struct ColumnFetchState {
    handles: HashMap<BlockId, BufferHandle>,
    pub child_states: Vec<ColumnFetchState>,
}

impl ColumnFetchState {
    pub fn get_or_insert_handle(
        &mut self,
        buffer_manager: &BufferManager,
        segment: &ColumnSegment,
    ) -> &BufferHandle {
        self.handles
            .entry(segment.block().id())
            .or_insert_with(|| buffer_manager.pin(segment.block()))
    }

    pub fn child_state(&mut self, idx: usize) -> &mut ColumnFetchState {
        while self.child_states.len() <= idx {
            self.child_states.push(ColumnFetchState::default());
        }
        &mut self.child_states[idx]
    }
}
