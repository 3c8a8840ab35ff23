// Copyright 2025 Mica Project Authors. Licensed under Apache-2.0.

//! Struct, list and array column behavior.
//!
//! A struct column broadcasts across its named children; a list column
//! stores one `u64` child end offset per row in its own segments, with the
//! flattened element stream in a single child column; an array column maps
//! each row to a fixed child stride.

use crate::types::{DataValue, LogicalType};
use crate::vector::{ListEntry, SelVector, ValidityMask, Vector, VectorKind};

use super::super::{SegmentNode, StorageError, StorageResult};
use super::{ColumnAppendState, ColumnData, ColumnFetchState, ColumnScanMode, ColumnScanState,
    ColumnVariant, ScanVectorType};

impl ColumnData {
    fn struct_parts(&self) -> (&[ColumnData], &ColumnData) {
        match &self.variant {
            ColumnVariant::Struct { children, validity } => (children, validity),
            _ => unreachable!("not a struct column"),
        }
    }

    fn list_parts(&self) -> (&ColumnData, &ColumnData) {
        match &self.variant {
            ColumnVariant::List { child, validity } => (child, validity),
            _ => unreachable!("not a list column"),
        }
    }

    fn array_parts(&self) -> (&ColumnData, &ColumnData, usize) {
        match &self.variant {
            ColumnVariant::Array {
                child,
                validity,
                array_size,
            } => (child, validity, *array_size),
            _ => unreachable!("not an array column"),
        }
    }

    // ===== struct =====

    pub(crate) fn struct_scan(
        &self,
        vector_index: u64,
        state: &mut ColumnScanState,
        result: &mut Vector,
        count: usize,
        mode: ColumnScanMode,
    ) -> StorageResult<usize> {
        let (children, validity) = self.struct_parts();
        let scan_count =
            validity.scan_mode(vector_index, &mut state.child_states[0], result, count, mode)?;
        for (i, child) in children.iter().enumerate() {
            let scan_child = state.scan_child_column.get(i).copied().unwrap_or(true);
            let target = &mut result.struct_entries_mut()[i];
            if !scan_child {
                // Projected-out children surface as constant NULL.
                target.reference(&DataValue::Null);
                continue;
            }
            child.scan_mode(vector_index, &mut state.child_states[i + 1], target, count, mode)?;
        }
        Ok(scan_count)
    }

    pub(crate) fn struct_scan_count(
        &self,
        state: &mut ColumnScanState,
        result: &mut Vector,
        count: usize,
    ) -> StorageResult<usize> {
        let (children, validity) = self.struct_parts();
        let scan_count = validity.scan_count(&mut state.child_states[0], result, count)?;
        for (i, child) in children.iter().enumerate() {
            let scan_child = state.scan_child_column.get(i).copied().unwrap_or(true);
            let target = &mut result.struct_entries_mut()[i];
            if !scan_child {
                target.reference(&DataValue::Null);
                continue;
            }
            child.scan_count(&mut state.child_states[i + 1], target, count)?;
        }
        Ok(scan_count)
    }

    pub(crate) fn struct_skip(
        &self,
        state: &mut ColumnScanState,
        count: u64,
    ) -> StorageResult<()> {
        let (children, validity) = self.struct_parts();
        validity.skip(&mut state.child_states[0], count)?;
        for (i, child) in children.iter().enumerate() {
            if state.scan_child_column.get(i).copied().unwrap_or(true) {
                child.skip(&mut state.child_states[i + 1], count)?;
            }
        }
        Ok(())
    }

    pub(crate) fn struct_append(
        &self,
        state: &mut ColumnAppendState,
        vector: &Vector,
        count: usize,
    ) -> StorageResult<()> {
        if vector.kind() != VectorKind::Flat {
            let mut flat = vector.clone();
            flat.flatten(count);
            return self.struct_append(state, &flat, count);
        }
        let (children, validity) = self.struct_parts();
        validity.append(&mut state.child_appends[0], vector, count)?;
        for (i, child) in children.iter().enumerate() {
            child.append(
                &mut state.child_appends[i + 1],
                &vector.struct_entries()[i],
                count,
            )?;
        }
        self.add_count(count as u64);
        Ok(())
    }

    pub(crate) fn struct_revert_append(&self, start_row: u64) -> StorageResult<()> {
        let (children, validity) = self.struct_parts();
        validity.revert_append(start_row)?;
        for child in children {
            child.revert_append(start_row)?;
        }
        self.store_count(start_row - self.start());
        Ok(())
    }

    pub(crate) fn struct_fetch(
        &self,
        state: &mut ColumnScanState,
        row_id: i64,
        result: &mut Vector,
    ) -> StorageResult<usize> {
        let (children, validity) = self.struct_parts();
        while state.child_states.len() < children.len() + 1 {
            state.child_states.push(ColumnScanState::default());
        }
        let scan_count = validity.fetch(&mut state.child_states[0], row_id, result)?;
        for (i, child) in children.iter().enumerate() {
            let target = &mut result.struct_entries_mut()[i];
            child.fetch(&mut state.child_states[i + 1], row_id, target)?;
        }
        Ok(scan_count)
    }

    pub(crate) fn struct_fetch_row(
        &self,
        state: &mut ColumnFetchState,
        row_id: i64,
        result: &mut Vector,
        result_idx: usize,
    ) -> StorageResult<()> {
        let (children, validity) = self.struct_parts();
        validity.fetch_row(state.child_state(0), row_id, result, result_idx)?;
        for (i, child) in children.iter().enumerate() {
            let target = &mut result.struct_entries_mut()[i];
            child.fetch_row(state.child_state(i + 1), row_id, target, result_idx)?;
        }
        Ok(())
    }

    pub(crate) fn struct_update(
        &self,
        column_index: u64,
        update_vector: &Vector,
        row_ids: &[i64],
    ) -> StorageResult<()> {
        let (children, validity) = self.struct_parts();
        validity.update(column_index, update_vector, row_ids)?;
        for (i, child) in children.iter().enumerate() {
            child.update(column_index, &update_vector.struct_entries()[i], row_ids)?;
        }
        Ok(())
    }

    pub(crate) fn struct_update_column(
        &self,
        column_path: &[u64],
        update_vector: &Vector,
        row_ids: &[i64],
        depth: usize,
    ) -> StorageResult<()> {
        let (children, validity) = self.struct_parts();
        if depth >= column_path.len() {
            return Err(StorageError::Unsupported(
                "cannot directly update a struct column",
            ));
        }
        let update_column = column_path[depth];
        if update_column == 0 {
            validity.update_column(column_path, update_vector, row_ids, depth + 1)
        } else {
            if update_column as usize > children.len() {
                return Err(StorageError::invalid_state(format!(
                    "column path entry {update_column} is out of range for a struct with {} children",
                    children.len()
                )));
            }
            children[update_column as usize - 1].update_column(
                column_path,
                update_vector,
                row_ids,
                depth + 1,
            )
        }
    }

    // ===== list =====

    /// Reads the child end offset stored for `row_idx`.
    fn list_fetch_offset(&self, row_idx: u64) -> StorageResult<u64> {
        let segment = self.data.get_segment(row_idx)?;
        let mut fetch_state = ColumnFetchState::default();
        let mut result = Vector::with_capacity(LogicalType::UBigInt, 1);
        segment.fetch_row(&mut fetch_state, row_idx, &mut result, 0)?;
        Ok(result.data::<u64>()[0])
    }

    pub(crate) fn list_initialize_scan_with_offset(
        &self,
        state: &mut ColumnScanState,
        row_idx: u64,
    ) -> StorageResult<()> {
        if row_idx == self.start() {
            self.initialize_scan(state);
            return Ok(());
        }
        let (child, validity) = self.list_parts();
        self.initialize_scan_with_offset_base_list(state, row_idx)?;
        validity.initialize_scan_with_offset(&mut state.child_states[0], row_idx)?;

        let child_offset = self.list_fetch_offset(row_idx - 1)?;
        debug_assert!(child_offset <= child.max_entry());
        if child_offset < child.max_entry() {
            child.initialize_scan_with_offset(
                &mut state.child_states[1],
                self.start() + child_offset,
            )?;
        }
        state.last_offset = child_offset;
        Ok(())
    }

    fn initialize_scan_with_offset_base_list(
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
        Ok(())
    }

    pub(crate) fn list_scan_count(
        &self,
        state: &mut ColumnScanState,
        result: &mut Vector,
        count: usize,
    ) -> StorageResult<usize> {
        if count == 0 {
            return Ok(0);
        }
        debug_assert!(!self.has_updates());
        let (child, validity) = self.list_parts();

        let mut offset_vector = Vector::with_capacity(LogicalType::UBigInt, count);
        let scan_count =
            self.scan_vector(state, &mut offset_vector, count, ScanVectorType::ScanFlatVector)?;
        debug_assert!(scan_count > 0);
        validity.scan_count(&mut state.child_states[0], result, count)?;

        let offsets = offset_vector.data::<u64>();
        let last_entry = offsets[scan_count - 1];
        let base_offset = state.last_offset;

        let mut current_offset = 0u64;
        {
            let entries = result.list_entries_mut();
            for (i, end) in offsets[..scan_count].iter().enumerate() {
                let length = end - current_offset - base_offset;
                entries[i] = ListEntry {
                    offset: current_offset,
                    length,
                };
                current_offset += length;
            }
        }

        debug_assert!(last_entry >= base_offset);
        let child_scan_count = (last_entry - base_offset) as usize;
        result.reserve_list_child(child_scan_count);

        if child_scan_count > 0 {
            let child_state = &mut state.child_states[1];
            if child_state.row_index + child_scan_count as u64
                > child.start() + child.max_entry()
            {
                return Err(StorageError::internal(
                    "list scan child offset is out of range",
                ));
            }
            child.scan_count(child_state, result.child_mut(), child_scan_count)?;
        }
        state.last_offset = last_entry;
        result.set_list_size(child_scan_count);
        Ok(scan_count)
    }

    pub(crate) fn list_skip(&self, state: &mut ColumnScanState, count: u64) -> StorageResult<()> {
        let (child, validity) = self.list_parts();
        validity.skip(&mut state.child_states[0], count)?;

        let mut offset_vector = Vector::with_capacity(LogicalType::UBigInt, count as usize);
        let scan_count = self.scan_vector(
            state,
            &mut offset_vector,
            count as usize,
            ScanVectorType::ScanFlatVector,
        )?;
        debug_assert!(scan_count > 0);
        let last_entry = offset_vector.data::<u64>()[scan_count - 1];
        let child_scan_count = last_entry - state.last_offset;
        if child_scan_count == 0 {
            return Ok(());
        }
        state.last_offset = last_entry;
        child.skip(&mut state.child_states[1], child_scan_count)
    }

    pub(crate) fn list_append(
        &self,
        state: &mut ColumnAppendState,
        vector: &Vector,
        count: usize,
    ) -> StorageResult<()> {
        debug_assert!(count > 0);
        if vector.kind() != VectorKind::Flat {
            let mut flat = vector.clone();
            flat.flatten(count);
            return self.list_append(state, &flat, count);
        }
        let (child_column, validity_column) = self.list_parts();

        let start_offset = child_column.max_entry();
        let mut child_count = 0u64;
        let mut append_mask = ValidityMask::new(count);
        let mut append_offsets = vec![0u64; count];
        let mut child_contiguous = true;
        for i in 0..count {
            if vector.validity().row_is_valid(i) {
                let entry = vector.list_entries()[i];
                if entry.offset != child_count {
                    child_contiguous = false;
                }
                append_offsets[i] = start_offset + child_count + entry.length;
                child_count += entry.length;
            } else {
                append_mask.set_invalid(i);
                append_offsets[i] = start_offset + child_count;
            }
        }

        // Compact the child stream if the list entries do not reference it
        // contiguously (nulls or reordered slices).
        let list_child = vector.child();
        let mut gathered_child;
        let child_ref = if child_contiguous {
            list_child
        } else {
            let mut sel = SelVector::with_capacity(child_count as usize);
            let mut current = 0;
            for i in 0..count {
                if vector.validity().row_is_valid(i) {
                    let entry = vector.list_entries()[i];
                    for j in 0..entry.length {
                        sel.set(current, (entry.offset + j) as usize);
                        current += 1;
                    }
                }
            }
            debug_assert_eq!(current as u64, child_count);
            gathered_child = list_child.clone();
            gathered_child.slice(&sel, child_count as usize);
            &gathered_child
        };

        if child_count > 0 {
            child_column.append(&mut state.child_appends[1], child_ref, child_count as usize)?;
        }

        let mut offsets_vector = Vector::with_capacity(LogicalType::UBigInt, count);
        offsets_vector.data_mut::<u64>()[..count].copy_from_slice(&append_offsets);
        let offsets_uvf = offsets_vector.to_unified(count);
        self.append_data_base(state, &offsets_uvf, 0, count)?;

        let mut mask_vector = Vector::with_capacity(LogicalType::UBigInt, count);
        *mask_vector.validity_mut() = append_mask;
        let mask_uvf = mask_vector.to_unified(count);
        validity_column.append_data(&mut state.child_appends[0], &mask_uvf, 0, count)
    }

    pub(crate) fn list_revert_append(&self, start_row: u64) -> StorageResult<()> {
        let (child, validity) = self.list_parts();
        self.revert_append_base(start_row)?;
        validity.revert_append(start_row)?;
        if self.count() > 0 {
            let last_offset = self.list_fetch_offset(self.start() + self.count() - 1)?;
            child.revert_append(child.start() + last_offset)
        } else {
            child.revert_append(child.start())
        }
    }

    pub(crate) fn list_fetch_row(
        &self,
        state: &mut ColumnFetchState,
        row_id: i64,
        result: &mut Vector,
        result_idx: usize,
    ) -> StorageResult<()> {
        let (child_column, validity_column) = self.list_parts();
        let row = row_id as u64;
        let start_offset = if row == self.start() {
            0
        } else {
            self.list_fetch_offset(row - 1)?
        };
        let end_offset = self.list_fetch_offset(row)?;
        validity_column.fetch_row(state.child_state(0), row_id, result, result_idx)?;

        let list_size_before = result.list_size();
        let valid = result.validity().row_is_valid(result_idx);
        result.list_entries_mut()[result_idx] = ListEntry {
            offset: list_size_before as u64,
            length: end_offset - start_offset,
        };
        if !valid {
            debug_assert_eq!(end_offset, start_offset);
            return Ok(());
        }

        let child_scan_count = (end_offset - start_offset) as usize;
        if child_scan_count > 0 {
            let child_ty = self.ty().child_type().clone();
            let mut child_state = ColumnScanState::default();
            child_state.initialize(&child_ty, &[]);
            child_column
                .initialize_scan_with_offset(&mut child_state, self.start() + start_offset)?;
            let mut child_scan = Vector::with_capacity(child_ty, child_scan_count);
            child_column.scan_count(&mut child_state, &mut child_scan, child_scan_count)?;
            result.child_mut().append(&child_scan, child_scan_count);
            result.set_list_size(list_size_before + child_scan_count);
        }
        Ok(())
    }

    // ===== array =====

    pub(crate) fn array_initialize_scan_with_offset(
        &self,
        state: &mut ColumnScanState,
        row_idx: u64,
    ) -> StorageResult<()> {
        if row_idx == self.start() {
            self.initialize_scan(state);
            return Ok(());
        }
        let (child, validity, array_size) = self.array_parts();
        state.row_index = row_idx;
        state.current = None;
        validity.initialize_scan_with_offset(&mut state.child_states[0], row_idx)?;

        let child_count = (row_idx - self.start()) * array_size as u64;
        debug_assert!(child_count <= child.max_entry());
        if child_count < child.max_entry() {
            child.initialize_scan_with_offset(
                &mut state.child_states[1],
                self.start() + child_count,
            )?;
        }
        Ok(())
    }

    pub(crate) fn array_scan_count(
        &self,
        state: &mut ColumnScanState,
        result: &mut Vector,
        count: usize,
    ) -> StorageResult<usize> {
        let (child, validity, array_size) = self.array_parts();
        let scan_count = validity.scan_count(&mut state.child_states[0], result, count)?;
        let child_state = &mut state.child_states[1];
        child.scan_count(child_state, result.child_mut(), count * array_size)?;
        Ok(scan_count)
    }

    pub(crate) fn array_skip(&self, state: &mut ColumnScanState, count: u64) -> StorageResult<()> {
        let (child, validity, array_size) = self.array_parts();
        validity.skip(&mut state.child_states[0], count)?;
        child.skip(&mut state.child_states[1], count * array_size as u64)
    }

    pub(crate) fn array_append(
        &self,
        state: &mut ColumnAppendState,
        vector: &Vector,
        count: usize,
    ) -> StorageResult<()> {
        if vector.kind() != VectorKind::Flat {
            let mut flat = vector.clone();
            flat.flatten(count);
            return self.array_append(state, &flat, count);
        }
        let (child, validity, array_size) = self.array_parts();
        validity.append(&mut state.child_appends[0], vector, count)?;
        child.append(&mut state.child_appends[1], vector.child(), count * array_size)?;
        self.add_count(count as u64);
        Ok(())
    }

    pub(crate) fn array_revert_append(&self, start_row: u64) -> StorageResult<()> {
        let (child, validity, array_size) = self.array_parts();
        validity.revert_append(start_row)?;
        child.revert_append(child.start() + (start_row - self.start()) * array_size as u64)?;
        self.store_count(start_row - self.start());
        Ok(())
    }

    pub(crate) fn array_fetch_row(
        &self,
        state: &mut ColumnFetchState,
        row_id: i64,
        result: &mut Vector,
        result_idx: usize,
    ) -> StorageResult<()> {
        let (child, validity, array_size) = self.array_parts();
        validity.fetch_row(state.child_state(0), row_id, result, result_idx)?;

        let child_ty = self.ty().child_type().clone();
        let child_offset = self.start() + (row_id as u64 - self.start()) * array_size as u64;
        let mut child_state = ColumnScanState::default();
        child_state.initialize(&child_ty, &[]);
        child.initialize_scan_with_offset(&mut child_state, child_offset)?;
        let mut child_scan = Vector::with_capacity(child_ty, array_size);
        child.scan_count(&mut child_state, &mut child_scan, array_size)?;
        result
            .child_mut()
            .copy_rows(&child_scan, array_size, 0, result_idx * array_size);
        Ok(())
    }
}
