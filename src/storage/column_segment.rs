// Copyright 2025 Mica Project Authors. Licensed under Apache-2.0.

//! One physical, block-backed, encoded run of values for one column.
//!
//! Three encodings exist: raw little-endian arrays for fixed-width types, a
//! packed bitmap at 64-bit-word granularity for validity, and a block-local
//! dictionary for strings. String dictionaries grow backward from the end of
//! the segment; each row stores the cumulative absolute dictionary size as a
//! signed offset, and a negative offset marks an indirection into an
//! overflow block holding the length-prefixed bytes of a long string.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Buf, BufMut};
use parking_lot::Mutex;

use crate::buffer::{BlockHandle, BufferHandle, BufferManager, MemoryTag};
use crate::types::{DataValue, LogicalType, NativeType, PhysicalType};
use crate::vector::{
    lower_mask, upper_mask, NativeVector, UnifiedFormat, ValidityMask, Vector, VectorKind,
    MAX_ENTRY,
};

use super::{ColumnAppendState, ColumnFetchState, ColumnScanState, SegmentNode, StorageError,
    StorageResult};

/// `{dict_size, dict_end, index_buffer_offset, index_buffer_count,
/// bitpacking_width}`, all `u32`. Only the first two fields are used by the
/// uncompressed dictionary; the rest are written as zero.
const DICTIONARY_HEADER_SIZE: usize = 5 * std::mem::size_of::<u32>();

/// An overflow marker in the dictionary: `{block_id: u32, offset: i32}`.
const BIG_STRING_MARKER_SIZE: usize = std::mem::size_of::<u32>() + std::mem::size_of::<i32>();

const DEFAULT_STRING_BLOCK_LIMIT: usize = 4096;

/// Strings at or above this length go to an overflow block.
fn string_block_limit(block_size: usize) -> usize {
    (block_size / 4 / 8 * 8).min(DEFAULT_STRING_BLOCK_LIMIT)
}

struct StringOverflowBlock {
    block: Arc<BlockHandle>,
    offset: usize,
    size: usize,
    #[allow(dead_code)]
    next: Option<Box<StringOverflowBlock>>,
}

/// Registry of the overflow blocks a string segment has written.
#[derive(Default)]
struct StringSegmentState {
    head: Option<Box<StringOverflowBlock>>,
    handles: HashMap<u32, Arc<BlockHandle>>,
}

#[derive(Default)]
struct SegmentStats {
    min: Option<DataValue>,
    max: Option<DataValue>,
}

/// One encoded run of a column's values inside a single block.
pub struct ColumnSegment {
    ty: LogicalType,
    physical: PhysicalType,
    start: AtomicU64,
    count: AtomicU64,
    index: AtomicU64,
    buffer_manager: Arc<BufferManager>,
    block: Arc<BlockHandle>,
    offset: usize,
    segment_size: usize,
    stats: Mutex<SegmentStats>,
    string_state: Option<Mutex<StringSegmentState>>,
}

impl SegmentNode for ColumnSegment {
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

impl ColumnSegment {
    /// Allocates a fresh transient segment of `segment_size` bytes.
    pub fn create(
        buffer_manager: Arc<BufferManager>,
        ty: LogicalType,
        start: u64,
        segment_size: usize,
    ) -> Arc<Self> {
        let block = buffer_manager.register_transient(segment_size);
        let physical = ty.physical_type();
        let segment = Self {
            ty,
            physical,
            start: AtomicU64::new(start),
            count: AtomicU64::new(0),
            index: AtomicU64::new(0),
            buffer_manager: buffer_manager.clone(),
            block,
            offset: 0,
            segment_size,
            stats: Mutex::new(SegmentStats::default()),
            string_state: (physical == PhysicalType::String)
                .then(|| Mutex::new(StringSegmentState::default())),
        };
        match physical {
            PhysicalType::Bit => {
                // Validity segments start all-valid.
                let handle = buffer_manager.pin(&segment.block);
                handle.write()[segment.offset..segment.offset + segment_size].fill(0xFF);
            }
            PhysicalType::String => {
                let handle = buffer_manager.pin(&segment.block);
                let mut data = handle.write();
                segment.store_dictionary(&mut data, 0, segment_size as u32);
            }
            _ => {}
        }
        Arc::new(segment)
    }

    pub fn ty(&self) -> &LogicalType {
        &self.ty
    }

    pub fn block(&self) -> &Arc<BlockHandle> {
        &self.block
    }

    pub fn segment_size(&self) -> usize {
        self.segment_size
    }

    pub fn set_start(&self, start: u64) {
        self.start.store(start, Ordering::Release);
    }

    pub fn relative_index(&self, row_index: u64) -> usize {
        debug_assert!(row_index >= self.start());
        (row_index - self.start()) as usize
    }

    /// Min/max statistics over the appended values, for zonemap pruning.
    pub fn zonemap(&self) -> Option<(DataValue, DataValue)> {
        let stats = self.stats.lock();
        match (&stats.min, &stats.max) {
            (Some(min), Some(max)) => Some((min.clone(), max.clone())),
            _ => None,
        }
    }

    // ===== scanning =====

    pub fn initialize_scan(&self, state: &mut ColumnScanState) {
        state.scan_state = Some(self.buffer_manager.pin(&self.block));
    }

    pub fn skip(&self, state: &mut ColumnScanState) {
        state.internal_index = state.row_index;
    }

    /// Copies `scan_count` rows starting at `state.row_index` into `result`
    /// at `result_offset`.
    pub fn scan(
        &self,
        state: &ColumnScanState,
        scan_count: usize,
        result: &mut Vector,
        result_offset: usize,
    ) -> StorageResult<()> {
        let handle = state
            .scan_state
            .as_ref()
            .ok_or_else(|| StorageError::internal("segment scan without a pinned block"))?;
        match self.physical {
            PhysicalType::Bool | PhysicalType::Int8 => {
                self.scan_fixed::<i8>(handle, state, scan_count, result, result_offset)
            }
            PhysicalType::Int16 => {
                self.scan_fixed::<i16>(handle, state, scan_count, result, result_offset)
            }
            PhysicalType::Int32 => {
                self.scan_fixed::<i32>(handle, state, scan_count, result, result_offset)
            }
            PhysicalType::Int64 => {
                self.scan_fixed::<i64>(handle, state, scan_count, result, result_offset)
            }
            PhysicalType::UInt8 => {
                self.scan_fixed::<u8>(handle, state, scan_count, result, result_offset)
            }
            PhysicalType::UInt16 => {
                self.scan_fixed::<u16>(handle, state, scan_count, result, result_offset)
            }
            PhysicalType::UInt32 => {
                self.scan_fixed::<u32>(handle, state, scan_count, result, result_offset)
            }
            PhysicalType::UInt64 | PhysicalType::List => {
                self.scan_fixed::<u64>(handle, state, scan_count, result, result_offset)
            }
            PhysicalType::Float32 => {
                self.scan_fixed::<f32>(handle, state, scan_count, result, result_offset)
            }
            PhysicalType::Float64 => {
                self.scan_fixed::<f64>(handle, state, scan_count, result, result_offset)
            }
            PhysicalType::Bit => self.scan_validity(handle, state, scan_count, result, result_offset),
            PhysicalType::String => {
                self.scan_string(handle, state, scan_count, result, result_offset)
            }
            PhysicalType::Struct | PhysicalType::Array => Err(StorageError::Unsupported(
                "struct and array columns have no value segments",
            )),
        }
    }

    fn scan_fixed<T: NativeVector>(
        &self,
        handle: &BufferHandle,
        state: &ColumnScanState,
        scan_count: usize,
        result: &mut Vector,
        result_offset: usize,
    ) -> StorageResult<()> {
        let start = self.relative_index(state.row_index);
        let data = handle.read();
        let base = self.offset + start * T::WIDTH;
        let mut src = &data[base..base + scan_count * T::WIDTH];
        result.set_kind(VectorKind::Flat);
        let out = result.data_mut::<T>();
        for slot in out.iter_mut().skip(result_offset).take(scan_count) {
            *slot = T::decode(&mut src);
        }
        Ok(())
    }

    fn scan_validity(
        &self,
        handle: &BufferHandle,
        state: &ColumnScanState,
        scan_count: usize,
        result: &mut Vector,
        result_offset: usize,
    ) -> StorageResult<()> {
        let start = self.relative_index(state.row_index);
        let data = handle.read();
        if result_offset == 0 && start % ValidityMask::BITS_PER_VALUE == 0 {
            // Word-aligned fast path: AND whole input words into the result.
            let start_word = start / ValidityMask::BITS_PER_VALUE;
            let word_count =
                (scan_count + ValidityMask::BITS_PER_VALUE - 1) / ValidityMask::BITS_PER_VALUE;
            let mut materialized = result.validity().data().is_some();
            for i in 0..word_count {
                let input_entry = self.load_word(&data, start_word + i);
                if !materialized && input_entry == MAX_ENTRY {
                    continue;
                }
                materialized = true;
                let words = result.validity_mut().ensure_writable();
                words[i] &= input_entry;
            }
            Ok(())
        } else {
            self.scan_validity_partial(&data, start, scan_count, result, result_offset)
        }
    }

    /// Unaligned bitmap merge: walks input and result words together,
    /// shifting each loaded input word so it lines up with the result bit
    /// cursor, padding the shifted-out region with ones.
    fn scan_validity_partial(
        &self,
        data: &[u8],
        start: usize,
        scan_count: usize,
        result: &mut Vector,
        result_offset: usize,
    ) -> StorageResult<()> {
        const BITS: usize = ValidityMask::BITS_PER_VALUE;
        let mut result_entry = result_offset / BITS;
        let mut result_idx = result_offset - result_entry * BITS;
        let mut input_entry = start / BITS;
        let mut input_idx = start - input_entry * BITS;

        let mut pos = 0;
        while pos < scan_count {
            let current_result_idx = result_entry;
            let mut input_mask = self.load_word(data, input_entry);
            let offset;
            if result_idx < input_idx {
                let shift = input_idx - result_idx;
                input_mask >>= shift;
                input_mask |= upper_mask(shift);
                offset = BITS - input_idx;
                input_entry += 1;
                input_idx = 0;
                result_idx += offset;
            } else if result_idx > input_idx {
                let shift = result_idx - input_idx;
                input_mask = (input_mask & !upper_mask(shift)) << shift;
                input_mask |= lower_mask(shift);
                offset = BITS - result_idx;
                result_entry += 1;
                result_idx = 0;
                input_idx += offset;
            } else {
                offset = BITS - result_idx;
                input_entry += 1;
                result_entry += 1;
                result_idx = 0;
                input_idx = 0;
            }
            pos += offset;
            if pos > scan_count {
                input_mask |= upper_mask(pos - scan_count);
            }
            if input_mask != MAX_ENTRY {
                let words = result.validity_mut().ensure_writable();
                words[current_result_idx] &= input_mask;
            }
        }
        Ok(())
    }

    fn load_word(&self, data: &[u8], word_idx: usize) -> u64 {
        let base = self.offset + word_idx * 8;
        u64::from_le_bytes(data[base..base + 8].try_into().unwrap())
    }

    fn load_u32(&self, data: &[u8], byte_offset: usize) -> u32 {
        let base = self.offset + byte_offset;
        u32::from_le_bytes(data[base..base + 4].try_into().unwrap())
    }

    fn store_u32(&self, data: &mut [u8], byte_offset: usize, value: u32) {
        let base = self.offset + byte_offset;
        data[base..base + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn load_dictionary(&self, data: &[u8]) -> (u32, u32) {
        (self.load_u32(data, 0), self.load_u32(data, 4))
    }

    fn store_dictionary(&self, data: &mut [u8], size: u32, end: u32) {
        self.store_u32(data, 0, size);
        self.store_u32(data, 4, end);
    }

    fn load_string_offset(&self, data: &[u8], row: usize) -> i32 {
        self.load_u32(data, DICTIONARY_HEADER_SIZE + row * 4) as i32
    }

    fn store_string_offset(&self, data: &mut [u8], row: usize, value: i32) {
        self.store_u32(data, DICTIONARY_HEADER_SIZE + row * 4, value as u32);
    }

    fn scan_string(
        &self,
        handle: &BufferHandle,
        state: &ColumnScanState,
        scan_count: usize,
        result: &mut Vector,
        result_offset: usize,
    ) -> StorageResult<()> {
        let start = self.relative_index(state.row_index);
        let data = handle.read();
        let (_, dict_end) = self.load_dictionary(&data);
        result.set_kind(VectorKind::Flat);

        let mut previous_offset = if start > 0 {
            self.load_string_offset(&data, start - 1)
        } else {
            0
        };
        let mut strings = Vec::with_capacity(scan_count);
        for i in 0..scan_count {
            let dict_offset = self.load_string_offset(&data, start + i);
            let length = (dict_offset.unsigned_abs() - previous_offset.unsigned_abs()) as usize;
            strings.push(self.fetch_string_from_dict(&data, dict_end, dict_offset, length)?);
            previous_offset = dict_offset;
        }
        let out = result.strings_mut();
        for (i, s) in strings.into_iter().enumerate() {
            out[result_offset + i] = s;
        }
        Ok(())
    }

    fn fetch_string_from_dict(
        &self,
        data: &[u8],
        dict_end: u32,
        dict_offset: i32,
        length: usize,
    ) -> StorageResult<String> {
        if dict_offset >= 0 {
            if dict_offset == 0 {
                return Ok(String::new());
            }
            let base = self.offset + dict_end as usize - dict_offset as usize;
            Ok(String::from_utf8_lossy(&data[base..base + length]).into_owned())
        } else {
            let marker_pos = self.offset + dict_end as usize - dict_offset.unsigned_abs() as usize;
            let mut marker = &data[marker_pos..marker_pos + BIG_STRING_MARKER_SIZE];
            let block_id = marker.get_u32_le();
            let block_offset = marker.get_i32_le() as usize;
            self.read_overflow_string(block_id, block_offset)
        }
    }

    fn read_overflow_string(&self, block_id: u32, block_offset: usize) -> StorageResult<String> {
        let state = self
            .string_state
            .as_ref()
            .ok_or_else(|| StorageError::internal("overflow marker on a non-string segment"))?
            .lock();
        let block = state.handles.get(&block_id).ok_or_else(|| {
            StorageError::internal(format!("unknown string overflow block {block_id}"))
        })?;
        let handle = self.buffer_manager.pin(block);
        let data = handle.read();
        let mut slice = &data[block_offset..];
        let length = slice.get_u32_le() as usize;
        Ok(String::from_utf8_lossy(&slice[..length]).into_owned())
    }

    // ===== point lookups =====

    pub fn fetch_row(
        &self,
        state: &mut ColumnFetchState,
        row_id: u64,
        result: &mut Vector,
        result_idx: usize,
    ) -> StorageResult<()> {
        let row = self.relative_index(row_id);
        match self.physical {
            PhysicalType::Bool | PhysicalType::Int8 => {
                self.fetch_fixed::<i8>(row, result, result_idx)
            }
            PhysicalType::Int16 => self.fetch_fixed::<i16>(row, result, result_idx),
            PhysicalType::Int32 => self.fetch_fixed::<i32>(row, result, result_idx),
            PhysicalType::Int64 => self.fetch_fixed::<i64>(row, result, result_idx),
            PhysicalType::UInt8 => self.fetch_fixed::<u8>(row, result, result_idx),
            PhysicalType::UInt16 => self.fetch_fixed::<u16>(row, result, result_idx),
            PhysicalType::UInt32 => self.fetch_fixed::<u32>(row, result, result_idx),
            PhysicalType::UInt64 | PhysicalType::List => {
                self.fetch_fixed::<u64>(row, result, result_idx)
            }
            PhysicalType::Float32 => self.fetch_fixed::<f32>(row, result, result_idx),
            PhysicalType::Float64 => self.fetch_fixed::<f64>(row, result, result_idx),
            PhysicalType::Bit => {
                let handle = self.buffer_manager.pin(&self.block);
                let data = handle.read();
                let word = self.load_word(&data, row / ValidityMask::BITS_PER_VALUE);
                if word & (1u64 << (row % ValidityMask::BITS_PER_VALUE)) == 0 {
                    result.validity_mut().set_invalid(result_idx);
                }
                Ok(())
            }
            PhysicalType::String => {
                let handle = state.get_or_insert_handle(&self.buffer_manager, self);
                let data = handle.read();
                let (_, dict_end) = self.load_dictionary(&data);
                let dict_offset = self.load_string_offset(&data, row);
                let length = if row == 0 {
                    dict_offset.unsigned_abs() as usize
                } else {
                    (dict_offset.unsigned_abs()
                        - self.load_string_offset(&data, row - 1).unsigned_abs())
                        as usize
                };
                let value = self.fetch_string_from_dict(&data, dict_end, dict_offset, length)?;
                drop(data);
                result.strings_mut()[result_idx] = value;
                Ok(())
            }
            PhysicalType::Struct | PhysicalType::Array => Err(StorageError::Unsupported(
                "struct and array columns have no value segments",
            )),
        }
    }

    fn fetch_fixed<T: NativeVector>(
        &self,
        row: usize,
        result: &mut Vector,
        result_idx: usize,
    ) -> StorageResult<()> {
        let handle = self.buffer_manager.pin(&self.block);
        let data = handle.read();
        let base = self.offset + row * T::WIDTH;
        let mut src = &data[base..base + T::WIDTH];
        let value = T::decode(&mut src);
        drop(data);
        result.data_mut::<T>()[result_idx] = value;
        Ok(())
    }

    // ===== appending =====

    pub fn initialize_append(&self, state: &mut ColumnAppendState) {
        state.handle = Some(self.buffer_manager.pin(&self.block));
    }

    /// Appends up to `count` rows of `uvf` starting at `offset`, returning
    /// how many fit.
    pub fn append(
        &self,
        state: &mut ColumnAppendState,
        uvf: &UnifiedFormat<'_>,
        offset: usize,
        count: usize,
    ) -> StorageResult<usize> {
        let handle = state
            .handle
            .as_ref()
            .ok_or_else(|| StorageError::internal("segment append without a pinned block"))?;
        match self.physical {
            PhysicalType::Bool | PhysicalType::Int8 => {
                self.append_fixed::<i8>(handle, uvf, offset, count)
            }
            PhysicalType::Int16 => self.append_fixed::<i16>(handle, uvf, offset, count),
            PhysicalType::Int32 => self.append_fixed::<i32>(handle, uvf, offset, count),
            PhysicalType::Int64 => self.append_fixed::<i64>(handle, uvf, offset, count),
            PhysicalType::UInt8 => self.append_fixed::<u8>(handle, uvf, offset, count),
            PhysicalType::UInt16 => self.append_fixed::<u16>(handle, uvf, offset, count),
            PhysicalType::UInt32 => self.append_fixed::<u32>(handle, uvf, offset, count),
            PhysicalType::UInt64 => self.append_fixed::<u64>(handle, uvf, offset, count),
            PhysicalType::Float32 => self.append_fixed::<f32>(handle, uvf, offset, count),
            PhysicalType::Float64 => self.append_fixed::<f64>(handle, uvf, offset, count),
            PhysicalType::List => self.append_list_offsets(handle, uvf, offset, count),
            PhysicalType::Bit => self.append_validity(handle, uvf, offset, count),
            PhysicalType::String => self.append_string(handle, uvf, offset, count),
            PhysicalType::Struct | PhysicalType::Array => Err(StorageError::Unsupported(
                "struct and array columns have no value segments",
            )),
        }
    }

    fn append_fixed<T: NativeVector>(
        &self,
        handle: &BufferHandle,
        uvf: &UnifiedFormat<'_>,
        offset: usize,
        count: usize,
    ) -> StorageResult<usize> {
        debug_assert_eq!(self.offset, 0);
        let base_count = self.count() as usize;
        let max_tuples = self.segment_size / T::WIDTH;
        let copy_count = count.min(max_tuples - base_count);

        let mut data = handle.write();
        let mut min: Option<T> = None;
        let mut max: Option<T> = None;
        for i in 0..copy_count {
            let source_idx = offset + i;
            let value = if uvf.is_valid(source_idx) {
                let v = uvf.get::<T>(source_idx);
                min = Some(match min {
                    Some(m) if m <= v => m,
                    _ => v,
                });
                max = Some(match max {
                    Some(m) if m >= v => m,
                    _ => v,
                });
                v
            } else {
                T::default()
            };
            let target = self.offset + (base_count + i) * T::WIDTH;
            let mut slot = &mut data[target..target + T::WIDTH];
            value.encode(&mut slot);
        }
        drop(data);
        self.merge_stats(min.map(T::to_value), max.map(T::to_value));
        self.count.fetch_add(copy_count as u64, Ordering::AcqRel);
        Ok(copy_count)
    }

    /// List rows append their `u64` child end offset; validity is tracked by
    /// the list's validity column, so null rows still write their offset.
    fn append_list_offsets(
        &self,
        handle: &BufferHandle,
        uvf: &UnifiedFormat<'_>,
        offset: usize,
        count: usize,
    ) -> StorageResult<usize> {
        debug_assert_eq!(self.offset, 0);
        let base_count = self.count() as usize;
        let max_tuples = self.segment_size / std::mem::size_of::<u64>();
        let copy_count = count.min(max_tuples - base_count);

        let mut data = handle.write();
        for i in 0..copy_count {
            let value = uvf.get::<u64>(offset + i);
            let target = self.offset + (base_count + i) * 8;
            data[target..target + 8].copy_from_slice(&value.to_le_bytes());
        }
        drop(data);
        self.count.fetch_add(copy_count as u64, Ordering::AcqRel);
        Ok(copy_count)
    }

    fn append_validity(
        &self,
        handle: &BufferHandle,
        uvf: &UnifiedFormat<'_>,
        offset: usize,
        count: usize,
    ) -> StorageResult<usize> {
        debug_assert_eq!(self.offset, 0);
        let base_count = self.count() as usize;
        let max_tuples = self.segment_size / ValidityMask::STANDARD_MASK_SIZE
            * crate::vector::DEFAULT_VECTOR_CAPACITY;
        let append_count = count.min(max_tuples - base_count);
        if uvf.all_valid() {
            self.count.fetch_add(append_count as u64, Ordering::AcqRel);
            return Ok(append_count);
        }
        let mut data = handle.write();
        for i in 0..append_count {
            if !uvf.is_valid(offset + i) {
                let bit = base_count + i;
                let byte = self.offset + bit / 8;
                data[byte] &= !(1u8 << (bit % 8));
            }
        }
        drop(data);
        self.count.fetch_add(append_count as u64, Ordering::AcqRel);
        Ok(append_count)
    }

    fn append_string(
        &self,
        handle: &BufferHandle,
        uvf: &UnifiedFormat<'_>,
        offset: usize,
        count: usize,
    ) -> StorageResult<usize> {
        debug_assert_eq!(self.offset, 0);
        let block_size = self.buffer_manager.block_size();
        let mut data = handle.write();
        let (mut dict_size, dict_end) = self.load_dictionary(&data);
        debug_assert_eq!(dict_end as usize, self.segment_size);

        let base_count = self.count() as usize;
        let used = dict_size as usize + base_count * 4 + DICTIONARY_HEADER_SIZE;
        let mut remaining = self.segment_size - used;

        for i in 0..count {
            let source_idx = offset + i;
            let target_idx = base_count + i;
            if remaining < 4 {
                self.store_dictionary(&mut data, dict_size, dict_end);
                self.count.fetch_add(i as u64, Ordering::AcqRel);
                return Ok(i);
            }
            remaining -= 4;
            if !uvf.is_valid(source_idx) {
                let previous = if target_idx > 0 {
                    self.load_string_offset(&data, target_idx - 1)
                } else {
                    0
                };
                self.store_string_offset(&mut data, target_idx, previous);
                continue;
            }

            let value = uvf.str_at(source_idx);
            let string_length = value.len();
            let use_overflow = string_length >= string_block_limit(block_size);
            let required_space = if use_overflow {
                BIG_STRING_MARKER_SIZE
            } else {
                string_length
            };
            if required_space > remaining {
                // Undo the offset-slot reservation for this row.
                self.store_dictionary(&mut data, dict_size, dict_end);
                self.count.fetch_add(i as u64, Ordering::AcqRel);
                return Ok(i);
            }

            if use_overflow {
                let (overflow_block, overflow_offset) = self.write_overflow_string(value)?;
                dict_size += BIG_STRING_MARKER_SIZE as u32;
                remaining -= BIG_STRING_MARKER_SIZE;
                let dict_pos = self.offset + dict_end as usize - dict_size as usize;
                data[dict_pos..dict_pos + 4].copy_from_slice(&overflow_block.to_le_bytes());
                data[dict_pos + 4..dict_pos + 8].copy_from_slice(&overflow_offset.to_le_bytes());
                self.store_string_offset(&mut data, target_idx, -(dict_size as i32));
            } else {
                dict_size += required_space as u32;
                remaining -= required_space;
                let dict_pos = self.offset + dict_end as usize - dict_size as usize;
                data[dict_pos..dict_pos + string_length].copy_from_slice(value.as_bytes());
                self.store_string_offset(&mut data, target_idx, dict_size as i32);
            }
            debug_assert!(dict_size as usize <= block_size);
        }
        self.store_dictionary(&mut data, dict_size, dict_end);
        self.count.fetch_add(count as u64, Ordering::AcqRel);
        Ok(count)
    }

    /// Writes a long string into an overflow block, returning the marker
    /// target `{block_id, offset}`.
    fn write_overflow_string(&self, value: &str) -> StorageResult<(u32, i32)> {
        let mut state = self
            .string_state
            .as_ref()
            .ok_or_else(|| StorageError::internal("overflow write on a non-string segment"))?
            .lock();
        let total_length = value.len() + std::mem::size_of::<u32>();

        let needs_new_block = match &state.head {
            None => true,
            Some(head) => head.offset + total_length >= head.size,
        };
        if needs_new_block {
            let alloc_size = total_length.max(self.buffer_manager.block_size());
            let handle = self
                .buffer_manager
                .allocate(MemoryTag::OverflowStrings, alloc_size);
            let block = handle.block().clone();
            state.handles.insert(block.id(), block.clone());
            state.head = Some(Box::new(StringOverflowBlock {
                block,
                offset: 0,
                size: alloc_size,
                next: state.head.take(),
            }));
        }

        let head = state.head.as_mut().unwrap();
        let result_block = head.block.id();
        let result_offset = head.offset as i32;

        let handle = self.buffer_manager.pin(&head.block);
        let mut data = handle.write();
        let mut target = &mut data[head.offset..];
        target.put_u32_le(value.len() as u32);
        target.put_slice(value.as_bytes());
        drop(data);
        head.offset += total_length;
        Ok((result_block, result_offset))
    }

    /// Truncates the segment back to `start_row`. Validity segments restore
    /// the reverted bits to valid; string segments shrink the dictionary to
    /// the surviving prefix.
    pub fn revert_append(&self, start_row: u64) {
        let new_count = (start_row - self.start()) as usize;
        match self.physical {
            PhysicalType::Bit => {
                let handle = self.buffer_manager.pin(&self.block);
                let mut data = handle.write();
                let start_bit = new_count;
                let revert_start = if start_bit % 8 != 0 {
                    let byte_pos = start_bit / 8;
                    let bit_end = (byte_pos + 1) * 8;
                    for i in start_bit..bit_end {
                        data[self.offset + i / 8] |= 1u8 << (i % 8);
                    }
                    bit_end / 8
                } else {
                    start_bit / 8
                };
                data[self.offset + revert_start..self.offset + self.segment_size].fill(0xFF);
            }
            PhysicalType::String => {
                let handle = self.buffer_manager.pin(&self.block);
                let mut data = handle.write();
                let (_, dict_end) = self.load_dictionary(&data);
                let dict_size = if new_count > 0 {
                    self.load_string_offset(&data, new_count - 1).unsigned_abs()
                } else {
                    0
                };
                self.store_dictionary(&mut data, dict_size, dict_end);
            }
            _ => {}
        }
        self.count.store(new_count as u64, Ordering::Release);
    }

    fn merge_stats(&self, min: Option<DataValue>, max: Option<DataValue>) {
        if min.is_none() && max.is_none() {
            return;
        }
        let mut stats = self.stats.lock();
        if let Some(min) = min {
            stats.min = Some(match stats.min.take() {
                Some(current) if current <= min => current,
                _ => min,
            });
        }
        if let Some(max) = max {
            stats.max = Some(match stats.max.take() {
                Some(current) if current >= max => current,
                _ => max,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::vector::DEFAULT_VECTOR_CAPACITY;

    use super::*;

    fn test_segment(ty: LogicalType, segment_size: usize) -> (Arc<BufferManager>, Arc<ColumnSegment>) {
        let manager = BufferManager::new(64 * 1024);
        let segment = ColumnSegment::create(manager.clone(), ty, 0, segment_size);
        (manager, segment)
    }

    fn append_vector(segment: &ColumnSegment, vector: &Vector, count: usize) -> usize {
        let mut state = ColumnAppendState::default();
        segment.initialize_append(&mut state);
        let uvf = vector.to_unified(count);
        segment.append(&mut state, &uvf, 0, count).unwrap()
    }

    fn scan_all(segment: &ColumnSegment, ty: LogicalType, count: usize) -> Vector {
        let mut state = ColumnScanState {
            row_index: 0,
            ..Default::default()
        };
        segment.initialize_scan(&mut state);
        let mut result = Vector::with_capacity(ty, DEFAULT_VECTOR_CAPACITY);
        segment.scan(&state, count, &mut result, 0).unwrap();
        result
    }

    #[test]
    fn fixed_width_roundtrip() {
        let (_m, segment) = test_segment(LogicalType::BigInt, 4096);
        assert_eq!(segment.segment_size(), 4096);
        let vector = Vector::from_values(
            LogicalType::BigInt,
            &[
                DataValue::Int64(1),
                DataValue::Int64(-2),
                DataValue::Int64(300),
            ],
        );
        assert_eq!(append_vector(&segment, &vector, 3), 3);
        let result = scan_all(&segment, LogicalType::BigInt, 3);
        assert_eq!(result.data::<i64>()[..3], [1, -2, 300]);
        assert_eq!(
            segment.zonemap(),
            Some((DataValue::Int64(-2), DataValue::Int64(300)))
        );
    }

    #[test]
    fn fixed_width_capacity_bound() {
        let (_m, segment) = test_segment(LogicalType::BigInt, 32);
        let vector = Vector::from_values(
            LogicalType::BigInt,
            &(0..6).map(DataValue::Int64).collect::<Vec<_>>(),
        );
        // 32 bytes fit four i64 rows.
        assert_eq!(append_vector(&segment, &vector, 6), 4);
        assert_eq!(segment.count(), 4);
    }

    #[test]
    fn validity_bitmap_roundtrip() {
        let (_m, segment) = test_segment(LogicalType::Validity, ValidityMask::STANDARD_MASK_SIZE);
        let mut vector = Vector::with_capacity(LogicalType::BigInt, 8);
        for i in 0..8 {
            vector.set_value(i, &DataValue::Int64(i as i64));
        }
        vector.validity_mut().set_invalid(2);
        vector.validity_mut().set_invalid(7);
        assert_eq!(append_vector(&segment, &vector, 8), 8);

        let result = scan_all(&segment, LogicalType::BigInt, 8);
        assert!(!result.validity().row_is_valid(2));
        assert!(!result.validity().row_is_valid(7));
        assert!(result.validity().row_is_valid(0));
        assert!(result.validity().row_is_valid(6));
    }

    #[test]
    fn validity_revert_restores_bits() {
        let (_m, segment) = test_segment(LogicalType::Validity, ValidityMask::STANDARD_MASK_SIZE);
        let mut vector = Vector::with_capacity(LogicalType::BigInt, 10);
        for i in 0..10 {
            vector.set_value(i, &DataValue::Null);
        }
        assert_eq!(append_vector(&segment, &vector, 10), 10);
        segment.revert_append(3);
        assert_eq!(segment.count(), 3);

        let result = scan_all(&segment, LogicalType::BigInt, 3);
        assert!(!result.validity().row_is_valid(0));
        assert!(!result.validity().row_is_valid(2));
        // Bits beyond the revert point went back to valid.
        let mut state = ColumnScanState::default();
        segment.initialize_scan(&mut state);
        let mut fresh = Vector::with_capacity(LogicalType::BigInt, DEFAULT_VECTOR_CAPACITY);
        // Pretend three more rows were appended as valid.
        let all_valid = Vector::from_values(
            LogicalType::BigInt,
            &[DataValue::Int64(0), DataValue::Int64(0), DataValue::Int64(0)],
        );
        append_vector(&segment, &all_valid, 3);
        segment.scan(&state, 6, &mut fresh, 0).unwrap();
        assert!(fresh.validity().row_is_valid(3));
        assert!(fresh.validity().row_is_valid(5));
    }

    #[test]
    fn string_dictionary_roundtrip() {
        let (_m, segment) = test_segment(LogicalType::Varchar, 4096);
        let vector = Vector::from_values(
            LogicalType::Varchar,
            &[
                DataValue::from("a"),
                DataValue::from("bb"),
                DataValue::Null,
                DataValue::from("ccc"),
            ],
        );
        assert_eq!(append_vector(&segment, &vector, 4), 4);
        let result = scan_all(&segment, LogicalType::Varchar, 4);
        assert_eq!(result.strings()[0], "a");
        assert_eq!(result.strings()[1], "bb");
        assert_eq!(result.strings()[3], "ccc");
        assert_eq!(result.strings()[0].len(), 1);
        assert_eq!(result.strings()[1].len(), 2);
        assert_eq!(result.strings()[3].len(), 3);
    }

    #[test]
    fn string_overflow_block() {
        let manager = BufferManager::new(8 * 1024);
        let segment = ColumnSegment::create(manager, LogicalType::Varchar, 0, 8 * 1024);
        // Above the overflow limit for an 8 KiB block (8192 / 4 = 2048).
        let long = "x".repeat(3000);
        let vector = Vector::from_values(
            LogicalType::Varchar,
            &[DataValue::from("short"), DataValue::String(long.clone())],
        );
        let mut state = ColumnAppendState::default();
        segment.initialize_append(&mut state);
        let uvf = vector.to_unified(2);
        assert_eq!(segment.append(&mut state, &uvf, 0, 2).unwrap(), 2);

        let result = scan_all(&segment, LogicalType::Varchar, 2);
        assert_eq!(result.strings()[0], "short");
        assert_eq!(result.strings()[1], long);
    }

    #[test]
    fn string_fetch_row() {
        let (m, segment) = test_segment(LogicalType::Varchar, 4096);
        let vector = Vector::from_values(
            LogicalType::Varchar,
            &[DataValue::from("left"), DataValue::from("right")],
        );
        append_vector(&segment, &vector, 2);
        let _ = m;
        let mut fetch = ColumnFetchState::default();
        let mut result = Vector::with_capacity(LogicalType::Varchar, 4);
        segment.fetch_row(&mut fetch, 1, &mut result, 0).unwrap();
        assert_eq!(result.strings()[0], "right");
    }
}
