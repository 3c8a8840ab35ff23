// Copyright 2025 Mica Project Authors. Licensed under Apache-2.0.

//! The per-column undo chain layered above immutable base segment data.
//!
//! Updates never overwrite committed base bytes. Per vector-chunk the chain
//! root (the *base* info) holds the committed value of every row that was
//! ever updated in the chunk; each outstanding `update` call links one node
//! holding that update's new values behind it. Regular reads replay the
//! whole chain onto the scanned base vector, committed reads apply the base
//! only, and commit folds a node's values into the base before unlinking it.
//!
//! Chain records live in a generation-checked arena: a stale [`UndoRef`]
//! into a reclaimed slot fails a checked lookup instead of reading reused
//! memory.

use crate::types::{NativeType, PhysicalType};
use crate::vector::{NativeVector, Vector, DEFAULT_VECTOR_CAPACITY};

use super::{StorageError, StorageResult};

/// Handle into the undo arena: slot index plus the generation the slot had
/// when the record was allocated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UndoRef {
    slot: u32,
    generation: u32,
}

struct UndoSlot {
    generation: u32,
    info: Option<UpdateInfo>,
}

#[derive(Default)]
struct UndoArena {
    slots: Vec<UndoSlot>,
    free: Vec<u32>,
}

impl UndoArena {
    fn allocate(&mut self, info: UpdateInfo) -> UndoRef {
        if let Some(slot) = self.free.pop() {
            let entry = &mut self.slots[slot as usize];
            entry.info = Some(info);
            UndoRef {
                slot,
                generation: entry.generation,
            }
        } else {
            let slot = self.slots.len() as u32;
            self.slots.push(UndoSlot {
                generation: 0,
                info: Some(info),
            });
            UndoRef {
                slot,
                generation: 0,
            }
        }
    }

    fn get(&self, r: UndoRef) -> StorageResult<&UpdateInfo> {
        self.slots
            .get(r.slot as usize)
            .filter(|s| s.generation == r.generation)
            .and_then(|s| s.info.as_ref())
            .ok_or_else(|| StorageError::internal("stale undo chain reference"))
    }

    fn get_mut(&mut self, r: UndoRef) -> StorageResult<&mut UpdateInfo> {
        self.slots
            .get_mut(r.slot as usize)
            .filter(|s| s.generation == r.generation)
            .and_then(|s| s.info.as_mut())
            .ok_or_else(|| StorageError::internal("stale undo chain reference"))
    }

    fn free(&mut self, r: UndoRef) -> StorageResult<UpdateInfo> {
        let slot = self
            .slots
            .get_mut(r.slot as usize)
            .filter(|s| s.generation == r.generation)
            .ok_or_else(|| StorageError::internal("stale undo chain reference"))?;
        let info = slot
            .info
            .take()
            .ok_or_else(|| StorageError::internal("double free of undo chain slot"))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(r.slot);
        Ok(info)
    }
}

/// Typed payload of one update record.
#[derive(Clone, Debug)]
enum UpdateValues {
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    UInt8(Vec<u8>),
    UInt16(Vec<u16>),
    UInt32(Vec<u32>),
    UInt64(Vec<u64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    String(Vec<String>),
    Validity(Vec<bool>),
}

/// One update event: a sorted, deduplicated tuple-id array with the matching
/// values, linked into the per-chunk chain.
pub struct UpdateInfo {
    #[allow(dead_code)]
    column_index: u64,
    vector_index: u64,
    /// Chunk-relative row offsets, strictly increasing.
    tuples: Vec<u32>,
    values: UpdateValues,
    prev: Option<UndoRef>,
    next: Option<UndoRef>,
}

macro_rules! dispatch_values {
    ($values:expr, $prim:ident, $str_fn:ident, $bit_fn:ident, ($($args:tt)*)) => {
        match $values {
            UpdateValues::Int8(v) => $prim::<i8>(v, $($args)*),
            UpdateValues::Int16(v) => $prim::<i16>(v, $($args)*),
            UpdateValues::Int32(v) => $prim::<i32>(v, $($args)*),
            UpdateValues::Int64(v) => $prim::<i64>(v, $($args)*),
            UpdateValues::UInt8(v) => $prim::<u8>(v, $($args)*),
            UpdateValues::UInt16(v) => $prim::<u16>(v, $($args)*),
            UpdateValues::UInt32(v) => $prim::<u32>(v, $($args)*),
            UpdateValues::UInt64(v) => $prim::<u64>(v, $($args)*),
            UpdateValues::Float32(v) => $prim::<f32>(v, $($args)*),
            UpdateValues::Float64(v) => $prim::<f64>(v, $($args)*),
            UpdateValues::String(v) => $str_fn(v, $($args)*),
            UpdateValues::Validity(v) => $bit_fn(v, $($args)*),
        }
    };
}

fn apply_full<T: NativeVector>(values: &[T], tuples: &[u32], result: &mut Vector) {
    let data = result.data_mut::<T>();
    for (tuple, value) in tuples.iter().zip(values) {
        data[*tuple as usize] = *value;
    }
}

fn apply_full_string(values: &[String], tuples: &[u32], result: &mut Vector) {
    let data = result.strings_mut();
    for (tuple, value) in tuples.iter().zip(values) {
        data[*tuple as usize] = value.clone();
    }
}

fn apply_full_validity(values: &[bool], tuples: &[u32], result: &mut Vector) {
    let validity = result.validity_mut();
    for (tuple, value) in tuples.iter().zip(values) {
        validity.set(*tuple as usize, *value);
    }
}

fn apply_range<T: NativeVector>(
    values: &[T],
    tuples: &[u32],
    start: usize,
    end: usize,
    result_offset: usize,
    result: &mut Vector,
) {
    let data = result.data_mut::<T>();
    for (tuple, value) in tuples.iter().zip(values) {
        let tuple = *tuple as usize;
        if tuple < start {
            continue;
        }
        if tuple >= end {
            break;
        }
        data[result_offset + tuple - start] = *value;
    }
}

fn apply_range_string(
    values: &[String],
    tuples: &[u32],
    start: usize,
    end: usize,
    result_offset: usize,
    result: &mut Vector,
) {
    let data = result.strings_mut();
    for (tuple, value) in tuples.iter().zip(values) {
        let tuple = *tuple as usize;
        if tuple < start {
            continue;
        }
        if tuple >= end {
            break;
        }
        data[result_offset + tuple - start] = value.clone();
    }
}

fn apply_range_validity(
    values: &[bool],
    tuples: &[u32],
    start: usize,
    end: usize,
    result_offset: usize,
    result: &mut Vector,
) {
    let validity = result.validity_mut();
    for (tuple, value) in tuples.iter().zip(values) {
        let tuple = *tuple as usize;
        if tuple < start {
            continue;
        }
        if tuple >= end {
            break;
        }
        validity.set(result_offset + tuple - start, *value);
    }
}

fn apply_row<T: NativeVector>(
    values: &[T],
    tuples: &[u32],
    row: u32,
    result: &mut Vector,
    result_idx: usize,
) {
    if let Ok(pos) = tuples.binary_search(&row) {
        result.data_mut::<T>()[result_idx] = values[pos];
    }
}

fn apply_row_string(
    values: &[String],
    tuples: &[u32],
    row: u32,
    result: &mut Vector,
    result_idx: usize,
) {
    if let Ok(pos) = tuples.binary_search(&row) {
        result.strings_mut()[result_idx] = values[pos].clone();
    }
}

fn apply_row_validity(
    values: &[bool],
    tuples: &[u32],
    row: u32,
    result: &mut Vector,
    result_idx: usize,
) {
    if let Ok(pos) = tuples.binary_search(&row) {
        result.validity_mut().set(result_idx, values[pos]);
    }
}

impl UpdateInfo {
    fn apply(&self, result: &mut Vector) {
        dispatch_values!(
            &self.values,
            apply_full,
            apply_full_string,
            apply_full_validity,
            (&self.tuples, result)
        );
    }

    fn apply_window(&self, start: usize, end: usize, result_offset: usize, result: &mut Vector) {
        dispatch_values!(
            &self.values,
            apply_range,
            apply_range_string,
            apply_range_validity,
            (&self.tuples, start, end, result_offset, result)
        );
    }

    fn apply_row(&self, row: u32, result: &mut Vector, result_idx: usize) {
        dispatch_values!(
            &self.values,
            apply_row,
            apply_row_string,
            apply_row_validity,
            (&self.tuples, row, result, result_idx)
        );
    }
}

/// Where a merged base entry takes its value from.
enum MergeSource {
    /// Keep the existing base entry at this position.
    Base(usize),
    /// Pull the current value of this chunk-relative row forward from the
    /// scanned base vector.
    Pull(usize),
}

fn values_from_vector<T: NativeVector>(vector: &Vector, rows: &[usize]) -> Vec<T> {
    let data = vector.data::<T>();
    rows.iter().map(|r| data[*r]).collect()
}

fn make_update_values(
    physical: PhysicalType,
    vector: &Vector,
    rows: &[usize],
) -> StorageResult<UpdateValues> {
    Ok(match physical {
        PhysicalType::Bool | PhysicalType::Int8 => {
            UpdateValues::Int8(values_from_vector::<i8>(vector, rows))
        }
        PhysicalType::Int16 => UpdateValues::Int16(values_from_vector::<i16>(vector, rows)),
        PhysicalType::Int32 => UpdateValues::Int32(values_from_vector::<i32>(vector, rows)),
        PhysicalType::Int64 => UpdateValues::Int64(values_from_vector::<i64>(vector, rows)),
        PhysicalType::UInt8 => UpdateValues::UInt8(values_from_vector::<u8>(vector, rows)),
        PhysicalType::UInt16 => UpdateValues::UInt16(values_from_vector::<u16>(vector, rows)),
        PhysicalType::UInt32 => UpdateValues::UInt32(values_from_vector::<u32>(vector, rows)),
        PhysicalType::UInt64 => UpdateValues::UInt64(values_from_vector::<u64>(vector, rows)),
        PhysicalType::Float32 => UpdateValues::Float32(values_from_vector::<f32>(vector, rows)),
        PhysicalType::Float64 => UpdateValues::Float64(values_from_vector::<f64>(vector, rows)),
        PhysicalType::String => UpdateValues::String(
            rows.iter()
                .map(|r| vector.strings()[*r].clone())
                .collect(),
        ),
        PhysicalType::Bit => UpdateValues::Validity(
            rows.iter()
                .map(|r| vector.validity().row_is_valid(*r))
                .collect(),
        ),
        _ => {
            return Err(StorageError::Unsupported(
                "unhandled physical type in update segment",
            ))
        }
    })
}

fn rebuild_merged<T: NativeType + NativeVector>(
    old: &[T],
    base_vector: &Vector,
    plan: &[(u32, MergeSource)],
) -> Vec<T> {
    plan.iter()
        .map(|(_, source)| match source {
            MergeSource::Base(i) => old[*i],
            MergeSource::Pull(row) => base_vector.data::<T>()[*row],
        })
        .collect()
}

/// The undo chains of one column, one per vector chunk.
pub struct UpdateSegment {
    physical: PhysicalType,
    arena: UndoArena,
    /// Base (root) record per vector chunk.
    info: Vec<Option<UndoRef>>,
}

impl UpdateSegment {
    pub fn new(physical: PhysicalType) -> Self {
        Self {
            physical,
            arena: UndoArena::default(),
            info: vec![],
        }
    }

    fn base_ref(&self, vector_index: u64) -> Option<UndoRef> {
        self.info.get(vector_index as usize).copied().flatten()
    }

    pub fn has_updates(&self) -> bool {
        self.info.iter().any(|i| i.is_some())
    }

    pub fn has_updates_vector(&self, vector_index: u64) -> bool {
        self.base_ref(vector_index).is_some()
    }

    pub fn has_updates_range(&self, start_row: u64, end_row: u64) -> bool {
        let base_vector_index = start_row / DEFAULT_VECTOR_CAPACITY as u64;
        let end_vector_index = end_row / DEFAULT_VECTOR_CAPACITY as u64;
        (base_vector_index..=end_vector_index).any(|i| self.has_updates_vector(i))
    }

    /// Whether any update in the chunk is still uncommitted (a chain node
    /// hangs behind the base).
    pub fn has_uncommitted_updates(&self, vector_index: u64) -> StorageResult<bool> {
        match self.base_ref(vector_index) {
            None => Ok(false),
            Some(base) => Ok(self.arena.get(base)?.next.is_some()),
        }
    }

    /// Registers an update of `row_ids` to the values in `update_vector`.
    ///
    /// All row ids must fall into one vector chunk (callers partition by
    /// chunk). `base_vector` holds the scanned current values of that chunk
    /// and provides the pre-images pulled forward into the base record.
    pub fn update(
        &mut self,
        column_index: u64,
        update_vector: &Vector,
        row_ids: &[i64],
        base_vector: &Vector,
        column_start: u64,
    ) -> StorageResult<()> {
        if row_ids.is_empty() {
            return Ok(());
        }
        let sel = sorted_unique_sel(row_ids);

        let first_id = row_ids[sel[0] as usize] as u64;
        debug_assert!(first_id >= column_start);
        let vector_index = (first_id - column_start) / DEFAULT_VECTOR_CAPACITY as u64;
        let vector_offset = column_start + vector_index * DEFAULT_VECTOR_CAPACITY as u64;

        let tuples: Vec<u32> = sel
            .iter()
            .map(|i| {
                let id = row_ids[*i as usize] as u64;
                debug_assert!(
                    id >= vector_offset && id < vector_offset + DEFAULT_VECTOR_CAPACITY as u64
                );
                (id - vector_offset) as u32
            })
            .collect();
        let update_rows: Vec<usize> = sel.iter().map(|i| *i as usize).collect();

        if self.info.len() <= vector_index as usize {
            self.info.resize(vector_index as usize + 1, None);
        }

        match self.info[vector_index as usize] {
            Some(base_ref) => {
                self.check_for_conflicts(self.arena.get(base_ref)?.next, &tuples)?;

                let node = UpdateInfo {
                    column_index,
                    vector_index,
                    tuples: tuples.clone(),
                    values: make_update_values(self.physical, update_vector, &update_rows)?,
                    prev: Some(base_ref),
                    next: self.arena.get(base_ref)?.next,
                };
                let old_next = node.next;
                let node_ref = self.arena.allocate(node);
                if let Some(next_ref) = old_next {
                    self.arena.get_mut(next_ref)?.prev = Some(node_ref);
                }
                self.arena.get_mut(base_ref)?.next = Some(node_ref);

                self.merge_base(base_ref, base_vector, &tuples)?;
            }
            None => {
                let pull_rows: Vec<usize> = tuples.iter().map(|t| *t as usize).collect();
                let base = UpdateInfo {
                    column_index,
                    vector_index,
                    tuples: tuples.clone(),
                    values: make_update_values(self.physical, base_vector, &pull_rows)?,
                    prev: None,
                    next: None,
                };
                let base_ref = self.arena.allocate(base);
                let node = UpdateInfo {
                    column_index,
                    vector_index,
                    tuples,
                    values: make_update_values(self.physical, update_vector, &update_rows)?,
                    prev: Some(base_ref),
                    next: None,
                };
                let node_ref = self.arena.allocate(node);
                self.arena.get_mut(base_ref)?.next = Some(node_ref);
                self.info[vector_index as usize] = Some(base_ref);
            }
        }
        Ok(())
    }

    /// Walks the outstanding chain and errors if any incoming row id already
    /// has a pending update.
    fn check_for_conflicts(
        &self,
        mut next: Option<UndoRef>,
        tuples: &[u32],
    ) -> StorageResult<()> {
        while let Some(node_ref) = next {
            let node = self.arena.get(node_ref)?;
            let (mut i, mut j) = (0, 0);
            while i < tuples.len() && j < node.tuples.len() {
                match tuples[i].cmp(&node.tuples[j]) {
                    std::cmp::Ordering::Equal => {
                        return Err(StorageError::Conflict("Conflict on update!"));
                    }
                    std::cmp::Ordering::Less => i += 1,
                    std::cmp::Ordering::Greater => j += 1,
                }
            }
            next = node.next;
        }
        Ok(())
    }

    /// Sorted merge-join of the incoming id list with the base id list:
    /// ids new to the base pull their current value forward from the scanned
    /// base vector, existing entries keep their recorded committed value.
    fn merge_base(
        &mut self,
        base_ref: UndoRef,
        base_vector: &Vector,
        incoming: &[u32],
    ) -> StorageResult<()> {
        let base = self.arena.get_mut(base_ref)?;
        let mut plan: Vec<(u32, MergeSource)> =
            Vec::with_capacity(base.tuples.len() + incoming.len());
        let (mut a, mut b) = (0, 0);
        while a < incoming.len() && b < base.tuples.len() {
            match incoming[a].cmp(&base.tuples[b]) {
                std::cmp::Ordering::Equal => {
                    plan.push((base.tuples[b], MergeSource::Base(b)));
                    a += 1;
                    b += 1;
                }
                std::cmp::Ordering::Less => {
                    plan.push((incoming[a], MergeSource::Pull(incoming[a] as usize)));
                    a += 1;
                }
                std::cmp::Ordering::Greater => {
                    plan.push((base.tuples[b], MergeSource::Base(b)));
                    b += 1;
                }
            }
        }
        for &id in &incoming[a..] {
            plan.push((id, MergeSource::Pull(id as usize)));
        }
        for (offset, &id) in base.tuples[b..].iter().enumerate() {
            plan.push((id, MergeSource::Base(b + offset)));
        }

        base.values = match &base.values {
            UpdateValues::Int8(old) => UpdateValues::Int8(rebuild_merged(old, base_vector, &plan)),
            UpdateValues::Int16(old) => {
                UpdateValues::Int16(rebuild_merged(old, base_vector, &plan))
            }
            UpdateValues::Int32(old) => {
                UpdateValues::Int32(rebuild_merged(old, base_vector, &plan))
            }
            UpdateValues::Int64(old) => {
                UpdateValues::Int64(rebuild_merged(old, base_vector, &plan))
            }
            UpdateValues::UInt8(old) => {
                UpdateValues::UInt8(rebuild_merged(old, base_vector, &plan))
            }
            UpdateValues::UInt16(old) => {
                UpdateValues::UInt16(rebuild_merged(old, base_vector, &plan))
            }
            UpdateValues::UInt32(old) => {
                UpdateValues::UInt32(rebuild_merged(old, base_vector, &plan))
            }
            UpdateValues::UInt64(old) => {
                UpdateValues::UInt64(rebuild_merged(old, base_vector, &plan))
            }
            UpdateValues::Float32(old) => {
                UpdateValues::Float32(rebuild_merged(old, base_vector, &plan))
            }
            UpdateValues::Float64(old) => {
                UpdateValues::Float64(rebuild_merged(old, base_vector, &plan))
            }
            UpdateValues::String(old) => UpdateValues::String(
                plan.iter()
                    .map(|(_, source)| match source {
                        MergeSource::Base(i) => old[*i].clone(),
                        MergeSource::Pull(row) => base_vector.strings()[*row].clone(),
                    })
                    .collect(),
            ),
            UpdateValues::Validity(old) => UpdateValues::Validity(
                plan.iter()
                    .map(|(_, source)| match source {
                        MergeSource::Base(i) => old[*i],
                        MergeSource::Pull(row) => base_vector.validity().row_is_valid(*row),
                    })
                    .collect(),
            ),
        };
        base.tuples = plan.iter().map(|(id, _)| *id).collect();
        Ok(())
    }

    /// Overlays the latest values (base plus every outstanding node) onto a
    /// scanned vector.
    pub fn fetch_updates(&self, vector_index: u64, result: &mut Vector) -> StorageResult<()> {
        let mut current = self.base_ref(vector_index);
        while let Some(node_ref) = current {
            let info = self.arena.get(node_ref)?;
            info.apply(result);
            current = info.next;
        }
        Ok(())
    }

    /// Overlays the committed values (base record only).
    pub fn fetch_committed(&self, vector_index: u64, result: &mut Vector) -> StorageResult<()> {
        if let Some(base_ref) = self.base_ref(vector_index) {
            self.arena.get(base_ref)?.apply(result);
        }
        Ok(())
    }

    /// Committed overlay restricted to the row window `[start_row,
    /// start_row + count)` of the column, for range scans.
    pub fn fetch_committed_range(
        &self,
        start_row: u64,
        count: u64,
        result: &mut Vector,
    ) -> StorageResult<()> {
        debug_assert!(count > 0);
        let cap = DEFAULT_VECTOR_CAPACITY as u64;
        let end_row = start_row + count;
        let start_vector = start_row / cap;
        let end_vector = (end_row - 1) / cap;
        for vector_index in start_vector..=end_vector {
            let Some(base_ref) = self.base_ref(vector_index) else {
                continue;
            };
            let start_in_vector = if vector_index == start_vector {
                start_row - start_vector * cap
            } else {
                0
            };
            let end_in_vector = if vector_index == end_vector {
                end_row - end_vector * cap
            } else {
                cap
            };
            debug_assert!(start_in_vector < end_in_vector);
            let result_offset = vector_index * cap + start_in_vector - start_row;
            self.arena.get(base_ref)?.apply_window(
                start_in_vector as usize,
                end_in_vector as usize,
                result_offset as usize,
                result,
            );
        }
        Ok(())
    }

    /// Replays the chain at one row for a point lookup.
    pub fn fetch_row(
        &self,
        row_id: u64,
        column_start: u64,
        result: &mut Vector,
        result_idx: usize,
    ) -> StorageResult<()> {
        let cap = DEFAULT_VECTOR_CAPACITY as u64;
        let vector_index = (row_id - column_start) / cap;
        let row_in_vector = ((row_id - column_start) - vector_index * cap) as u32;
        let mut current = self.base_ref(vector_index);
        while let Some(node_ref) = current {
            let info = self.arena.get(node_ref)?;
            info.apply_row(row_in_vector, result, result_idx);
            current = info.next;
        }
        Ok(())
    }

    /// Folds every outstanding node of the chunk into the base record (in
    /// chain order) and reclaims the nodes. After this the base holds the
    /// newly committed values.
    pub fn commit_updates(&mut self, vector_index: u64) -> StorageResult<()> {
        let Some(base_ref) = self.base_ref(vector_index) else {
            return Ok(());
        };
        let mut next = self.arena.get(base_ref)?.next;
        while let Some(node_ref) = next {
            let node = self.arena.free(node_ref)?;
            next = node.next;
            let base = self.arena.get_mut(base_ref)?;
            fold_into_base(base, &node)?;
        }
        self.arena.get_mut(base_ref)?.next = None;
        Ok(())
    }

    /// Drops every outstanding node of the chunk without folding, restoring
    /// the committed state. The base record stays.
    pub fn rollback_updates(&mut self, vector_index: u64) -> StorageResult<()> {
        let Some(base_ref) = self.base_ref(vector_index) else {
            return Ok(());
        };
        let mut next = self.arena.get(base_ref)?.next;
        while let Some(node_ref) = next {
            let node = self.arena.free(node_ref)?;
            next = node.next;
        }
        self.arena.get_mut(base_ref)?.next = None;
        Ok(())
    }

    /// Chunk indexes that currently carry any update state.
    pub fn updated_vectors(&self) -> Vec<u64> {
        self.info
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.map(|_| i as u64))
            .collect()
    }
}

/// Overwrites the base entries matched by `node.tuples` with the node's
/// values. Pull-forward guarantees every node id exists in the base.
fn fold_into_base(base: &mut UpdateInfo, node: &UpdateInfo) -> StorageResult<()> {
    let mut pairs = Vec::with_capacity(node.tuples.len());
    let (mut b, mut n) = (0, 0);
    while n < node.tuples.len() {
        if b >= base.tuples.len() {
            return Err(StorageError::internal(
                "undo chain node updates a row missing from its base record",
            ));
        }
        match base.tuples[b].cmp(&node.tuples[n]) {
            std::cmp::Ordering::Equal => {
                pairs.push((b, n));
                b += 1;
                n += 1;
            }
            std::cmp::Ordering::Less => b += 1,
            std::cmp::Ordering::Greater => {
                return Err(StorageError::internal(
                    "undo chain node updates a row missing from its base record",
                ));
            }
        }
    }
    macro_rules! copy_pairs {
        ($($variant:ident),*) => {
            match (&mut base.values, &node.values) {
                $((UpdateValues::$variant(b_vals), UpdateValues::$variant(n_vals)) => {
                    for (bi, ni) in &pairs {
                        b_vals[*bi] = n_vals[*ni].clone();
                    }
                })*
                _ => {
                    return Err(StorageError::internal(
                        "undo chain value kinds diverge",
                    ))
                }
            }
        };
    }
    copy_pairs!(
        Int8, Int16, Int32, Int64, UInt8, UInt16, UInt32, UInt64, Float32, Float64, String,
        Validity
    );
    Ok(())
}

/// Selection over `row_ids` sorted by id with duplicates removed.
fn sorted_unique_sel(row_ids: &[i64]) -> Vec<u32> {
    let mut is_sorted = true;
    for i in 1..row_ids.len() {
        if row_ids[i] <= row_ids[i - 1] {
            is_sorted = false;
            break;
        }
    }
    let mut sel: Vec<u32> = (0..row_ids.len() as u32).collect();
    if is_sorted {
        return sel;
    }
    sel.sort_by_key(|i| row_ids[*i as usize]);
    sel.dedup_by_key(|i| row_ids[*i as usize]);
    sel
}

#[cfg(test)]
mod tests {
    use crate::types::{DataValue, LogicalType};

    use super::*;

    fn bigint_vector(values: &[i64]) -> Vector {
        Vector::from_values(
            LogicalType::BigInt,
            &values.iter().copied().map(DataValue::Int64).collect::<Vec<_>>(),
        )
    }

    fn chunk_base(values: &[i64]) -> Vector {
        let mut full = vec![0i64; DEFAULT_VECTOR_CAPACITY];
        full[..values.len()].copy_from_slice(values);
        bigint_vector(&full)
    }

    #[test]
    fn update_then_fetch_latest_and_committed() {
        let mut segment = UpdateSegment::new(PhysicalType::Int64);
        let base = chunk_base(&[10, 20, 30, 40]);
        let update = bigint_vector(&[21, 41]);
        segment.update(0, &update, &[1, 3], &base, 0).unwrap();

        let mut latest = chunk_base(&[10, 20, 30, 40]);
        segment.fetch_updates(0, &mut latest).unwrap();
        assert_eq!(latest.data::<i64>()[..4], [10, 21, 30, 41]);

        let mut committed = chunk_base(&[10, 20, 30, 40]);
        segment.fetch_committed(0, &mut committed).unwrap();
        assert_eq!(committed.data::<i64>()[..4], [10, 20, 30, 40]);
        assert!(segment.has_uncommitted_updates(0).unwrap());
        assert!(segment.has_updates());
        assert!(segment.has_updates_vector(0));
        assert!(!segment.has_updates_vector(1));
        assert!(segment.has_updates_range(0, 10));
    }

    #[test]
    fn conflict_on_overlapping_rows() {
        let mut segment = UpdateSegment::new(PhysicalType::Int64);
        let base = chunk_base(&[10, 20, 30, 40]);
        segment
            .update(0, &bigint_vector(&[99]), &[2], &base, 0)
            .unwrap();
        let err = segment
            .update(0, &bigint_vector(&[98]), &[2], &base, 0)
            .unwrap_err();
        assert_eq!(err, StorageError::Conflict("Conflict on update!"));
    }

    #[test]
    fn disjoint_rows_both_succeed() {
        let mut segment = UpdateSegment::new(PhysicalType::Int64);
        let base = chunk_base(&[10, 20, 30, 40]);
        segment
            .update(0, &bigint_vector(&[99]), &[0], &base, 0)
            .unwrap();
        segment
            .update(0, &bigint_vector(&[98]), &[3], &base, 0)
            .unwrap();
        let mut latest = chunk_base(&[10, 20, 30, 40]);
        segment.fetch_updates(0, &mut latest).unwrap();
        assert_eq!(latest.data::<i64>()[..4], [99, 20, 30, 98]);
    }

    #[test]
    fn commit_folds_into_base() {
        let mut segment = UpdateSegment::new(PhysicalType::Int64);
        let base = chunk_base(&[10, 20, 30, 40]);
        segment
            .update(0, &bigint_vector(&[77]), &[1], &base, 0)
            .unwrap();
        segment.commit_updates(0).unwrap();
        assert!(!segment.has_uncommitted_updates(0).unwrap());

        let mut committed = chunk_base(&[10, 20, 30, 40]);
        segment.fetch_committed(0, &mut committed).unwrap();
        assert_eq!(committed.data::<i64>()[..4], [10, 77, 30, 40]);
        // A later update of the same row no longer conflicts.
        let current = chunk_base(&[10, 77, 30, 40]);
        segment
            .update(0, &bigint_vector(&[78]), &[1], &current, 0)
            .unwrap();
        let mut latest = chunk_base(&[10, 77, 30, 40]);
        segment.fetch_updates(0, &mut latest).unwrap();
        assert_eq!(latest.data::<i64>()[1], 78);
        // The committed view still shows the previously committed value.
        let mut committed = chunk_base(&[10, 77, 30, 40]);
        segment.fetch_committed(0, &mut committed).unwrap();
        assert_eq!(committed.data::<i64>()[1], 77);
    }

    #[test]
    fn rollback_discards_pending_values() {
        let mut segment = UpdateSegment::new(PhysicalType::Int64);
        let base = chunk_base(&[10, 20]);
        segment
            .update(0, &bigint_vector(&[11]), &[0], &base, 0)
            .unwrap();
        segment.rollback_updates(0).unwrap();
        let mut latest = chunk_base(&[10, 20]);
        segment.fetch_updates(0, &mut latest).unwrap();
        assert_eq!(latest.data::<i64>()[..2], [10, 20]);
        // The undo slot was reclaimed; a new update reuses it safely.
        segment
            .update(0, &bigint_vector(&[12]), &[0], &base, 0)
            .unwrap();
        let mut latest = chunk_base(&[10, 20]);
        segment.fetch_updates(0, &mut latest).unwrap();
        assert_eq!(latest.data::<i64>()[0], 12);
    }

    #[test]
    fn replay_is_idempotent() {
        let mut segment = UpdateSegment::new(PhysicalType::Int64);
        let base = chunk_base(&[1, 2, 3, 4, 5]);
        segment
            .update(0, &bigint_vector(&[20, 40]), &[1, 3], &base, 0)
            .unwrap();
        let mut first = chunk_base(&[1, 2, 3, 4, 5]);
        segment.fetch_updates(0, &mut first).unwrap();
        let mut second = first.clone();
        segment.fetch_updates(0, &mut second).unwrap();
        assert_eq!(first.data::<i64>()[..5], second.data::<i64>()[..5]);
    }

    #[test]
    fn fetch_row_sees_chain() {
        let mut segment = UpdateSegment::new(PhysicalType::Int64);
        let base = chunk_base(&[5, 6, 7]);
        segment
            .update(0, &bigint_vector(&[60]), &[1], &base, 0)
            .unwrap();
        let mut result = bigint_vector(&[0, 0]);
        segment.fetch_row(1, 0, &mut result, 1).unwrap();
        assert_eq!(result.data::<i64>()[1], 60);
        // Rows without updates stay untouched.
        let mut result = bigint_vector(&[123]);
        segment.fetch_row(2, 0, &mut result, 0).unwrap();
        assert_eq!(result.data::<i64>()[0], 123);
    }

    #[test]
    fn committed_range_window() {
        let mut segment = UpdateSegment::new(PhysicalType::Int64);
        let base = chunk_base(&[0, 1, 2, 3, 4, 5, 6, 7]);
        segment
            .update(0, &bigint_vector(&[100, 300]), &[2, 5], &base, 0)
            .unwrap();
        segment.commit_updates(0).unwrap();
        // Window [4, 8) -> only row 5 lands, at window offset 1.
        let mut result = bigint_vector(&[40, 50, 60, 70]);
        segment.fetch_committed_range(4, 4, &mut result).unwrap();
        assert_eq!(result.data::<i64>()[..4], [40, 300, 60, 70]);
    }

    #[test]
    fn unsorted_duplicate_ids_are_normalized() {
        let mut segment = UpdateSegment::new(PhysicalType::Int64);
        let base = chunk_base(&[0, 0, 0, 0]);
        // Duplicated and out-of-order ids collapse to one update per row.
        segment
            .update(0, &bigint_vector(&[30, 10, 11]), &[3, 1, 1], &base, 0)
            .unwrap();
        let mut latest = chunk_base(&[0, 0, 0, 0]);
        segment.fetch_updates(0, &mut latest).unwrap();
        assert_eq!(latest.data::<i64>()[3], 30);
        assert_eq!(latest.data::<i64>()[0], 0);
        assert!(latest.data::<i64>()[1] == 10 || latest.data::<i64>()[1] == 11);
    }
}
