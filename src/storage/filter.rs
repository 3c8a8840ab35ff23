// Copyright 2025 Mica Project Authors. Licensed under Apache-2.0.

use std::collections::BTreeMap;

use crate::types::{DataValue, PhysicalType};
use crate::vector::{NativeVector, SelVector, UnifiedFormat, Vector};

use super::{StorageError, StorageResult};

/// Result of probing a filter against segment zonemap statistics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterPropagateResult {
    NoPruningPossible,
    AlwaysTrue,
    AlwaysFalse,
    TrueOrNull,
    FalseOrNull,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComparisonOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

/// A pushed-down table filter evaluated against scanned column vectors.
#[derive(Clone, Debug, PartialEq)]
pub enum TableFilter {
    ConstantComparison { op: ComparisonOp, value: DataValue },
    IsNull,
    IsNotNull,
    ConjunctionAnd(Vec<TableFilter>),
    ConjunctionOr(Vec<TableFilter>),
}

/// The set of filters for one scan, keyed by scan column index. Ordered so
/// that filter evaluation order is deterministic before the adaptive
/// reordering kicks in.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TableFilterSet {
    pub filters: BTreeMap<u64, TableFilter>,
}

impl TableFilterSet {
    pub fn push_filter(&mut self, scan_column_index: u64, filter: TableFilter) {
        match self.filters.entry(scan_column_index) {
            std::collections::btree_map::Entry::Vacant(e) => {
                e.insert(filter);
            }
            std::collections::btree_map::Entry::Occupied(mut e) => {
                // A second filter on the same column folds into a conjunction.
                let existing = e.get_mut();
                let combined = match std::mem::replace(existing, TableFilter::IsNull) {
                    TableFilter::ConjunctionAnd(mut children) => {
                        children.push(filter);
                        TableFilter::ConjunctionAnd(children)
                    }
                    other => TableFilter::ConjunctionAnd(vec![other, filter]),
                };
                *existing = combined;
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }
}

fn compare<T: PartialOrd>(op: ComparisonOp, left: T, right: T) -> bool {
    match op {
        ComparisonOp::Equal => left == right,
        ComparisonOp::NotEqual => left != right,
        ComparisonOp::LessThan => left < right,
        ComparisonOp::LessThanOrEqual => left <= right,
        ComparisonOp::GreaterThan => left > right,
        ComparisonOp::GreaterThanOrEqual => left >= right,
    }
}

fn filter_comparison_typed<T: NativeVector>(
    uvf: &UnifiedFormat<'_>,
    op: ComparisonOp,
    value: &DataValue,
    sel: &mut SelVector,
    approved_count: &mut usize,
) -> StorageResult<()> {
    let constant = T::from_value(value).ok_or_else(|| {
        StorageError::invalid_state(format!(
            "filter constant {value:?} does not match column type {:?}",
            T::PHYSICAL
        ))
    })?;
    let mut result_count = 0;
    for i in 0..*approved_count {
        let idx = sel.get(i);
        if uvf.is_valid(idx) && compare(op, uvf.get::<T>(idx), constant) {
            sel.set(result_count, idx);
            result_count += 1;
        }
    }
    *approved_count = result_count;
    Ok(())
}

fn filter_comparison(
    vector: &Vector,
    scan_count: usize,
    op: ComparisonOp,
    value: &DataValue,
    sel: &mut SelVector,
    approved_count: &mut usize,
) -> StorageResult<()> {
    let uvf = vector.to_unified(scan_count);
    match vector.physical_type() {
        PhysicalType::Bool | PhysicalType::Int8 => {
            filter_comparison_typed::<i8>(&uvf, op, value, sel, approved_count)
        }
        PhysicalType::Int16 => filter_comparison_typed::<i16>(&uvf, op, value, sel, approved_count),
        PhysicalType::Int32 => filter_comparison_typed::<i32>(&uvf, op, value, sel, approved_count),
        PhysicalType::Int64 => filter_comparison_typed::<i64>(&uvf, op, value, sel, approved_count),
        PhysicalType::UInt8 => filter_comparison_typed::<u8>(&uvf, op, value, sel, approved_count),
        PhysicalType::UInt16 => {
            filter_comparison_typed::<u16>(&uvf, op, value, sel, approved_count)
        }
        PhysicalType::UInt32 => {
            filter_comparison_typed::<u32>(&uvf, op, value, sel, approved_count)
        }
        PhysicalType::UInt64 => {
            filter_comparison_typed::<u64>(&uvf, op, value, sel, approved_count)
        }
        PhysicalType::Float32 => {
            filter_comparison_typed::<f32>(&uvf, op, value, sel, approved_count)
        }
        PhysicalType::Float64 => {
            filter_comparison_typed::<f64>(&uvf, op, value, sel, approved_count)
        }
        PhysicalType::String => {
            let constant = match value {
                DataValue::String(s) => s.as_str(),
                other => {
                    return Err(StorageError::invalid_state(format!(
                        "filter constant {other:?} is not a string"
                    )))
                }
            };
            let mut result_count = 0;
            for i in 0..*approved_count {
                let idx = sel.get(i);
                if uvf.is_valid(idx) && compare(op, uvf.str_at(idx), constant) {
                    sel.set(result_count, idx);
                    result_count += 1;
                }
            }
            *approved_count = result_count;
            Ok(())
        }
        other => Err(StorageError::Unsupported(match other {
            PhysicalType::Struct => "comparison filter on a struct column",
            PhysicalType::List => "comparison filter on a list column",
            PhysicalType::Array => "comparison filter on an array column",
            _ => "comparison filter on this column type",
        })),
    }
}

fn filter_is_null(
    vector: &Vector,
    scan_count: usize,
    keep_null: bool,
    sel: &mut SelVector,
    approved_count: &mut usize,
) {
    let uvf = vector.to_unified(scan_count);
    let mut result_count = 0;
    for i in 0..*approved_count {
        let idx = sel.get(i);
        if uvf.is_valid(idx) != keep_null {
            sel.set(result_count, idx);
            result_count += 1;
        }
    }
    *approved_count = result_count;
}

/// Compacts `sel` down to the rows of `vector` that pass `filter`.
///
/// `sel` must be an owned selection covering `approved_count` entries; AND
/// conjunctions shrink it progressively, OR conjunctions rebuild it as the
/// deduplicated union of their children's selections.
pub fn filter_sel(
    vector: &Vector,
    scan_count: usize,
    filter: &TableFilter,
    sel: &mut SelVector,
    approved_count: &mut usize,
) -> StorageResult<()> {
    match filter {
        TableFilter::ConstantComparison { op, value } => {
            filter_comparison(vector, scan_count, *op, value, sel, approved_count)
        }
        TableFilter::IsNull => {
            filter_is_null(vector, scan_count, true, sel, approved_count);
            Ok(())
        }
        TableFilter::IsNotNull => {
            filter_is_null(vector, scan_count, false, sel, approved_count);
            Ok(())
        }
        TableFilter::ConjunctionAnd(children) => {
            for child in children {
                filter_sel(vector, scan_count, child, sel, approved_count)?;
            }
            Ok(())
        }
        TableFilter::ConjunctionOr(children) => {
            // OR cannot reuse one progressively-shrinking selection; evaluate
            // every child against the incoming selection and union the
            // survivors, deduplicating row offsets.
            let mut result = SelVector::with_capacity(*approved_count);
            let mut result_count = 0;
            for child in children {
                let mut child_sel = sel.clone();
                let mut child_count = *approved_count;
                filter_sel(vector, scan_count, child, &mut child_sel, &mut child_count)?;
                for i in 0..child_count {
                    let idx = child_sel.get(i);
                    let mut seen = false;
                    for j in 0..result_count {
                        if result.get(j) == idx {
                            seen = true;
                            break;
                        }
                    }
                    if !seen {
                        result.set(result_count, idx);
                        result_count += 1;
                    }
                }
            }
            *sel = result;
            *approved_count = result_count;
            Ok(())
        }
    }
}

/// Probes a filter against a `[min, max]` zonemap. Without null counts an
/// all-pass verdict can only ever be "true or null".
pub fn check_zonemap_comparison(
    filter: &TableFilter,
    min: &DataValue,
    max: &DataValue,
) -> FilterPropagateResult {
    match filter {
        TableFilter::ConstantComparison { op, value } => {
            if value.is_null() || min.is_null() || max.is_null() {
                return FilterPropagateResult::NoPruningPossible;
            }
            let (lo, hi) = (min, max);
            match op {
                ComparisonOp::Equal => {
                    if value < lo || value > hi {
                        FilterPropagateResult::AlwaysFalse
                    } else if lo == hi && lo == value {
                        FilterPropagateResult::TrueOrNull
                    } else {
                        FilterPropagateResult::NoPruningPossible
                    }
                }
                ComparisonOp::NotEqual => {
                    if lo == hi && lo == value {
                        FilterPropagateResult::AlwaysFalse
                    } else if value < lo || value > hi {
                        FilterPropagateResult::TrueOrNull
                    } else {
                        FilterPropagateResult::NoPruningPossible
                    }
                }
                ComparisonOp::LessThan => {
                    if hi < value {
                        FilterPropagateResult::TrueOrNull
                    } else if lo >= value {
                        FilterPropagateResult::AlwaysFalse
                    } else {
                        FilterPropagateResult::NoPruningPossible
                    }
                }
                ComparisonOp::LessThanOrEqual => {
                    if hi <= value {
                        FilterPropagateResult::TrueOrNull
                    } else if lo > value {
                        FilterPropagateResult::AlwaysFalse
                    } else {
                        FilterPropagateResult::NoPruningPossible
                    }
                }
                ComparisonOp::GreaterThan => {
                    if lo > value {
                        FilterPropagateResult::TrueOrNull
                    } else if hi <= value {
                        FilterPropagateResult::AlwaysFalse
                    } else {
                        FilterPropagateResult::NoPruningPossible
                    }
                }
                ComparisonOp::GreaterThanOrEqual => {
                    if lo >= value {
                        FilterPropagateResult::TrueOrNull
                    } else if hi < value {
                        FilterPropagateResult::AlwaysFalse
                    } else {
                        FilterPropagateResult::NoPruningPossible
                    }
                }
            }
        }
        TableFilter::ConjunctionAnd(children) => {
            let mut result = FilterPropagateResult::TrueOrNull;
            for child in children {
                match check_zonemap_comparison(child, min, max) {
                    FilterPropagateResult::AlwaysFalse => {
                        return FilterPropagateResult::AlwaysFalse
                    }
                    FilterPropagateResult::NoPruningPossible => {
                        result = FilterPropagateResult::NoPruningPossible;
                    }
                    _ => {}
                }
            }
            result
        }
        TableFilter::ConjunctionOr(children) => {
            let mut result = FilterPropagateResult::AlwaysFalse;
            for child in children {
                match check_zonemap_comparison(child, min, max) {
                    FilterPropagateResult::AlwaysFalse => {}
                    FilterPropagateResult::TrueOrNull => {
                        if result == FilterPropagateResult::AlwaysFalse {
                            result = FilterPropagateResult::TrueOrNull;
                        }
                    }
                    _ => {
                        result = FilterPropagateResult::NoPruningPossible;
                    }
                }
            }
            result
        }
        TableFilter::IsNull | TableFilter::IsNotNull => FilterPropagateResult::NoPruningPossible,
    }
}

#[cfg(test)]
mod tests {
    use crate::types::LogicalType;

    use super::*;

    fn int_vector(values: &[Option<i64>]) -> Vector {
        Vector::from_values(
            LogicalType::BigInt,
            &values
                .iter()
                .map(|v| v.map(DataValue::Int64).unwrap_or(DataValue::Null))
                .collect::<Vec<_>>(),
        )
    }

    fn identity_sel(count: usize) -> SelVector {
        let mut sel = SelVector::with_capacity(count);
        for i in 0..count {
            sel.set(i, i);
        }
        sel
    }

    #[test]
    fn comparison_filters_rows() {
        let vector = int_vector(&[Some(5), Some(95), None, Some(100)]);
        let mut sel = identity_sel(4);
        let mut count = 4;
        let filter = TableFilter::ConstantComparison {
            op: ComparisonOp::GreaterThan,
            value: DataValue::Int64(90),
        };
        filter_sel(&vector, 4, &filter, &mut sel, &mut count).unwrap();
        assert_eq!(count, 2);
        assert_eq!(sel.get(0), 1);
        assert_eq!(sel.get(1), 3);
    }

    #[test]
    fn and_shrinks_progressively() {
        let vector = int_vector(&[Some(5), Some(50), Some(95)]);
        let mut sel = identity_sel(3);
        let mut count = 3;
        let filter = TableFilter::ConjunctionAnd(vec![
            TableFilter::ConstantComparison {
                op: ComparisonOp::GreaterThan,
                value: DataValue::Int64(10),
            },
            TableFilter::ConstantComparison {
                op: ComparisonOp::LessThan,
                value: DataValue::Int64(90),
            },
        ]);
        filter_sel(&vector, 3, &filter, &mut sel, &mut count).unwrap();
        assert_eq!(count, 1);
        assert_eq!(sel.get(0), 1);
    }

    #[test]
    fn or_unions_without_duplicates() {
        let vector = int_vector(&[Some(5), Some(50), Some(95)]);
        let mut sel = identity_sel(3);
        let mut count = 3;
        let filter = TableFilter::ConjunctionOr(vec![
            TableFilter::ConstantComparison {
                op: ComparisonOp::LessThan,
                value: DataValue::Int64(60),
            },
            TableFilter::ConstantComparison {
                op: ComparisonOp::GreaterThan,
                value: DataValue::Int64(40),
            },
        ]);
        filter_sel(&vector, 3, &filter, &mut sel, &mut count).unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn null_filters() {
        let vector = int_vector(&[Some(1), None, Some(3)]);
        let mut sel = identity_sel(3);
        let mut count = 3;
        filter_sel(&vector, 3, &TableFilter::IsNull, &mut sel, &mut count).unwrap();
        assert_eq!(count, 1);
        assert_eq!(sel.get(0), 1);

        let mut sel = identity_sel(3);
        let mut count = 3;
        filter_sel(&vector, 3, &TableFilter::IsNotNull, &mut sel, &mut count).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn zonemap_prunes_disjoint_range() {
        let filter = TableFilter::ConstantComparison {
            op: ComparisonOp::GreaterThan,
            value: DataValue::Int64(90),
        };
        let result =
            check_zonemap_comparison(&filter, &DataValue::Int64(0), &DataValue::Int64(50));
        assert_eq!(result, FilterPropagateResult::AlwaysFalse);
        let result =
            check_zonemap_comparison(&filter, &DataValue::Int64(91), &DataValue::Int64(99));
        assert_eq!(result, FilterPropagateResult::TrueOrNull);
    }
}
