// Copyright 2025 Mica Project Authors. Licensed under Apache-2.0.

use crate::types::{DataValue, LogicalType};

use super::{Vector, DEFAULT_VECTOR_CAPACITY};

/// A horizontal batch: one vector per column, all sharing a cardinality.
#[derive(Clone, Debug)]
pub struct DataChunk {
    columns: Vec<Vector>,
    cardinality: usize,
}

impl DataChunk {
    pub fn new(types: &[LogicalType]) -> Self {
        Self::with_capacity(types, DEFAULT_VECTOR_CAPACITY)
    }

    pub fn with_capacity(types: &[LogicalType], capacity: usize) -> Self {
        Self {
            columns: types
                .iter()
                .map(|ty| Vector::with_capacity(ty.clone(), capacity))
                .collect(),
            cardinality: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.cardinality
    }

    pub fn set_cardinality(&mut self, cardinality: usize) {
        self.cardinality = cardinality;
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, idx: usize) -> &Vector {
        &self.columns[idx]
    }

    pub fn column_mut(&mut self, idx: usize) -> &mut Vector {
        &mut self.columns[idx]
    }

    pub fn columns(&self) -> &[Vector] {
        &self.columns
    }

    pub fn columns_mut(&mut self) -> &mut [Vector] {
        &mut self.columns
    }

    /// Resets the chunk for the next batch: fresh vectors, zero cardinality.
    pub fn reset(&mut self) {
        for column in &mut self.columns {
            let capacity = column.capacity().max(DEFAULT_VECTOR_CAPACITY);
            *column = Vector::with_capacity(column.ty().clone(), capacity);
        }
        self.cardinality = 0;
    }

    /// Builds a chunk from rows of owned values; a test and boundary helper.
    pub fn from_rows(types: &[LogicalType], rows: &[Vec<DataValue>]) -> Self {
        let mut chunk = Self::with_capacity(types, rows.len().max(1));
        for (row_idx, row) in rows.iter().enumerate() {
            assert_eq!(row.len(), types.len());
            for (col_idx, value) in row.iter().enumerate() {
                chunk.columns[col_idx].set_value(row_idx, value);
            }
        }
        chunk.cardinality = rows.len();
        chunk
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rows_roundtrip() {
        let types = [LogicalType::BigInt, LogicalType::Varchar];
        let chunk = DataChunk::from_rows(
            &types,
            &[
                vec![DataValue::Int64(1), DataValue::from("a")],
                vec![DataValue::Int64(2), DataValue::from("b")],
            ],
        );
        assert_eq!(chunk.size(), 2);
        assert_eq!(chunk.column(0).value(1), DataValue::Int64(2));
        assert_eq!(chunk.column(1).value(0), DataValue::from("a"));
    }
}
