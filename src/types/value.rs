// Copyright 2025 Mica Project Authors. Licensed under Apache-2.0.

use serde::{Deserialize, Serialize};

use super::LogicalType;

/// An owned scalar value, used for point results, filter constants, zonemap
/// bounds and test assembly. Vectors hold their data in typed columnar form;
/// `DataValue` is only the boundary representation.
#[derive(Clone, Debug, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum DataValue {
    Null,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    String(String),
}

impl DataValue {
    pub fn is_null(&self) -> bool {
        matches!(self, DataValue::Null)
    }

    /// The logical type this value naturally carries, if any.
    pub fn logical_type(&self) -> Option<LogicalType> {
        Some(match self {
            DataValue::Null => return None,
            DataValue::Bool(_) => LogicalType::Boolean,
            DataValue::Int8(_) => LogicalType::TinyInt,
            DataValue::Int16(_) => LogicalType::SmallInt,
            DataValue::Int32(_) => LogicalType::Integer,
            DataValue::Int64(_) => LogicalType::BigInt,
            DataValue::UInt8(_) => LogicalType::UTinyInt,
            DataValue::UInt16(_) => LogicalType::USmallInt,
            DataValue::UInt32(_) => LogicalType::UInteger,
            DataValue::UInt64(_) => LogicalType::UBigInt,
            DataValue::Float32(_) => LogicalType::Float,
            DataValue::Float64(_) => LogicalType::Double,
            DataValue::String(_) => LogicalType::Varchar,
        })
    }
}

impl From<i64> for DataValue {
    fn from(v: i64) -> Self {
        DataValue::Int64(v)
    }
}

impl From<i32> for DataValue {
    fn from(v: i32) -> Self {
        DataValue::Int32(v)
    }
}

impl From<&str> for DataValue {
    fn from(v: &str) -> Self {
        DataValue::String(v.to_string())
    }
}

impl From<String> for DataValue {
    fn from(v: String) -> Self {
        DataValue::String(v)
    }
}
