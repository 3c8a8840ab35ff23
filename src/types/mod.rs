// Copyright 2025 Mica Project Authors. Licensed under Apache-2.0.

//! Logical and physical type system of the storage engine.

use serde::{Deserialize, Serialize};

mod native;
mod value;

pub use self::native::*;
pub use self::value::*;

/// A named field of a struct type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructField {
    pub name: String,
    pub ty: LogicalType,
}

impl StructField {
    pub fn new(name: impl Into<String>, ty: LogicalType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// The SQL-level type of a column.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalType {
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    UTinyInt,
    USmallInt,
    UInteger,
    UBigInt,
    Float,
    Double,
    Varchar,
    /// The null bitmap pseudo-type. Every column composes with one validity
    /// column; it never appears in a table schema directly.
    Validity,
    Struct(Vec<StructField>),
    List(Box<LogicalType>),
    Array(Box<LogicalType>, usize),
}

/// The storage-level representation the engine dispatches on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhysicalType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    String,
    /// Packed bitmap, one bit per row.
    Bit,
    Struct,
    List,
    Array,
}

impl LogicalType {
    pub fn physical_type(&self) -> PhysicalType {
        match self {
            LogicalType::Boolean => PhysicalType::Bool,
            LogicalType::TinyInt => PhysicalType::Int8,
            LogicalType::SmallInt => PhysicalType::Int16,
            LogicalType::Integer => PhysicalType::Int32,
            LogicalType::BigInt => PhysicalType::Int64,
            LogicalType::UTinyInt => PhysicalType::UInt8,
            LogicalType::USmallInt => PhysicalType::UInt16,
            LogicalType::UInteger => PhysicalType::UInt32,
            LogicalType::UBigInt => PhysicalType::UInt64,
            LogicalType::Float => PhysicalType::Float32,
            LogicalType::Double => PhysicalType::Float64,
            LogicalType::Varchar => PhysicalType::String,
            LogicalType::Validity => PhysicalType::Bit,
            LogicalType::Struct(_) => PhysicalType::Struct,
            LogicalType::List(_) => PhysicalType::List,
            LogicalType::Array(..) => PhysicalType::Array,
        }
    }

    /// Fixed width of one row in a column segment of this type.
    ///
    /// List rows store a single `u64` end offset into the child column.
    /// Struct and array columns own no value segment of their own.
    pub fn size(&self) -> usize {
        match self.physical_type() {
            PhysicalType::Bool | PhysicalType::Int8 | PhysicalType::UInt8 => 1,
            PhysicalType::Int16 | PhysicalType::UInt16 => 2,
            PhysicalType::Int32 | PhysicalType::UInt32 | PhysicalType::Float32 => 4,
            PhysicalType::Int64
            | PhysicalType::UInt64
            | PhysicalType::Float64
            | PhysicalType::List => 8,
            // Room for one dictionary offset plus the average short string.
            PhysicalType::String => 16,
            PhysicalType::Bit => 1,
            PhysicalType::Struct | PhysicalType::Array => 0,
        }
    }

    /// The element type of a list or array.
    pub fn child_type(&self) -> &LogicalType {
        match self {
            LogicalType::List(child) => child,
            LogicalType::Array(child, _) => child,
            other => panic!("child_type called on non-nested type {other:?}"),
        }
    }

    /// The fixed element count of an array type.
    pub fn array_size(&self) -> usize {
        match self {
            LogicalType::Array(_, size) => *size,
            other => panic!("array_size called on non-array type {other:?}"),
        }
    }

    pub fn struct_fields(&self) -> &[StructField] {
        match self {
            LogicalType::Struct(fields) => fields,
            other => panic!("struct_fields called on non-struct type {other:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn physical_mapping() {
        assert_eq!(LogicalType::BigInt.physical_type(), PhysicalType::Int64);
        assert_eq!(LogicalType::Varchar.physical_type(), PhysicalType::String);
        assert_eq!(LogicalType::Validity.physical_type(), PhysicalType::Bit);
        let list = LogicalType::List(Box::new(LogicalType::Integer));
        assert_eq!(list.physical_type(), PhysicalType::List);
        assert_eq!(list.child_type(), &LogicalType::Integer);
        assert_eq!(list.size(), 8);
    }
}
