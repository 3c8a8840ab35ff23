// Copyright 2025 Mica Project Authors. Licensed under Apache-2.0.

use crate::types::{DataValue, LogicalType, NativeType, PhysicalType};

use super::{SelVector, ValidityMask, DEFAULT_VECTOR_CAPACITY};

/// Physical shape of a vector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VectorKind {
    /// One value slot per row.
    Flat,
    /// A single value slot logically repeated for every row.
    Constant,
}

/// One row of a list vector: a range into the batch-local child vector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ListEntry {
    pub offset: u64,
    pub length: u64,
}

/// Typed storage of a vector, closed over the physical types the engine
/// supports.
#[derive(Clone, Debug)]
pub enum VectorValues {
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
    Struct(Vec<Vector>),
    List {
        entries: Vec<ListEntry>,
        child: Box<Vector>,
        child_size: usize,
    },
    Array {
        child: Box<Vector>,
    },
}

/// Typed access from a [`NativeType`] into [`VectorValues`].
pub trait NativeVector: NativeType {
    fn values(values: &VectorValues) -> &[Self];
    fn values_mut(values: &mut VectorValues) -> &mut Vec<Self>;
}

macro_rules! impl_native_vector {
    ($ty:ty, $variant:ident) => {
        impl NativeVector for $ty {
            fn values(values: &VectorValues) -> &[Self] {
                match values {
                    VectorValues::$variant(data) => data,
                    other => panic!(
                        "vector holds {:?}, not {}",
                        std::mem::discriminant(other),
                        stringify!($variant)
                    ),
                }
            }

            fn values_mut(values: &mut VectorValues) -> &mut Vec<Self> {
                match values {
                    VectorValues::$variant(data) => data,
                    _ => panic!("vector does not hold {}", stringify!($variant)),
                }
            }
        }
    };
}

impl_native_vector!(i8, Int8);
impl_native_vector!(i16, Int16);
impl_native_vector!(i32, Int32);
impl_native_vector!(i64, Int64);
impl_native_vector!(u8, UInt8);
impl_native_vector!(u16, UInt16);
impl_native_vector!(u32, UInt32);
impl_native_vector!(u64, UInt64);
impl_native_vector!(f32, Float32);
impl_native_vector!(f64, Float64);

/// One column of a batch: up to [`DEFAULT_VECTOR_CAPACITY`] rows of typed
/// values plus a validity mask.
#[derive(Clone, Debug)]
pub struct Vector {
    ty: LogicalType,
    kind: VectorKind,
    validity: ValidityMask,
    values: VectorValues,
}

impl Vector {
    pub fn new(ty: LogicalType) -> Self {
        Self::with_capacity(ty, DEFAULT_VECTOR_CAPACITY)
    }

    pub fn with_capacity(ty: LogicalType, capacity: usize) -> Self {
        let values = Self::init_values(&ty, capacity);
        Self {
            ty,
            kind: VectorKind::Flat,
            validity: ValidityMask::new(capacity),
            values,
        }
    }

    fn init_values(ty: &LogicalType, capacity: usize) -> VectorValues {
        match ty.physical_type() {
            PhysicalType::Bool | PhysicalType::Int8 => VectorValues::Int8(vec![0; capacity]),
            PhysicalType::Int16 => VectorValues::Int16(vec![0; capacity]),
            PhysicalType::Int32 => VectorValues::Int32(vec![0; capacity]),
            PhysicalType::Int64 => VectorValues::Int64(vec![0; capacity]),
            PhysicalType::UInt8 => VectorValues::UInt8(vec![0; capacity]),
            PhysicalType::UInt16 => VectorValues::UInt16(vec![0; capacity]),
            PhysicalType::UInt32 => VectorValues::UInt32(vec![0; capacity]),
            PhysicalType::UInt64 | PhysicalType::Bit => VectorValues::UInt64(vec![0; capacity]),
            PhysicalType::Float32 => VectorValues::Float32(vec![0.0; capacity]),
            PhysicalType::Float64 => VectorValues::Float64(vec![0.0; capacity]),
            PhysicalType::String => VectorValues::String(vec![String::new(); capacity]),
            PhysicalType::Struct => VectorValues::Struct(
                ty.struct_fields()
                    .iter()
                    .map(|f| Vector::with_capacity(f.ty.clone(), capacity))
                    .collect(),
            ),
            PhysicalType::List => VectorValues::List {
                entries: vec![ListEntry::default(); capacity],
                child: Box::new(Vector::with_capacity(ty.child_type().clone(), 0)),
                child_size: 0,
            },
            PhysicalType::Array => VectorValues::Array {
                child: Box::new(Vector::with_capacity(
                    ty.child_type().clone(),
                    capacity * ty.array_size(),
                )),
            },
        }
    }

    pub fn ty(&self) -> &LogicalType {
        &self.ty
    }

    pub fn physical_type(&self) -> PhysicalType {
        self.ty.physical_type()
    }

    pub fn kind(&self) -> VectorKind {
        self.kind
    }

    pub fn set_kind(&mut self, kind: VectorKind) {
        self.kind = kind;
    }

    /// Number of value slots.
    pub fn capacity(&self) -> usize {
        match &self.values {
            VectorValues::Int8(v) => v.len(),
            VectorValues::Int16(v) => v.len(),
            VectorValues::Int32(v) => v.len(),
            VectorValues::Int64(v) => v.len(),
            VectorValues::UInt8(v) => v.len(),
            VectorValues::UInt16(v) => v.len(),
            VectorValues::UInt32(v) => v.len(),
            VectorValues::UInt64(v) => v.len(),
            VectorValues::Float32(v) => v.len(),
            VectorValues::Float64(v) => v.len(),
            VectorValues::String(v) => v.len(),
            VectorValues::Struct(children) => {
                children.first().map(|c| c.capacity()).unwrap_or(0)
            }
            VectorValues::List { entries, .. } => entries.len(),
            VectorValues::Array { child } => {
                child.capacity() / self.ty.array_size().max(1)
            }
        }
    }

    pub fn validity(&self) -> &ValidityMask {
        &self.validity
    }

    pub fn validity_mut(&mut self) -> &mut ValidityMask {
        &mut self.validity
    }

    pub fn data<T: NativeVector>(&self) -> &[T] {
        T::values(&self.values)
    }

    pub fn data_mut<T: NativeVector>(&mut self) -> &mut Vec<T> {
        T::values_mut(&mut self.values)
    }

    pub fn strings(&self) -> &[String] {
        match &self.values {
            VectorValues::String(v) => v,
            _ => panic!("vector does not hold strings"),
        }
    }

    pub fn strings_mut(&mut self) -> &mut Vec<String> {
        match &mut self.values {
            VectorValues::String(v) => v,
            _ => panic!("vector does not hold strings"),
        }
    }

    pub fn struct_entries(&self) -> &[Vector] {
        match &self.values {
            VectorValues::Struct(children) => children,
            _ => panic!("vector is not a struct vector"),
        }
    }

    pub fn struct_entries_mut(&mut self) -> &mut [Vector] {
        match &mut self.values {
            VectorValues::Struct(children) => children,
            _ => panic!("vector is not a struct vector"),
        }
    }

    pub fn list_entries(&self) -> &[ListEntry] {
        match &self.values {
            VectorValues::List { entries, .. } => entries,
            _ => panic!("vector is not a list vector"),
        }
    }

    pub fn list_entries_mut(&mut self) -> &mut [ListEntry] {
        match &mut self.values {
            VectorValues::List { entries, .. } => entries,
            _ => panic!("vector is not a list vector"),
        }
    }

    /// The batch-local element vector of a list or array vector.
    pub fn child(&self) -> &Vector {
        match &self.values {
            VectorValues::List { child, .. } => child,
            VectorValues::Array { child } => child,
            _ => panic!("vector has no child vector"),
        }
    }

    pub fn child_mut(&mut self) -> &mut Vector {
        match &mut self.values {
            VectorValues::List { child, .. } => child,
            VectorValues::Array { child } => child,
            _ => panic!("vector has no child vector"),
        }
    }

    pub fn list_size(&self) -> usize {
        match &self.values {
            VectorValues::List { child_size, .. } => *child_size,
            _ => panic!("vector is not a list vector"),
        }
    }

    pub fn set_list_size(&mut self, size: usize) {
        match &mut self.values {
            VectorValues::List { child_size, .. } => *child_size = size,
            _ => panic!("vector is not a list vector"),
        }
    }

    /// Grows the list child vector to hold at least `capacity` elements.
    pub fn reserve_list_child(&mut self, capacity: usize) {
        let child = self.child_mut();
        if child.capacity() < capacity {
            let extra = capacity - child.capacity();
            let ty = child.ty.clone();
            child.append_default(&ty, extra);
        }
        child.validity.resize(capacity);
    }

    fn append_default(&mut self, ty: &LogicalType, extra: usize) {
        match &mut self.values {
            VectorValues::Int8(v) => v.extend(std::iter::repeat(0).take(extra)),
            VectorValues::Int16(v) => v.extend(std::iter::repeat(0).take(extra)),
            VectorValues::Int32(v) => v.extend(std::iter::repeat(0).take(extra)),
            VectorValues::Int64(v) => v.extend(std::iter::repeat(0).take(extra)),
            VectorValues::UInt8(v) => v.extend(std::iter::repeat(0).take(extra)),
            VectorValues::UInt16(v) => v.extend(std::iter::repeat(0).take(extra)),
            VectorValues::UInt32(v) => v.extend(std::iter::repeat(0).take(extra)),
            VectorValues::UInt64(v) => v.extend(std::iter::repeat(0).take(extra)),
            VectorValues::Float32(v) => v.extend(std::iter::repeat(0.0).take(extra)),
            VectorValues::Float64(v) => v.extend(std::iter::repeat(0.0).take(extra)),
            VectorValues::String(v) => v.extend(std::iter::repeat(String::new()).take(extra)),
            VectorValues::Struct(children) => {
                for (child, field) in children.iter_mut().zip(ty.struct_fields()) {
                    child.append_default(&field.ty, extra);
                    child.validity.resize(child.capacity());
                }
            }
            VectorValues::List { entries, .. } => {
                entries.extend(std::iter::repeat(ListEntry::default()).take(extra));
            }
            VectorValues::Array { child } => {
                let child_ty = ty.child_type().clone();
                child.append_default(&child_ty, extra * ty.array_size());
                child.validity.resize(child.capacity());
            }
        }
    }

    /// Turns a constant vector into a flat vector of `count` rows.
    pub fn flatten(&mut self, count: usize) {
        if self.kind == VectorKind::Flat {
            return;
        }
        self.kind = VectorKind::Flat;
        let valid = self.validity.row_is_valid(0);
        let capacity = self.capacity().max(count);
        self.validity.reset(capacity);
        if !valid {
            for i in 0..count {
                self.validity.set_invalid(i);
            }
            return;
        }
        if matches!(
            self.values,
            VectorValues::Struct(_) | VectorValues::List { .. } | VectorValues::Array { .. }
        ) {
            // Nested constants only ever carry NULL; a valid nested constant
            // already holds its row-zero payload in place.
            return;
        }
        let value = self.value_at(0);
        for i in 1..count {
            self.write_value(i, &value);
        }
    }

    /// Turns this vector into a constant vector of `value`.
    pub fn reference(&mut self, value: &DataValue) {
        self.kind = VectorKind::Constant;
        self.validity.reset(self.capacity());
        if value.is_null() {
            self.validity.set_invalid(0);
        } else {
            self.write_value(0, value);
        }
    }

    /// Fills the vector with `start, start + increment, ...` as `i64` rows.
    pub fn sequence(&mut self, start: i64, increment: i64, count: usize) {
        self.kind = VectorKind::Flat;
        self.validity.reset(self.capacity());
        let data = self.data_mut::<i64>();
        for i in 0..count {
            data[i] = start + increment * i as i64;
        }
    }

    /// Compacts the first `count` selected rows to the front of the vector.
    pub fn slice(&mut self, sel: &SelVector, count: usize) {
        if sel.is_identity() || self.kind == VectorKind::Constant {
            return;
        }
        let mut validity = ValidityMask::new(self.capacity());
        for i in 0..count {
            if !self.validity.row_is_valid(sel.get(i)) {
                validity.set_invalid(i);
            }
        }
        match &mut self.values {
            VectorValues::Int8(v) => gather(v, sel, count),
            VectorValues::Int16(v) => gather(v, sel, count),
            VectorValues::Int32(v) => gather(v, sel, count),
            VectorValues::Int64(v) => gather(v, sel, count),
            VectorValues::UInt8(v) => gather(v, sel, count),
            VectorValues::UInt16(v) => gather(v, sel, count),
            VectorValues::UInt32(v) => gather(v, sel, count),
            VectorValues::UInt64(v) => gather(v, sel, count),
            VectorValues::Float32(v) => gather(v, sel, count),
            VectorValues::Float64(v) => gather(v, sel, count),
            VectorValues::String(v) => {
                let gathered: Vec<_> = (0..count).map(|i| v[sel.get(i)].clone()).collect();
                v[..count].clone_from_slice(&gathered);
            }
            VectorValues::Struct(children) => {
                for child in children {
                    child.slice(sel, count);
                }
            }
            VectorValues::List { entries, .. } => gather(entries, sel, count),
            VectorValues::Array { child } => {
                // Gather whole strides of the child stream.
                let size = self.ty.array_size();
                let mut child_sel = SelVector::with_capacity(count * size);
                for i in 0..count {
                    for j in 0..size {
                        child_sel.set(i * size + j, sel.get(i) * size + j);
                    }
                }
                child.slice(&child_sel, count * size);
            }
        }
        self.validity = validity;
    }

    /// An owned copy of the flat rows `[offset, offset + count)`.
    pub fn window(&self, offset: usize, count: usize) -> Vector {
        debug_assert_eq!(self.kind, VectorKind::Flat);
        let values = match &self.values {
            VectorValues::Int8(v) => VectorValues::Int8(v[offset..offset + count].to_vec()),
            VectorValues::Int16(v) => VectorValues::Int16(v[offset..offset + count].to_vec()),
            VectorValues::Int32(v) => VectorValues::Int32(v[offset..offset + count].to_vec()),
            VectorValues::Int64(v) => VectorValues::Int64(v[offset..offset + count].to_vec()),
            VectorValues::UInt8(v) => VectorValues::UInt8(v[offset..offset + count].to_vec()),
            VectorValues::UInt16(v) => VectorValues::UInt16(v[offset..offset + count].to_vec()),
            VectorValues::UInt32(v) => VectorValues::UInt32(v[offset..offset + count].to_vec()),
            VectorValues::UInt64(v) => VectorValues::UInt64(v[offset..offset + count].to_vec()),
            VectorValues::Float32(v) => VectorValues::Float32(v[offset..offset + count].to_vec()),
            VectorValues::Float64(v) => VectorValues::Float64(v[offset..offset + count].to_vec()),
            VectorValues::String(v) => VectorValues::String(v[offset..offset + count].to_vec()),
            VectorValues::Struct(children) => VectorValues::Struct(
                children.iter().map(|c| c.window(offset, count)).collect(),
            ),
            VectorValues::List {
                entries,
                child,
                child_size,
            } => VectorValues::List {
                entries: entries[offset..offset + count].to_vec(),
                child: child.clone(),
                child_size: *child_size,
            },
            VectorValues::Array { child } => {
                let size = self.ty.array_size();
                VectorValues::Array {
                    child: Box::new(child.window(offset * size, count * size)),
                }
            }
        };
        let mut validity = ValidityMask::new(count);
        validity.copy_from(&self.validity, offset, 0, count);
        Vector {
            ty: self.ty.clone(),
            kind: VectorKind::Flat,
            validity,
            values,
        }
    }

    /// Reads one row as an owned value. Constant vectors read row zero.
    pub fn value(&self, idx: usize) -> DataValue {
        let idx = match self.kind {
            VectorKind::Flat => idx,
            VectorKind::Constant => 0,
        };
        if !self.validity.row_is_valid(idx) {
            return DataValue::Null;
        }
        self.value_at(idx)
    }

    fn value_at(&self, idx: usize) -> DataValue {
        match &self.values {
            VectorValues::Int8(v) => DataValue::Int8(v[idx]),
            VectorValues::Int16(v) => DataValue::Int16(v[idx]),
            VectorValues::Int32(v) => DataValue::Int32(v[idx]),
            VectorValues::Int64(v) => DataValue::Int64(v[idx]),
            VectorValues::UInt8(v) => DataValue::UInt8(v[idx]),
            VectorValues::UInt16(v) => DataValue::UInt16(v[idx]),
            VectorValues::UInt32(v) => DataValue::UInt32(v[idx]),
            VectorValues::UInt64(v) => DataValue::UInt64(v[idx]),
            VectorValues::Float32(v) => DataValue::Float32(v[idx]),
            VectorValues::Float64(v) => DataValue::Float64(v[idx]),
            VectorValues::String(v) => DataValue::String(v[idx].clone()),
            _ => panic!("value() is only defined for scalar vectors"),
        }
    }

    /// Writes one row. `Null` clears the validity bit.
    pub fn set_value(&mut self, idx: usize, value: &DataValue) {
        if value.is_null() {
            self.validity.set_invalid(idx);
            return;
        }
        self.validity.set_valid(idx);
        self.write_value(idx, value);
    }

    fn write_value(&mut self, idx: usize, value: &DataValue) {
        match (&mut self.values, value) {
            (VectorValues::Int8(v), DataValue::Int8(x)) => v[idx] = *x,
            (VectorValues::Int8(v), DataValue::Bool(x)) => v[idx] = *x as i8,
            (VectorValues::Int16(v), DataValue::Int16(x)) => v[idx] = *x,
            (VectorValues::Int32(v), DataValue::Int32(x)) => v[idx] = *x,
            (VectorValues::Int64(v), DataValue::Int64(x)) => v[idx] = *x,
            (VectorValues::UInt8(v), DataValue::UInt8(x)) => v[idx] = *x,
            (VectorValues::UInt16(v), DataValue::UInt16(x)) => v[idx] = *x,
            (VectorValues::UInt32(v), DataValue::UInt32(x)) => v[idx] = *x,
            (VectorValues::UInt64(v), DataValue::UInt64(x)) => v[idx] = *x,
            (VectorValues::Float32(v), DataValue::Float32(x)) => v[idx] = *x,
            (VectorValues::Float64(v), DataValue::Float64(x)) => v[idx] = *x,
            (VectorValues::String(v), DataValue::String(x)) => v[idx] = x.clone(),
            (values, value) => panic!(
                "type mismatch writing {value:?} into {:?}",
                std::mem::discriminant(values)
            ),
        }
    }

    /// Appends the first `count` rows of `other` to this flat vector,
    /// growing it. Used to accumulate list children across point fetches.
    pub fn append(&mut self, other: &Vector, count: usize) {
        let base = self.capacity();
        match (&mut self.values, &other.values) {
            (VectorValues::Int8(a), VectorValues::Int8(b)) => a.extend_from_slice(&b[..count]),
            (VectorValues::Int16(a), VectorValues::Int16(b)) => a.extend_from_slice(&b[..count]),
            (VectorValues::Int32(a), VectorValues::Int32(b)) => a.extend_from_slice(&b[..count]),
            (VectorValues::Int64(a), VectorValues::Int64(b)) => a.extend_from_slice(&b[..count]),
            (VectorValues::UInt8(a), VectorValues::UInt8(b)) => a.extend_from_slice(&b[..count]),
            (VectorValues::UInt16(a), VectorValues::UInt16(b)) => a.extend_from_slice(&b[..count]),
            (VectorValues::UInt32(a), VectorValues::UInt32(b)) => a.extend_from_slice(&b[..count]),
            (VectorValues::UInt64(a), VectorValues::UInt64(b)) => a.extend_from_slice(&b[..count]),
            (VectorValues::Float32(a), VectorValues::Float32(b)) => {
                a.extend_from_slice(&b[..count])
            }
            (VectorValues::Float64(a), VectorValues::Float64(b)) => {
                a.extend_from_slice(&b[..count])
            }
            (VectorValues::String(a), VectorValues::String(b)) => {
                a.extend_from_slice(&b[..count])
            }
            (VectorValues::Struct(a), VectorValues::Struct(b)) => {
                for (ac, bc) in a.iter_mut().zip(b) {
                    ac.append(bc, count);
                }
            }
            _ => panic!("append between incompatible vectors"),
        }
        self.validity.resize(base + count);
        self.validity.copy_from(&other.validity, 0, base, count);
    }

    /// Copies `count` rows of `source` starting at `source_offset` into
    /// this vector at `target_offset`.
    pub fn copy_rows(
        &mut self,
        source: &Vector,
        count: usize,
        source_offset: usize,
        target_offset: usize,
    ) {
        for i in 0..count {
            let value = source.value(source_offset + i);
            self.set_value(target_offset + i, &value);
        }
    }

    /// A uniform selection+validity view over flat and constant vectors.
    pub fn to_unified(&self, count: usize) -> UnifiedFormat<'_> {
        UnifiedFormat {
            vector: self,
            count,
        }
    }

    /// Builds a flat vector from owned values; a test and boundary helper.
    pub fn from_values(ty: LogicalType, values: &[DataValue]) -> Self {
        let mut vector = Vector::with_capacity(ty, values.len().max(1));
        for (i, v) in values.iter().enumerate() {
            vector.set_value(i, v);
        }
        vector
    }
}

/// A read view presenting any vector as `index -> (value, validity)`.
#[derive(Clone, Copy)]
pub struct UnifiedFormat<'a> {
    vector: &'a Vector,
    count: usize,
}

impl<'a> UnifiedFormat<'a> {
    pub fn count(&self) -> usize {
        self.count
    }

    /// Maps a logical row to its physical slot.
    pub fn index(&self, i: usize) -> usize {
        match self.vector.kind() {
            VectorKind::Flat => i,
            VectorKind::Constant => 0,
        }
    }

    pub fn is_valid(&self, i: usize) -> bool {
        self.vector.validity.row_is_valid(self.index(i))
    }

    pub fn all_valid(&self) -> bool {
        self.vector.validity.all_valid()
    }

    pub fn get<T: NativeVector>(&self, i: usize) -> T {
        self.vector.data::<T>()[self.index(i)]
    }

    pub fn str_at(&self, i: usize) -> &'a str {
        &self.vector.strings()[self.index(i)]
    }

    pub fn list_entry(&self, i: usize) -> ListEntry {
        self.vector.list_entries()[self.index(i)]
    }

    pub fn vector(&self) -> &'a Vector {
        self.vector
    }
}

fn gather<T: Copy + Default>(values: &mut [T], sel: &SelVector, count: usize) {
    let gathered: Vec<T> = (0..count).map(|i| values[sel.get(i)]).collect();
    values[..count].copy_from_slice(&gathered);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_roundtrip() {
        let mut v = Vector::with_capacity(LogicalType::BigInt, 4);
        v.set_value(0, &DataValue::Int64(1));
        v.set_value(1, &DataValue::Null);
        v.set_value(2, &DataValue::Int64(3));
        assert_eq!(v.value(0), DataValue::Int64(1));
        assert_eq!(v.value(1), DataValue::Null);
        assert_eq!(v.value(2), DataValue::Int64(3));
    }

    #[test]
    fn constant_flatten() {
        let mut v = Vector::with_capacity(LogicalType::Integer, 4);
        v.reference(&DataValue::Int32(9));
        assert_eq!(v.value(3), DataValue::Int32(9));
        v.flatten(4);
        assert_eq!(v.kind(), VectorKind::Flat);
        assert_eq!(v.value(3), DataValue::Int32(9));
    }

    #[test]
    fn slice_compacts() {
        let mut v = Vector::from_values(
            LogicalType::Integer,
            &[
                DataValue::Int32(10),
                DataValue::Int32(20),
                DataValue::Int32(30),
            ],
        );
        let mut sel = SelVector::with_capacity(2);
        sel.set(0, 2);
        sel.set(1, 0);
        v.slice(&sel, 2);
        assert_eq!(v.value(0), DataValue::Int32(30));
        assert_eq!(v.value(1), DataValue::Int32(10));
    }

    #[test]
    fn sequence_fills() {
        let mut v = Vector::with_capacity(LogicalType::BigInt, 8);
        v.sequence(5, 1, 8);
        assert_eq!(v.data::<i64>()[..3], [5, 6, 7]);
    }
}
