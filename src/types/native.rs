// Copyright 2025 Mica Project Authors. Licensed under Apache-2.0.

use bytes::{Buf, BufMut};

use super::{DataValue, PhysicalType};

/// A fixed-width primitive the storage layer can move in and out of raw
/// block bytes. All encodings are little-endian.
pub trait NativeType:
    Copy + Clone + Default + PartialEq + PartialOrd + Send + Sync + 'static
{
    /// Width of one encoded element in bytes.
    const WIDTH: usize;
    const PHYSICAL: PhysicalType;

    fn encode(&self, buf: &mut impl BufMut);
    fn decode(buf: &mut impl Buf) -> Self;

    fn to_value(self) -> DataValue;
    fn from_value(value: &DataValue) -> Option<Self>;
}

macro_rules! impl_native_type {
    ($ty:ty, $physical:ident, $variant:ident, $put:ident, $get:ident) => {
        impl NativeType for $ty {
            const WIDTH: usize = std::mem::size_of::<$ty>();
            const PHYSICAL: PhysicalType = PhysicalType::$physical;

            fn encode(&self, buf: &mut impl BufMut) {
                buf.$put(*self);
            }

            fn decode(buf: &mut impl Buf) -> Self {
                buf.$get()
            }

            fn to_value(self) -> DataValue {
                DataValue::$variant(self)
            }

            fn from_value(value: &DataValue) -> Option<Self> {
                match value {
                    DataValue::$variant(v) => Some(*v),
                    _ => None,
                }
            }
        }
    };
}

impl_native_type!(i8, Int8, Int8, put_i8, get_i8);
impl_native_type!(i16, Int16, Int16, put_i16_le, get_i16_le);
impl_native_type!(i32, Int32, Int32, put_i32_le, get_i32_le);
impl_native_type!(i64, Int64, Int64, put_i64_le, get_i64_le);
impl_native_type!(u8, UInt8, UInt8, put_u8, get_u8);
impl_native_type!(u16, UInt16, UInt16, put_u16_le, get_u16_le);
impl_native_type!(u32, UInt32, UInt32, put_u32_le, get_u32_le);
impl_native_type!(u64, UInt64, UInt64, put_u64_le, get_u64_le);
impl_native_type!(f32, Float32, Float32, put_f32_le, get_f32_le);
impl_native_type!(f64, Float64, Float64, put_f64_le, get_f64_le);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_i64() {
        let mut buf = vec![];
        (-42i64).encode(&mut buf);
        assert_eq!(buf.len(), i64::WIDTH);
        assert_eq!(i64::decode(&mut buf.as_slice()), -42);
    }

    #[test]
    fn value_conversion() {
        assert_eq!(7i32.to_value(), DataValue::Int32(7));
        assert_eq!(i32::from_value(&DataValue::Int32(7)), Some(7));
        assert_eq!(i32::from_value(&DataValue::Int64(7)), None);
    }
}
