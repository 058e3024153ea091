//! Typed contiguous numeric arrays.
//!
//! Unsigned kinds use Rust's native unsigned integers, so no sign masking is
//! ever applied when values cross the wire.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ValueError};
use crate::types::DataType;

/// Complex number with `f64` parts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CDouble {
    pub real: f64,
    pub imag: f64,
}

impl CDouble {
    pub fn new(real: f64, imag: f64) -> Self {
        Self { real, imag }
    }
}

/// Complex number with `f32` parts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CSingle {
    pub real: f32,
    pub imag: f32,
}

impl CSingle {
    pub fn new(real: f32, imag: f32) -> Self {
        Self { real, imag }
    }
}

/// A typed, length-known sequence of one numeric kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "values", rename_all = "snake_case")]
pub enum NumericArray {
    Double(Vec<f64>),
    Single(Vec<f32>),
    Int8(Vec<i8>),
    #[serde(rename = "uint8")]
    UInt8(Vec<u8>),
    Int16(Vec<i16>),
    #[serde(rename = "uint16")]
    UInt16(Vec<u16>),
    Int32(Vec<i32>),
    #[serde(rename = "uint32")]
    UInt32(Vec<u32>),
    Int64(Vec<i64>),
    #[serde(rename = "uint64")]
    UInt64(Vec<u64>),
    Bool(Vec<bool>),
    #[serde(rename = "cdouble")]
    CDouble(Vec<CDouble>),
    #[serde(rename = "csingle")]
    CSingle(Vec<CSingle>),
}

/// A scalar type that can live in a [`NumericArray`].
pub trait NumericElement:
    Copy + Default + PartialEq + std::fmt::Debug + Send + Sync + 'static
{
    /// Wire tag for arrays of this kind.
    const DATA_TYPE: DataType;

    /// Wrap an owned vector.
    fn into_array(values: Vec<Self>) -> NumericArray;

    /// Borrow the contents if the array holds this kind.
    fn from_array(array: &NumericArray) -> Option<&[Self]>;

    /// Append the little-endian encoding.
    fn put_le(self, dst: &mut BytesMut);

    /// Consume one little-endian value. Caller guarantees enough bytes.
    fn get_le(src: &mut &[u8]) -> Self;
}

macro_rules! numeric_element {
    ($ty:ty, $variant:ident, $put:ident, $get:ident) => {
        impl NumericElement for $ty {
            const DATA_TYPE: DataType = DataType::$variant;

            fn into_array(values: Vec<Self>) -> NumericArray {
                NumericArray::$variant(values)
            }

            fn from_array(array: &NumericArray) -> Option<&[Self]> {
                match array {
                    NumericArray::$variant(values) => Some(values),
                    _ => None,
                }
            }

            fn put_le(self, dst: &mut BytesMut) {
                dst.$put(self);
            }

            fn get_le(src: &mut &[u8]) -> Self {
                src.$get()
            }
        }
    };
}

numeric_element!(f64, Double, put_f64_le, get_f64_le);
numeric_element!(f32, Single, put_f32_le, get_f32_le);
numeric_element!(i8, Int8, put_i8, get_i8);
numeric_element!(u8, UInt8, put_u8, get_u8);
numeric_element!(i16, Int16, put_i16_le, get_i16_le);
numeric_element!(u16, UInt16, put_u16_le, get_u16_le);
numeric_element!(i32, Int32, put_i32_le, get_i32_le);
numeric_element!(u32, UInt32, put_u32_le, get_u32_le);
numeric_element!(i64, Int64, put_i64_le, get_i64_le);
numeric_element!(u64, UInt64, put_u64_le, get_u64_le);

impl NumericElement for bool {
    const DATA_TYPE: DataType = DataType::Bool;

    fn into_array(values: Vec<Self>) -> NumericArray {
        NumericArray::Bool(values)
    }

    fn from_array(array: &NumericArray) -> Option<&[Self]> {
        match array {
            NumericArray::Bool(values) => Some(values),
            _ => None,
        }
    }

    fn put_le(self, dst: &mut BytesMut) {
        dst.put_u8(u8::from(self));
    }

    fn get_le(src: &mut &[u8]) -> Self {
        src.get_u8() != 0
    }
}

impl NumericElement for CDouble {
    const DATA_TYPE: DataType = DataType::CDouble;

    fn into_array(values: Vec<Self>) -> NumericArray {
        NumericArray::CDouble(values)
    }

    fn from_array(array: &NumericArray) -> Option<&[Self]> {
        match array {
            NumericArray::CDouble(values) => Some(values),
            _ => None,
        }
    }

    fn put_le(self, dst: &mut BytesMut) {
        dst.put_f64_le(self.real);
        dst.put_f64_le(self.imag);
    }

    fn get_le(src: &mut &[u8]) -> Self {
        let real = src.get_f64_le();
        let imag = src.get_f64_le();
        CDouble { real, imag }
    }
}

impl NumericElement for CSingle {
    const DATA_TYPE: DataType = DataType::CSingle;

    fn into_array(values: Vec<Self>) -> NumericArray {
        NumericArray::CSingle(values)
    }

    fn from_array(array: &NumericArray) -> Option<&[Self]> {
        match array {
            NumericArray::CSingle(values) => Some(values),
            _ => None,
        }
    }

    fn put_le(self, dst: &mut BytesMut) {
        dst.put_f32_le(self.real);
        dst.put_f32_le(self.imag);
    }

    fn get_le(src: &mut &[u8]) -> Self {
        let real = src.get_f32_le();
        let imag = src.get_f32_le();
        CSingle { real, imag }
    }
}

fn put_all<T: NumericElement>(values: &[T], dst: &mut BytesMut) {
    for value in values {
        value.put_le(dst);
    }
}

fn get_all<T: NumericElement>(count: usize, src: &mut &[u8]) -> Vec<T> {
    (0..count).map(|_| T::get_le(src)).collect()
}

impl NumericArray {
    /// Build an array from an owned vector of any numeric kind.
    pub fn from_vec<T: NumericElement>(values: Vec<T>) -> Self {
        T::into_array(values)
    }

    /// Wire tag of the stored kind.
    pub fn data_type(&self) -> DataType {
        match self {
            NumericArray::Double(_) => DataType::Double,
            NumericArray::Single(_) => DataType::Single,
            NumericArray::Int8(_) => DataType::Int8,
            NumericArray::UInt8(_) => DataType::UInt8,
            NumericArray::Int16(_) => DataType::Int16,
            NumericArray::UInt16(_) => DataType::UInt16,
            NumericArray::Int32(_) => DataType::Int32,
            NumericArray::UInt32(_) => DataType::UInt32,
            NumericArray::Int64(_) => DataType::Int64,
            NumericArray::UInt64(_) => DataType::UInt64,
            NumericArray::Bool(_) => DataType::Bool,
            NumericArray::CDouble(_) => DataType::CDouble,
            NumericArray::CSingle(_) => DataType::CSingle,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            NumericArray::Double(v) => v.len(),
            NumericArray::Single(v) => v.len(),
            NumericArray::Int8(v) => v.len(),
            NumericArray::UInt8(v) => v.len(),
            NumericArray::Int16(v) => v.len(),
            NumericArray::UInt16(v) => v.len(),
            NumericArray::Int32(v) => v.len(),
            NumericArray::UInt32(v) => v.len(),
            NumericArray::Int64(v) => v.len(),
            NumericArray::UInt64(v) => v.len(),
            NumericArray::Bool(v) => v.len(),
            NumericArray::CDouble(v) => v.len(),
            NumericArray::CSingle(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrow as a typed slice, failing with a data type error on kind mismatch.
    pub fn as_slice<T: NumericElement>(&self) -> Result<&[T]> {
        T::from_array(self).ok_or_else(|| {
            ValueError::DataType(format!(
                "expected {} array, found {}",
                T::DATA_TYPE,
                self.data_type()
            ))
        })
    }

    /// Append the little-endian payload (no header).
    pub fn write_le(&self, dst: &mut BytesMut) {
        let size = self.data_type().element_size().unwrap_or(0);
        dst.reserve(size * self.len());
        match self {
            NumericArray::Double(v) => put_all(v, dst),
            NumericArray::Single(v) => put_all(v, dst),
            NumericArray::Int8(v) => put_all(v, dst),
            NumericArray::UInt8(v) => dst.put_slice(v),
            NumericArray::Int16(v) => put_all(v, dst),
            NumericArray::UInt16(v) => put_all(v, dst),
            NumericArray::Int32(v) => put_all(v, dst),
            NumericArray::UInt32(v) => put_all(v, dst),
            NumericArray::Int64(v) => put_all(v, dst),
            NumericArray::UInt64(v) => put_all(v, dst),
            NumericArray::Bool(v) => put_all(v, dst),
            NumericArray::CDouble(v) => put_all(v, dst),
            NumericArray::CSingle(v) => put_all(v, dst),
        }
    }

    /// Decode `count` little-endian values of `data_type`, advancing `src`.
    pub fn read_le(data_type: DataType, count: usize, src: &mut &[u8]) -> Result<Self> {
        let size = data_type.element_size().ok_or_else(|| {
            ValueError::DataType(format!("{data_type} is not a numeric type"))
        })?;
        let needed = count.checked_mul(size).ok_or_else(|| {
            ValueError::Truncated(format!("numeric count {count} overflows"))
        })?;
        if src.len() < needed {
            return Err(ValueError::Truncated(format!(
                "{data_type} array needs {needed} bytes, {} available",
                src.len()
            )));
        }

        Ok(match data_type {
            DataType::Double => NumericArray::Double(get_all(count, src)),
            DataType::Single => NumericArray::Single(get_all(count, src)),
            DataType::Int8 => NumericArray::Int8(get_all(count, src)),
            DataType::UInt8 => NumericArray::UInt8(get_all(count, src)),
            DataType::Int16 => NumericArray::Int16(get_all(count, src)),
            DataType::UInt16 => NumericArray::UInt16(get_all(count, src)),
            DataType::Int32 => NumericArray::Int32(get_all(count, src)),
            DataType::UInt32 => NumericArray::UInt32(get_all(count, src)),
            DataType::Int64 => NumericArray::Int64(get_all(count, src)),
            DataType::UInt64 => NumericArray::UInt64(get_all(count, src)),
            DataType::Bool => NumericArray::Bool(get_all(count, src)),
            DataType::CDouble => NumericArray::CDouble(get_all(count, src)),
            DataType::CSingle => NumericArray::CSingle(get_all(count, src)),
            other => {
                return Err(ValueError::DataType(format!(
                    "{other} is not a numeric type"
                )))
            }
        })
    }
}
