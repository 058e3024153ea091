//! Value codecs used as type parameters of streaming members.
//!
//! A member such as a pipe or wire is generic over a [`Codec`] that turns its
//! value type into one [`ElementData`] node and back. Memory accessors use the
//! [`SliceCodec`] form, which transfers runs of elements.

use std::marker::PhantomData;

use raconteur_value::{
    ElementData, MultiDimArray, NumericArray, NumericElement, Result, ValueError,
};

use crate::pack::{
    pack_record, pack_record_array, pack_record_multidim, unpack_record, unpack_record_array,
    unpack_record_multidim,
};
use crate::record::Record;

/// Converts a member value to and from a wire node.
pub trait Codec: Send + Sync + 'static {
    type Value: Clone + Send + Sync + 'static;

    fn pack(value: &Self::Value) -> Result<ElementData>;
    fn unpack(data: &ElementData) -> Result<Self::Value>;
}

/// Converts runs of memory elements to and from wire nodes.
pub trait SliceCodec: Send + Sync + 'static {
    type Element: Clone + Default + Send + Sync + 'static;

    fn pack_slice(values: &[Self::Element]) -> Result<ElementData>;
    fn unpack_slice(data: &ElementData) -> Result<Vec<Self::Element>>;
    fn pack_multidim(value: &MultiDimArray<Self::Element>) -> Result<ElementData>;
    fn unpack_multidim(data: &ElementData) -> Result<MultiDimArray<Self::Element>>;
}

/// One numeric value.
pub struct ScalarCodec<T>(PhantomData<fn() -> T>);

/// A numeric array.
pub struct ArrayCodec<T>(PhantomData<fn() -> T>);

/// A numeric multi-dimensional array.
pub struct MultiDimCodec<T>(PhantomData<fn() -> T>);

/// A UTF-8 string.
pub struct StringCodec;

/// Any wire node, passed through unchanged.
pub struct VarCodec;

/// No value. Used by generators without a parameter or return.
pub struct UnitCodec;

/// One record of any family.
pub struct RecordCodec<R>(PhantomData<fn() -> R>);

/// An array of records.
pub struct RecordArrayCodec<R>(PhantomData<fn() -> R>);

/// A multi-dimensional array of records.
pub struct RecordMultiDimCodec<R>(PhantomData<fn() -> R>);

impl<T: NumericElement> Codec for ScalarCodec<T> {
    type Value = T;

    fn pack(value: &T) -> Result<ElementData> {
        Ok(NumericArray::from_vec(vec![*value]).into())
    }

    fn unpack(data: &ElementData) -> Result<T> {
        data.as_scalar::<T>()
    }
}

impl<T: NumericElement> Codec for ArrayCodec<T> {
    type Value = Vec<T>;

    fn pack(value: &Vec<T>) -> Result<ElementData> {
        Ok(NumericArray::from_vec(value.clone()).into())
    }

    fn unpack(data: &ElementData) -> Result<Vec<T>> {
        Ok(data.as_slice::<T>()?.to_vec())
    }
}

impl<T: NumericElement> Codec for MultiDimCodec<T> {
    type Value = MultiDimArray<T>;

    fn pack(value: &MultiDimArray<T>) -> Result<ElementData> {
        Ok(value.pack().into())
    }

    fn unpack(data: &ElementData) -> Result<MultiDimArray<T>> {
        MultiDimArray::unpack(data.as_list()?)
    }
}

impl Codec for StringCodec {
    type Value = String;

    fn pack(value: &String) -> Result<ElementData> {
        Ok(ElementData::String(value.clone()))
    }

    fn unpack(data: &ElementData) -> Result<String> {
        Ok(data.as_str()?.to_string())
    }
}

impl Codec for VarCodec {
    type Value = ElementData;

    fn pack(value: &ElementData) -> Result<ElementData> {
        Ok(value.clone())
    }

    fn unpack(data: &ElementData) -> Result<ElementData> {
        Ok(data.clone())
    }
}

impl Codec for UnitCodec {
    type Value = ();

    fn pack(_: &()) -> Result<ElementData> {
        Ok(ElementData::Void)
    }

    fn unpack(data: &ElementData) -> Result<()> {
        if data.is_void() {
            Ok(())
        } else {
            Err(ValueError::DataType(format!(
                "expected void, found {}",
                data.data_type()
            )))
        }
    }
}

impl<R: Record> Codec for RecordCodec<R> {
    type Value = R;

    fn pack(value: &R) -> Result<ElementData> {
        Ok(pack_record(value)?.into())
    }

    fn unpack(data: &ElementData) -> Result<R> {
        unpack_record(data.as_list()?)
    }
}

impl<R: Record> Codec for RecordArrayCodec<R> {
    type Value = Vec<R>;

    fn pack(value: &Vec<R>) -> Result<ElementData> {
        Ok(pack_record_array(value)?.into())
    }

    fn unpack(data: &ElementData) -> Result<Vec<R>> {
        unpack_record_array(data.as_list()?)
    }
}

impl<R: Record> Codec for RecordMultiDimCodec<R> {
    type Value = MultiDimArray<R>;

    fn pack(value: &MultiDimArray<R>) -> Result<ElementData> {
        Ok(pack_record_multidim(value)?.into())
    }

    fn unpack(data: &ElementData) -> Result<MultiDimArray<R>> {
        unpack_record_multidim(data.as_list()?)
    }
}

impl<T: NumericElement> SliceCodec for ArrayCodec<T> {
    type Element = T;

    fn pack_slice(values: &[T]) -> Result<ElementData> {
        Ok(NumericArray::from_vec(values.to_vec()).into())
    }

    fn unpack_slice(data: &ElementData) -> Result<Vec<T>> {
        Ok(data.as_slice::<T>()?.to_vec())
    }

    fn pack_multidim(value: &MultiDimArray<T>) -> Result<ElementData> {
        Ok(value.pack().into())
    }

    fn unpack_multidim(data: &ElementData) -> Result<MultiDimArray<T>> {
        MultiDimArray::unpack(data.as_list()?)
    }
}

impl<R: Record + Default> SliceCodec for RecordArrayCodec<R> {
    type Element = R;

    fn pack_slice(values: &[R]) -> Result<ElementData> {
        Ok(pack_record_array(values)?.into())
    }

    fn unpack_slice(data: &ElementData) -> Result<Vec<R>> {
        unpack_record_array(data.as_list()?)
    }

    fn pack_multidim(value: &MultiDimArray<R>) -> Result<ElementData> {
        Ok(pack_record_multidim(value)?.into())
    }

    fn unpack_multidim(data: &ElementData) -> Result<MultiDimArray<R>> {
        unpack_record_multidim(data.as_list()?)
    }
}
