//! Helpers for writing [`FieldRecord`](crate::FieldRecord) implementations.

use raconteur_value::{ElementList, MessageElement, NumericElement, Result, ValueError};

use crate::pack::{pack_record, unpack_record};
use crate::record::Record;

/// Required numeric scalar field.
pub fn scalar<T: NumericElement>(list: &ElementList, name: &str) -> Result<T> {
    list.find(name)?.data.as_scalar::<T>()
}

/// Required numeric array field.
pub fn array<T: NumericElement>(list: &ElementList, name: &str) -> Result<Vec<T>> {
    Ok(list.find(name)?.data.as_slice::<T>()?.to_vec())
}

/// Required fixed-length numeric array field.
pub fn fixed_array<T: NumericElement, const N: usize>(
    list: &ElementList,
    name: &str,
) -> Result<[T; N]> {
    let values = list.find(name)?.data.as_slice::<T>()?;
    values.try_into().map_err(|_| {
        ValueError::DataType(format!(
            "field '{name}' holds {} elements, expected {N}",
            values.len()
        ))
    })
}

/// Required string field.
pub fn string(list: &ElementList, name: &str) -> Result<String> {
    Ok(list.find(name)?.data.as_str()?.to_string())
}

/// Required nested record field.
pub fn record<R: Record>(list: &ElementList, name: &str) -> Result<R> {
    unpack_record(list.find(name)?.data.as_list()?)
}

/// Element holding a nested record.
pub fn record_element<R: Record>(name: &str, value: &R) -> Result<MessageElement> {
    Ok(MessageElement::new(name, pack_record(value)?))
}
