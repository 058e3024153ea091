//! Record families and their wire layouts.
//!
//! A record type implements [`Record`] plus one of [`FieldRecord`] (named
//! fields: structures and pods) or [`FlatRecord`] (a fixed run of numeric
//! elements: named arrays and astructures). The record's `Kind` selects the
//! wire tags and the array layout; everything else is shared.

use raconteur_value::{
    DataType, ElementList, MessageElement, NumericElement, Result, ValueError,
};

/// Element name of the flattened storage in array encodings.
pub const ARRAY: &str = "array";

/// Family a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Structure,
    Pod,
    NamedArray,
    AStructure,
}

impl Family {
    pub fn name(self) -> &'static str {
        match self {
            Family::Structure => "structure",
            Family::Pod => "pod",
            Family::NamedArray => "namedarray",
            Family::AStructure => "astructure",
        }
    }
}

/// A named value type that can cross a member boundary.
pub trait Record: Clone + Send + Sync + 'static {
    /// Family strategy used to lay the record out on the wire.
    type Kind: RecordKind<Self>;

    /// Qualified type name written into every encoding.
    const TYPE_NAME: &'static str;
}

/// Records encoded as one element per named field.
pub trait FieldRecord: Record {
    fn pack_fields(&self) -> Result<Vec<MessageElement>>;

    /// Rebuild from a list whose tag and type name were already checked.
    fn unpack_fields(list: &ElementList) -> Result<Self>;
}

/// Records encoded as a fixed number of numeric elements.
pub trait FlatRecord: Record {
    type Element: NumericElement;

    /// Elements per record. Must be non-zero.
    const ELEMENT_COUNT: usize;

    /// Append exactly `ELEMENT_COUNT` values.
    fn flatten(&self, out: &mut Vec<Self::Element>);

    /// Rebuild from exactly `ELEMENT_COUNT` values.
    fn restore(values: &[Self::Element]) -> Self;
}

/// Per-family layout strategy.
pub trait RecordKind<R: Record> {
    const FAMILY: Family;
    /// Tag of a single record node.
    const SCALAR: DataType;
    /// Tag of an array-of-record encoding.
    const ARRAY: DataType;
    /// Tag of a multi-dimensional encoding.
    const MULTIDIM: DataType;

    fn pack_scalar(record: &R) -> Result<ElementList>;
    fn unpack_scalar(list: &ElementList) -> Result<R>;
    fn pack_array(records: &[R]) -> Result<ElementList>;
    fn unpack_array(list: &ElementList) -> Result<Vec<R>>;
}

/// Plain structures: a `Structure` node per record, arrays as indexed `List`s.
#[derive(Debug, Clone, Copy)]
pub struct StructureKind;

/// Fixed-layout pods: arrays are `PodArray`s of indexed `Pod` nodes, and a
/// single pod is an array of length one.
#[derive(Debug, Clone, Copy)]
pub struct PodKind;

/// Named arrays: flattened numerics under one `"array"` element.
#[derive(Debug, Clone, Copy)]
pub struct NamedArrayKind;

/// AStructures: same flattened layout as named arrays, separate tags.
#[derive(Debug, Clone, Copy)]
pub struct AStructureKind;

impl<R: FieldRecord> RecordKind<R> for StructureKind {
    const FAMILY: Family = Family::Structure;
    const SCALAR: DataType = DataType::Structure;
    const ARRAY: DataType = DataType::List;
    const MULTIDIM: DataType = DataType::MultiDimArray;

    fn pack_scalar(record: &R) -> Result<ElementList> {
        Ok(ElementList::new(
            DataType::Structure,
            R::TYPE_NAME,
            record.pack_fields()?,
        ))
    }

    fn unpack_scalar(list: &ElementList) -> Result<R> {
        list.expect_type(DataType::Structure, R::TYPE_NAME)?;
        R::unpack_fields(list)
    }

    fn pack_array(records: &[R]) -> Result<ElementList> {
        pack_indexed::<R, Self>(DataType::List, records)
    }

    fn unpack_array(list: &ElementList) -> Result<Vec<R>> {
        unpack_indexed::<R, Self>(DataType::List, list)
    }
}

impl<R: FieldRecord> RecordKind<R> for PodKind {
    const FAMILY: Family = Family::Pod;
    const SCALAR: DataType = DataType::Pod;
    const ARRAY: DataType = DataType::PodArray;
    const MULTIDIM: DataType = DataType::PodMultiDimArray;

    fn pack_scalar(record: &R) -> Result<ElementList> {
        Self::pack_array(std::slice::from_ref(record))
    }

    fn unpack_scalar(list: &ElementList) -> Result<R> {
        single(Self::unpack_array(list)?)
    }

    fn pack_array(records: &[R]) -> Result<ElementList> {
        pack_indexed::<R, Self>(DataType::PodArray, records)
    }

    fn unpack_array(list: &ElementList) -> Result<Vec<R>> {
        unpack_indexed::<R, Self>(DataType::PodArray, list)
    }
}

impl<R: FlatRecord> RecordKind<R> for NamedArrayKind {
    const FAMILY: Family = Family::NamedArray;
    const SCALAR: DataType = DataType::NamedArray;
    const ARRAY: DataType = DataType::NamedArrayArray;
    const MULTIDIM: DataType = DataType::NamedArrayMultiDimArray;

    fn pack_scalar(record: &R) -> Result<ElementList> {
        pack_flat(DataType::NamedArrayArray, std::slice::from_ref(record))
    }

    fn unpack_scalar(list: &ElementList) -> Result<R> {
        single(unpack_flat(DataType::NamedArrayArray, list)?)
    }

    fn pack_array(records: &[R]) -> Result<ElementList> {
        pack_flat(DataType::NamedArrayArray, records)
    }

    fn unpack_array(list: &ElementList) -> Result<Vec<R>> {
        unpack_flat(DataType::NamedArrayArray, list)
    }
}

impl<R: FlatRecord> RecordKind<R> for AStructureKind {
    const FAMILY: Family = Family::AStructure;
    const SCALAR: DataType = DataType::AStructure;
    const ARRAY: DataType = DataType::AStructureArray;
    const MULTIDIM: DataType = DataType::AStructureMultiDimArray;

    fn pack_scalar(record: &R) -> Result<ElementList> {
        pack_flat(DataType::AStructureArray, std::slice::from_ref(record))
    }

    fn unpack_scalar(list: &ElementList) -> Result<R> {
        single(unpack_flat(DataType::AStructureArray, list)?)
    }

    fn pack_array(records: &[R]) -> Result<ElementList> {
        pack_flat(DataType::AStructureArray, records)
    }

    fn unpack_array(list: &ElementList) -> Result<Vec<R>> {
        unpack_flat(DataType::AStructureArray, list)
    }
}

fn single<R>(mut records: Vec<R>) -> Result<R> {
    if records.len() != 1 {
        return Err(ValueError::DataType(format!(
            "expected a single record, found {}",
            records.len()
        )));
    }
    records
        .pop()
        .ok_or_else(|| ValueError::DataType("expected a single record".to_string()))
}

/// Element nodes `0..N-1`, each a `K::SCALAR` list of the record's fields.
fn pack_indexed<R, K>(tag: DataType, records: &[R]) -> Result<ElementList>
where
    R: FieldRecord,
    K: RecordKind<R>,
{
    let mut elements = Vec::with_capacity(records.len());
    for (i, record) in records.iter().enumerate() {
        let index = i32::try_from(i)
            .map_err(|_| ValueError::OutOfRange(format!("record index {i} exceeds i32")))?;
        let node = ElementList::new(K::SCALAR, R::TYPE_NAME, record.pack_fields()?);
        elements.push(MessageElement::new(index, node));
    }
    Ok(ElementList::new(tag, R::TYPE_NAME, elements))
}

fn unpack_indexed<R, K>(tag: DataType, list: &ElementList) -> Result<Vec<R>>
where
    R: FieldRecord,
    K: RecordKind<R>,
{
    list.expect_type(tag, R::TYPE_NAME)?;
    list.check_indexed()?;
    list.elements
        .iter()
        .map(|element| {
            let node = element.data.as_list()?;
            node.expect_type(K::SCALAR, R::TYPE_NAME)?;
            R::unpack_fields(node)
        })
        .collect()
}

fn pack_flat<R: FlatRecord>(tag: DataType, records: &[R]) -> Result<ElementList> {
    let mut values = Vec::with_capacity(records.len() * R::ELEMENT_COUNT);
    for record in records {
        let before = values.len();
        record.flatten(&mut values);
        if values.len() - before != R::ELEMENT_COUNT {
            return Err(ValueError::DataType(format!(
                "{} flattened to {} elements, expected {}",
                R::TYPE_NAME,
                values.len() - before,
                R::ELEMENT_COUNT
            )));
        }
    }
    Ok(ElementList::new(
        tag,
        R::TYPE_NAME,
        vec![MessageElement::numeric(ARRAY, values)],
    ))
}

fn unpack_flat<R: FlatRecord>(tag: DataType, list: &ElementList) -> Result<Vec<R>> {
    list.expect_type(tag, R::TYPE_NAME)?;
    if R::ELEMENT_COUNT == 0 {
        return Err(ValueError::DataType(format!(
            "{} declares zero elements per record",
            R::TYPE_NAME
        )));
    }
    let values = list.find(ARRAY)?.data.as_slice::<R::Element>()?;
    if values.len() % R::ELEMENT_COUNT != 0 {
        return Err(ValueError::DataType(format!(
            "{} array holds {} elements, not a multiple of {}",
            R::TYPE_NAME,
            values.len(),
            R::ELEMENT_COUNT
        )));
    }
    Ok(values.chunks_exact(R::ELEMENT_COUNT).map(R::restore).collect())
}
