//! Typed value stubs for raconteur members.
//!
//! Four record families share one pack/unpack algorithm:
//!
//! | Family | Scalar | Array | Multi-dim |
//! |---|---|---|---|
//! | structure | `Structure` node | indexed `List` | `MultiDimArray` |
//! | pod | `PodArray` of one | `PodArray` of indexed `Pod` nodes | `PodMultiDimArray` |
//! | named array | array of one | `NamedArrayArray` with flat `"array"` | `NamedArrayMultiDimArray` |
//! | astructure | array of one | `AStructureArray` with flat `"array"` | `AStructureMultiDimArray` |
//!
//! Members are generic over a [`Codec`] that picks one of these encodings (or
//! a plain numeric, string or var value) for their value type.

pub mod codec;
pub mod config;
pub mod field;
pub mod pack;
pub mod record;
pub mod registry;

#[cfg(test)]
pub(crate) mod testing;

pub use codec::{
    ArrayCodec, Codec, MultiDimCodec, RecordArrayCodec, RecordCodec, RecordMultiDimCodec,
    ScalarCodec, SliceCodec, StringCodec, UnitCodec, VarCodec,
};
pub use config::RegistryConfig;
pub use pack::{
    pack_record, pack_record_array, pack_record_multidim, unpack_record, unpack_record_array,
    unpack_record_multidim,
};
pub use record::{
    AStructureKind, Family, FieldRecord, FlatRecord, NamedArrayKind, PodKind, Record, RecordKind,
    StructureKind,
};
pub use registry::{TypeInfo, TypeRegistry};
