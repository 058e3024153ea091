//! Wire data type tags.
//!
//! Tags 0-99 are primitive kinds stored as contiguous numeric or string data.
//! Tags 100 and above are nested element lists carrying a type name.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ValueError};

/// Type tag attached to every encoded element.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Void = 0,
    Double = 1,
    Single = 2,
    Int8 = 3,
    UInt8 = 4,
    Int16 = 5,
    UInt16 = 6,
    Int32 = 7,
    UInt32 = 8,
    Int64 = 9,
    UInt64 = 10,
    String = 11,
    CDouble = 12,
    CSingle = 13,
    Bool = 14,
    Structure = 101,
    MapInt32 = 102,
    MapString = 103,
    List = 108,
    Pod = 109,
    PodArray = 110,
    PodMultiDimArray = 111,
    NamedArray = 114,
    NamedArrayArray = 115,
    NamedArrayMultiDimArray = 116,
    MultiDimArray = 117,
    AStructure = 118,
    AStructureArray = 119,
    AStructureMultiDimArray = 120,
}

const ALL: [DataType; 29] = [
    DataType::Void,
    DataType::Double,
    DataType::Single,
    DataType::Int8,
    DataType::UInt8,
    DataType::Int16,
    DataType::UInt16,
    DataType::Int32,
    DataType::UInt32,
    DataType::Int64,
    DataType::UInt64,
    DataType::String,
    DataType::CDouble,
    DataType::CSingle,
    DataType::Bool,
    DataType::Structure,
    DataType::MapInt32,
    DataType::MapString,
    DataType::List,
    DataType::Pod,
    DataType::PodArray,
    DataType::PodMultiDimArray,
    DataType::NamedArray,
    DataType::NamedArrayArray,
    DataType::NamedArrayMultiDimArray,
    DataType::MultiDimArray,
    DataType::AStructure,
    DataType::AStructureArray,
    DataType::AStructureMultiDimArray,
];

impl DataType {
    /// Wire tag value.
    pub fn tag(self) -> u16 {
        self as u16
    }

    /// Resolve a wire tag.
    pub fn from_tag(tag: u16) -> Result<Self> {
        ALL.iter()
            .copied()
            .find(|t| t.tag() == tag)
            .ok_or(ValueError::InvalidTypeTag(tag))
    }

    /// Returns true for contiguous numeric kinds.
    pub fn is_numeric(self) -> bool {
        matches!(self.tag(), 1..=10 | 12..=14)
    }

    /// Returns true for nested element list kinds.
    pub fn is_list(self) -> bool {
        self.tag() >= 100
    }

    /// Size in bytes of one numeric element, if this is a numeric kind.
    pub fn element_size(self) -> Option<usize> {
        match self {
            DataType::Int8 | DataType::UInt8 | DataType::Bool => Some(1),
            DataType::Int16 | DataType::UInt16 => Some(2),
            DataType::Int32 | DataType::UInt32 | DataType::Single => Some(4),
            DataType::Int64 | DataType::UInt64 | DataType::Double | DataType::CSingle => Some(8),
            DataType::CDouble => Some(16),
            _ => None,
        }
    }

    /// Short lowercase name used in diagnostics and the CLI.
    pub fn name(self) -> &'static str {
        match self {
            DataType::Void => "void",
            DataType::Double => "double",
            DataType::Single => "single",
            DataType::Int8 => "int8",
            DataType::UInt8 => "uint8",
            DataType::Int16 => "int16",
            DataType::UInt16 => "uint16",
            DataType::Int32 => "int32",
            DataType::UInt32 => "uint32",
            DataType::Int64 => "int64",
            DataType::UInt64 => "uint64",
            DataType::String => "string",
            DataType::CDouble => "cdouble",
            DataType::CSingle => "csingle",
            DataType::Bool => "bool",
            DataType::Structure => "structure",
            DataType::MapInt32 => "map_int32",
            DataType::MapString => "map_string",
            DataType::List => "list",
            DataType::Pod => "pod",
            DataType::PodArray => "pod_array",
            DataType::PodMultiDimArray => "pod_multidimarray",
            DataType::NamedArray => "namedarray",
            DataType::NamedArrayArray => "namedarray_array",
            DataType::NamedArrayMultiDimArray => "namedarray_multidimarray",
            DataType::MultiDimArray => "multidimarray",
            DataType::AStructure => "astructure",
            DataType::AStructureArray => "astructure_array",
            DataType::AStructureMultiDimArray => "astructure_multidimarray",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
