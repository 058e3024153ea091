//! Self-describing wire values for raconteur.
//!
//! Every value exchanged between a client and a service is a tree of
//! [`MessageElement`]s. This crate provides:
//! - typed numeric arrays, including complex and unsigned kinds
//! - [`MultiDimArray`] with column-major storage and the sub-array copy engine
//! - the [`MessageEntry`] envelope and its binary codec, framed with an "RR"
//!   magic and a little-endian length
//! - blocking [`MessageReader`] / [`MessageWriter`] over any `Read` / `Write`

pub mod codec;
pub mod copy;
pub mod element;
pub mod entry;
pub mod error;
pub mod multidim;
pub mod numeric;
pub mod reader;
pub mod types;
pub mod writer;

#[cfg(feature = "async")]
pub use codec::MessageCodec;
pub use codec::{
    decode_element, decode_message, encode_element, encode_message, CodecConfig,
    DEFAULT_MAX_MESSAGE, HEADER_SIZE,
};
pub use copy::{copy_sub_array, CopyPlan, CopyRun};
pub use element::{find_element, ElementData, ElementList, ElementName, MessageElement};
pub use entry::{EntryType, ErrorInfo, MessageEntry};
pub use error::{Result, ValueError};
pub use multidim::MultiDimArray;
pub use numeric::{CDouble, CSingle, NumericArray, NumericElement};
pub use reader::MessageReader;
pub use types::DataType;
pub use writer::MessageWriter;
