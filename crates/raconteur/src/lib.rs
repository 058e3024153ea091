//! Typed-value marshaling and streaming members.
//!
//! raconteur moves typed values between a client and a service as
//! self-describing element trees, and exposes pipe, wire, generator and
//! memory members on top of them.
//!
//! # Crate Structure
//!
//! - [`value`]: element trees, multi-dimensional arrays, copy engine, binary codec
//! - [`stub`]: record families, value codecs and the type registry
//! - [`transport`]: endpoints, request matching and loopback links
//! - [`member`]: services, clients and the four member kinds

/// Re-export value types.
pub mod value {
    pub use raconteur_value::*;
}

/// Re-export stub types.
pub mod stub {
    pub use raconteur_stub::*;
}

/// Re-export transport types.
pub mod transport {
    pub use raconteur_transport::*;
}

/// Re-export member types.
pub mod member {
    pub use raconteur_member::*;
}
