//! Message endpoints for raconteur members.
//!
//! An [`Endpoint`] carries [`MessageEntry`](raconteur_value::MessageEntry)
//! values to a peer and matches responses to requests. Requests can block
//! with a timeout or complete through a callback; either way the outcome is
//! reported exactly once.
//!
//! [`LoopbackEndpoint`] links two endpoints inside one process and is what
//! services and clients use when they share an address space.

pub mod error;
pub mod loopback;
pub mod pending;
pub mod slots;
pub mod traits;

pub use error::{Result, TransportError};
pub use loopback::{LoopbackConfig, LoopbackEndpoint};
pub use pending::{PendingRequests, DEFAULT_MAX_PENDING};
pub use slots::{SlotId, SlotMap};
pub use traits::{Endpoint, MessageHandler, ResponseHandler, Task};
