//! Pipe members: ordered packet streams between a client and a service.
//!
//! A pipe member may carry many endpoints, each identified by the transport
//! endpoint id and a pipe index chosen at connect time. Packets sent on one
//! end are received on the other in send order.

mod broadcaster;
mod client;
mod endpoint;
mod server;
mod subscription;

pub use broadcaster::PipeBroadcaster;
pub use client::PipeClient;
pub use endpoint::PipeEndpoint;
pub use server::PipeServer;
pub use subscription::PipeSubscription;

pub(crate) const INDEX: &str = "index";
pub(crate) const PACKET_NUMBER: &str = "packetnumber";
pub(crate) const REQUEST_ACK: &str = "requestack";
pub(crate) const PACKET: &str = "packet";

/// Requested index meaning "any free index".
pub const ANY_INDEX: i32 = -1;
