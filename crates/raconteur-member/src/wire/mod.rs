//! Wire members: latest-value streams.
//!
//! Each side of a wire connection sees the most recent value sent by the
//! other side. Values carry the sender's timestamp and may expire after a
//! configured lifespan.

mod broadcaster;
mod client;
mod connection;
mod server;
mod subscription;
mod unicast;
mod value;

pub use broadcaster::WireBroadcaster;
pub use client::WireClient;
pub use connection::WireConnection;
pub use server::{PeekCallback, PokeCallback, WireServer};
pub use subscription::WireSubscription;
pub use unicast::WireUnicastReceiver;
pub use value::{WireTimestamp, WireValue};

pub(crate) const PACKET: &str = "packet";
pub(crate) const TS_SECONDS: &str = "ts_seconds";
pub(crate) const TS_NANOS: &str = "ts_nanoseconds";
