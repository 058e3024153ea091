//! Streaming and accessor members for raconteur services.
//!
//! A service exposes named members through a [`ServiceHost`]; a client
//! reaches them through a [`ServiceClient`] over one endpoint. Members come
//! in four kinds:
//!
//! - pipes: ordered packet streams with optional acknowledgement
//! - wires: latest-value streams with timestamps and lifespans
//! - generators: stepwise producers and consumers that end by abort or close
//! - memories: random access to flat and multi-dimensional arrays
//!
//! Every remote operation has a blocking form and an `async_*` form that
//! reports through a [`Completion`] exactly once. With the `async` feature
//! the callback forms are also available as futures.

pub mod config;
pub mod error;
pub mod generator;
pub mod listeners;
pub mod memory;
pub mod pipe;
pub mod service;
pub mod wire;

#[cfg(feature = "async")]
pub mod futures;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{
    BroadcasterConfig, Direction, MemoryConfig, PipeConfig, Role, SubscriptionConfig, WireConfig,
    DEFAULT_REQUEST_TIMEOUT,
};
pub use error::{MemberError, Result};
pub use generator::{
    FnGenerator, Generator, GeneratorClient, GeneratorExt, GeneratorServer, GeneratorState,
    IteratorGenerator,
};
pub use listeners::{ListenerId, Listeners};
pub use memory::{
    ArrayMemory, ArrayMemoryClient, ArrayMemoryServer, LocalArrayMemory, LocalMultiDimArrayMemory,
    MultiDimArrayMemory, MultiDimArrayMemoryClient, MultiDimArrayMemoryServer,
};
pub use pipe::{PipeBroadcaster, PipeClient, PipeEndpoint, PipeServer, PipeSubscription, ANY_INDEX};
pub use service::{Completion, MemberHandler, ServiceClient, ServiceHost};
pub use wire::{
    PeekCallback, PokeCallback, WireBroadcaster, WireClient, WireConnection, WireServer,
    WireSubscription, WireTimestamp, WireUnicastReceiver, WireValue,
};
