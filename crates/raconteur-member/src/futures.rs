//! `async` forms of the remote member operations.
//!
//! Each future wraps the matching `async_*` callback form. The callback runs
//! on a transport thread and hands its result over a oneshot channel, so the
//! futures do not depend on which runtime polls them.

use std::sync::Arc;

use raconteur_stub::Codec;
use raconteur_transport::TransportError;
use raconteur_value::MessageEntry;
use tokio::sync::oneshot;

use crate::error::{MemberError, Result};
use crate::generator::{Generator, GeneratorClient};
use crate::pipe::{PipeClient, PipeEndpoint};
use crate::service::{Completion, ServiceClient};
use crate::wire::{WireClient, WireConnection, WireValue};

/// Start a callback operation and await its completion.
pub async fn completion<T: Send + 'static>(start: impl FnOnce(Completion<T>)) -> Result<T> {
    let (tx, rx) = oneshot::channel();
    start(Box::new(move |result| {
        let _ = tx.send(result);
    }));
    rx.await.unwrap_or_else(|_| {
        Err(MemberError::Transport(TransportError::Disconnected(
            "completion dropped".into(),
        )))
    })
}

impl ServiceClient {
    pub async fn request_async(
        &self,
        entry: MessageEntry,
        timeout: Option<std::time::Duration>,
    ) -> Result<MessageEntry> {
        completion(|done| self.async_request(entry, timeout, done)).await
    }
}

impl<C: Codec> PipeClient<C> {
    pub async fn connect_async(&self, index: i32) -> Result<Arc<PipeEndpoint<C>>> {
        completion(|done| self.async_connect(index, done)).await
    }
}

impl<C: Codec> PipeEndpoint<C> {
    pub async fn close_async(&self) -> Result<()> {
        completion(|done| self.async_close(done)).await
    }
}

impl<C: Codec> WireClient<C> {
    pub async fn connect_async(&self) -> Result<Arc<WireConnection<C>>> {
        completion(|done| self.async_connect(done)).await
    }

    pub async fn peek_in_value_async(&self) -> Result<WireValue<C::Value>> {
        completion(|done| self.async_peek_in_value(done)).await
    }

    pub async fn peek_out_value_async(&self) -> Result<WireValue<C::Value>> {
        completion(|done| self.async_peek_out_value(done)).await
    }

    pub async fn poke_out_value_async(&self, value: &C::Value) -> Result<()> {
        completion(|done| self.async_poke_out_value(value, done)).await
    }
}

impl<C: Codec> WireConnection<C> {
    pub async fn close_async(&self) -> Result<()> {
        completion(|done| self.async_close(done)).await
    }
}

impl<PC: Codec, RC: Codec> GeneratorClient<PC, RC> {
    pub async fn next_async(&self, param: PC::Value) -> Result<RC::Value> {
        completion(|done| self.async_next(param, done)).await
    }

    pub async fn abort_async(&self) -> Result<()> {
        completion(|done| self.async_abort(done)).await
    }

    pub async fn close_async(&self) -> Result<()> {
        completion(|done| self.async_close(done)).await
    }
}

#[cfg(test)]
mod tests {
    use raconteur_stub::{ScalarCodec, StringCodec, UnitCodec};

    use super::*;
    use crate::config::{PipeConfig, WireConfig};
    use crate::generator::{GeneratorServer, IteratorGenerator};
    use crate::pipe::{PipeServer, ANY_INDEX};
    use crate::testing::link;
    use crate::wire::WireServer;

    #[tokio::test]
    async fn pipe_connect_and_close() {
        let (host, client) = link();
        let server = PipeServer::<StringCodec>::register(&host, "log", PipeConfig::default()).unwrap();
        let pipes = PipeClient::<StringCodec>::new(&client, "log", PipeConfig::default()).unwrap();
        let pipe = pipes.connect_async(ANY_INDEX).await.unwrap();
        assert_eq!(pipe.index(), 1);
        assert_eq!(server.endpoints().len(), 1);
        pipe.close_async().await.unwrap();
        assert!(!pipe.is_open());
    }

    #[tokio::test]
    async fn wire_poke_then_peek() {
        let (host, client) = link();
        let server = WireServer::<ScalarCodec<i64>>::register(&host, "pos", WireConfig::default()).unwrap();
        let stored = Arc::new(parking_lot::Mutex::new(None));
        let sink = Arc::clone(&stored);
        server.set_poke_out_value_callback(Some(Arc::new(
            move |value: WireValue<i64>, _endpoint: u32| -> Result<()> {
                *sink.lock() = Some(value);
                Ok(())
            },
        )));
        let source = Arc::clone(&stored);
        server.set_peek_out_value_callback(Some(Arc::new(
            move |_endpoint: u32| -> Result<WireValue<i64>> {
                source
                    .lock()
                    .clone()
                    .ok_or_else(|| MemberError::ValueNotSet("nothing poked".into()))
            },
        )));

        let wires = WireClient::<ScalarCodec<i64>>::new(&client, "pos", WireConfig::default()).unwrap();
        assert!(matches!(
            wires.peek_out_value_async().await,
            Err(MemberError::ValueNotSet(_))
        ));
        wires.poke_out_value_async(&42).await.unwrap();
        assert_eq!(wires.peek_out_value_async().await.unwrap().value, 42);
    }

    #[tokio::test]
    async fn generator_steps() {
        let (host, client) = link();
        let server = GeneratorServer::<UnitCodec, ScalarCodec<u8>>::register(&host, "gen").unwrap();
        let id = server.add(host.endpoint_ids()[0], Arc::new(IteratorGenerator::new(1..3u8)));
        let remote = GeneratorClient::<UnitCodec, ScalarCodec<u8>>::new(&client, "gen", id, None);
        assert_eq!(remote.next_async(()).await.unwrap(), 1);
        assert_eq!(remote.next_async(()).await.unwrap(), 2);
        assert!(matches!(remote.next_async(()).await, Err(MemberError::StopIteration)));
        remote.close_async().await.unwrap();
    }
}
