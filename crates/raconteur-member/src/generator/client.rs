use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use raconteur_stub::Codec;
use raconteur_transport::SlotId;
use raconteur_value::{ElementData, EntryType, MessageElement, MessageEntry};
use tracing::debug;

use super::{Generator, GeneratorState, Lifecycle, INDEX, PARAMETER, RETURN};
use crate::error::{MemberError, Result};
use crate::service::{wait_completion, Completion, ServiceClient};

/// Client side handle to a generator served by a [`GeneratorServer`].
///
/// The local state mirrors the remote one: once a step reports
/// `StopIteration` or `OperationAborted`, later steps fail without a
/// request. Dropping an active handle closes the remote generator.
///
/// [`GeneratorServer`]: super::GeneratorServer
pub struct GeneratorClient<PC: Codec, RC: Codec> {
    name: String,
    id: SlotId,
    client: Arc<ServiceClient>,
    timeout: Option<Duration>,
    lifecycle: Arc<Lifecycle>,
    _codecs: PhantomData<fn() -> (PC, RC)>,
}

impl<PC: Codec, RC: Codec> GeneratorClient<PC, RC> {
    pub fn new(client: &Arc<ServiceClient>, name: &str, id: SlotId, timeout: Option<Duration>) -> Self {
        Self {
            name: name.to_string(),
            id,
            client: Arc::clone(client),
            timeout,
            lifecycle: Arc::new(Lifecycle::new()),
            _codecs: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> SlotId {
        self.id
    }

    pub fn state(&self) -> GeneratorState {
        self.lifecycle.state()
    }

    fn request(&self, kind: EntryType) -> MessageEntry {
        MessageEntry::new(kind, self.name.as_str())
            .with_element(MessageElement::scalar(INDEX, self.id.to_u64()))
    }

    /// Send a terminating request. Already terminal handles complete
    /// without contacting the service.
    fn finish(&self, kind: EntryType, transitioned: bool, handler: Completion<()>) {
        if !transitioned {
            handler(Ok(()));
            return;
        }
        let name = self.name.clone();
        let id = self.id;
        self.client.async_request(
            self.request(kind),
            self.timeout,
            Box::new(move |result| {
                handler(match result {
                    Ok(_) => Ok(()),
                    // Retired on the service already.
                    Err(MemberError::UnknownHandle(message)) => {
                        debug!(member = %name, generator = %id, %message, "generator already gone");
                        Ok(())
                    }
                    Err(err) => Err(err),
                });
            }),
        );
    }
}

impl<PC: Codec, RC: Codec> Generator<PC::Value, RC::Value> for GeneratorClient<PC, RC> {
    fn next(&self, param: PC::Value) -> Result<RC::Value> {
        wait_completion(|done| self.async_next(param, done))
    }

    fn abort(&self) -> Result<()> {
        wait_completion(|done| self.async_abort(done))
    }

    fn close(&self) -> Result<()> {
        wait_completion(|done| self.async_close(done))
    }

    fn async_next(&self, param: PC::Value, handler: Completion<RC::Value>) {
        if let Err(err) = self.lifecycle.check() {
            handler(Err(err));
            return;
        }
        let mut entry = self.request(EntryType::GeneratorNextReq);
        match PC::pack(&param) {
            Ok(data) if data.is_void() => {}
            Ok(data) => entry.push(MessageElement::new(PARAMETER, data)),
            Err(err) => {
                handler(Err(err.into()));
                return;
            }
        }
        let lifecycle = Arc::clone(&self.lifecycle);
        self.client.async_request(
            entry,
            self.timeout,
            Box::new(move |result| {
                let outcome = result.and_then(|response| {
                    // A local abort that raced the step wins.
                    lifecycle.check()?;
                    let value = match response.try_find(RETURN) {
                        Some(element) => RC::unpack(&element.data)?,
                        None => RC::unpack(&ElementData::Void)?,
                    };
                    Ok(value)
                });
                if let Err(err) = &outcome {
                    lifecycle.observe(err);
                }
                handler(outcome);
            }),
        );
    }

    fn async_abort(&self, handler: Completion<()>) {
        let transitioned = self.lifecycle.abort();
        self.finish(EntryType::GeneratorAbortReq, transitioned, handler);
    }

    fn async_close(&self, handler: Completion<()>) {
        let transitioned = self.lifecycle.close();
        self.finish(EntryType::GeneratorCloseReq, transitioned, handler);
    }
}

impl<PC: Codec, RC: Codec> Drop for GeneratorClient<PC, RC> {
    fn drop(&mut self) {
        if self.client.is_connected() && self.lifecycle.close() {
            debug!(member = %self.name, generator = %self.id, "closing dropped generator");
            self.client.async_request(
                self.request(EntryType::GeneratorCloseReq),
                self.timeout,
                Box::new(|_| {}),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use raconteur_stub::{ScalarCodec, StringCodec, UnitCodec};

    use super::*;
    use crate::config::WireConfig;
    use crate::generator::{FnGenerator, GeneratorExt, GeneratorServer, IteratorGenerator};
    use crate::testing::{link, wait_for};
    use crate::wire::WireServer;

    const TIMEOUT: Option<Duration> = Some(Duration::from_secs(2));

    type Counter = GeneratorServer<UnitCodec, ScalarCodec<u32>>;

    #[test]
    fn remote_next_all_collects_every_value() {
        let (host, client) = link();
        let server = Counter::register(&host, "count").unwrap();
        let id = server.add(host.endpoint_ids()[0], Arc::new(IteratorGenerator::new(0..16u32)));

        let remote = GeneratorClient::<UnitCodec, ScalarCodec<u32>>::new(&client, "count", id, TIMEOUT);
        let values = remote.next_all().unwrap();
        assert_eq!(values, (0..16).collect::<Vec<u32>>());
        assert_eq!(remote.state(), GeneratorState::Closed);
        assert!(!server.contains(id));
        assert!(matches!(remote.next(()), Err(MemberError::StopIteration)));
    }

    #[test]
    fn abort_is_observed_on_both_sides() {
        let (host, client) = link();
        let server = Counter::register(&host, "count").unwrap();
        let local = Arc::new(IteratorGenerator::new(0..100u32));
        let id = server.add(host.endpoint_ids()[0], local.clone());

        let remote = GeneratorClient::<UnitCodec, ScalarCodec<u32>>::new(&client, "count", id, TIMEOUT);
        assert_eq!(remote.next(()).unwrap(), 0);
        remote.abort().unwrap();
        remote.abort().unwrap();
        assert_eq!(local.state(), GeneratorState::Aborted);
        assert_eq!(server.active_count(), 0);
        assert!(matches!(remote.next(()), Err(MemberError::OperationAborted(_))));
        remote.close().unwrap();
        assert_eq!(remote.state(), GeneratorState::Aborted);
    }

    #[test]
    fn parameters_reach_the_generator() {
        let (host, client) = link();
        let server = GeneratorServer::<StringCodec, UnitCodec>::register(&host, "log").unwrap();
        let (tx, rx) = mpsc::channel();
        let sink = FnGenerator::new(move |line: String| {
            tx.send(line).ok();
            Some(())
        });
        let id = server.add(host.endpoint_ids()[0], Arc::new(sink));

        let remote = GeneratorClient::<StringCodec, UnitCodec>::new(&client, "log", id, TIMEOUT);
        remote.next("first".to_string()).unwrap();
        remote.next("second".to_string()).unwrap();
        remote.close().unwrap();
        assert_eq!(rx.recv().unwrap(), "first");
        assert_eq!(rx.recv().unwrap(), "second");
        assert!(matches!(
            remote.next("third".to_string()),
            Err(MemberError::StopIteration)
        ));
        assert_eq!(server.active_count(), 0);
    }

    #[test]
    fn stale_handle_is_rejected() {
        let (host, client) = link();
        let server = Counter::register(&host, "count").unwrap();
        let endpoint = host.endpoint_ids()[0];
        let first = server.add(endpoint, Arc::new(IteratorGenerator::new(0..1u32)));
        let remote = GeneratorClient::<UnitCodec, ScalarCodec<u32>>::new(&client, "count", first, TIMEOUT);
        remote.close().unwrap();

        let second = server.add(endpoint, Arc::new(IteratorGenerator::new(5..6u32)));
        assert_eq!(first.index(), second.index());
        let stale = GeneratorClient::<UnitCodec, ScalarCodec<u32>>::new(&client, "count", first, TIMEOUT);
        assert!(matches!(stale.next(()), Err(MemberError::UnknownHandle(_))));
        assert_eq!(stale.state(), GeneratorState::Active);

        let current = GeneratorClient::<UnitCodec, ScalarCodec<u32>>::new(&client, "count", second, TIMEOUT);
        assert_eq!(current.next(()).unwrap(), 5);
    }

    #[test]
    fn close_tolerates_only_retired_handles() {
        let (host, client) = link();
        let server = Counter::register(&host, "count").unwrap();
        let endpoint = host.endpoint_ids()[0];
        let id = server.add(endpoint, Arc::new(IteratorGenerator::new(0..3u32)));
        let first = GeneratorClient::<UnitCodec, ScalarCodec<u32>>::new(&client, "count", id, TIMEOUT);
        let second = GeneratorClient::<UnitCodec, ScalarCodec<u32>>::new(&client, "count", id, TIMEOUT);
        first.close().unwrap();
        assert!(!server.contains(id));
        second.close().unwrap();

        WireServer::<ScalarCodec<i64>>::register(&host, "pos", WireConfig::default()).unwrap();
        let id = server.add(endpoint, Arc::new(IteratorGenerator::new(0..3u32)));
        let misrouted = GeneratorClient::<UnitCodec, ScalarCodec<u32>>::new(&client, "pos", id, TIMEOUT);
        assert!(matches!(misrouted.close(), Err(MemberError::InvalidOperation(_))));

        let missing = GeneratorClient::<UnitCodec, ScalarCodec<u32>>::new(&client, "nothing", id, TIMEOUT);
        assert!(matches!(missing.abort(), Err(MemberError::MemberNotFound(_))));
        assert!(server.contains(id));
    }

    #[test]
    fn dropping_handle_closes_remote() {
        let (host, client) = link();
        let server = Counter::register(&host, "count").unwrap();
        let local = Arc::new(IteratorGenerator::new(0..10u32));
        let id = server.add(host.endpoint_ids()[0], local.clone());
        {
            let remote = GeneratorClient::<UnitCodec, ScalarCodec<u32>>::new(&client, "count", id, TIMEOUT);
            remote.next(()).unwrap();
        }
        wait_for(|| local.state() == GeneratorState::Closed);
        assert_eq!(server.active_count(), 0);
    }

    #[test]
    fn disconnect_aborts_served_generators() {
        let (host, client) = link();
        let server = Counter::register(&host, "count").unwrap();
        let local = Arc::new(IteratorGenerator::new(0..10u32));
        server.add(host.endpoint_ids()[0], local.clone());
        client.close();
        wait_for(|| local.state() == GeneratorState::Aborted);
        assert_eq!(server.active_count(), 0);
    }

    #[test]
    fn async_next_reports_once() {
        let (host, client) = link();
        let server = Counter::register(&host, "count").unwrap();
        let id = server.add(host.endpoint_ids()[0], Arc::new(IteratorGenerator::new(7..8u32)));
        let remote = GeneratorClient::<UnitCodec, ScalarCodec<u32>>::new(&client, "count", id, TIMEOUT);

        let (tx, rx) = mpsc::channel();
        remote.async_next((), Box::new(move |r| tx.send(r.ok()).unwrap()));
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), Some(7));
        assert!(matches!(remote.next(()), Err(MemberError::StopIteration)));
    }
}
