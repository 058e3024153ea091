use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use raconteur_stub::Codec;
use tracing::debug;

use super::connection::WireConnection;
use super::server::WireServer;
use super::value::{ValueSlot, WireValue};
use crate::error::Result;
use crate::listeners::ListenerId;

type Predicate = Arc<dyn Fn(u32) -> bool + Send + Sync>;

struct Shared<V> {
    value: Mutex<ValueSlot<V>>,
    predicate: RwLock<Option<Predicate>>,
}

impl<V: Clone> Shared<V> {
    fn allows(&self, endpoint: u32) -> bool {
        self.predicate.read().as_ref().map_or(true, |p| p(endpoint))
    }
}

/// Propagates one out-value to every connection of a wire server.
///
/// New connections receive the current value as soon as they connect. Client
/// peeks of the in-value are answered with it while it is valid. Values sent
/// by clients are ignored.
pub struct WireBroadcaster<C: Codec> {
    server: Arc<WireServer<C>>,
    shared: Arc<Shared<C::Value>>,
    listener: ListenerId,
}

impl<C: Codec> WireBroadcaster<C> {
    pub fn new(server: Arc<WireServer<C>>, lifespan: Option<Duration>) -> Self {
        let shared = Arc::new(Shared {
            value: Mutex::new(ValueSlot::new(lifespan)),
            predicate: RwLock::new(None),
        });

        let weak: Weak<Shared<C::Value>> = Arc::downgrade(&shared);
        let listener = server.on_wire_connect(move |wire| {
            if let Some(shared) = weak.upgrade() {
                Self::prepare(&shared, wire);
            }
        });
        for wire in server.connections() {
            Self::prepare(&shared, &wire);
        }

        let weak = Arc::downgrade(&shared);
        server.set_peek_in_value_callback(Some(Arc::new(move |_endpoint: u32| -> Result<WireValue<C::Value>> {
            match weak.upgrade() {
                Some(shared) => shared.value.lock().require("out value"),
                None => Err(crate::error::MemberError::ValueNotSet("broadcaster dropped".into())),
            }
        })));

        Self {
            server,
            shared,
            listener,
        }
    }

    fn prepare(shared: &Shared<C::Value>, wire: &Arc<WireConnection<C>>) {
        wire.set_ignore_in_value(true);
        let lifespan = shared.value.lock().lifespan();
        wire.set_out_value_lifespan(lifespan);
        if !shared.allows(wire.endpoint_id()) {
            return;
        }
        let current = shared.value.lock().get();
        if let Some(current) = current {
            if let Err(err) = wire.set_out_value_at(current) {
                debug!(member = %wire.member_name(), error = %err, "initial wire value not sent");
            }
        }
    }

    pub fn server(&self) -> &Arc<WireServer<C>> {
        &self.server
    }

    /// Store `value` and send it to every eligible connection. Returns how
    /// many connections accepted it.
    pub fn set_out_value(&self, value: &C::Value) -> usize {
        let value = WireValue::now(value.clone());
        self.shared.value.lock().replace(value.clone());
        self.server
            .connections()
            .iter()
            .filter(|wire| self.shared.allows(wire.endpoint_id()))
            .filter(|wire| match wire.set_out_value_at(value.clone()) {
                Ok(()) => true,
                Err(err) => {
                    debug!(member = %self.server.name(), endpoint = wire.endpoint_id(), error = %err, "wire broadcast failed");
                    false
                }
            })
            .count()
    }

    pub fn out_value(&self) -> Result<C::Value> {
        Ok(self.shared.value.lock().require("out value")?.value)
    }

    pub fn try_get_out_value(&self) -> Option<WireValue<C::Value>> {
        self.shared.value.lock().get()
    }

    pub fn out_value_lifespan(&self) -> Option<Duration> {
        self.shared.value.lock().lifespan()
    }

    pub fn set_out_value_lifespan(&self, lifespan: Option<Duration>) {
        self.shared.value.lock().set_lifespan(lifespan);
        for wire in self.server.connections() {
            wire.set_out_value_lifespan(lifespan);
        }
    }

    /// Only connections whose endpoint id satisfies `predicate` receive values.
    pub fn set_predicate(&self, predicate: impl Fn(u32) -> bool + Send + Sync + 'static) {
        *self.shared.predicate.write() = Some(Arc::new(predicate));
    }

    pub fn clear_predicate(&self) {
        *self.shared.predicate.write() = None;
    }

    pub fn connection_count(&self) -> usize {
        self.server.connections().len()
    }
}

impl<C: Codec> Drop for WireBroadcaster<C> {
    fn drop(&mut self) {
        self.server.remove_listener(self.listener);
        self.server.set_peek_in_value_callback(None);
    }
}

#[cfg(test)]
mod tests {
    use raconteur_stub::ScalarCodec;

    use super::*;
    use crate::config::WireConfig;
    use crate::error::MemberError;
    use crate::service::ServiceHost;
    use crate::testing::{connect, wait_for};
    use crate::wire::WireClient;

    type Codec64 = ScalarCodec<f64>;
    const WAIT: Option<Duration> = Some(Duration::from_secs(2));

    #[test]
    fn late_joiners_get_current_value() {
        let host = ServiceHost::new("test");
        let server = WireServer::<Codec64>::register(&host, "temp", WireConfig::default()).unwrap();
        let broadcaster = WireBroadcaster::new(Arc::clone(&server), None);

        let (c1, _l1) = connect(&host);
        let w1 = WireClient::<Codec64>::new(&c1, "temp", WireConfig::default()).unwrap();
        let first = w1.connect().unwrap();
        wait_for(|| broadcaster.connection_count() == 1);
        assert_eq!(broadcaster.set_out_value(&21.5), 1);
        assert!(first.wait_in_value_valid(WAIT));
        assert_eq!(first.in_value().unwrap(), 21.5);

        let (c2, _l2) = connect(&host);
        let w2 = WireClient::<Codec64>::new(&c2, "temp", WireConfig::default()).unwrap();
        let second = w2.connect().unwrap();
        assert!(second.wait_in_value_valid(WAIT));
        assert_eq!(second.in_value().unwrap(), 21.5);
        assert_eq!(w2.peek_in_value().unwrap().value, 21.5);

        // Client writes are ignored by the broadcaster's connections.
        first.set_out_value(&99.0).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(server.connections().iter().all(|c| !c.in_value_valid()));
    }

    #[test]
    fn predicate_filters_connections() {
        let host = ServiceHost::new("test");
        let server = WireServer::<Codec64>::register(&host, "temp", WireConfig::default()).unwrap();
        let broadcaster = WireBroadcaster::new(Arc::clone(&server), None);
        let (c1, _l1) = connect(&host);
        let (c2, _l2) = connect(&host);
        let w1 = WireClient::<Codec64>::new(&c1, "temp", WireConfig::default()).unwrap();
        let w2 = WireClient::<Codec64>::new(&c2, "temp", WireConfig::default()).unwrap();
        let first = w1.connect().unwrap();
        let second = w2.connect().unwrap();
        wait_for(|| broadcaster.connection_count() == 2);

        let allowed = server.connections()[1].endpoint_id();
        broadcaster.set_predicate(move |endpoint| endpoint == allowed);
        assert_eq!(broadcaster.set_out_value(&1.0), 1);
        assert!(second.wait_in_value_valid(WAIT));
        assert!(!first.in_value_valid());
    }

    #[test]
    fn peek_respects_lifespan() {
        let host = ServiceHost::new("test");
        let server = WireServer::<Codec64>::register(&host, "temp", WireConfig::default()).unwrap();
        let broadcaster = WireBroadcaster::new(Arc::clone(&server), Some(Duration::from_millis(30)));
        let (client, _link) = connect(&host);
        let wires = WireClient::<Codec64>::new(&client, "temp", WireConfig::default()).unwrap();

        assert!(matches!(wires.peek_in_value(), Err(MemberError::ValueNotSet(_))));
        broadcaster.set_out_value(&3.0);
        assert_eq!(wires.peek_in_value().unwrap().value, 3.0);
        assert_eq!(broadcaster.out_value().unwrap(), 3.0);
        std::thread::sleep(Duration::from_millis(60));
        assert!(matches!(wires.peek_in_value(), Err(MemberError::ValueNotSet(_))));
        assert!(broadcaster.try_get_out_value().is_none());
    }
}
