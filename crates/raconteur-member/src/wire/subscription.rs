use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use raconteur_stub::Codec;
use tracing::{debug, info};

use super::client::WireClient;
use super::connection::WireConnection;
use super::value::{ValueSlot, WireValue};
use crate::config::WireConfig;
use crate::error::{MemberError, Result};
use crate::listeners::{ListenerId, Listeners};
use crate::service::ServiceClient;

struct Connection<C: Codec> {
    /// Keeps the client member registered while connected.
    _client: Arc<WireClient<C>>,
    wire: Arc<WireConnection<C>>,
}

struct Latest<V> {
    open: bool,
    slot: ValueSlot<V>,
}

struct Shared<C: Codec> {
    latest: Mutex<Latest<C::Value>>,
    changed: Condvar,
    value_changed: Listeners<WireValue<C::Value>>,
    connections: Mutex<Vec<Connection<C>>>,
}

/// Wire connections to several service instances read as one value.
///
/// The in-value is whichever value arrived last on any connection.
pub struct WireSubscription<C: Codec> {
    name: String,
    config: WireConfig,
    shared: Arc<Shared<C>>,
}

impl<C: Codec> WireSubscription<C> {
    pub fn new(name: impl Into<String>, config: WireConfig) -> Self {
        let lifespan = config.in_value_lifespan;
        Self {
            name: name.into(),
            config,
            shared: Arc::new(Shared {
                latest: Mutex::new(Latest {
                    open: true,
                    slot: ValueSlot::new(lifespan),
                }),
                changed: Condvar::new(),
                value_changed: Listeners::new("wire_subscription.value_changed"),
                connections: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Connect through `client` and start following its values.
    pub fn add_client(&self, client: &Arc<ServiceClient>) -> Result<Arc<WireConnection<C>>> {
        if !self.shared.latest.lock().open {
            return Err(MemberError::InvalidOperation(format!(
                "subscription '{}' is closed",
                self.name
            )));
        }
        let wires = WireClient::<C>::new(client, &self.name, self.config.clone())?;
        let wire = wires.connect()?;

        let weak: Weak<Shared<C>> = Arc::downgrade(&self.shared);
        wire.on_value_changed(move |value| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            {
                let mut latest = shared.latest.lock();
                if !latest.open {
                    return;
                }
                latest.slot.replace(value.clone());
            }
            shared.changed.notify_all();
            shared.value_changed.invoke(value);
        });
        let weak: Weak<Shared<C>> = Arc::downgrade(&self.shared);
        wire.on_closed(move |closed| {
            if let Some(shared) = weak.upgrade() {
                shared
                    .connections
                    .lock()
                    .retain(|c| !std::ptr::eq(Arc::as_ptr(&c.wire), closed));
            }
        });

        self.shared.connections.lock().push(Connection {
            _client: wires,
            wire: Arc::clone(&wire),
        });
        info!(member = %self.name, endpoint = wire.endpoint_id(), "wire subscription connected");
        Ok(wire)
    }

    pub fn connection_count(&self) -> usize {
        self.shared.connections.lock().len()
    }

    pub fn in_value(&self) -> Result<C::Value> {
        Ok(self.in_value_with_timestamp()?.value)
    }

    pub fn in_value_with_timestamp(&self) -> Result<WireValue<C::Value>> {
        self.shared.latest.lock().slot.require("in value")
    }

    pub fn try_get_in_value(&self) -> Option<WireValue<C::Value>> {
        self.shared.latest.lock().slot.get()
    }

    pub fn in_value_valid(&self) -> bool {
        self.shared.latest.lock().slot.is_valid()
    }

    /// Wait until a valid value is present. Returns false on timeout or close.
    pub fn wait_in_value_valid(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut latest = self.shared.latest.lock();
        loop {
            if latest.slot.is_valid() {
                return true;
            }
            if !latest.open {
                return false;
            }
            match deadline {
                Some(deadline) => {
                    if self.shared.changed.wait_until(&mut latest, deadline).timed_out() {
                        return latest.slot.is_valid();
                    }
                }
                None => self.shared.changed.wait(&mut latest),
            }
        }
    }

    pub fn set_in_value_lifespan(&self, lifespan: Option<Duration>) {
        self.shared.latest.lock().slot.set_lifespan(lifespan);
    }

    /// Send `value` on every connection. Returns how many accepted it.
    pub fn set_out_value_all(&self, value: &C::Value) -> usize {
        let wires: Vec<Arc<WireConnection<C>>> = self
            .shared
            .connections
            .lock()
            .iter()
            .map(|c| Arc::clone(&c.wire))
            .collect();
        let value = WireValue::now(value.clone());
        wires
            .iter()
            .filter(|wire| match wire.set_out_value_at(value.clone()) {
                Ok(()) => true,
                Err(err) => {
                    debug!(member = %self.name, error = %err, "subscription write failed");
                    false
                }
            })
            .count()
    }

    pub fn on_value_changed(
        &self,
        callback: impl Fn(&WireValue<C::Value>) + Send + Sync + 'static,
    ) -> ListenerId {
        self.shared.value_changed.add(callback)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.value_changed.remove(id)
    }

    /// Close every connection and wake blocked waiters.
    pub fn close(&self) {
        self.shared.latest.lock().open = false;
        self.shared.changed.notify_all();
        let connections: Vec<Connection<C>> = self.shared.connections.lock().drain(..).collect();
        for connection in &connections {
            if let Err(err) = connection.wire.close() {
                debug!(member = %self.name, error = %err, "subscription close failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use raconteur_stub::ScalarCodec;

    use super::*;
    use crate::testing::{link, wait_for};
    use crate::wire::WireServer;

    type Codec32 = ScalarCodec<i32>;
    const WAIT: Option<Duration> = Some(Duration::from_secs(2));

    #[test]
    fn follows_latest_value_from_any_service() {
        let (h1, c1) = link();
        let (h2, c2) = link();
        let s1 = WireServer::<Codec32>::register(&h1, "level", WireConfig::default()).unwrap();
        let s2 = WireServer::<Codec32>::register(&h2, "level", WireConfig::default()).unwrap();
        let subscription = WireSubscription::<Codec32>::new("level", WireConfig::default());
        subscription.add_client(&c1).unwrap();
        subscription.add_client(&c2).unwrap();
        assert_eq!(subscription.connection_count(), 2);

        s1.connections()[0].set_out_value(&1).unwrap();
        assert!(subscription.wait_in_value_valid(WAIT));
        assert_eq!(subscription.in_value().unwrap(), 1);
        s2.connections()[0].set_out_value(&2).unwrap();
        wait_for(|| subscription.in_value().ok() == Some(2));

        assert_eq!(subscription.set_out_value_all(&7), 2);
        assert!(s1.connections()[0].wait_in_value_valid(WAIT));
        assert!(s2.connections()[0].wait_in_value_valid(WAIT));
        assert_eq!(s2.connections()[0].in_value().unwrap(), 7);
    }

    #[test]
    fn close_disconnects_everything() {
        let (host, client) = link();
        let server = WireServer::<Codec32>::register(&host, "level", WireConfig::default()).unwrap();
        let subscription = WireSubscription::<Codec32>::new("level", WireConfig::default());
        subscription.add_client(&client).unwrap();
        subscription.close();
        wait_for(|| server.connections().is_empty());
        assert_eq!(subscription.connection_count(), 0);
        assert!(!subscription.wait_in_value_valid(None));
        assert!(subscription.add_client(&client).is_err());
    }
}
