use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use raconteur_stub::Codec;
use tracing::debug;

use super::connection::WireConnection;
use super::server::WireServer;
use super::value::{ValueSlot, WireValue};
use crate::error::Result;
use crate::listeners::{ListenerId, Listeners};

struct Shared<C: Codec> {
    slot: Mutex<ValueSlot<C::Value>>,
    changed: Condvar,
    value_changed: Listeners<WireValue<C::Value>>,
    active: Mutex<Option<Arc<WireConnection<C>>>>,
}

impl<C: Codec> Shared<C> {
    fn store(&self, value: WireValue<C::Value>) {
        self.slot.lock().replace(value.clone());
        self.changed.notify_all();
        self.value_changed.invoke(&value);
    }

    fn accept(self: &Arc<Self>, wire: &Arc<WireConnection<C>>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        wire.on_value_changed(move |value| {
            if let Some(shared) = weak.upgrade() {
                shared.store(value.clone());
            }
        });
        let weak: Weak<Self> = Arc::downgrade(self);
        wire.on_closed(move |closed| {
            if let Some(shared) = weak.upgrade() {
                let mut active = shared.active.lock();
                if active.as_ref().is_some_and(|a| std::ptr::eq(Arc::as_ptr(a), closed)) {
                    *active = None;
                }
            }
        });
        let previous = self.active.lock().replace(Arc::clone(wire));
        if let Some(previous) = previous {
            debug!(member = %wire.member_name(), endpoint = previous.endpoint_id(), "previous wire connection replaced");
            previous.async_close(Box::new(|_| {}));
        }
    }
}

/// Keeps only the most recent value written to a wire server by any client.
///
/// At most one client connection is kept; a new connection closes the
/// previous one. Pokes are accepted from any client and also replace the
/// value. Client peeks of the out-value return it.
pub struct WireUnicastReceiver<C: Codec> {
    server: Arc<WireServer<C>>,
    shared: Arc<Shared<C>>,
    listener: ListenerId,
}

impl<C: Codec> WireUnicastReceiver<C> {
    pub fn new(server: Arc<WireServer<C>>, lifespan: Option<Duration>) -> Self {
        let shared = Arc::new(Shared {
            slot: Mutex::new(ValueSlot::new(lifespan)),
            changed: Condvar::new(),
            value_changed: Listeners::new("wire_unicast.value_changed"),
            active: Mutex::new(None),
        });

        let weak: Weak<Shared<C>> = Arc::downgrade(&shared);
        let listener = server.on_wire_connect(move |wire| {
            if let Some(shared) = weak.upgrade() {
                shared.accept(wire);
            }
        });

        let weak = Arc::downgrade(&shared);
        server.set_poke_out_value_callback(Some(Arc::new(
            move |value: WireValue<C::Value>, _endpoint: u32| -> Result<()> {
                if let Some(shared) = weak.upgrade() {
                    shared.store(value);
                }
                Ok(())
            },
        )));
        let weak = Arc::downgrade(&shared);
        server.set_peek_out_value_callback(Some(Arc::new(
            move |_endpoint: u32| -> Result<WireValue<C::Value>> {
                match weak.upgrade() {
                    Some(shared) => shared.slot.lock().require("in value"),
                    None => Err(crate::error::MemberError::ValueNotSet("receiver dropped".into())),
                }
            },
        )));

        Self {
            server,
            shared,
            listener,
        }
    }

    pub fn server(&self) -> &Arc<WireServer<C>> {
        &self.server
    }

    /// The connection currently feeding values, if any.
    pub fn active_connection(&self) -> Option<Arc<WireConnection<C>>> {
        self.shared.active.lock().clone()
    }

    pub fn in_value(&self) -> Result<C::Value> {
        Ok(self.in_value_with_timestamp()?.value)
    }

    pub fn in_value_with_timestamp(&self) -> Result<WireValue<C::Value>> {
        self.shared.slot.lock().require("in value")
    }

    pub fn try_get_in_value(&self) -> Option<WireValue<C::Value>> {
        self.shared.slot.lock().get()
    }

    pub fn in_value_valid(&self) -> bool {
        self.shared.slot.lock().is_valid()
    }

    /// Wait until a valid value is present. Returns false on timeout.
    pub fn wait_in_value_valid(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut slot = self.shared.slot.lock();
        loop {
            if slot.is_valid() {
                return true;
            }
            match deadline {
                Some(deadline) => {
                    if self.shared.changed.wait_until(&mut slot, deadline).timed_out() {
                        return slot.is_valid();
                    }
                }
                None => self.shared.changed.wait(&mut slot),
            }
        }
    }

    pub fn in_value_lifespan(&self) -> Option<Duration> {
        self.shared.slot.lock().lifespan()
    }

    pub fn set_in_value_lifespan(&self, lifespan: Option<Duration>) {
        self.shared.slot.lock().set_lifespan(lifespan);
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
}

impl<C: Codec> Drop for WireUnicastReceiver<C> {
    fn drop(&mut self) {
        self.server.remove_listener(self.listener);
        self.server.set_poke_out_value_callback(None);
        self.server.set_peek_out_value_callback(None);
    }
}
