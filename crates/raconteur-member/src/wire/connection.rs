use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use raconteur_stub::Codec;
use raconteur_transport::Endpoint;
use raconteur_value::{EntryType, MessageEntry};
use tracing::{debug, warn};

use super::value::{push_value, read_value, ValueSlot, WireValue};
use crate::config::{Direction, Role, WireConfig};
use crate::error::{MemberError, Result};
use crate::listeners::{ListenerId, Listeners};
use crate::service::{check_response, wait_completion, Completion};

type Detach = Box<dyn FnOnce() + Send>;

struct WireState<V> {
    open: bool,
    in_slot: ValueSlot<V>,
    out_slot: ValueSlot<V>,
}

/// One connected end of a wire.
///
/// Holds the latest value received from the peer (the in-value) and the
/// latest value sent to it (the out-value). A received value stamped earlier
/// than the current in-value is ignored.
pub struct WireConnection<C: Codec> {
    endpoint: Arc<dyn Endpoint>,
    member: String,
    role: Role,
    direction: Direction,
    request_timeout: Option<Duration>,
    ignore_in_value: AtomicBool,
    state: Mutex<WireState<C::Value>>,
    changed: Condvar,
    value_changed: Listeners<WireValue<C::Value>>,
    closed: Listeners<WireConnection<C>>,
    detach: Mutex<Option<Detach>>,
}

impl<C: Codec> WireConnection<C> {
    pub(crate) fn new(endpoint: Arc<dyn Endpoint>, member: &str, role: Role, config: &WireConfig) -> Self {
        Self {
            endpoint,
            member: member.to_string(),
            role,
            direction: config.direction,
            request_timeout: config.request_timeout,
            ignore_in_value: AtomicBool::new(config.ignore_in_value),
            state: Mutex::new(WireState {
                open: true,
                in_slot: ValueSlot::new(config.in_value_lifespan),
                out_slot: ValueSlot::new(config.out_value_lifespan),
            }),
            changed: Condvar::new(),
            value_changed: Listeners::new("wire.value_changed"),
            closed: Listeners::new("wire.closed"),
            detach: Mutex::new(None),
        }
    }

    pub(crate) fn set_detach(&self, detach: Detach) {
        *self.detach.lock() = Some(detach);
    }

    pub fn endpoint_id(&self) -> u32 {
        self.endpoint.local_id()
    }

    pub fn member_name(&self) -> &str {
        &self.member
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    pub fn in_value(&self) -> Result<C::Value> {
        Ok(self.in_value_with_timestamp()?.value)
    }

    pub fn in_value_with_timestamp(&self) -> Result<WireValue<C::Value>> {
        self.state.lock().in_slot.require("in value")
    }

    pub fn try_get_in_value(&self) -> Option<WireValue<C::Value>> {
        self.state.lock().in_slot.get()
    }

    pub fn out_value(&self) -> Result<C::Value> {
        Ok(self.out_value_with_timestamp()?.value)
    }

    pub fn out_value_with_timestamp(&self) -> Result<WireValue<C::Value>> {
        self.state.lock().out_slot.require("out value")
    }

    pub fn try_get_out_value(&self) -> Option<WireValue<C::Value>> {
        self.state.lock().out_slot.get()
    }

    pub fn in_value_valid(&self) -> bool {
        self.state.lock().in_slot.is_valid()
    }

    pub fn out_value_valid(&self) -> bool {
        self.state.lock().out_slot.is_valid()
    }

    pub fn in_value_lifespan(&self) -> Option<Duration> {
        self.state.lock().in_slot.lifespan()
    }

    pub fn set_in_value_lifespan(&self, lifespan: Option<Duration>) {
        self.state.lock().in_slot.set_lifespan(lifespan);
    }

    pub fn out_value_lifespan(&self) -> Option<Duration> {
        self.state.lock().out_slot.lifespan()
    }

    pub fn set_out_value_lifespan(&self, lifespan: Option<Duration>) {
        self.state.lock().out_slot.set_lifespan(lifespan);
    }

    pub fn ignore_in_value(&self) -> bool {
        self.ignore_in_value.load(Ordering::Acquire)
    }

    /// Drop received values instead of storing them.
    pub fn set_ignore_in_value(&self, ignore: bool) {
        self.ignore_in_value.store(ignore, Ordering::Release);
    }

    /// Send `value` stamped with the current time.
    pub fn set_out_value(&self, value: &C::Value) -> Result<()> {
        self.set_out_value_at(WireValue::now(value.clone()))
    }

    pub(crate) fn set_out_value_at(&self, value: WireValue<C::Value>) -> Result<()> {
        if !self.direction.allows(self.role) {
            return Err(MemberError::InvalidOperation(format!(
                "wire '{}' is {:?} and cannot send from the {:?} side",
                self.member, self.direction, self.role
            )));
        }
        let mut entry = MessageEntry::new(EntryType::WirePacket, self.member.as_str());
        push_value::<C>(&mut entry, &value)?;

        let mut state = self.state.lock();
        if !state.open {
            return Err(MemberError::InvalidOperation(format!(
                "wire '{}' connection is closed",
                self.member
            )));
        }
        if !state.out_slot.update(value) {
            debug!(member = %self.member, "out value older than the current one not sent");
            return Ok(());
        }
        self.endpoint.send_message(entry)?;
        drop(state);
        self.changed.notify_all();
        Ok(())
    }

    /// Wait until the in-value is valid. Returns false on timeout or close.
    pub fn wait_in_value_valid(&self, timeout: Option<Duration>) -> bool {
        self.wait_valid(timeout, |state| state.in_slot.is_valid())
    }

    pub fn wait_out_value_valid(&self, timeout: Option<Duration>) -> bool {
        self.wait_valid(timeout, |state| state.out_slot.is_valid())
    }

    fn wait_valid(&self, timeout: Option<Duration>, valid: impl Fn(&WireState<C::Value>) -> bool) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        loop {
            if valid(&state) {
                return true;
            }
            if !state.open {
                return false;
            }
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut state, deadline).timed_out() {
                        return valid(&state);
                    }
                }
                None => self.changed.wait(&mut state),
            }
        }
    }

    /// `callback` receives each stored in-value.
    pub fn on_value_changed(
        &self,
        callback: impl Fn(&WireValue<C::Value>) + Send + Sync + 'static,
    ) -> ListenerId {
        self.value_changed.add(callback)
    }

    pub fn on_closed(&self, callback: impl Fn(&WireConnection<C>) + Send + Sync + 'static) -> ListenerId {
        self.closed.add(callback)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.value_changed.remove(id) || self.closed.remove(id)
    }

    /// Close and tell the peer. Must not be called from a listener on the
    /// client side; use [`WireConnection::async_close`] there.
    pub fn close(&self) -> Result<()> {
        wait_completion(|done| self.async_close(done))
    }

    pub fn async_close(&self, handler: Completion<()>) {
        if !self.shutdown_local() {
            handler(Ok(()));
            return;
        }
        match self.role {
            Role::Client => {
                let entry = MessageEntry::new(EntryType::WireDisconnectReq, self.member.as_str());
                self.endpoint.async_process_request(
                    entry,
                    self.request_timeout,
                    Box::new(move |result| handler(check_response(result).map(|_| ()))),
                );
            }
            Role::Service => {
                let entry = MessageEntry::new(EntryType::WireClosed, self.member.as_str());
                handler(self.endpoint.send_message(entry).map_err(Into::into));
            }
        }
    }

    pub(crate) fn shutdown_local(&self) -> bool {
        {
            let mut state = self.state.lock();
            if !state.open {
                return false;
            }
            state.open = false;
        }
        self.changed.notify_all();
        if let Some(detach) = self.detach.lock().take() {
            detach();
        }
        debug!(member = %self.member, role = ?self.role, "wire connection closed");
        self.closed.invoke(self);
        true
    }

    pub(crate) fn deliver(&self, entry: &MessageEntry) {
        let sender = match self.role {
            Role::Client => Role::Service,
            Role::Service => Role::Client,
        };
        if !self.direction.allows(sender) {
            warn!(member = %self.member, direction = ?self.direction, "wire value from disallowed side dropped");
            return;
        }
        if self.ignore_in_value() {
            return;
        }
        let value = match read_value::<C>(entry) {
            Ok(value) => value,
            Err(err) => {
                warn!(member = %self.member, error = %err, "malformed wire value dropped");
                return;
            }
        };
        let stored = {
            let mut state = self.state.lock();
            state.open && state.in_slot.update(value.clone())
        };
        if stored {
            self.changed.notify_all();
            self.value_changed.invoke(&value);
        } else {
            debug!(member = %self.member, "stale wire value ignored");
        }
    }
}

impl<C: Codec> Drop for WireConnection<C> {
    fn drop(&mut self) {
        if self.state.get_mut().open && self.endpoint.is_connected() {
            self.async_close(Box::new(|_| {}));
        }
    }
}
