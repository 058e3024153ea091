use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use raconteur_stub::Codec;
use raconteur_transport::Endpoint;
use raconteur_value::{EntryType, MessageEntry};
use tracing::{debug, info, warn};

use super::connection::WireConnection;
use super::value::{push_value, read_value, WireValue};
use crate::config::{Role, WireConfig};
use crate::error::{MemberError, Result};
use crate::listeners::{ListenerId, Listeners};
use crate::service::{MemberHandler, ServiceHost};

/// Answers a client peek for the endpoint with the given id.
pub type PeekCallback<V> = Arc<dyn Fn(u32) -> Result<WireValue<V>> + Send + Sync>;

/// Receives a value poked by the endpoint with the given id.
pub type PokeCallback<V> = Arc<dyn Fn(WireValue<V>, u32) -> Result<()> + Send + Sync>;

struct Callbacks<V> {
    peek_in: Option<PeekCallback<V>>,
    peek_out: Option<PeekCallback<V>>,
    poke_out: Option<PokeCallback<V>>,
}

/// Service side of a wire member. One connection per client endpoint.
pub struct WireServer<C: Codec> {
    name: String,
    config: WireConfig,
    connections: Mutex<HashMap<u32, Arc<WireConnection<C>>>>,
    connected: Listeners<Arc<WireConnection<C>>>,
    callbacks: RwLock<Callbacks<C::Value>>,
    this: Weak<WireServer<C>>,
}

impl<C: Codec> WireServer<C> {
    pub fn new(name: impl Into<String>, config: WireConfig) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            name: name.into(),
            config,
            connections: Mutex::new(HashMap::new()),
            connected: Listeners::new("wire.connect"),
            callbacks: RwLock::new(Callbacks {
                peek_in: None,
                peek_out: None,
                poke_out: None,
            }),
            this: this.clone(),
        })
    }

    pub fn register(host: &ServiceHost, name: &str, config: WireConfig) -> Result<Arc<Self>> {
        let server = Self::new(name, config);
        host.add_member(name, server.clone())?;
        Ok(server)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `callback` runs once per new connection, after the connect response
    /// has been sent.
    pub fn on_wire_connect(
        &self,
        callback: impl Fn(&Arc<WireConnection<C>>) + Send + Sync + 'static,
    ) -> ListenerId {
        self.connected.add(callback)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.connected.remove(id)
    }

    /// Answer client `peek_in_value` requests, the value this service sends.
    pub fn set_peek_in_value_callback(&self, callback: Option<PeekCallback<C::Value>>) {
        self.callbacks.write().peek_in = callback;
    }

    /// Answer client `peek_out_value` requests, the value this service
    /// last received.
    pub fn set_peek_out_value_callback(&self, callback: Option<PeekCallback<C::Value>>) {
        self.callbacks.write().peek_out = callback;
    }

    pub fn set_poke_out_value_callback(&self, callback: Option<PokeCallback<C::Value>>) {
        self.callbacks.write().poke_out = callback;
    }

    pub fn connections(&self) -> Vec<Arc<WireConnection<C>>> {
        let mut connections: Vec<_> = self.connections.lock().values().cloned().collect();
        connections.sort_by_key(|c| c.endpoint_id());
        connections
    }

    pub fn connection(&self, endpoint: u32) -> Option<Arc<WireConnection<C>>> {
        self.connections.lock().get(&endpoint).cloned()
    }

    fn connect(&self, endpoint: &Arc<dyn Endpoint>) -> Result<Arc<WireConnection<C>>> {
        let id = endpoint.local_id();
        let mut connections = self.connections.lock();
        if connections.contains_key(&id) {
            return Err(MemberError::InvalidOperation(format!(
                "wire '{}' already connected on endpoint {id}",
                self.name
            )));
        }
        let wire = Arc::new(WireConnection::new(
            Arc::clone(endpoint),
            &self.name,
            Role::Service,
            &self.config,
        ));
        let owner = self.this.clone();
        wire.set_detach(Box::new(move || {
            if let Some(server) = owner.upgrade() {
                server.connections.lock().remove(&id);
            }
        }));
        connections.insert(id, Arc::clone(&wire));
        info!(member = %self.name, endpoint = id, "wire connected");
        Ok(wire)
    }

    fn peek(&self, callback: Option<PeekCallback<C::Value>>, endpoint: u32, entry: &MessageEntry) -> Result<MessageEntry> {
        let callback = callback.ok_or_else(|| {
            MemberError::InvalidOperation(format!("wire '{}' does not answer peeks", self.name))
        })?;
        let value = callback(endpoint)?;
        let mut response = entry.response()?;
        push_value::<C>(&mut response, &value)?;
        Ok(response)
    }
}

impl<C: Codec> MemberHandler for WireServer<C> {
    fn handle_request(&self, endpoint: &Arc<dyn Endpoint>, entry: MessageEntry) -> Result<MessageEntry> {
        let id = endpoint.local_id();
        match entry.entry_type {
            EntryType::WireConnectReq => {
                let wire = self.connect(endpoint)?;
                let server = self.this.clone();
                endpoint.defer(Box::new(move || {
                    if let Some(server) = server.upgrade() {
                        server.connected.invoke(&wire);
                    }
                }))?;
                Ok(entry.response()?)
            }
            EntryType::WireDisconnectReq => {
                let removed = self.connections.lock().remove(&id);
                let wire = removed.ok_or_else(|| {
                    MemberError::InvalidOperation(format!("wire '{}' is not connected", self.name))
                })?;
                wire.shutdown_local();
                debug!(member = %self.name, endpoint = id, "wire disconnected by client");
                Ok(entry.response()?)
            }
            EntryType::WirePeekInValueReq => {
                let callback = self.callbacks.read().peek_in.clone();
                self.peek(callback, id, &entry)
            }
            EntryType::WirePeekOutValueReq => {
                let callback = self.callbacks.read().peek_out.clone();
                self.peek(callback, id, &entry)
            }
            EntryType::WirePokeOutValueReq => {
                if !self.config.direction.allows(Role::Client) {
                    return Err(MemberError::InvalidOperation(format!(
                        "wire '{}' is read only",
                        self.name
                    )));
                }
                let callback = self.callbacks.read().poke_out.clone().ok_or_else(|| {
                    MemberError::InvalidOperation(format!("wire '{}' does not accept pokes", self.name))
                })?;
                callback(read_value::<C>(&entry)?, id)?;
                Ok(entry.response()?)
            }
            other => Err(MemberError::InvalidOperation(format!(
                "wire '{}' does not accept {other:?}",
                self.name
            ))),
        }
    }

    fn handle_message(&self, endpoint: &Arc<dyn Endpoint>, entry: MessageEntry) {
        let Some(wire) = self.connection(endpoint.local_id()) else {
            debug!(member = %self.name, "entry for unknown wire connection dropped");
            return;
        };
        match entry.entry_type {
            EntryType::WirePacket => wire.deliver(&entry),
            other => warn!(member = %self.name, kind = ?other, "unexpected wire entry"),
        }
    }

    fn endpoint_closed(&self, endpoint: u32) {
        let removed = self.connections.lock().remove(&endpoint);
        if let Some(wire) = removed {
            wire.shutdown_local();
        }
    }
}
