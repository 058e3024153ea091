use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use raconteur_stub::Codec;
use raconteur_transport::Endpoint;
use raconteur_value::{EntryType, MessageElement, MessageEntry};
use tracing::{debug, info, warn};

use super::endpoint::PipeEndpoint;
use super::{ANY_INDEX, INDEX};
use crate::config::{PipeConfig, Role};
use crate::error::{MemberError, Result};
use crate::listeners::{ListenerId, Listeners};
use crate::service::{MemberHandler, ServiceHost};

type Key = (u32, i32);

/// Service side of a pipe member.
///
/// Accepts connect requests from any attached client and owns the resulting
/// endpoints until they close.
pub struct PipeServer<C: Codec> {
    name: String,
    config: PipeConfig,
    endpoints: Mutex<HashMap<Key, Arc<PipeEndpoint<C>>>>,
    connected: Listeners<Arc<PipeEndpoint<C>>>,
    this: Weak<PipeServer<C>>,
}

impl<C: Codec> PipeServer<C> {
    pub fn new(name: impl Into<String>, config: PipeConfig) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            name: name.into(),
            config,
            endpoints: Mutex::new(HashMap::new()),
            connected: Listeners::new("pipe.connect"),
            this: this.clone(),
        })
    }

    /// Create a server and add it to `host` under `name`.
    pub fn register(host: &ServiceHost, name: &str, config: PipeConfig) -> Result<Arc<Self>> {
        let server = Self::new(name, config);
        host.add_member(name, server.clone())?;
        Ok(server)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `callback` runs once per new endpoint, after the connect response has
    /// been sent.
    pub fn on_pipe_connect(
        &self,
        callback: impl Fn(&Arc<PipeEndpoint<C>>) + Send + Sync + 'static,
    ) -> ListenerId {
        self.connected.add(callback)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.connected.remove(id)
    }

    /// Open endpoints, ordered by transport endpoint then index.
    pub fn endpoints(&self) -> Vec<Arc<PipeEndpoint<C>>> {
        let mut endpoints: Vec<_> = self.endpoints.lock().values().cloned().collect();
        endpoints.sort_by_key(|ep| (ep.endpoint_id(), ep.index()));
        endpoints
    }

    pub fn endpoint(&self, endpoint: u32, index: i32) -> Option<Arc<PipeEndpoint<C>>> {
        self.endpoints.lock().get(&(endpoint, index)).cloned()
    }

    fn connect(&self, endpoint: &Arc<dyn Endpoint>, requested: i32) -> Result<Arc<PipeEndpoint<C>>> {
        let id = endpoint.local_id();
        let mut endpoints = self.endpoints.lock();
        let index = match requested {
            ANY_INDEX => (1..)
                .find(|i| !endpoints.contains_key(&(id, *i)))
                .ok_or_else(|| MemberError::InvalidOperation("no free pipe index".into()))?,
            i if i < ANY_INDEX => {
                return Err(MemberError::InvalidOperation(format!("invalid pipe index {i}")))
            }
            i if endpoints.contains_key(&(id, i)) => {
                return Err(MemberError::InvalidOperation(format!(
                    "pipe '{}' index {i} already connected",
                    self.name
                )))
            }
            i => i,
        };

        let pipe = Arc::new(PipeEndpoint::new(
            index,
            Arc::clone(endpoint),
            &self.name,
            Role::Service,
            self.config.clone(),
        ));
        let owner = self.this.clone();
        pipe.set_detach(Box::new(move || {
            if let Some(server) = owner.upgrade() {
                server.endpoints.lock().remove(&(id, index));
            }
        }));
        endpoints.insert((id, index), Arc::clone(&pipe));
        info!(member = %self.name, endpoint = id, index, "pipe connected");
        Ok(pipe)
    }
}

impl<C: Codec> MemberHandler for PipeServer<C> {
    fn handle_request(&self, endpoint: &Arc<dyn Endpoint>, entry: MessageEntry) -> Result<MessageEntry> {
        let index = entry.find(INDEX)?.data.as_scalar::<i32>()?;
        match entry.entry_type {
            EntryType::PipeConnectReq => {
                let pipe = self.connect(endpoint, index)?;
                let server = self.this.clone();
                let notify = Arc::clone(&pipe);
                endpoint.defer(Box::new(move || {
                    if let Some(server) = server.upgrade() {
                        server.connected.invoke(&notify);
                    }
                }))?;
                Ok(entry
                    .response()?
                    .with_element(MessageElement::scalar(INDEX, pipe.index())))
            }
            EntryType::PipeDisconnectReq => {
                let removed = self.endpoints.lock().remove(&(endpoint.local_id(), index));
                let pipe = removed.ok_or_else(|| {
                    MemberError::InvalidOperation(format!(
                        "pipe '{}' index {index} is not connected",
                        self.name
                    ))
                })?;
                pipe.shutdown_local();
                debug!(member = %self.name, index, "pipe disconnected by client");
                Ok(entry.response()?)
            }
            other => Err(MemberError::InvalidOperation(format!(
                "pipe '{}' does not accept {other:?}",
                self.name
            ))),
        }
    }

    fn handle_message(&self, endpoint: &Arc<dyn Endpoint>, entry: MessageEntry) {
        let index = match entry.find(INDEX).and_then(|e| e.data.as_scalar::<i32>()) {
            Ok(index) => index,
            Err(err) => {
                warn!(member = %self.name, error = %err, "pipe entry without index");
                return;
            }
        };
        let Some(pipe) = self.endpoint(endpoint.local_id(), index) else {
            debug!(member = %self.name, index, "entry for unknown pipe endpoint dropped");
            return;
        };
        match entry.entry_type {
            EntryType::PipePacket => pipe.deliver_packet(&entry),
            EntryType::PipePacketRet => pipe.deliver_ack(&entry),
            other => warn!(member = %self.name, kind = ?other, "unexpected pipe entry"),
        }
    }

    fn endpoint_closed(&self, endpoint: u32) {
        let closed: Vec<Arc<PipeEndpoint<C>>> = {
            let mut endpoints = self.endpoints.lock();
            let keys: Vec<Key> = endpoints.keys().filter(|(id, _)| *id == endpoint).copied().collect();
            keys.into_iter().filter_map(|key| endpoints.remove(&key)).collect()
        };
        for pipe in closed {
            pipe.shutdown_local();
        }
    }
}
