//! Routing of entries between endpoints and members.
//!
//! A [`ServiceHost`] owns the service side members and may be attached to
//! any number of endpoints, one per connected client. A [`ServiceClient`]
//! wraps the single endpoint a client uses and routes packets and close
//! notices to its client side members.

use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use raconteur_stub::TypeRegistry;
use raconteur_transport::{Endpoint, MessageHandler, TransportError};
use raconteur_value::MessageEntry;
use tracing::{debug, info, warn};

use crate::error::{MemberError, Result};

/// Completion callback for an asynchronous member operation.
///
/// Invoked exactly once.
pub type Completion<T> = Box<dyn FnOnce(Result<T>) + Send + 'static>;

/// Receives the entries addressed to one member.
pub trait MemberHandler: Send + Sync {
    /// Answer a request. An error becomes an error response.
    fn handle_request(
        &self,
        endpoint: &Arc<dyn Endpoint>,
        entry: MessageEntry,
    ) -> Result<MessageEntry> {
        let _ = endpoint;
        Err(MemberError::InvalidOperation(format!(
            "member '{}' does not accept {:?}",
            entry.member_name, entry.entry_type
        )))
    }

    /// Handle a one-way entry.
    fn handle_message(&self, endpoint: &Arc<dyn Endpoint>, entry: MessageEntry) {
        let _ = endpoint;
        debug!(member = %entry.member_name, kind = ?entry.entry_type, "unhandled entry dropped");
    }

    /// The endpoint with this id is gone.
    fn endpoint_closed(&self, endpoint: u32) {
        let _ = endpoint;
    }
}

fn reply_to(entry: &MessageEntry) -> MessageEntry {
    let mut reply = MessageEntry::new(
        entry.entry_type.response().unwrap_or(entry.entry_type),
        entry.member_name.clone(),
    );
    reply.request_id = entry.request_id;
    reply
}

/// Run an asynchronous operation and block until its completion fires.
pub(crate) fn wait_completion<T: Send + 'static>(start: impl FnOnce(Completion<T>)) -> Result<T> {
    let (tx, rx) = mpsc::sync_channel(1);
    start(Box::new(move |result| {
        let _ = tx.send(result);
    }));
    rx.recv().unwrap_or_else(|_| {
        Err(MemberError::Transport(TransportError::Disconnected(
            "completion dropped".into(),
        )))
    })
}

/// Turn a transport outcome into a member outcome, unwrapping error responses.
pub(crate) fn check_response(
    result: std::result::Result<MessageEntry, TransportError>,
) -> Result<MessageEntry> {
    let mut entry = result?;
    match entry.error.take() {
        Some(info) => Err(MemberError::from_error_info(info)),
        None => Ok(entry),
    }
}

/// Service side router.
pub struct ServiceHost {
    name: String,
    members: RwLock<HashMap<String, Arc<dyn MemberHandler>>>,
    endpoints: RwLock<HashMap<u32, Arc<dyn Endpoint>>>,
    registry: Option<Arc<TypeRegistry>>,
    this: Weak<ServiceHost>,
}

impl ServiceHost {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::build(name.into(), None)
    }

    /// A host that validates record payloads against `registry`.
    pub fn with_registry(name: impl Into<String>, registry: Arc<TypeRegistry>) -> Arc<Self> {
        Self::build(name.into(), Some(registry))
    }

    fn build(name: String, registry: Option<Arc<TypeRegistry>>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            name,
            members: RwLock::new(HashMap::new()),
            endpoints: RwLock::new(HashMap::new()),
            registry,
            this: this.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_member(&self, name: impl Into<String>, handler: Arc<dyn MemberHandler>) -> Result<()> {
        let name = name.into();
        let mut members = self.members.write();
        if members.contains_key(&name) {
            return Err(MemberError::InvalidOperation(format!(
                "member '{name}' already registered"
            )));
        }
        debug!(service = %self.name, member = %name, "member added");
        members.insert(name, handler);
        Ok(())
    }

    pub fn remove_member(&self, name: &str) -> bool {
        self.members.write().remove(name).is_some()
    }

    /// Registered member names, sorted.
    pub fn member_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.members.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Start serving a client connected through `endpoint`.
    pub fn attach(&self, endpoint: Arc<dyn Endpoint>) {
        let handler: Weak<dyn MessageHandler> = self.this.clone();
        endpoint.set_handler(handler);
        let id = endpoint.local_id();
        info!(service = %self.name, endpoint = id, "client attached");
        self.endpoints.write().insert(id, endpoint);
    }

    /// Stop serving an endpoint and notify every member.
    pub fn detach(&self, endpoint: u32) -> Option<Arc<dyn Endpoint>> {
        let removed = self.endpoints.write().remove(&endpoint);
        if removed.is_some() {
            info!(service = %self.name, endpoint, "client detached");
            for member in self.snapshot() {
                member.endpoint_closed(endpoint);
            }
        }
        removed
    }

    pub fn endpoint(&self, id: u32) -> Option<Arc<dyn Endpoint>> {
        self.endpoints.read().get(&id).cloned()
    }

    pub fn endpoint_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.endpoints.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn member(&self, name: &str) -> Result<Arc<dyn MemberHandler>> {
        self.members
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| MemberError::MemberNotFound(name.to_string()))
    }

    fn snapshot(&self) -> Vec<Arc<dyn MemberHandler>> {
        self.members.read().values().cloned().collect()
    }

    fn attached(&self, id: u32) -> Result<Arc<dyn Endpoint>> {
        self.endpoint(id)
            .ok_or_else(|| MemberError::InvalidOperation(format!("endpoint {id} not attached")))
    }

    fn validate(&self, entry: &MessageEntry) -> Result<()> {
        if let Some(registry) = &self.registry {
            registry.validate_entry(entry)?;
        }
        Ok(())
    }

    fn route_request(&self, endpoint: u32, entry: MessageEntry) -> Result<MessageEntry> {
        let endpoint = self.attached(endpoint)?;
        let member = self.member(&entry.member_name)?;
        self.validate(&entry)?;
        member.handle_request(&endpoint, entry)
    }
}

impl MessageHandler for ServiceHost {
    fn handle_message(&self, endpoint: u32, entry: MessageEntry) {
        let routed = self.attached(endpoint).and_then(|ep| {
            let member = self.member(&entry.member_name)?;
            self.validate(&entry)?;
            Ok((ep, member))
        });
        match routed {
            Ok((ep, member)) => member.handle_message(&ep, entry),
            Err(err) => {
                warn!(service = %self.name, member = %entry.member_name, error = %err, "entry dropped")
            }
        }
    }

    fn handle_request(&self, endpoint: u32, entry: MessageEntry) -> MessageEntry {
        let mut reply = reply_to(&entry);
        match self.route_request(endpoint, entry) {
            Ok(response) => response,
            Err(err) => {
                debug!(service = %self.name, member = %reply.member_name, error = %err, "request failed");
                reply.error = Some(err.to_error_info());
                reply
            }
        }
    }

    fn handle_disconnect(&self, endpoint: u32) {
        self.detach(endpoint);
    }
}

/// Client side router over one endpoint.
pub struct ServiceClient {
    endpoint: Arc<dyn Endpoint>,
    members: RwLock<HashMap<String, Weak<dyn MemberHandler>>>,
    registry: Option<Arc<TypeRegistry>>,
}

impl ServiceClient {
    pub fn connect(endpoint: Arc<dyn Endpoint>) -> Arc<Self> {
        Self::build(endpoint, None)
    }

    /// A client that validates record payloads in responses and packets.
    pub fn with_registry(endpoint: Arc<dyn Endpoint>, registry: Arc<TypeRegistry>) -> Arc<Self> {
        Self::build(endpoint, Some(registry))
    }

    fn build(endpoint: Arc<dyn Endpoint>, registry: Option<Arc<TypeRegistry>>) -> Arc<Self> {
        let client = Arc::new(Self {
            endpoint,
            members: RwLock::new(HashMap::new()),
            registry,
        });
        let weak = Arc::downgrade(&client);
        let handler: Weak<dyn MessageHandler> = weak;
        client.endpoint.set_handler(handler);
        client
    }

    pub fn endpoint(&self) -> &Arc<dyn Endpoint> {
        &self.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.endpoint.is_connected()
    }

    /// Route entries for `name` to `handler` for as long as it is alive.
    pub fn register_member(&self, name: &str, handler: Weak<dyn MemberHandler>) -> Result<()> {
        let mut members = self.members.write();
        if members.get(name).is_some_and(|h| h.strong_count() > 0) {
            return Err(MemberError::InvalidOperation(format!(
                "member '{name}' already registered"
            )));
        }
        members.insert(name.to_string(), handler);
        Ok(())
    }

    pub fn unregister_member(&self, name: &str) -> bool {
        self.members.write().remove(name).is_some()
    }

    /// Send a request and wait for its response.
    pub fn request(&self, entry: MessageEntry, timeout: Option<Duration>) -> Result<MessageEntry> {
        let response = check_response(self.endpoint.process_request(entry, timeout))?;
        self.validate(&response)?;
        Ok(response)
    }

    /// Send a request; `handler` receives the response or the failure.
    pub fn async_request(
        &self,
        entry: MessageEntry,
        timeout: Option<Duration>,
        handler: Completion<MessageEntry>,
    ) {
        let registry = self.registry.clone();
        self.endpoint.async_process_request(
            entry,
            timeout,
            Box::new(move |result| {
                let outcome = check_response(result).and_then(|response| {
                    if let Some(registry) = &registry {
                        registry.validate_entry(&response)?;
                    }
                    Ok(response)
                });
                handler(outcome);
            }),
        );
    }

    pub fn send(&self, entry: MessageEntry) -> Result<()> {
        Ok(self.endpoint.send_message(entry)?)
    }

    pub fn close(&self) {
        self.endpoint.close();
    }

    fn validate(&self, entry: &MessageEntry) -> Result<()> {
        if let Some(registry) = &self.registry {
            registry.validate_entry(entry)?;
        }
        Ok(())
    }

    fn member(&self, name: &str) -> Option<Arc<dyn MemberHandler>> {
        self.members.read().get(name).and_then(Weak::upgrade)
    }
}

impl MessageHandler for ServiceClient {
    fn handle_message(&self, _endpoint: u32, entry: MessageEntry) {
        if let Err(err) = self.validate(&entry) {
            warn!(member = %entry.member_name, error = %err, "entry dropped");
            return;
        }
        match self.member(&entry.member_name) {
            Some(member) => member.handle_message(&self.endpoint, entry),
            None => debug!(member = %entry.member_name, "no client member, entry dropped"),
        }
    }

    fn handle_request(&self, _endpoint: u32, entry: MessageEntry) -> MessageEntry {
        let mut reply = reply_to(&entry);
        reply.error = Some(
            MemberError::InvalidOperation("clients do not serve requests".into()).to_error_info(),
        );
        reply
    }

    fn handle_disconnect(&self, endpoint: u32) {
        let members: Vec<Arc<dyn MemberHandler>> =
            self.members.read().values().filter_map(Weak::upgrade).collect();
        for member in members {
            member.endpoint_closed(endpoint);
        }
    }
}
