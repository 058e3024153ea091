use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use raconteur_stub::Codec;
use raconteur_transport::Endpoint;
use raconteur_value::{EntryType, MessageEntry};
use tracing::{debug, info, warn};

use super::connection::WireConnection;
use super::value::{push_value, read_value, WireValue};
use crate::config::{Role, WireConfig};
use crate::error::{MemberError, Result};
use crate::service::{wait_completion, Completion, MemberHandler, ServiceClient};

/// Client side of a wire member.
pub struct WireClient<C: Codec> {
    name: String,
    config: WireConfig,
    client: Arc<ServiceClient>,
    connection: Mutex<Option<Arc<WireConnection<C>>>>,
    this: Weak<WireClient<C>>,
}

impl<C: Codec> WireClient<C> {
    pub fn new(client: &Arc<ServiceClient>, name: &str, config: WireConfig) -> Result<Arc<Self>> {
        let wire = Arc::new_cyclic(|this| Self {
            name: name.to_string(),
            config,
            client: Arc::clone(client),
            connection: Mutex::new(None),
            this: this.clone(),
        });
        let handler: Weak<dyn MemberHandler> = wire.this.clone();
        client.register_member(name, handler)?;
        Ok(wire)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The open connection, if any.
    pub fn connection(&self) -> Option<Arc<WireConnection<C>>> {
        self.connection.lock().clone()
    }

    pub fn connect(&self) -> Result<Arc<WireConnection<C>>> {
        wait_completion(|done| self.async_connect(done))
    }

    pub fn async_connect(&self, handler: Completion<Arc<WireConnection<C>>>) {
        let entry = MessageEntry::new(EntryType::WireConnectReq, self.name.as_str());
        let owner = self.this.clone();
        self.client.async_request(
            entry,
            self.config.request_timeout,
            Box::new(move |result| {
                let outcome = result.and_then(|_| {
                    let owner = owner.upgrade().ok_or_else(|| {
                        MemberError::InvalidOperation("wire client dropped".into())
                    })?;
                    Ok(owner.attach())
                });
                handler(outcome);
            }),
        );
    }

    /// Read the service's current out-value without connecting.
    pub fn peek_in_value(&self) -> Result<WireValue<C::Value>> {
        wait_completion(|done| self.async_peek_in_value(done))
    }

    pub fn async_peek_in_value(&self, handler: Completion<WireValue<C::Value>>) {
        self.peek(EntryType::WirePeekInValueReq, handler);
    }

    /// Read the value the service last received from clients.
    pub fn peek_out_value(&self) -> Result<WireValue<C::Value>> {
        wait_completion(|done| self.async_peek_out_value(done))
    }

    pub fn async_peek_out_value(&self, handler: Completion<WireValue<C::Value>>) {
        self.peek(EntryType::WirePeekOutValueReq, handler);
    }

    /// Write a value to the service without connecting.
    pub fn poke_out_value(&self, value: &C::Value) -> Result<()> {
        wait_completion(|done| self.async_poke_out_value(value, done))
    }

    pub fn async_poke_out_value(&self, value: &C::Value, handler: Completion<()>) {
        let mut entry = MessageEntry::new(EntryType::WirePokeOutValueReq, self.name.as_str());
        if let Err(err) = push_value::<C>(&mut entry, &WireValue::now(value.clone())) {
            handler(Err(err));
            return;
        }
        self.client.async_request(
            entry,
            self.config.request_timeout,
            Box::new(move |result| handler(result.map(|_| ()))),
        );
    }

    fn peek(&self, kind: EntryType, handler: Completion<WireValue<C::Value>>) {
        let entry = MessageEntry::new(kind, self.name.as_str());
        self.client.async_request(
            entry,
            self.config.request_timeout,
            Box::new(move |result| {
                handler(result.and_then(|response| Ok(read_value::<C>(&response)?)));
            }),
        );
    }

    fn attach(&self) -> Arc<WireConnection<C>> {
        let wire = Arc::new(WireConnection::new(
            Arc::clone(self.client.endpoint()),
            &self.name,
            Role::Client,
            &self.config,
        ));
        let owner = self.this.clone();
        let key = Arc::downgrade(&wire);
        wire.set_detach(Box::new(move || {
            if let Some(client) = owner.upgrade() {
                let mut connection = client.connection.lock();
                if connection.as_ref().is_some_and(|c| Weak::ptr_eq(&Arc::downgrade(c), &key)) {
                    *connection = None;
                }
            }
        }));
        let stale = self.connection.lock().replace(Arc::clone(&wire));
        if let Some(stale) = stale {
            warn!(member = %self.name, "replacing stale wire connection");
            stale.shutdown_local();
        }
        info!(member = %self.name, "wire connected");
        wire
    }
}

impl<C: Codec> MemberHandler for WireClient<C> {
    fn handle_message(&self, _endpoint: &Arc<dyn Endpoint>, entry: MessageEntry) {
        match entry.entry_type {
            EntryType::WirePacket => match self.connection() {
                Some(wire) => wire.deliver(&entry),
                None => debug!(member = %self.name, "wire value without connection dropped"),
            },
            EntryType::WireClosed => {
                let removed = self.connection.lock().take();
                if let Some(wire) = removed {
                    debug!(member = %self.name, "wire closed by service");
                    wire.shutdown_local();
                }
            }
            other => warn!(member = %self.name, kind = ?other, "unexpected wire entry"),
        }
    }

    fn endpoint_closed(&self, _endpoint: u32) {
        let removed = self.connection.lock().take();
        if let Some(wire) = removed {
            wire.shutdown_local();
        }
    }
}
