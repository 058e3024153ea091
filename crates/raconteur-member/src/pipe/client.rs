use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use raconteur_stub::Codec;
use raconteur_transport::Endpoint;
use raconteur_value::{EntryType, MessageElement, MessageEntry};
use tracing::{debug, info, warn};

use super::endpoint::PipeEndpoint;
use super::INDEX;
use crate::config::{PipeConfig, Role};
use crate::error::{MemberError, Result};
use crate::service::{wait_completion, Completion, MemberHandler, ServiceClient};

/// Client side of a pipe member.
pub struct PipeClient<C: Codec> {
    name: String,
    config: PipeConfig,
    client: Arc<ServiceClient>,
    endpoints: Mutex<HashMap<i32, Arc<PipeEndpoint<C>>>>,
    this: Weak<PipeClient<C>>,
}

impl<C: Codec> PipeClient<C> {
    /// Create the client member and route `name` entries on `client` to it.
    pub fn new(client: &Arc<ServiceClient>, name: &str, config: PipeConfig) -> Result<Arc<Self>> {
        let pipe = Arc::new_cyclic(|this| Self {
            name: name.to_string(),
            config,
            client: Arc::clone(client),
            endpoints: Mutex::new(HashMap::new()),
            this: this.clone(),
        });
        let handler: Weak<dyn MemberHandler> = pipe.this.clone();
        client.register_member(name, handler)?;
        Ok(pipe)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Connect at `index`, or at any free index with [`super::ANY_INDEX`].
    pub fn connect(&self, index: i32) -> Result<Arc<PipeEndpoint<C>>> {
        wait_completion(|done| self.async_connect(index, done))
    }

    pub fn async_connect(&self, index: i32, handler: Completion<Arc<PipeEndpoint<C>>>) {
        let entry = MessageEntry::new(EntryType::PipeConnectReq, self.name.as_str())
            .with_element(MessageElement::scalar(INDEX, index));
        let owner = self.this.clone();
        // The completion runs on the delivery thread, so the endpoint is
        // registered before any packet that follows the response.
        self.client.async_request(
            entry,
            self.config.request_timeout,
            Box::new(move |result| {
                let outcome = result.and_then(|response| {
                    let index = response.find(INDEX)?.data.as_scalar::<i32>()?;
                    let owner = owner.upgrade().ok_or_else(|| {
                        MemberError::InvalidOperation("pipe client dropped".into())
                    })?;
                    Ok(owner.attach(index))
                });
                handler(outcome);
            }),
        );
    }

    /// Open endpoints, ordered by index.
    pub fn endpoints(&self) -> Vec<Arc<PipeEndpoint<C>>> {
        let mut endpoints: Vec<_> = self.endpoints.lock().values().cloned().collect();
        endpoints.sort_by_key(|ep| ep.index());
        endpoints
    }

    pub fn endpoint(&self, index: i32) -> Option<Arc<PipeEndpoint<C>>> {
        self.endpoints.lock().get(&index).cloned()
    }

    fn attach(&self, index: i32) -> Arc<PipeEndpoint<C>> {
        let pipe = Arc::new(PipeEndpoint::new(
            index,
            Arc::clone(self.client.endpoint()),
            &self.name,
            Role::Client,
            self.config.clone(),
        ));
        let owner = self.this.clone();
        pipe.set_detach(Box::new(move || {
            if let Some(client) = owner.upgrade() {
                client.endpoints.lock().remove(&index);
            }
        }));
        if let Some(stale) = self.endpoints.lock().insert(index, Arc::clone(&pipe)) {
            warn!(member = %self.name, index, "replacing stale pipe endpoint");
            stale.shutdown_local();
        }
        info!(member = %self.name, index, "pipe connected");
        pipe
    }
}

impl<C: Codec> MemberHandler for PipeClient<C> {
    fn handle_message(&self, _endpoint: &Arc<dyn Endpoint>, entry: MessageEntry) {
        let index = match entry.find(INDEX).and_then(|e| e.data.as_scalar::<i32>()) {
            Ok(index) => index,
            Err(err) => {
                warn!(member = %self.name, error = %err, "pipe entry without index");
                return;
            }
        };
        match entry.entry_type {
            EntryType::PipeClosed => {
                let removed = self.endpoints.lock().remove(&index);
                if let Some(pipe) = removed {
                    debug!(member = %self.name, index, "pipe closed by service");
                    pipe.shutdown_local();
                }
            }
            kind => {
                let Some(pipe) = self.endpoint(index) else {
                    debug!(member = %self.name, index, "entry for unknown pipe endpoint dropped");
                    return;
                };
                match kind {
                    EntryType::PipePacket => pipe.deliver_packet(&entry),
                    EntryType::PipePacketRet => pipe.deliver_ack(&entry),
                    other => warn!(member = %self.name, kind = ?other, "unexpected pipe entry"),
                }
            }
        }
    }

    fn endpoint_closed(&self, _endpoint: u32) {
        let closed: Vec<_> = self.endpoints.lock().drain().map(|(_, pipe)| pipe).collect();
        for pipe in closed {
            pipe.shutdown_local();
        }
    }
}
