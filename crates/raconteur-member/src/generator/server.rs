use std::sync::Arc;

use parking_lot::Mutex;
use raconteur_stub::Codec;
use raconteur_transport::{Endpoint, SlotId, SlotMap};
use raconteur_value::{ElementData, EntryType, MessageElement, MessageEntry};
use tracing::{debug, info};

use super::{Generator, INDEX, PARAMETER, RETURN};
use crate::error::{MemberError, Result};
use crate::service::{MemberHandler, ServiceHost};

type Shared<P, R> = Arc<dyn Generator<P, R>>;

struct Served<P, R> {
    endpoint: u32,
    generator: Shared<P, R>,
}

/// Serves generators handed out to clients.
///
/// Each generator belongs to one client endpoint and is addressed by the
/// packed [`SlotId`] returned from [`GeneratorServer::add`]. The handle
/// reaches the client through an application call. A generator is dropped
/// once it is aborted, closed or exhausted, or when its endpoint goes away.
pub struct GeneratorServer<PC: Codec, RC: Codec> {
    name: String,
    active: Mutex<SlotMap<Served<PC::Value, RC::Value>>>,
}

impl<PC: Codec, RC: Codec> GeneratorServer<PC, RC> {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            active: Mutex::new(SlotMap::new()),
        })
    }

    pub fn register(host: &ServiceHost, name: &str) -> Result<Arc<Self>> {
        let server = Self::new(name);
        host.add_member(name, server.clone())?;
        Ok(server)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hand `generator` to the client on `endpoint`.
    pub fn add(&self, endpoint: u32, generator: Shared<PC::Value, RC::Value>) -> SlotId {
        let id = self.active.lock().insert(Served {
            endpoint,
            generator,
        });
        debug!(member = %self.name, endpoint, generator = %id, "generator added");
        id
    }

    /// Number of generators still being served.
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    pub fn contains(&self, id: SlotId) -> bool {
        self.active.lock().contains(id)
    }

    fn lookup(&self, endpoint: u32, entry: &MessageEntry) -> Result<(SlotId, Shared<PC::Value, RC::Value>)> {
        let raw = entry.find(INDEX)?.data.as_scalar::<u64>()?;
        let unknown = || {
            MemberError::UnknownHandle(format!("generator {raw} not found on '{}'", self.name))
        };
        let id = SlotId::from_u64(raw).ok_or_else(unknown)?;
        let active = self.active.lock();
        let found = active
            .get(id)
            .filter(|e| e.endpoint == endpoint)
            .ok_or_else(unknown)?;
        Ok((id, Arc::clone(&found.generator)))
    }

    fn retire(&self, id: SlotId) {
        // Dropped outside the lock.
        let removed = self.active.lock().remove(id);
        if removed.is_some() {
            debug!(member = %self.name, generator = %id, "generator retired");
        }
    }

    fn step(
        &self,
        id: SlotId,
        generator: &Shared<PC::Value, RC::Value>,
        entry: &MessageEntry,
    ) -> Result<MessageEntry> {
        let param = match entry.try_find(PARAMETER) {
            Some(element) => PC::unpack(&element.data)?,
            None => PC::unpack(&ElementData::Void)?,
        };
        match generator.next(param) {
            Ok(value) => {
                let data = RC::pack(&value)?;
                let mut response = entry.response()?;
                if !data.is_void() {
                    response.push(MessageElement::new(RETURN, data));
                }
                Ok(response)
            }
            Err(err) => {
                if err.is_terminal() {
                    self.retire(id);
                }
                Err(err)
            }
        }
    }
}

impl<PC: Codec, RC: Codec> MemberHandler for GeneratorServer<PC, RC> {
    fn handle_request(&self, endpoint: &Arc<dyn Endpoint>, entry: MessageEntry) -> Result<MessageEntry> {
        let (id, generator) = self.lookup(endpoint.local_id(), &entry)?;
        match entry.entry_type {
            EntryType::GeneratorNextReq => self.step(id, &generator, &entry),
            EntryType::GeneratorAbortReq => {
                self.retire(id);
                generator.abort()?;
                Ok(entry.response()?)
            }
            EntryType::GeneratorCloseReq => {
                self.retire(id);
                generator.close()?;
                Ok(entry.response()?)
            }
            other => Err(MemberError::InvalidOperation(format!(
                "generator '{}' does not accept {other:?}",
                self.name
            ))),
        }
    }

    fn endpoint_closed(&self, endpoint: u32) {
        let orphaned: Vec<SlotId> = self
            .active
            .lock()
            .iter()
            .filter(|(_, e)| e.endpoint == endpoint)
            .map(|(id, _)| id)
            .collect();
        if orphaned.is_empty() {
            return;
        }
        info!(member = %self.name, endpoint, count = orphaned.len(), "aborting generators of closed endpoint");
        for id in orphaned {
            let removed = self.active.lock().remove(id);
            if let Some(served) = removed {
                if let Err(err) = served.generator.abort() {
                    debug!(member = %self.name, generator = %id, error = %err, "abort failed");
                }
            }
        }
    }
}
