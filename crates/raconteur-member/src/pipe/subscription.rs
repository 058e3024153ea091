use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use raconteur_stub::Codec;
use tracing::{debug, info};

use super::client::PipeClient;
use super::endpoint::PipeEndpoint;
use super::ANY_INDEX;
use crate::config::{PipeConfig, SubscriptionConfig};
use crate::error::{MemberError, Result};
use crate::listeners::{ListenerId, Listeners};
use crate::service::ServiceClient;

struct Connection<C: Codec> {
    /// Keeps the client member registered while connected.
    _client: Arc<PipeClient<C>>,
    pipe: Arc<PipeEndpoint<C>>,
}

struct Inbox<V> {
    open: bool,
    queue: VecDeque<V>,
}

struct Shared<C: Codec> {
    max_recv_packets: Option<usize>,
    inbox: Mutex<Inbox<C::Value>>,
    changed: Condvar,
    connections: Mutex<Vec<Connection<C>>>,
    packet_received: Listeners<usize>,
}

impl<C: Codec> Shared<C> {
    /// Move everything queued on `pipe` into the aggregated queue.
    fn collect(&self, pipe: &PipeEndpoint<C>) {
        let available = {
            let mut inbox = self.inbox.lock();
            if !inbox.open {
                return;
            }
            while let Some(value) = pipe.try_receive_packet() {
                inbox.queue.push_back(value);
            }
            if let Some(max) = self.max_recv_packets {
                while inbox.queue.len() > max {
                    inbox.queue.pop_front();
                    debug!(member = %pipe.member_name(), "subscription queue full, oldest packet dropped");
                }
            }
            inbox.queue.len()
        };
        self.changed.notify_all();
        self.packet_received.invoke(&available);
    }
}

/// Pipe endpoints to several service instances read as one stream.
///
/// Packets from each connection keep their order; packets from different
/// connections interleave in arrival order.
pub struct PipeSubscription<C: Codec> {
    name: String,
    pipe_config: PipeConfig,
    shared: Arc<Shared<C>>,
}

impl<C: Codec> PipeSubscription<C> {
    pub fn new(name: impl Into<String>, pipe_config: PipeConfig, config: SubscriptionConfig) -> Self {
        Self {
            name: name.into(),
            pipe_config,
            shared: Arc::new(Shared {
                max_recv_packets: config.max_recv_packets,
                inbox: Mutex::new(Inbox {
                    open: true,
                    queue: VecDeque::new(),
                }),
                changed: Condvar::new(),
                connections: Mutex::new(Vec::new()),
                packet_received: Listeners::new("pipe_subscription.packet_received"),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Connect a new endpoint through `client` and start aggregating it.
    pub fn add_client(&self, client: &Arc<ServiceClient>) -> Result<Arc<PipeEndpoint<C>>> {
        if !self.shared.inbox.lock().open {
            return Err(MemberError::InvalidOperation(format!(
                "subscription '{}' is closed",
                self.name
            )));
        }
        let pipes = PipeClient::<C>::new(client, &self.name, self.pipe_config.clone())?;
        let pipe = pipes.connect(ANY_INDEX)?;

        let weak: Weak<Shared<C>> = Arc::downgrade(&self.shared);
        pipe.on_packet_received(move |pipe| {
            if let Some(shared) = weak.upgrade() {
                shared.collect(pipe);
            }
        });
        let weak: Weak<Shared<C>> = Arc::downgrade(&self.shared);
        pipe.on_closed(move |closed| {
            if let Some(shared) = weak.upgrade() {
                let removed: Vec<Connection<C>> = {
                    let mut connections = shared.connections.lock();
                    let (gone, kept) = connections
                        .drain(..)
                        .partition(|c| std::ptr::eq(Arc::as_ptr(&c.pipe), closed));
                    *connections = kept;
                    gone
                };
                debug!(member = %closed.member_name(), count = removed.len(), "subscription connection closed");
            }
        });
        // Packets that arrived before the listener was installed.
        self.shared.collect(&pipe);

        self.shared.connections.lock().push(Connection {
            _client: pipes,
            pipe: Arc::clone(&pipe),
        });
        info!(member = %self.name, endpoint = pipe.endpoint_id(), "subscription connected");
        Ok(pipe)
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.shared.connections.lock().len()
    }

    pub fn receive_packet(&self) -> Result<C::Value> {
        self.try_receive_packet()
            .ok_or_else(|| MemberError::InvalidOperation("no packets available".into()))
    }

    pub fn try_receive_packet(&self) -> Option<C::Value> {
        self.shared.inbox.lock().queue.pop_front()
    }

    pub fn receive_packet_wait(&self, timeout: Option<Duration>) -> Result<C::Value> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut inbox = self.shared.inbox.lock();
        loop {
            if let Some(value) = inbox.queue.pop_front() {
                return Ok(value);
            }
            if !inbox.open {
                return Err(MemberError::InvalidOperation(format!(
                    "subscription '{}' is closed",
                    self.name
                )));
            }
            match deadline {
                Some(deadline) => {
                    if self.shared.changed.wait_until(&mut inbox, deadline).timed_out() {
                        return inbox
                            .queue
                            .pop_front()
                            .ok_or(MemberError::Timeout(timeout.unwrap_or_default()));
                    }
                }
                None => self.shared.changed.wait(&mut inbox),
            }
        }
    }

    pub fn peek_next_packet(&self) -> Result<C::Value> {
        self.try_peek_next_packet()
            .ok_or_else(|| MemberError::InvalidOperation("no packets available".into()))
    }

    pub fn try_peek_next_packet(&self) -> Option<C::Value> {
        self.shared.inbox.lock().queue.front().cloned()
    }

    pub fn available(&self) -> usize {
        self.shared.inbox.lock().queue.len()
    }

    /// Send `value` on every open connection. Returns how many accepted it.
    pub fn send_packet_all(&self, value: &C::Value) -> usize {
        let pipes: Vec<Arc<PipeEndpoint<C>>> = self
            .shared
            .connections
            .lock()
            .iter()
            .map(|c| Arc::clone(&c.pipe))
            .collect();
        pipes
            .iter()
            .filter(|pipe| match pipe.send_packet(value) {
                Ok(_) => true,
                Err(err) => {
                    debug!(member = %self.name, error = %err, "subscription send failed");
                    false
                }
            })
            .count()
    }

    /// `callback` receives the queue length after new packets arrive.
    pub fn on_packet_received(&self, callback: impl Fn(&usize) + Send + Sync + 'static) -> ListenerId {
        self.shared.packet_received.add(callback)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.packet_received.remove(id)
    }

    /// Close every connection and wake blocked receivers.
    pub fn close(&self) {
        self.shared.inbox.lock().open = false;
        self.shared.changed.notify_all();
        let connections: Vec<Connection<C>> = self.shared.connections.lock().drain(..).collect();
        for connection in &connections {
            if let Err(err) = connection.pipe.close() {
                debug!(member = %self.name, error = %err, "subscription close failed");
            }
        }
        drop(connections);
    }
}
