//! In-process endpoint pairs.
//!
//! Every entry is encoded with the binary message codec and decoded on the
//! receiving side, so a loopback link exercises the same bytes a socket
//! transport would carry. Each side owns one dispatch thread that delivers
//! entries to its handler in the order the peer sent them.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::{Condvar, Mutex, RwLock};
use raconteur_value::{
    decode_message, encode_message, MessageEntry, ValueError, DEFAULT_MAX_MESSAGE, HEADER_SIZE,
};
use tracing::{debug, error, warn};

use crate::error::{Result, TransportError};
use crate::pending::{PendingRequests, DEFAULT_MAX_PENDING};
use crate::traits::{Endpoint, MessageHandler, ResponseHandler, Task};

static NEXT_ENDPOINT_ID: AtomicU32 = AtomicU32::new(1);

/// Configuration for a loopback link.
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// Largest encoded message body accepted in either direction.
    pub max_message_size: usize,
    /// Outstanding requests allowed per side.
    pub max_pending: usize,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE,
            max_pending: DEFAULT_MAX_PENDING,
        }
    }
}

enum Delivery {
    Message(Bytes),
    Task(Task),
}

struct Side {
    id: u32,
    handler: RwLock<Option<Weak<dyn MessageHandler>>>,
    pending: Arc<PendingRequests>,
    /// Feeds this side's dispatch thread.
    inbox: Mutex<Option<mpsc::Sender<Delivery>>>,
    paused: Mutex<bool>,
    resumed: Condvar,
}

impl Side {
    fn new(max_pending: usize, inbox: mpsc::Sender<Delivery>) -> Self {
        Self {
            id: NEXT_ENDPOINT_ID.fetch_add(1, Ordering::Relaxed),
            handler: RwLock::new(None),
            pending: Arc::new(PendingRequests::new(max_pending)),
            inbox: Mutex::new(Some(inbox)),
            paused: Mutex::new(false),
            resumed: Condvar::new(),
        }
    }

    fn handler(&self) -> Option<Arc<dyn MessageHandler>> {
        self.handler.read().as_ref().and_then(Weak::upgrade)
    }

    fn enqueue(&self, delivery: Delivery) -> Result<()> {
        let inbox = self.inbox.lock();
        let sender = inbox
            .as_ref()
            .ok_or_else(|| TransportError::Disconnected("link closed".into()))?;
        sender
            .send(delivery)
            .map_err(|_| TransportError::Disconnected("dispatch thread stopped".into()))
    }

    fn wait_resumed(&self) {
        let mut paused = self.paused.lock();
        while *paused {
            self.resumed.wait(&mut paused);
        }
    }
}

struct Link {
    sides: [Side; 2],
    connected: AtomicBool,
    config: LoopbackConfig,
}

impl Link {
    fn encode(&self, entry: &MessageEntry) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        encode_message(entry, &mut buf)?;
        let body = buf.len() - HEADER_SIZE;
        if body > self.config.max_message_size {
            return Err(ValueError::PayloadTooLarge {
                size: body,
                max: self.config.max_message_size,
            }
            .into());
        }
        Ok(buf.freeze())
    }

    fn send_to(&self, side: usize, entry: &MessageEntry) -> Result<()> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(TransportError::Disconnected("link closed".into()));
        }
        let bytes = self.encode(entry)?;
        self.sides[side].enqueue(Delivery::Message(bytes))
    }

    fn shutdown(&self) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        for side in &self.sides {
            side.inbox.lock().take();
            *side.paused.lock() = false;
            side.resumed.notify_all();
        }
        for side in &self.sides {
            side.pending.fail_all("link closed");
        }
        debug!(
            a = self.sides[0].id,
            b = self.sides[1].id,
            "loopback link closed"
        );
    }

    fn dispatch(&self, side: usize, bytes: Bytes) {
        let target = &self.sides[side];
        let source = &self.sides[1 - side];

        let mut buf = BytesMut::from(&bytes[..]);
        let entry = match decode_message(&mut buf, self.config.max_message_size) {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                warn!(endpoint = target.id, "incomplete message dropped");
                return;
            }
            Err(err) => {
                warn!(endpoint = target.id, error = %err, "undecodable message dropped");
                return;
            }
        };

        if entry.entry_type.is_response() {
            target.pending.complete_wire(entry.request_id, Ok(entry));
            return;
        }

        let Some(handler) = target.handler() else {
            if entry.entry_type.is_request() {
                source.pending.complete_wire(
                    entry.request_id,
                    Err(TransportError::NoHandler(target.id)),
                );
            } else {
                debug!(endpoint = target.id, member = %entry.member_name, "no handler, entry dropped");
            }
            return;
        };

        if !entry.entry_type.is_request() {
            let id = target.id;
            if catch_unwind(AssertUnwindSafe(|| handler.handle_message(id, entry))).is_err() {
                error!(endpoint = id, "message handler panicked");
            }
            return;
        }

        let request_id = entry.request_id;
        let id = target.id;
        match catch_unwind(AssertUnwindSafe(|| handler.handle_request(id, entry))) {
            Ok(mut response) => {
                response.request_id = request_id;
                if let Err(err) = self.send_to(1 - side, &response) {
                    source.pending.complete_wire(request_id, Err(err));
                }
            }
            Err(_) => {
                error!(endpoint = id, "request handler panicked");
                source.pending.complete_wire(
                    request_id,
                    Err(TransportError::Disconnected("request handler panicked".into())),
                );
            }
        }
    }
}

fn run_dispatch(link: Arc<Link>, side: usize, inbox: mpsc::Receiver<Delivery>) {
    for delivery in inbox {
        link.sides[side].wait_resumed();
        if !link.connected.load(Ordering::Acquire) {
            break;
        }
        match delivery {
            Delivery::Message(bytes) => link.dispatch(side, bytes),
            Delivery::Task(task) => {
                if catch_unwind(AssertUnwindSafe(task)).is_err() {
                    error!(endpoint = link.sides[side].id, "deferred task panicked");
                }
            }
        }
    }

    let target = &link.sides[side];
    if let Some(handler) = target.handler() {
        handler.handle_disconnect(target.id);
    }
}

/// One side of an in-process link.
///
/// Dropping either side closes the link.
pub struct LoopbackEndpoint {
    link: Arc<Link>,
    side: usize,
}

impl LoopbackEndpoint {
    /// Create a connected pair with default configuration.
    pub fn pair() -> Result<(Self, Self)> {
        Self::pair_with_config(LoopbackConfig::default())
    }

    pub fn pair_with_config(config: LoopbackConfig) -> Result<(Self, Self)> {
        let (tx_a, rx_a) = mpsc::channel();
        let (tx_b, rx_b) = mpsc::channel();
        let link = Arc::new(Link {
            sides: [
                Side::new(config.max_pending, tx_a),
                Side::new(config.max_pending, tx_b),
            ],
            connected: AtomicBool::new(true),
            config,
        });

        for (side, inbox) in [rx_a, rx_b].into_iter().enumerate() {
            let worker = Arc::clone(&link);
            let spawned = thread::Builder::new()
                .name(format!("loopback-{}", link.sides[side].id))
                .spawn(move || run_dispatch(worker, side, inbox));
            if let Err(err) = spawned {
                link.shutdown();
                return Err(err.into());
            }
        }

        debug!(
            a = link.sides[0].id,
            b = link.sides[1].id,
            "loopback link opened"
        );
        Ok((
            Self {
                link: Arc::clone(&link),
                side: 0,
            },
            Self { link, side: 1 },
        ))
    }

    /// Id of the endpoint on the other side of the link.
    pub fn peer_id(&self) -> u32 {
        self.peer().id
    }

    /// Hold back delivery of entries to this side.
    ///
    /// Entries keep queueing while paused and are delivered in order once
    /// delivery resumes.
    pub fn set_delivery_paused(&self, paused: bool) {
        let local = self.local();
        *local.paused.lock() = paused;
        if !paused {
            local.resumed.notify_all();
        }
    }

    /// Requests sent from this side still awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.local().pending.len()
    }

    pub fn config(&self) -> &LoopbackConfig {
        &self.link.config
    }

    fn local(&self) -> &Side {
        &self.link.sides[self.side]
    }

    fn peer(&self) -> &Side {
        &self.link.sides[1 - self.side]
    }
}

impl Endpoint for LoopbackEndpoint {
    fn local_id(&self) -> u32 {
        self.local().id
    }

    fn is_connected(&self) -> bool {
        self.link.connected.load(Ordering::Acquire)
    }

    fn set_handler(&self, handler: Weak<dyn MessageHandler>) {
        *self.local().handler.write() = Some(handler);
    }

    fn send_message(&self, entry: MessageEntry) -> Result<()> {
        self.link.send_to(1 - self.side, &entry)
    }

    fn process_request(
        &self,
        mut entry: MessageEntry,
        timeout: Option<Duration>,
    ) -> Result<MessageEntry> {
        let local = self.local();
        let (tx, rx) = mpsc::sync_channel(1);
        let Some(id) = local.pending.register(Box::new(move |result| {
            let _ = tx.send(result);
        })) else {
            return rx
                .recv()
                .unwrap_or_else(|_| Err(TransportError::Disconnected("request dropped".into())));
        };

        entry.request_id = id.to_u64();
        if let Err(err) = self.link.send_to(1 - self.side, &entry) {
            local.pending.cancel(id);
            return Err(err);
        }

        let outcome = match timeout {
            Some(limit) => rx.recv_timeout(limit),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match outcome {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                if local.pending.cancel(id) {
                    Err(TransportError::Timeout(timeout.unwrap_or_default()))
                } else {
                    // Completed between the deadline and the cancel.
                    rx.recv().unwrap_or_else(|_| {
                        Err(TransportError::Disconnected("request dropped".into()))
                    })
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(TransportError::Disconnected("request dropped".into()))
            }
        }
    }

    fn async_process_request(
        &self,
        mut entry: MessageEntry,
        timeout: Option<Duration>,
        handler: ResponseHandler,
    ) {
        let local = self.local();
        let Some(id) = local.pending.register(handler) else {
            return;
        };

        entry.request_id = id.to_u64();
        if let Some(limit) = timeout {
            if let Err(err) = local.pending.arm_timeout(id, limit) {
                local.pending.complete(id, Err(err));
                return;
            }
        }
        if let Err(err) = self.link.send_to(1 - self.side, &entry) {
            local.pending.complete(id, Err(err));
        }
    }

    fn defer(&self, task: Task) -> Result<()> {
        self.local().enqueue(Delivery::Task(task))
    }

    fn close(&self) {
        self.link.shutdown();
    }
}

impl Drop for LoopbackEndpoint {
    fn drop(&mut self) {
        self.link.shutdown();
    }
}
