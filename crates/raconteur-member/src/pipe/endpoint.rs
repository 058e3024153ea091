use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use raconteur_stub::Codec;
use raconteur_transport::Endpoint;
use raconteur_value::{EntryType, MessageElement, MessageEntry};
use tracing::{debug, warn};

use super::{INDEX, PACKET, PACKET_NUMBER, REQUEST_ACK};
use crate::config::{Direction, PipeConfig, Role};
use crate::error::{MemberError, Result};
use crate::listeners::{ListenerId, Listeners};
use crate::service::{check_response, wait_completion, Completion};

type Detach = Box<dyn FnOnce() + Send>;

/// Hold buffer bound for reliable pipes without a receive queue bound.
const DEFAULT_MAX_HELD: usize = 4096;

/// Packet-number order with wrap-around: true when `number` is `expected`
/// or less than half the number space ahead of it.
fn is_at_or_after(number: u32, expected: u32) -> bool {
    number.wrapping_sub(expected) < 1 << 31
}

struct PipeState<V> {
    open: bool,
    next_send: u32,
    next_expected: u32,
    queue: VecDeque<V>,
    /// Reliable mode: arrivals ahead of a gap.
    held: BTreeMap<u32, V>,
}

/// One connected end of a pipe.
///
/// Packets are numbered from 1 in send order. The receiving end queues them
/// in that order: a reliable endpoint holds early packets until the gap is
/// filled, an unreliable one drops packets that arrive late.
pub struct PipeEndpoint<C: Codec> {
    index: i32,
    endpoint: Arc<dyn Endpoint>,
    member: String,
    role: Role,
    config: PipeConfig,
    request_ack: AtomicBool,
    state: Mutex<PipeState<C::Value>>,
    changed: Condvar,
    packet_received: Listeners<PipeEndpoint<C>>,
    ack_received: Listeners<u32>,
    closed: Listeners<PipeEndpoint<C>>,
    detach: Mutex<Option<Detach>>,
}

impl<C: Codec> PipeEndpoint<C> {
    pub(crate) fn new(
        index: i32,
        endpoint: Arc<dyn Endpoint>,
        member: &str,
        role: Role,
        config: PipeConfig,
    ) -> Self {
        Self {
            index,
            endpoint,
            member: member.to_string(),
            role,
            request_ack: AtomicBool::new(config.request_packet_ack),
            config,
            state: Mutex::new(PipeState {
                open: true,
                next_send: 1,
                next_expected: 1,
                queue: VecDeque::new(),
                held: BTreeMap::new(),
            }),
            changed: Condvar::new(),
            packet_received: Listeners::new("pipe.packet_received"),
            ack_received: Listeners::new("pipe.packet_ack_received"),
            closed: Listeners::new("pipe.closed"),
            detach: Mutex::new(None),
        }
    }

    pub(crate) fn set_detach(&self, detach: Detach) {
        *self.detach.lock() = Some(detach);
    }

    pub fn index(&self) -> i32 {
        self.index
    }

    /// Local id of the transport endpoint carrying this pipe.
    pub fn endpoint_id(&self) -> u32 {
        self.endpoint.local_id()
    }

    pub fn member_name(&self) -> &str {
        &self.member
    }

    pub fn direction(&self) -> Direction {
        self.config.direction
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    pub fn request_packet_ack(&self) -> bool {
        self.request_ack.load(Ordering::Acquire)
    }

    /// Ask the peer to acknowledge packets sent from now on.
    pub fn set_request_packet_ack(&self, enabled: bool) {
        self.request_ack.store(enabled, Ordering::Release);
    }

    /// Send one packet and return its packet number.
    pub fn send_packet(&self, value: &C::Value) -> Result<u32> {
        if !self.config.direction.allows(self.role) {
            return Err(MemberError::InvalidOperation(format!(
                "pipe '{}' is {:?} and cannot send from the {:?} side",
                self.member, self.config.direction, self.role
            )));
        }
        let data = C::pack(value)?;

        let mut state = self.state.lock();
        if !state.open {
            return Err(MemberError::InvalidOperation(format!(
                "pipe '{}' endpoint {} is closed",
                self.member, self.index
            )));
        }
        let number = state.next_send;
        let mut entry = MessageEntry::new(EntryType::PipePacket, self.member.as_str())
            .with_element(MessageElement::scalar(INDEX, self.index))
            .with_element(MessageElement::scalar(PACKET_NUMBER, number))
            .with_element(MessageElement::new(PACKET, data));
        if self.request_packet_ack() {
            entry.push(MessageElement::scalar(REQUEST_ACK, true));
        }
        // Sent under the lock so packet numbers leave in order.
        self.endpoint.send_message(entry)?;
        state.next_send = number.wrapping_add(1);
        Ok(number)
    }

    /// Dequeue the oldest packet. Fails when none is queued.
    pub fn receive_packet(&self) -> Result<C::Value> {
        self.try_receive_packet()
            .ok_or_else(|| MemberError::InvalidOperation("no packets available".into()))
    }

    pub fn try_receive_packet(&self) -> Option<C::Value> {
        self.state.lock().queue.pop_front()
    }

    /// Dequeue the oldest packet, waiting up to `timeout` for one to arrive.
    pub fn receive_packet_wait(&self, timeout: Option<Duration>) -> Result<C::Value> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        loop {
            if let Some(value) = state.queue.pop_front() {
                return Ok(value);
            }
            if !state.open {
                return Err(MemberError::InvalidOperation(format!(
                    "pipe '{}' endpoint {} is closed",
                    self.member, self.index
                )));
            }
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut state, deadline).timed_out() {
                        return state
                            .queue
                            .pop_front()
                            .ok_or(MemberError::Timeout(timeout.unwrap_or_default()));
                    }
                }
                None => self.changed.wait(&mut state),
            }
        }
    }

    /// Copy of the oldest packet, left in the queue. Fails when none is queued.
    pub fn peek_next_packet(&self) -> Result<C::Value> {
        self.try_peek_next_packet()
            .ok_or_else(|| MemberError::InvalidOperation("no packets available".into()))
    }

    pub fn try_peek_next_packet(&self) -> Option<C::Value> {
        self.state.lock().queue.front().cloned()
    }

    /// Number of queued packets.
    pub fn available(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Close this end and tell the peer.
    ///
    /// On the client side this waits for the service to confirm, so it must
    /// not be called from a listener; use [`PipeEndpoint::async_close`] there.
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
                let entry = MessageEntry::new(EntryType::PipeDisconnectReq, self.member.as_str())
                    .with_element(MessageElement::scalar(INDEX, self.index));
                self.endpoint.async_process_request(
                    entry,
                    self.config.request_timeout,
                    Box::new(move |result| handler(check_response(result).map(|_| ()))),
                );
            }
            Role::Service => {
                let entry = MessageEntry::new(EntryType::PipeClosed, self.member.as_str())
                    .with_element(MessageElement::scalar(INDEX, self.index));
                handler(self.endpoint.send_message(entry).map_err(Into::into));
            }
        }
    }

    /// `callback` runs on the delivering thread after packets are queued.
    pub fn on_packet_received(
        &self,
        callback: impl Fn(&PipeEndpoint<C>) + Send + Sync + 'static,
    ) -> ListenerId {
        self.packet_received.add(callback)
    }

    /// `callback` receives the acknowledged packet number.
    pub fn on_packet_ack_received(
        &self,
        callback: impl Fn(&u32) + Send + Sync + 'static,
    ) -> ListenerId {
        self.ack_received.add(callback)
    }

    pub fn on_closed(&self, callback: impl Fn(&PipeEndpoint<C>) + Send + Sync + 'static) -> ListenerId {
        self.closed.add(callback)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.packet_received.remove(id) || self.ack_received.remove(id) || self.closed.remove(id)
    }

    /// Mark closed, wake waiters and notify listeners. Returns false if
    /// already closed.
    pub(crate) fn shutdown_local(&self) -> bool {
        {
            let mut state = self.state.lock();
            if !state.open {
                return false;
            }
            state.open = false;
            state.held.clear();
        }
        self.changed.notify_all();
        if let Some(detach) = self.detach.lock().take() {
            detach();
        }
        debug!(member = %self.member, index = self.index, role = ?self.role, "pipe endpoint closed");
        self.closed.invoke(self);
        true
    }

    pub(crate) fn deliver_packet(&self, entry: &MessageEntry) {
        if let Err(err) = self.try_deliver(entry) {
            warn!(member = %self.member, index = self.index, error = %err, "pipe packet dropped");
        }
    }

    fn try_deliver(&self, entry: &MessageEntry) -> Result<()> {
        let sender = match self.role {
            Role::Client => Role::Service,
            Role::Service => Role::Client,
        };
        if !self.config.direction.allows(sender) {
            return Err(MemberError::InvalidOperation(format!(
                "pipe is {:?}, packets from the {sender:?} side are not accepted",
                self.config.direction
            )));
        }
        let number = entry.find(PACKET_NUMBER)?.data.as_scalar::<u32>()?;
        let wants_ack = match entry.try_find(REQUEST_ACK) {
            Some(element) => element.data.as_scalar::<bool>()?,
            None => false,
        };
        let value = C::unpack(&entry.find(PACKET)?.data)?;

        let queued = {
            let mut state = self.state.lock();
            if !state.open {
                debug!(member = %self.member, number, "packet for closed pipe dropped");
                return Ok(());
            }
            let queued = if self.config.unreliable {
                self.accept_unreliable(&mut state, number, value)
            } else {
                self.accept_reliable(&mut state, number, value)
            };
            if let Some(max) = self.config.max_recv_queue {
                while state.queue.len() > max {
                    state.queue.pop_front();
                    debug!(member = %self.member, index = self.index, "receive queue full, oldest packet dropped");
                }
            }
            queued
        };

        if wants_ack {
            let ack = MessageEntry::new(EntryType::PipePacketRet, self.member.as_str())
                .with_element(MessageElement::scalar(INDEX, self.index))
                .with_element(MessageElement::scalar(PACKET_NUMBER, number));
            self.endpoint.send_message(ack)?;
        }

        if queued {
            self.changed.notify_all();
            self.packet_received.invoke(self);
        }
        Ok(())
    }

    fn accept_unreliable(&self, state: &mut PipeState<C::Value>, number: u32, value: C::Value) -> bool {
        if !is_at_or_after(number, state.next_expected) {
            debug!(member = %self.member, number, "late packet dropped");
            return false;
        }
        state.queue.push_back(value);
        state.next_expected = number.wrapping_add(1);
        true
    }

    fn accept_reliable(&self, state: &mut PipeState<C::Value>, number: u32, value: C::Value) -> bool {
        if number == state.next_expected {
            state.queue.push_back(value);
            state.next_expected = number.wrapping_add(1);
            while let Some(next) = {
                let expected = state.next_expected;
                state.held.remove(&expected)
            } {
                state.queue.push_back(next);
                state.next_expected = state.next_expected.wrapping_add(1);
            }
            return true;
        }
        if !is_at_or_after(number, state.next_expected) {
            debug!(member = %self.member, number, "duplicate packet dropped");
            return false;
        }
        let limit = self.config.max_recv_queue.unwrap_or(DEFAULT_MAX_HELD);
        if state.held.len() >= limit && !state.held.contains_key(&number) {
            debug!(member = %self.member, number, held = state.held.len(), "hold buffer full, packet dropped");
            return false;
        }
        state.held.insert(number, value);
        false
    }

    pub(crate) fn deliver_ack(&self, entry: &MessageEntry) {
        match entry
            .find(PACKET_NUMBER)
            .and_then(|e| e.data.as_scalar::<u32>())
        {
            Ok(number) => self.ack_received.invoke(&number),
            Err(err) => warn!(member = %self.member, error = %err, "malformed packet ack"),
        }
    }
}

impl<C: Codec> Drop for PipeEndpoint<C> {
    fn drop(&mut self) {
        if self.state.get_mut().open && self.endpoint.is_connected() {
            self.async_close(Box::new(|_| {}));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use raconteur_stub::ScalarCodec;
    use raconteur_transport::{LoopbackEndpoint, MessageHandler};

    use super::*;

    fn endpoint(config: PipeConfig) -> (PipeEndpoint<ScalarCodec<i32>>, LoopbackEndpoint) {
        let (local, peer) = LoopbackEndpoint::pair().unwrap();
        let pipe = PipeEndpoint::new(1, Arc::new(local), "p", Role::Client, config);
        (pipe, peer)
    }

    fn packet(number: u32, value: i32) -> MessageEntry {
        MessageEntry::new(EntryType::PipePacket, "p")
            .with_element(MessageElement::scalar(INDEX, 1i32))
            .with_element(MessageElement::scalar(PACKET_NUMBER, number))
            .with_element(MessageElement::scalar(PACKET, value))
    }

    fn drain(pipe: &PipeEndpoint<ScalarCodec<i32>>) -> Vec<i32> {
        std::iter::from_fn(|| pipe.try_receive_packet()).collect()
    }

    #[test]
    fn reliable_holds_until_gap_filled() {
        let (pipe, _peer) = endpoint(PipeConfig::default());
        pipe.deliver_packet(&packet(1, 10));
        pipe.deliver_packet(&packet(3, 30));
        pipe.deliver_packet(&packet(4, 40));
        assert_eq!(drain(&pipe), vec![10]);
        pipe.deliver_packet(&packet(2, 20));
        assert_eq!(drain(&pipe), vec![20, 30, 40]);
        pipe.deliver_packet(&packet(2, 20));
        assert!(drain(&pipe).is_empty());
    }

    #[test]
    fn unreliable_drops_late_packets() {
        let config = PipeConfig {
            unreliable: true,
            ..PipeConfig::default()
        };
        let (pipe, _peer) = endpoint(config);
        pipe.deliver_packet(&packet(1, 10));
        pipe.deliver_packet(&packet(3, 30));
        pipe.deliver_packet(&packet(2, 20));
        pipe.deliver_packet(&packet(4, 40));
        assert_eq!(drain(&pipe), vec![10, 30, 40]);
    }

    #[test]
    fn bounded_queue_drops_oldest() {
        let config = PipeConfig {
            max_recv_queue: Some(2),
            ..PipeConfig::default()
        };
        let (pipe, _peer) = endpoint(config);
        for n in 1..=5 {
            pipe.deliver_packet(&packet(n, n as i32));
        }
        assert_eq!(drain(&pipe), vec![4, 5]);
    }

    #[test]
    fn packet_numbers_wrap_around() {
        assert!(is_at_or_after(5, 5));
        assert!(is_at_or_after(0, u32::MAX));
        assert!(is_at_or_after(3, u32::MAX - 2));
        assert!(!is_at_or_after(u32::MAX, 0));
        assert!(!is_at_or_after(4, 5));

        let config = PipeConfig {
            unreliable: true,
            ..PipeConfig::default()
        };
        let (pipe, _peer) = endpoint(config);
        pipe.state.lock().next_expected = u32::MAX - 1;
        pipe.deliver_packet(&packet(u32::MAX - 1, 1));
        pipe.deliver_packet(&packet(0, 3));
        pipe.deliver_packet(&packet(u32::MAX, 2));
        pipe.deliver_packet(&packet(1, 4));
        assert_eq!(drain(&pipe), vec![1, 3, 4]);

        let (pipe, _peer) = endpoint(PipeConfig::default());
        pipe.state.lock().next_expected = u32::MAX;
        pipe.deliver_packet(&packet(0, 2));
        pipe.deliver_packet(&packet(u32::MAX, 1));
        pipe.deliver_packet(&packet(u32::MAX - 3, 9));
        assert_eq!(drain(&pipe), vec![1, 2]);
    }

    #[test]
    fn hold_buffer_is_bounded() {
        let config = PipeConfig {
            max_recv_queue: Some(3),
            ..PipeConfig::default()
        };
        let (pipe, _peer) = endpoint(config);
        for n in 2..=10 {
            pipe.deliver_packet(&packet(n, n as i32));
        }
        assert_eq!(pipe.state.lock().held.len(), 3);
        pipe.deliver_packet(&packet(1, 1));
        assert_eq!(drain(&pipe), vec![2, 3, 4]);
    }

    struct Recorder(Mutex<mpsc::Sender<MessageEntry>>);

    impl MessageHandler for Recorder {
        fn handle_message(&self, _endpoint: u32, entry: MessageEntry) {
            let _ = self.0.lock().send(entry);
        }

        fn handle_request(&self, _endpoint: u32, entry: MessageEntry) -> MessageEntry {
            entry
        }
    }

    #[test]
    fn closed_endpoint_sends_no_ack() {
        let (pipe, peer) = endpoint(PipeConfig::default());
        let (tx, rx) = mpsc::channel();
        let recorder: Arc<dyn MessageHandler> = Arc::new(Recorder(Mutex::new(tx)));
        peer.set_handler(Arc::downgrade(&recorder));

        let wants_ack = |number: u32| packet(number, 7).with_element(MessageElement::scalar(REQUEST_ACK, true));
        pipe.deliver_packet(&wants_ack(1));
        let ack = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(ack.entry_type, EntryType::PipePacketRet);
        assert_eq!(ack.find(PACKET_NUMBER).unwrap().data.as_scalar::<u32>().unwrap(), 1);

        pipe.shutdown_local();
        pipe.deliver_packet(&wants_ack(2));
        let late = rx.recv_timeout(Duration::from_millis(100));
        assert!(late.iter().all(|e| e.entry_type != EntryType::PipePacketRet));
    }

    #[test]
    fn malformed_packet_is_dropped() {
        let (pipe, _peer) = endpoint(PipeConfig::default());
        let bad = MessageEntry::new(EntryType::PipePacket, "p")
            .with_element(MessageElement::scalar(PACKET_NUMBER, 1u32));
        pipe.deliver_packet(&bad);
        pipe.deliver_packet(&packet(1, 5));
        assert_eq!(drain(&pipe), vec![5]);
    }

    #[test]
    fn close_wakes_blocked_receiver() {
        let (local, _peer) = LoopbackEndpoint::pair().unwrap();
        let pipe = Arc::new(PipeEndpoint::<ScalarCodec<i32>>::new(
            1,
            Arc::new(local),
            "p",
            Role::Service,
            PipeConfig::default(),
        ));
        let waiter = Arc::clone(&pipe);
        let handle = std::thread::spawn(move || waiter.receive_packet_wait(None));
        std::thread::sleep(Duration::from_millis(20));
        assert!(pipe.shutdown_local());
        assert!(!pipe.shutdown_local());
        assert!(matches!(
            handle.join().unwrap(),
            Err(MemberError::InvalidOperation(_))
        ));
    }
}
