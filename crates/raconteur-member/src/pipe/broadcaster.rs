use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use raconteur_stub::Codec;
use tracing::debug;

use super::endpoint::PipeEndpoint;
use super::server::PipeServer;
use crate::config::BroadcasterConfig;
use crate::listeners::ListenerId;

type Predicate = Arc<dyn Fn(u32, i32) -> bool + Send + Sync>;

struct Target<C: Codec> {
    pipe: Arc<PipeEndpoint<C>>,
    /// Packet numbers sent and not yet acknowledged.
    unacked: Arc<Mutex<HashSet<u32>>>,
}

impl<C: Codec> Clone for Target<C> {
    fn clone(&self) -> Self {
        Self {
            pipe: Arc::clone(&self.pipe),
            unacked: Arc::clone(&self.unacked),
        }
    }
}

struct Targets<C: Codec> {
    backlog: Option<usize>,
    map: Mutex<HashMap<(u32, i32), Target<C>>>,
}

impl<C: Codec> Targets<C> {
    fn add(self: &Arc<Self>, pipe: &Arc<PipeEndpoint<C>>) {
        let key = (pipe.endpoint_id(), pipe.index());
        let unacked = Arc::new(Mutex::new(HashSet::new()));
        if self.backlog.is_some() {
            pipe.set_request_packet_ack(true);
            let acked = Arc::downgrade(&unacked);
            pipe.on_packet_ack_received(move |number| {
                if let Some(unacked) = acked.upgrade() {
                    unacked.lock().remove(number);
                }
            });
        }
        let owner: Weak<Self> = Arc::downgrade(self);
        pipe.on_closed(move |closed| {
            if let Some(targets) = owner.upgrade() {
                targets.map.lock().remove(&(closed.endpoint_id(), closed.index()));
            }
        });
        if pipe.is_open() {
            self.map.lock().insert(
                key,
                Target {
                    pipe: Arc::clone(pipe),
                    unacked,
                },
            );
        }
    }
}

/// Sends every packet to all endpoints connected to a pipe server.
///
/// With a maximum backlog, each endpoint requests acknowledgements and a
/// packet is skipped for an endpoint whose unacknowledged count has reached
/// the limit. Packets that are sent keep their order.
pub struct PipeBroadcaster<C: Codec> {
    server: Arc<PipeServer<C>>,
    targets: Arc<Targets<C>>,
    predicate: RwLock<Option<Predicate>>,
    listener: ListenerId,
}

impl<C: Codec> PipeBroadcaster<C> {
    /// Attach to `server`, including endpoints already connected.
    pub fn new(server: Arc<PipeServer<C>>, config: BroadcasterConfig) -> Self {
        let targets = Arc::new(Targets {
            backlog: config.maximum_backlog,
            map: Mutex::new(HashMap::new()),
        });
        let weak = Arc::downgrade(&targets);
        let listener = server.on_pipe_connect(move |pipe| {
            if let Some(targets) = weak.upgrade() {
                targets.add(pipe);
            }
        });
        for pipe in server.endpoints() {
            targets.add(&pipe);
        }
        Self {
            server,
            targets,
            predicate: RwLock::new(None),
            listener,
        }
    }

    pub fn server(&self) -> &Arc<PipeServer<C>> {
        &self.server
    }

    /// Only endpoints for which `predicate(endpoint_id, index)` holds receive
    /// packets.
    pub fn set_predicate(&self, predicate: impl Fn(u32, i32) -> bool + Send + Sync + 'static) {
        *self.predicate.write() = Some(Arc::new(predicate));
    }

    pub fn clear_predicate(&self) {
        *self.predicate.write() = None;
    }

    pub fn maximum_backlog(&self) -> Option<usize> {
        self.targets.backlog
    }

    pub fn endpoint_count(&self) -> usize {
        self.targets.map.lock().len()
    }

    /// Unacknowledged packets for one endpoint, if it is a target.
    pub fn backlog(&self, endpoint: u32, index: i32) -> Option<usize> {
        let unacked = Arc::clone(&self.targets.map.lock().get(&(endpoint, index))?.unacked);
        let count = unacked.lock().len();
        Some(count)
    }

    /// Send `value` to every eligible endpoint. Returns how many received it.
    pub fn send_packet(&self, value: &C::Value) -> usize {
        let predicate = self.predicate.read().clone();
        let mut targets: Vec<Target<C>> = self.targets.map.lock().values().cloned().collect();
        targets.sort_by_key(|t| (t.pipe.endpoint_id(), t.pipe.index()));

        let mut sent = 0;
        for target in targets {
            let (endpoint, index) = (target.pipe.endpoint_id(), target.pipe.index());
            if predicate.as_ref().is_some_and(|p| !p(endpoint, index)) {
                continue;
            }
            // Held across the send so an ack cannot arrive before the number
            // is recorded.
            let mut unacked = target.unacked.lock();
            if self.targets.backlog.is_some_and(|max| unacked.len() >= max) {
                debug!(member = %self.server.name(), endpoint, index, "backlog full, packet skipped");
                continue;
            }
            match target.pipe.send_packet(value) {
                Ok(number) => {
                    if self.targets.backlog.is_some() {
                        unacked.insert(number);
                    }
                    sent += 1;
                }
                Err(err) => debug!(member = %self.server.name(), endpoint, index, error = %err, "broadcast send failed"),
            }
        }
        sent
    }
}

impl<C: Codec> Drop for PipeBroadcaster<C> {
    fn drop(&mut self) {
        self.server.remove_listener(self.listener);
    }
}

#[cfg(test)]
mod tests {
    use raconteur_stub::ScalarCodec;

    use super::*;
    use crate::config::PipeConfig;
    use crate::pipe::{PipeClient, ANY_INDEX};
    use crate::service::ServiceHost;
    use crate::testing::{connect, wait_for};

    type Codec32 = ScalarCodec<i32>;

    fn received(pipe: &PipeEndpoint<Codec32>) -> Vec<i32> {
        std::iter::from_fn(|| pipe.try_receive_packet()).collect()
    }

    #[test]
    fn backlog_limits_slow_endpoint_and_keeps_order() {
        let host = ServiceHost::new("test");
        let server = PipeServer::<Codec32>::register(&host, "feed", PipeConfig::default()).unwrap();
        let broadcaster = PipeBroadcaster::new(
            Arc::clone(&server),
            BroadcasterConfig {
                maximum_backlog: Some(2),
            },
        );

        let (fast_client, _fast_link) = connect(&host);
        let fast_pipes = PipeClient::<Codec32>::new(&fast_client, "feed", PipeConfig::default()).unwrap();
        let fast = fast_pipes.connect(ANY_INDEX).unwrap();
        let (slow_client, slow_link) = connect(&host);
        let slow_pipes = PipeClient::<Codec32>::new(&slow_client, "feed", PipeConfig::default()).unwrap();
        let slow = slow_pipes.connect(ANY_INDEX).unwrap();
        wait_for(|| broadcaster.endpoint_count() == 2);
        let targets: Vec<(u32, i32)> = server
            .endpoints()
            .iter()
            .map(|p| (p.endpoint_id(), p.index()))
            .collect();
        let (fast_key, slow_key) = (targets[0], targets[1]);

        slow_link.set_delivery_paused(true);
        for v in 0..5 {
            broadcaster.send_packet(&v);
            wait_for(|| broadcaster.backlog(fast_key.0, fast_key.1) == Some(0));
        }
        assert_eq!(broadcaster.backlog(slow_key.0, slow_key.1), Some(2));
        slow_link.set_delivery_paused(false);
        wait_for(|| broadcaster.backlog(slow_key.0, slow_key.1) == Some(0));

        assert_eq!(broadcaster.send_packet(&5), 2);
        wait_for(|| slow.available() == 3);
        wait_for(|| fast.available() == 6);
        assert_eq!(received(&fast), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(received(&slow), vec![0, 1, 5]);
    }

    #[test]
    fn predicate_selects_endpoints() {
        let host = ServiceHost::new("test");
        let server = PipeServer::<Codec32>::register(&host, "feed", PipeConfig::default()).unwrap();
        let broadcaster = PipeBroadcaster::new(Arc::clone(&server), BroadcasterConfig::default());
        let (client, _link) = connect(&host);
        let pipes = PipeClient::<Codec32>::new(&client, "feed", PipeConfig::default()).unwrap();
        let one = pipes.connect(1).unwrap();
        let two = pipes.connect(2).unwrap();
        wait_for(|| broadcaster.endpoint_count() == 2);

        broadcaster.set_predicate(|_, index| index == 2);
        assert_eq!(broadcaster.send_packet(&7), 1);
        broadcaster.clear_predicate();
        assert_eq!(broadcaster.send_packet(&8), 2);
        wait_for(|| two.available() == 2);
        wait_for(|| one.available() == 1);
        assert_eq!(received(&one), vec![8]);
        assert_eq!(received(&two), vec![7, 8]);

        one.close().unwrap();
        wait_for(|| broadcaster.endpoint_count() == 1);
    }
}
