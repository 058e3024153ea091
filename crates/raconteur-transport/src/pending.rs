//! Outstanding requests awaiting a response.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use raconteur_value::MessageEntry;
use tracing::{debug, error};

use crate::error::{Result, TransportError};
use crate::slots::{SlotId, SlotMap};
use crate::traits::ResponseHandler;

/// Default cap on concurrently outstanding requests per endpoint.
pub const DEFAULT_MAX_PENDING: usize = 4096;

type DeadlineKey = (Instant, u64);

struct Pending {
    handler: ResponseHandler,
    deadline: Option<DeadlineKey>,
}

#[derive(Default)]
struct DeadlineQueue {
    deadlines: BTreeMap<DeadlineKey, (SlotId, Duration)>,
    next_seq: u64,
    running: bool,
    shutdown: bool,
}

/// Deadlines shared with the single timer thread of a table.
#[derive(Default)]
struct Timers {
    queue: Mutex<DeadlineQueue>,
    wake: Condvar,
}

impl Timers {
    fn forget(&self, key: Option<DeadlineKey>) {
        if let Some(key) = key {
            self.queue.lock().deadlines.remove(&key);
        }
    }
}

/// Table of response handlers keyed by request id.
///
/// Each handler is removed from the table before it runs, so completion,
/// timeout and disconnect race safely and the handler runs at most once.
/// Timeouts are served by one thread per table, started on first use.
pub struct PendingRequests {
    slots: Mutex<SlotMap<Pending>>,
    timers: Arc<Timers>,
    max_pending: usize,
}

impl PendingRequests {
    pub fn new(max_pending: usize) -> Self {
        Self {
            slots: Mutex::new(SlotMap::new()),
            timers: Arc::new(Timers::default()),
            max_pending,
        }
    }

    /// Store `handler` and return the request id to put on the wire.
    ///
    /// When the table is full the handler runs immediately with
    /// [`TransportError::TooManyPending`] and `None` is returned.
    pub fn register(&self, handler: ResponseHandler) -> Option<SlotId> {
        let mut slots = self.slots.lock();
        if slots.len() >= self.max_pending {
            drop(slots);
            invoke(handler, Err(TransportError::TooManyPending(self.max_pending)));
            return None;
        }
        Some(slots.insert(Pending {
            handler,
            deadline: None,
        }))
    }

    fn take(&self, id: SlotId) -> Option<ResponseHandler> {
        let pending = self.slots.lock().remove(id)?;
        self.timers.forget(pending.deadline);
        Some(pending.handler)
    }

    /// Complete a request. Returns false when it was already completed.
    pub fn complete(&self, id: SlotId, result: Result<MessageEntry>) -> bool {
        match self.take(id) {
            Some(handler) => {
                invoke(handler, result);
                true
            }
            None => false,
        }
    }

    /// Complete by wire request id. Unknown or stale ids are ignored.
    pub fn complete_wire(&self, request_id: u64, result: Result<MessageEntry>) -> bool {
        let Some(id) = SlotId::from_u64(request_id) else {
            debug!(request_id, "response without request id dropped");
            return false;
        };
        let completed = self.complete(id, result);
        if !completed {
            debug!(request = %id, "late response dropped");
        }
        completed
    }

    /// Drop a request without running its handler.
    pub fn cancel(&self, id: SlotId) -> bool {
        self.take(id).is_some()
    }

    /// Fail the request with a timeout once `timeout` elapses.
    ///
    /// The deadline is dropped as soon as the request completes or is
    /// cancelled. Arming an already completed request does nothing.
    pub fn arm_timeout(self: &Arc<Self>, id: SlotId, timeout: Duration) -> Result<()> {
        let mut slots = self.slots.lock();
        let Some(pending) = slots.get_mut(id) else {
            return Ok(());
        };
        let mut queue = self.timers.queue.lock();
        if !queue.running {
            let timers = Arc::clone(&self.timers);
            let owner = Arc::downgrade(self);
            thread::Builder::new()
                .name("request-timeouts".into())
                .spawn(move || run_timers(&timers, &owner))?;
            queue.running = true;
        }
        let key = (Instant::now() + timeout, queue.next_seq);
        queue.next_seq += 1;
        if let Some(old) = pending.deadline.replace(key) {
            queue.deadlines.remove(&old);
        }
        let earliest = queue.deadlines.keys().next().map_or(true, |first| key < *first);
        queue.deadlines.insert(key, (id, timeout));
        drop(queue);
        drop(slots);
        if earliest {
            self.timers.wake.notify_one();
        }
        Ok(())
    }

    /// Fail every outstanding request with [`TransportError::Disconnected`].
    pub fn fail_all(&self, reason: &str) {
        let drained = self.slots.lock().drain();
        for (_, pending) in drained {
            self.timers.forget(pending.deadline);
            invoke(
                pending.handler,
                Err(TransportError::Disconnected(reason.to_string())),
            );
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of deadlines still waiting to fire.
    pub fn armed(&self) -> usize {
        self.timers.queue.lock().deadlines.len()
    }
}

impl Drop for PendingRequests {
    fn drop(&mut self) {
        self.timers.queue.lock().shutdown = true;
        self.timers.wake.notify_all();
    }
}

fn run_timers(timers: &Timers, owner: &Weak<PendingRequests>) {
    let mut queue = timers.queue.lock();
    loop {
        if queue.shutdown {
            return;
        }
        let Some((&key, &(id, timeout))) = queue.deadlines.iter().next() else {
            timers.wake.wait(&mut queue);
            continue;
        };
        if key.0 > Instant::now() {
            timers.wake.wait_until(&mut queue, key.0);
            continue;
        }
        queue.deadlines.remove(&key);
        let Some(pending) = owner.upgrade() else {
            return;
        };
        MutexGuard::unlocked(&mut queue, || {
            if pending.complete(id, Err(TransportError::Timeout(timeout))) {
                debug!(request = %id, ?timeout, "request timed out");
            }
            drop(pending);
        });
    }
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING)
    }
}

fn invoke(handler: ResponseHandler, result: Result<MessageEntry>) {
    if catch_unwind(AssertUnwindSafe(move || handler(result))).is_err() {
        error!("response handler panicked");
    }
}
