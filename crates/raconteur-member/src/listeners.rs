//! Callback registries for member events.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

/// Handle returned by [`Listeners::add`], used to remove the callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// A set of callbacks receiving `&E`.
///
/// Callbacks run on a snapshot taken outside the lock, so a callback may add
/// or remove listeners. A panicking callback is logged and skipped.
pub struct Listeners<E: ?Sized> {
    name: &'static str,
    next_id: AtomicU64,
    entries: Mutex<Vec<(ListenerId, Callback<E>)>>,
}

impl<E: ?Sized> Listeners<E> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn add(&self, callback: impl Fn(&E) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().push((id, Arc::new(callback)));
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn invoke(&self, event: &E) {
        let snapshot: Vec<Callback<E>> = self
            .entries
            .lock()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in snapshot {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                error!(listener = self.name, "listener panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn add_invoke_remove() {
        let listeners = Listeners::<u32>::new("test");
        let total = Arc::new(AtomicUsize::new(0));
        let t = Arc::clone(&total);
        let id = listeners.add(move |v| {
            t.fetch_add(*v as usize, Ordering::SeqCst);
        });
        listeners.invoke(&5);
        assert!(listeners.remove(id));
        assert!(!listeners.remove(id));
        listeners.invoke(&5);
        assert_eq!(total.load(Ordering::SeqCst), 5);
        assert!(listeners.is_empty());
    }

    #[test]
    fn panicking_listener_does_not_stop_others() {
        let listeners = Listeners::<str>::new("test");
        let hits = Arc::new(AtomicUsize::new(0));
        listeners.add(|_| panic!("bad listener"));
        let h = Arc::clone(&hits);
        listeners.add(move |s| {
            assert_eq!(s, "event");
            h.fetch_add(1, Ordering::SeqCst);
        });
        listeners.invoke("event");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_may_modify_registry() {
        let listeners = Arc::new(Listeners::<()>::new("test"));
        let inner = Arc::clone(&listeners);
        listeners.add(move |_| {
            inner.clear();
        });
        listeners.invoke(&());
        assert_eq!(listeners.len(), 0);
    }
}
