use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;

use super::{Generator, GeneratorState};
use crate::error::{MemberError, Result};

const ACTIVE: u8 = 0;
const ABORTED: u8 = 1;
const CLOSED: u8 = 2;

/// Sticky generator state shared by local and remote generators.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: AtomicU8,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(ACTIVE),
        }
    }

    pub(crate) fn state(&self) -> GeneratorState {
        match self.state.load(Ordering::Acquire) {
            ACTIVE => GeneratorState::Active,
            ABORTED => GeneratorState::Aborted,
            _ => GeneratorState::Closed,
        }
    }

    /// Error for any state but active.
    pub(crate) fn check(&self) -> Result<()> {
        match self.state() {
            GeneratorState::Active => Ok(()),
            GeneratorState::Aborted => Err(MemberError::OperationAborted("generator aborted".into())),
            GeneratorState::Closed => Err(MemberError::StopIteration),
        }
    }

    /// Move to aborted. Returns true on the transition.
    pub(crate) fn abort(&self) -> bool {
        self.transition(ABORTED)
    }

    /// Move to closed. Returns true on the transition.
    pub(crate) fn close(&self) -> bool {
        self.transition(CLOSED)
    }

    /// Adopt the terminal state a failed step reports.
    pub(crate) fn observe(&self, err: &MemberError) {
        match err {
            MemberError::StopIteration => {
                self.close();
            }
            MemberError::OperationAborted(_) => {
                self.abort();
            }
            _ => {}
        }
    }

    fn transition(&self, to: u8) -> bool {
        self.state
            .compare_exchange(ACTIVE, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Generator over a finite iterator. Exhaustion closes it.
pub struct IteratorGenerator<I: Iterator> {
    lifecycle: Lifecycle,
    iter: Mutex<I>,
}

impl<I: Iterator> IteratorGenerator<I> {
    pub fn new(iter: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            lifecycle: Lifecycle::new(),
            iter: Mutex::new(iter.into_iter()),
        }
    }

    pub fn state(&self) -> GeneratorState {
        self.lifecycle.state()
    }
}

impl<I> Generator<(), I::Item> for IteratorGenerator<I>
where
    I: Iterator + Send,
    I::Item: Send,
{
    fn next(&self, _param: ()) -> Result<I::Item> {
        self.lifecycle.check()?;
        let item = self.iter.lock().next();
        // An abort that landed while the step ran wins.
        self.lifecycle.check()?;
        match item {
            Some(item) => Ok(item),
            None => {
                self.lifecycle.close();
                Err(MemberError::StopIteration)
            }
        }
    }

    fn abort(&self) -> Result<()> {
        self.lifecycle.abort();
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.lifecycle.close();
        Ok(())
    }
}

/// Generator driven by a closure. Returning `None` closes it.
pub struct FnGenerator<F> {
    lifecycle: Lifecycle,
    step: Mutex<F>,
}

impl<F> FnGenerator<F> {
    pub fn new(step: F) -> Self {
        Self {
            lifecycle: Lifecycle::new(),
            step: Mutex::new(step),
        }
    }

    pub fn state(&self) -> GeneratorState {
        self.lifecycle.state()
    }
}

impl<P, R, F> Generator<P, R> for FnGenerator<F>
where
    F: FnMut(P) -> Option<R> + Send,
{
    fn next(&self, param: P) -> Result<R> {
        self.lifecycle.check()?;
        let value = (self.step.lock())(param);
        self.lifecycle.check()?;
        match value {
            Some(value) => Ok(value),
            None => {
                self.lifecycle.close();
                Err(MemberError::StopIteration)
            }
        }
    }

    fn abort(&self) -> Result<()> {
        self.lifecycle.abort();
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.lifecycle.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::generator::GeneratorExt;

    #[test]
    fn next_all_collects_sixteen_values() {
        let generator = IteratorGenerator::new(0..16u32);
        let values = generator.next_all().unwrap();
        assert_eq!(values, (0..16).collect::<Vec<u32>>());
        assert_eq!(generator.state(), GeneratorState::Closed);
        assert!(matches!(generator.next(()), Err(MemberError::StopIteration)));
    }

    #[test]
    fn abort_is_sticky_and_idempotent() {
        let generator = IteratorGenerator::new(vec!["a", "b"]);
        assert_eq!(generator.next(()).unwrap(), "a");
        generator.abort().unwrap();
        generator.abort().unwrap();
        assert_eq!(generator.state(), GeneratorState::Aborted);
        assert!(matches!(generator.next(()), Err(MemberError::OperationAborted(_))));
        generator.close().unwrap();
        assert_eq!(generator.state(), GeneratorState::Aborted);
        assert!(generator.next_all().is_err());
    }

    #[test]
    fn close_then_next_stops() {
        let generator = FnGenerator::new(|x: i32| Some(x * 2));
        assert_eq!(generator.next(4).unwrap(), 8);
        generator.close().unwrap();
        assert!(matches!(generator.next(1), Err(MemberError::StopIteration)));
        generator.abort().unwrap();
        assert_eq!(generator.state(), GeneratorState::Closed);
    }

    #[test]
    fn abort_fails_in_flight_next() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let generator = Arc::new(FnGenerator::new(move |_: ()| {
            entered_tx.send(()).ok();
            release_rx.recv().ok();
            Some(1)
        }));

        let worker = Arc::clone(&generator);
        let handle = thread::spawn(move || worker.next(()));
        entered_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        generator.abort().unwrap();
        release_tx.send(()).unwrap();
        assert!(matches!(
            handle.join().unwrap(),
            Err(MemberError::OperationAborted(_))
        ));
    }

    #[test]
    fn param_only_generator() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let generator = FnGenerator::new(move |v: u8| {
            sink.lock().push(v);
            (v != 0).then_some(())
        });
        generator.next(3).unwrap();
        generator.next(5).unwrap();
        assert!(matches!(generator.next(0), Err(MemberError::StopIteration)));
        assert_eq!(*seen.lock(), vec![3, 5, 0]);
    }

    #[test]
    fn async_defaults_complete_once() {
        let generator = IteratorGenerator::new(1..=1);
        let (tx, rx) = mpsc::channel();
        let tx2 = tx.clone();
        generator.async_next((), Box::new(move |r| tx.send(r.map_err(|e| e.to_string())).unwrap()));
        generator.async_next((), Box::new(move |r| tx2.send(r.map_err(|e| e.to_string())).unwrap()));
        assert_eq!(rx.recv().unwrap(), Ok(1));
        assert_eq!(rx.recv().unwrap(), Err("stop iteration".to_string()));
    }
}
