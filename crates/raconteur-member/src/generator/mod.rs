//! Generators: stepwise producers and consumers of values.
//!
//! A generator starts active. `abort` and `close` move it to a terminal
//! state that never changes again. After `abort` every `next` fails with
//! [`MemberError::OperationAborted`]; after `close` or exhaustion every
//! `next` fails with [`MemberError::StopIteration`].
//!
//! Return-only generators are `Generator<(), R>`; parameter-only generators
//! are `Generator<P, ()>`.

mod client;
mod local;
mod server;

pub use client::GeneratorClient;
pub use local::{FnGenerator, IteratorGenerator};
pub use server::GeneratorServer;

pub(crate) use local::Lifecycle;

use crate::error::{MemberError, Result};
use crate::service::Completion;

pub(crate) const INDEX: &str = "index";
pub(crate) const PARAMETER: &str = "parameter";
pub(crate) const RETURN: &str = "return";

/// Observable generator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    Active,
    Aborted,
    Closed,
}

impl GeneratorState {
    pub fn is_terminal(self) -> bool {
        self != GeneratorState::Active
    }
}

pub trait Generator<P, R>: Send + Sync {
    /// Produce the next value, consuming `param`.
    fn next(&self, param: P) -> Result<R>;

    /// Stop the generator. Idempotent. In-flight steps fail with
    /// `OperationAborted`.
    fn abort(&self) -> Result<()>;

    /// Finish the generator normally.
    fn close(&self) -> Result<()>;

    fn async_next(&self, param: P, handler: Completion<R>) {
        handler(self.next(param));
    }

    fn async_abort(&self, handler: Completion<()>) {
        handler(self.abort());
    }

    fn async_close(&self, handler: Completion<()>) {
        handler(self.close());
    }
}

pub trait GeneratorExt<R>: Generator<(), R> {
    /// Collect values until the generator stops.
    ///
    /// Returns the values produced so far when it closes; any other failure,
    /// including an abort, is returned as is.
    fn next_all(&self) -> Result<Vec<R>> {
        let mut values = Vec::new();
        loop {
            match self.next(()) {
                Ok(value) => values.push(value),
                Err(MemberError::StopIteration) => return Ok(values),
                Err(err) => return Err(err),
            }
        }
    }
}

impl<R, G: Generator<(), R> + ?Sized> GeneratorExt<R> for G {}
