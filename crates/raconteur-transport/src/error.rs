use std::time::Duration;

use raconteur_value::ValueError;

/// Errors that can occur while moving message entries between endpoints.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The link to the remote endpoint is gone.
    #[error("endpoint disconnected: {0}")]
    Disconnected(String),

    /// No response arrived before the deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The receiving side has no message handler installed.
    #[error("no handler installed on endpoint {0}")]
    NoHandler(u32),

    /// The entry could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] ValueError),

    /// An I/O error occurred while starting the link.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The pending request table is full.
    #[error("too many pending requests ({0})")]
    TooManyPending(usize),
}

pub type Result<T> = std::result::Result<T, TransportError>;
