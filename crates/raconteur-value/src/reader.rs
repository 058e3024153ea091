use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use tracing::debug;

use crate::codec::{decode_message, CodecConfig};
use crate::entry::MessageEntry;
use crate::error::{Result, ValueError};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete messages from any `Read` stream.
///
/// Partial reads are buffered internally; callers always get whole entries.
pub struct MessageReader<T> {
    inner: T,
    buf: BytesMut,
    config: CodecConfig,
}

impl<T: Read> MessageReader<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, CodecConfig::default())
    }

    pub fn with_config(inner: T, config: CodecConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete message (blocking).
    ///
    /// Returns `Err(ValueError::ConnectionClosed)` when EOF is reached.
    pub fn read_message(&mut self) -> Result<MessageEntry> {
        loop {
            if let Some(entry) = decode_message(&mut self.buf, self.config.max_message_size)? {
                return Ok(entry);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(ValueError::Io(err)),
            };

            if read == 0 {
                if !self.buf.is_empty() {
                    debug!(buffered = self.buf.len(), "stream closed inside a message");
                }
                return Err(ValueError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Read messages until the stream ends cleanly.
    ///
    /// EOF between messages ends the sequence; EOF inside a message is an error.
    pub fn read_all(&mut self) -> Result<Vec<MessageEntry>> {
        let mut entries = Vec::new();
        loop {
            match self.read_message() {
                Ok(entry) => entries.push(entry),
                Err(ValueError::ConnectionClosed) if self.buf.is_empty() => return Ok(entries),
                Err(err) => return Err(err),
            }
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }
}
