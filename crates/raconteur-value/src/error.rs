/// Errors that can occur while building, converting or encoding value trees.
#[derive(Debug, thiserror::Error)]
pub enum ValueError {
    /// The stored type does not match what the caller expected.
    #[error("data type error: {0}")]
    DataType(String),

    /// A required nested element is missing.
    #[error("element not found: {0}")]
    NotFound(String),

    /// Dimension vectors disagree in length or exceed the array shape.
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// A linear offset or count falls outside the backing storage.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// The encoded type tag is not a known data type.
    #[error("invalid data type tag {0}")]
    InvalidTypeTag(u16),

    /// The message header contains an invalid magic number.
    #[error("invalid message magic (expected 0x5252 \"RR\")")]
    InvalidMagic,

    /// The message exceeds the configured maximum size.
    #[error("message too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An encoded element ends before its declared size.
    #[error("truncated element: {0}")]
    Truncated(String),

    /// An I/O error occurred while reading or writing messages.
    #[error("message I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream was closed before a complete message was received.
    #[error("connection closed (incomplete message)")]
    ConnectionClosed,
}

impl ValueError {
    /// Shorthand for the malformed array-of-record case.
    pub fn list_format() -> Self {
        ValueError::DataType("Error in list format".to_string())
    }
}

pub type Result<T> = std::result::Result<T, ValueError>;
