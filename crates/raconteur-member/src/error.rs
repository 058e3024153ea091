use std::time::Duration;

use raconteur_transport::TransportError;
use raconteur_value::{ErrorInfo, MessageElement, ValueError};

/// Stable error codes carried in [`ErrorInfo::code`].
pub mod codes {
    pub const DATA_TYPE: i32 = 1;
    pub const NOT_FOUND: i32 = 2;
    pub const DIMENSION_MISMATCH: i32 = 3;
    pub const OUT_OF_RANGE: i32 = 4;
    pub const PROTOCOL: i32 = 5;
    pub const TRANSPORT: i32 = 10;
    pub const TIMEOUT: i32 = 11;
    pub const OPERATION_ABORTED: i32 = 20;
    pub const STOP_ITERATION: i32 = 21;
    pub const INVALID_OPERATION: i32 = 22;
    pub const VALUE_NOT_SET: i32 = 23;
    pub const OBJECT_LOCKED: i32 = 24;
    pub const MEMBER_NOT_FOUND: i32 = 25;
    pub const UNKNOWN_HANDLE: i32 = 26;
}

const TIMEOUT_PARAM: &str = "timeout_ms";

/// Errors that can occur in member operations.
#[derive(Debug, thiserror::Error)]
pub enum MemberError {
    /// A value could not be converted, located or bounds-checked.
    #[error("{0}")]
    Value(#[from] ValueError),

    /// The endpoint failed to deliver an entry.
    #[error("transport error: {0}")]
    Transport(#[source] TransportError),

    /// The generator was aborted.
    #[error("operation aborted: {0}")]
    OperationAborted(String),

    /// The generator is exhausted or closed.
    #[error("stop iteration")]
    StopIteration,

    /// The member is in a state that does not allow the call.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A wire slot has no valid value.
    #[error("value not set: {0}")]
    ValueNotSet(String),

    /// No response or value arrived in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The member is locked by another client.
    #[error("object locked: {0}")]
    ObjectLocked(String),

    /// The service has no member with this name.
    #[error("member not found: {0}")]
    MemberNotFound(String),

    /// The handle names nothing the member is serving: it was retired or
    /// never issued.
    #[error("unknown handle: {0}")]
    UnknownHandle(String),

    /// A remote failure with no local counterpart.
    #[error("remote error {code} {name}: {message}")]
    Remote {
        code: i32,
        name: String,
        message: String,
    },
}

impl From<TransportError> for MemberError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout(after) => MemberError::Timeout(after),
            TransportError::Codec(err) => MemberError::Value(err),
            other => MemberError::Transport(other),
        }
    }
}

impl MemberError {
    /// Convert to the record carried in an error response.
    pub fn to_error_info(&self) -> ErrorInfo {
        let (code, name) = match self {
            MemberError::Value(ValueError::DataType(_)) => (codes::DATA_TYPE, "DataTypeError"),
            MemberError::Value(ValueError::NotFound(_)) => (codes::NOT_FOUND, "NotFoundError"),
            MemberError::Value(ValueError::DimensionMismatch(_)) => {
                (codes::DIMENSION_MISMATCH, "DimensionMismatchError")
            }
            MemberError::Value(ValueError::OutOfRange(_)) => {
                (codes::OUT_OF_RANGE, "OutOfRangeError")
            }
            MemberError::Value(_) => (codes::PROTOCOL, "ProtocolError"),
            MemberError::Transport(_) => (codes::TRANSPORT, "ConnectionError"),
            MemberError::Timeout(_) => (codes::TIMEOUT, "RequestTimeoutError"),
            MemberError::OperationAborted(_) => {
                (codes::OPERATION_ABORTED, "OperationAbortedError")
            }
            MemberError::StopIteration => (codes::STOP_ITERATION, "StopIterationError"),
            MemberError::InvalidOperation(_) => {
                (codes::INVALID_OPERATION, "InvalidOperationError")
            }
            MemberError::ValueNotSet(_) => (codes::VALUE_NOT_SET, "ValueNotSetError"),
            MemberError::ObjectLocked(_) => (codes::OBJECT_LOCKED, "ObjectLockedError"),
            MemberError::MemberNotFound(_) => (codes::MEMBER_NOT_FOUND, "MemberNotFoundError"),
            MemberError::UnknownHandle(_) => (codes::UNKNOWN_HANDLE, "UnknownHandleError"),
            MemberError::Remote {
                code,
                name,
                message,
            } => return ErrorInfo::new(*code, name.clone(), message.clone()),
        };

        let mut info = ErrorInfo::new(code, format!("raconteur.{name}"), self.message());
        if let MemberError::Timeout(after) = self {
            let millis = u64::try_from(after.as_millis()).unwrap_or(u64::MAX);
            info.param = Some(MessageElement::scalar(TIMEOUT_PARAM, millis));
        }
        info
    }

    /// Rebuild the local variant from a received error record.
    pub fn from_error_info(info: ErrorInfo) -> Self {
        let message = info.message;
        match info.code {
            codes::DATA_TYPE => ValueError::DataType(message).into(),
            codes::NOT_FOUND => ValueError::NotFound(message).into(),
            codes::DIMENSION_MISMATCH => ValueError::DimensionMismatch(message).into(),
            codes::OUT_OF_RANGE => ValueError::OutOfRange(message).into(),
            codes::TIMEOUT => {
                let millis = info
                    .param
                    .as_ref()
                    .filter(|p| p.name.is(TIMEOUT_PARAM))
                    .and_then(|p| p.data.as_scalar::<u64>().ok())
                    .unwrap_or(0);
                MemberError::Timeout(Duration::from_millis(millis))
            }
            codes::OPERATION_ABORTED => MemberError::OperationAborted(message),
            codes::STOP_ITERATION => MemberError::StopIteration,
            codes::INVALID_OPERATION => MemberError::InvalidOperation(message),
            codes::VALUE_NOT_SET => MemberError::ValueNotSet(message),
            codes::OBJECT_LOCKED => MemberError::ObjectLocked(message),
            codes::MEMBER_NOT_FOUND => MemberError::MemberNotFound(message),
            codes::UNKNOWN_HANDLE => MemberError::UnknownHandle(message),
            code => MemberError::Remote {
                code,
                name: info.name,
                message,
            },
        }
    }

    /// Returns true for the two terminal generator conditions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MemberError::OperationAborted(_) | MemberError::StopIteration
        )
    }

    fn message(&self) -> String {
        match self {
            MemberError::Value(
                ValueError::DataType(m)
                | ValueError::NotFound(m)
                | ValueError::DimensionMismatch(m)
                | ValueError::OutOfRange(m),
            ) => m.clone(),
            MemberError::OperationAborted(m)
            | MemberError::InvalidOperation(m)
            | MemberError::ValueNotSet(m)
            | MemberError::ObjectLocked(m)
            | MemberError::MemberNotFound(m)
            | MemberError::UnknownHandle(m) => m.clone(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MemberError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn rehydrate(err: MemberError) -> MemberError {
        MemberError::from_error_info(err.to_error_info())
    }

    #[test]
    fn local_variants_survive_the_round_trip() {
        assert!(matches!(
            rehydrate(ValueError::DataType("bad".into()).into()),
            MemberError::Value(ValueError::DataType(m)) if m == "bad"
        ));
        assert!(matches!(
            rehydrate(ValueError::DimensionMismatch("dims".into()).into()),
            MemberError::Value(ValueError::DimensionMismatch(_))
        ));
        assert!(matches!(
            rehydrate(MemberError::StopIteration),
            MemberError::StopIteration
        ));
        assert!(matches!(
            rehydrate(MemberError::OperationAborted("gen".into())),
            MemberError::OperationAborted(m) if m == "gen"
        ));
        assert!(matches!(
            rehydrate(MemberError::ValueNotSet("in".into())),
            MemberError::ValueNotSet(_)
        ));
        assert!(matches!(
            rehydrate(MemberError::UnknownHandle("gen 3".into())),
            MemberError::UnknownHandle(m) if m == "gen 3"
        ));
    }

    #[test]
    fn timeout_carries_duration_param() {
        let info = MemberError::Timeout(Duration::from_millis(250)).to_error_info();
        assert_eq!(info.code, codes::TIMEOUT);
        assert_eq!(info.name, "raconteur.RequestTimeoutError");
        assert!(matches!(
            MemberError::from_error_info(info),
            MemberError::Timeout(d) if d == Duration::from_millis(250)
        ));
    }

    #[test]
    fn unmapped_codes_become_remote() {
        let info = ErrorInfo::new(900, "app.CustomError", "custom");
        let err = MemberError::from_error_info(info.clone());
        assert!(matches!(&err, MemberError::Remote { code: 900, .. }));
        assert_eq!(err.to_error_info(), info);

        let transport = MemberError::from(TransportError::Disconnected("gone".into()));
        assert!(matches!(
            rehydrate(transport),
            MemberError::Remote { code: codes::TRANSPORT, .. }
        ));
    }

    #[test]
    fn transport_timeout_maps_to_member_timeout() {
        let err = MemberError::from(TransportError::Timeout(Duration::from_secs(1)));
        assert!(matches!(err, MemberError::Timeout(_)));
        assert!(!err.is_terminal());
        assert!(MemberError::StopIteration.is_terminal());
    }
}
