use thiserror::Error;
use uuid::Uuid;

/// A wire message could not be understood.
///
/// Fatal to the one request being parsed; the connection carrying it keeps
/// being served.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("unknown operation '{0}'")]
    UnknownOperation(String),

    #[error("'{op}' is missing required field '{field}'")]
    MissingField {
        op: &'static str,
        field: &'static str,
    },

    #[error("'{op}' has an invalid '{field}' field: {reason}")]
    InvalidField {
        op: &'static str,
        field: &'static str,
        reason: String,
    },

    #[error("unknown session {0}")]
    UnknownSession(Uuid),

    #[error("frame size mismatch: {0}")]
    FrameSize(String),

    #[error("frame of {size} bytes exceeds the limit of {limit} bytes")]
    FrameTooLarge { size: u64, limit: u64 },

    #[error("a size-framed message is only valid for 'Result' responses")]
    UnexpectedFrame,
}
