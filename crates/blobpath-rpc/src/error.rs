use blobpath_types::RequestId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from backing-store calls and the channel that carries them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RpcError {
    /// The blob (or transaction) is unknown to the backing store.
    #[error("not found: {0}")]
    NotFound(String),

    /// The backing store refused the arguments of the call.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The backing store refused the call for a reason other than its arguments.
    #[error("rejected by backing store: {0}")]
    Rejected(String),

    /// No response arrived before the request's deadline.
    #[error("{0} timed out")]
    Timeout(RequestId),

    /// The channel failed; the request's remote fate is unknown.
    #[error("transport failure: {0}")]
    Transport(String),

    /// A request id was registered twice while the first was still pending.
    #[error("{0} is already pending")]
    AlreadyRegistered(RequestId),

    /// A frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// The response body does not match the request that was sent.
    #[error("unexpected response: expected {expected}, got {actual}")]
    UnexpectedResponse {
        expected: &'static str,
        actual: &'static str,
    },
}

/// Result alias for RPC operations.
pub type RpcResult<T> = Result<T, RpcError>;

/// Error category carried on the wire in a failed response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteErrorKind {
    NotFound,
    InvalidArgument,
    Rejected,
}

/// A failure reported by the backing store inside a response frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl From<RpcError> for RemoteError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::NotFound(message) => Self {
                kind: RemoteErrorKind::NotFound,
                message,
            },
            RpcError::InvalidArgument(message) => Self {
                kind: RemoteErrorKind::InvalidArgument,
                message,
            },
            RpcError::Rejected(message) => Self {
                kind: RemoteErrorKind::Rejected,
                message,
            },
            other => Self {
                kind: RemoteErrorKind::Rejected,
                message: other.to_string(),
            },
        }
    }
}

impl From<RemoteError> for RpcError {
    fn from(err: RemoteError) -> Self {
        match err.kind {
            RemoteErrorKind::NotFound => Self::NotFound(err.message),
            RemoteErrorKind::InvalidArgument => Self::InvalidArgument(err.message),
            RemoteErrorKind::Rejected => Self::Rejected(err.message),
        }
    }
}
