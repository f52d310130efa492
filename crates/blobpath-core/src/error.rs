use std::fmt;

use blobpath_rpc::RpcError;
use blobpath_types::{BlobId, TxId, TypeError};

/// The five error categories adapters translate into protocol faults.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    Timeout,
    TransportFailure,
    TransactionAborted,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidArgument => "invalid-argument",
            Self::NotFound => "not-found",
            Self::Timeout => "timeout",
            Self::TransportFailure => "transport-failure",
            Self::TransactionAborted => "transaction-aborted",
        };
        f.write_str(s)
    }
}

/// Errors from data-path operations.
#[derive(Debug, thiserror::Error)]
pub enum DataPathError {
    /// The caller's arguments cannot be mapped onto the volume.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The blob has never been written.
    #[error("blob not found: {0}")]
    BlobNotFound(BlobId),

    /// A backing-store call failed.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// A type could not be constructed from the given values.
    #[error(transparent)]
    Type(#[from] TypeError),

    /// The transaction was aborted after a failure; `source` is the
    /// original failure.
    #[error("transaction {tx} aborted: {source}")]
    TransactionAborted {
        tx: TxId,
        #[source]
        source: Box<DataPathError>,
    },

    /// The transaction failed and so did every attempt to abort it. Its
    /// fate inside the backing store is unknown.
    #[error("transaction {tx} failed ({cause}) and abort failed ({abort})")]
    AbortFailed {
        tx: TxId,
        cause: Box<DataPathError>,
        abort: RpcError,
    },

    /// The commit call failed. No abort follows, so the transaction may or
    /// may not have been applied.
    #[error("transaction {tx} commit failed, outcome unknown: {source}")]
    CommitFailed {
        tx: TxId,
        #[source]
        source: RpcError,
    },

    /// A worker task panicked or was cancelled.
    #[error("worker task failed: {0}")]
    Worker(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DataPathError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) | Self::Type(_) | Self::Config(_) => {
                ErrorKind::InvalidArgument
            }
            Self::BlobNotFound(_) => ErrorKind::NotFound,
            Self::Rpc(err) | Self::CommitFailed { source: err, .. } => rpc_kind(err),
            Self::TransactionAborted { .. } | Self::AbortFailed { .. } => {
                ErrorKind::TransactionAborted
            }
            Self::Worker(_) | Self::Io(_) => ErrorKind::TransportFailure,
        }
    }

    /// The failure that caused a transaction to end, if this is one.
    pub fn root_cause(&self) -> &DataPathError {
        match self {
            Self::TransactionAborted { source, .. } => source.root_cause(),
            Self::AbortFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

fn rpc_kind(err: &RpcError) -> ErrorKind {
    match err {
        RpcError::NotFound(_) => ErrorKind::NotFound,
        RpcError::InvalidArgument(_) => ErrorKind::InvalidArgument,
        RpcError::Timeout(_) => ErrorKind::Timeout,
        _ => ErrorKind::TransportFailure,
    }
}

/// Result alias for data-path operations.
pub type DataPathResult<T> = Result<T, DataPathError>;
