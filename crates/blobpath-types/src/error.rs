use thiserror::Error;

/// Errors produced when constructing or validating foundation types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("object size must be a non-zero power of two, got {0}")]
    InvalidObjectSize(u32),

    #[error("capacity {capacity} is not a multiple of object size {object_size}")]
    UnalignedCapacity { capacity: u64, object_size: u32 },

    #[error("empty {0} name")]
    EmptyName(&'static str),

    #[error("invalid transaction id: {0}")]
    InvalidTxId(String),
}
