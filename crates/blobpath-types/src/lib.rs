//! Foundation types for the blobpath data path.
//!
//! This crate provides the identity and structural types shared by every
//! other blobpath crate. Nothing in here performs I/O.
//!
//! # Key Types
//!
//! - [`Volume`] — object size and capacity of a storage volume
//! - [`BlobId`] — a named byte stream inside a volume
//! - [`BlobDescriptor`] — logical length and metadata of a blob
//! - [`ObjectIndex`] / [`ObjectFetch`] — addressing and sparse-aware fetch results
//! - [`Segment`] — the portion of one object touched by a byte-range operation
//! - [`TxId`] / [`TxState`] — backing-store transaction identity and lifecycle
//! - [`RequestId`] — correlation key for one request on an async channel

pub mod blob;
pub mod error;
pub mod object;
pub mod request;
pub mod txn;
pub mod volume;

pub use blob::{BlobDescriptor, BlobId, BlobMetadata};
pub use error::TypeError;
pub use object::{ObjectFetch, ObjectIndex, Segment};
pub use request::{RequestId, RequestIdGen};
pub use txn::{TxId, TxState};
pub use volume::{Volume, VolumeId};
