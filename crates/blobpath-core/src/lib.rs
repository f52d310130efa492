//! Byte-range data path over a fixed-size object store.
//!
//! Protocol adapters see a blob as a flat byte stream; the backing store
//! only knows whole objects of the volume's object size. This crate maps
//! one onto the other.
//!
//! # Key Types
//!
//! - [`ObjectGrid`] — pure range-to-segment arithmetic
//! - [`ChunkedReader`] — assembles a range from whole-object fetches
//! - [`ChunkedWriter`] — read-modify-write of boundary objects
//! - [`TransactionCoordinator`] / [`Transaction`] — atomic multi-object updates
//! - [`DataPath`] — the adapter-facing handle with a bounded worker pool
//! - [`BlockingDataPath`] — the same for synchronous callers
//!
//! # Design Rules
//!
//! 1. A failed read or write never reports partial data as success.
//! 2. Every begun transaction ends in exactly one commit or abort.
//! 3. A write confined to one object never opens a transaction.
//! 4. A blob's byte count advances only after its data is durable, and
//!    never moves backwards.
//! 5. Never-written objects read as zeros.

pub mod barrier;
pub mod blocking;
pub mod config;
pub mod datapath;
pub mod error;
pub mod grid;
pub mod reader;
pub mod txn;
pub mod writer;

pub use barrier::{WriteBarrier, WriteGuard};
pub use blocking::BlockingDataPath;
pub use config::{ApplyMode, DataPathConfig, VolumeConfig};
pub use datapath::DataPath;
pub use error::{DataPathError, DataPathResult, ErrorKind};
pub use grid::{segments, ObjectGrid};
pub use reader::ChunkedReader;
pub use txn::{ObjectUpdate, Transaction, TransactionCoordinator};
pub use writer::ChunkedWriter;
