//! In-memory backing store for blobpath.
//!
//! [`InMemoryBackingStore`] implements the full
//! [`BackingStore`](blobpath_rpc::BackingStore) contract in process: sparse
//! objects, transactions staged until commit, and monotonic blob byte
//! counts. It is intended for tests, demos, and embedding. A [`FaultPlan`]
//! makes chosen calls fail so abort and error paths can be exercised.
//!
//! # Design Rules
//!
//! 1. Transactional updates are invisible until commit and vanish on abort.
//! 2. A blob comes into existence on its first committed or single-call write.
//! 3. Reads of unwritten objects in an existing blob are `Absent`, not errors.
//! 4. Byte counts never move backwards.

pub mod fault;
pub mod memory;

pub use fault::{CallStats, FaultPlan};
pub use memory::InMemoryBackingStore;
