use async_trait::async_trait;
use blobpath_types::{BlobDescriptor, BlobId, BlobMetadata, ObjectFetch, ObjectIndex, TxId};
use bytes::Bytes;

use crate::error::RpcResult;

/// The asynchronous object/blob service the data path is built on.
///
/// All implementations must satisfy these invariants:
/// - Objects are whole: every payload passed to an update is exactly one
///   object's worth of bytes.
/// - Reading a never-written object index of an existing blob returns
///   [`ObjectFetch::Absent`], not an error. Reading from a blob the store does
///   not know returns `NotFound`.
/// - Updates made under a transaction are invisible until
///   [`commit_transaction`](Self::commit_transaction) and discarded by
///   [`abort_transaction`](Self::abort_transaction).
/// - `update_blob` never lowers a blob's byte count.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Fetch one object. `length` is the object size the caller expects.
    async fn get_object(
        &self,
        blob: &BlobId,
        index: ObjectIndex,
        length: u32,
    ) -> RpcResult<ObjectFetch>;

    /// Open a transaction scoped to one blob.
    async fn begin_transaction(&self, blob: &BlobId) -> RpcResult<TxId>;

    /// Write one full object, staged under `tx` or applied directly when
    /// `tx` is `None`.
    async fn update_object(
        &self,
        blob: &BlobId,
        tx: Option<TxId>,
        index: ObjectIndex,
        payload: Bytes,
        is_last_in_blob: bool,
    ) -> RpcResult<()>;

    async fn commit_transaction(&self, tx: TxId) -> RpcResult<()>;

    async fn abort_transaction(&self, tx: TxId) -> RpcResult<()>;

    /// Atomically write one full object outside any transaction, creating
    /// the blob if it does not exist yet.
    async fn update_object_once(
        &self,
        blob: &BlobId,
        index: ObjectIndex,
        payload: Bytes,
    ) -> RpcResult<()>;

    /// Look up a blob's descriptor. Returns `Ok(None)` if the blob is absent.
    async fn stat_blob(&self, blob: &BlobId) -> RpcResult<Option<BlobDescriptor>>;

    /// Record a blob's byte count and, when given, replace its metadata. The
    /// store keeps the larger of the current and the given byte count; `None`
    /// leaves the metadata untouched.
    async fn update_blob(
        &self,
        blob: &BlobId,
        byte_count: u64,
        metadata: Option<BlobMetadata>,
    ) -> RpcResult<()>;
}
