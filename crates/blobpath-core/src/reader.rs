use std::sync::Arc;

use blobpath_rpc::BackingStore;
use blobpath_types::{BlobId, ObjectIndex};
use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::error::DataPathResult;
use crate::grid::ObjectGrid;

struct CachedObject {
    blob: BlobId,
    index: ObjectIndex,
    data: Bytes,
}

/// Assembles byte ranges from whole-object fetches.
///
/// Keeps the most recently fetched object so adjacent segments that land
/// in the same object cost one call. The cache belongs to this instance
/// only and is never shared between callers.
pub struct ChunkedReader {
    store: Arc<dyn BackingStore>,
    grid: ObjectGrid,
    last: Option<CachedObject>,
}

impl ChunkedReader {
    pub fn new(store: Arc<dyn BackingStore>, grid: ObjectGrid) -> Self {
        Self {
            store,
            grid,
            last: None,
        }
    }

    pub fn grid(&self) -> ObjectGrid {
        self.grid
    }

    /// Read `[offset, offset + length)` of `blob`.
    ///
    /// Never-written objects read as zeros. Any failed fetch fails the whole
    /// read. The blob's byte count is not consulted.
    pub async fn read(&mut self, blob: &BlobId, offset: u64, length: u32) -> DataPathResult<Bytes> {
        let segments = self.grid.segments(offset, length)?;
        if let [only] = segments.as_slice() {
            let object = self.fetch_object(blob, only.object_index).await?;
            return Ok(object.slice(only.internal_offset as usize..only.internal_end() as usize));
        }

        let mut out = BytesMut::with_capacity(length as usize);
        for seg in &segments {
            let object = self.fetch_object(blob, seg.object_index).await?;
            out.extend_from_slice(&object[seg.internal_offset as usize..seg.internal_end() as usize]);
        }
        Ok(out.freeze())
    }

    /// Fetch one object as exactly `object_size` bytes.
    pub async fn fetch_object(&mut self, blob: &BlobId, index: ObjectIndex) -> DataPathResult<Bytes> {
        if let Some(cached) = &self.last {
            if cached.index == index && &cached.blob == blob {
                trace!(%blob, index, "object cache hit");
                return Ok(cached.data.clone());
            }
        }

        let object_size = self.grid.object_size();
        trace!(%blob, index, "fetching object");
        let fetch = self.store.get_object(blob, index, object_size).await?;
        let data = fetch.into_full(object_size as usize);
        self.last = Some(CachedObject {
            blob: blob.clone(),
            index,
            data: data.clone(),
        });
        Ok(data)
    }

    /// Forget the cached object.
    pub fn invalidate(&mut self) {
        self.last = None;
    }
}

impl std::fmt::Debug for ChunkedReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedReader")
            .field("object_size", &self.grid.object_size())
            .field("cached", &self.last.as_ref().map(|c| c.index))
            .finish()
    }
}
