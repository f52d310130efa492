use std::sync::Arc;

use blobpath_rpc::BackingStore;
use blobpath_types::{BlobId, Volume};
use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::error::{DataPathError, DataPathResult};
use crate::grid::ObjectGrid;
use crate::reader::ChunkedReader;
use crate::txn::{ObjectUpdate, TransactionCoordinator};

/// Applies byte-range writes to whole objects.
///
/// Fully covered objects are overwritten verbatim. Partially covered
/// boundary objects are read, patched, and written back whole. A write that
/// lands in one object is a single untransacted update; anything wider goes
/// through the [`TransactionCoordinator`]. The blob's byte count moves only
/// after the data is durable.
pub struct ChunkedWriter {
    store: Arc<dyn BackingStore>,
    grid: ObjectGrid,
    capacity: u64,
    coordinator: TransactionCoordinator,
    reader: ChunkedReader,
}

impl ChunkedWriter {
    pub fn new(
        store: Arc<dyn BackingStore>,
        volume: &Volume,
        coordinator: TransactionCoordinator,
    ) -> DataPathResult<Self> {
        let grid = ObjectGrid::new(volume.object_size())?;
        Ok(Self {
            reader: ChunkedReader::new(Arc::clone(&store), grid),
            store,
            grid,
            capacity: volume.capacity(),
            coordinator,
        })
    }

    /// Write `data` at `offset` of `blob`.
    pub async fn write(&mut self, blob: &BlobId, offset: u64, data: Bytes) -> DataPathResult<()> {
        let length = u32::try_from(data.len()).map_err(|_| {
            DataPathError::InvalidArgument(format!("write of {} bytes is too large", data.len()))
        })?;
        let segments = self.grid.segments(offset, length)?;
        let end = offset + u64::from(length);
        if end > self.capacity {
            return Err(DataPathError::InvalidArgument(format!(
                "write ends at {end}, past volume capacity {}",
                self.capacity
            )));
        }
        if segments.is_empty() {
            return Ok(());
        }

        let descriptor = self.store.stat_blob(blob).await?;
        let exists = descriptor.is_some();
        let current = descriptor.map_or(0, |d| d.byte_count);
        let byte_count = current.max(end);
        let last_index = self.grid.last_object_index(byte_count);

        let object_size = self.grid.object_size() as usize;
        let mut updates = Vec::with_capacity(segments.len());
        let mut cursor = 0usize;
        for seg in &segments {
            let piece = data.slice(cursor..cursor + seg.length as usize);
            cursor += seg.length as usize;

            let payload = if seg.is_full(self.grid.object_size()) {
                piece
            } else {
                let mut object = if exists {
                    BytesMut::from(self.reader.fetch_object(blob, seg.object_index).await?.as_ref())
                } else {
                    BytesMut::zeroed(object_size)
                };
                object[seg.internal_offset as usize..seg.internal_end() as usize]
                    .copy_from_slice(&piece);
                object.freeze()
            };
            updates.push(ObjectUpdate {
                index: seg.object_index,
                payload,
                is_last_in_blob: Some(seg.object_index) == last_index,
            });
        }

        let path = if updates.len() == 1 { "single" } else { "transactional" };
        debug!(%blob, offset, length, objects = updates.len(), path, "writing");
        let outcome = self.coordinator.submit(blob, updates).await;
        self.reader.invalidate();
        outcome?;

        if byte_count > current {
            self.store.update_blob(blob, byte_count, None).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ChunkedWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedWriter")
            .field("object_size", &self.grid.object_size())
            .field("capacity", &self.capacity)
            .field("coordinator", &self.coordinator)
            .finish()
    }
}
