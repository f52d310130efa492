//! Translation of absolute byte ranges onto the fixed-size object grid.

use blobpath_types::{ObjectIndex, Segment};

use crate::error::{DataPathError, DataPathResult};

/// Split `[offset, offset + length)` into per-object segments.
///
/// Segments ascend by object index, are contiguous, and cover the range
/// exactly. An empty range yields no segments.
pub fn segments(offset: u64, length: u32, object_size: u32) -> DataPathResult<Vec<Segment>> {
    ObjectGrid::new(object_size)?.segments(offset, length)
}

/// The object grid of one volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjectGrid {
    object_size: u32,
}

impl ObjectGrid {
    pub fn new(object_size: u32) -> DataPathResult<Self> {
        if object_size == 0 {
            return Err(DataPathError::InvalidArgument(
                "object size must be non-zero".into(),
            ));
        }
        Ok(Self { object_size })
    }

    pub fn object_size(&self) -> u32 {
        self.object_size
    }

    pub fn object_index_of(&self, offset: u64) -> ObjectIndex {
        offset / u64::from(self.object_size)
    }

    pub fn internal_offset_of(&self, offset: u64) -> u32 {
        (offset % u64::from(self.object_size)) as u32
    }

    /// Number of objects needed to hold `byte_count` bytes.
    pub fn object_count(&self, byte_count: u64) -> u64 {
        byte_count.div_ceil(u64::from(self.object_size))
    }

    /// Index of the object holding the last byte, or `None` for an empty blob.
    pub fn last_object_index(&self, byte_count: u64) -> Option<ObjectIndex> {
        byte_count.checked_sub(1).map(|last| self.object_index_of(last))
    }

    /// Split `[offset, offset + length)` into per-object segments.
    pub fn segments(&self, offset: u64, length: u32) -> DataPathResult<Vec<Segment>> {
        let end = offset.checked_add(u64::from(length)).ok_or_else(|| {
            DataPathError::InvalidArgument(format!(
                "range {offset}+{length} overflows a 64-bit offset"
            ))
        })?;

        let mut out = Vec::with_capacity(self.object_count_between(offset, end));
        let mut cursor = offset;
        while cursor < end {
            let internal_offset = self.internal_offset_of(cursor);
            let room = u64::from(self.object_size - internal_offset);
            let take = room.min(end - cursor);
            out.push(Segment {
                object_index: self.object_index_of(cursor),
                internal_offset,
                length: take as u32,
            });
            cursor += take;
        }
        Ok(out)
    }

    fn object_count_between(&self, start: u64, end: u64) -> usize {
        if start >= end {
            return 0;
        }
        (self.object_index_of(end - 1) - self.object_index_of(start) + 1) as usize
    }
}
