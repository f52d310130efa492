use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Sequential index of an object within a blob: `byte_offset / object_size`.
pub type ObjectIndex = u64;

/// Result of fetching one object from the backing store.
///
/// A never-written object index is a normal outcome, not an error: sparse
/// blobs read back as zeros.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectFetch {
    Present(Bytes),
    Absent,
}

impl ObjectFetch {
    /// Returns `true` if the object has never been written.
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Materialize the object as exactly `object_size` bytes.
    ///
    /// Absent objects become a zero buffer; short objects are zero-padded and
    /// oversized ones truncated.
    pub fn into_full(self, object_size: usize) -> Bytes {
        match self {
            Self::Present(data) if data.len() == object_size => data,
            Self::Present(data) => {
                let mut buf = vec![0u8; object_size];
                let n = data.len().min(object_size);
                buf[..n].copy_from_slice(&data[..n]);
                Bytes::from(buf)
            }
            Self::Absent => Bytes::from(vec![0u8; object_size]),
        }
    }
}

/// The part of a single object touched by a byte-range operation.
///
/// Invariant: `internal_offset + length <= object_size`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Segment {
    pub object_index: ObjectIndex,
    pub internal_offset: u32,
    pub length: u32,
}

impl Segment {
    /// Returns `true` if the segment covers the whole object.
    pub fn is_full(&self, object_size: u32) -> bool {
        self.internal_offset == 0 && self.length == object_size
    }

    /// End of the segment within its object (exclusive).
    pub fn internal_end(&self) -> u32 {
        self.internal_offset + self.length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_materializes_as_zeros() {
        let buf = ObjectFetch::Absent.into_full(16);
        assert_eq!(buf.len(), 16);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn short_object_is_zero_padded() {
        let buf = ObjectFetch::Present(Bytes::from_static(b"abc")).into_full(8);
        assert_eq!(&buf[..], b"abc\0\0\0\0\0");
    }

    #[test]
    fn full_object_is_returned_as_is() {
        let data = Bytes::from(vec![7u8; 8]);
        let buf = ObjectFetch::Present(data.clone()).into_full(8);
        assert_eq!(buf, data);
    }

    #[test]
    fn segment_fullness() {
        let full = Segment {
            object_index: 3,
            internal_offset: 0,
            length: 4096,
        };
        let partial = Segment {
            object_index: 3,
            internal_offset: 10,
            length: 100,
        };
        assert!(full.is_full(4096));
        assert!(!partial.is_full(4096));
        assert_eq!(partial.internal_end(), 110);
    }
}
