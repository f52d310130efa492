use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::volume::VolumeId;

/// String-to-string metadata attached to a blob.
pub type BlobMetadata = BTreeMap<String, String>;

/// Identity of a blob: the volume it belongs to plus its name.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlobId {
    pub volume: VolumeId,
    pub name: String,
}

impl BlobId {
    pub fn new(volume: VolumeId, name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        if name.is_empty() {
            return Err(TypeError::EmptyName("blob"));
        }
        Ok(Self { volume, name })
    }
}

impl fmt::Debug for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobId({self})")
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.volume, self.name)
    }
}

/// Logical length and metadata of a blob as recorded by the backing store.
///
/// `byte_count` only moves forward through the write path, and only after
/// the data it covers is durable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobDescriptor {
    pub blob: BlobId,
    pub byte_count: u64,
    pub metadata: BlobMetadata,
}

impl BlobDescriptor {
    /// A descriptor for a freshly created, empty blob.
    pub fn empty(blob: BlobId) -> Self {
        Self {
            blob,
            byte_count: 0,
            metadata: BlobMetadata::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_volume() {
        let vol = VolumeId::new("d", "v").unwrap();
        let blob = BlobId::new(vol, "disk.img").unwrap();
        assert_eq!(blob.to_string(), "d/v:disk.img");
    }

    #[test]
    fn empty_blob_name_rejected() {
        let vol = VolumeId::new("d", "v").unwrap();
        assert_eq!(
            BlobId::new(vol, "").unwrap_err(),
            TypeError::EmptyName("blob")
        );
    }

    #[test]
    fn empty_descriptor_has_zero_length() {
        let vol = VolumeId::new("d", "v").unwrap();
        let desc = BlobDescriptor::empty(BlobId::new(vol, "b").unwrap());
        assert_eq!(desc.byte_count, 0);
        assert!(desc.metadata.is_empty());
    }

    #[test]
    fn serde_roundtrip() {
        let vol = VolumeId::new("d", "v").unwrap();
        let mut desc = BlobDescriptor::empty(BlobId::new(vol, "b").unwrap());
        desc.metadata.insert("content-type".into(), "raw".into());
        let json = serde_json::to_string(&desc).unwrap();
        let parsed: BlobDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, desc);
    }
}
