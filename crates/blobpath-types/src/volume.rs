use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Identity of a volume: the domain it lives in plus its name.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VolumeId {
    pub domain: String,
    pub name: String,
}

impl VolumeId {
    /// Create a volume identity. Both parts must be non-empty.
    pub fn new(domain: impl Into<String>, name: impl Into<String>) -> Result<Self, TypeError> {
        let domain = domain.into();
        let name = name.into();
        if domain.is_empty() {
            return Err(TypeError::EmptyName("domain"));
        }
        if name.is_empty() {
            return Err(TypeError::EmptyName("volume"));
        }
        Ok(Self { domain, name })
    }
}

impl fmt::Debug for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VolumeId({self})")
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.domain, self.name)
    }
}

/// A storage volume with a fixed object size and capacity.
///
/// The object size is a power of two and the capacity is a whole number of
/// objects. Both are immutable once the volume is constructed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    id: VolumeId,
    object_size: u32,
    capacity: u64,
}

impl Volume {
    pub fn new(id: VolumeId, object_size: u32, capacity: u64) -> Result<Self, TypeError> {
        if object_size == 0 || !object_size.is_power_of_two() {
            return Err(TypeError::InvalidObjectSize(object_size));
        }
        if capacity % u64::from(object_size) != 0 {
            return Err(TypeError::UnalignedCapacity {
                capacity,
                object_size,
            });
        }
        Ok(Self {
            id,
            object_size,
            capacity,
        })
    }

    pub fn id(&self) -> &VolumeId {
        &self.id
    }

    /// Size in bytes of every object in this volume.
    pub fn object_size(&self) -> u32 {
        self.object_size
    }

    /// Maximum logical length of any blob in this volume.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Number of objects the capacity spans.
    pub fn object_capacity(&self) -> u64 {
        self.capacity / u64::from(self.object_size)
    }
}
