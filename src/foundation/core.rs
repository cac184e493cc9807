/// Opaque device address handed out by a [`crate::DeviceMemoryAllocator`].
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct DevicePtr(pub u64);

impl DevicePtr {
    /// Null device address.
    pub const NULL: Self = Self(0);

    /// Return `true` for the null address.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Where the storage of an array value lives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageLocation {
    /// Host (CPU) memory.
    #[default]
    Host,
    /// Accelerator memory on the given device index.
    Accelerator(u32),
}

impl StorageLocation {
    /// Return `true` when the storage lives in accelerator memory.
    pub fn is_accelerator(self) -> bool {
        matches!(self, Self::Accelerator(_))
    }

    /// Device index for accelerator storage.
    pub fn device_id(self) -> Option<u32> {
        match self {
            Self::Host => None,
            Self::Accelerator(id) => Some(id),
        }
    }
}
