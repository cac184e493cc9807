use std::fmt;
use std::str::FromStr;

use crate::foundation::error::{OpsError, OpsResult};

/// Consumer frameworks that can route accelerator allocations through a shared pool.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum GpuAllocator {
    /// PyTorch's caching allocator.
    PyTorch,
    /// TensorFlow's device allocator.
    TensorFlow,
}

impl GpuAllocator {
    /// The fixed set of valid allocator names.
    pub const ALL: [GpuAllocator; 2] = [GpuAllocator::PyTorch, GpuAllocator::TensorFlow];

    /// Stable name, also the pool tag and the dependency name of the framework.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PyTorch => "pytorch",
            Self::TensorFlow => "tensorflow",
        }
    }
}

impl fmt::Display for GpuAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GpuAllocator {
    type Err = OpsError;

    fn from_str(s: &str) -> OpsResult<Self> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<String> = Self::ALL.iter().map(|a| format!("'{a}'")).collect();
                OpsError::invalid_allocator_name(format!(
                    "'{s}'. Available allocators are: {}",
                    valid.join(", ")
                ))
            })
    }
}
