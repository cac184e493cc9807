use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};

use once_cell::sync::Lazy;

use crate::foundation::core::DevicePtr;
use crate::foundation::error::{OpsError, OpsResult};

/// Dependency name of the accelerator driver library every device pool needs.
pub const ACCELERATOR_DRIVER: &str = "accelerator-driver";

/// Raw device memory provider, usually backed by a consumer framework's caching allocator.
pub trait DeviceMemoryAllocator: Send + Sync {
    /// Allocate `size` bytes of device memory.
    fn allocate(&self, size: usize) -> OpsResult<DevicePtr>;

    /// Return memory obtained from [`DeviceMemoryAllocator::allocate`].
    fn free(&self, ptr: DevicePtr);
}

/// Answers whether an optional framework or driver is loaded in the process.
pub trait DependencyPresence: Send + Sync {
    /// Fail with [`OpsError::MissingDependency`] when `name` is not present.
    fn assert_present(&self, name: &str) -> OpsResult<()>;
}

/// Set of dependency names the embedding application has announced as loaded.
#[derive(Debug, Default)]
pub struct InstalledDependencies {
    names: Mutex<BTreeSet<String>>,
}

static INSTALLED: Lazy<InstalledDependencies> = Lazy::new(InstalledDependencies::default);

impl InstalledDependencies {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide set used by the global pool registry.
    pub fn global() -> &'static InstalledDependencies {
        &INSTALLED
    }

    /// Announce `name` as present.
    pub fn mark_installed(&self, name: &str) {
        tracing::debug!(dependency = name, "dependency marked installed");
        self.lock().insert(name.to_string());
    }

    /// Withdraw a previous announcement.
    pub fn mark_uninstalled(&self, name: &str) {
        self.lock().remove(name);
    }

    /// Return `true` when `name` has been announced.
    pub fn is_installed(&self, name: &str) -> bool {
        self.lock().contains(name)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeSet<String>> {
        self.names.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DependencyPresence for InstalledDependencies {
    fn assert_present(&self, name: &str) -> OpsResult<()> {
        if self.is_installed(name) {
            Ok(())
        } else {
            Err(OpsError::missing_dependency(format!(
                "'{name}' is not installed"
            )))
        }
    }
}

impl DependencyPresence for &'static InstalledDependencies {
    fn assert_present(&self, name: &str) -> OpsResult<()> {
        (**self).assert_present(name)
    }
}

/// Announce `name` as present in the process-wide dependency set.
pub fn mark_installed(name: &str) {
    InstalledDependencies::global().mark_installed(name);
}
