//! Process-wide registry of device memory pools, one per consumer framework.
//!
//! The device driver has a single active allocator per process. The registry owns that slot
//! together with the pool map so its bookkeeping stays consistent: every pool ever created stays
//! retrievable by tag, and the active slot always names the pool installed last.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use once_cell::sync::Lazy;

use crate::foundation::error::{OpsError, OpsResult};
use crate::memory::device::{
    ACCELERATOR_DRIVER, DependencyPresence, DeviceMemoryAllocator, InstalledDependencies,
};
use crate::memory::framework::GpuAllocator;
use crate::memory::pool::{MemoryPool, PoolOpts, PooledBlock};

/// The pool currently installed as the device allocator.
#[derive(Clone, Debug)]
pub struct ActiveAllocator {
    /// Consumer-framework tag of the pool.
    pub tag: String,
    /// The installed pool.
    pub pool: Arc<MemoryPool>,
}

#[derive(Default)]
struct RegistryState {
    pools: BTreeMap<String, Arc<MemoryPool>>,
    bridges: BTreeMap<GpuAllocator, Arc<dyn DeviceMemoryAllocator>>,
    active: Option<ActiveAllocator>,
}

/// Owns at most one [`MemoryPool`] per consumer-framework tag plus the active allocator slot.
pub struct PoolRegistry {
    presence: Arc<dyn DependencyPresence>,
    opts: PoolOpts,
    state: Mutex<RegistryState>,
}

static GLOBAL: Lazy<PoolRegistry> = Lazy::new(|| {
    PoolRegistry::new(
        Arc::new(InstalledDependencies::global()),
        PoolOpts::from_env(),
    )
});

impl PoolRegistry {
    /// Create an empty registry.
    pub fn new(presence: Arc<dyn DependencyPresence>, opts: PoolOpts) -> Self {
        Self {
            presence,
            opts,
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// The process-wide registry, created on first use and never torn down.
    pub fn global() -> &'static PoolRegistry {
        &GLOBAL
    }

    /// Options every new pool is created with.
    pub fn pool_opts(&self) -> PoolOpts {
        self.opts
    }

    /// Return the pool for `tag`, creating it bound to `allocator` if it does not exist yet,
    /// and install it as the active device allocator.
    ///
    /// The first allocator supplied for a tag wins; later ones are ignored. Installation is
    /// last-writer-wins across tags. Fails with [`OpsError::MissingDependency`] before touching
    /// any state when the driver or the framework is absent.
    #[tracing::instrument(skip(self, allocator))]
    pub fn get_or_create_pool(
        &self,
        tag: &str,
        allocator: Arc<dyn DeviceMemoryAllocator>,
    ) -> OpsResult<Arc<MemoryPool>> {
        self.check_present(tag)?;
        Ok(self.install(tag, allocator))
    }

    /// Route `name` to its framework's registered allocator and install that framework's pool.
    ///
    /// `name` must be one of [`GpuAllocator::ALL`]; anything else fails with
    /// [`OpsError::InvalidAllocatorName`].
    #[tracing::instrument(skip(self))]
    pub fn select_gpu_allocator(&self, name: &str) -> OpsResult<Arc<MemoryPool>> {
        let framework: GpuAllocator = name.parse()?;
        self.check_present(framework.as_str())?;
        let allocator = self
            .lock()
            .bridges
            .get(&framework)
            .cloned()
            .ok_or_else(|| {
                OpsError::missing_dependency(format!(
                    "no device allocator registered for '{framework}'"
                ))
            })?;
        Ok(self.install(framework.as_str(), allocator))
    }

    /// Register the allocation-routing allocator of `framework`.
    pub fn register_framework_allocator(
        &self,
        framework: GpuAllocator,
        allocator: Arc<dyn DeviceMemoryAllocator>,
    ) {
        tracing::debug!(%framework, "framework allocator registered");
        self.lock().bridges.insert(framework, allocator);
    }

    /// Pool registered under `tag`, if any.
    pub fn pool(&self, tag: &str) -> Option<Arc<MemoryPool>> {
        self.lock().pools.get(tag).cloned()
    }

    /// Tags with a pool, in sorted order.
    pub fn tags(&self) -> Vec<String> {
        self.lock().pools.keys().cloned().collect()
    }

    /// The active device allocator slot.
    pub fn active(&self) -> Option<ActiveAllocator> {
        self.lock().active.clone()
    }

    /// Pool installed as the active device allocator.
    pub fn active_pool(&self) -> Option<Arc<MemoryPool>> {
        self.active().map(|a| a.pool)
    }

    /// Tag of the active device allocator.
    pub fn active_tag(&self) -> Option<String> {
        self.active().map(|a| a.tag)
    }

    /// Allocate device memory through the active pool.
    pub fn malloc(&self, size: usize) -> OpsResult<PooledBlock> {
        let pool = self
            .active_pool()
            .ok_or_else(|| OpsError::allocation("no device allocator is installed"))?;
        pool.malloc(size)
    }

    fn check_present(&self, tag: &str) -> OpsResult<()> {
        self.presence.assert_present(ACCELERATOR_DRIVER)?;
        self.presence.assert_present(tag)
    }

    fn install(&self, tag: &str, allocator: Arc<dyn DeviceMemoryAllocator>) -> Arc<MemoryPool> {
        let mut st = self.lock();
        let pool = match st.pools.get(tag).cloned() {
            Some(existing) => existing,
            None => {
                let pool = Arc::new(MemoryPool::new(allocator, self.opts));
                st.pools.insert(tag.to_string(), Arc::clone(&pool));
                tracing::info!(tag, "device memory pool created");
                pool
            }
        };

        match st.active.as_ref() {
            Some(prev) if prev.tag != tag => {
                tracing::warn!(
                    previous = %prev.tag,
                    tag,
                    "active device allocator replaced by another framework's pool"
                );
            }
            Some(_) => {}
            None => tracing::info!(tag, "device allocator installed"),
        }
        st.active = Some(ActiveAllocator {
            tag: tag.to_string(),
            pool: Arc::clone(&pool),
        });
        pool
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("opts", &self.opts)
            .field("tags", &self.tags())
            .field("active", &self.active_tag())
            .finish()
    }
}

/// [`PoolRegistry::get_or_create_pool`] on the process-wide registry.
pub fn get_or_create_pool(
    tag: &str,
    allocator: Arc<dyn DeviceMemoryAllocator>,
) -> OpsResult<Arc<MemoryPool>> {
    PoolRegistry::global().get_or_create_pool(tag, allocator)
}

/// [`PoolRegistry::select_gpu_allocator`] on the process-wide registry.
pub fn select_gpu_allocator(name: &str) -> OpsResult<Arc<MemoryPool>> {
    PoolRegistry::global().select_gpu_allocator(name)
}

/// [`PoolRegistry::register_framework_allocator`] on the process-wide registry.
pub fn register_framework_allocator(
    framework: GpuAllocator,
    allocator: Arc<dyn DeviceMemoryAllocator>,
) {
    PoolRegistry::global().register_framework_allocator(framework, allocator);
}

/// Pool installed as the process's active device allocator.
pub fn active_pool() -> Option<Arc<MemoryPool>> {
    PoolRegistry::global().active_pool()
}
