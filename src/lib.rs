//! opswitch selects the compute backend that numeric code runs on and hands out shared device
//! memory pools to accelerator allocators.
//!
//! Backend selection has two views:
//!
//! - The scoped view ([`get_current`], [`with_backend`], [`scope`]) is canonical. It nests,
//!   restores on every exit path, and follows cooperative tasks across suspension points.
//! - The thread shadow ([`shadow_get`]) is a per-OS-thread copy for legacy readers. Only
//!   [`switch_backend`] writes both views; [`views_agree`] compares them.
//!
//! Device memory pools live in a [`PoolRegistry`], one per consumer framework, with a single
//! active device allocator slot.
#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod backend;
mod context;
mod foundation;
mod memory;

pub use crate::backend::accel::AcceleratorOps;
pub use crate::backend::factory::{
    ArrayStorageProbe, BackendConfig, create_backend, create_backend_kind, infer_backend,
};
pub use crate::backend::host::HostOps;
pub use crate::backend::ops::{Backend, BackendKind, BackendOptions, Ops};
#[cfg(feature = "tokio")]
pub use crate::context::scoped::spawn;
pub use crate::context::scoped::{
    BackendGuard, ContextSnapshot, Scoped, default_backend, fork, get_current, scope,
    set_current, spawn_thread, use_backend, with_backend,
};
pub use crate::context::shadow::{shadow_get, shadow_set};
pub use crate::context::switch::{switch_backend, views_agree};
pub use crate::foundation::core::{DevicePtr, StorageLocation};
pub use crate::foundation::error::{OpsError, OpsResult};
pub use crate::memory::device::{
    ACCELERATOR_DRIVER, DependencyPresence, DeviceMemoryAllocator, InstalledDependencies,
    mark_installed,
};
pub use crate::memory::framework::GpuAllocator;
pub use crate::memory::pool::{
    ALLOCATION_UNIT, MemoryPool, POOL_LIMIT_ENV, PoolOpts, PoolStats, PooledBlock,
};
pub use crate::memory::registry::{
    ActiveAllocator, PoolRegistry, active_pool, get_or_create_pool, register_framework_allocator,
    select_gpu_allocator,
};
