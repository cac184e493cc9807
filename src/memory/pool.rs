use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::foundation::core::DevicePtr;
use crate::foundation::env;
use crate::foundation::error::{OpsError, OpsResult};
use crate::memory::device::DeviceMemoryAllocator;

/// Allocation granularity in bytes. Requests are rounded up to a multiple of this.
pub const ALLOCATION_UNIT: usize = 512;

/// Environment variable holding the default pool byte limit.
pub const POOL_LIMIT_ENV: &str = "OPSWITCH_POOL_LIMIT_BYTES";

/// Pool configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PoolOpts {
    /// Maximum bytes held from the allocator (in use plus cached). `0` means unlimited.
    pub limit_bytes: usize,
    /// Maximum number of cached blocks per rounded size.
    pub max_blocks_per_bin: usize,
}

impl Default for PoolOpts {
    fn default() -> Self {
        Self {
            limit_bytes: 0,
            max_blocks_per_bin: 64,
        }
    }
}

impl PoolOpts {
    /// Defaults, with `limit_bytes` taken from [`POOL_LIMIT_ENV`] when set.
    pub fn from_env() -> Self {
        Self {
            limit_bytes: env::positive_usize(POOL_LIMIT_ENV).unwrap_or(0),
            ..Self::default()
        }
    }
}

/// Pool counters.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PoolStats {
    /// Bytes currently handed out.
    pub used_bytes: usize,
    /// Bytes held in the cache, ready for reuse.
    pub cached_bytes: usize,
    /// Blocks held in the cache.
    pub cached_blocks: usize,
    /// Blocks obtained from the underlying allocator.
    pub alloc_blocks: u64,
    /// Bytes obtained from the underlying allocator.
    pub alloc_bytes: u64,
    /// Requests served from the cache.
    pub reused_blocks: u64,
    /// Released blocks handed straight back to the allocator because their bin was full.
    pub dropped_on_release: u64,
}

impl PoolStats {
    /// Bytes held from the underlying allocator.
    pub fn total_bytes(&self) -> usize {
        self.used_bytes.saturating_add(self.cached_bytes)
    }
}

#[derive(Default)]
struct PoolState {
    stats: PoolStats,
    bins: HashMap<usize, Vec<DevicePtr>>,
}

/// Reusable device memory pool on top of a [`DeviceMemoryAllocator`].
///
/// Blocks are bucketed by rounded size. A dropped [`PooledBlock`] goes back to its bucket instead
/// of to the allocator, so repeated same-sized requests stop reaching the allocator.
pub struct MemoryPool {
    opts: PoolOpts,
    allocator: Arc<dyn DeviceMemoryAllocator>,
    state: Mutex<PoolState>,
}

impl MemoryPool {
    /// Create a pool bound to `allocator`.
    pub fn new(allocator: Arc<dyn DeviceMemoryAllocator>, opts: PoolOpts) -> Self {
        Self {
            opts,
            allocator,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Pool configuration.
    pub fn opts(&self) -> PoolOpts {
        self.opts
    }

    /// Snapshot of the pool counters.
    pub fn stats(&self) -> PoolStats {
        self.lock().stats.clone()
    }

    /// Return `true` when the pool draws from `allocator`.
    pub fn uses_allocator(&self, allocator: &Arc<dyn DeviceMemoryAllocator>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.allocator), Arc::as_ptr(allocator))
    }

    /// Hand out a block of at least `size` bytes.
    ///
    /// Zero-sized requests get a null block and never reach the allocator.
    pub fn malloc(self: &Arc<Self>, size: usize) -> OpsResult<PooledBlock> {
        if size == 0 {
            return Ok(PooledBlock {
                pool: Arc::clone(self),
                ptr: DevicePtr::NULL,
                size: 0,
            });
        }
        let rounded = size.checked_next_multiple_of(ALLOCATION_UNIT).ok_or_else(|| {
            OpsError::allocation(format!("request of {size} bytes overflows the pool"))
        })?;

        let stale = {
            let mut st = self.lock();
            if let Some(ptr) = st.bins.get_mut(&rounded).and_then(Vec::pop) {
                st.stats.cached_blocks = st.stats.cached_blocks.saturating_sub(1);
                st.stats.cached_bytes = st.stats.cached_bytes.saturating_sub(rounded);
                st.stats.used_bytes = st.stats.used_bytes.saturating_add(rounded);
                st.stats.reused_blocks = st.stats.reused_blocks.saturating_add(1);
                return Ok(PooledBlock {
                    pool: Arc::clone(self),
                    ptr,
                    size: rounded,
                });
            }

            let mut stale = Vec::new();
            if self.opts.limit_bytes > 0 {
                if st.stats.total_bytes().saturating_add(rounded) > self.opts.limit_bytes {
                    stale = Self::take_cached(&mut st);
                }
                if st.stats.used_bytes.saturating_add(rounded) > self.opts.limit_bytes {
                    let used = st.stats.used_bytes;
                    drop(st);
                    self.free_blocks(stale);
                    return Err(OpsError::allocation(format!(
                        "pool limit of {} bytes exceeded ({used} in use, {rounded} requested)",
                        self.opts.limit_bytes
                    )));
                }
            }
            // Reserve the bytes so concurrent callers see them against the limit.
            st.stats.used_bytes = st.stats.used_bytes.saturating_add(rounded);
            stale
        };
        self.free_blocks(stale);

        let ptr = match self.allocate_or_retry(rounded) {
            Ok(ptr) => ptr,
            Err(e) => {
                let mut st = self.lock();
                st.stats.used_bytes = st.stats.used_bytes.saturating_sub(rounded);
                return Err(e);
            }
        };

        let mut st = self.lock();
        st.stats.alloc_blocks = st.stats.alloc_blocks.saturating_add(1);
        st.stats.alloc_bytes = st.stats.alloc_bytes.saturating_add(rounded as u64);
        Ok(PooledBlock {
            pool: Arc::clone(self),
            ptr,
            size: rounded,
        })
    }

    /// Hand every cached block back to the underlying allocator.
    pub fn free_all_blocks(&self) {
        let stale = Self::take_cached(&mut self.lock());
        self.free_blocks(stale);
    }

    // Called without the state lock held; the allocator may call back into the pool.
    fn allocate_or_retry(&self, size: usize) -> OpsResult<DevicePtr> {
        match self.allocator.allocate(size) {
            Err(OpsError::Allocation(msg)) => {
                let stale = Self::take_cached(&mut self.lock());
                if stale.is_empty() {
                    return Err(OpsError::Allocation(msg));
                }
                tracing::debug!(
                    size,
                    freed_blocks = stale.len(),
                    "device allocation failed, retrying after freeing cached blocks"
                );
                self.free_blocks(stale);
                self.allocator.allocate(size)
            }
            other => other,
        }
    }

    fn take_cached(st: &mut PoolState) -> Vec<DevicePtr> {
        let stale: Vec<DevicePtr> = st.bins.drain().flat_map(|(_, ptrs)| ptrs).collect();
        st.stats.cached_blocks = 0;
        st.stats.cached_bytes = 0;
        stale
    }

    fn free_blocks(&self, ptrs: Vec<DevicePtr>) {
        for ptr in ptrs {
            self.allocator.free(ptr);
        }
    }

    fn release(&self, ptr: DevicePtr, size: usize) {
        {
            let mut guard = self.lock();
            let st = &mut *guard;
            st.stats.used_bytes = st.stats.used_bytes.saturating_sub(size);

            let bin = st.bins.entry(size).or_default();
            if bin.len() < self.opts.max_blocks_per_bin {
                bin.push(ptr);
                st.stats.cached_blocks = st.stats.cached_blocks.saturating_add(1);
                st.stats.cached_bytes = st.stats.cached_bytes.saturating_add(size);
                return;
            }
            st.stats.dropped_on_release = st.stats.dropped_on_release.saturating_add(1);
        }
        self.allocator.free(ptr);
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for MemoryPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPool")
            .field("opts", &self.opts)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Device memory borrowed from a [`MemoryPool`]; returned to the pool on drop.
pub struct PooledBlock {
    pool: Arc<MemoryPool>,
    ptr: DevicePtr,
    size: usize,
}

impl PooledBlock {
    /// Device address of the block.
    pub fn ptr(&self) -> DevicePtr {
        self.ptr
    }

    /// Rounded size of the block in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Pool the block belongs to.
    pub fn pool(&self) -> &Arc<MemoryPool> {
        &self.pool
    }
}

impl Drop for PooledBlock {
    fn drop(&mut self) {
        if self.size > 0 {
            self.pool.release(self.ptr, self.size);
        }
    }
}

impl fmt::Debug for PooledBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBlock")
            .field("ptr", &self.ptr)
            .field("size", &self.size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct BumpAllocator {
        next: AtomicU64,
        freed: AtomicU64,
    }

    impl DeviceMemoryAllocator for BumpAllocator {
        fn allocate(&self, size: usize) -> OpsResult<DevicePtr> {
            let base = self.next.fetch_add(size as u64, Ordering::SeqCst);
            Ok(DevicePtr(0x1000 + base))
        }

        fn free(&self, _ptr: DevicePtr) {
            self.freed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn pool(opts: PoolOpts) -> (Arc<BumpAllocator>, Arc<MemoryPool>) {
        let alloc = Arc::new(BumpAllocator::default());
        let pool = Arc::new(MemoryPool::new(alloc.clone(), opts));
        (alloc, pool)
    }

    #[test]
    fn requests_round_up_to_allocation_unit() {
        let (_, p) = pool(PoolOpts::default());
        let b = p.malloc(1).unwrap();
        assert_eq!(b.size(), ALLOCATION_UNIT);
        let c = p.malloc(ALLOCATION_UNIT + 1).unwrap();
        assert_eq!(c.size(), 2 * ALLOCATION_UNIT);
        assert_eq!(p.stats().used_bytes, 3 * ALLOCATION_UNIT);
    }

    #[test]
    fn released_blocks_are_reused() {
        let (_, p) = pool(PoolOpts::default());
        let first = p.malloc(100).unwrap().ptr();
        let again = p.malloc(200).unwrap();
        assert_eq!(again.ptr(), first);

        let st = p.stats();
        assert_eq!(st.alloc_blocks, 1);
        assert_eq!(st.reused_blocks, 1);
    }

    #[test]
    fn zero_sized_request_is_null() {
        let (_, p) = pool(PoolOpts::default());
        let b = p.malloc(0).unwrap();
        assert!(b.ptr().is_null());
        drop(b);
        assert_eq!(p.stats(), PoolStats::default());
    }

    #[test]
    fn pool_honors_bin_cap() {
        let (alloc, p) = pool(PoolOpts {
            limit_bytes: 0,
            max_blocks_per_bin: 1,
        });
        let a = p.malloc(512).unwrap();
        let b = p.malloc(512).unwrap();
        drop(a);
        drop(b);

        let st = p.stats();
        assert_eq!(st.cached_blocks, 1);
        assert_eq!(st.dropped_on_release, 1);
        assert_eq!(alloc.freed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn limit_frees_cache_before_failing() {
        let (alloc, p) = pool(PoolOpts {
            limit_bytes: 1024,
            max_blocks_per_bin: 8,
        });
        drop(p.malloc(1024).unwrap());
        assert_eq!(p.stats().cached_bytes, 1024);

        // A different size does not fit next to the cached block, so the cache is released.
        let small = p.malloc(512).unwrap();
        assert_eq!(p.stats().cached_bytes, 0);
        assert_eq!(alloc.freed.load(Ordering::SeqCst), 1);

        let err = p.malloc(1024).unwrap_err();
        assert!(matches!(err, OpsError::Allocation(_)));
        drop(small);
    }

    #[test]
    fn free_all_blocks_empties_cache() {
        let (alloc, p) = pool(PoolOpts::default());
        let a = p.malloc(512).unwrap();
        let b = p.malloc(4096).unwrap();
        drop(a);
        drop(b);
        assert_eq!(p.stats().cached_blocks, 2);

        p.free_all_blocks();
        let st = p.stats();
        assert_eq!(st.cached_blocks, 0);
        assert_eq!(st.total_bytes(), 0);
        assert_eq!(alloc.freed.load(Ordering::SeqCst), 2);
    }

    /// Calls back into its own pool from both `allocate` and `free`.
    #[derive(Default)]
    struct ReentrantAllocator {
        pool: std::sync::OnceLock<std::sync::Weak<MemoryPool>>,
        inner: BumpAllocator,
    }

    impl ReentrantAllocator {
        fn pool(&self) -> Option<Arc<MemoryPool>> {
            self.pool.get().and_then(std::sync::Weak::upgrade)
        }
    }

    impl DeviceMemoryAllocator for ReentrantAllocator {
        fn allocate(&self, size: usize) -> OpsResult<DevicePtr> {
            if let Some(pool) = self.pool()
                && size > 4096
            {
                pool.free_all_blocks();
                let _ = pool.stats();
            }
            self.inner.allocate(size)
        }

        fn free(&self, ptr: DevicePtr) {
            if let Some(pool) = self.pool() {
                let _ = pool.stats();
            }
            self.inner.free(ptr);
        }
    }

    #[test]
    fn allocator_may_call_back_into_its_pool() {
        let alloc = Arc::new(ReentrantAllocator::default());
        let p = Arc::new(MemoryPool::new(
            alloc.clone(),
            PoolOpts {
                limit_bytes: 0,
                max_blocks_per_bin: 1,
            },
        ));
        let _ = alloc.pool.set(Arc::downgrade(&p));

        let (tx, rx) = std::sync::mpsc::channel();
        let worker = {
            let p = Arc::clone(&p);
            std::thread::spawn(move || {
                // Cached, then freed from inside the large allocation below.
                drop(p.malloc(1024).unwrap());
                let big = p.malloc(8192).unwrap();
                // Bin cap of one: the second release frees through the allocator.
                let a = p.malloc(512).unwrap();
                let b = p.malloc(512).unwrap();
                drop(a);
                drop(b);
                drop(big);
                tx.send(p.stats()).unwrap();
            })
        };

        let st = rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("pool deadlocked on allocator callback");
        worker.join().unwrap();
        assert_eq!(st.used_bytes, 0);
        assert_eq!(st.dropped_on_release, 1);
        assert_eq!(alloc.inner.freed.load(Ordering::SeqCst), 2);
    }

    /// Device with a fixed capacity; fails with `Allocation` when full.
    struct BoundedDevice {
        capacity: u64,
        in_use: AtomicU64,
        sizes: Mutex<HashMap<u64, u64>>,
        next: AtomicU64,
        attempts: AtomicU64,
    }

    impl BoundedDevice {
        fn new(capacity: u64) -> Self {
            Self {
                capacity,
                in_use: AtomicU64::new(0),
                sizes: Mutex::new(HashMap::new()),
                next: AtomicU64::new(1),
                attempts: AtomicU64::new(0),
            }
        }
    }

    impl DeviceMemoryAllocator for BoundedDevice {
        fn allocate(&self, size: usize) -> OpsResult<DevicePtr> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let size = size as u64;
            if self.in_use.load(Ordering::SeqCst) + size > self.capacity {
                return Err(OpsError::allocation("device out of memory"));
            }
            self.in_use.fetch_add(size, Ordering::SeqCst);
            let ptr = self.next.fetch_add(1, Ordering::SeqCst);
            self.sizes.lock().unwrap().insert(ptr, size);
            Ok(DevicePtr(ptr))
        }

        fn free(&self, ptr: DevicePtr) {
            if let Some(size) = self.sizes.lock().unwrap().remove(&ptr.0) {
                self.in_use.fetch_sub(size, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn device_out_of_memory_retries_after_freeing_cache() {
        let device = Arc::new(BoundedDevice::new(1024));
        let p = Arc::new(MemoryPool::new(device.clone(), PoolOpts::default()));
        drop(p.malloc(1024).unwrap());
        assert_eq!(p.stats().cached_bytes, 1024);

        let block = p.malloc(512).unwrap();
        assert_eq!(device.attempts.load(Ordering::SeqCst), 3);
        let st = p.stats();
        assert_eq!(st.cached_bytes, 0);
        assert_eq!(st.used_bytes, 512);
        assert_eq!(device.in_use.load(Ordering::SeqCst), 512);
        drop(block);
    }

    #[test]
    fn device_out_of_memory_with_empty_cache_fails_once() {
        let device = Arc::new(BoundedDevice::new(512));
        let p = Arc::new(MemoryPool::new(device.clone(), PoolOpts::default()));
        let held = p.malloc(512).unwrap();

        let err = p.malloc(512).unwrap_err();
        assert!(matches!(err, OpsError::Allocation(_)));
        // Nothing cached, so no retry.
        assert_eq!(device.attempts.load(Ordering::SeqCst), 2);
        // The reservation is rolled back.
        assert_eq!(p.stats().used_bytes, 512);
        drop(held);
        assert_eq!(p.stats().used_bytes, 0);
    }
}
