//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use opswitch::{AcceleratorOps, Backend, DeviceMemoryAllocator, DevicePtr, HostOps, OpsResult};

/// Route `tracing` output through the test harness. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn host() -> Backend {
    Backend::new(HostOps::default())
}

pub fn gpu(device_id: u32) -> Backend {
    Backend::new(AcceleratorOps::on_device(device_id))
}

/// Hands out increasing fake device addresses and counts frees.
#[derive(Default)]
pub struct FakeDeviceAllocator {
    next: AtomicU64,
    pub allocs: AtomicU64,
    pub frees: AtomicU64,
}

impl FakeDeviceAllocator {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl DeviceMemoryAllocator for FakeDeviceAllocator {
    fn allocate(&self, size: usize) -> OpsResult<DevicePtr> {
        self.allocs.fetch_add(1, Ordering::SeqCst);
        let base = self.next.fetch_add(size as u64, Ordering::SeqCst);
        Ok(DevicePtr(0x7000_0000 + base))
    }

    fn free(&self, _ptr: DevicePtr) {
        self.frees.fetch_add(1, Ordering::SeqCst);
    }
}
