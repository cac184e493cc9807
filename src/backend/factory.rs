use crate::backend::accel::AcceleratorOps;
use crate::backend::host::HostOps;
use crate::backend::ops::{Backend, BackendKind, BackendOptions};
use crate::foundation::core::StorageLocation;
use crate::foundation::error::OpsResult;

/// Reports where an array value's storage lives.
pub trait ArrayStorageProbe {
    /// Return `true` when the value lives in accelerator memory.
    fn is_on_accelerator(&self) -> bool;

    /// Accelerator device index holding the value, if known.
    fn device_id(&self) -> Option<u32> {
        None
    }
}

impl ArrayStorageProbe for StorageLocation {
    fn is_on_accelerator(&self) -> bool {
        self.is_accelerator()
    }

    fn device_id(&self) -> Option<u32> {
        StorageLocation::device_id(*self)
    }
}

impl<T> ArrayStorageProbe for [T] {
    fn is_on_accelerator(&self) -> bool {
        false
    }
}

impl<T> ArrayStorageProbe for Vec<T> {
    fn is_on_accelerator(&self) -> bool {
        false
    }
}

/// Serializable description of a backend.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BackendConfig {
    /// Registered device-class tag (`"cpu"` or `"gpu"`).
    pub backend: String,
    /// Backend construction options.
    #[serde(default)]
    pub options: BackendOptions,
}

impl BackendConfig {
    /// Parse a config from JSON.
    pub fn from_json_str(s: &str) -> OpsResult<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Construct the described backend.
    pub fn build(&self) -> OpsResult<Backend> {
        create_backend(&self.backend, self.options.clone())
    }
}

/// Create a backend from its registered tag.
///
/// Fails with [`crate::OpsError::UnsupportedBackend`] for unknown tags and with
/// [`crate::OpsError::Validation`] for malformed options.
pub fn create_backend(name: &str, options: BackendOptions) -> OpsResult<Backend> {
    let kind: BackendKind = name.parse()?;
    create_backend_kind(kind, options)
}

/// Create a backend from an already resolved kind.
pub fn create_backend_kind(kind: BackendKind, options: BackendOptions) -> OpsResult<Backend> {
    let backend = match kind {
        BackendKind::Cpu => Backend::new(HostOps::new(options)?),
        BackendKind::Gpu => Backend::new(AcceleratorOps::new(options)?),
    };
    tracing::trace!(%backend, "constructed backend");
    Ok(backend)
}

/// Pick the backend matching where `value` is stored, with default options.
///
/// Anything not reported as accelerator storage gets the host backend.
pub fn infer_backend<P: ArrayStorageProbe + ?Sized>(value: &P) -> Backend {
    if value.is_on_accelerator() {
        Backend::new(AcceleratorOps::on_device(value.device_id().unwrap_or(0)))
    } else {
        Backend::new(HostOps::default())
    }
}
