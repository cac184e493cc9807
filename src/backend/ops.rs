use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::foundation::error::{OpsError, OpsResult};

/// Construction options for a backend, keyed by option name.
pub type BackendOptions = BTreeMap<String, serde_json::Value>;

/// Registered device-class tags.
///
/// - `Cpu` executes on the host.
/// - `Gpu` executes on an accelerator device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Host backend.
    Cpu,
    /// Accelerator backend.
    Gpu,
}

impl BackendKind {
    /// Every registered kind, in tag order.
    pub const ALL: [BackendKind; 2] = [BackendKind::Cpu, BackendKind::Gpu];

    /// Stable lowercase tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Gpu => "gpu",
        }
    }

    /// Return `true` for accelerator kinds.
    pub fn is_accelerator(self) -> bool {
        matches!(self, Self::Gpu)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = OpsError;

    fn from_str(s: &str) -> OpsResult<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|k| k.as_str()).collect();
                OpsError::unsupported_backend(format!(
                    "'{s}' (registered backends: {})",
                    known.join(", ")
                ))
            })
    }
}

/// Capability contract of a compute backend.
///
/// Numeric kernels live outside this crate; the contract here is what backend selection needs
/// to know about an instance. Implementations are immutable once constructed.
pub trait Ops: Send + Sync + fmt::Debug {
    /// Device class this backend executes on.
    fn kind(&self) -> BackendKind;

    /// Device index for accelerator backends.
    fn device_id(&self) -> Option<u32> {
        None
    }

    /// Options the backend was constructed with.
    fn options(&self) -> &BackendOptions;

    /// Human-readable name, used in logs.
    fn name(&self) -> &'static str {
        self.kind().as_str()
    }
}

/// Shared handle to a configured backend.
///
/// Cloning is cheap; the instance lives as long as its longest holder (process default,
/// a scope binding or a thread shadow).
#[derive(Clone)]
pub struct Backend(Arc<dyn Ops>);

impl Backend {
    /// Wrap a backend implementation.
    pub fn new(ops: impl Ops + 'static) -> Self {
        Self(Arc::new(ops))
    }

    /// Device-class tag.
    pub fn kind(&self) -> BackendKind {
        self.0.kind()
    }

    /// Device index, accelerator backends only.
    pub fn device_id(&self) -> Option<u32> {
        self.0.device_id()
    }

    /// Construction options.
    pub fn options(&self) -> &BackendOptions {
        self.0.options()
    }

    /// Borrow the underlying implementation.
    pub fn ops(&self) -> &dyn Ops {
        self.0.as_ref()
    }

    /// Return `true` when both handles refer to the same instance.
    pub fn ptr_eq(a: &Backend, b: &Backend) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("kind", &self.kind())
            .field("device_id", &self.device_id())
            .finish()
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.device_id() {
            Some(id) => write!(f, "{}:{id}", self.0.name()),
            None => f.write_str(self.0.name()),
        }
    }
}
