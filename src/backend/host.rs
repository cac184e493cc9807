use crate::backend::ops::{BackendKind, BackendOptions, Ops};
use crate::foundation::error::{OpsError, OpsResult};

/// Host (CPU) backend.
#[derive(Clone, Debug, Default)]
pub struct HostOps {
    options: BackendOptions,
}

impl HostOps {
    /// Build a host backend. Host backends have no device index, so `device_id` is rejected.
    pub fn new(options: BackendOptions) -> OpsResult<Self> {
        if options.contains_key("device_id") {
            return Err(OpsError::validation(
                "the cpu backend does not take a device_id",
            ));
        }
        Ok(Self { options })
    }
}

impl Ops for HostOps {
    fn kind(&self) -> BackendKind {
        BackendKind::Cpu
    }

    fn options(&self) -> &BackendOptions {
        &self.options
    }
}
