use crate::backend::ops::{BackendKind, BackendOptions, Ops};
use crate::foundation::error::{OpsError, OpsResult};

/// Accelerator backend pinned to one device.
#[derive(Clone, Debug)]
pub struct AcceleratorOps {
    device_id: u32,
    options: BackendOptions,
}

impl AcceleratorOps {
    /// Build an accelerator backend.
    ///
    /// `device_id` is read from `options` and defaults to device 0.
    pub fn new(options: BackendOptions) -> OpsResult<Self> {
        let device_id = match options.get("device_id") {
            None | Some(serde_json::Value::Null) => 0,
            Some(v) => v
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| {
                    OpsError::validation(format!(
                        "device_id must be a non-negative integer, got {v}"
                    ))
                })?,
        };
        Ok(Self { device_id, options })
    }

    /// Accelerator backend on `device_id` with no other options.
    pub fn on_device(device_id: u32) -> Self {
        let mut options = BackendOptions::new();
        options.insert("device_id".to_string(), serde_json::json!(device_id));
        Self { device_id, options }
    }
}

impl Default for AcceleratorOps {
    fn default() -> Self {
        Self {
            device_id: 0,
            options: BackendOptions::new(),
        }
    }
}

impl Ops for AcceleratorOps {
    fn kind(&self) -> BackendKind {
        BackendKind::Gpu
    }

    fn device_id(&self) -> Option<u32> {
        Some(self.device_id)
    }

    fn options(&self) -> &BackendOptions {
        &self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(device_id: serde_json::Value) -> BackendOptions {
        let mut options = BackendOptions::new();
        options.insert("device_id".to_string(), device_id);
        options
    }

    #[test]
    fn device_defaults_to_zero() {
        let ops = AcceleratorOps::new(BackendOptions::new()).unwrap();
        assert_eq!(ops.device_id(), Some(0));
        assert_eq!(ops.kind(), BackendKind::Gpu);
    }

    #[test]
    fn device_is_read_from_options() {
        let ops = AcceleratorOps::new(opts(serde_json::json!(2))).unwrap();
        assert_eq!(ops.device_id(), Some(2));
        assert_eq!(AcceleratorOps::on_device(5).device_id(), Some(5));
    }

    #[test]
    fn malformed_device_id_is_rejected() {
        for bad in [
            serde_json::json!(-1),
            serde_json::json!("1"),
            serde_json::json!(1.5),
            serde_json::json!(u64::MAX),
        ] {
            assert!(matches!(
                AcceleratorOps::new(opts(bad)),
                Err(OpsError::Validation(_))
            ));
        }
    }
}
