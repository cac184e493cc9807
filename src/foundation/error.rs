/// Crate-wide result alias.
pub type OpsResult<T> = Result<T, OpsError>;

/// Errors surfaced by backend selection and device memory pools.
///
/// Every variant is a programming or environment error; nothing in the crate retries or
/// recovers locally.
#[derive(thiserror::Error, Debug)]
pub enum OpsError {
    /// The requested device-class tag is not registered.
    #[error("unsupported backend: {0}")]
    UnsupportedBackend(String),

    /// An optional consumer framework or the accelerator driver is not present.
    #[error("missing dependency: {0}")]
    MissingDependency(String),

    /// A GPU allocator name outside the fixed enumerated set.
    #[error("invalid gpu allocator: {0}")]
    InvalidAllocatorName(String),

    /// Malformed backend options.
    #[error("validation error: {0}")]
    Validation(String),

    /// Device memory could not be handed out.
    #[error("allocation error: {0}")]
    Allocation(String),

    /// Backend configuration could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serde(String),

    /// Error raised by an embedder-supplied collaborator.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OpsError {
    /// Build an [`OpsError::UnsupportedBackend`].
    pub fn unsupported_backend(msg: impl Into<String>) -> Self {
        Self::UnsupportedBackend(msg.into())
    }

    /// Build an [`OpsError::MissingDependency`].
    pub fn missing_dependency(msg: impl Into<String>) -> Self {
        Self::MissingDependency(msg.into())
    }

    /// Build an [`OpsError::InvalidAllocatorName`].
    pub fn invalid_allocator_name(msg: impl Into<String>) -> Self {
        Self::InvalidAllocatorName(msg.into())
    }

    /// Build an [`OpsError::Validation`].
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build an [`OpsError::Allocation`].
    pub fn allocation(msg: impl Into<String>) -> Self {
        Self::Allocation(msg.into())
    }

    /// Build an [`OpsError::Serde`].
    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }
}

impl From<serde_json::Error> for OpsError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serde(e.to_string())
    }
}
