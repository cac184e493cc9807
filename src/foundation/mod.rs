pub(crate) mod core;
pub(crate) mod env;
pub(crate) mod error;
