pub(crate) mod accel;
pub(crate) mod factory;
pub(crate) mod host;
pub(crate) mod ops;
