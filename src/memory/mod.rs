pub(crate) mod device;
pub(crate) mod framework;
pub(crate) mod pool;
pub(crate) mod registry;
