pub(crate) mod scoped;
pub(crate) mod shadow;
pub(crate) mod switch;
