use crate::backend::ops::Backend;
use crate::context::scoped::{get_current, set_current};
use crate::context::shadow::{shadow_get, shadow_set};

/// Make `backend` current in both the scoped context and the calling thread's shadow slot.
///
/// This is the only operation that writes both views. After it returns, [`views_agree`] holds
/// for the calling thread until something writes just one of them.
pub fn switch_backend(backend: Backend) {
    tracing::debug!(to = %backend, "switching backend");
    set_current(backend.clone());
    shadow_set(backend);
}

/// Return `true` when the scoped view and the thread shadow report the same device class.
pub fn views_agree() -> bool {
    get_current().kind() == shadow_get().kind()
}
