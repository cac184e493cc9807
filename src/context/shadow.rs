//! Per-thread cached copy of the current backend for legacy readers.
//!
//! The slot is written only by [`shadow_set`] (and so by [`crate::switch_backend`]). Scope
//! restores never touch it, and it is not task aware: cooperative tasks sharing a thread share
//! one slot.

use std::cell::RefCell;

use crate::backend::ops::Backend;
use crate::context::scoped::default_backend;

thread_local! {
    static SHADOW: RefCell<Option<Backend>> = const { RefCell::new(None) };
}

/// Store `backend` in the calling thread's slot.
pub fn shadow_set(backend: Backend) {
    SHADOW.with(|s| *s.borrow_mut() = Some(backend));
}

/// Read the calling thread's slot, initializing it to the process default on first access.
pub fn shadow_get() -> Backend {
    SHADOW.with(|s| s.borrow_mut().get_or_insert_with(default_backend).clone())
}
