//! Context-scoped "current backend".
//!
//! The binding visible to running code lives in a thread-local cell. Code that runs directly on
//! an OS thread sees that thread's binding. Cooperative tasks wrapped in [`Scoped`] carry their
//! own binding and swap it into the cell for the duration of every poll, so a task observes the
//! same value after resuming no matter what other tasks on the thread did in between. An empty
//! binding reads as the process default (host backend).

use std::cell::RefCell;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use once_cell::sync::Lazy;

use crate::backend::factory::create_backend;
use crate::backend::host::HostOps;
use crate::backend::ops::{Backend, BackendOptions};
use crate::foundation::error::OpsResult;

static PROCESS_DEFAULT: Lazy<Backend> = Lazy::new(|| Backend::new(HostOps::default()));

thread_local! {
    static CURRENT: RefCell<Option<Backend>> = const { RefCell::new(None) };
}

/// The process-wide default backend (host).
pub fn default_backend() -> Backend {
    PROCESS_DEFAULT.clone()
}

fn binding() -> Option<Backend> {
    CURRENT.with(|c| c.borrow().clone())
}

fn replace_binding(next: Option<Backend>) -> Option<Backend> {
    CURRENT.with(|c| std::mem::replace(&mut *c.borrow_mut(), next))
}

/// Backend visible in the calling logical context.
pub fn get_current() -> Backend {
    binding().unwrap_or_else(default_backend)
}

/// Replace the backend visible in the calling logical context.
///
/// Tasks forked afterwards inherit the new value. Running sibling and parent contexts are
/// unaffected.
pub fn set_current(backend: Backend) {
    replace_binding(Some(backend));
}

/// Restores the previous backend binding when dropped.
///
/// Returned by [`with_backend`] and [`use_backend`]. The guard is tied to the thread that created
/// it; async code that holds a backend across await points should use [`scope`] instead.
#[must_use = "the previous backend is restored as soon as the guard is dropped"]
pub struct BackendGuard {
    prev: Option<Option<Backend>>,
    _not_send: PhantomData<*const ()>,
}

impl BackendGuard {
    /// Restore the previous backend now.
    pub fn restore(mut self) {
        self.restore_once();
    }

    fn restore_once(&mut self) {
        if let Some(prev) = self.prev.take() {
            let scoped = replace_binding(prev);
            tracing::debug!(
                from = ?scoped.as_ref().map(Backend::kind),
                to = %get_current().kind(),
                "backend scope restored"
            );
        }
    }
}

impl Drop for BackendGuard {
    fn drop(&mut self) {
        self.restore_once();
    }
}

impl std::fmt::Debug for BackendGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendGuard")
            .field("armed", &self.prev.is_some())
            .finish()
    }
}

/// Make `backend` current until the returned guard is dropped.
///
/// Guards nest: each one restores exactly the binding that was active when it was created,
/// including when the enclosing block unwinds or returns early.
pub fn with_backend(backend: Backend) -> BackendGuard {
    tracing::debug!(to = %backend, "backend scope entered");
    let prev = replace_binding(Some(backend));
    BackendGuard {
        prev: Some(prev),
        _not_send: PhantomData,
    }
}

/// Construct a backend by name and make it current until the guard is dropped.
pub fn use_backend(name: &str, options: BackendOptions) -> OpsResult<BackendGuard> {
    let backend = create_backend(name, options)?;
    Ok(with_backend(backend))
}

/// A captured backend binding that can be re-entered elsewhere.
///
/// This is how a child context inherits from its parent: capture in the parent, then run the
/// child inside the snapshot. Changes the child makes stay in the child.
#[derive(Clone, Debug, Default)]
pub struct ContextSnapshot {
    binding: Option<Backend>,
}

impl ContextSnapshot {
    /// Capture the calling context's binding.
    pub fn capture() -> Self {
        Self { binding: binding() }
    }

    /// Backend the snapshot resolves to.
    pub fn backend(&self) -> Backend {
        self.binding.clone().unwrap_or_else(default_backend)
    }

    /// Run `f` with this snapshot's binding, restoring the caller's binding afterwards.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        let mut binding = self.binding.clone();
        let _swap = Swap::enter(&mut binding);
        f()
    }

    /// Run `fut` as a task that owns a copy of this snapshot's binding.
    pub fn scope<F: Future>(&self, fut: F) -> Scoped<F> {
        Scoped {
            binding: self.binding.clone(),
            inner: Some(Box::pin(fut)),
        }
    }
}

/// Swaps a task binding into the thread cell and back out on drop.
struct Swap<'a> {
    saved: &'a mut Option<Backend>,
    outer: Option<Option<Backend>>,
}

impl<'a> Swap<'a> {
    fn enter(saved: &'a mut Option<Backend>) -> Self {
        let outer = replace_binding(saved.take());
        Self {
            saved,
            outer: Some(outer),
        }
    }
}

impl Drop for Swap<'_> {
    fn drop(&mut self) {
        if let Some(outer) = self.outer.take() {
            *self.saved = replace_binding(outer);
        }
    }
}

/// A future running with its own backend binding.
///
/// Created by [`scope`], [`fork`] and [`ContextSnapshot::scope`].
#[must_use = "futures do nothing unless polled"]
pub struct Scoped<F> {
    binding: Option<Backend>,
    inner: Option<Pin<Box<F>>>,
}

impl<F> Scoped<F> {
    /// Backend this task currently resolves to.
    pub fn backend(&self) -> Backend {
        self.binding.clone().unwrap_or_else(default_backend)
    }
}

impl<F: Future> Future for Scoped<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<F::Output> {
        let this = self.get_mut();
        let _swap = Swap::enter(&mut this.binding);
        let Some(inner) = this.inner.as_mut() else {
            panic!("Scoped future polled after completion");
        };
        let out = inner.as_mut().poll(cx);
        if out.is_ready() {
            // Drop the finished future while its binding is still in place.
            this.inner = None;
        }
        out
    }
}

impl<F> Drop for Scoped<F> {
    fn drop(&mut self) {
        if self.inner.is_some() {
            let _swap = Swap::enter(&mut self.binding);
            self.inner = None;
        }
    }
}

impl<F> std::fmt::Debug for Scoped<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scoped")
            .field("binding", &self.binding)
            .field("finished", &self.inner.is_none())
            .finish()
    }
}

/// Run `fut` with `backend` as its current backend.
pub fn scope<F: Future>(backend: Backend, fut: F) -> Scoped<F> {
    Scoped {
        binding: Some(backend),
        inner: Some(Box::pin(fut)),
    }
}

/// Run `fut` with a copy of the caller's current binding.
pub fn fork<F: Future>(fut: F) -> Scoped<F> {
    ContextSnapshot::capture().scope(fut)
}

/// Spawn an OS thread that inherits the caller's backend binding.
///
/// A thread started with plain [`std::thread::spawn`] starts at the process default instead.
pub fn spawn_thread<F, T>(f: F) -> std::thread::JoinHandle<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let snapshot = ContextSnapshot::capture();
    std::thread::spawn(move || snapshot.run(f))
}

/// Spawn a tokio task that inherits the caller's backend binding.
#[cfg(feature = "tokio")]
pub fn spawn<F>(fut: F) -> tokio::task::JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(fork(fut))
}
