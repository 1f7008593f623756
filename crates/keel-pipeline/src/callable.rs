//! Hook bodies and the registry that binds callable references to them.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use keel_types::{Context, Result};

/// Boxed future returned by asynchronous hook bodies.
pub type HookFuture = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;

type BlockingFn = dyn Fn(&Context) -> Result<()> + Send + Sync;
type AsyncFn = dyn Fn(Context) -> HookFuture + Send + Sync;

// ---------------------------------------------------------------------------
// HookBody
// ---------------------------------------------------------------------------

/// The work behind a callable reference.
///
/// `Blocking` bodies run on tokio's blocking pool and should use
/// [`Context::set_blocking`] / [`Context::get_blocking`]. `Async` bodies run as
/// spawned tasks and receive a shared handle to the run's context.
#[derive(Clone)]
pub enum HookBody {
    Blocking(Arc<BlockingFn>),
    Async(Arc<AsyncFn>),
}

impl HookBody {
    pub fn blocking<F>(f: F) -> Self
    where
        F: Fn(&Context) -> Result<()> + Send + Sync + 'static,
    {
        HookBody::Blocking(Arc::new(f))
    }

    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        HookBody::Async(Arc::new(move |ctx| Box::pin(f(ctx))))
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self, HookBody::Blocking(_))
    }
}

impl std::fmt::Debug for HookBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookBody::Blocking(_) => f.write_str("HookBody::Blocking"),
            HookBody::Async(_) => f.write_str("HookBody::Async"),
        }
    }
}

// ---------------------------------------------------------------------------
// CallableRegistry
// ---------------------------------------------------------------------------

/// Name → hook body table. Populated before a runner is constructed and then
/// shared read-only.
#[derive(Debug, Default, Clone)]
pub struct CallableRegistry {
    bodies: HashMap<String, HookBody>,
}

impl CallableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `body` under `callable_ref`, replacing any previous entry.
    pub fn register(&mut self, callable_ref: impl Into<String>, body: HookBody) {
        self.bodies.insert(callable_ref.into(), body);
    }

    pub fn get(&self, callable_ref: &str) -> Option<&HookBody> {
        self.bodies.get(callable_ref)
    }

    pub fn has(&self, callable_ref: &str) -> bool {
        self.bodies.contains_key(callable_ref)
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup() {
        let mut reg = CallableRegistry::new();
        assert!(reg.is_empty());
        reg.register("noop.sync", HookBody::blocking(|_| Ok(())));
        reg.register("noop.async", HookBody::from_async(|_ctx| async { Ok(()) }));

        assert_eq!(reg.len(), 2);
        assert!(reg.has("noop.sync"));
        assert!(reg.get("noop.sync").unwrap().is_blocking());
        assert!(!reg.get("noop.async").unwrap().is_blocking());
        assert!(reg.get("missing").is_none());
    }

    #[test]
    fn re_registering_replaces() {
        let mut reg = CallableRegistry::new();
        reg.register("x", HookBody::blocking(|_| Ok(())));
        reg.register("x", HookBody::from_async(|_ctx| async { Ok(()) }));
        assert_eq!(reg.len(), 1);
        assert!(!reg.get("x").unwrap().is_blocking());
    }
}
