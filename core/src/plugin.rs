//! Middleware, computed values and plugins.
//!
//! Middleware are plain state transforms run in registration order over
//! every candidate state produced by `set_deep`. Plugins get a look at the
//! finished store once and may contribute one more middleware.

use std::sync::Arc;

use serde_json::Value;

use crate::engine::Store;

/// A transform over a candidate state.
pub type Middleware = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// A derived value computed from the live state on each access.
pub type ComputedFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Wrap a closure as a [`Middleware`].
pub fn middleware<F>(f: F) -> Middleware
where
    F: Fn(Value) -> Value + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap a closure as a [`ComputedFn`].
pub fn computed<F>(f: F) -> ComputedFn
where
    F: Fn(&Value) -> Value + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Ordered middleware pipeline.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    stages: Vec<Middleware>,
}

impl MiddlewareChain {
    pub fn new(stages: Vec<Middleware>) -> Self {
        MiddlewareChain { stages }
    }

    /// Append a stage; it runs after every stage already present.
    pub fn push(&mut self, stage: Middleware) {
        self.stages.push(stage);
    }

    /// Run every stage in order, each seeing the previous stage's output.
    pub fn apply(&self, state: Value) -> Value {
        self.stages.iter().fold(state, |acc, stage| stage(acc))
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareChain")
            .field("stages", &self.stages.len())
            .finish()
    }
}

/// Extension hook run once at store construction.
pub trait Plugin: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Called with the fully constructed store.
    fn on_init(&self, _store: &Store) {}

    /// Middleware appended to the chain after `on_init`.
    fn middleware(&self) -> Option<Middleware> {
        None
    }
}
