// rust/roles-core/src/transport/registry.rs

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use super::FnRef;
use crate::identity::Identity;

/// Future returned by a registered function. Errors are reported to the
/// caller as [`CallError::Remote`](crate::CallError::Remote).
pub type HandlerFuture = BoxFuture<'static, Result<Value, String>>;

pub type Handler = Arc<dyn Fn(CallContext) -> HandlerFuture + Send + Sync>;

/// Arguments and endpoints of one invocation, as seen by the handler.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub caller: Identity,
    pub callee: Identity,
    pub args: Vec<Value>,
    pub kwargs: BTreeMap<String, Value>,
}

impl CallContext {
    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    pub fn kwarg(&self, key: &str) -> Option<&Value> {
        self.kwargs.get(key)
    }
}

/// Table of callable functions, shared by every worker.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    handlers: HashMap<FnRef, Handler>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `name`, replacing any earlier handler.
    pub fn register<F, Fut>(&mut self, name: impl Into<FnRef>, handler: F) -> &mut Self
    where
        F: Fn(CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |ctx| handler(ctx).boxed());
        self.handlers.insert(name.into(), handler);
        self
    }

    pub fn get(&self, name: &FnRef) -> Option<Handler> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &FnRef) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.handlers.keys().map(FnRef::as_str).collect();
        names.sort_unstable();
        f.debug_struct("FunctionRegistry")
            .field("functions", &names)
            .finish()
    }
}
