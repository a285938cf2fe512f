// rust/roles-core/src/transport/mod.rs

//! Point-to-point call capability used by the fan-out engine.
//!
//! A [`Transport`] delivers one [`RemoteCall`] to one destination and hands
//! back a [`PendingResult`] without waiting for the remote side. Functions
//! are referenced by name ([`FnRef`]) and resolved on the destination through
//! a [`FunctionRegistry`] that every worker builds identically.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::CallError;
use crate::future::PendingResult;
use crate::identity::Identity;

mod local;
mod registry;

pub use local::{LocalNetwork, LocalTransport};
pub use registry::{CallContext, FunctionRegistry, Handler, HandlerFuture};

/// Name of a function registered on every worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FnRef(String);

impl FnRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FnRef {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for FnRef {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// A function reference plus its arguments.
///
/// ```
/// use roles_core::RemoteCall;
///
/// let call = RemoteCall::new("echo").arg(42).kwarg("scale", 2.0);
/// assert_eq!(call.fn_ref().as_str(), "echo");
/// assert_eq!(call.args().len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCall {
    fn_ref: FnRef,
    #[serde(default)]
    args: Vec<Value>,
    #[serde(default)]
    kwargs: BTreeMap<String, Value>,
}

impl RemoteCall {
    pub fn new(fn_ref: impl Into<FnRef>) -> Self {
        Self {
            fn_ref: fn_ref.into(),
            args: Vec::new(),
            kwargs: BTreeMap::new(),
        }
    }

    /// Appends a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Sets a keyword argument, replacing an earlier value for the same key.
    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    pub fn fn_ref(&self) -> &FnRef {
        &self.fn_ref
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn kwargs(&self) -> &BTreeMap<String, Value> {
        &self.kwargs
    }
}

/// Handle to an object created on a remote worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteRef {
    owner: Identity,
    id: Uuid,
    fn_ref: FnRef,
}

impl RemoteRef {
    pub fn new(owner: Identity, fn_ref: FnRef) -> Self {
        Self {
            owner,
            id: Uuid::new_v4(),
            fn_ref,
        }
    }

    /// Worker holding the object.
    pub fn owner(&self) -> &Identity {
        &self.owner
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Function that created the object.
    pub fn fn_ref(&self) -> &FnRef {
        &self.fn_ref
    }
}

impl fmt::Display for RemoteRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner.global_name(), self.id)
    }
}

/// Capability to call functions on other workers.
///
/// Implementations must not block: `call_async` returns as soon as the call
/// is handed off, and dispatch failures are reported through an
/// already-failed [`PendingResult`] rather than an error.
pub trait Transport: Send + Sync {
    /// Deadline applied when the caller does not give one. Always finite.
    fn default_timeout(&self) -> Duration;

    fn call_async(&self, destination: &Identity, call: &RemoteCall, timeout: Duration) -> PendingResult;

    /// Starts creating an object on `destination` and returns its handle
    /// immediately.
    fn create_remote(&self, destination: &Identity, call: &RemoteCall) -> Result<RemoteRef, CallError>;
}
