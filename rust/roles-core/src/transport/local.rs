// rust/roles-core/src/transport/local.rs

//! In-process transport.
//!
//! Workers sharing one process join a [`LocalNetwork`] and receive a
//! [`LocalTransport`]. Calls run the destination's registered handler on a
//! tokio task under the call deadline. Peers can be marked unreachable to
//! simulate failed hosts.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tokio::runtime::Handle;
use uuid::Uuid;

use super::{CallContext, FunctionRegistry, Handler, RemoteCall, RemoteRef, Transport};
use crate::error::CallError;
use crate::future::{CallResult, PendingResult};
use crate::identity::Identity;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

type RemoteObject = Shared<BoxFuture<'static, CallResult>>;

#[derive(Default)]
struct NetworkState {
    peers: HashMap<String, Peer>,
    objects: HashMap<Uuid, OwnedObject>,
}

struct OwnedObject {
    owner: String,
    object: RemoteObject,
}

struct Peer {
    identity: Identity,
    reachable: bool,
}

/// Hub connecting the workers of one process.
#[derive(Clone)]
pub struct LocalNetwork {
    state: Arc<RwLock<NetworkState>>,
    registry: Arc<FunctionRegistry>,
    default_timeout: Duration,
}

impl LocalNetwork {
    pub fn new(registry: FunctionRegistry) -> Self {
        Self {
            state: Arc::new(RwLock::new(NetworkState::default())),
            registry: Arc::new(registry),
            default_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Overrides the deadline used when a caller gives none.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Attaches a worker and returns the transport it calls through.
    pub fn join(&self, identity: Identity) -> LocalTransport {
        let name = identity.global_name().to_string();
        let previous = self.write().peers.insert(
            name.clone(),
            Peer {
                identity: identity.clone(),
                reachable: true,
            },
        );
        if previous.is_some() {
            tracing::warn!(worker = %name, "Worker re-joined the local network");
        }
        LocalTransport {
            local: identity,
            network: self.clone(),
        }
    }

    /// Returns false if no worker with that name has joined.
    pub fn set_reachable(&self, name: &str, reachable: bool) -> bool {
        match self.write().peers.get_mut(name) {
            Some(peer) => {
                peer.reachable = reachable;
                tracing::debug!(worker = %name, reachable, "Changed worker reachability");
                true
            }
            None => false,
        }
    }

    pub fn is_reachable(&self, name: &str) -> bool {
        self.read().peers.get(name).is_some_and(|peer| peer.reachable)
    }

    /// Detaches a worker and drops every remote object it owns.
    pub fn leave(&self, name: &str) {
        let mut state = self.write();
        state.peers.remove(name);
        let before = state.objects.len();
        state.objects.retain(|_, owned| owned.owner != name);
        let dropped = before - state.objects.len();
        if dropped > 0 {
            tracing::debug!(worker = %name, dropped, "Dropped remote objects of departed worker");
        }
    }

    /// Drops the network's handle on a remote object. Later fetches of
    /// `rref` fail. Returns false if the object was already released.
    pub fn release(&self, rref: &RemoteRef) -> bool {
        self.write().objects.remove(&rref.id()).is_some()
    }

    /// Waits for a remotely created object and returns its value.
    pub async fn fetch(&self, rref: &RemoteRef) -> CallResult {
        let owner = rref.owner().global_name();
        if !self.is_reachable(owner) {
            return Err(CallError::unreachable(owner, "owner is not reachable"));
        }
        let object = self.read().objects.get(&rref.id()).map(|owned| owned.object.clone());
        match object {
            Some(object) => object.await,
            None => Err(CallError::Remote {
                destination: owner.to_string(),
                message: format!("no remote object {}", rref.id()),
            }),
        }
    }

    fn route(&self, destination: &Identity, call: &RemoteCall) -> Result<Handler, CallError> {
        let name = destination.global_name();
        {
            let state = self.read();
            let peer = state
                .peers
                .get(name)
                .ok_or_else(|| CallError::unreachable(name, "no such worker on the network"))?;
            if !peer.reachable {
                return Err(CallError::unreachable(name, "worker is not reachable"));
            }
            if peer.identity != *destination {
                return Err(CallError::unreachable(
                    name,
                    format!("worker joined as {}", peer.identity),
                ));
            }
        }
        self.registry
            .get(call.fn_ref())
            .ok_or_else(|| CallError::UnknownFunction {
                destination: name.to_string(),
                fn_ref: call.fn_ref().to_string(),
            })
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, NetworkState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, NetworkState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Transport of one worker attached to a [`LocalNetwork`].
#[derive(Clone)]
pub struct LocalTransport {
    local: Identity,
    network: LocalNetwork,
}

impl LocalTransport {
    pub fn identity(&self) -> &Identity {
        &self.local
    }

    pub fn network(&self) -> &LocalNetwork {
        &self.network
    }

    fn context(&self, destination: &Identity, call: &RemoteCall) -> CallContext {
        CallContext {
            caller: self.local.clone(),
            callee: destination.clone(),
            args: call.args().to_vec(),
            kwargs: call.kwargs().clone(),
        }
    }
}

fn runtime(destination: &Identity) -> Result<Handle, CallError> {
    Handle::try_current().map_err(|_| {
        CallError::unreachable(destination.global_name(), "no async runtime to dispatch on")
    })
}

impl Transport for LocalTransport {
    fn default_timeout(&self) -> Duration {
        self.network.default_timeout
    }

    fn call_async(&self, destination: &Identity, call: &RemoteCall, timeout: Duration) -> PendingResult {
        let routed = self
            .network
            .route(destination, call)
            .and_then(|handler| Ok((handler, runtime(destination)?)));
        let (handler, runtime) = match routed {
            Ok(routed) => routed,
            Err(e) => return PendingResult::failed(destination.clone(), e),
        };

        let (sender, pending) = PendingResult::channel(destination.clone(), Some(timeout));
        let ctx = self.context(destination, call);
        let name = destination.global_name().to_string();

        runtime.spawn(async move {
            let result = match tokio::time::timeout(timeout, handler(ctx)).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(message)) => Err(CallError::Remote {
                    destination: name,
                    message,
                }),
                Err(_) => Err(CallError::timed_out(name, timeout)),
            };
            // The caller may have stopped waiting.
            let _ = sender.send(result);
        });

        pending
    }

    fn create_remote(&self, destination: &Identity, call: &RemoteCall) -> Result<RemoteRef, CallError> {
        let handler = self.network.route(destination, call)?;
        let runtime = runtime(destination)?;

        let rref = RemoteRef::new(destination.clone(), call.fn_ref().clone());
        let name = destination.global_name().to_string();
        let object: RemoteObject = handler(self.context(destination, call))
            .map(move |result| {
                result.map_err(|message| CallError::Remote {
                    destination: name,
                    message,
                })
            })
            .boxed()
            .shared();

        // Creation proceeds whether or not anyone fetches the object.
        runtime.spawn(object.clone());
        self.network.write().objects.insert(
            rref.id(),
            OwnedObject {
                owner: destination.global_name().to_string(),
                object,
            },
        );

        Ok(rref)
    }
}
