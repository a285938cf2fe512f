// rust/roles-core/src/dispatch.rs

//! Fan-out of one logical call to every member of a role.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use serde_json::Value;

use crate::directory::RoleDirectory;
use crate::error::{CallError, Result};
use crate::future::{wait_all, FutureSet, PendingResult};
use crate::identity::Identity;
use crate::transport::{RemoteCall, RemoteRef, Transport};

/// Expands a call on a role into one transport call per member.
///
/// Membership is read from the directory when the call is issued. Calls are
/// handed to the transport in role rank order without waiting on each
/// other; the only suspension point is waiting on the returned
/// [`FutureSet`].
#[derive(Clone)]
pub struct FanoutDispatcher {
    directory: Arc<RoleDirectory>,
    transport: Arc<dyn Transport>,
}

impl FanoutDispatcher {
    pub fn new(directory: Arc<RoleDirectory>, transport: Arc<dyn Transport>) -> Self {
        Self {
            directory,
            transport,
        }
    }

    pub fn directory(&self) -> &Arc<RoleDirectory> {
        &self.directory
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Calls `call` on every member of `role`.
    ///
    /// Unreachable members do not fail the call: their entries come back
    /// already failed. Without a timeout the transport's default applies.
    ///
    /// # Errors
    ///
    /// Returns [`RoleError::UnknownRole`](crate::RoleError::UnknownRole) if
    /// no worker holds `role`.
    pub fn call_async(
        &self,
        role: &str,
        call: &RemoteCall,
        timeout: Option<Duration>,
    ) -> Result<FutureSet> {
        let info = self.directory.get_role_info(role)?;
        Ok(self.call_async_on(info.members(), call, timeout))
    }

    /// Calls `call` on an explicit list of workers, keyed by global name in
    /// the order given.
    pub fn call_async_on<'a>(
        &self,
        members: impl IntoIterator<Item = &'a Identity>,
        call: &RemoteCall,
        timeout: Option<Duration>,
    ) -> FutureSet {
        let timeout = timeout.unwrap_or_else(|| self.transport.default_timeout());
        let mut futures = FutureSet::new();

        for member in members {
            let pending = self.transport.call_async(member, call, timeout);
            warn_if_settled_at_dispatch(&pending, call);
            futures.push(pending);
        }

        tracing::debug!(
            fn_ref = %call.fn_ref(),
            members = futures.len(),
            timeout_ms = timeout.as_millis() as u64,
            "Dispatched fan-out call"
        );
        futures
    }

    /// Creates one remote object per member of `role` and returns the
    /// handles without waiting for creation to finish.
    pub fn remote_create(
        &self,
        role: &str,
        call: &RemoteCall,
    ) -> Result<IndexMap<String, std::result::Result<RemoteRef, CallError>>> {
        let info = self.directory.get_role_info(role)?;
        let handles = info
            .members()
            .iter()
            .map(|member| {
                let handle = self.transport.create_remote(member, call);
                if let Err(e) = &handle {
                    tracing::warn!(
                        destination = %member.global_name(),
                        fn_ref = %call.fn_ref(),
                        error = %e,
                        "Remote create failed"
                    );
                }
                (member.global_name().to_string(), handle)
            })
            .collect();
        Ok(handles)
    }

    /// [`call_async`](Self::call_async) followed by [`wait_all`].
    ///
    /// # Errors
    ///
    /// `UnknownRole` as for `call_async`, or
    /// [`RoleError::Fanout`](crate::RoleError::Fanout) listing every member
    /// whose call failed or timed out.
    pub async fn call_sync(
        &self,
        role: &str,
        call: &RemoteCall,
        timeout: Option<Duration>,
    ) -> Result<IndexMap<String, Value>> {
        let mut futures = self.call_async(role, call, timeout)?;
        Ok(wait_all(&mut futures).await?)
    }
}

// Entries a transport hands back already failed or timed out never reach
// the network. Returns true if a warning was logged.
fn warn_if_settled_at_dispatch(pending: &PendingResult, call: &RemoteCall) -> bool {
    match pending.error() {
        Some(error) => {
            tracing::warn!(
                destination = %pending.destination().global_name(),
                fn_ref = %call.fn_ref(),
                status = ?pending.status(),
                error = %error,
                "Dispatch failed"
            );
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RoleError;
    use crate::future::CallStatus;
    use crate::identity::Registration;
    use crate::transport::{CallContext, FunctionRegistry, LocalNetwork};
    use serde_json::json;

    fn identities() -> Vec<Identity> {
        vec![
            Identity::new("w0", 0, "trainer", 0),
            Identity::new("w1", 1, "trainer", 1),
            Identity::new("w2", 2, "ps", 0),
            Identity::new("w3", 3, "ps", 1),
        ]
    }

    fn setup() -> (LocalNetwork, FanoutDispatcher) {
        let mut registry = FunctionRegistry::new();
        registry
            .register("echo", |ctx: CallContext| async move {
                Ok(ctx.arg(0).cloned().unwrap_or(Value::Null))
            })
            .register("rank", |ctx: CallContext| async move {
                Ok(json!(ctx.callee.global_rank()))
            });
        let network = LocalNetwork::new(registry).with_default_timeout(Duration::from_secs(5));

        let directory = RoleDirectory::from_registrations(
            4,
            identities().into_iter().map(|id| Registration::new(id, 4, 1)),
        )
        .unwrap();

        let mut transports: Vec<_> = identities().into_iter().map(|id| network.join(id)).collect();
        let transport: Arc<dyn Transport> = Arc::new(transports.remove(0));
        (network, FanoutDispatcher::new(Arc::new(directory), transport))
    }

    #[tokio::test]
    async fn test_call_async_keys_match_role() {
        let (_network, dispatcher) = setup();
        let futures = dispatcher
            .call_async("trainer", &RemoteCall::new("rank"), None)
            .unwrap();
        assert_eq!(futures.keys().collect::<Vec<_>>(), vec!["w0", "w1"]);
    }

    #[tokio::test]
    async fn test_call_sync() {
        let (_network, dispatcher) = setup();
        let values = dispatcher
            .call_sync("ps", &RemoteCall::new("echo").arg(42), None)
            .await
            .unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values["w2"], json!(42));
        assert_eq!(values["w3"], json!(42));
    }

    #[tokio::test]
    async fn test_unknown_role_fails_whole_call() {
        let (_network, dispatcher) = setup();
        let err = dispatcher
            .call_async("evaluator", &RemoteCall::new("echo"), None)
            .unwrap_err();
        assert!(matches!(err, RoleError::UnknownRole { .. }));

        assert!(dispatcher.remote_create("evaluator", &RemoteCall::new("echo")).is_err());
        assert!(dispatcher
            .call_sync("evaluator", &RemoteCall::new("echo"), None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_call_sync_surfaces_fanout_failure() {
        let (network, dispatcher) = setup();
        network.set_reachable("w1", false);

        let err = dispatcher
            .call_sync("trainer", &RemoteCall::new("rank"), None)
            .await
            .unwrap_err();
        match err {
            RoleError::Fanout(failure) => {
                assert_eq!(failure.failures().len(), 1);
                assert_eq!(failure.failures()[0].destination.global_name(), "w1");
                assert_eq!(failure.resolved_value("w0"), Some(&json!(0)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_call_async_on_subset() {
        let (_network, dispatcher) = setup();
        let members = identities();
        let mut futures = dispatcher.call_async_on(
            [&members[3], &members[1]],
            &RemoteCall::new("rank"),
            Some(Duration::from_secs(1)),
        );
        let values = wait_all(&mut futures).await.unwrap();
        assert_eq!(values.keys().collect::<Vec<_>>(), vec!["w3", "w1"]);
        assert_eq!(values["w3"], json!(3));
    }

    #[test]
    fn test_settled_entries_are_reported_at_dispatch() {
        let call = RemoteCall::new("echo");
        let member = identities().remove(2);

        let timed_out = PendingResult::failed(
            member.clone(),
            CallError::timed_out("w2", Duration::ZERO),
        );
        assert_eq!(timed_out.status(), CallStatus::TimedOut);
        assert!(warn_if_settled_at_dispatch(&timed_out, &call));

        let unreachable = PendingResult::failed(member.clone(), CallError::unreachable("w2", "down"));
        assert!(warn_if_settled_at_dispatch(&unreachable, &call));

        let (_tx, pending) = PendingResult::channel(member.clone(), None);
        assert!(!warn_if_settled_at_dispatch(&pending, &call));
        assert!(!warn_if_settled_at_dispatch(&PendingResult::resolved(member, json!(1)), &call));
    }

    #[tokio::test]
    async fn test_remote_create() {
        let (network, dispatcher) = setup();
        network.set_reachable("w3", false);

        let handles = dispatcher
            .remote_create("ps", &RemoteCall::new("echo").arg("table"))
            .unwrap();
        assert_eq!(handles.keys().collect::<Vec<_>>(), vec!["w2", "w3"]);
        assert!(handles["w3"].is_err());

        let rref = handles["w2"].as_ref().unwrap();
        assert_eq!(rref.owner().global_name(), "w2");
        assert_eq!(network.fetch(rref).await, Ok(json!("table")));
    }
}
