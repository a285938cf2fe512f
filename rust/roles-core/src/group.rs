// rust/roles-core/src/group.rs

//! Process group formed by the workers of one role.

use std::time::Duration;

use indexmap::IndexMap;
use serde_json::Value;

use crate::dispatch::FanoutDispatcher;
use crate::error::{Result, RoleError};
use crate::future::{wait_all, FutureSet};
use crate::identity::{Identity, RoleInfo};
use crate::transport::RemoteCall;

/// The members of the caller's role, with the caller's position in it.
///
/// Group rank is the role rank and group size the role world size.
#[derive(Clone)]
pub struct ProcessGroup {
    identity: Identity,
    info: RoleInfo,
    dispatcher: FanoutDispatcher,
}

impl ProcessGroup {
    /// Forms the group of `identity`'s role.
    ///
    /// # Errors
    ///
    /// Fails if `identity` is not the directory's record for its rank.
    pub fn for_role(dispatcher: FanoutDispatcher, identity: &Identity) -> Result<Self> {
        let directory = dispatcher.directory();
        if directory.identity(identity.global_rank()) != Some(identity) {
            return Err(RoleError::config(format!(
                "{} is not part of the role directory",
                identity
            )));
        }
        let info = directory.get_role_info(identity.role_name())?.clone();

        tracing::debug!(
            role = %info.role_name(),
            rank = identity.role_rank(),
            size = info.role_world_size(),
            "Formed role process group"
        );
        Ok(Self {
            identity: identity.clone(),
            info,
            dispatcher,
        })
    }

    pub fn role(&self) -> &str {
        self.info.role_name()
    }

    pub fn rank(&self) -> u32 {
        self.identity.role_rank()
    }

    pub fn size(&self) -> u32 {
        self.info.role_world_size()
    }

    pub fn local_world_size(&self) -> u32 {
        self.info.local_world_size()
    }

    pub fn is_leader(&self) -> bool {
        self.rank() == 0
    }

    pub fn leader(&self) -> Option<&Identity> {
        self.info.member(0)
    }

    pub fn members(&self) -> &[Identity] {
        self.info.members()
    }

    pub fn member(&self, rank: u32) -> Option<&Identity> {
        self.info.member(rank)
    }

    /// Members other than the caller, in group rank order.
    pub fn peers(&self) -> impl Iterator<Item = &Identity> {
        let rank = self.rank();
        self.info.members().iter().filter(move |m| m.role_rank() != rank)
    }

    /// Calls every group member, the caller included.
    pub fn call_async(&self, call: &RemoteCall, timeout: Option<Duration>) -> FutureSet {
        self.dispatcher.call_async_on(self.members(), call, timeout)
    }

    /// Calls every member except the caller.
    pub fn call_peers_async(&self, call: &RemoteCall, timeout: Option<Duration>) -> FutureSet {
        self.dispatcher.call_async_on(self.peers(), call, timeout)
    }

    pub async fn call_sync(
        &self,
        call: &RemoteCall,
        timeout: Option<Duration>,
    ) -> Result<IndexMap<String, Value>> {
        let mut futures = self.call_async(call, timeout);
        Ok(wait_all(&mut futures).await?)
    }
}

impl std::fmt::Debug for ProcessGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessGroup")
            .field("role", &self.role())
            .field("rank", &self.rank())
            .field("size", &self.size())
            .finish()
    }
}
