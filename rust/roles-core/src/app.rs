// rust/roles-core/src/app.rs

//! Worker startup: from configuration to a ready fan-out dispatcher.

use std::sync::Arc;

use crate::config::{RolesConfig, RpcConfig};
use crate::directory::RoleDirectory;
use crate::dispatch::FanoutDispatcher;
use crate::error::Result;
use crate::group::ProcessGroup;
use crate::identity::{Identity, Registration};
use crate::rendezvous::{self, RendezvousStore};
use crate::transport::Transport;

/// A started worker.
pub struct App {
    config: RolesConfig,
    identity: Identity,
    directory: Arc<RoleDirectory>,
    dispatcher: FanoutDispatcher,
}

impl App {
    /// Starts this worker.
    ///
    /// `connect` creates the transport for the local identity. It runs before
    /// the worker registers, so any worker visible in the directory already
    /// accepts calls.
    ///
    /// # Errors
    ///
    /// Returns configuration errors, transport setup errors, and every
    /// directory construction error of [`RoleDirectory::build`].
    pub async fn init<F>(config: RolesConfig, store: &dyn RendezvousStore, connect: F) -> Result<Self>
    where
        F: FnOnce(&Identity, &RpcConfig) -> Result<Arc<dyn Transport>> + Send,
    {
        config.validate()?;
        let identity = config.worker.identity()?;

        tracing::info!(
            worker = %identity,
            world_size = config.worker.world_size,
            "Initializing worker"
        );

        let transport = connect(&identity, &config.rpc)?;

        let registration = Registration::new(
            identity.clone(),
            config.worker.world_size,
            config.worker.local_world_size,
        );
        let directory = Arc::new(RoleDirectory::build(store, &registration, &config.rendezvous).await?);
        let dispatcher = FanoutDispatcher::new(directory.clone(), transport);

        Ok(Self {
            config,
            identity,
            directory,
            dispatcher,
        })
    }

    /// Starts this worker from `RANK`, `WORLD_SIZE` and the `ROLES_*`
    /// variables, rendezvousing through the configured TCP store.
    pub async fn init_from_env<F>(connect: F) -> Result<Self>
    where
        F: FnOnce(&Identity, &RpcConfig) -> Result<Arc<dyn Transport>> + Send,
    {
        let config = RolesConfig::from_env()?;
        let store = rendezvous::connect(&config.rendezvous).await?;
        Self::init(config, store.as_ref(), connect).await
    }

    /// Forms the process group of this worker's role.
    pub fn init_process_group(&self) -> Result<ProcessGroup> {
        ProcessGroup::for_role(self.dispatcher.clone(), &self.identity)
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn directory(&self) -> &Arc<RoleDirectory> {
        &self.directory
    }

    pub fn dispatcher(&self) -> &FanoutDispatcher {
        &self.dispatcher
    }

    pub fn config(&self) -> &RolesConfig {
        &self.config
    }
}
