// rust/roles-core/src/lib.rs

//! Role-based worker coordination - Core Library
//!
//! Workers register under named roles, discover each other once at startup
//! through a rendezvous store, and call functions on every member of a role
//! as one logical operation.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use roles_core::{wait_all, App, FunctionRegistry, LocalNetwork, RemoteCall, Transport};
//!
//! # async fn example() -> roles_core::Result<()> {
//! let network = LocalNetwork::new(FunctionRegistry::new());
//! let app = App::init_from_env(|identity, _rpc| {
//!     let transport: Arc<dyn Transport> = Arc::new(network.join(identity.clone()));
//!     Ok(transport)
//! })
//! .await?;
//!
//! let mut futures = app
//!     .dispatcher()
//!     .call_async("ps", &RemoteCall::new("echo").arg(42), None)?;
//! let values = wait_all(&mut futures).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod identity;

// Re-export commonly used types for convenience
pub use config::RolesConfig;
pub use error::{CallError, Result, RoleError};
pub use identity::{Identity, Registration, RoleInfo};

pub mod assignment;
pub use assignment::RoleAssignment;

pub mod directory;
pub use directory::RoleDirectory;

pub mod future;
pub use future::{wait_all, CallStatus, FanoutFailure, FutureSet, PendingResult, WaitAll};

pub mod transport;
pub use transport::{FnRef, FunctionRegistry, LocalNetwork, RemoteCall, RemoteRef, Transport};

pub mod dispatch;
pub use dispatch::FanoutDispatcher;

pub mod group;
pub use group::ProcessGroup;

pub mod app;
pub use app::App;

pub mod rendezvous;
pub use rendezvous::{InMemoryStore, RendezvousStore, TcpStoreClient};

pub mod retry;
