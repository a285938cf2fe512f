// rust/roles-core/src/error.rs

use std::time::Duration;

use thiserror::Error;

use crate::future::FanoutFailure;

#[derive(Error, Debug)]
pub enum RoleError {

    #[error("rendezvous timed out after {elapsed:?}: {present} of {world_size} workers registered (missing ranks: {missing:?})")]
    RendezvousTimeout {
        world_size: u32,
        present: u32,
        missing: Vec<u32>,
        elapsed: Duration,
    },

    #[error("Duplicate identity: {message}")]
    DuplicateIdentity {
        message: String,
    },

    #[error("Invalid role assignment for '{role}': {message}")]
    InvalidAssignment {
        role: String,
        message: String,
    },

    #[error("Unknown role '{role}'")]
    UnknownRole {
        role: String,
    },

    #[error("Rendezvous key '{key}' already exists")]
    KeyExists {
        key: String,
    },

    #[error("Rendezvous store error: {message}")]
    Rendezvous {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
    },

    #[error(transparent)]
    Fanout(#[from] FanoutFailure),
}

pub type Result<T> = std::result::Result<T, RoleError>;

// Convenience constructors
impl RoleError {

    pub fn duplicate(message: impl Into<String>) -> Self {
        Self::DuplicateIdentity {
            message: message.into(),
        }
    }

    pub fn invalid_assignment(role: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidAssignment {
            role: role.into(),
            message: message.into(),
        }
    }

    pub fn unknown_role(role: impl Into<String>) -> Self {
        Self::UnknownRole { role: role.into() }
    }

    pub fn key_exists(key: impl Into<String>) -> Self {
        Self::KeyExists { key: key.into() }
    }

    pub fn rendezvous(message: impl Into<String>) -> Self {
        Self::Rendezvous {
            message: message.into(),
            source: None,
        }
    }

    pub fn rendezvous_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Rendezvous {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Returns true for errors that indicate a misconfigured deployment and
    /// must abort startup rather than be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::RendezvousTimeout { .. }
                | Self::DuplicateIdentity { .. }
                | Self::InvalidAssignment { .. }
                | Self::Config { .. }
        )
    }
}

impl From<serde_json::Error> for RoleError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

/// Failure of a single remote call inside a fan-out.
///
/// These never abort a whole fan-out call; they are recorded in the
/// corresponding `PendingResult` entry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CallError {
    #[error("destination '{destination}' is unreachable: {reason}")]
    DestinationUnreachable { destination: String, reason: String },

    #[error("call to '{destination}' timed out after {timeout:?}")]
    TimedOut { destination: String, timeout: Duration },

    #[error("function '{fn_ref}' is not registered on '{destination}'")]
    UnknownFunction { destination: String, fn_ref: String },

    #[error("remote call on '{destination}' failed: {message}")]
    Remote { destination: String, message: String },

    #[error("call to '{destination}' was dropped before producing a result")]
    Dropped { destination: String },
}

impl CallError {
    pub fn unreachable(destination: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DestinationUnreachable {
            destination: destination.into(),
            reason: reason.into(),
        }
    }

    pub fn timed_out(destination: impl Into<String>, timeout: Duration) -> Self {
        Self::TimedOut {
            destination: destination.into(),
            timeout,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    /// Name of the worker the failed call was addressed to.
    pub fn destination(&self) -> &str {
        match self {
            Self::DestinationUnreachable { destination, .. }
            | Self::TimedOut { destination, .. }
            | Self::UnknownFunction { destination, .. }
            | Self::Remote { destination, .. }
            | Self::Dropped { destination } => destination,
        }
    }
}
