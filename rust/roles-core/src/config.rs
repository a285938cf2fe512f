// rust/roles-core/src/config.rs

//! Configuration management for role-based workers.
//!
//! This module provides configuration parsing from TOML files, environment
//! variable overrides, and validation of configuration values.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::assignment::RoleAssignment;
use crate::error::{Result, RoleError};
use crate::identity::Identity;

// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RolesConfig {
    pub worker: WorkerConfig,
    pub rendezvous: RendezvousConfig,
    pub rpc: RpcConfig,
}

/// Declared placement of this worker process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Global worker name. Defaults to `<role>_<role_rank>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    // Global rank of this process (RANK).
    pub rank: u32,
    // Number of worker processes in the application (WORLD_SIZE).
    pub world_size: u32,
    /// Role of this worker, when no role assignment is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Rank within the role, when no role assignment is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_rank: Option<u32>,
    /// Role assignment for every rank, e.g. "trainer:2,ps:2".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<RoleAssignment>,
    // Workers of the same role co-located on this host (LOCAL_WORLD_SIZE).
    pub local_world_size: u32,
}

// Rendezvous store options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendezvousConfig {
    /// Address of the TCP rendezvous store ("host:port").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Prefix for every key this application writes.
    pub key_prefix: String,
    /// Startup deadline in milliseconds for the whole directory exchange.
    pub timeout_ms: u64,
    /// Initial delay (milliseconds) between polls for missing peers.
    pub poll_initial_delay_ms: u64,
    /// Maximum delay (milliseconds) between polls for missing peers.
    pub poll_max_delay_ms: u64,
    /// Whether to wait for every worker to finish building its directory.
    pub barrier: bool,
    /// Maximum number of connection attempts to the TCP store.
    pub connect_retries: u32,
    /// Initial delay (milliseconds) between connection attempts.
    pub connect_retry_delay_ms: u64,
}

// RPC options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    // Deadline applied to calls that do not specify one.
    pub default_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: None,
            rank: 0,
            world_size: 1,
            role: None,
            role_rank: None,
            roles: None,
            local_world_size: 1,
        }
    }
}

impl Default for RendezvousConfig {
    fn default() -> Self {
        Self {
            address: None,
            key_prefix: "roles".to_string(),
            timeout_ms: 300_000,
            poll_initial_delay_ms: 10,
            poll_max_delay_ms: 1_000,
            barrier: true,
            connect_retries: 5,
            connect_retry_delay_ms: 100,
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 60_000,
        }
    }
}

impl RendezvousConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Key under which the worker with `rank` publishes its registration.
    pub fn rank_key(&self, rank: u32) -> String {
        format!("{}/rank/{}", self.key_prefix, rank)
    }

    /// Counter incremented by every worker once its directory is complete.
    pub fn barrier_key(&self) -> String {
        format!("{}/joined", self.key_prefix)
    }
}

impl RpcConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

impl WorkerConfig {
    /// Derives this worker's identity from the declared placement.
    ///
    /// # Errors
    ///
    /// Returns an error if the role cannot be determined, or if an explicit
    /// role contradicts the configured role assignment.
    pub fn identity(&self) -> Result<Identity> {
        let (role, role_rank) = match &self.roles {
            Some(assignment) => {
                let (role, role_rank) = assignment.resolve(self.rank).ok_or_else(|| {
                    RoleError::config(format!(
                        "rank {} is outside role assignment '{}'",
                        self.rank, assignment
                    ))
                })?;
                if let Some(declared) = &self.role {
                    if declared != role {
                        return Err(RoleError::config(format!(
                            "worker.role '{}' contradicts role assignment '{}' for rank {}",
                            declared, assignment, self.rank
                        )));
                    }
                }
                if let Some(declared) = self.role_rank {
                    if declared != role_rank {
                        return Err(RoleError::config(format!(
                            "worker.role_rank {} contradicts role assignment '{}' for rank {}",
                            declared, assignment, self.rank
                        )));
                    }
                }
                (role.to_string(), role_rank)
            }
            None => {
                let role = self.role.clone().ok_or_else(|| {
                    RoleError::config("worker.role is required when worker.roles is not set")
                })?;
                let role_rank = self.role_rank.ok_or_else(|| {
                    RoleError::config("worker.role_rank is required when worker.roles is not set")
                })?;
                (role, role_rank)
            }
        };

        let name = self
            .name
            .clone()
            .unwrap_or_else(|| format!("{}_{}", role, role_rank));

        Ok(Identity::new(name, self.rank, role, role_rank))
    }
}

impl FromStr for RolesConfig {
    type Err = RoleError;

    /// Parse configuration from a TOML string.
    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| RoleError::config_with_source("failed to parse TOML config", e))
    }
}

impl RolesConfig {
    // Load configuration from a TOML file.
    //
    // # Errors
    //
    // Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RoleError::config_with_source(
                format!("failed to read config file '{}'", path.display()),
                e,
            )
        })?;
        let config: Self = content.parse()?;
        config.validate()?;
        Ok(config)
    }

    /// Builds a configuration purely from the environment.
    ///
    /// Unlike [`RolesConfig::with_env_overrides`], `RANK` and `WORLD_SIZE`
    /// must be present and parse as integers.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or malformed, or
    /// if the resulting configuration is invalid.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default().with_env_overrides();
        config.worker.rank = required_env("RANK")?;
        config.worker.world_size = required_env("WORLD_SIZE")?;
        config.validate()?;
        Ok(config)
    }

    // Apply environment variable overrides.
    //
    // The launcher-provided `RANK`, `WORLD_SIZE` and `LOCAL_WORLD_SIZE`
    // variables override the worker placement. Everything else is prefixed
    // with `ROLES_` and uses underscores to separate nested fields, e.g.
    // `ROLES_RENDEZVOUS_ADDRESS` overrides `rendezvous.address`.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        // Worker overrides
        if let Ok(val) = std::env::var("RANK") {
            if let Ok(v) = val.parse() {
                self.worker.rank = v;
            }
        }
        if let Ok(val) = std::env::var("WORLD_SIZE") {
            if let Ok(v) = val.parse() {
                self.worker.world_size = v;
            }
        }
        if let Ok(val) = std::env::var("LOCAL_WORLD_SIZE") {
            if let Ok(v) = val.parse() {
                self.worker.local_world_size = v;
            }
        }
        if let Ok(val) = std::env::var("ROLES_WORKER_NAME") {
            self.worker.name = Some(val);
        }
        if let Ok(val) = std::env::var("ROLES_WORKER_ROLE") {
            self.worker.role = Some(val);
        }
        if let Ok(val) = std::env::var("ROLES_WORKER_ROLE_RANK") {
            if let Ok(v) = val.parse() {
                self.worker.role_rank = Some(v);
            }
        }
        if let Ok(val) = std::env::var("ROLES_WORKER_ROLES") {
            if let Ok(v) = val.parse() {
                self.worker.roles = Some(v);
            }
        }

        // Rendezvous overrides
        if let Ok(val) = std::env::var("ROLES_RENDEZVOUS_ADDRESS") {
            self.rendezvous.address = Some(val);
        }
        if let Ok(val) = std::env::var("ROLES_RENDEZVOUS_KEY_PREFIX") {
            self.rendezvous.key_prefix = val;
        }
        if let Ok(val) = std::env::var("ROLES_RENDEZVOUS_TIMEOUT_MS") {
            if let Ok(v) = val.parse() {
                self.rendezvous.timeout_ms = v;
            }
        }
        if let Ok(val) = std::env::var("ROLES_RENDEZVOUS_BARRIER") {
            if let Ok(v) = val.parse() {
                self.rendezvous.barrier = v;
            }
        }

        // RPC overrides
        if let Ok(val) = std::env::var("ROLES_RPC_DEFAULT_TIMEOUT_MS") {
            if let Ok(v) = val.parse() {
                self.rpc.default_timeout_ms = v;
            }
        }

        self
    }

    // Validate all configuration values.
    //
    // # Errors
    //
    // Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        // Worker validation
        if self.worker.world_size == 0 {
            return Err(RoleError::config("worker.world_size must be greater than 0"));
        }
        if self.worker.rank >= self.worker.world_size {
            return Err(RoleError::config(format!(
                "worker.rank {} must be less than worker.world_size {}",
                self.worker.rank, self.worker.world_size
            )));
        }
        if self.worker.local_world_size == 0 {
            return Err(RoleError::config(
                "worker.local_world_size must be greater than 0",
            ));
        }
        if let Some(name) = &self.worker.name {
            if name.is_empty() {
                return Err(RoleError::config("worker.name must not be empty"));
            }
        }
        if let Some(role) = &self.worker.role {
            if role.is_empty() {
                return Err(RoleError::config("worker.role must not be empty"));
            }
        }
        if let Some(assignment) = &self.worker.roles {
            if assignment.world_size() != self.worker.world_size {
                return Err(RoleError::config(format!(
                    "worker.roles '{}' describes {} workers but worker.world_size is {}",
                    assignment,
                    assignment.world_size(),
                    self.worker.world_size
                )));
            }
        }
        if let Some(role_rank) = self.worker.role_rank {
            if role_rank >= self.worker.world_size {
                return Err(RoleError::config(
                    "worker.role_rank must be less than worker.world_size",
                ));
            }
        }
        self.worker.identity()?;

        // Rendezvous validation
        if self.rendezvous.key_prefix.is_empty() {
            return Err(RoleError::config("rendezvous.key_prefix must not be empty"));
        }
        if self.rendezvous.timeout_ms == 0 {
            return Err(RoleError::config(
                "rendezvous.timeout_ms must be greater than 0",
            ));
        }
        if self.rendezvous.poll_initial_delay_ms == 0 {
            return Err(RoleError::config(
                "rendezvous.poll_initial_delay_ms must be greater than 0",
            ));
        }
        if self.rendezvous.poll_max_delay_ms < self.rendezvous.poll_initial_delay_ms {
            return Err(RoleError::config(
                "rendezvous.poll_max_delay_ms must not be less than rendezvous.poll_initial_delay_ms",
            ));
        }
        if let Some(address) = &self.rendezvous.address {
            if address.is_empty() {
                return Err(RoleError::config("rendezvous.address must not be empty"));
            }
        }

        // RPC validation
        if self.rpc.default_timeout_ms == 0 {
            return Err(RoleError::config(
                "rpc.default_timeout_ms must be greater than 0",
            ));
        }

        Ok(())
    }
}

fn required_env<T: FromStr>(name: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let val = std::env::var(name).map_err(|e| {
        RoleError::config_with_source(format!("environment variable {} is required", name), e)
    })?;
    val.parse().map_err(|e| {
        RoleError::config_with_source(
            format!("environment variable {}='{}' is not a valid integer", name, val),
            e,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn trainer_config() -> RolesConfig {
        let mut config = RolesConfig::default();
        config.worker.role = Some("trainer".to_string());
        config.worker.role_rank = Some(0);
        config
    }

    #[test]
    fn test_default_config() {
        let config = RolesConfig::default();

        assert!(config.worker.name.is_none());
        assert_eq!(config.worker.rank, 0);
        assert_eq!(config.worker.world_size, 1);
        assert_eq!(config.worker.local_world_size, 1);
        assert!(config.worker.roles.is_none());

        assert!(config.rendezvous.address.is_none());
        assert_eq!(config.rendezvous.key_prefix, "roles");
        assert_eq!(config.rendezvous.timeout_ms, 300_000);
        assert!(config.rendezvous.barrier);

        assert_eq!(config.rpc.default_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_default_requires_role() {
        // Without a role the worker cannot derive an identity
        let result = RolesConfig::default().validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("worker.role"));

        assert!(trainer_config().validate().is_ok());
    }

    #[test]
    fn test_keys() {
        let config = RendezvousConfig::default();
        assert_eq!(config.rank_key(3), "roles/rank/3");
        assert_eq!(config.barrier_key(), "roles/joined");
    }

    #[test]
    fn test_identity_from_explicit_role() {
        let mut config = trainer_config();
        config.worker.world_size = 2;
        config.worker.rank = 1;
        config.worker.role_rank = Some(1);

        let id = config.worker.identity().unwrap();
        assert_eq!(id.global_name(), "trainer_1");
        assert_eq!(id.global_rank(), 1);
        assert_eq!(id.role_name(), "trainer");
        assert_eq!(id.role_rank(), 1);
    }

    #[test]
    fn test_identity_from_assignment() {
        let toml = r#"
            [worker]
            name = "w3"
            rank = 3
            world_size = 4
            roles = "trainer:2,ps:2"
        "#;
        let config: RolesConfig = toml.parse().unwrap();
        assert!(config.validate().is_ok());

        let id = config.worker.identity().unwrap();
        assert_eq!(id.global_name(), "w3");
        assert_eq!(id.role_name(), "ps");
        assert_eq!(id.role_rank(), 1);
    }

    #[test]
    fn test_identity_contradicting_assignment() {
        let mut config = RolesConfig::default();
        config.worker.world_size = 2;
        config.worker.roles = Some("trainer:1,ps:1".parse().unwrap());
        config.worker.role = Some("ps".to_string());

        let result = config.worker.identity();
        assert!(result.unwrap_err().to_string().contains("contradicts"));
    }

    #[test]
    fn test_validate_assignment_world_size_mismatch() {
        let mut config = RolesConfig::default();
        config.worker.world_size = 3;
        config.worker.roles = Some("trainer:2,ps:2".parse().unwrap());

        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("describes 4 workers"));
    }

    #[test]
    fn test_validate_rank_out_of_range() {
        let mut config = trainer_config();
        config.worker.rank = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_invalid_world_size() {
        let mut config = trainer_config();
        config.worker.world_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_invalid_timeouts() {
        let mut config = trainer_config();
        config.rpc.default_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = trainer_config();
        config.rendezvous.timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = trainer_config();
        config.rendezvous.poll_max_delay_ms = 1;
        config.rendezvous.poll_initial_delay_ms = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_empty_prefix() {
        let mut config = trainer_config();
        config.rendezvous.key_prefix = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_str_full() {
        let toml = r#"
            [worker]
            rank = 2
            world_size = 4
            role = "ps"
            role_rank = 0
            local_world_size = 2

            [rendezvous]
            address = "10.0.0.1:29400"
            key_prefix = "job-7"
            timeout_ms = 5000
            poll_initial_delay_ms = 5
            poll_max_delay_ms = 50
            barrier = false

            [rpc]
            default_timeout_ms = 1500
        "#;

        let config: RolesConfig = toml.parse().unwrap();
        assert!(config.validate().is_ok());

        assert_eq!(config.worker.rank, 2);
        assert_eq!(config.worker.local_world_size, 2);
        assert_eq!(config.rendezvous.address.as_deref(), Some("10.0.0.1:29400"));
        assert_eq!(config.rendezvous.rank_key(2), "job-7/rank/2");
        assert_eq!(config.rendezvous.timeout(), Duration::from_secs(5));
        assert!(!config.rendezvous.barrier);
        assert_eq!(config.rpc.default_timeout(), Duration::from_millis(1500));
    }

    #[test]
    fn test_from_str_invalid_toml() {
        let result: std::result::Result<RolesConfig, _> = "invalid = [".parse();
        assert!(result.is_err());
    }

    #[test]
    fn test_from_str_invalid_assignment() {
        let result: std::result::Result<RolesConfig, _> = r#"
            [worker]
            roles = "trainer"
        "#
        .parse();
        assert!(result.is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [worker]
            role = "trainer"
            role_rank = 0
            "#
        )
        .unwrap();

        let config = RolesConfig::from_file(file.path()).unwrap();
        assert_eq!(config.worker.role.as_deref(), Some("trainer"));
    }

    #[test]
    fn test_from_file_not_found() {
        let result = RolesConfig::from_file("/nonexistent/roles.toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_serialize_roundtrip() {
        let mut original = trainer_config();
        original.worker.roles = Some("trainer:1".parse().unwrap());
        let toml_str = toml::to_string(&original).unwrap();
        let parsed: RolesConfig = toml_str.parse().unwrap();

        assert_eq!(original.worker.roles, parsed.worker.roles);
        assert_eq!(original.rendezvous.key_prefix, parsed.rendezvous.key_prefix);
        assert_eq!(original.rpc.default_timeout_ms, parsed.rpc.default_timeout_ms);
    }

    // Helper to clear every variable these tests touch
    fn clear_env_vars() {
        for key in ["RANK", "WORLD_SIZE", "LOCAL_WORLD_SIZE"] {
            std::env::remove_var(key);
        }
        for (key, _) in std::env::vars() {
            if key.starts_with("ROLES_") {
                std::env::remove_var(&key);
            }
        }
    }

    // Environment variable tests are combined into a single test to avoid
    // race conditions when tests run in parallel, since env vars are global state.
    #[test]
    fn test_env_overrides() {
        clear_env_vars();

        // Strict loading fails without RANK / WORLD_SIZE
        let result = RolesConfig::from_env();
        assert!(result.unwrap_err().to_string().contains("RANK"));

        // Valid overrides
        std::env::set_var("RANK", "2");
        std::env::set_var("WORLD_SIZE", "4");
        std::env::set_var("LOCAL_WORLD_SIZE", "2");
        std::env::set_var("ROLES_WORKER_ROLES", "trainer:2,ps:2");
        std::env::set_var("ROLES_RENDEZVOUS_ADDRESS", "127.0.0.1:29400");
        std::env::set_var("ROLES_RPC_DEFAULT_TIMEOUT_MS", "250");

        let config = RolesConfig::from_env().unwrap();
        assert_eq!(config.worker.rank, 2);
        assert_eq!(config.worker.world_size, 4);
        assert_eq!(config.worker.local_world_size, 2);
        assert_eq!(config.rendezvous.address.as_deref(), Some("127.0.0.1:29400"));
        assert_eq!(config.rpc.default_timeout_ms, 250);
        assert_eq!(config.worker.identity().unwrap().role_name(), "ps");

        // Invalid values are ignored by the lenient overrides...
        std::env::set_var("ROLES_RPC_DEFAULT_TIMEOUT_MS", "soon");
        let config = RolesConfig::default().with_env_overrides();
        assert_eq!(config.rpc.default_timeout_ms, 60_000);

        // ...but rejected by strict loading
        std::env::set_var("WORLD_SIZE", "four");
        let result = RolesConfig::from_env();
        assert!(result.unwrap_err().to_string().contains("WORLD_SIZE"));

        clear_env_vars();
    }
}
