// rust/roles-core/src/identity.rs

//! Worker identities and per-role membership records.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one worker in the application.
///
/// Created once per worker process during startup and never modified.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    global_name: String,
    global_rank: u32,
    role_name: String,
    role_rank: u32,
}

impl Identity {
    pub fn new(
        global_name: impl Into<String>,
        global_rank: u32,
        role_name: impl Into<String>,
        role_rank: u32,
    ) -> Self {
        Self {
            global_name: global_name.into(),
            global_rank,
            role_name: role_name.into(),
            role_rank,
        }
    }

    /// Name unique across the whole application.
    pub fn global_name(&self) -> &str {
        &self.global_name
    }

    pub fn global_rank(&self) -> u32 {
        self.global_rank
    }

    pub fn role_name(&self) -> &str {
        &self.role_name
    }

    pub fn role_rank(&self) -> u32 {
        self.role_rank
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (rank {}, {}[{}])",
            self.global_name, self.global_rank, self.role_name, self.role_rank
        )
    }
}

/// Membership of a single role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleInfo {
    pub(crate) role_name: String,
    pub(crate) local_world_size: u32,
    pub(crate) members: Vec<Identity>,
}

impl RoleInfo {
    pub fn role_name(&self) -> &str {
        &self.role_name
    }

    /// Number of workers holding this role across the application.
    pub fn role_world_size(&self) -> u32 {
        self.members.len() as u32
    }

    /// Number of workers holding this role on one host, as declared by the
    /// deployment.
    pub fn local_world_size(&self) -> u32 {
        self.local_world_size
    }

    /// Members ordered by role rank: `members()[i].role_rank() == i`.
    pub fn members(&self) -> &[Identity] {
        &self.members
    }

    pub fn member(&self, role_rank: u32) -> Option<&Identity> {
        self.members.get(role_rank as usize)
    }

    pub fn worker_names(&self) -> Vec<String> {
        self.members
            .iter()
            .map(|m| m.global_name().to_string())
            .collect()
    }
}

/// Record a worker publishes to the rendezvous store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub identity: Identity,
    /// World size as declared by this worker; every worker must agree.
    pub world_size: u32,
    pub local_world_size: u32,
    /// Per-process token distinguishing our own record from another
    /// process that claims the same rank.
    pub instance: Uuid,
}

impl Registration {
    pub fn new(identity: Identity, world_size: u32, local_world_size: u32) -> Self {
        Self {
            identity,
            world_size,
            local_world_size,
            instance: Uuid::new_v4(),
        }
    }

    pub fn encode(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_accessors() {
        let id = Identity::new("w2", 2, "ps", 0);
        assert_eq!(id.global_name(), "w2");
        assert_eq!(id.global_rank(), 2);
        assert_eq!(id.role_name(), "ps");
        assert_eq!(id.role_rank(), 0);
        assert_eq!(id.to_string(), "w2 (rank 2, ps[0])");
    }

    #[test]
    fn test_registration_encoding() {
        let reg = Registration::new(Identity::new("w0", 0, "trainer", 0), 4, 2);
        let bytes = reg.encode().unwrap();
        let decoded = Registration::decode(&bytes).unwrap();
        assert_eq!(decoded, reg);
    }

    #[test]
    fn test_registration_decode_garbage() {
        let err = Registration::decode(b"not json").unwrap_err();
        assert!(matches!(err, crate::RoleError::Serialization { .. }));
    }

    #[test]
    fn test_registrations_get_distinct_instances() {
        let id = Identity::new("w0", 0, "trainer", 0);
        let a = Registration::new(id.clone(), 1, 1);
        let b = Registration::new(id, 1, 1);
        assert_ne!(a.instance, b.instance);
    }

    #[test]
    fn test_role_info_views() {
        let info = RoleInfo {
            role_name: "trainer".to_string(),
            local_world_size: 2,
            members: vec![
                Identity::new("w0", 0, "trainer", 0),
                Identity::new("w1", 1, "trainer", 1),
            ],
        };
        assert_eq!(info.role_world_size(), 2);
        assert_eq!(info.worker_names(), vec!["w0", "w1"]);
        assert_eq!(info.member(1).map(Identity::global_name), Some("w1"));
        assert!(info.member(2).is_none());
    }
}
