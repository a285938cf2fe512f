// rust/roles-core/src/assignment.rs

//! Static role assignment for a fixed world size.
//!
//! A role assignment is written as `"trainer:2,ps:2"`: roles are laid out
//! over global ranks in declaration order, so ranks 0 and 1 are trainers
//! (role ranks 0 and 1) and ranks 2 and 3 are parameter servers (role ranks
//! 0 and 1).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, RoleError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleAssignment {
    roles: Vec<(String, u32)>,
}

impl RoleAssignment {
    pub fn new(roles: Vec<(String, u32)>) -> Result<Self> {
        if roles.is_empty() {
            return Err(RoleError::config("role assignment must name at least one role"));
        }
        let mut total = 0u32;
        for (i, (name, count)) in roles.iter().enumerate() {
            if name.is_empty() {
                return Err(RoleError::config("role names must not be empty"));
            }
            if *count == 0 {
                return Err(RoleError::invalid_assignment(
                    name,
                    "role must have at least one worker",
                ));
            }
            if roles[..i].iter().any(|(other, _)| other == name) {
                return Err(RoleError::invalid_assignment(name, "role declared twice"));
            }
            total = total.checked_add(*count).ok_or_else(|| {
                RoleError::config(format!(
                    "role assignment exceeds the maximum world size of {}",
                    u32::MAX
                ))
            })?;
        }
        Ok(Self { roles })
    }

    /// Total number of workers the assignment describes. Never overflows:
    /// `new` rejects totals above `u32::MAX`.
    pub fn world_size(&self) -> u32 {
        self.roles.iter().map(|(_, count)| count).sum()
    }

    /// Resolves a global rank to its `(role, role_rank)`.
    pub fn resolve(&self, global_rank: u32) -> Option<(&str, u32)> {
        let mut start = 0u32;
        for (name, count) in &self.roles {
            if global_rank < start + count {
                return Some((name.as_str(), global_rank - start));
            }
            start += count;
        }
        None
    }

    pub fn roles(&self) -> impl Iterator<Item = (&str, u32)> {
        self.roles.iter().map(|(name, count)| (name.as_str(), *count))
    }
}

impl FromStr for RoleAssignment {
    type Err = RoleError;

    fn from_str(s: &str) -> Result<Self> {
        let mut roles = Vec::new();
        for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (name, count) = entry.split_once(':').ok_or_else(|| {
                RoleError::config(format!(
                    "role assignment entry '{}' must be of the form role:count",
                    entry
                ))
            })?;
            let count: u32 = count.trim().parse().map_err(|e| {
                RoleError::config_with_source(
                    format!("invalid worker count in role assignment entry '{}'", entry),
                    e,
                )
            })?;
            roles.push((name.trim().to_string(), count));
        }
        Self::new(roles)
    }
}

impl fmt::Display for RoleAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .roles
            .iter()
            .map(|(name, count)| format!("{}:{}", name, count))
            .collect();
        f.write_str(&parts.join(","))
    }
}

impl Serialize for RoleAssignment {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RoleAssignment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_resolve() {
        let assignment: RoleAssignment = "trainer:2, ps:2".parse().unwrap();
        assert_eq!(assignment.world_size(), 4);
        assert_eq!(assignment.resolve(0), Some(("trainer", 0)));
        assert_eq!(assignment.resolve(1), Some(("trainer", 1)));
        assert_eq!(assignment.resolve(2), Some(("ps", 0)));
        assert_eq!(assignment.resolve(3), Some(("ps", 1)));
        assert_eq!(assignment.resolve(4), None);
    }

    #[test]
    fn test_display_matches_input() {
        let assignment: RoleAssignment = "trainer:3,ps:1".parse().unwrap();
        assert_eq!(assignment.to_string(), "trainer:3,ps:1");
    }

    #[test]
    fn test_rejects_malformed_entries() {
        assert!("trainer".parse::<RoleAssignment>().is_err());
        assert!("trainer:x".parse::<RoleAssignment>().is_err());
        assert!("".parse::<RoleAssignment>().is_err());
        assert!(":2".parse::<RoleAssignment>().is_err());
    }

    #[test]
    fn test_rejects_empty_and_repeated_roles() {
        let err = "trainer:0".parse::<RoleAssignment>().unwrap_err();
        assert!(matches!(err, RoleError::InvalidAssignment { .. }));

        let err = "trainer:1,ps:1,trainer:2".parse::<RoleAssignment>().unwrap_err();
        assert!(err.to_string().contains("declared twice"));
    }

    #[test]
    fn test_rejects_overflowing_total() {
        let err = "trainer:4294967295,ps:1".parse::<RoleAssignment>().unwrap_err();
        assert!(matches!(err, RoleError::Config { .. }));

        let max: RoleAssignment = "trainer:4294967294,ps:1".parse().unwrap();
        assert_eq!(max.world_size(), u32::MAX);
        assert_eq!(max.resolve(u32::MAX - 1), Some(("ps", 0)));
        assert_eq!(max.resolve(u32::MAX), None);
    }

    #[test]
    fn test_serde_as_string() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            roles: RoleAssignment,
        }

        let parsed: Wrapper = toml::from_str(r#"roles = "trainer:2,ps:1""#).unwrap();
        assert_eq!(parsed.roles.world_size(), 3);

        let out = toml::to_string(&parsed).unwrap();
        assert!(out.contains("trainer:2,ps:1"));
    }
}
