// rust/roles-core/src/directory.rs

//! Process-wide role registry.
//!
//! A [`RoleDirectory`] is assembled once at startup from the registrations
//! every worker publishes to the rendezvous store, and is read-only after
//! that. All workers that complete [`RoleDirectory::build`] hold identical
//! directories.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tokio::time::Instant;

use crate::config::RendezvousConfig;
use crate::error::{Result, RoleError};
use crate::identity::{Identity, Registration, RoleInfo};
use crate::rendezvous::RendezvousStore;
use crate::retry::RetryConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleDirectory {
    world_size: u32,
    roles: BTreeMap<String, RoleInfo>,
    // global rank -> (role, role rank)
    by_rank: Vec<(String, u32)>,
    by_name: HashMap<String, u32>,
}

impl RoleDirectory {
    /// Publishes `local` and waits until every declared worker has
    /// registered.
    ///
    /// # Errors
    ///
    /// - [`RoleError::DuplicateIdentity`] if another process already claimed
    ///   our rank, or the gathered registrations conflict.
    /// - [`RoleError::RendezvousTimeout`] if not every worker registered
    ///   before the rendezvous deadline.
    /// - [`RoleError::InvalidAssignment`] if role ranks are not dense.
    pub async fn build(
        store: &dyn RendezvousStore,
        local: &Registration,
        options: &RendezvousConfig,
    ) -> Result<Self> {
        let started = Instant::now();
        let deadline = started + options.timeout();
        let world_size = local.world_size;

        publish(store, local, options).await?;

        let registrations = gather(store, world_size, options, started, deadline).await?;
        let directory = Self::from_registrations(world_size, registrations)?;

        if directory.identity(local.identity.global_rank()) != Some(&local.identity) {
            return Err(RoleError::duplicate(format!(
                "rank {} is registered by another worker",
                local.identity.global_rank()
            )));
        }

        if options.barrier {
            barrier(store, world_size, options, started, deadline).await?;
        }

        tracing::info!(
            rank = local.identity.global_rank(),
            role = %local.identity.role_name(),
            world_size,
            roles = directory.roles.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Role directory built"
        );
        Ok(directory)
    }

    /// Assembles a directory from a complete set of registrations.
    ///
    /// # Errors
    ///
    /// Fails if a rank is missing or out of range, if two registrations share
    /// a global rank, a global name or a `(role, role_rank)` pair, if workers
    /// disagree on the world size, or if a role's ranks are not dense.
    pub fn from_registrations(
        world_size: u32,
        registrations: impl IntoIterator<Item = Registration>,
    ) -> Result<Self> {
        if world_size == 0 {
            return Err(RoleError::config("world size must be at least 1"));
        }

        let mut slots: Vec<Option<Registration>> = vec![None; world_size as usize];
        let mut names: HashMap<String, u32> = HashMap::new();
        let mut role_slots: HashMap<(String, u32), u32> = HashMap::new();

        for registration in registrations {
            let identity = &registration.identity;
            let rank = identity.global_rank();

            if registration.world_size != world_size {
                return Err(RoleError::invalid_assignment(
                    identity.role_name(),
                    format!(
                        "worker '{}' declares world size {}, expected {}",
                        identity.global_name(),
                        registration.world_size,
                        world_size
                    ),
                ));
            }
            if rank >= world_size {
                return Err(RoleError::invalid_assignment(
                    identity.role_name(),
                    format!(
                        "worker '{}' has rank {} outside world size {}",
                        identity.global_name(),
                        rank,
                        world_size
                    ),
                ));
            }
            if let Some(existing) = &slots[rank as usize] {
                return Err(RoleError::duplicate(format!(
                    "rank {} claimed by both '{}' and '{}'",
                    rank,
                    existing.identity.global_name(),
                    identity.global_name()
                )));
            }
            if let Some(other) = names.insert(identity.global_name().to_string(), rank) {
                return Err(RoleError::duplicate(format!(
                    "name '{}' used by ranks {} and {}",
                    identity.global_name(),
                    other,
                    rank
                )));
            }
            let role_slot = (identity.role_name().to_string(), identity.role_rank());
            if let Some(other) = role_slots.insert(role_slot, rank) {
                return Err(RoleError::duplicate(format!(
                    "{}[{}] claimed by ranks {} and {}",
                    identity.role_name(),
                    identity.role_rank(),
                    other,
                    rank
                )));
            }

            slots[rank as usize] = Some(registration);
        }

        let missing: Vec<u32> = (0..world_size)
            .filter(|rank| slots[*rank as usize].is_none())
            .collect();
        if !missing.is_empty() {
            return Err(RoleError::config(format!(
                "no registration for ranks {:?}",
                missing
            )));
        }

        let mut grouped: BTreeMap<String, Vec<Registration>> = BTreeMap::new();
        for registration in slots.into_iter().flatten() {
            grouped
                .entry(registration.identity.role_name().to_string())
                .or_default()
                .push(registration);
        }

        let mut roles = BTreeMap::new();
        let mut by_rank = vec![(String::new(), 0); world_size as usize];
        for (role, mut registrations) in grouped {
            registrations.sort_by_key(|r| r.identity.role_rank());

            for (expected, registration) in registrations.iter().enumerate() {
                let role_rank = registration.identity.role_rank();
                if role_rank as usize != expected {
                    return Err(RoleError::invalid_assignment(
                        role.as_str(),
                        format!(
                            "role ranks must be dense: expected {}, found {} ({})",
                            expected,
                            role_rank,
                            registration.identity.global_name()
                        ),
                    ));
                }
                by_rank[registration.identity.global_rank() as usize] = (role.clone(), role_rank);
            }

            let local_world_size = registrations[0].local_world_size;
            if let Some(other) = registrations
                .iter()
                .find(|r| r.local_world_size != local_world_size)
            {
                tracing::warn!(
                    role = %role,
                    expected = local_world_size,
                    found = other.local_world_size,
                    worker = %other.identity.global_name(),
                    "Inconsistent local_world_size within role, using the value of role rank 0"
                );
            }

            let members = registrations.into_iter().map(|r| r.identity).collect();
            roles.insert(
                role.clone(),
                RoleInfo {
                    role_name: role,
                    local_world_size,
                    members,
                },
            );
        }

        Ok(Self {
            world_size,
            roles,
            by_rank,
            by_name: names,
        })
    }

    /// Membership of `role`.
    ///
    /// # Errors
    ///
    /// Returns [`RoleError::UnknownRole`] if no worker declared the role.
    pub fn get_role_info(&self, role: &str) -> Result<&RoleInfo> {
        self.roles.get(role).ok_or_else(|| RoleError::unknown_role(role))
    }

    /// Global names of `role`'s members in role rank order.
    pub fn get_worker_names(&self, role: &str) -> Result<Vec<String>> {
        Ok(self.get_role_info(role)?.worker_names())
    }

    pub fn get_all_roles(&self) -> BTreeSet<String> {
        self.roles.keys().cloned().collect()
    }

    pub fn identity(&self, global_rank: u32) -> Option<&Identity> {
        let (role, role_rank) = self.by_rank.get(global_rank as usize)?;
        self.roles.get(role)?.member(*role_rank)
    }

    pub fn find(&self, global_name: &str) -> Option<&Identity> {
        self.by_name
            .get(global_name)
            .and_then(|rank| self.identity(*rank))
    }

    pub fn world_size(&self) -> u32 {
        self.world_size
    }

    /// Roles ordered by name.
    pub fn roles(&self) -> impl Iterator<Item = &RoleInfo> {
        self.roles.values()
    }
}

async fn publish(
    store: &dyn RendezvousStore,
    local: &Registration,
    options: &RendezvousConfig,
) -> Result<()> {
    let rank = local.identity.global_rank();
    let key = options.rank_key(rank);

    match store.put(&key, local.encode()?.into()).await {
        Ok(()) => {
            tracing::debug!(rank, key = %key, "Published registration");
            Ok(())
        }
        Err(RoleError::KeyExists { .. }) => {
            // Our own earlier record is fine, anyone else's is a conflict.
            let existing = match store.get(&key).await? {
                Some(bytes) => Registration::decode(&bytes)?,
                None => return Err(RoleError::rendezvous(format!("key '{}' vanished", key))),
            };
            if existing.instance == local.instance {
                return Ok(());
            }
            Err(RoleError::duplicate(format!(
                "rank {} already claimed by '{}' ({}[{}])",
                rank,
                existing.identity.global_name(),
                existing.identity.role_name(),
                existing.identity.role_rank()
            )))
        }
        Err(e) => Err(e),
    }
}

async fn gather(
    store: &dyn RendezvousStore,
    world_size: u32,
    options: &RendezvousConfig,
    started: Instant,
    deadline: Instant,
) -> Result<Vec<Registration>> {
    let retry = RetryConfig::polling(options);
    let mut slots: Vec<Option<Registration>> = vec![None; world_size as usize];
    let mut attempt = 0u32;

    loop {
        for (rank, slot) in slots.iter_mut().enumerate() {
            if slot.is_none() {
                let key = options.rank_key(rank as u32);
                if let Some(bytes) = store.get(&key).await? {
                    let registration = Registration::decode(&bytes)?;
                    if registration.identity.global_rank() != rank as u32 {
                        return Err(RoleError::duplicate(format!(
                            "{} holds the registration of {}",
                            key, registration.identity
                        )));
                    }
                    *slot = Some(registration);
                }
            }
        }

        let missing: Vec<u32> = slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(rank, _)| rank as u32)
            .collect();
        if missing.is_empty() {
            return Ok(slots.into_iter().flatten().collect());
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(RoleError::RendezvousTimeout {
                world_size,
                present: world_size - missing.len() as u32,
                missing,
                elapsed: now - started,
            });
        }

        tracing::debug!(missing = ?missing, attempt, "Waiting for workers to register");
        let delay = retry.delay_for_attempt(attempt).min(deadline - now);
        tokio::time::sleep(delay).await;
        attempt = attempt.saturating_add(1);
    }
}

// Every worker bumps the counter once and waits for the rest, so nobody
// starts calling peers that are still validating their own directory.
async fn barrier(
    store: &dyn RendezvousStore,
    world_size: u32,
    options: &RendezvousConfig,
    started: Instant,
    deadline: Instant,
) -> Result<()> {
    let key = options.barrier_key();
    let retry = RetryConfig::polling(options);
    let mut joined = store.add(&key, 1).await?;
    let mut attempt = 0u32;

    while joined < i64::from(world_size) {
        let now = Instant::now();
        if now >= deadline {
            return Err(RoleError::RendezvousTimeout {
                world_size,
                present: joined.clamp(0, i64::from(world_size)) as u32,
                missing: Vec::new(),
                elapsed: now - started,
            });
        }
        tracing::debug!(joined, world_size, "Waiting at rendezvous barrier");
        tokio::time::sleep(retry.delay_for_attempt(attempt).min(deadline - now)).await;
        attempt = attempt.saturating_add(1);
        joined = store.add(&key, 0).await?;
    }

    tracing::debug!(world_size, "Passed rendezvous barrier");
    Ok(())
}
