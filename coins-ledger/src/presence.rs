//! Presence and capability oracles
//!
//! The host game answers who is online and which flat multiplier grants a
//! player holds. The ledger only consumes these answers.

use crate::types::PlayerId;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Permission prefix granting a flat multiplier, e.g. `coins.multiplier.x3`
pub const MULTIPLIER_PERMISSION_PREFIX: &str = "coins.multiplier.x";

/// Which players are online, and under which names
pub trait Presence: Send + Sync {
    /// Whether the player is online
    fn is_online(&self, id: PlayerId) -> bool;

    /// Whether a player with this (case-insensitive) name is online
    fn is_online_by_name(&self, name: &str) -> bool;

    /// Name of an online or remembered player
    fn name_of(&self, id: PlayerId) -> Option<String>;

    /// Id of an online or remembered player
    fn id_of(&self, name: &str) -> Option<PlayerId>;

    /// Online players
    fn online_players(&self) -> Vec<PlayerId>;
}

/// Flat multiplier grants held by players
pub trait Capabilities: Send + Sync {
    /// Flat factor granted to the player, if any
    fn flat_multiplier(&self, id: PlayerId) -> Option<u32>;
}

/// Table-driven presence, updated by the host on join/quit
#[derive(Default)]
pub struct StaticPresence {
    players: RwLock<HashMap<PlayerId, (String, bool)>>,
}

impl StaticPresence {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a player online
    pub fn join(&self, id: PlayerId, name: impl Into<String>) {
        self.players.write().insert(id, (name.into(), true));
    }

    /// Mark a player offline; the name stays known
    pub fn quit(&self, id: PlayerId) {
        if let Some(entry) = self.players.write().get_mut(&id) {
            entry.1 = false;
        }
    }
}

impl Presence for StaticPresence {
    fn is_online(&self, id: PlayerId) -> bool {
        self.players.read().get(&id).map_or(false, |(_, online)| *online)
    }

    fn is_online_by_name(&self, name: &str) -> bool {
        self.players
            .read()
            .values()
            .any(|(known, online)| *online && known.eq_ignore_ascii_case(name))
    }

    fn name_of(&self, id: PlayerId) -> Option<String> {
        self.players.read().get(&id).map(|(name, _)| name.clone())
    }

    fn id_of(&self, name: &str) -> Option<PlayerId> {
        self.players
            .read()
            .iter()
            .find(|(_, (known, _))| known.eq_ignore_ascii_case(name))
            .map(|(id, _)| *id)
    }

    fn online_players(&self) -> Vec<PlayerId> {
        self.players
            .read()
            .iter()
            .filter(|(_, (_, online))| *online)
            .map(|(id, _)| *id)
            .collect()
    }
}

/// No player holds a flat multiplier
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCapabilities;

impl Capabilities for NoCapabilities {
    fn flat_multiplier(&self, _id: PlayerId) -> Option<u32> {
        None
    }
}

/// Capability lookup over raw permission grants
#[derive(Default)]
pub struct PermissionCapabilities {
    grants: RwLock<HashMap<PlayerId, Vec<String>>>,
}

impl PermissionCapabilities {
    /// Empty grant table
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the grants of a player
    pub fn set_grants(&self, id: PlayerId, grants: Vec<String>) {
        self.grants.write().insert(id, grants);
    }
}

impl Capabilities for PermissionCapabilities {
    fn flat_multiplier(&self, id: PlayerId) -> Option<u32> {
        self.grants
            .read()
            .get(&id)?
            .iter()
            .filter_map(|grant| parse_multiplier_permission(grant))
            .max()
    }
}

/// Factor of a `coins.multiplier.x<N>` grant
pub fn parse_multiplier_permission(permission: &str) -> Option<u32> {
    let prefix = permission.get(..MULTIPLIER_PERMISSION_PREFIX.len())?;
    if !prefix.eq_ignore_ascii_case(MULTIPLIER_PERMISSION_PREFIX) {
        return None;
    }
    permission[MULTIPLIER_PERMISSION_PREFIX.len()..]
        .parse::<u32>()
        .ok()
        .filter(|factor| *factor > 0)
}
