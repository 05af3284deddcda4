//! Household group model.
//!
//! A [`GroupModel`] is an immutable snapshot built from a `/groups`
//! response: groups indexed by coordinator id with a derived player index.
//! Snapshots are compared structurally (coordinator ids + member id sets)
//! to decide whether the supervisor must reconnect; names and URLs do not
//! trigger reconnection.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;

use crate::player::PlayerHandle;
use crate::sonos::messages::GroupsResponse;

/// Compact player representation served to dashboards and published in
/// the players listing.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PlayerSummary {
    pub id: String,
    pub name: String,
}

/// A set of players playing in sync. The coordinator is included in
/// `members` for iteration convenience.
#[derive(Debug, Clone)]
pub struct Group {
    pub coordinator: Arc<PlayerHandle>,
    pub members: HashMap<String, Arc<PlayerHandle>>,
}

impl Group {
    /// Members as summaries, coordinator first, the rest sorted by id.
    pub fn member_summaries(&self) -> Vec<PlayerSummary> {
        let coordinator_id = self.coordinator.id();
        let mut rest: Vec<&Arc<PlayerHandle>> = self
            .members
            .values()
            .filter(|p| p.id() != coordinator_id)
            .collect();
        rest.sort_by(|a, b| a.id().cmp(b.id()));

        let mut summaries = Vec::with_capacity(self.members.len());
        summaries.push(PlayerSummary {
            id: self.coordinator.id().to_string(),
            name: self.coordinator.name().to_string(),
        });
        summaries.extend(rest.into_iter().map(|p| PlayerSummary {
            id: p.id().to_string(),
            name: p.name().to_string(),
        }));
        summaries
    }
}

/// Immutable snapshot of the household's groups, indexed by coordinator
/// id, with a derived player-id index.
#[derive(Debug, Clone, Default)]
pub struct GroupModel {
    groups: HashMap<String, Group>,
    player_to_coordinator: HashMap<String, String>,
}

impl GroupModel {
    /// Builds a model from a `/groups` response.
    ///
    /// Groups whose coordinator id is absent from the flat players list are
    /// skipped; unknown member ids are ignored. Every resolved member gets
    /// its `groupId`/`coordinatorId` assigned before the model is
    /// published, after which players are never mutated.
    pub fn from_groups_response(household_id: &str, response: &GroupsResponse) -> Self {
        let mut all_players: HashMap<String, Arc<PlayerHandle>> = HashMap::new();
        for entry in &response.players {
            // Group assignment is unknown until the groups are walked.
            let player = Arc::new(PlayerHandle::from_groups_player(entry, household_id, ""));
            all_players.insert(entry.id.clone(), player);
        }

        let mut groups: HashMap<String, Group> = HashMap::new();
        for entry in &response.groups {
            let Some(coordinator) = all_players.get(&entry.coordinator_id) else {
                log::warn!(
                    "[Groups] skipping group {}: unknown coordinator {}",
                    entry.id,
                    entry.coordinator_id
                );
                continue;
            };
            let coordinator = Arc::clone(coordinator);
            coordinator.set_coordinator(&entry.coordinator_id, &entry.id);

            let mut members: HashMap<String, Arc<PlayerHandle>> = HashMap::new();
            members.insert(coordinator.id().to_string(), Arc::clone(&coordinator));
            for player_id in &entry.player_ids {
                if let Some(player) = all_players.get(player_id) {
                    player.set_coordinator(&entry.coordinator_id, &entry.id);
                    members.insert(player_id.clone(), Arc::clone(player));
                }
            }

            groups.insert(
                entry.coordinator_id.clone(),
                Group {
                    coordinator,
                    members,
                },
            );
        }

        let mut player_to_coordinator = HashMap::new();
        for (coordinator_id, group) in &groups {
            for player_id in group.members.keys() {
                player_to_coordinator.insert(player_id.clone(), coordinator_id.clone());
            }
        }

        Self {
            groups,
            player_to_coordinator,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn get_group(&self, coordinator_id: &str) -> Option<&Group> {
        self.groups.get(coordinator_id)
    }

    pub fn group_for_player(&self, player_id: &str) -> Option<&Group> {
        let coordinator_id = self.player_to_coordinator.get(player_id)?;
        self.groups.get(coordinator_id)
    }

    pub fn get_player(&self, player_id: &str) -> Option<&Arc<PlayerHandle>> {
        self.group_for_player(player_id)?.members.get(player_id)
    }

    /// Groups in deterministic (coordinator id) order.
    pub fn groups_sorted(&self) -> Vec<&Group> {
        let sorted: BTreeMap<&String, &Group> = self.groups.iter().collect();
        sorted.into_values().collect()
    }

    /// Every coordinator, in deterministic order.
    pub fn coordinators(&self) -> Vec<Arc<PlayerHandle>> {
        self.groups_sorted()
            .into_iter()
            .map(|g| Arc::clone(&g.coordinator))
            .collect()
    }

    /// Flattened players listing (each player exactly once), sorted by id
    /// so repeated listings are byte-stable for deduplication.
    pub fn players_listing(&self) -> Vec<PlayerSummary> {
        let mut players: Vec<PlayerSummary> = self
            .groups
            .values()
            .flat_map(|g| g.members.values())
            .map(|p| PlayerSummary {
                id: p.id().to_string(),
                name: p.name().to_string(),
            })
            .collect();
        players.sort_by(|a, b| a.id.cmp(&b.id));
        players.dedup();
        players
    }

    /// Structural equivalence: same coordinator ids, and per coordinator
    /// the same member id sets. Names and URLs are ignored.
    pub fn equivalent(&self, other: &Self) -> bool {
        if self.groups.len() != other.groups.len() {
            return false;
        }

        for (coordinator_id, group) in &self.groups {
            let Some(other_group) = other.groups.get(coordinator_id) else {
                return false;
            };
            if group.members.len() != other_group.members.len() {
                return false;
            }
            for player_id in group.members.keys() {
                if !other_group.members.contains_key(player_id) {
                    return false;
                }
            }
        }

        true
    }

    /// Player ids present here but absent from `newer`.
    pub fn missing_players(&self, newer: &Self) -> Vec<String> {
        let mut missing: Vec<String> = self
            .player_to_coordinator
            .keys()
            .filter(|id| !newer.player_to_coordinator.contains_key(*id))
            .cloned()
            .collect();
        missing.sort();
        missing
    }

    /// Coordinator ids whose group disappears in `newer` or changes group
    /// identity (same coordinator, different group id).
    pub fn missing_groups(&self, newer: &Self) -> Vec<String> {
        let mut missing: Vec<String> = self
            .groups
            .iter()
            .filter(|(coordinator_id, group)| match newer.groups.get(*coordinator_id) {
                None => true,
                Some(newer_group) => {
                    newer_group.coordinator.group_id() != group.coordinator.group_id()
                }
            })
            .map(|(coordinator_id, _)| coordinator_id.clone())
            .collect();
        missing.sort();
        missing
    }

    /// Canonical form for assertions: `(coordinatorId, sorted memberIds)`
    /// sorted by coordinator id.
    pub fn canonical(&self) -> Vec<(String, Vec<String>)> {
        let mut canonical: Vec<(String, Vec<String>)> = self
            .groups
            .iter()
            .map(|(coordinator_id, group)| {
                let mut members: Vec<String> = group.members.keys().cloned().collect();
                members.sort();
                (coordinator_id.clone(), members)
            })
            .collect();
        canonical.sort();
        canonical
    }
}
