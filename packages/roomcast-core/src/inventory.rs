//! Read-only inventory view for the dashboard façade.
//!
//! The supervisor owns the group model; the façade reads a snapshot behind
//! a read-write lock. The supervisor takes the exclusive write lock only
//! for the atomic swap in Connecting, so reads never block it beyond that.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::groups::{GroupModel, PlayerSummary};
use crate::player::PlayerHandle;
use crate::sonos::messages::is_player_targeted;

/// A group as served to dashboards: coordinator id plus member summaries.
#[derive(Debug, Clone, Serialize)]
pub struct GroupView {
    pub id: String,
    pub players: Vec<PlayerSummary>,
}

/// Shared read view over the current [`GroupModel`].
#[derive(Clone, Default)]
pub struct Inventory {
    model: Arc<RwLock<Arc<GroupModel>>>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replaces the published model. Supervisor-only.
    pub fn swap(&self, model: Arc<GroupModel>) {
        *self.model.write() = model;
    }

    /// Snapshot of the current model.
    pub fn snapshot(&self) -> Arc<GroupModel> {
        Arc::clone(&self.model.read())
    }

    /// All groups, in deterministic coordinator-id order.
    pub fn list_groups(&self) -> Vec<GroupView> {
        let model = self.snapshot();
        model
            .groups_sorted()
            .into_iter()
            .map(|group| GroupView {
                id: group.coordinator.id().to_string(),
                players: group.member_summaries(),
            })
            .collect()
    }

    /// One group by coordinator id.
    pub fn get_group(&self, coordinator_id: &str) -> Option<GroupView> {
        let model = self.snapshot();
        model.get_group(coordinator_id).map(|group| GroupView {
            id: group.coordinator.id().to_string(),
            players: group.member_summaries(),
        })
    }

    /// Flattened players across all groups, each exactly once.
    pub fn list_players(&self) -> Vec<PlayerSummary> {
        self.snapshot().players_listing()
    }

    /// One player by id, searching all groups.
    pub fn get_player(&self, player_id: &str) -> Option<PlayerSummary> {
        let model = self.snapshot();
        model.get_player(player_id).map(|player| PlayerSummary {
            id: player.id().to_string(),
            name: player.name().to_string(),
        })
    }

    /// Resolves the player a namespaced call must target, plus the REST
    /// subpath segment for it.
    ///
    /// Player-targeted namespaces address the named player directly
    /// (`/players/{playerId}`); everything else addresses the group
    /// coordinator (`/groups/{groupId}`).
    pub fn resolve_player_for_namespace(
        &self,
        player_id: &str,
        namespace: &str,
    ) -> Option<(Arc<PlayerHandle>, String)> {
        let model = self.snapshot();
        let group = model.group_for_player(player_id)?;

        if is_player_targeted(namespace) {
            let player = Arc::clone(group.members.get(player_id)?);
            let segment = format!("/players/{}", player.id());
            Some((player, segment))
        } else {
            let coordinator = Arc::clone(&group.coordinator);
            let segment = format!("/groups/{}", coordinator.group_id());
            Some((coordinator, segment))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groups::tests::groups_response;

    fn inventory() -> Inventory {
        let model = GroupModel::from_groups_response(
            "HH1",
            &groups_response(
                &[("G1:1", "P1", &["P1", "P2"]), ("G3:1", "P3", &["P3"])],
                &[("P1", "Kitchen"), ("P2", "Office"), ("P3", "Bedroom")],
            ),
        );
        let inventory = Inventory::new();
        inventory.swap(Arc::new(model));
        inventory
    }

    #[test]
    fn groups_and_players_are_listed() {
        let inventory = inventory();

        let groups = inventory.list_groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].id, "P1");
        assert_eq!(groups[0].players.len(), 2);

        let players = inventory.list_players();
        assert_eq!(players.len(), 3);

        assert_eq!(inventory.get_player("P2").unwrap().name, "Office");
        assert!(inventory.get_player("P404").is_none());
        assert!(inventory.get_group("P2").is_none());
        assert_eq!(inventory.get_group("P3").unwrap().players.len(), 1);
    }

    #[test]
    fn group_namespaces_resolve_to_the_coordinator() {
        let inventory = inventory();

        let (player, segment) = inventory
            .resolve_player_for_namespace("P2", "groupVolume")
            .unwrap();
        assert_eq!(player.id(), "P1");
        assert_eq!(segment, "/groups/G1:1");
    }

    #[test]
    fn player_namespaces_resolve_to_the_player_itself() {
        let inventory = inventory();

        for namespace in ["settings", "playerVolume"] {
            let (player, segment) = inventory
                .resolve_player_for_namespace("P2", namespace)
                .unwrap();
            assert_eq!(player.id(), "P2");
            assert_eq!(segment, "/players/P2");
        }
    }

    #[test]
    fn unknown_players_do_not_resolve() {
        let inventory = inventory();
        assert!(inventory
            .resolve_player_for_namespace("P404", "playback")
            .is_none());
    }

    #[test]
    fn swap_replaces_the_snapshot_atomically() {
        let inventory = inventory();
        assert_eq!(inventory.list_players().len(), 3);

        inventory.swap(Arc::new(GroupModel::default()));
        assert!(inventory.list_players().is_empty());
        assert!(inventory.list_groups().is_empty());
    }
}
