//! Event router.
//!
//! Classifies inbound frames, reshapes payloads when simplification is on,
//! fans events out onto the broker topic tree, and suppresses redundant
//! publishes through the publish cache. The cache doubles as the record of
//! retained topics so vanished players and groups can be forgotten.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;

use crate::broker::Broker;
use crate::groups::GroupModel;
use crate::simplify::simplify;
use crate::sonos::messages::{GroupsResponse, WsResponse};

/// Routes events from the player transports onto broker topics.
///
/// Owned exclusively by the supervisor's control loop; publishes happen in
/// the order events are processed.
pub struct EventRouter {
    base_topic: String,
    simplify: bool,
    fanout: bool,
    broker: Arc<dyn Broker>,
    /// topic → last payload published there.
    cache: HashMap<String, Bytes>,
}

impl EventRouter {
    pub fn new(base_topic: &str, simplify: bool, fanout: bool, broker: Arc<dyn Broker>) -> Self {
        Self {
            base_topic: base_topic.to_string(),
            simplify,
            // Simplified payloads are meant for per-player dashboard
            // consumers, so simplify implies fan-out.
            fanout: fanout || simplify,
            broker,
            cache: HashMap::new(),
        }
    }

    /// Handles one inbound event.
    ///
    /// Returns a staged [`GroupModel`] when a `groups` event describes a
    /// topology that is not equivalent to `model`; the supervisor then
    /// re-enters Connecting.
    pub async fn handle_event(
        &mut self,
        model: &GroupModel,
        household_id: &str,
        source_player_id: &str,
        response: &WsResponse,
    ) -> Option<GroupModel> {
        let headers = &response.headers;

        // Subscription acknowledgements carry no payload worth relaying.
        if headers.response == "subscribe" {
            log::debug!(
                "[Router] subscribed to {} on {}",
                headers.common.namespace,
                source_player_id
            );
            return None;
        }

        if headers.event_type.is_empty()
            || headers.event_type == "none"
            || headers.event_type == "globalError"
        {
            log::info!(
                "[Router] ignoring {} frame from {}: response={}",
                if headers.event_type.is_empty() { "untyped" } else { headers.event_type.as_str() },
                source_player_id,
                headers.response
            );
            return None;
        }

        // A groups event may stage a topology change; its body is still
        // published below either way.
        let mut staged: Option<GroupModel> = None;
        if headers.event_type == "groups" {
            let parsed: GroupsResponse = match serde_json::from_value(response.body.clone()) {
                Ok(parsed) => parsed,
                Err(e) => {
                    log::warn!("[Router] dropping unparseable groups event: {}", e);
                    return None;
                }
            };
            let candidate = GroupModel::from_groups_response(household_id, &parsed);
            if !model.equivalent(&candidate) {
                log::info!(
                    "[Router] groups changed: {} -> {} group(s)",
                    model.len(),
                    candidate.len()
                );
                staged = Some(candidate);
            }
        }

        let (event_type, body) = if self.simplify {
            match simplify(&headers.event_type, &response.body) {
                Some((renamed, simplified)) => (renamed, simplified),
                None => (headers.event_type.clone(), response.body.clone()),
            }
        } else {
            (headers.event_type.clone(), response.body.clone())
        };

        let payload = match serde_json::to_vec(&body) {
            Ok(payload) => Bytes::from(payload),
            Err(e) => {
                log::warn!("[Router] unable to serialize event body: {}", e);
                return staged;
            }
        };

        // Fan-out policy: household scope without ids, group scope keyed by
        // coordinator (or spread across members), player scope as-is.
        if headers.common.group_id.is_empty() {
            if headers.common.player_id.is_empty() {
                let topic = format!("{}/{}", self.base_topic, event_type);
                self.publish(topic, payload).await;
            } else {
                let topic = format!(
                    "{}/player/{}/{}",
                    self.base_topic, headers.common.player_id, event_type
                );
                self.publish(topic, payload).await;
            }
        } else {
            let group = model
                .get_group(source_player_id)
                .or_else(|| model.group_for_player(source_player_id));

            match group {
                None => {
                    log::error!("[Router] event from unknown player {}", source_player_id);
                }
                Some(group) if self.fanout => {
                    let mut member_ids: Vec<&String> = group.members.keys().collect();
                    member_ids.sort();
                    for member_id in member_ids {
                        let topic = format!(
                            "{}/player/{}/{}",
                            self.base_topic, member_id, event_type
                        );
                        self.publish(topic, payload.clone()).await;
                    }
                }
                Some(group) => {
                    let topic = format!(
                        "{}/group/{}/{}",
                        self.base_topic,
                        group.coordinator.id(),
                        event_type
                    );
                    self.publish(topic, payload).await;
                }
            }
        }

        // The players listing always follows a groups event, from whichever
        // model is about to be current.
        if headers.event_type == "groups" {
            let listing_model = staged.as_ref().unwrap_or(model);
            self.publish_players_listing(listing_model).await;
        }

        staged
    }

    /// Publishes the flattened `[{id, name}]` players listing.
    pub async fn publish_players_listing(&mut self, model: &GroupModel) {
        let listing = model.players_listing();
        match serde_json::to_vec(&listing) {
            Ok(payload) => {
                let topic = format!("{}/players", self.base_topic);
                self.publish(topic, Bytes::from(payload)).await;
            }
            Err(e) => log::warn!("[Router] unable to serialize players listing: {}", e),
        }
    }

    /// Publishes to one topic with deduplication. All publishes are QoS 1
    /// and retained so late subscribers see current state.
    async fn publish(&mut self, topic: String, payload: Bytes) {
        if self.cache.get(&topic).is_some_and(|last| *last == payload) {
            log::debug!("[Router] unchanged payload, skipping {}", topic);
            return;
        }

        match self.broker.publish(&topic, payload.clone(), true).await {
            Ok(()) => {
                self.cache.insert(topic, payload);
            }
            // The cache keeps its old value so the next event republishes.
            Err(e) => log::error!("[Router] publish to {} failed: {}", topic, e),
        }
    }

    /// Clears retained topics for players and groups that no longer exist.
    ///
    /// Publishing an empty retained payload is the broker convention for
    /// "forget the retained value". Idempotent: entries are removed from
    /// the cache as they are cleared.
    pub async fn remove_stale_topics(
        &mut self,
        missing_players: &[String],
        missing_groups: &[String],
    ) {
        let mut prefixes: Vec<String> =
            Vec::with_capacity(missing_players.len() + missing_groups.len());
        for player_id in missing_players {
            prefixes.push(format!("{}/player/{}", self.base_topic, player_id));
        }
        for group_id in missing_groups {
            prefixes.push(format!("{}/group/{}", self.base_topic, group_id));
        }
        if prefixes.is_empty() {
            return;
        }
        log::info!("[Router] clearing retained topics under: {}", prefixes.join(","));

        let stale: Vec<String> = self
            .cache
            .keys()
            .filter(|topic| prefixes.iter().any(|prefix| topic.starts_with(prefix)))
            .cloned()
            .collect();

        for topic in stale {
            log::info!("[Router] clearing {}", topic);
            self.cache.remove(&topic);
            if let Err(e) = self.broker.publish(&topic, Bytes::new(), true).await {
                log::error!("[Router] clearing {} failed: {}", topic, e);
            }
        }
    }

    #[cfg(test)]
    fn cached_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.cache.keys().cloned().collect();
        topics.sort();
        topics
    }
}
