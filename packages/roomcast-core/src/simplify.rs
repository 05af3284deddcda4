//! Payload simplification.
//!
//! Upstream event bodies are verbose; dashboards on dumb displays want a
//! handful of fields. A simplifier replaces the body with a compact form
//! and renames the event type with a `Simple` suffix so raw and simplified
//! consumers never collide on a topic.

use std::borrow::Cow;
use std::collections::HashMap;

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::sonos::messages::GroupsResponse;

/// Applies the registered simplifier for `event_type`, if any.
///
/// Returns the renamed type and the reshaped body, or `None` when no
/// simplifier is registered or the body does not parse (the raw event is
/// published unchanged in that case).
pub fn simplify(event_type: &str, body: &Value) -> Option<(String, Value)> {
    match event_type {
        "extendedPlaybackStatus" => simplify_extended_playback(body)
            .map(|body| ("extendedPlaybackStatusSimple".to_string(), body)),
        "groups" => simplify_groups(body).map(|body| ("playersSimple".to_string(), body)),
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// extendedPlaybackStatus
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct ExtendedPlaybackStatus {
    #[serde(default)]
    playback: PlaybackState,
    #[serde(default, alias = "Metadata")]
    metadata: PlaybackMetadata,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaybackState {
    #[serde(default)]
    playback_state: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaybackMetadata {
    #[serde(default)]
    current_item: CurrentItem,
}

#[derive(Debug, Default, Deserialize)]
struct CurrentItem {
    #[serde(default)]
    track: Track,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Track {
    #[serde(default)]
    name: String,
    #[serde(default)]
    image_url: String,
    #[serde(default)]
    album: Named,
    #[serde(default)]
    artist: Named,
    #[serde(default)]
    service: Named,
}

#[derive(Debug, Default, Deserialize)]
struct Named {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimpleExtendedPlaybackStatus {
    playback_state: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    artist: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    album: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    track: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    service: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    image_url: String,
}

fn simplify_extended_playback(body: &Value) -> Option<Value> {
    let status: ExtendedPlaybackStatus = serde_json::from_value(body.clone()).ok()?;

    // Buffering is transient; reporting it as playing cuts event noise.
    let mut playback_state = status.playback.playback_state;
    if playback_state == "PLAYBACK_STATE_BUFFERING" {
        playback_state = "PLAYBACK_STATE_PLAYING".to_string();
    }

    let track = status.metadata.current_item.track;

    // Image URLs arrive double-encoded upstream; decode twice.
    let image_url = percent_decode_twice(&track.image_url);

    let simple = SimpleExtendedPlaybackStatus {
        playback_state,
        artist: track.artist.name,
        album: track.album.name,
        track: track.name,
        service: track.service.name,
        image_url,
    };

    serde_json::to_value(simple).ok()
}

fn percent_decode_twice(input: &str) -> String {
    let once = percent_decode_once(input);
    percent_decode_once(&once).into_owned()
}

fn percent_decode_once(input: &str) -> Cow<'_, str> {
    match percent_decode_str(input).decode_utf8() {
        Ok(decoded) => decoded,
        Err(_) => Cow::Borrowed(input),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// groups
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
struct SimplePlayer {
    id: String,
    name: String,
}

#[derive(Debug, Serialize)]
struct SimpleGroup {
    id: String,
    players: Vec<SimplePlayer>,
}

fn simplify_groups(body: &Value) -> Option<Value> {
    let response: GroupsResponse = serde_json::from_value(body.clone()).ok()?;

    let all_players: HashMap<&str, SimplePlayer> = response
        .players
        .iter()
        .map(|p| {
            (
                p.id.as_str(),
                SimplePlayer {
                    id: p.id.clone(),
                    name: p.name.clone(),
                },
            )
        })
        .collect();

    let mut groups: Vec<SimpleGroup> = Vec::with_capacity(response.groups.len());
    for entry in &response.groups {
        let mut players: Vec<SimplePlayer> = Vec::new();

        if let Some(coordinator) = all_players.get(entry.coordinator_id.as_str()) {
            players.push(coordinator.clone());
        }
        for player_id in &entry.player_ids {
            if player_id == &entry.coordinator_id {
                continue;
            }
            if let Some(player) = all_players.get(player_id.as_str()) {
                players.push(player.clone());
            }
        }

        groups.push(SimpleGroup {
            id: entry.coordinator_id.clone(),
            players,
        });
    }

    serde_json::to_value(groups).ok()
}
