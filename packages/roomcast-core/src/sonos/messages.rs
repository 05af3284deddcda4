//! Wire types for the player control API.
//!
//! Players speak a framed protocol where every frame is a JSON array of
//! exactly two elements: `[headers, body]`. The same shapes travel over
//! the player websockets and (for the response types) over REST.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BridgeError, BridgeResult};

/// Namespaces whose commands target an individual player rather than its
/// group. Everything else is addressed to the group coordinator.
const PLAYER_TARGETED_NAMESPACES: &[&str] = &["settings", "playerVolume"];

/// Returns whether a namespace addresses the player itself.
pub fn is_player_targeted(namespace: &str) -> bool {
    PLAYER_TARGETED_NAMESPACES.contains(&namespace)
}

/// Derives the coordinator player id from a group id.
///
/// Group ids are coordinator ids with a `:{generation}` suffix.
pub fn coordinator_id_from_group_id(group_id: &str) -> String {
    match group_id.rfind(':') {
        Some(idx) if idx > 0 => group_id[..idx].to_string(),
        _ => group_id.to_string(),
    }
}

/// Derives a player's REST base URL from its websocket URL.
pub fn rest_url_from_websocket_url(websocket_url: &str) -> String {
    websocket_url
        .replace("wss", "https")
        .replace("/websocket", "")
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Headers common to requests and responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommonHeaders {
    /// Resource being accessed.
    pub namespace: String,
    pub command: String,

    /// Ids scoping the resource.
    #[serde(rename = "userId", default, skip_serializing_if = "String::is_empty")]
    pub user_id: String,
    #[serde(
        rename = "householdId",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub household_id: String,
    #[serde(rename = "groupId", default, skip_serializing_if = "String::is_empty")]
    pub group_id: String,
    #[serde(rename = "playerId", default, skip_serializing_if = "String::is_empty")]
    pub player_id: String,

    /// Correlates a response with its request; think of it as user data in
    /// a callback.
    #[serde(rename = "cmdId", default, skip_serializing_if = "String::is_empty")]
    pub cmd_id: String,

    /// Broker topic for dashboard subscription frames.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub topic: String,
}

/// Headers present on requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestHeaders {
    #[serde(flatten)]
    pub common: CommonHeaders,
}

/// Headers present on responses and events.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseHeaders {
    #[serde(flatten)]
    pub common: CommonHeaders,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub response: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub success: bool,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub event_type: String,
}

/// A request frame: parsed headers plus an opaque JSON body.
#[derive(Debug, Clone, Default)]
pub struct WsRequest {
    pub headers: RequestHeaders,
    pub body: Value,
}

/// A response or event frame: parsed headers plus an opaque JSON body.
///
/// The body stays a [`Value`] so each consumer parses only the payloads it
/// cares about.
#[derive(Debug, Clone, Default)]
pub struct WsResponse {
    pub headers: ResponseHeaders,
    pub body: Value,
}

impl WsRequest {
    pub fn to_raw_bytes(&self) -> BridgeResult<Vec<u8>> {
        encode_frame(&self.headers, &self.body)
    }

    pub fn from_raw_bytes(data: &[u8]) -> BridgeResult<Self> {
        let (headers, body) = decode_frame(data)?;
        Ok(Self { headers, body })
    }
}

impl WsResponse {
    pub fn to_raw_bytes(&self) -> BridgeResult<Vec<u8>> {
        encode_frame(&self.headers, &self.body)
    }

    pub fn from_raw_bytes(data: &[u8]) -> BridgeResult<Self> {
        let (headers, body) = decode_frame(data)?;
        Ok(Self { headers, body })
    }
}

/// Encodes a `[headers, body]` frame. A null body is normalized to `{}`.
fn encode_frame<H: Serialize>(headers: &H, body: &Value) -> BridgeResult<Vec<u8>> {
    let empty = Value::Object(serde_json::Map::new());
    let body = if body.is_null() { &empty } else { body };
    Ok(serde_json::to_vec(&(headers, body))?)
}

/// Decodes a `[headers, body]` frame, rejecting anything that is not an
/// array of exactly two elements.
fn decode_frame<H: DeserializeOwned>(data: &[u8]) -> BridgeResult<(H, Value)> {
    let frame: Value = serde_json::from_slice(data)?;
    let Value::Array(items) = frame else {
        return Err(BridgeError::ParseFailed("frame is not an array".into()));
    };
    if items.len() != 2 {
        return Err(BridgeError::ParseFailed(format!(
            "unexpected array length: {}",
            items.len()
        )));
    }
    let mut items = items.into_iter();
    let headers = serde_json::from_value(items.next().unwrap_or(Value::Null))?;
    let body = items.next().unwrap_or(Value::Null);
    Ok((headers, body))
}

// ─────────────────────────────────────────────────────────────────────────────
// Player REST responses
// ─────────────────────────────────────────────────────────────────────────────

/// Returned from a player's `/info` endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    #[serde(default)]
    pub device: DeviceInfo,
    pub household_id: String,
    pub group_id: String,
    pub player_id: String,
    pub websocket_url: String,
    pub rest_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceInfo {
    #[serde(default)]
    pub name: String,
}

/// Returned from `/v1/households/local/groups`, and evented on the
/// `groups` namespace.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupsResponse {
    #[serde(default)]
    pub groups: Vec<GroupEntry>,
    #[serde(default)]
    pub players: Vec<PlayerEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupEntry {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub coordinator_id: String,
    #[serde(default)]
    pub playback_state: String,
    #[serde(default)]
    pub player_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerEntry {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub websocket_url: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frame_round_trips() {
        let request = WsRequest {
            headers: RequestHeaders {
                common: CommonHeaders {
                    namespace: "playback".into(),
                    command: "subscribe".into(),
                    household_id: "HH1".into(),
                    group_id: "G1:2".into(),
                    player_id: "P1".into(),
                    cmd_id: "7".into(),
                    ..CommonHeaders::default()
                },
            },
            body: json!({"key": "value"}),
        };

        let raw = request.to_raw_bytes().unwrap();
        let parsed = WsRequest::from_raw_bytes(&raw).unwrap();
        assert_eq!(parsed.headers, request.headers);
        assert_eq!(parsed.body, request.body);
    }

    #[test]
    fn null_body_is_normalized_to_empty_object() {
        let request = WsRequest {
            headers: RequestHeaders::default(),
            body: Value::Null,
        };
        let raw = request.to_raw_bytes().unwrap();
        let text = String::from_utf8(raw).unwrap();
        assert!(text.ends_with(",{}]"), "got: {}", text);
    }

    #[test]
    fn empty_header_fields_are_omitted() {
        let request = WsRequest {
            headers: RequestHeaders {
                common: CommonHeaders {
                    namespace: "groups".into(),
                    command: "subscribe".into(),
                    ..CommonHeaders::default()
                },
            },
            body: Value::Null,
        };
        let text = String::from_utf8(request.to_raw_bytes().unwrap()).unwrap();
        assert!(!text.contains("cmdId"));
        assert!(!text.contains("userId"));
        assert!(!text.contains("topic"));
    }

    #[test]
    fn frames_must_have_exactly_two_elements() {
        assert!(WsResponse::from_raw_bytes(b"[{}]").is_err());
        assert!(WsResponse::from_raw_bytes(b"[{},{},{}]").is_err());
        assert!(WsResponse::from_raw_bytes(b"{}").is_err());
        assert!(WsResponse::from_raw_bytes(b"not json").is_err());
    }

    #[test]
    fn response_headers_parse_type_and_success() {
        let raw = br#"[{"namespace":"playback","command":"","type":"playbackStatus","success":true,"groupId":"G1:2"},{"playbackState":"PLAYBACK_STATE_IDLE"}]"#;
        let response = WsResponse::from_raw_bytes(raw).unwrap();
        assert_eq!(response.headers.event_type, "playbackStatus");
        assert!(response.headers.success);
        assert_eq!(response.headers.common.group_id, "G1:2");
        assert_eq!(response.body["playbackState"], "PLAYBACK_STATE_IDLE");
    }

    #[test]
    fn coordinator_id_strips_generation_suffix() {
        assert_eq!(coordinator_id_from_group_id("RINCON_A:12"), "RINCON_A");
        assert_eq!(coordinator_id_from_group_id("RINCON_A"), "RINCON_A");
        assert_eq!(coordinator_id_from_group_id(":3"), ":3");
    }

    #[test]
    fn rest_url_derivation_from_websocket_url() {
        assert_eq!(
            rest_url_from_websocket_url("wss://192.168.1.20:1443/websocket/api"),
            "https://192.168.1.20:1443/api"
        );
    }

    #[test]
    fn player_targeted_namespaces_are_a_closed_set() {
        assert!(is_player_targeted("settings"));
        assert!(is_player_targeted("playerVolume"));
        assert!(!is_player_targeted("playback"));
        assert!(!is_player_targeted("groupVolume"));
    }
}
