//! Player-facing protocol: discovery, wire types, and REST access.

pub mod discovery;
pub mod messages;
pub mod rest;

pub use discovery::DiscoveredPlayer;
pub use messages::{
    coordinator_id_from_group_id, is_player_targeted, rest_url_from_websocket_url, CommonHeaders,
    GroupsResponse, PlayerInfo, RequestHeaders, ResponseHeaders, WsRequest, WsResponse,
};
pub use rest::SonosRest;
