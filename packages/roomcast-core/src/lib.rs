//! Roomcast core - Sonos-to-MQTT bridge library.
//!
//! The bridge discovers a household of audio players on the LAN, keeps one
//! websocket per group coordinator, normalizes the events that arrive on
//! them, and republishes everything onto an MQTT broker under a stable
//! topic tree. A small HTTP/WebSocket façade lets dashboards read the
//! household inventory and proxy control calls to players.
//!
//! # Architecture
//!
//! - [`config`]: YAML configuration with validation
//! - [`sonos`]: player protocol - discovery, wire framing, REST access
//! - [`transport`]: websocket transport seam (reader/writer tasks)
//! - [`player`]: per-player handle with request correlation and timeouts
//! - [`groups`]: immutable group-model snapshots and equivalence
//! - [`supervisor`]: the control-loop state machine owning the session
//! - [`router`]: event classification, fan-out, dedup, retained cleanup
//! - [`broker`]: MQTT client seam
//! - [`inventory`]: read-locked topology view for the façade
//! - [`api`]: the HTTP/WebSocket façade
//! - [`error`]: centralized error types

#![warn(clippy::all)]

pub mod api;
pub mod broker;
pub mod config;
pub mod error;
pub mod groups;
pub mod inventory;
pub mod player;
pub mod router;
pub mod simplify;
pub mod sonos;
pub mod supervisor;
pub mod transport;

// Re-export commonly used types at the crate root
pub use api::{start_server, AppState};
pub use broker::{Broker, MqttBroker};
pub use config::Config;
pub use error::{BridgeError, BridgeResult};
pub use groups::{Group, GroupModel, PlayerSummary};
pub use inventory::Inventory;
pub use player::{PlayerEventSink, PlayerHandle};
pub use router::EventRouter;
pub use sonos::rest::SonosRest;
pub use supervisor::Supervisor;
pub use transport::{Connector, Transport, TransportCallbacks, WsConnector};
