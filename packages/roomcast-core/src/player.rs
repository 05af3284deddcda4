//! Per-player identity, owned transport, and request correlation.
//!
//! A [`PlayerHandle`] owns at most one transport. Requests sent through it
//! are stamped with a monotonically increasing `cmdId` and recorded in a
//! correlation table; the matching response (or a synthetic timeout/close
//! failure) completes the caller's oneshot channel. Frames without a
//! live correlation entry are events and go to the [`PlayerEventSink`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::{BridgeError, BridgeResult};
use crate::sonos::messages::{
    coordinator_id_from_group_id, rest_url_from_websocket_url, CommonHeaders, PlayerEntry,
    PlayerInfo, RequestHeaders, ResponseHeaders, WsRequest, WsResponse,
};
use crate::transport::{Connector, Transport, TransportCallbacks, TransportError};

/// Default window before an unanswered request fails.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// `response` text delivered when a request times out.
pub const TIMED_OUT_RESPONSE: &str = "Command timed out";

/// `response` text delivered when the transport closes with requests
/// outstanding.
pub const CONNECTION_CEASED_RESPONSE: &str = "The connection has ceased to be.";

/// Receives events and transport errors from a player, tagged with the
/// originating player id. The supervisor funnels these into its control
/// loop channels.
#[async_trait]
pub trait PlayerEventSink: Send + Sync {
    async fn on_event(&self, player_id: &str, response: WsResponse);
    async fn on_error(&self, player_id: &str, error: TransportError);
}

struct Grouping {
    group_id: String,
    coordinator_id: String,
}

struct Pending {
    tx: oneshot::Sender<WsResponse>,
    timer: JoinHandle<()>,
}

struct Inner {
    transport: Option<Arc<dyn Transport>>,
    sink: Option<Arc<dyn PlayerEventSink>>,
    /// Next cmdId to issue; starts at 1.
    cmd_id: u64,
    pending: HashMap<String, Pending>,
}

/// A player in the household, with its owned transport and correlation
/// table.
pub struct PlayerHandle {
    player_id: String,
    name: String,
    household_id: String,
    websocket_url: String,
    rest_base_url: String,
    command_timeout: Duration,
    grouping: RwLock<Grouping>,
    inner: Mutex<Inner>,
}

impl PlayerHandle {
    /// Builds a player from a `/info` response.
    pub fn from_info(info: &PlayerInfo) -> Self {
        Self::new(
            &info.player_id,
            &info.device.name,
            &info.household_id,
            &info.group_id,
            &coordinator_id_from_group_id(&info.group_id),
            &info.websocket_url,
            &info.rest_url,
        )
    }

    /// Builds a player from a `/groups` player entry. The REST base URL is
    /// derived from the websocket URL; group assignment happens during
    /// model construction.
    pub fn from_groups_player(player: &PlayerEntry, household_id: &str, group_id: &str) -> Self {
        Self::new(
            &player.id,
            &player.name,
            household_id,
            group_id,
            &coordinator_id_from_group_id(group_id),
            &player.websocket_url,
            &rest_url_from_websocket_url(&player.websocket_url),
        )
    }

    fn new(
        player_id: &str,
        name: &str,
        household_id: &str,
        group_id: &str,
        coordinator_id: &str,
        websocket_url: &str,
        rest_base_url: &str,
    ) -> Self {
        Self {
            player_id: player_id.to_string(),
            name: name.to_string(),
            household_id: household_id.to_string(),
            websocket_url: websocket_url.to_string(),
            rest_base_url: rest_base_url.to_string(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            grouping: RwLock::new(Grouping {
                group_id: group_id.to_string(),
                coordinator_id: coordinator_id.to_string(),
            }),
            inner: Mutex::new(Inner {
                transport: None,
                sink: None,
                cmd_id: 1,
                pending: HashMap::new(),
            }),
        }
    }

    /// Overrides the request timeout. Test hook.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn id(&self) -> &str {
        &self.player_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn household_id(&self) -> &str {
        &self.household_id
    }

    pub fn group_id(&self) -> String {
        self.grouping.read().group_id.clone()
    }

    pub fn coordinator_id(&self) -> String {
        self.grouping.read().coordinator_id.clone()
    }

    pub fn websocket_url(&self) -> &str {
        &self.websocket_url
    }

    /// Full REST URL for a household-local subpath.
    ///
    /// The multi-household cloud API shape is kept, pinned to `local`.
    pub fn rest_url(&self, subpath: &str) -> String {
        format!("{}/v1/households/local{}", self.rest_base_url, subpath)
    }

    /// Assigns this player to a group. Called during model construction,
    /// before the model is published.
    pub fn set_coordinator(&self, coordinator_id: &str, group_id: &str) {
        let mut grouping = self.grouping.write();
        grouping.coordinator_id = coordinator_id.to_string();
        grouping.group_id = group_id.to_string();
    }

    /// Opens the transport. Idempotent: a second call on an open player is
    /// a no-op success.
    pub async fn open_transport(
        self: &Arc<Self>,
        connector: &dyn Connector,
        api_key: &str,
        sink: Arc<dyn PlayerEventSink>,
    ) -> BridgeResult<()> {
        {
            let mut inner = self.inner.lock();
            if inner.transport.is_some() {
                return Ok(());
            }
            // The sink goes in first so frames racing the connect are not lost.
            inner.sink = Some(sink);
        }

        let callbacks_concrete: Arc<PlayerHandle> = Arc::clone(self);
        let callbacks: Arc<dyn TransportCallbacks> = callbacks_concrete;
        match connector
            .connect(&self.websocket_url, api_key, callbacks)
            .await
        {
            Ok(transport) => {
                self.inner.lock().transport = Some(transport);
                Ok(())
            }
            Err(e) => {
                self.inner.lock().sink = None;
                Err(BridgeError::TransportLost(format!(
                    "{}: {}",
                    self.player_id, e
                )))
            }
        }
    }

    /// Closes the transport if open. Pending requests fail through the
    /// `on_close` path.
    pub async fn close_transport(&self) {
        let transport = self.inner.lock().transport.clone();
        if let Some(transport) = transport {
            transport.close().await;
        }
    }

    /// Sends a correlated request and returns the channel its response (or
    /// synthetic failure) arrives on.
    pub async fn send_request(
        self: &Arc<Self>,
        mut request: WsRequest,
    ) -> BridgeResult<oneshot::Receiver<WsResponse>> {
        let (response_tx, response_rx) = oneshot::channel();

        let (transport, cmd_id) = {
            let mut inner = self.inner.lock();
            let Some(transport) = inner.transport.clone() else {
                return Err(BridgeError::TransportLost(format!(
                    "{}: attempt to send with no transport",
                    self.player_id
                )));
            };

            let cmd_id = inner.cmd_id.to_string();
            inner.cmd_id += 1;

            let timer = {
                let player = Arc::clone(self);
                let cmd_id = cmd_id.clone();
                let timeout = self.command_timeout;
                tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    if let Some(pending) = player.take_pending(&cmd_id) {
                        log::debug!("[Player] {}: cmdId {} timed out", player.player_id, cmd_id);
                        let _ = pending.tx.send(timed_out_response());
                    }
                })
            };

            inner.pending.insert(
                cmd_id.clone(),
                Pending {
                    tx: response_tx,
                    timer,
                },
            );
            (transport, cmd_id)
        };

        request.headers.common.cmd_id = cmd_id.clone();

        let raw = match request.to_raw_bytes() {
            Ok(raw) => raw,
            Err(e) => {
                self.abort_pending(&cmd_id);
                return Err(e);
            }
        };

        if let Err(e) = transport.send(raw).await {
            self.abort_pending(&cmd_id);
            return Err(BridgeError::TransportLost(format!(
                "{}: send failed: {}",
                self.player_id, e
            )));
        }

        Ok(response_rx)
    }

    /// Fire-and-forget command with this player's identity headers.
    /// Used for subscriptions, whose acknowledgements arrive as events.
    pub async fn send_command(&self, namespace: &str, command: &str) -> BridgeResult<()> {
        let mut request = self.command_request(namespace, command);

        let transport = {
            let mut inner = self.inner.lock();
            let Some(transport) = inner.transport.clone() else {
                return Err(BridgeError::TransportLost(format!(
                    "{}: attempt to send with no transport",
                    self.player_id
                )));
            };
            request.headers.common.cmd_id = inner.cmd_id.to_string();
            inner.cmd_id += 1;
            transport
        };

        let raw = request.to_raw_bytes()?;
        transport.send(raw).await.map_err(|e| {
            BridgeError::TransportLost(format!("{}: send failed: {}", self.player_id, e))
        })
    }

    /// Builds a request frame carrying this player's identity headers.
    pub fn command_request(&self, namespace: &str, command: &str) -> WsRequest {
        let grouping = self.grouping.read();
        WsRequest {
            headers: RequestHeaders {
                common: CommonHeaders {
                    namespace: namespace.to_string(),
                    command: command.to_string(),
                    household_id: self.household_id.clone(),
                    group_id: grouping.group_id.clone(),
                    player_id: self.player_id.clone(),
                    ..CommonHeaders::default()
                },
            },
            body: Value::Null,
        }
    }

    fn take_pending(&self, cmd_id: &str) -> Option<Pending> {
        self.inner.lock().pending.remove(cmd_id)
    }

    fn abort_pending(&self, cmd_id: &str) {
        if let Some(pending) = self.take_pending(cmd_id) {
            pending.timer.abort();
        }
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }
}

impl std::fmt::Debug for PlayerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerHandle")
            .field("id", &self.player_id)
            .field("name", &self.name)
            .field("group_id", &self.group_id())
            .finish()
    }
}

fn timed_out_response() -> WsResponse {
    synthetic_failure(TIMED_OUT_RESPONSE)
}

fn connection_ceased_response() -> WsResponse {
    synthetic_failure(CONNECTION_CEASED_RESPONSE)
}

fn synthetic_failure(response: &str) -> WsResponse {
    WsResponse {
        headers: ResponseHeaders {
            common: CommonHeaders::default(),
            response: response.to_string(),
            success: false,
            event_type: "none".to_string(),
        },
        body: Value::Object(serde_json::Map::new()),
    }
}

#[async_trait]
impl TransportCallbacks for PlayerHandle {
    async fn on_message(&self, data: Vec<u8>) {
        let response = match WsResponse::from_raw_bytes(&data) {
            Ok(response) => response,
            Err(e) => {
                log::warn!("[Player] {}: dropping unparseable frame: {}", self.player_id, e);
                return;
            }
        };

        // Correlated response?
        let cmd_id = response.headers.common.cmd_id.clone();
        if !cmd_id.is_empty() {
            if let Some(pending) = self.take_pending(&cmd_id) {
                pending.timer.abort();
                let _ = pending.tx.send(response);
            }
            // A reply arriving after the timer removed its entry is stale.
            return;
        }

        // Must be an event.
        let sink = self.inner.lock().sink.clone();
        if let Some(sink) = sink {
            sink.on_event(&self.player_id, response).await;
        }
    }

    async fn on_error(&self, error: TransportError) {
        log::info!("[Player] {}: transport error: {}", self.player_id, error);
        let sink = self.inner.lock().sink.clone();
        if let Some(sink) = sink {
            sink.on_error(&self.player_id, error).await;
        }
    }

    async fn on_close(&self) {
        let drained: Vec<Pending> = {
            let mut inner = self.inner.lock();
            inner.transport = None;
            inner.sink = None;
            inner.pending.drain().map(|(_, pending)| pending).collect()
        };

        // Fail everyone outside the lock.
        for pending in drained {
            pending.timer.abort();
            let _ = pending.tx.send(connection_ceased_response());
        }
    }
}
