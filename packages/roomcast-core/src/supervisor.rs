//! Supervisor state machine.
//!
//! One control-loop task owns the group model, the event router and the
//! set of live transports. Discovery turns into a bootstrap player, the
//! bootstrap's `/groups` response into a model, the model into one
//! transport per coordinator; from there the loop drains events and
//! errors until the topology changes or a transport dies.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mdns_sd::ServiceDaemon;
use tokio::sync::mpsc;

use crate::broker::Broker;
use crate::config::Config;
use crate::error::{BridgeError, BridgeResult};
use crate::groups::GroupModel;
use crate::inventory::Inventory;
use crate::player::{PlayerEventSink, PlayerHandle};
use crate::router::EventRouter;
use crate::sonos::discovery::{create_daemon, scan_for_players};
use crate::sonos::messages::WsResponse;
use crate::sonos::rest::SonosRest;
use crate::transport::{Connector, TransportError};

/// Backoff after a failed search or connect.
const SEARCH_BACKOFF: Duration = Duration::from_secs(10);

/// Depth of the event and error funnels. Overflow blocks the transport
/// readers, which is fine: the control loop drains continuously.
const CHANNEL_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Searching,
    Connecting,
    Listening,
}

/// Funnels player callbacks into the control loop, tagged by player id.
struct ChannelSink {
    events: mpsc::Sender<(String, WsResponse)>,
    errors: mpsc::Sender<(String, TransportError)>,
}

#[async_trait]
impl PlayerEventSink for ChannelSink {
    async fn on_event(&self, player_id: &str, response: WsResponse) {
        let _ = self.events.send((player_id.to_string(), response)).await;
    }

    async fn on_error(&self, player_id: &str, error: TransportError) {
        let _ = self.errors.send((player_id.to_string(), error)).await;
    }
}

/// Drives the household session: discovery, transports, subscriptions,
/// event routing, and the inventory swap.
pub struct Supervisor {
    config: Config,
    rest: SonosRest,
    connector: Arc<dyn Connector>,
    router: EventRouter,
    inventory: Inventory,
    mdns: Option<ServiceDaemon>,

    sink: Arc<ChannelSink>,
    event_rx: mpsc::Receiver<(String, WsResponse)>,
    error_rx: mpsc::Receiver<(String, TransportError)>,

    /// Household latched from the first accepted candidate (or pinned by
    /// configuration).
    household: Option<String>,
    /// Player carrying the `groups` namespace subscription.
    groups_source: Option<String>,

    model: Arc<GroupModel>,
    staged: Option<GroupModel>,
    state: State,
}

impl Supervisor {
    pub fn new(
        config: Config,
        connector: Arc<dyn Connector>,
        broker: Arc<dyn Broker>,
        inventory: Inventory,
    ) -> BridgeResult<Self> {
        let rest = SonosRest::new(&config.sonos.apikey)?;
        let router = EventRouter::new(
            &config.mqtt.topic,
            config.sonos.simplify,
            config.sonos.fanout,
            broker,
        );

        let (event_tx, event_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (error_tx, error_rx) = mpsc::channel(CHANNEL_DEPTH);
        let sink = Arc::new(ChannelSink {
            events: event_tx,
            errors: error_tx,
        });

        let household = config.sonos.household.clone();

        Ok(Self {
            config,
            rest,
            connector,
            router,
            inventory,
            mdns: None,
            sink,
            event_rx,
            error_rx,
            household,
            groups_source: None,
            model: Arc::new(GroupModel::default()),
            staged: None,
            state: State::Idle,
        })
    }

    /// Runs the control loop forever.
    pub async fn run(mut self) {
        let mut last_state = self.state;

        loop {
            if last_state != self.state {
                log::info!(
                    "[Supervisor] state change: {:?} -> {:?}",
                    last_state,
                    self.state
                );
                last_state = self.state;
            }

            match self.state {
                State::Idle => self.state = State::Searching,

                State::Searching => match self.search().await {
                    Ok(staged) => {
                        self.staged = Some(staged);
                        self.state = State::Connecting;
                    }
                    Err(e) => {
                        log::error!("[Supervisor] search error: {}", e);
                        tokio::time::sleep(SEARCH_BACKOFF).await;
                    }
                },

                State::Connecting => match self.connect().await {
                    Ok(()) => self.state = State::Listening,
                    Err(e) => {
                        log::error!("[Supervisor] connect error: {}", e);
                        tokio::time::sleep(SEARCH_BACKOFF).await;
                        self.state = State::Searching;
                    }
                },

                State::Listening => self.listen().await,
            }
        }
    }

    /// Runs one discovery window and turns the first accepted candidate
    /// into a staged group model.
    async fn search(&mut self) -> BridgeResult<GroupModel> {
        if self.mdns.is_none() {
            self.mdns = Some(create_daemon()?);
        }
        let daemon = self.mdns.as_ref().expect("daemon just created");

        let window = Duration::from_secs(self.config.sonos.scantime);
        let candidates = scan_for_players(daemon, window).await?;
        if candidates.is_empty() {
            return Err(BridgeError::DiscoveryEmpty);
        }

        for candidate in candidates {
            // Household filter: explicit configuration wins, otherwise the
            // first household seen is latched and the rest ignored.
            if let Some(wanted) = &self.household {
                if &candidate.household_id != wanted {
                    log::debug!("[Supervisor] household filtered: {}", candidate.household_id);
                    continue;
                }
            }

            let info = match self.rest.get_info(&candidate.info_url).await {
                Ok(info) => info,
                Err(e) => {
                    log::error!("[Supervisor] {}: {}", candidate.info_url, e);
                    continue;
                }
            };

            let bootstrap = PlayerHandle::from_info(&info);
            log::info!(
                "[Supervisor] found: name={}, id={}, household={}",
                bootstrap.name(),
                bootstrap.id(),
                bootstrap.household_id()
            );

            // The bootstrap is accepted; fetch the household topology from
            // it. A failure here restarts the whole search after backoff.
            let response = self.rest.get_groups(&bootstrap.rest_url("/groups")).await?;

            let household_id = info.household_id.clone();
            self.household = Some(household_id.clone());
            return Ok(GroupModel::from_groups_response(&household_id, &response));
        }

        Err(BridgeError::DiscoveryEmpty)
    }

    /// Tears down the old session and brings up the staged one: close
    /// transports, drain funnels, clear stale retained topics, swap the
    /// model, reconnect and resubscribe.
    pub(crate) async fn connect(&mut self) -> BridgeResult<()> {
        let staged = self.staged.take().ok_or_else(|| {
            BridgeError::InternalFailure("entered Connecting without a staged model".into())
        })?;

        for coordinator in self.model.coordinators() {
            coordinator.close_transport().await;
        }
        self.groups_source = None;

        // Nothing is generating events now; empty the funnels so the new
        // session starts clean.
        while self.event_rx.try_recv().is_ok() {}
        while self.error_rx.try_recv().is_ok() {}

        // Forget retained state for whatever the swap removes.
        let missing_players = self.model.missing_players(&staged);
        let missing_groups = self.model.missing_groups(&staged);
        self.router
            .remove_stale_topics(&missing_players, &missing_groups)
            .await;

        // One atomic swap; readers see the old or the new model, nothing
        // in between.
        let staged = Arc::new(staged);
        self.model = Arc::clone(&staged);
        self.inventory.swap(staged);

        let sink = Arc::clone(&self.sink) as Arc<dyn PlayerEventSink>;
        let coordinators = self.model.coordinators();
        for coordinator in coordinators {
            coordinator
                .open_transport(
                    self.connector.as_ref(),
                    &self.config.sonos.apikey,
                    Arc::clone(&sink),
                )
                .await?;

            // Exactly one transport carries the groups subscription; any
            // player would do, a coordinator is simply what we have.
            if self.groups_source.is_none() {
                self.groups_source = Some(coordinator.id().to_string());
                coordinator.send_command("groups", "subscribe").await?;
            }

            for namespace in &self.config.sonos.subscriptions {
                coordinator.send_command(namespace, "subscribe").await?;
            }
        }

        if let Some(source) = &self.groups_source {
            log::debug!("[Supervisor] groups source: {}", source);
        }

        Ok(())
    }

    /// Consumes events and errors until the session has to be rebuilt.
    async fn listen(&mut self) {
        loop {
            tokio::select! {
                event = self.event_rx.recv() => {
                    let Some((player_id, response)) = event else {
                        self.state = State::Searching;
                        return;
                    };
                    let household = self.household.clone().unwrap_or_default();
                    if let Some(staged) = self
                        .router
                        .handle_event(&self.model, &household, &player_id, &response)
                        .await
                    {
                        self.staged = Some(staged);
                        self.state = State::Connecting;
                        return;
                    }
                }
                error = self.error_rx.recv() => {
                    if let Some((player_id, error)) = error {
                        log::warn!(
                            "[Supervisor] transport error on {}: {}; rebuilding session",
                            player_id,
                            error
                        );
                    }
                    self.state = State::Searching;
                    return;
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn stage_for_test(&mut self, model: GroupModel) {
        self.staged = Some(model);
    }

    #[cfg(test)]
    pub(crate) fn groups_source(&self) -> Option<&str> {
        self.groups_source.as_deref()
    }

    #[cfg(test)]
    pub(crate) async fn push_event(&self, player_id: &str, response: WsResponse) {
        self.sink.on_event(player_id, response).await;
    }

    #[cfg(test)]
    pub(crate) async fn listen_once(&mut self) {
        self.listen().await;
    }

    #[cfg(test)]
    pub(crate) fn is_connecting(&self) -> bool {
        self.state == State::Connecting
    }

    #[cfg(test)]
    pub(crate) fn is_searching(&self) -> bool {
        self.state == State::Searching
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::SubscriptionHandler;
    use crate::groups::tests::groups_response;
    use crate::player::CONNECTION_CEASED_RESPONSE;
    use crate::sonos::messages::{CommonHeaders, ResponseHeaders, WsRequest};
    use crate::transport::{Transport, TransportCallbacks, TransportResult};
    use bytes::Bytes;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashMap;

    // ── scripted plumbing ────────────────────────────────────────────────

    struct ScriptedTransport {
        callbacks: Mutex<Option<Arc<dyn TransportCallbacks>>>,
        sent: Mutex<Vec<Vec<u8>>>,
    }

    impl ScriptedTransport {
        fn sent_requests(&self) -> Vec<WsRequest> {
            self.sent
                .lock()
                .iter()
                .map(|raw| WsRequest::from_raw_bytes(raw).unwrap())
                .collect()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, data: Vec<u8>) -> TransportResult<()> {
            self.sent.lock().push(data);
            Ok(())
        }

        async fn close(&self) {
            let callbacks = self.callbacks.lock().take();
            if let Some(callbacks) = callbacks {
                callbacks.on_close().await;
            }
        }
    }

    /// Hands out one scripted transport per dialed URL and remembers them.
    #[derive(Default)]
    struct ScriptedConnector {
        transports: Mutex<HashMap<String, Arc<ScriptedTransport>>>,
    }

    impl ScriptedConnector {
        fn transport(&self, url_fragment: &str) -> Arc<ScriptedTransport> {
            self.transports
                .lock()
                .iter()
                .find(|(url, _)| url.contains(url_fragment))
                .map(|(_, transport)| Arc::clone(transport))
                .unwrap_or_else(|| panic!("no transport dialed for {}", url_fragment))
        }

        fn dialed(&self) -> usize {
            self.transports.lock().len()
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(
            &self,
            url: &str,
            _api_key: &str,
            callbacks: Arc<dyn TransportCallbacks>,
        ) -> TransportResult<Arc<dyn Transport>> {
            let transport = Arc::new(ScriptedTransport {
                callbacks: Mutex::new(Some(callbacks)),
                sent: Mutex::new(Vec::new()),
            });
            self.transports
                .lock()
                .insert(url.to_string(), Arc::clone(&transport));
            Ok(transport)
        }
    }

    #[derive(Default)]
    struct RecordingBroker {
        published: Mutex<Vec<(String, Bytes, bool)>>,
    }

    #[async_trait]
    impl Broker for RecordingBroker {
        async fn publish(&self, topic: &str, payload: Bytes, retained: bool) -> BridgeResult<()> {
            self.published
                .lock()
                .push((topic.to_string(), payload, retained));
            Ok(())
        }

        async fn subscribe(&self, _filter: &str, _handler: SubscriptionHandler) -> BridgeResult<()> {
            Ok(())
        }
    }

    fn test_config() -> Config {
        Config::from_yaml(
            r#"
sonos:
  apikey: "key123"
  subscriptions: [playback, playbackMetadata]
mqtt:
  broker: {host: "broker.local", port: 1883, client: "roomcast"}
  topic: "sonos"
"#,
        )
        .unwrap()
    }

    struct Rig {
        supervisor: Supervisor,
        connector: Arc<ScriptedConnector>,
        broker: Arc<RecordingBroker>,
        inventory: Inventory,
    }

    fn rig() -> Rig {
        let connector = Arc::new(ScriptedConnector::default());
        let broker = Arc::new(RecordingBroker::default());
        let inventory = Inventory::new();
        let mut supervisor = Supervisor::new(
            test_config(),
            Arc::clone(&connector) as Arc<dyn Connector>,
            Arc::clone(&broker) as Arc<dyn Broker>,
            inventory.clone(),
        )
        .unwrap();
        supervisor.household = Some("HH1".to_string());

        Rig {
            supervisor,
            connector,
            broker,
            inventory,
        }
    }

    fn one_group_two_players() -> GroupModel {
        GroupModel::from_groups_response(
            "HH1",
            &groups_response(
                &[("G1:1", "P1", &["P1", "P2"])],
                &[("P1", "Kitchen"), ("P2", "Office")],
            ),
        )
    }

    fn split_groups() -> GroupModel {
        GroupModel::from_groups_response(
            "HH1",
            &groups_response(
                &[("G1:2", "P1", &["P1"]), ("G2:1", "P2", &["P2"])],
                &[("P1", "Kitchen"), ("P2", "Office")],
            ),
        )
    }

    #[tokio::test]
    async fn connecting_opens_one_transport_per_coordinator() {
        let mut rig = rig();
        rig.supervisor.stage_for_test(one_group_two_players());
        rig.supervisor.connect().await.unwrap();

        // One group, one coordinator, one transport; the non-coordinator
        // member gets none.
        assert_eq!(rig.connector.dialed(), 1);
        let transport = rig.connector.transport("p1.local");

        // groups subscription on the nominated source, then the configured
        // namespaces.
        let subscriptions: Vec<(String, String)> = transport
            .sent_requests()
            .into_iter()
            .map(|r| (r.headers.common.namespace, r.headers.common.command))
            .collect();
        assert_eq!(
            subscriptions,
            vec![
                ("groups".to_string(), "subscribe".to_string()),
                ("playback".to_string(), "subscribe".to_string()),
                ("playbackMetadata".to_string(), "subscribe".to_string()),
            ]
        );
        assert_eq!(rig.supervisor.groups_source(), Some("P1"));

        // The swap published the model to the façade.
        assert_eq!(rig.inventory.list_players().len(), 2);
    }

    #[tokio::test]
    async fn group_split_reconnects_and_clears_stale_topics() {
        let mut rig = rig();
        rig.supervisor.stage_for_test(one_group_two_players());
        rig.supervisor.connect().await.unwrap();
        let old_transport = rig.connector.transport("p1.local");

        // Seed a retained group topic so the split has something to clear.
        rig.supervisor
            .router
            .handle_event(
                &rig.supervisor.model.clone(),
                "HH1",
                "P1",
                &WsResponse {
                    headers: ResponseHeaders {
                        common: CommonHeaders {
                            group_id: "G1:1".into(),
                            ..CommonHeaders::default()
                        },
                        success: true,
                        event_type: "playbackStatus".into(),
                        ..ResponseHeaders::default()
                    },
                    body: json!({"playbackState": "PLAYBACK_STATE_PLAYING"}),
                },
            )
            .await;

        // An outstanding request on the old coordinator must die with the
        // reconnect.
        let coordinator = rig.supervisor.model.get_player("P1").cloned().unwrap();
        let pending = coordinator
            .send_request(coordinator.command_request("player", "getSettings"))
            .await
            .unwrap();

        rig.supervisor.stage_for_test(split_groups());
        rig.supervisor.connect().await.unwrap();

        // Old transport closed (its pending request failed), two new ones
        // dialed: P1 again plus the new coordinator P2.
        let failure = pending.await.unwrap();
        assert_eq!(failure.headers.response, CONNECTION_CEASED_RESPONSE);
        assert!(old_transport.callbacks.lock().is_none());
        assert_eq!(rig.connector.dialed(), 2);
        rig.connector.transport("p2.local");

        // The stale G1-scoped retained topic was emptied.
        let published = rig.broker.published.lock().clone();
        let cleared: Vec<&(String, Bytes, bool)> = published
            .iter()
            .filter(|(topic, payload, _)| topic == "sonos/group/P1/playbackStatus" && payload.is_empty())
            .collect();
        assert_eq!(cleared.len(), 1);

        // The façade sees the new topology.
        assert_eq!(rig.inventory.list_groups().len(), 2);
    }

    #[tokio::test]
    async fn groups_event_in_listening_stages_and_reenters_connecting() {
        let mut rig = rig();
        rig.supervisor.stage_for_test(one_group_two_players());
        rig.supervisor.connect().await.unwrap();

        let groups_event = WsResponse {
            headers: ResponseHeaders {
                common: CommonHeaders::default(),
                success: true,
                event_type: "groups".into(),
                ..ResponseHeaders::default()
            },
            body: json!({
                "groups": [
                    {"id": "G1:2", "name": "g", "coordinatorId": "P1", "playerIds": ["P1"]},
                    {"id": "G2:1", "name": "g", "coordinatorId": "P2", "playerIds": ["P2"]},
                ],
                "players": [
                    {"id": "P1", "name": "Kitchen", "websocketUrl": "wss://p1.local:1443/websocket/api"},
                    {"id": "P2", "name": "Office", "websocketUrl": "wss://p2.local:1443/websocket/api"},
                ],
            }),
        };

        rig.supervisor.push_event("P1", groups_event).await;
        rig.supervisor.listen_once().await;

        assert!(rig.supervisor.is_connecting());
        assert!(rig.supervisor.staged.is_some());
    }

    #[tokio::test]
    async fn transport_error_in_listening_collapses_to_searching() {
        let mut rig = rig();
        rig.supervisor.stage_for_test(one_group_two_players());
        rig.supervisor.connect().await.unwrap();

        rig.supervisor
            .sink
            .on_error("P1", TransportError::Recv("eof".into()))
            .await;
        rig.supervisor.listen_once().await;

        assert!(rig.supervisor.is_searching());
    }

    #[tokio::test]
    async fn equivalent_event_keeps_listening_state_machine_parked() {
        let mut rig = rig();
        rig.supervisor.stage_for_test(one_group_two_players());
        rig.supervisor.connect().await.unwrap();

        // A playback event routes without touching the state machine, and
        // listen() keeps waiting, so drive the router directly.
        let staged = rig
            .supervisor
            .router
            .handle_event(
                &rig.supervisor.model.clone(),
                "HH1",
                "P1",
                &WsResponse {
                    headers: ResponseHeaders {
                        common: CommonHeaders {
                            group_id: "G1:1".into(),
                            ..CommonHeaders::default()
                        },
                        success: true,
                        event_type: "playbackStatus".into(),
                        ..ResponseHeaders::default()
                    },
                    body: json!({"playbackState": "PLAYBACK_STATE_IDLE"}),
                },
            )
            .await;
        assert!(staged.is_none());
    }
}
