//! Dashboard WebSocket handler.
//!
//! Dashboards speak the same `[headers, body]` framing as the players.
//! `subscribe` frames attach a broker topic filter to this socket; every
//! other frame is passed through to the target player's transport, with
//! the eventual response (or synthetic failure) relayed back.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::api::AppState;
use crate::sonos::messages::{ResponseHeaders, WsRequest, WsResponse};

/// Depth of the per-dashboard outbound queue. Slow dashboards drop
/// broker traffic rather than stall the bridge.
const OUTBOUND_QUEUE: usize = 64;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_dashboard(socket, state))
}

async fn handle_dashboard(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(OUTBOUND_QUEUE);

    log::info!("[WS] dashboard connected");

    // Writer task: everything leaving this socket funnels through one queue.
    let writer = tokio::spawn(async move {
        while let Some(payload) = out_rx.recv().await {
            let Ok(text) = String::from_utf8(payload) else {
                continue;
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = receiver.next().await {
        let data = match message {
            Message::Text(text) => text.as_bytes().to_vec(),
            Message::Binary(data) => data.to_vec(),
            Message::Close(_) => break,
            _ => continue,
        };
        handle_frame(&state, &out_tx, data).await;
    }

    log::info!("[WS] dashboard disconnected");
    writer.abort();
}

async fn handle_frame(state: &AppState, out_tx: &mpsc::Sender<Vec<u8>>, data: Vec<u8>) {
    let request = match WsRequest::from_raw_bytes(&data) {
        Ok(request) => request,
        Err(e) => {
            log::warn!("[WS] bad dashboard frame: {}", e);
            send_error(out_tx, &WsRequest::default(), &e.to_string()).await;
            return;
        }
    };

    if request.headers.common.command == "subscribe" {
        handle_subscribe(state, out_tx, &request).await;
        return;
    }

    handle_passthrough(state, out_tx, request).await;
}

/// Attaches a broker topic filter to this dashboard socket.
async fn handle_subscribe(state: &AppState, out_tx: &mpsc::Sender<Vec<u8>>, request: &WsRequest) {
    let topic = request.headers.common.topic.clone();
    if topic.is_empty() {
        send_error(out_tx, request, "subscribe requires a topic header").await;
        return;
    }

    log::info!("[WS] dashboard subscribe: {}", topic);

    let forward = out_tx.clone();
    let result = state
        .broker
        .subscribe(
            &topic,
            Box::new(move |_topic, payload| {
                // Dropped payloads are fine; retained topics resync late
                // dashboards anyway.
                let _ = forward.try_send(payload.to_vec());
            }),
        )
        .await;

    if let Err(e) = result {
        send_error(out_tx, request, &e.to_string()).await;
    }
}

/// Forwards a pre-framed request down the target player's transport and
/// relays the eventual response.
async fn handle_passthrough(state: &AppState, out_tx: &mpsc::Sender<Vec<u8>>, mut request: WsRequest) {
    let player_id = request.headers.common.player_id.clone();
    let namespace = request.headers.common.namespace.clone();

    let Some((player, _segment)) = state
        .inventory
        .resolve_player_for_namespace(&player_id, &namespace)
    else {
        send_error(out_tx, &request, &format!("unknown player: {}", player_id)).await;
        return;
    };

    // The dashboard knows the player; the bridge knows the household and
    // group scope.
    request.headers.common.household_id = player.household_id().to_string();
    request.headers.common.group_id = player.group_id();

    match player.send_request(request.clone()).await {
        Ok(response_rx) => {
            let forward = out_tx.clone();
            tokio::spawn(async move {
                // A dropped sender means the transport died; the close path
                // already produced a synthetic failure, so only a genuine
                // response needs relaying.
                if let Ok(response) = response_rx.await {
                    if let Ok(raw) = response.to_raw_bytes() {
                        let _ = forward.send(raw).await;
                    }
                }
            });
        }
        Err(e) => send_error(out_tx, &request, &e.to_string()).await,
    }
}

async fn send_error(out_tx: &mpsc::Sender<Vec<u8>>, request: &WsRequest, message: &str) {
    let response = WsResponse {
        headers: ResponseHeaders {
            common: request.headers.common.clone(),
            response: message.to_string(),
            success: false,
            event_type: "globalError".to_string(),
        },
        body: Value::Object(serde_json::Map::new()),
    };

    if let Ok(raw) = response.to_raw_bytes() {
        let _ = out_tx.send(raw).await;
    }
}
