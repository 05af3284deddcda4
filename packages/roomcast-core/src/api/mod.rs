//! HTTP/WebSocket façade for dashboards.
//!
//! Handlers are thin: reads come from the inventory view, control calls
//! are proxied to a player (REST) or down its transport (WebSocket
//! passthrough), subscriptions go to the broker.

use std::sync::Arc;

use crate::broker::Broker;
use crate::inventory::Inventory;
use crate::sonos::rest::SonosRest;

pub mod http;
pub mod ws;

/// Shared state for the façade handlers.
#[derive(Clone)]
pub struct AppState {
    /// Read-only view of the current household topology.
    pub inventory: Inventory,
    /// API-key REST client for proxied player calls.
    pub rest: SonosRest,
    /// Broker client for dashboard topic subscriptions.
    pub broker: Arc<dyn Broker>,
}

/// Binds the façade and serves it until the task is aborted.
pub async fn start_server(state: AppState, port: u16) -> std::io::Result<()> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    log::info!("[Server] listening on http://0.0.0.0:{}", port);
    let app = http::create_router(state);
    axum::serve(listener, app).await
}
