//! HTTP route handlers.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};

use crate::api::ws::ws_handler;
use crate::api::AppState;
use crate::error::{BridgeError, BridgeResult};

/// Creates the axum router with all façade routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/groups", get(list_groups))
        .route("/api/v1/group/{id}", get(get_group))
        .route("/api/v1/players", get(list_players))
        .route("/api/v1/player/{id}", get(get_player))
        .route("/api/v1/player/{id}/{namespace}", get(proxy_get_namespace))
        .route(
            "/api/v1/player/{id}/{namespace}/{object}",
            get(proxy_get_object).post(proxy_post_object),
        )
        .route("/api/v1/ws", get(ws_handler))
        .with_state(state)
}

async fn list_groups(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.inventory.list_groups())
}

async fn get_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> BridgeResult<impl IntoResponse> {
    state
        .inventory
        .get_group(&id)
        .map(Json)
        .ok_or(BridgeError::NotFound(id))
}

async fn list_players(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.inventory.list_players())
}

async fn get_player(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> BridgeResult<impl IntoResponse> {
    state
        .inventory
        .get_player(&id)
        .map(Json)
        .ok_or(BridgeError::NotFound(id))
}

// ─────────────────────────────────────────────────────────────────────────────
// REST proxy
//
// The magic mapping: callers pass any player id in a group and the call is
// steered to that player or to its coordinator, depending on whether the
// namespace is player-targeted.
// ─────────────────────────────────────────────────────────────────────────────

async fn proxy_get_namespace(
    State(state): State<AppState>,
    Path((id, namespace)): Path<(String, String)>,
) -> BridgeResult<Response> {
    proxy_get(&state, &id, &namespace, None).await
}

async fn proxy_get_object(
    State(state): State<AppState>,
    Path((id, namespace, object)): Path<(String, String, String)>,
) -> BridgeResult<Response> {
    proxy_get(&state, &id, &namespace, Some(&object)).await
}

async fn proxy_post_object(
    State(state): State<AppState>,
    Path((id, namespace, object)): Path<(String, String, String)>,
    body: Bytes,
) -> BridgeResult<Response> {
    let url = proxy_url(&state, &id, &namespace, Some(&object))?;
    let bytes = state.rest.post(&url, body).await?;
    Ok(raw_json(bytes))
}

async fn proxy_get(
    state: &AppState,
    id: &str,
    namespace: &str,
    object: Option<&str>,
) -> BridgeResult<Response> {
    let url = proxy_url(state, id, namespace, object)?;
    let bytes = state.rest.get(&url).await?;
    Ok(raw_json(bytes))
}

fn proxy_url(
    state: &AppState,
    id: &str,
    namespace: &str,
    object: Option<&str>,
) -> BridgeResult<String> {
    let (player, segment) = state
        .inventory
        .resolve_player_for_namespace(id, namespace)
        .ok_or_else(|| BridgeError::NotFound(id.to_string()))?;

    let subpath = match object {
        Some(object) => format!("{}/{}/{}", segment, namespace, object),
        None => format!("{}/{}", segment, namespace),
    };
    Ok(player.rest_url(&subpath))
}

/// Player responses are passed through verbatim.
fn raw_json(bytes: bytes::Bytes) -> Response {
    ([(header::CONTENT_TYPE, "application/json")], bytes).into_response()
}
