//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to the registry and mounts.
//! Mount paths are served by the router fallback so any path can be a
//! stream endpoint; the fixed routes (status, admin) take precedence.

use std::net::SocketAddr;

use axum::{
    extract::{connect_info::ConnectInfo, Query, Request, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::api::{listen, source, AppState};
use crate::error::{CastError, CastResult};
use crate::protocol_constants::server_ident;
use crate::source::basic_password;

/// Builds the router: fixed endpoints first, every other path is a mount.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .expose_headers([
            header::HeaderName::from_static("icy-name"),
            header::HeaderName::from_static("icy-genre"),
            header::HeaderName::from_static("icy-br"),
            header::HeaderName::from_static("icy-pub"),
            header::HeaderName::from_static("icy-metaint"),
            header::ACCEPT_RANGES,
        ]);

    Router::new()
        .route("/status.json", get(status_json))
        .route("/admin/stats", get(status_json))
        .route("/admin/metadata", get(admin_metadata))
        .route("/admin/listclients", get(admin_list_clients))
        .route("/admin/kickclient", get(admin_kick_client))
        .route("/admin/killsource", get(admin_kill_source))
        .route("/admin/moveclients", get(admin_move_clients))
        .route("/admin/deletemount", get(admin_delete_mount))
        .fallback(handle_mount)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Dispatches a mount-path request by method: GET/HEAD are listeners,
/// PUT and the legacy Icecast SOURCE method are sources.
async fn handle_mount(
    State(state): State<AppState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    let path = request.uri().path().to_string();
    let method = request.method().clone();
    match method.as_str() {
        "GET" => listen::listener_response(state, remote_addr, &path, request.headers(), false),
        "HEAD" => listen::listener_response(state, remote_addr, &path, request.headers(), true),
        "PUT" | "SOURCE" => source::source_response(state, remote_addr, path, request).await,
        _ => CastError::InvalidRequest(format!("method {} not supported", method)).into_response(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Status
// ─────────────────────────────────────────────────────────────────────────────

async fn status_json(State(state): State<AppState>) -> Json<serde_json::Value> {
    let registry = &state.registry;
    let mounts = registry.list();
    let listeners: usize = mounts.iter().map(|m| m.listeners).sum();
    Json(json!({
        "server": server_ident(),
        "server_start_millis": registry.started_at_millis(),
        "uptime_secs": registry.uptime_secs(),
        "total_bytes_sent": registry.total_bytes_sent(),
        "listeners": listeners,
        "sources": registry.active_source_count(),
        "mounts": mounts,
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Admin
// ─────────────────────────────────────────────────────────────────────────────

/// Rejects requests without valid admin Basic credentials.
///
/// Admin endpoints are disabled outright when no admin password is
/// configured - there is no anonymous admin mode.
fn require_admin(state: &AppState, headers: &HeaderMap) -> CastResult<()> {
    let Some(expected) = state.registry.config().admin_password.as_deref() else {
        return Err(CastError::AdminAuthFailed);
    };
    match basic_password(headers) {
        Some(supplied) if supplied == expected => Ok(()),
        _ => Err(CastError::AdminAuthFailed),
    }
}

#[derive(Deserialize)]
struct MetadataParams {
    mount: String,
    mode: String,
    song: Option<String>,
}

/// `GET /admin/metadata?mount=/live&mode=updinfo&song=...` - the
/// Icecast-compatible out-of-band title update.
async fn admin_metadata(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<MetadataParams>,
) -> CastResult<Json<serde_json::Value>> {
    require_admin(&state, &headers)?;
    if params.mode != "updinfo" {
        return Err(CastError::InvalidRequest(format!(
            "unsupported mode {:?}",
            params.mode
        )));
    }
    let mount = state
        .registry
        .get(&params.mount)
        .ok_or_else(|| CastError::MountNotFound(params.mount.clone()))?;
    mount.update_stream_title(params.song.clone().filter(|s| !s.is_empty()));
    log::info!(
        "[Admin] Metadata update on {}: {:?}",
        params.mount,
        params.song
    );
    Ok(Json(json!({ "success": true, "mount": params.mount })))
}

#[derive(Deserialize)]
struct MountParams {
    mount: String,
}

async fn admin_list_clients(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<MountParams>,
) -> CastResult<Json<serde_json::Value>> {
    require_admin(&state, &headers)?;
    let mount = state
        .registry
        .get(&params.mount)
        .ok_or_else(|| CastError::MountNotFound(params.mount.clone()))?;
    let clients = mount.listener_snapshots();
    Ok(Json(json!({
        "mount": params.mount,
        "count": clients.len(),
        "clients": clients,
    })))
}

#[derive(Deserialize)]
struct KickParams {
    mount: String,
    id: Uuid,
}

async fn admin_kick_client(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<KickParams>,
) -> CastResult<Json<serde_json::Value>> {
    require_admin(&state, &headers)?;
    let mount = state
        .registry
        .get(&params.mount)
        .ok_or_else(|| CastError::MountNotFound(params.mount.clone()))?;
    let kicked = mount.kick_listener(params.id);
    if kicked {
        log::info!("[Admin] Kicked listener {} from {}", params.id, params.mount);
    }
    Ok(Json(json!({ "success": kicked, "id": params.id })))
}

async fn admin_kill_source(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<MountParams>,
) -> CastResult<Json<serde_json::Value>> {
    require_admin(&state, &headers)?;
    let mount = state
        .registry
        .get(&params.mount)
        .ok_or_else(|| CastError::MountNotFound(params.mount.clone()))?;
    let killed = mount.kill_source();
    if killed {
        log::info!("[Admin] Killed source on {}", params.mount);
    }
    Ok(Json(json!({ "success": killed, "mount": params.mount })))
}

#[derive(Deserialize)]
struct MoveParams {
    mount: String,
    destination: String,
}

/// Best-effort client move: listeners on the source mount are closed and
/// expected to reconnect (to the destination, if their player follows it).
/// There is no cross-mount handoff.
async fn admin_move_clients(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<MoveParams>,
) -> CastResult<Json<serde_json::Value>> {
    require_admin(&state, &headers)?;
    let mount = state
        .registry
        .get(&params.mount)
        .ok_or_else(|| CastError::MountNotFound(params.mount.clone()))?;
    state
        .registry
        .get(&params.destination)
        .ok_or_else(|| CastError::MountNotFound(params.destination.clone()))?;
    let moved = mount.disconnect_all_listeners();
    log::info!(
        "[Admin] Disconnected {} listener(s) on {} toward {}",
        moved,
        params.mount,
        params.destination
    );
    Ok(Json(json!({ "success": true, "disconnected": moved })))
}

async fn admin_delete_mount(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<MountParams>,
) -> CastResult<Json<serde_json::Value>> {
    require_admin(&state, &headers)?;
    state.registry.delete(&params.mount)?;
    log::info!("[Admin] Deleted mount {}", params.mount);
    Ok(Json(json!({ "success": true, "mount": params.mount })))
}
