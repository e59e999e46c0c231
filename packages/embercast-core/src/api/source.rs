//! Source request handler.
//!
//! Accepts `PUT` and the legacy Icecast `SOURCE` method on a mount path,
//! authenticates, attaches the source to its mount, and pumps the request
//! body into the ring buffer until the source disconnects or an admin
//! kills it. The `200 OK` completes when ingest ends.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::Request,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::api::AppState;
use crate::error::CastError;
use crate::source::{authenticate, run_ingest, SourceHandshake};
use crate::utils::effective_client_ip;

pub(super) async fn source_response(
    state: AppState,
    remote_addr: SocketAddr,
    path: String,
    request: Request,
) -> Response {
    let handshake = match SourceHandshake::parse(&path, request.headers()) {
        Ok(handshake) => handshake,
        Err(e) => return e.into_response(),
    };

    // Authenticate against the configured mount before creating anything,
    // so failed sources leave no trace in the registry.
    let config = state.registry.config();
    let mount_config = config.mounts.get(&path).cloned().unwrap_or_default();
    if let Err(e) = authenticate(config, &mount_config, handshake.password.as_deref(), &path) {
        log::warn!("[Source] Auth failed on {} from {}", path, remote_addr);
        return e.into_response();
    }

    if !state.registry.has_source_capacity() {
        log::warn!("[Source] Source cap reached, rejecting {}", path);
        return CastError::SourceAlreadyActive(path).into_response();
    }

    let mount = match state.registry.get_or_create(&path) {
        Ok(mount) => mount,
        Err(e) => return e.into_response(),
    };

    let ip = effective_client_ip(request.headers(), remote_addr.ip());
    let attachment = match mount.attach_source(
        ip,
        handshake.user_agent.clone(),
        handshake.metadata(mount.config()),
    ) {
        Ok(attachment) => attachment,
        Err(e) => {
            log::warn!("[Source] Rejecting second source on {}", path);
            return e.into_response();
        }
    };

    log::info!(
        "[Source] {} streaming {} from {} ({})",
        path,
        handshake.content_type,
        ip,
        handshake.user_agent.as_deref().unwrap_or("unknown agent")
    );

    let body = request.into_body().into_data_stream();
    run_ingest(Arc::clone(&mount), attachment, body).await;

    StatusCode::OK.into_response()
}
