//! Listener request handler.
//!
//! Separated from the REST handlers due to its distinct concerns: bot
//! classification, listener caps, ICY header negotiation, and handing the
//! connection over to the streaming session that runs for the rest of the
//! response.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};

use crate::api::AppState;
use crate::error::CastError;
use crate::mount::{Listener, Mount};
use crate::protocol_constants::{server_ident, ICY_METAINT};
use crate::stream::{session_stream, SessionParams};
use crate::utils::effective_client_ip;

/// Handles `GET`/`HEAD` on a mount path.
///
/// `HEAD` gets the full header set and no body, and creates no listener
/// record - link checkers and players probing the stream cost nothing.
pub(super) fn listener_response(
    state: AppState,
    remote_addr: SocketAddr,
    path: &str,
    headers: &HeaderMap,
    head_only: bool,
) -> Response {
    let Some(mount) = state.registry.get(path) else {
        return CastError::MountNotFound(path.to_string()).into_response();
    };

    let ip = effective_client_ip(headers, remote_addr.ip());
    if let Err(e) = mount.check_access(&ip) {
        log::info!("[Listen] {} denied for {}", path, ip);
        return e.into_response();
    }

    let wants_icy = headers
        .get("icy-metadata")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        == Some("1");

    if head_only {
        return response_headers(&mount, wants_icy)
            .body(Body::empty())
            .unwrap_or_else(|e| CastError::Internal(e.to_string()).into_response());
    }

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let listener = Arc::new(Listener::new(ip, user_agent));

    // Global cap first, then the per-mount cap inside add_listener.
    // Bots bypass both - a link preview shouldn't consume a listener slot.
    if !listener.is_bot && !state.registry.has_client_capacity() {
        return CastError::ListenerLimitReached(path.to_string()).into_response();
    }
    if let Err(e) = mount.add_listener(Arc::clone(&listener)) {
        return e.into_response();
    }

    log::info!(
        "[Listen] New listener {} on {} from {}{}",
        listener.id,
        path,
        ip,
        if listener.is_bot { " (bot)" } else { "" }
    );

    let timeouts = &state.registry.config().timeouts;
    let params = SessionParams {
        burst_size: mount.burst_size(),
        sync_mode: mount.sync_mode(),
        icy_enabled: wants_icy,
        source_reconnect_wait: timeouts.source_timeout(),
        client_timeout: timeouts.client_timeout(),
    };

    let body = Body::from_stream(session_stream(Arc::clone(&mount), listener, params));
    response_headers(&mount, wants_icy)
        .body(body)
        .unwrap_or_else(|e| CastError::Internal(e.to_string()).into_response())
}

/// Builds the listener response headers from the mount's metadata.
fn response_headers(mount: &Mount, wants_icy: bool) -> axum::http::response::Builder {
    let metadata = mount.metadata();
    let content_type = if metadata.content_type.is_empty() {
        // No source has ever attached; label with the common case so
        // players waiting through WAIT_SOURCE can prepare a decoder.
        "audio/mpeg"
    } else {
        &metadata.content_type
    };

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "no-cache, no-store")
        .header(header::PRAGMA, "no-cache")
        .header(header::SERVER, server_ident())
        .header(header::ACCEPT_RANGES, "none")
        .header("icy-pub", if metadata.public { "1" } else { "0" });

    if let Some(name) = &metadata.name {
        builder = builder.header("icy-name", name);
    }
    if let Some(genre) = &metadata.genre {
        builder = builder.header("icy-genre", genre);
    }
    if let Some(bitrate) = metadata.bitrate {
        builder = builder.header("icy-br", bitrate.to_string());
    }
    if wants_icy {
        builder = builder.header("icy-metaint", ICY_METAINT.to_string());
    }
    builder
}
