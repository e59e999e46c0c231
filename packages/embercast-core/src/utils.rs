//! General utilities shared across the application.

use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::HeaderMap;

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen in practice).
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Resolves the effective client address for logging and allow/deny checks.
///
/// `X-Forwarded-For` (first hop) and `X-Real-IP` override the socket peer
/// address so deployments behind a reverse proxy see real client IPs.
/// Unparseable header values fall back to the socket address.
#[must_use]
pub fn effective_client_ip(headers: &HeaderMap, socket_ip: IpAddr) -> IpAddr {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            if let Ok(ip) = first.trim().parse() {
                return ip;
            }
        }
    }
    if let Some(real) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if let Ok(ip) = real.trim().parse() {
            return ip;
        }
    }
    socket_ip
}
