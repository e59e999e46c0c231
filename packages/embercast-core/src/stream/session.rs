//! Per-listener streaming session.
//!
//! One session runs for the duration of one HTTP response body. The state
//! machine: wait for a source (if none is attached), send the initial
//! burst from the ring buffer tail, then follow the live edge, skipping
//! forward when the listener falls moderately behind, disconnecting when it
//! falls hopelessly behind, and interleaving ICY metadata when requested.
//!
//! The session is expressed as a byte stream (the response body); a drop
//! guard removes the listener from its mount and logs a summary however
//! the body ends, including abrupt client disconnects.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use bytes::Bytes;
use futures::Stream;
use parking_lot::Mutex;

use crate::error::DisconnectReason;
use crate::mount::{Listener, Mount, SourceStatus};
use crate::protocol_constants::{HARD_LAG_LIMIT, SOFT_LAG_LIMIT, STREAM_CHUNK_SIZE};
use crate::ring::{SyncMode, WaitOutcome};
use crate::stream::icy::IcyInterleaver;

/// Parameters fixed at session start.
#[derive(Debug, Clone)]
pub struct SessionParams {
    /// Initial burst size in bytes.
    pub burst_size: usize,
    /// Sync-point search mode for the mount's codec.
    pub sync_mode: SyncMode,
    /// Whether the client requested `Icy-MetaData: 1`.
    pub icy_enabled: bool,
    /// Grace window for a detached source to reattach.
    pub source_reconnect_wait: Duration,
    /// Idle timeout between reads while a source is live.
    pub client_timeout: Duration,
}

/// Removes the listener and logs the session summary on drop.
///
/// Dropping is the one path every session end funnels through (clean
/// close, error, or the client vanishing mid-transfer), so cleanup lives
/// here rather than at each exit point.
struct SessionGuard {
    mount: Arc<Mount>,
    listener: Arc<Listener>,
    reason: Mutex<DisconnectReason>,
}

impl SessionGuard {
    fn new(mount: Arc<Mount>, listener: Arc<Listener>) -> Self {
        Self {
            mount,
            listener,
            reason: Mutex::new(DisconnectReason::ClientGone),
        }
    }

    fn set_reason(&self, reason: DisconnectReason) {
        *self.reason.lock() = reason;
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let removed = self.mount.remove_listener(self.listener.id);
        let reason = *self.reason.lock();
        // Already gone from the mount with no reason of our own: an admin
        // kick removed it while the body was still being polled.
        let reason = if removed.is_none() && reason == DisconnectReason::ClientGone {
            DisconnectReason::Kicked
        } else {
            reason
        };
        log::info!(
            "[Session] {} listener {} ({}) closed ({}): {} bytes sent, {} skipped, {}s connected",
            self.mount.path,
            self.listener.id,
            self.listener.remote_ip,
            reason.as_str(),
            self.listener.bytes_sent(),
            self.listener.skipped_bytes(),
            self.listener.connected_secs(),
        );
    }
}

/// Builds the response body stream for one listener.
///
/// The listener must already be registered on the mount; the returned
/// stream owns its removal.
pub fn session_stream(
    mount: Arc<Mount>,
    listener: Arc<Listener>,
    params: SessionParams,
) -> impl Stream<Item = Result<Bytes, io::Error>> + Send + 'static {
    stream! {
        let guard = SessionGuard::new(Arc::clone(&mount), Arc::clone(&listener));
        let reader = mount.reader();
        let mut status_rx = mount.source_status();
        let cancel = listener.cancel.clone();

        // ── WAIT_SOURCE ──────────────────────────────────────────────────
        // Only entered when no source is attached; bounded by the same
        // grace window a detached source gets.
        if !status_rx.borrow_and_update().is_active() {
            let deadline = tokio::time::Instant::now() + params.source_reconnect_wait;
            loop {
                tokio::select! {
                    changed = status_rx.changed() => {
                        if changed.is_err() {
                            guard.set_reason(DisconnectReason::SourceTimeout);
                            return;
                        }
                        if status_rx.borrow_and_update().is_active() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep_until(deadline) => {
                        guard.set_reason(DisconnectReason::SourceTimeout);
                        return;
                    }
                    _ = cancel.cancelled() => return,
                }
            }
        }

        // Content type and generation the session started with; a later
        // attach with a different content type closes the session.
        let (mut generation_seen, session_content_type) = match &*status_rx.borrow() {
            SourceStatus::Active { generation, content_type } => {
                (*generation, content_type.clone())
            }
            // Lost again between the wait and here; the LIVE loop's grace
            // window handles it.
            _ => (0, mount.metadata().content_type.clone()),
        };

        let mut icy = params.icy_enabled.then(IcyInterleaver::new);
        let mut scratch = vec![0u8; STREAM_CHUNK_SIZE];

        // ── BURSTING ─────────────────────────────────────────────────────
        // Start far enough back that the client's decoder buffer fills
        // immediately, snapped forward to a codec frame boundary.
        let live_edge = reader.write_pos();
        let burst_start = live_edge.saturating_sub(params.burst_size as u64);
        let mut pos = reader.find_sync_point(burst_start, params.sync_mode);
        listener.set_position(pos);

        while pos < live_edge {
            if cancel.is_cancelled() {
                return;
            }
            let outcome = reader.read_from(pos, &mut scratch);
            if outcome.len == 0 {
                break;
            }
            if outcome.skipped > 0 {
                listener.add_skipped(outcome.skipped);
            }
            let audio = &scratch[..outcome.len];
            let chunk = match icy.as_mut() {
                Some(icy) => {
                    let title = mount.metadata().stream_title.clone().unwrap_or_default();
                    icy.interleave(audio, &title)
                }
                None => Bytes::copy_from_slice(audio),
            };
            pos = outcome.new_pos;
            listener.set_position(pos);
            listener.add_bytes_sent(outcome.len as u64);
            mount.add_bytes_sent(outcome.len as u64);
            yield Ok(chunk);
        }

        // ── LIVE (with transient RECOVERING) ─────────────────────────────
        loop {
            if cancel.is_cancelled() {
                return;
            }

            // Source liveness and content-type change detection.
            let status = status_rx.borrow_and_update().clone();
            match status {
                SourceStatus::Active { generation, content_type } => {
                    if generation != generation_seen {
                        if content_type != session_content_type {
                            log::info!(
                                "[Session] {} content type changed {} -> {}, closing listener {}",
                                mount.path,
                                session_content_type,
                                content_type,
                                listener.id
                            );
                            guard.set_reason(DisconnectReason::ContentTypeChanged);
                            return;
                        }
                        generation_seen = generation;
                    }
                }
                SourceStatus::Offline { since } => {
                    if since.elapsed() >= params.source_reconnect_wait {
                        guard.set_reason(DisconnectReason::SourceTimeout);
                        return;
                    }
                }
                SourceStatus::Idle => {}
            }

            // Lag policy: disconnect the hopeless, skip the recoverable.
            let write_pos = reader.write_pos();
            let lag = write_pos.saturating_sub(pos);
            if lag > HARD_LAG_LIMIT {
                log::warn!(
                    "[Session] {} listener {} {} bytes behind live, disconnecting",
                    mount.path,
                    listener.id,
                    lag
                );
                guard.set_reason(DisconnectReason::TooSlow);
                return;
            }
            if lag > SOFT_LAG_LIMIT {
                // Guard against a burst size larger than the lag: never
                // move the read position backwards.
                let target = write_pos.saturating_sub(params.burst_size as u64);
                if target > pos {
                    let snapped = reader.find_sync_point(target, params.sync_mode);
                    let jumped = snapped.saturating_sub(pos);
                    listener.add_skipped(jumped);
                    if let Some(icy) = icy.as_mut() {
                        icy.reset_countdown();
                    }
                    log::debug!(
                        "[Session] {} listener {} skipped {} bytes to live edge",
                        mount.path,
                        listener.id,
                        jumped
                    );
                    pos = snapped;
                    listener.set_position(pos);
                }
            }

            let outcome = reader.read_from(pos, &mut scratch);
            if outcome.skipped > 0 {
                // Lapped by the writer between iterations; counted but not
                // fatal, the read already repositioned us.
                listener.add_skipped(outcome.skipped);
                log::debug!(
                    "[Session] {} listener {} lapped, skipped {} bytes",
                    mount.path,
                    listener.id,
                    outcome.skipped
                );
            }

            if outcome.len == 0 {
                let deadline = match &*status_rx.borrow() {
                    SourceStatus::Offline { since } => {
                        tokio::time::Instant::from_std(*since + params.source_reconnect_wait)
                    }
                    _ => tokio::time::Instant::now() + params.client_timeout,
                };
                match reader.wait_for_data(pos, deadline, &cancel).await {
                    WaitOutcome::Ready => continue,
                    WaitOutcome::Cancelled => return,
                    WaitOutcome::TimedOut => {
                        if status_rx.borrow().is_active() {
                            // A live source produced nothing for the whole
                            // idle window; treat it as dead air.
                            guard.set_reason(DisconnectReason::SourceTimeout);
                            return;
                        }
                        // Offline: loop back so the grace-window check runs.
                        continue;
                    }
                }
            }

            let audio = &scratch[..outcome.len];
            let chunk = match icy.as_mut() {
                Some(icy) => {
                    let title = mount.metadata().stream_title.clone().unwrap_or_default();
                    icy.interleave(audio, &title)
                }
                None => Bytes::copy_from_slice(audio),
            };
            pos = outcome.new_pos;
            listener.set_position(pos);
            listener.add_bytes_sent(outcome.len as u64);
            mount.add_bytes_sent(outcome.len as u64);
            yield Ok(chunk);
        }
    }
}
