//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by external specifications (ICY/Shoutcast,
//! MPEG audio framing) or are load-bearing defaults of the fan-out engine;
//! changing them would break client compatibility or streaming stability.

// ─────────────────────────────────────────────────────────────────────────────
// ICY Protocol (Shoutcast/Icecast metadata)
// ─────────────────────────────────────────────────────────────────────────────

/// ICY metadata interval (bytes of audio between metadata blocks).
///
/// 16000 bytes is the de-facto standard advertised via `icy-metaint` and
/// expected by virtually every ICY-aware player.
pub const ICY_METAINT: usize = 16_000;

/// Maximum ICY metadata payload (255 blocks of 16 bytes).
///
/// The block-count prefix is a single byte, so the payload cannot exceed
/// 255 * 16 bytes regardless of title length.
pub const ICY_MAX_PAYLOAD: usize = 255 * 16;

// ─────────────────────────────────────────────────────────────────────────────
// Ring Buffer & Streaming Defaults
// ─────────────────────────────────────────────────────────────────────────────

/// Default per-mount ring buffer capacity (10 MiB).
pub const DEFAULT_QUEUE_SIZE: usize = 10 * 1024 * 1024;

/// Default initial burst sent to a new listener (64 KiB).
///
/// Enough to fill a typical decoder buffer so playback starts immediately
/// instead of waiting for the live edge to produce data.
pub const DEFAULT_BURST_SIZE: usize = 64 * 1024;

/// Soft lag threshold (512 KiB, roughly 13 s at 320 kbps).
///
/// A listener drifting past this is skipped forward to the live edge.
pub const SOFT_LAG_LIMIT: u64 = 512 * 1024;

/// Hard lag threshold (7.5 MiB, roughly 3 minutes at 320 kbps).
///
/// A listener drifting past this will never catch up and is disconnected.
pub const HARD_LAG_LIMIT: u64 = 7_864_320;

/// Bytes kept between a lapped reader's new position and the overwrite
/// frontier, so the very next write does not immediately lap it again.
pub const LAP_SAFETY_MARGIN: usize = 16 * 1024;

/// Read chunk size for both the source scratch buffer and listener reads.
pub const STREAM_CHUNK_SIZE: usize = 16 * 1024;

/// Bytes of ingest inspected when probing an MP3 stream for its bitrate
/// and sample rate.
pub const PROBE_WINDOW_SIZE: usize = 32 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Timeouts
// ─────────────────────────────────────────────────────────────────────────────

/// How long listeners wait for a source to (re)appear before giving up (seconds).
pub const DEFAULT_SOURCE_RECONNECT_WAIT_SECS: u64 = 30;

/// Per-listener idle timeout between successful reads while a source is
/// attached (seconds).
pub const DEFAULT_CLIENT_TIMEOUT_SECS: u64 = 60;

/// Timeout for reading the request head of a new connection (seconds).
pub const DEFAULT_HEADER_TIMEOUT_SECS: u64 = 5;

/// TCP keep-alive probe interval applied to every connection (seconds).
pub const TCP_KEEPALIVE_SECS: u64 = 30;

/// Send/receive buffer size applied to every connection (64 KiB).
pub const TCP_BUFFER_SIZE: usize = 64 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Product name used in the `Server:` and `icy-name` fallback headers.
///
/// This is intentionally NOT localized since it appears in network
/// protocols where consistency matters more than translation.
pub const SERVER_NAME: &str = "Embercast";

/// `Server:` header value, e.g. `Embercast/0.3.1`.
pub fn server_ident() -> String {
    format!("{}/{}", SERVER_NAME, env!("CARGO_PKG_VERSION"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Limits
// ─────────────────────────────────────────────────────────────────────────────

/// Default global listener cap across all mounts.
pub const DEFAULT_MAX_CLIENTS: usize = 1000;

/// Default cap on simultaneously attached sources.
pub const DEFAULT_MAX_SOURCES: usize = 16;

/// Default per-mount listener cap.
pub const DEFAULT_MOUNT_MAX_LISTENERS: usize = 250;
