//! Embercast Core - shared library for the Embercast streaming server.
//!
//! Embercast is an Icecast-compatible live audio streaming server: one
//! producer ("source") per mount point delivers a continuous byte stream
//! (MP3, Ogg, AAC, Opus) and the server fans it out to many concurrent
//! HTTP listeners with low latency and bounded memory.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`ring`]: the per-mount ring buffer with split writer/reader handles
//! - [`mount`]: mounts, listeners, metadata, and the registry
//! - [`source`]: source handshake parsing, auth, and the ingest loop
//! - [`stream`]: codec framing, ICY metadata, the listener session
//! - [`api`]: HTTP surface (listener/source endpoints, status, admin)
//! - [`yp`]: periodic directory announcements
//! - [`config`]: configuration types consumed by everything above
//! - [`error`]: centralized error types
//!
//! Data flows source socket -> ingest -> ring buffer -> listener session
//! -> listener socket; mounts own lifecycle, the registry owns names.

#![warn(clippy::all)]

pub mod api;
pub mod config;
pub mod error;
pub mod mount;
pub mod protocol_constants;
pub mod ring;
pub mod source;
pub mod stream;
pub mod utils;
pub mod yp;

// Re-export commonly used types at the crate root
pub use api::{serve, start_server, AppState, ServerError};
pub use config::{Config, LimitsConfig, MountConfig, TimeoutConfig, YpConfig};
pub use error::{CastError, CastResult, DisconnectReason};
pub use mount::{
    is_bot_user_agent, Listener, ListenerSnapshot, Mount, MountMetadata, MountRegistry,
    MountStats, SourceAttachment, SourceStatus,
};
pub use ring::{ReadOutcome, RingBuffer, RingReader, RingWriter, SyncMode, WaitOutcome};
pub use source::{authenticate, basic_password, run_ingest, SourceHandshake};
pub use stream::{session_stream, IcyInterleaver, SessionParams};
pub use utils::now_millis;
pub use yp::{DirectoryAnnouncer, YpClient};
