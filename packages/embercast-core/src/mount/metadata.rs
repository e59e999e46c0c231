//! Per-mount stream metadata.
//!
//! Metadata is published as an immutable snapshot behind an `Arc`; updates
//! swap the whole snapshot so readers never observe a half-written struct.
//! Listeners cache the last title they emitted for change detection, so
//! they only ever need the current snapshot, never a diff.

use serde::Serialize;

/// An immutable snapshot of a mount's stream metadata.
///
/// Built from the source handshake's `ice-*` headers, the mount
/// configuration, and subsequent `updinfo` admin calls.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MountMetadata {
    /// MIME type the source declared (e.g. `audio/mpeg`).
    pub content_type: String,
    /// Station name (`ice-name` or mount config).
    pub name: Option<String>,
    /// Genre (`ice-genre` or mount config).
    pub genre: Option<String>,
    /// Free-form description.
    pub description: Option<String>,
    /// Homepage URL (`ice-url`).
    pub url: Option<String>,
    /// Nominal bitrate in kbps, from `ice-bitrate`, config, or the probe.
    pub bitrate: Option<u32>,
    /// Whether the mount wants directory listing (`ice-public`).
    pub public: bool,
    /// Current track, usually "artist - title".
    pub stream_title: Option<String>,
}

impl MountMetadata {
    /// Returns a copy with a different stream title.
    pub fn with_stream_title(&self, title: Option<String>) -> Self {
        Self {
            stream_title: title,
            ..self.clone()
        }
    }

    /// Returns a copy with the bitrate filled in, keeping an existing value.
    pub fn with_probed_bitrate(&self, bitrate: u32) -> Self {
        Self {
            bitrate: Some(self.bitrate.unwrap_or(bitrate)),
            ..self.clone()
        }
    }
}
