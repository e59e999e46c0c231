//! Core configuration types.
//!
//! Provides the server-wide [`Config`], per-mount [`MountConfig`], and
//! grouped [`LimitsConfig`]/[`TimeoutConfig`]. All fields have sensible
//! defaults; `validate()` rejects values that would cause runtime issues.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol_constants::{
    DEFAULT_BURST_SIZE, DEFAULT_CLIENT_TIMEOUT_SECS, DEFAULT_HEADER_TIMEOUT_SECS,
    DEFAULT_MAX_CLIENTS, DEFAULT_MAX_SOURCES, DEFAULT_MOUNT_MAX_LISTENERS, DEFAULT_QUEUE_SIZE,
    DEFAULT_SOURCE_RECONNECT_WAIT_SECS, LAP_SAFETY_MARGIN,
};

/// Connection and concurrency limits.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum non-bot listeners across all mounts.
    pub max_clients: usize,

    /// Maximum simultaneously attached sources.
    pub max_sources: usize,

    /// Ring buffer capacity per mount (bytes).
    pub queue_size: usize,

    /// Default initial burst per listener (bytes); mounts may override.
    pub burst_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_clients: DEFAULT_MAX_CLIENTS,
            max_sources: DEFAULT_MAX_SOURCES,
            queue_size: DEFAULT_QUEUE_SIZE,
            burst_size: DEFAULT_BURST_SIZE,
        }
    }
}

impl LimitsConfig {
    /// Validates the limit values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_clients == 0 {
            return Err("max_clients must be >= 1".to_string());
        }
        if self.max_sources == 0 {
            return Err("max_sources must be >= 1".to_string());
        }
        if self.queue_size < self.burst_size + LAP_SAFETY_MARGIN {
            return Err(format!(
                "queue_size must be at least burst_size + {} bytes of headroom",
                LAP_SAFETY_MARGIN
            ));
        }
        Ok(())
    }
}

/// Timeouts applied to sources and listeners.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Idle timeout between listener writes while a source is live (seconds).
    pub client_timeout_secs: u64,

    /// Timeout for reading a connection's request head (seconds).
    pub header_timeout_secs: u64,

    /// How long a detached source's listeners wait for it to reattach (seconds).
    pub source_timeout_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            client_timeout_secs: DEFAULT_CLIENT_TIMEOUT_SECS,
            header_timeout_secs: DEFAULT_HEADER_TIMEOUT_SECS,
            source_timeout_secs: DEFAULT_SOURCE_RECONNECT_WAIT_SECS,
        }
    }
}

impl TimeoutConfig {
    /// Idle timeout between listener writes as a [`Duration`].
    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }

    /// Request-head read timeout as a [`Duration`].
    pub fn header_timeout(&self) -> Duration {
        Duration::from_secs(self.header_timeout_secs)
    }

    /// Source reconnect grace window as a [`Duration`].
    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs)
    }

    /// Validates the timeout values.
    pub fn validate(&self) -> Result<(), String> {
        if self.header_timeout_secs == 0 {
            return Err("header_timeout_secs must be >= 1".to_string());
        }
        if self.client_timeout_secs == 0 {
            return Err("client_timeout_secs must be >= 1".to_string());
        }
        Ok(())
    }
}

/// Per-mount configuration.
///
/// Everything is optional; unset fields fall back to the global defaults
/// at the time the mount is created.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct MountConfig {
    /// Maximum non-bot listeners on this mount.
    pub max_listeners: Option<usize>,

    /// Initial burst override (bytes).
    pub burst_size: Option<usize>,

    /// Nominal bitrate hint (kbps). Overridden by `ice-bitrate` or the
    /// ingest probe when absent.
    pub bitrate: Option<u32>,

    /// Source password override for this mount.
    pub source_password: Option<String>,

    /// IPs allowed to listen. Empty means everyone.
    pub allow: Vec<IpAddr>,

    /// IPs denied. Checked before the allow list.
    pub deny: Vec<IpAddr>,

    /// Station name announced in `icy-name`.
    pub name: Option<String>,

    /// Genre announced in `icy-genre`.
    pub genre: Option<String>,

    /// Free-form description for the status document.
    pub description: Option<String>,

    /// Whether the mount may be announced to a directory.
    pub public: bool,
}

impl MountConfig {
    /// Effective listener cap, falling back to the global default.
    pub fn effective_max_listeners(&self) -> usize {
        self.max_listeners.unwrap_or(DEFAULT_MOUNT_MAX_LISTENERS)
    }

    /// Effective burst size given the global default.
    pub fn effective_burst_size(&self, global_burst: usize) -> usize {
        self.burst_size.unwrap_or(global_burst)
    }

    /// Returns true if `ip` passes the deny-then-allow check.
    pub fn ip_allowed(&self, ip: &IpAddr) -> bool {
        if self.deny.contains(ip) {
            return false;
        }
        self.allow.is_empty() || self.allow.contains(ip)
    }
}

/// Directory (YP) announcement settings.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct YpConfig {
    /// Directory endpoint to announce to. Announcements are disabled when unset.
    pub url: Option<String>,

    /// Interval between announcements (seconds).
    pub interval_secs: u64,

    /// Externally reachable base URL of this server, e.g.
    /// `http://radio.example.net:8000`. Auto-derived when unset.
    pub listen_url: Option<String>,
}

/// Configuration for the Embercast core.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// Server-wide source password (mounts may override).
    pub source_password: String,

    /// Password for the admin control surface. Admin endpoints reject
    /// everything when unset.
    pub admin_password: Option<String>,

    /// Connection and buffer limits.
    pub limits: LimitsConfig,

    /// Source/listener timeouts.
    pub timeouts: TimeoutConfig,

    /// Pre-declared mounts, keyed by path (must begin with `/`).
    pub mounts: HashMap<String, MountConfig>,

    /// Directory announcement settings.
    pub yp: YpConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_password: "hackme".to_string(),
            admin_password: None,
            limits: LimitsConfig::default(),
            timeouts: TimeoutConfig::default(),
            mounts: HashMap::new(),
            yp: YpConfig::default(),
        }
    }
}

impl Config {
    /// Validates the whole configuration tree.
    pub fn validate(&self) -> Result<(), String> {
        self.limits.validate()?;
        self.timeouts.validate()?;
        for (path, mount) in &self.mounts {
            if !path.starts_with('/') {
                return Err(format!("mount path {:?} must begin with '/'", path));
            }
            if let Some(burst) = mount.burst_size {
                if burst + LAP_SAFETY_MARGIN > self.limits.queue_size {
                    return Err(format!(
                        "mount {:?}: burst_size {} does not fit the {} byte queue",
                        path, burst, self.limits.queue_size
                    ));
                }
            }
        }
        Ok(())
    }

    /// Resolves the source password for a mount (mount override first).
    pub fn source_password_for<'a>(&'a self, mount_config: &'a MountConfig) -> &'a str {
        mount_config
            .source_password
            .as_deref()
            .unwrap_or(&self.source_password)
    }
}
