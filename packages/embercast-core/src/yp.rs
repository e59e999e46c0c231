//! Directory (YP) announcements.
//!
//! A deliberately small surface: public mounts are periodically announced
//! to a configured directory endpoint. Full YP semantics (touch ids,
//! removal handshakes) are out of scope; the hook exists so a directory
//! can learn the server is alive and what it carries.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::YpConfig;
use crate::error::{CastError, CastResult};
use crate::mount::MountRegistry;
use crate::protocol_constants::{server_ident, SERVER_NAME};

/// One announcement payload.
#[derive(Debug, Serialize)]
pub struct Announcement {
    pub server: String,
    pub server_name: String,
    pub listen_url: String,
    pub mounts: Vec<AnnouncedMount>,
}

/// A public mount as presented to the directory.
#[derive(Debug, Serialize)]
pub struct AnnouncedMount {
    pub path: String,
    pub url: String,
    pub name: Option<String>,
    pub genre: Option<String>,
    pub bitrate: Option<u32>,
    pub content_type: Option<String>,
    pub listeners: usize,
}

/// Seam for directory announcements, so the periodic task is testable
/// without a network.
#[async_trait]
pub trait DirectoryAnnouncer: Send + Sync {
    /// Delivers one announcement.
    async fn announce(&self, announcement: &Announcement) -> CastResult<()>;
}

/// `reqwest`-backed announcer posting JSON to the configured endpoint.
pub struct YpClient {
    http: reqwest::Client,
    endpoint: String,
}

impl YpClient {
    /// Creates a client when the configuration names an endpoint.
    pub fn from_config(yp: &YpConfig) -> Option<Self> {
        let endpoint = yp.url.clone()?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .ok()?;
        Some(Self { http, endpoint })
    }
}

#[async_trait]
impl DirectoryAnnouncer for YpClient {
    async fn announce(&self, announcement: &Announcement) -> CastResult<()> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(announcement)
            .send()
            .await
            .map_err(|e| CastError::Internal(e.to_string()))?;
        if !response.status().is_success() {
            return Err(CastError::Internal(format!(
                "directory replied {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Derives the externally reachable base URL when none is configured.
fn derive_listen_url(yp: &YpConfig, port: u16) -> String {
    if let Some(url) = &yp.listen_url {
        return url.clone();
    }
    let host = local_ip_address::local_ip()
        .map(|ip| ip.to_string())
        .or_else(|_| {
            hostname::get().map(|h| h.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|_| "localhost".to_string());
    format!("http://{}:{}", host, port)
}

/// Builds the announcement for the registry's current public mounts.
pub fn build_announcement(registry: &MountRegistry, listen_url: &str) -> Announcement {
    let mounts = registry
        .list()
        .into_iter()
        .filter(|stats| stats.public && stats.active)
        .map(|stats| AnnouncedMount {
            url: format!("{}{}", listen_url, stats.path),
            path: stats.path,
            name: stats.name,
            genre: stats.genre,
            bitrate: stats.bitrate,
            content_type: stats.content_type,
            listeners: stats.listeners,
        })
        .collect();
    Announcement {
        server: server_ident(),
        server_name: SERVER_NAME.to_string(),
        listen_url: listen_url.to_string(),
        mounts,
    }
}

/// Spawns the periodic announcement task. Returns `None` when directory
/// announcements are not configured.
pub fn spawn_announcer(
    registry: Arc<MountRegistry>,
    bound_port: u16,
) -> Option<tokio::task::JoinHandle<()>> {
    let yp = registry.config().yp.clone();
    let client = YpClient::from_config(&yp)?;
    let interval = Duration::from_secs(yp.interval_secs.max(60));
    let listen_url = derive_listen_url(&yp, bound_port);

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let announcement = build_announcement(&registry, &listen_url);
            if announcement.mounts.is_empty() {
                continue;
            }
            match client.announce(&announcement).await {
                Ok(()) => log::debug!(
                    "[Yp] Announced {} mount(s) to directory",
                    announcement.mounts.len()
                ),
                Err(e) => log::warn!("[Yp] Announcement failed: {}", e),
            }
        }
    }))
}
