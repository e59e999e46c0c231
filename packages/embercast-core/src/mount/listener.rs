//! Listener records and bot classification.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::utils::now_millis;

/// Case-insensitive substrings identifying link-preview fetchers and
/// crawlers. Bots are admitted without counting against `max_listeners`
/// (a preview fetch shouldn't evict a real listener slot) but are still
/// tracked and metered.
const BOT_AGENT_SUBSTRINGS: &[&str] = &[
    "facebookexternalhit",
    "twitterbot",
    "slackbot",
    "discordbot",
    "telegrambot",
    "whatsapp",
    "linkedinbot",
    "skypeuripreview",
    "googlebot",
    "bingbot",
    "crawler",
    "spider",
];

/// Returns true if the user-agent matches the bot allowlist.
pub fn is_bot_user_agent(user_agent: &str) -> bool {
    let lowered = user_agent.to_ascii_lowercase();
    BOT_AGENT_SUBSTRINGS
        .iter()
        .any(|needle| lowered.contains(needle))
}

/// One connected listener, owned by its mount for the connection lifetime.
pub struct Listener {
    /// Stable opaque id, also used by admin kick.
    pub id: Uuid,
    /// Effective peer address (after `X-Forwarded-For`/`X-Real-IP`).
    pub remote_ip: IpAddr,
    /// The client's user-agent, if any.
    pub user_agent: Option<String>,
    /// When the connection was accepted.
    pub connected_at: Instant,
    /// Wall-clock connect time (milliseconds since epoch) for status output.
    pub connected_at_millis: u64,
    /// Whether the user-agent matched the bot allowlist.
    pub is_bot: bool,
    /// Tripped by client disconnect, admin kick, or mount removal. Every
    /// suspension point in the streaming task observes it.
    pub cancel: CancellationToken,
    /// Total bytes delivered to this listener.
    bytes_sent: AtomicU64,
    /// Total bytes skipped past (laps and skip-to-live jumps).
    skipped_bytes: AtomicU64,
    /// The listener's current absolute read position, for observability.
    position: AtomicU64,
}

impl Listener {
    /// Creates a record for a freshly accepted connection.
    pub fn new(remote_ip: IpAddr, user_agent: Option<String>) -> Self {
        let is_bot = user_agent.as_deref().is_some_and(is_bot_user_agent);
        Self {
            id: Uuid::new_v4(),
            remote_ip,
            user_agent,
            connected_at: Instant::now(),
            connected_at_millis: now_millis(),
            is_bot,
            cancel: CancellationToken::new(),
            bytes_sent: AtomicU64::new(0),
            skipped_bytes: AtomicU64::new(0),
            position: AtomicU64::new(0),
        }
    }

    /// Adds to the delivered-bytes counter.
    pub fn add_bytes_sent(&self, n: u64) {
        self.bytes_sent.fetch_add(n, Ordering::Relaxed);
    }

    /// Total bytes delivered so far.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Adds to the skipped-bytes counter (lap or skip-to-live).
    pub fn add_skipped(&self, n: u64) {
        self.skipped_bytes.fetch_add(n, Ordering::Relaxed);
    }

    /// Total bytes this listener jumped past.
    pub fn skipped_bytes(&self) -> u64 {
        self.skipped_bytes.load(Ordering::Relaxed)
    }

    /// Publishes the current read position.
    pub fn set_position(&self, pos: u64) {
        self.position.store(pos, Ordering::Relaxed);
    }

    /// Last published read position.
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    /// Connection duration in whole seconds.
    pub fn connected_secs(&self) -> u64 {
        self.connected_at.elapsed().as_secs()
    }

    /// Snapshot for `listclients` and the status document.
    pub fn snapshot(&self) -> ListenerSnapshot {
        ListenerSnapshot {
            id: self.id,
            ip: self.remote_ip.to_string(),
            user_agent: self.user_agent.clone(),
            connected_secs: self.connected_secs(),
            bytes_sent: self.bytes_sent(),
            skipped_bytes: self.skipped_bytes(),
            is_bot: self.is_bot,
        }
    }
}

/// Serializable view of one listener.
#[derive(Debug, Clone, Serialize)]
pub struct ListenerSnapshot {
    pub id: Uuid,
    pub ip: String,
    pub user_agent: Option<String>,
    pub connected_secs: u64,
    pub bytes_sent: u64,
    pub skipped_bytes: u64,
    pub is_bot: bool,
}
