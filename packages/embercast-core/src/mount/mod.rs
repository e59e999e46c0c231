//! Mounts: one live stream endpoint each.
//!
//! A [`Mount`] owns its ring buffer, the active source slot, the listener
//! set, the metadata snapshot, and the per-mount counters. The registry
//! shares mounts with readers; a mount outlives any single operation
//! holding a reference to it.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::MountConfig;
use crate::error::{CastError, CastResult};
use crate::ring::{RingBuffer, RingReader, RingWriter, SyncMode};
use crate::utils::now_millis;

pub mod listener;
pub mod metadata;
pub mod registry;

pub use listener::{is_bot_user_agent, Listener, ListenerSnapshot};
pub use metadata::MountMetadata;
pub use registry::MountRegistry;

/// Source liveness as observed by listener sessions, published through a
/// `watch` channel so waiting listeners wake on transitions.
#[derive(Debug, Clone)]
pub enum SourceStatus {
    /// No source has ever attached.
    Idle,
    /// A source is live. `generation` increments on every attach;
    /// `content_type` lets sessions detect a format change on reconnect.
    Active {
        generation: u64,
        content_type: String,
    },
    /// The source detached at `since`; listeners wait out the reconnect
    /// grace window from that instant.
    Offline { since: Instant },
}

impl SourceStatus {
    /// Whether a source is currently attached.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }
}

/// Identity of the currently attached source.
struct ActiveSource {
    id: Uuid,
    remote_ip: IpAddr,
    user_agent: Option<String>,
    connected_at: Instant,
    cancel: CancellationToken,
}

/// Capabilities handed to the source ingest task by [`Mount::attach_source`].
pub struct SourceAttachment {
    /// Identifies this attachment for the matching `detach_source` call.
    pub id: Uuid,
    /// The sole write capability for the mount's ring buffer.
    pub writer: RingWriter,
    /// Tripped by admin `kill_source`; the ingest loop observes it.
    pub cancel: CancellationToken,
}

/// A named endpoint hosting one live stream.
pub struct Mount {
    /// Mount path, beginning with `/`.
    pub path: String,
    config: MountConfig,
    /// Effective burst size (mount override or global default), bytes.
    burst_size: usize,
    ring: RingBuffer,
    metadata: RwLock<Arc<MountMetadata>>,
    listeners: DashMap<Uuid, Arc<Listener>>,
    /// Listeners counted against `max_listeners` (bots excluded).
    non_bot_count: AtomicUsize,
    peak_listeners: AtomicUsize,
    total_bytes_sent: AtomicU64,
    source: Mutex<Option<ActiveSource>>,
    source_status: watch::Sender<SourceStatus>,
    source_generation: AtomicU64,
    /// Wall-clock attach time of the current source (0 = none).
    source_started_at_millis: AtomicU64,
}

impl Mount {
    /// Creates a mount with its ring buffer.
    pub fn new(path: String, config: MountConfig, queue_size: usize, global_burst: usize) -> Self {
        let burst_size = config.effective_burst_size(global_burst);
        let initial_metadata = Arc::new(MountMetadata {
            name: config.name.clone(),
            genre: config.genre.clone(),
            description: config.description.clone(),
            bitrate: config.bitrate,
            public: config.public,
            ..Default::default()
        });
        let (source_status, _) = watch::channel(SourceStatus::Idle);
        Self {
            path,
            config,
            burst_size,
            ring: RingBuffer::new(queue_size),
            metadata: RwLock::new(initial_metadata),
            listeners: DashMap::new(),
            non_bot_count: AtomicUsize::new(0),
            peak_listeners: AtomicUsize::new(0),
            total_bytes_sent: AtomicU64::new(0),
            source: Mutex::new(None),
            source_status,
            source_generation: AtomicU64::new(0),
            source_started_at_millis: AtomicU64::new(0),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Listeners
    // ─────────────────────────────────────────────────────────────────────

    /// Checks the mount's IP deny/allow lists.
    pub fn check_access(&self, ip: &IpAddr) -> CastResult<()> {
        if self.config.ip_allowed(ip) {
            Ok(())
        } else {
            Err(CastError::AccessDenied(ip.to_string()))
        }
    }

    /// Inserts a listener, enforcing the per-mount cap for non-bots.
    pub fn add_listener(&self, listener: Arc<Listener>) -> CastResult<()> {
        if !listener.is_bot {
            let cap = self.config.effective_max_listeners();
            // fetch_update keeps check-and-increment atomic against
            // concurrent connects.
            let admitted = self
                .non_bot_count
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                    (count < cap).then_some(count + 1)
                })
                .is_ok();
            if !admitted {
                return Err(CastError::ListenerLimitReached(self.path.clone()));
            }
        }

        self.listeners.insert(listener.id, listener);
        let total = self.listeners.len();
        self.peak_listeners.fetch_max(total, Ordering::Relaxed);
        Ok(())
    }

    /// Cancels and removes a listener. Idempotent.
    pub fn remove_listener(&self, id: Uuid) -> Option<Arc<Listener>> {
        let (_, listener) = self.listeners.remove(&id)?;
        listener.cancel.cancel();
        if !listener.is_bot {
            self.non_bot_count.fetch_sub(1, Ordering::SeqCst);
        }
        Some(listener)
    }

    /// Admin kick: same as removal, reported as found/not-found.
    pub fn kick_listener(&self, id: Uuid) -> bool {
        self.remove_listener(id).is_some()
    }

    /// Disconnects every listener (best effort).
    ///
    /// Backing for the `moveclients` admin operation: listeners are closed
    /// and expected to reconnect on their own.
    pub fn disconnect_all_listeners(&self) -> usize {
        let ids: Vec<Uuid> = self.listeners.iter().map(|entry| *entry.key()).collect();
        let mut removed = 0;
        for id in ids {
            if self.remove_listener(id).is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// Number of connected listeners, bots included.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Listeners counted against the cap.
    pub fn non_bot_listener_count(&self) -> usize {
        self.non_bot_count.load(Ordering::SeqCst)
    }

    /// Snapshots all listeners for `listclients`.
    pub fn listener_snapshots(&self) -> Vec<ListenerSnapshot> {
        self.listeners
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Source
    // ─────────────────────────────────────────────────────────────────────

    /// Attaches a source, rejecting a second one.
    ///
    /// The ring buffer is reused as-is: positions stay monotonic so
    /// listeners surviving a reconnect keep reading the same coordinate
    /// space. The metadata snapshot is replaced with the handshake's.
    pub fn attach_source(
        &self,
        remote_ip: IpAddr,
        user_agent: Option<String>,
        metadata: MountMetadata,
    ) -> CastResult<SourceAttachment> {
        let mut slot = self.source.lock();
        if slot.is_some() {
            return Err(CastError::SourceAlreadyActive(self.path.clone()));
        }

        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let content_type = metadata.content_type.clone();
        *slot = Some(ActiveSource {
            id,
            remote_ip,
            user_agent,
            connected_at: Instant::now(),
            cancel: cancel.clone(),
        });
        drop(slot);

        *self.metadata.write() = Arc::new(metadata);
        self.source_started_at_millis
            .store(now_millis(), Ordering::Relaxed);
        let generation = self.source_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.source_status.send_replace(SourceStatus::Active {
            generation,
            content_type,
        });

        log::info!(
            "[Mount] Source attached on {} from {} (generation {})",
            self.path,
            remote_ip,
            generation
        );

        Ok(SourceAttachment {
            id,
            writer: self.ring.writer(),
            cancel,
        })
    }

    /// Detaches the identified source.
    ///
    /// Listeners are NOT kicked: they enter the reconnect grace window and
    /// their own streaming tasks decide their fate when it expires. A stale
    /// id (an old task detaching after a new source attached) is a no-op.
    pub fn detach_source(&self, id: Uuid) {
        let mut slot = self.source.lock();
        let Some(active) = slot.take() else { return };
        if active.id != id {
            *slot = Some(active);
            return;
        }
        drop(slot);

        active.cancel.cancel();
        self.source_started_at_millis.store(0, Ordering::Relaxed);
        self.source_status.send_replace(SourceStatus::Offline {
            since: Instant::now(),
        });

        log::info!(
            "[Mount] Source detached from {} ({} listeners in grace window)",
            self.path,
            self.listeners.len()
        );
    }

    /// Admin kill: cancels the active source's token so its ingest loop
    /// exits and detaches. Returns false when no source is attached.
    pub fn kill_source(&self) -> bool {
        let slot = self.source.lock();
        match slot.as_ref() {
            Some(active) => {
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether a source is currently attached.
    pub fn has_source(&self) -> bool {
        self.source.lock().is_some()
    }

    /// Subscribes to source liveness transitions.
    pub fn source_status(&self) -> watch::Receiver<SourceStatus> {
        self.source_status.subscribe()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Metadata & streaming surface
    // ─────────────────────────────────────────────────────────────────────

    /// Current metadata snapshot (cheap Arc clone).
    pub fn metadata(&self) -> Arc<MountMetadata> {
        Arc::clone(&self.metadata.read())
    }

    /// Atomically replaces the metadata snapshot.
    pub fn set_metadata(&self, metadata: MountMetadata) {
        *self.metadata.write() = Arc::new(metadata);
    }

    /// Replaces just the stream title (admin `updinfo`).
    pub fn update_stream_title(&self, title: Option<String>) {
        let mut guard = self.metadata.write();
        *guard = Arc::new(guard.with_stream_title(title));
    }

    /// A read handle over the mount's ring buffer.
    pub fn reader(&self) -> RingReader {
        self.ring.reader()
    }

    /// Effective burst size for new listeners, bytes.
    pub fn burst_size(&self) -> usize {
        self.burst_size
    }

    /// Sync-point search mode for the current content type.
    pub fn sync_mode(&self) -> SyncMode {
        SyncMode::for_content_type(&self.metadata.read().content_type)
    }

    /// The mount's configuration snapshot.
    pub fn config(&self) -> &MountConfig {
        &self.config
    }

    /// Adds to the mount's aggregate delivered-bytes counter.
    pub fn add_bytes_sent(&self, n: u64) {
        self.total_bytes_sent.fetch_add(n, Ordering::Relaxed);
    }

    /// Aggregate delivered bytes across all listeners ever.
    pub fn total_bytes_sent(&self) -> u64 {
        self.total_bytes_sent.load(Ordering::Relaxed)
    }

    /// Consistent stats snapshot for the status document.
    pub fn stats(&self) -> MountStats {
        let metadata = self.metadata();
        let started = self.source_started_at_millis.load(Ordering::Relaxed);
        let source = self.source.lock();
        MountStats {
            path: self.path.clone(),
            active: source.is_some(),
            source_ip: source.as_ref().map(|s| s.remote_ip.to_string()),
            source_user_agent: source.as_ref().and_then(|s| s.user_agent.clone()),
            source_uptime_secs: source.as_ref().map(|s| s.connected_at.elapsed().as_secs()),
            source_started_at_millis: (started > 0).then_some(started),
            listeners: self.listeners.len(),
            peak_listeners: self.peak_listeners.load(Ordering::Relaxed),
            bytes_sent: self.total_bytes_sent(),
            content_type: (!metadata.content_type.is_empty())
                .then(|| metadata.content_type.clone()),
            name: metadata.name.clone(),
            genre: metadata.genre.clone(),
            bitrate: metadata.bitrate,
            stream_title: metadata.stream_title.clone(),
            public: metadata.public,
        }
    }
}

/// Serializable per-mount statistics.
#[derive(Debug, Clone, Serialize)]
pub struct MountStats {
    pub path: String,
    pub active: bool,
    pub source_ip: Option<String>,
    pub source_user_agent: Option<String>,
    pub source_uptime_secs: Option<u64>,
    pub source_started_at_millis: Option<u64>,
    pub listeners: usize,
    pub peak_listeners: usize,
    pub bytes_sent: u64,
    pub content_type: Option<String>,
    pub name: Option<String>,
    pub genre: Option<String>,
    pub bitrate: Option<u32>,
    pub stream_title: Option<String>,
    pub public: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol_constants::{DEFAULT_BURST_SIZE, DEFAULT_QUEUE_SIZE};

    fn test_mount(config: MountConfig) -> Mount {
        Mount::new(
            "/live".to_string(),
            config,
            DEFAULT_QUEUE_SIZE,
            DEFAULT_BURST_SIZE,
        )
    }

    fn test_listener(agent: Option<&str>) -> Arc<Listener> {
        Arc::new(Listener::new(
            "192.0.2.10".parse().unwrap(),
            agent.map(str::to_string),
        ))
    }

    fn mp3_metadata() -> MountMetadata {
        MountMetadata {
            content_type: "audio/mpeg".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn listener_cap_rejects_when_full() {
        let mount = test_mount(MountConfig {
            max_listeners: Some(2),
            ..Default::default()
        });
        assert!(mount.add_listener(test_listener(None)).is_ok());
        assert!(mount.add_listener(test_listener(None)).is_ok());
        let err = mount.add_listener(test_listener(None)).unwrap_err();
        assert!(matches!(err, CastError::ListenerLimitReached(_)));
        assert_eq!(mount.listener_count(), 2);
    }

    #[test]
    fn bots_bypass_the_cap_but_are_tracked() {
        let mount = test_mount(MountConfig {
            max_listeners: Some(1),
            ..Default::default()
        });
        mount.add_listener(test_listener(None)).unwrap();
        // Cap full, but the preview bot is still admitted.
        let bot = test_listener(Some("facebookexternalhit/1.1"));
        assert!(mount.add_listener(Arc::clone(&bot)).is_ok());
        assert_eq!(mount.listener_count(), 2);
        assert_eq!(mount.non_bot_listener_count(), 1);
        // And a further real listener is still rejected.
        assert!(mount.add_listener(test_listener(None)).is_err());
    }

    #[test]
    fn remove_listener_is_idempotent_and_cancels() {
        let mount = test_mount(MountConfig::default());
        let listener = test_listener(None);
        let id = listener.id;
        mount.add_listener(Arc::clone(&listener)).unwrap();

        let removed = mount.remove_listener(id).unwrap();
        assert!(removed.cancel.is_cancelled());
        assert!(mount.remove_listener(id).is_none());
        assert_eq!(mount.non_bot_listener_count(), 0);
    }

    #[test]
    fn removal_frees_a_cap_slot() {
        let mount = test_mount(MountConfig {
            max_listeners: Some(1),
            ..Default::default()
        });
        let first = test_listener(None);
        let id = first.id;
        mount.add_listener(first).unwrap();
        assert!(mount.add_listener(test_listener(None)).is_err());
        mount.remove_listener(id);
        assert!(mount.add_listener(test_listener(None)).is_ok());
    }

    #[test]
    fn second_source_is_rejected() {
        let mount = test_mount(MountConfig::default());
        let ip: IpAddr = "198.51.100.1".parse().unwrap();
        let first = mount.attach_source(ip, None, mp3_metadata()).unwrap();
        let err = mount
            .attach_source(ip, None, mp3_metadata())
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, CastError::SourceAlreadyActive(_)));

        // After detach, a new source may attach.
        mount.detach_source(first.id);
        assert!(mount.attach_source(ip, None, mp3_metadata()).is_ok());
    }

    #[test]
    fn detach_with_stale_id_is_a_no_op() {
        let mount = test_mount(MountConfig::default());
        let ip: IpAddr = "198.51.100.1".parse().unwrap();
        let first = mount.attach_source(ip, None, mp3_metadata()).unwrap();
        mount.detach_source(first.id);
        let second = mount.attach_source(ip, None, mp3_metadata()).unwrap();

        // The old task detaching again must not knock out the new source.
        mount.detach_source(first.id);
        assert!(mount.has_source());
        mount.detach_source(second.id);
        assert!(!mount.has_source());
    }

    #[test]
    fn attach_publishes_status_and_generation() {
        let mount = test_mount(MountConfig::default());
        let mut rx = mount.source_status();
        assert!(matches!(*rx.borrow(), SourceStatus::Idle));

        let ip: IpAddr = "198.51.100.1".parse().unwrap();
        let attachment = mount.attach_source(ip, None, mp3_metadata()).unwrap();
        match &*rx.borrow_and_update() {
            SourceStatus::Active {
                generation,
                content_type,
            } => {
                assert_eq!(*generation, 1);
                assert_eq!(content_type, "audio/mpeg");
            }
            other => panic!("expected Active, got {:?}", other),
        }

        mount.detach_source(attachment.id);
        assert!(matches!(
            *rx.borrow_and_update(),
            SourceStatus::Offline { .. }
        ));
    }

    #[test]
    fn kill_source_cancels_the_ingest_token() {
        let mount = test_mount(MountConfig::default());
        assert!(!mount.kill_source());
        let ip: IpAddr = "198.51.100.1".parse().unwrap();
        let attachment = mount.attach_source(ip, None, mp3_metadata()).unwrap();
        assert!(mount.kill_source());
        assert!(attachment.cancel.is_cancelled());
    }

    #[test]
    fn updinfo_swaps_only_the_title() {
        let mount = test_mount(MountConfig::default());
        let ip: IpAddr = "198.51.100.1".parse().unwrap();
        let metadata = MountMetadata {
            content_type: "audio/mpeg".to_string(),
            name: Some("Test FM".to_string()),
            ..Default::default()
        };
        mount.attach_source(ip, None, metadata).unwrap();

        mount.update_stream_title(Some("Artist - Title".to_string()));
        let snapshot = mount.metadata();
        assert_eq!(snapshot.stream_title.as_deref(), Some("Artist - Title"));
        assert_eq!(snapshot.name.as_deref(), Some("Test FM"));
    }

    #[test]
    fn stats_reflect_listeners_and_source() {
        let mount = test_mount(MountConfig::default());
        mount.add_listener(test_listener(None)).unwrap();
        mount.add_bytes_sent(4096);

        let stats = mount.stats();
        assert_eq!(stats.path, "/live");
        assert!(!stats.active);
        assert_eq!(stats.listeners, 1);
        assert_eq!(stats.peak_listeners, 1);
        assert_eq!(stats.bytes_sent, 4096);

        let ip: IpAddr = "198.51.100.1".parse().unwrap();
        mount.attach_source(ip, None, mp3_metadata()).unwrap();
        let stats = mount.stats();
        assert!(stats.active);
        assert_eq!(stats.content_type.as_deref(), Some("audio/mpeg"));
    }

    #[test]
    fn sync_mode_follows_content_type() {
        let mount = test_mount(MountConfig::default());
        assert_eq!(mount.sync_mode(), SyncMode::None);
        let ip: IpAddr = "198.51.100.1".parse().unwrap();
        mount.attach_source(ip, None, mp3_metadata()).unwrap();
        assert_eq!(mount.sync_mode(), SyncMode::Mp3);
    }
}
