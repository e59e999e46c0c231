//! Thread-safe registry of mounts.
//!
//! Provides keyed lookup and creation of [`Mount`] instances plus the
//! aggregate counters used by the status document. This is a low-level
//! data structure; protocol orchestration lives in the API layer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;

use crate::config::Config;
use crate::error::{CastError, CastResult};
use crate::mount::{Mount, MountStats};

/// Mapping from path to mount. Paths are unique, case-sensitive, and must
/// begin with `/`.
pub struct MountRegistry {
    mounts: DashMap<String, Arc<Mount>>,
    config: Config,
    started_at: Instant,
    started_at_millis: u64,
    /// Lazily refreshed aggregate of per-mount delivered-bytes counters.
    total_bytes_sent: AtomicU64,
}

impl MountRegistry {
    /// Creates a registry and instantiates the pre-declared mounts.
    pub fn new(config: Config) -> Self {
        let registry = Self {
            mounts: DashMap::new(),
            config,
            started_at: Instant::now(),
            started_at_millis: crate::utils::now_millis(),
            total_bytes_sent: AtomicU64::new(0),
        };
        for (path, mount_config) in registry.config.mounts.clone() {
            registry.mounts.insert(
                path.clone(),
                Arc::new(Mount::new(
                    path,
                    mount_config,
                    registry.config.limits.queue_size,
                    registry.config.limits.burst_size,
                )),
            );
        }
        registry
    }

    /// The configuration the registry was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Looks up a mount by path.
    pub fn get(&self, path: &str) -> Option<Arc<Mount>> {
        self.mounts.get(path).map(|entry| Arc::clone(entry.value()))
    }

    /// Looks up a mount, creating it with defaults on first reference.
    ///
    /// Used by the source path: connecting a source to an undeclared mount
    /// brings it into existence (configured mounts were created at
    /// startup).
    pub fn get_or_create(&self, path: &str) -> CastResult<Arc<Mount>> {
        if !path.starts_with('/') {
            return Err(CastError::InvalidRequest(format!(
                "mount path {:?} must begin with '/'",
                path
            )));
        }
        let entry = self.mounts.entry(path.to_string()).or_insert_with(|| {
            let mount_config = self.config.mounts.get(path).cloned().unwrap_or_default();
            Arc::new(Mount::new(
                path.to_string(),
                mount_config,
                self.config.limits.queue_size,
                self.config.limits.burst_size,
            ))
        });
        Ok(Arc::clone(entry.value()))
    }

    /// Deletes a mount that has no source and no listeners.
    pub fn delete(&self, path: &str) -> CastResult<()> {
        let Some(entry) = self.mounts.get(path) else {
            return Err(CastError::MountNotFound(path.to_string()));
        };
        let mount = Arc::clone(entry.value());
        drop(entry);
        if mount.has_source() || mount.listener_count() > 0 {
            return Err(CastError::MountInUse(path.to_string()));
        }
        self.mounts.remove(path);
        Ok(())
    }

    /// Stats snapshots for every mount. Order is not meaningful.
    pub fn list(&self) -> Vec<MountStats> {
        self.mounts
            .iter()
            .map(|entry| entry.value().stats())
            .collect()
    }

    /// Total non-bot listeners across all mounts, for the global cap.
    pub fn total_non_bot_listeners(&self) -> usize {
        self.mounts
            .iter()
            .map(|entry| entry.value().non_bot_listener_count())
            .sum()
    }

    /// Whether the global client cap has room for another non-bot listener.
    pub fn has_client_capacity(&self) -> bool {
        self.total_non_bot_listeners() < self.config.limits.max_clients
    }

    /// Number of mounts with an attached source.
    pub fn active_source_count(&self) -> usize {
        self.mounts
            .iter()
            .filter(|entry| entry.value().has_source())
            .count()
    }

    /// Whether another source may attach under the global source cap.
    pub fn has_source_capacity(&self) -> bool {
        self.active_source_count() < self.config.limits.max_sources
    }

    /// Refreshes and returns the aggregate delivered-bytes counter.
    ///
    /// Recomputed from the per-mount counters on demand (status requests),
    /// never on the streaming hot path.
    pub fn total_bytes_sent(&self) -> u64 {
        let total = self
            .mounts
            .iter()
            .map(|entry| entry.value().total_bytes_sent())
            .sum();
        self.total_bytes_sent.store(total, Ordering::Relaxed);
        total
    }

    /// Server uptime in whole seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Wall-clock start time (milliseconds since epoch).
    pub fn started_at_millis(&self) -> u64 {
        self.started_at_millis
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MountConfig;
    use crate::mount::{Listener, MountMetadata};

    fn registry() -> MountRegistry {
        MountRegistry::new(Config::default())
    }

    #[test]
    fn configured_mounts_exist_at_startup() {
        let mut config = Config::default();
        config.mounts.insert(
            "/live".to_string(),
            MountConfig {
                name: Some("Main".to_string()),
                ..Default::default()
            },
        );
        let registry = MountRegistry::new(config);
        let mount = registry.get("/live").unwrap();
        assert_eq!(mount.metadata().name.as_deref(), Some("Main"));
    }

    #[test]
    fn get_or_create_creates_once() {
        let registry = registry();
        assert!(registry.get("/live").is_none());
        let first = registry.get_or_create("/live").unwrap();
        let second = registry.get_or_create("/live").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn paths_must_begin_with_slash() {
        let registry = registry();
        assert!(registry.get_or_create("live").is_err());
    }

    #[test]
    fn paths_are_case_sensitive() {
        let registry = registry();
        registry.get_or_create("/Live").unwrap();
        assert!(registry.get("/live").is_none());
    }

    #[test]
    fn delete_rejects_mount_in_use() {
        let registry = registry();
        let mount = registry.get_or_create("/live").unwrap();
        let listener = Arc::new(Listener::new("192.0.2.1".parse().unwrap(), None));
        let id = listener.id;
        mount.add_listener(listener).unwrap();

        assert!(matches!(
            registry.delete("/live"),
            Err(CastError::MountInUse(_))
        ));

        mount.remove_listener(id);
        assert!(registry.delete("/live").is_ok());
        assert!(registry.get("/live").is_none());
    }

    #[test]
    fn delete_unknown_mount_reports_not_found() {
        let registry = registry();
        assert!(matches!(
            registry.delete("/nope"),
            Err(CastError::MountNotFound(_))
        ));
    }

    #[test]
    fn aggregate_bytes_sum_across_mounts() {
        let registry = registry();
        registry.get_or_create("/a").unwrap().add_bytes_sent(100);
        registry.get_or_create("/b").unwrap().add_bytes_sent(50);
        assert_eq!(registry.total_bytes_sent(), 150);
    }

    #[test]
    fn source_capacity_counts_active_sources() {
        let mut config = Config::default();
        config.limits.max_sources = 1;
        let registry = MountRegistry::new(config);

        assert!(registry.has_source_capacity());
        let mount = registry.get_or_create("/live").unwrap();
        mount
            .attach_source(
                "198.51.100.1".parse().unwrap(),
                None,
                MountMetadata {
                    content_type: "audio/mpeg".to_string(),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(!registry.has_source_capacity());
    }
}
