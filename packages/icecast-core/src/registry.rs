//! Thread-safe keyed registry of mounts.

use std::sync::Arc;

use dashmap::DashMap;
use log::{info, warn};

use crate::config::{Config, MountConfig};
use crate::error::{IcecastError, IcecastResult};
use crate::mount::{Mount, MountStats};

/// Registry of active mounts, keyed by path. Mirrors the registry-wide
/// cap and password fallback a deployment applies uniformly.
pub struct MountRegistry {
    mounts: DashMap<String, Arc<Mount>>,
    config: parking_lot::RwLock<Config>,
}

impl MountRegistry {
    #[must_use]
    pub fn new(config: Config) -> Self {
        let mounts = DashMap::new();
        for mount_config in &config.mounts {
            mounts.insert(
                mount_config.path.clone(),
                Arc::new(Mount::new(mount_config.clone())),
            );
        }
        Self {
            mounts,
            config: parking_lot::RwLock::new(config),
        }
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<Arc<Mount>> {
        self.mounts.get(path).map(|r| Arc::clone(r.value()))
    }

    /// Returns the mount at `path`, creating it with default settings if a
    /// source is connecting to a path not pre-declared in configuration.
    pub fn get_or_create(&self, path: &str) -> IcecastResult<Arc<Mount>> {
        if let Some(mount) = self.get(path) {
            return Ok(mount);
        }
        if self.mounts.len() >= self.config.read().max_mounts {
            return Err(IcecastError::ConfigInvalid(format!(
                "registry is at its max_mounts limit ({})",
                self.config.read().max_mounts
            )));
        }
        let mount = Arc::new(Mount::new(MountConfig {
            path: path.to_string(),
            ..Default::default()
        }));
        self.mounts.insert(path.to_string(), Arc::clone(&mount));
        Ok(mount)
    }

    /// Kills the mount's source and every listener, then drops it from the
    /// registry entirely.
    pub fn remove(&self, path: &str) {
        if let Some(mount) = self.get(path) {
            mount.kill_source();
            mount.kill_all_listeners();
        }
        self.mounts.remove(path);
    }

    #[must_use]
    pub fn list(&self) -> Vec<String> {
        self.mounts.iter().map(|r| r.key().clone()).collect()
    }

    #[must_use]
    pub fn mount_count(&self) -> usize {
        self.mounts.len()
    }

    #[must_use]
    pub fn all_stats(&self) -> Vec<MountStats> {
        self.mounts.iter().map(|r| r.value().stats()).collect()
    }

    /// Resolves the password a source connecting to `path` must present:
    /// the mount's own password if set, else the registry-wide fallback.
    #[must_use]
    pub fn source_password_for(&self, path: &str) -> Option<String> {
        if let Some(mount) = self.get(path) {
            if let Some(password) = mount.config().source_password {
                return Some(password);
            }
        }
        self.config.read().source_password.clone()
    }

    #[must_use]
    pub fn admin_credentials(&self) -> (String, String) {
        let config = self.config.read();
        (config.admin_username.clone(), config.admin_password.clone())
    }

    #[must_use]
    pub fn config_snapshot(&self) -> Config {
        self.config.read().clone()
    }

    /// Hot-reloads configuration. On validation failure the previous
    /// configuration is kept, per §7 `ConfigInvalid` handling — config
    /// errors are reported, not fatal.
    pub fn apply_config(&self, new_config: Config) -> IcecastResult<()> {
        new_config
            .validate()
            .map_err(IcecastError::ConfigInvalid)?;

        for mount_config in &new_config.mounts {
            match self.mounts.get(&mount_config.path) {
                Some(existing) => existing.update_from_config(mount_config.clone()),
                None => {
                    info!("creating mount {} from reloaded configuration", mount_config.path);
                    self.mounts.insert(
                        mount_config.path.clone(),
                        Arc::new(Mount::new(mount_config.clone())),
                    );
                }
            }
        }

        let declared: std::collections::HashSet<&str> = new_config
            .mounts
            .iter()
            .map(|m| m.path.as_str())
            .collect();
        let stale: Vec<String> = self
            .mounts
            .iter()
            .map(|r| r.key().clone())
            .filter(|path| !declared.contains(path.as_str()) && !self.get(path).map(|m| m.is_active()).unwrap_or(false))
            .collect();
        for path in stale {
            if self.mounts.get(&path).map(|m| m.listener_count()).unwrap_or(0) == 0 {
                warn!("dropping mount {} no longer present in reloaded configuration", path);
                self.remove(&path);
            }
        }

        *self.config.write() = new_config;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pre_declared_mounts_exist_on_construction() {
        let registry = MountRegistry::new(Config {
            mounts: vec![MountConfig {
                path: "/stream".into(),
                ..Default::default()
            }],
            ..Default::default()
        });
        assert!(registry.get("/stream").is_some());
    }

    #[test]
    fn get_or_create_makes_a_new_mount_on_demand() {
        let registry = MountRegistry::new(Config::default());
        assert!(registry.get("/new").is_none());
        let mount = registry.get_or_create("/new").unwrap();
        assert_eq!(mount.path(), "/new");
        assert!(registry.get("/new").is_some());
    }

    #[test]
    fn get_or_create_respects_max_mounts() {
        let registry = MountRegistry::new(Config {
            max_mounts: 1,
            mounts: vec![MountConfig {
                path: "/a".into(),
                ..Default::default()
            }],
            ..Default::default()
        });
        assert!(registry.get_or_create("/b").is_err());
    }

    #[test]
    fn invalid_reload_keeps_previous_config() {
        let registry = MountRegistry::new(Config::default());
        let bad = Config {
            mounts: vec![MountConfig {
                path: "no-leading-slash".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(registry.apply_config(bad).is_err());
        assert_eq!(registry.mount_count(), 0);
    }

    #[test]
    fn source_password_falls_back_to_registry_wide() {
        let registry = MountRegistry::new(Config {
            source_password: Some("hunter2".into()),
            mounts: vec![MountConfig {
                path: "/stream".into(),
                ..Default::default()
            }],
            ..Default::default()
        });
        assert_eq!(
            registry.source_password_for("/stream").as_deref(),
            Some("hunter2")
        );
    }

    #[test]
    fn remove_kills_source_and_listeners_before_dropping_the_mount() {
        use std::net::{IpAddr, Ipv4Addr};
        use tokio_util::sync::CancellationToken;

        let registry = MountRegistry::new(Config {
            mounts: vec![MountConfig {
                path: "/stream".into(),
                ..Default::default()
            }],
            ..Default::default()
        });
        let mount = registry.get("/stream").unwrap();
        let cancel = CancellationToken::new();
        mount
            .start_source(
                crate::mount::SourceIdentity {
                    remote_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
                    connected_at: std::time::Instant::now(),
                    user_agent: None,
                },
                cancel.clone(),
            )
            .unwrap();
        let (_, cursor) = mount.add_listener(IpAddr::V4(Ipv4Addr::LOCALHOST), None).unwrap();

        registry.remove("/stream");

        assert!(cancel.is_cancelled());
        assert!(cursor.is_closed());
        assert!(registry.get("/stream").is_none());
    }
}
