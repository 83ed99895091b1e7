//! Closed-record configuration for the registry and its mounts.
//!
//! The original "config" this crate models is a bag of optional keys;
//! following the design note against duck-typed config, every recognized
//! key and its default lives here explicitly.

use serde::{Deserialize, Serialize};

use crate::protocol_constants::{
    DEFAULT_BUFFER_SIZE, DEFAULT_BURST_SIZE, DEFAULT_CLIENT_TIMEOUT_SECS, DEFAULT_HEADER_TIMEOUT_SECS,
    DEFAULT_ICY_METAINT, DEFAULT_MAX_LAG, DEFAULT_MAX_LISTENERS, DEFAULT_MAX_MOUNTS,
    DEFAULT_SOURCE_TIMEOUT_SECS, SHUTDOWN_GRACE_SECS,
};

/// Per-mount configuration: everything `Mount::update_from_config` may
/// change on a hot reload without dropping the active source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MountConfig {
    /// URL path this mount is served at, e.g. `/stream.mp3`.
    pub path: String,
    /// Mount-specific source password. Falls back to the registry-wide
    /// source password when unset.
    pub source_password: Option<String>,
    /// Maximum concurrent listeners.
    pub max_listeners: usize,
    /// Bytes delivered immediately to a newly joined listener.
    pub burst_size: usize,
    /// Lag, in bytes, past which a listener is fast-forwarded to live.
    pub max_lag: u64,
    /// Ring buffer capacity in bytes (rounded up to a power of two).
    pub buffer_size: usize,
    /// ICY metadata interval in bytes; 0 disables metadata negotiation.
    pub icy_metaint: usize,
    /// Default `Content-Type` served to listeners.
    pub content_type: String,
    /// Static ICY identity fields.
    pub name: Option<String>,
    pub genre: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub public: bool,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            source_password: None,
            max_listeners: DEFAULT_MAX_LISTENERS,
            burst_size: DEFAULT_BURST_SIZE,
            max_lag: DEFAULT_MAX_LAG,
            buffer_size: DEFAULT_BUFFER_SIZE,
            icy_metaint: DEFAULT_ICY_METAINT,
            content_type: "audio/mpeg".to_string(),
            name: None,
            genre: None,
            description: None,
            url: None,
            public: false,
        }
    }
}

impl MountConfig {
    /// Rejects configurations that would make the mount unusable.
    pub fn validate(&self) -> Result<(), String> {
        if self.path.is_empty() {
            return Err("mount path must not be empty".to_string());
        }
        if !self.path.starts_with('/') {
            return Err(format!("mount path {:?} must start with '/'", self.path));
        }
        if self.max_listeners == 0 {
            return Err(format!("{}: max_listeners must be >= 1", self.path));
        }
        if self.buffer_size == 0 {
            return Err(format!("{}: buffer_size must be >= 1", self.path));
        }
        if self.burst_size > self.buffer_size {
            return Err(format!(
                "{}: burst_size must not exceed buffer_size",
                self.path
            ));
        }
        Ok(())
    }
}

/// Registry-wide configuration: everything `MountRegistry::apply_config`
/// consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the HTTP listener binds to.
    pub bind_addr: String,
    /// Port the HTTP listener binds to.
    pub bind_port: u16,
    /// Pre-declared mounts. Additional mounts may still be created
    /// on-demand by a successful source connection, per the registry's
    /// creation policy.
    pub mounts: Vec<MountConfig>,
    /// Registry-wide cap on the number of mounts.
    pub max_mounts: usize,
    /// Global source password, used when a mount has none of its own.
    pub source_password: Option<String>,
    /// Admin username for the `/admin/*` control surface.
    pub admin_username: String,
    /// Admin password for the `/admin/*` control surface.
    pub admin_password: String,
    /// Idle timeout for a source connection.
    pub source_timeout_secs: u64,
    /// Idle timeout for a listener connection.
    pub client_timeout_secs: u64,
    /// Timeout for reading request headers.
    pub header_timeout_secs: u64,
    /// Grace period given to in-flight connections during shutdown.
    pub shutdown_grace_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            bind_port: 8000,
            mounts: Vec::new(),
            max_mounts: DEFAULT_MAX_MOUNTS,
            source_password: None,
            admin_username: "admin".to_string(),
            admin_password: String::new(),
            source_timeout_secs: DEFAULT_SOURCE_TIMEOUT_SECS,
            client_timeout_secs: DEFAULT_CLIENT_TIMEOUT_SECS,
            header_timeout_secs: DEFAULT_HEADER_TIMEOUT_SECS,
            shutdown_grace_secs: SHUTDOWN_GRACE_SECS,
        }
    }
}

impl Config {
    /// Validates the whole configuration, including every declared mount.
    /// On failure the registry keeps its previous configuration and logs
    /// the error rather than aborting (`ConfigInvalid`, §7).
    pub fn validate(&self) -> Result<(), String> {
        if self.mounts.len() > self.max_mounts {
            return Err(format!(
                "{} declared mounts exceeds max_mounts={}",
                self.mounts.len(),
                self.max_mounts
            ));
        }
        for mount in &self.mounts {
            mount.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn mount_without_leading_slash_is_rejected() {
        let mount = MountConfig {
            path: "stream.mp3".to_string(),
            ..Default::default()
        };
        assert!(mount.validate().is_err());
    }

    #[test]
    fn burst_larger_than_buffer_is_rejected() {
        let mount = MountConfig {
            path: "/stream".to_string(),
            buffer_size: 1024,
            burst_size: 4096,
            ..Default::default()
        };
        assert!(mount.validate().is_err());
    }

    #[test]
    fn too_many_mounts_is_rejected() {
        let config = Config {
            max_mounts: 1,
            mounts: vec![
                MountConfig {
                    path: "/a".into(),
                    ..Default::default()
                },
                MountConfig {
                    path: "/b".into(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
