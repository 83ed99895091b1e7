//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use icecast_core::config::MountConfig;
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the HTTP server to.
    pub bind_addr: String,

    /// Port to bind the HTTP server to.
    /// Override: `ICECAST_BIND_PORT`
    pub bind_port: u16,

    /// Pre-declared mounts.
    pub mounts: Vec<MountConfig>,

    /// Registry-wide cap on the number of mounts.
    pub max_mounts: usize,

    /// Global source password used when a mount declares none of its own.
    /// Override: `ICECAST_SOURCE_PASSWORD`
    pub source_password: Option<String>,

    /// Admin username for the `/admin/*` control surface.
    /// Override: `ICECAST_ADMIN_USERNAME`
    pub admin_username: String,

    /// Admin password for the `/admin/*` control surface.
    /// Override: `ICECAST_ADMIN_PASSWORD`
    pub admin_password: String,

    pub source_timeout_secs: u64,
    pub client_timeout_secs: u64,
    pub header_timeout_secs: u64,
    pub shutdown_grace_secs: u64,

    /// Directory for persistent state.
    /// Override: `ICECAST_DATA_DIR`
    pub data_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let core = icecast_core::Config::default();
        Self {
            bind_addr: core.bind_addr,
            bind_port: core.bind_port,
            mounts: core.mounts,
            max_mounts: core.max_mounts,
            source_password: core.source_password,
            admin_username: core.admin_username,
            admin_password: core.admin_password,
            source_timeout_secs: core.source_timeout_secs,
            client_timeout_secs: core.client_timeout_secs,
            header_timeout_secs: core.header_timeout_secs,
            shutdown_grace_secs: core.shutdown_grace_secs,
            data_dir: None,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("ICECAST_BIND_PORT") {
            if let Ok(port) = val.parse() {
                self.bind_port = port;
            }
        }
        if let Ok(val) = std::env::var("ICECAST_BIND_ADDR") {
            self.bind_addr = val;
        }
        if let Ok(val) = std::env::var("ICECAST_SOURCE_PASSWORD") {
            self.source_password = Some(val);
        }
        if let Ok(val) = std::env::var("ICECAST_ADMIN_USERNAME") {
            self.admin_username = val;
        }
        if let Ok(val) = std::env::var("ICECAST_ADMIN_PASSWORD") {
            self.admin_password = val;
        }
    }

    /// Converts to icecast-core's registry-wide `Config` type.
    pub fn to_core_config(&self) -> icecast_core::Config {
        icecast_core::Config {
            bind_addr: self.bind_addr.clone(),
            bind_port: self.bind_port,
            mounts: self.mounts.clone(),
            max_mounts: self.max_mounts,
            source_password: self.source_password.clone(),
            admin_username: self.admin_username.clone(),
            admin_password: self.admin_password.clone(),
            source_timeout_secs: self.source_timeout_secs,
            client_timeout_secs: self.client_timeout_secs,
            header_timeout_secs: self.header_timeout_secs,
            shutdown_grace_secs: self.shutdown_grace_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_server_config_mirrors_core_defaults() {
        let config = ServerConfig::default();
        let core = config.to_core_config();
        assert_eq!(core.bind_port, icecast_core::Config::default().bind_port);
    }

    #[test]
    fn load_reads_bind_port_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"bind_port: 9001\nadmin_username: ops\n").unwrap();

        let config = ServerConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.bind_port, 9001);
        assert_eq!(config.admin_username, "ops");
    }

    #[test]
    fn load_rejects_malformed_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"bind_port: [not, a, port]\n").unwrap();

        assert!(ServerConfig::load(Some(file.path())).is_err());
    }
}
