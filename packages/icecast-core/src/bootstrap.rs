//! Application bootstrap and dependency wiring.
//!
//! This module is the composition root - the single place where all
//! services are instantiated and wired together.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::auth::AuthLockout;
use crate::config::Config;
use crate::protocol_constants::AUTH_LOCKOUT_SWEEP_INTERVAL_SECS;
use crate::registry::MountRegistry;

/// Container for all bootstrapped services.
#[derive(Clone)]
pub struct AppServices {
    pub registry: Arc<MountRegistry>,
    pub auth_lockout: Arc<AuthLockout>,
    pub cancel_token: CancellationToken,
}

impl AppServices {
    /// Initiates graceful shutdown: cancels the root token, which every
    /// source/listener task and the sweep loop observe via a child token.
    pub fn shutdown(&self) {
        log::info!("beginning graceful shutdown");
        self.cancel_token.cancel();
    }
}

/// Bootstraps all application services with their dependencies.
///
/// Wiring order:
/// 1. Root cancellation token
/// 2. Mount registry, seeded from configuration
/// 3. Auth lockout tracker
/// 4. Background sweep task for the lockout tracker
pub fn bootstrap_services(config: Config) -> Result<AppServices> {
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;

    let cancel_token = CancellationToken::new();
    let registry = Arc::new(MountRegistry::new(config));
    let auth_lockout = Arc::new(AuthLockout::new());

    spawn_lockout_sweep(Arc::clone(&auth_lockout), cancel_token.child_token());

    Ok(AppServices {
        registry,
        auth_lockout,
        cancel_token,
    })
}

fn spawn_lockout_sweep(lockout: Arc<AuthLockout>, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(AUTH_LOCKOUT_SWEEP_INTERVAL_SECS));
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => lockout.sweep(),
            }
        }
        log::debug!("auth lockout sweep task stopped");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_rejects_invalid_configuration() {
        let config = Config {
            mounts: vec![crate::config::MountConfig {
                path: "missing-slash".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(bootstrap_services(config).is_err());
    }
}
