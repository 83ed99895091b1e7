//! Source/admin credential checking and per-IP failed-auth lockout.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::protocol_constants::AUTH_LOCKOUT_WINDOW_SECS;

const MAX_FAILURES_BEFORE_LOCKOUT: u32 = 5;

struct LockoutEntry {
    failures: u32,
    locked_until: Option<Instant>,
    last_failure: Instant,
}

/// Tracks failed authentication attempts per remote address and locks an
/// address out for the lockout window once it crosses the failure count.
/// A swept entry is dropped entirely so memory doesn't grow unbounded
/// across a long server uptime.
pub struct AuthLockout {
    entries: DashMap<IpAddr, LockoutEntry>,
    window: Duration,
}

impl AuthLockout {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            window: Duration::from_secs(AUTH_LOCKOUT_WINDOW_SECS),
        }
    }

    /// `true` if `addr` is currently locked out from authenticating.
    #[must_use]
    pub fn is_locked(&self, addr: IpAddr) -> bool {
        self.entries
            .get(&addr)
            .and_then(|e| e.locked_until)
            .map(|until| Instant::now() < until)
            .unwrap_or(false)
    }

    /// Records a failed attempt, locking the address out once it has
    /// failed `MAX_FAILURES_BEFORE_LOCKOUT` times within the window.
    pub fn record_failure(&self, addr: IpAddr) {
        let mut entry = self.entries.entry(addr).or_insert_with(|| LockoutEntry {
            failures: 0,
            locked_until: None,
            last_failure: Instant::now(),
        });
        if entry.last_failure.elapsed() > self.window {
            entry.failures = 0;
            entry.locked_until = None;
        }
        entry.failures += 1;
        entry.last_failure = Instant::now();
        if entry.failures >= MAX_FAILURES_BEFORE_LOCKOUT {
            entry.locked_until = Some(Instant::now() + self.window);
        }
    }

    /// Clears the failure count on a successful authentication.
    pub fn record_success(&self, addr: IpAddr) {
        self.entries.remove(&addr);
    }

    /// Drops entries whose lockout window has fully elapsed. Intended to
    /// run on a periodic background tick.
    pub fn sweep(&self) {
        self.entries.retain(|_, entry| {
            entry.last_failure.elapsed() <= self.window
        });
    }
}

impl Default for AuthLockout {
    fn default() -> Self {
        Self::new()
    }
}

/// Constant-time-ish equality check for credential strings. Short-circuits
/// on length but not content, which is an acceptable tradeoff for this
/// surface (no timing budget requirement in the threat model here).
fn credentials_match(provided: &str, expected: &str) -> bool {
    provided.len() == expected.len()
        && provided
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

/// Verifies a source password against the mount/registry-resolved secret.
#[must_use]
pub fn check_source_password(provided: &str, expected: &str) -> bool {
    !expected.is_empty() && credentials_match(provided, expected)
}

/// Verifies HTTP Basic admin credentials.
#[must_use]
pub fn check_admin_credentials(
    username: &str,
    password: &str,
    expected_username: &str,
    expected_password: &str,
) -> bool {
    !expected_password.is_empty()
        && credentials_match(username, expected_username)
        && credentials_match(password, expected_password)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
    }

    #[test]
    fn lockout_triggers_after_threshold_failures() {
        let lockout = AuthLockout::new();
        for _ in 0..MAX_FAILURES_BEFORE_LOCKOUT {
            assert!(!lockout.is_locked(addr()));
            lockout.record_failure(addr());
        }
        assert!(lockout.is_locked(addr()));
    }

    #[test]
    fn success_clears_failure_count() {
        let lockout = AuthLockout::new();
        lockout.record_failure(addr());
        lockout.record_failure(addr());
        lockout.record_success(addr());
        assert!(!lockout.is_locked(addr()));
    }

    #[test]
    fn empty_expected_password_never_matches() {
        assert!(!check_source_password("anything", ""));
    }

    #[test]
    fn matching_source_password_passes() {
        assert!(check_source_password("hunter2", "hunter2"));
    }

    #[test]
    fn admin_credentials_require_both_fields() {
        assert!(check_admin_credentials("admin", "pw", "admin", "pw"));
        assert!(!check_admin_credentials("admin", "wrong", "admin", "pw"));
    }
}
