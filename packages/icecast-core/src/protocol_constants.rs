//! Fixed protocol constants and tunable defaults for the streaming engine.
//!
//! The ICY/wire-format values here are defined by the Shoutcast/Icecast
//! metadata convention; the ring-buffer sizing defaults are tunable but
//! ship with values that work well for typical MP3/AAC bitrates.

// ─────────────────────────────────────────────────────────────────────────────
// ICY Protocol
// ─────────────────────────────────────────────────────────────────────────────

/// Default metadata interval (bytes of audio between ICY metadata frames).
pub const DEFAULT_ICY_METAINT: usize = 16_000;

/// ICY metadata frames are length-prefixed in units of this many bytes.
pub const ICY_BLOCK_SIZE: usize = 16;

// ─────────────────────────────────────────────────────────────────────────────
// Ring Buffer
// ─────────────────────────────────────────────────────────────────────────────

/// Default ring buffer capacity per mount (rounded up to a power of two).
pub const DEFAULT_BUFFER_SIZE: usize = 1 << 20; // 1 MiB

/// Default burst size delivered to a newly joined listener.
pub const DEFAULT_BURST_SIZE: usize = 64 * 1024;

/// Default lag threshold past which a listener is fast-forwarded to live.
pub const DEFAULT_MAX_LAG: u64 = 512 * 1024;

/// `LivePosition` trails `writePos` by this many bytes so a listener rebased
/// to "live" is not immediately starved waiting for the very next byte.
pub const LIVE_POSITION_LAG: u64 = 1024;

/// Fixed stride, in bytes, at which a sync point is recorded unconditionally.
pub const SYNC_POINT_STRIDE: u64 = 16 * 1024;

/// Number of slots in the sync-point ring index.
pub const SYNC_POINT_SLOTS: usize = 16;

// ─────────────────────────────────────────────────────────────────────────────
// Source Ingest
// ─────────────────────────────────────────────────────────────────────────────

/// Chunk size used when reading from a source connection.
pub const SOURCE_READ_CHUNK: usize = 16 * 1024;

/// Default idle timeout for a source connection (seconds).
pub const DEFAULT_SOURCE_TIMEOUT_SECS: u64 = 10;

/// Default idle timeout for a listener connection (seconds).
pub const DEFAULT_CLIENT_TIMEOUT_SECS: u64 = 30;

/// Timeout for reading request headers before a connection is dropped.
pub const DEFAULT_HEADER_TIMEOUT_SECS: u64 = 15;

/// Grace period given to in-flight connections during shutdown.
pub const SHUTDOWN_GRACE_SECS: u64 = 5;

/// Window after which a stale per-IP auth-failure entry is swept.
pub const AUTH_LOCKOUT_WINDOW_SECS: u64 = 300;

/// Interval between auth-lockout sweeps.
pub const AUTH_LOCKOUT_SWEEP_INTERVAL_SECS: u64 = 60;

// ─────────────────────────────────────────────────────────────────────────────
// Registry Defaults
// ─────────────────────────────────────────────────────────────────────────────

/// Default registry-wide cap on the number of mounts.
pub const DEFAULT_MAX_MOUNTS: usize = 64;

/// Default per-mount cap on concurrent listeners.
pub const DEFAULT_MAX_LISTENERS: usize = 1000;

/// Application identity string used in default ICY headers.
pub const APP_NAME: &str = "Icecast Core";
