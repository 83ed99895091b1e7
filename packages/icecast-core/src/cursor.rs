//! Per-listener read cursor over a mount's ring buffer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::ring_buffer::RingBuffer;

/// Per-listener position into a mount's ring buffer, with lag tracking and
/// skip-to-live rebasing.
pub struct ListenerCursor {
    buffer: Arc<RingBuffer>,
    position: AtomicU64,
    bytes_sent: AtomicU64,
    skip_count: AtomicU64,
    max_lag: u64,
    closed: AtomicBool,
    connected_at: Instant,
}

impl ListenerCursor {
    /// Initializes the cursor near the start of the current burst window so
    /// playback begins on a clean boundary rather than mid-frame.
    #[must_use]
    pub fn new(buffer: Arc<RingBuffer>, burst_size: usize, max_lag: u64) -> Self {
        let start = buffer
            .write_pos()
            .saturating_sub(burst_size as u64);
        let position = buffer.sync_point_near(start);
        Self {
            buffer,
            position: AtomicU64::new(position),
            bytes_sent: AtomicU64::new(0),
            skip_count: AtomicU64::new(0),
            max_lag,
            closed: AtomicBool::new(false),
            connected_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }

    /// The ring buffer this cursor reads from, for callers that need to
    /// wait on new data or take a fresh burst directly.
    #[must_use]
    pub fn buffer(&self) -> &Arc<RingBuffer> {
        &self.buffer
    }

    /// Burst bytes available right now, trailing the buffer's burst window.
    #[must_use]
    pub fn burst(&self) -> Vec<u8> {
        self.buffer.burst()
    }

    #[must_use]
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn skip_count(&self) -> u64 {
        self.skip_count.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    /// Current distance behind the write cursor.
    #[must_use]
    pub fn lag(&self) -> u64 {
        self.buffer
            .write_pos()
            .saturating_sub(self.position())
    }

    /// `true` once lag has dropped comfortably below the skip threshold.
    #[must_use]
    pub fn healthy(&self) -> bool {
        self.lag() < self.max_lag / 2
    }

    /// Reads the next chunk. If lag exceeds `max_lag`, the cursor is first
    /// fast-forwarded to the nearest sync point near live and `skip_count`
    /// is incremented — this is the skip-to-live policy, not an error.
    pub fn read(&self, dst: &mut [u8]) -> usize {
        let mut skipped_this_call = false;
        if self.lag() > self.max_lag {
            let live = self.buffer.live_position();
            let rebased = self.buffer.sync_point_near(live);
            self.position.store(rebased, Ordering::Release);
            skipped_this_call = true;
        }

        let (n, new_pos, skipped) = self.buffer.read_into(self.position(), dst);
        if skipped > 0 {
            skipped_this_call = true;
        }
        if skipped_this_call {
            self.skip_count.fetch_add(1, Ordering::AcqRel);
        }
        if n > 0 {
            self.position.store(new_pos, Ordering::Release);
            self.bytes_sent.fetch_add(n as u64, Ordering::AcqRel);
        }
        n
    }

    /// Idempotent close; safe to call more than once.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_to_live_bounds_lag() {
        let buffer = Arc::new(RingBuffer::new(1 << 16, 256));
        let cursor = ListenerCursor::new(Arc::clone(&buffer), 256, 1024);
        for _ in 0..200 {
            buffer.append(&[9u8; 64]); // 12800 bytes, far beyond max_lag
        }
        let mut dst = [0u8; 32];
        let before_skips = cursor.skip_count();
        cursor.read(&mut dst);
        assert!(cursor.skip_count() > before_skips || cursor.lag() < 1024);
        assert!(cursor.lag() < 1024);
    }

    #[test]
    fn close_is_idempotent() {
        let buffer = Arc::new(RingBuffer::new(4096, 128));
        let cursor = ListenerCursor::new(buffer, 128, 1024);
        cursor.close();
        cursor.close();
        assert!(cursor.is_closed());
    }
}
