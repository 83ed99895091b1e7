//! Single-writer, many-reader byte ring buffer with wraparound and a
//! sync-point index for clean listener joins.
//!
//! The write side is a short `parking_lot::Mutex` critical section (copy in,
//! bump `writePos`, record a sync point); readers take a `parking_lot::RwLock`
//! read guard that never blocks on the writer for longer than the memcpy
//! itself. `writePos` and `bytesTotal` are additionally tracked as atomics so
//! `WritePos`/`OldestValid`/`LivePosition` never need any lock at all — the
//! same split the reference stream state keeps between its `AtomicBool
//! has_frames` fast path and its `RwLock`-guarded buffer contents.
//!
//! Waiters block on a `parking_lot::Condvar` paired with a dedicated notify
//! mutex, separate from the data lock so a slow reader never holds up a
//! wakeup. Because the buffer is driven from async listener tasks, the
//! actual blocking wait happens on a `tokio::task::spawn_blocking` thread,
//! polled in bounded slices so a listener's cancellation token is still
//! honored promptly without threading cancellation into the condvar itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::protocol_constants::{LIVE_POSITION_LAG, SYNC_POINT_SLOTS, SYNC_POINT_STRIDE};

/// Maximum slice a blocking waiter sleeps before re-checking cancellation.
const WAIT_SLICE: Duration = Duration::from_millis(200);

#[derive(Clone, Copy, Debug)]
struct SyncPoint {
    position: u64,
}

/// Fixed-capacity ring index of recently observed clean join points.
struct SyncPointRing {
    slots: [Option<SyncPoint>; SYNC_POINT_SLOTS],
    next: usize,
    last_stride_mark: u64,
}

impl SyncPointRing {
    fn new() -> Self {
        Self {
            slots: [None; SYNC_POINT_SLOTS],
            next: 0,
            last_stride_mark: 0,
        }
    }

    fn push(&mut self, position: u64) {
        self.slots[self.next] = Some(SyncPoint { position });
        self.next = (self.next + 1) % SYNC_POINT_SLOTS;
    }

    fn clear(&mut self) {
        self.slots = [None; SYNC_POINT_SLOTS];
        self.next = 0;
        self.last_stride_mark = 0;
    }

    /// Greatest indexed position in `(lower, upper]`, or `None`.
    fn near(&self, lower: u64, upper: u64) -> Option<u64> {
        self.slots
            .iter()
            .flatten()
            .map(|s| s.position)
            .filter(|&p| p > lower && p <= upper)
            .max()
    }
}

/// A plausible MP3 frame-sync header: `0xFF` followed by a byte with the
/// top three bits set and a non-reserved MPEG version/layer nibble.
fn looks_like_frame_header(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0xFF && (bytes[1] & 0xE0) == 0xE0 && (bytes[1] & 0x18) != 0x08
}

/// Append-only ring buffer backing a single mount's audio stream.
pub struct RingBuffer {
    data: RwLock<Box<[u8]>>,
    mask: u64,
    size: u64,
    write_lock: Mutex<()>,
    write_pos: AtomicU64,
    bytes_total: AtomicU64,
    burst_size: usize,
    sync_points: Mutex<SyncPointRing>,
    notify_lock: Mutex<()>,
    condvar: Condvar,
    created: Instant,
}

impl RingBuffer {
    /// Creates a buffer of at least `size` bytes, rounded up to a power of
    /// two, delivering up to `burst_size` bytes to newly joined listeners.
    #[must_use]
    pub fn new(size: usize, burst_size: usize) -> Self {
        let size = size.next_power_of_two().max(1);
        Self {
            data: RwLock::new(vec![0u8; size].into_boxed_slice()),
            mask: (size - 1) as u64,
            size: size as u64,
            write_lock: Mutex::new(()),
            write_pos: AtomicU64::new(0),
            bytes_total: AtomicU64::new(0),
            burst_size,
            sync_points: Mutex::new(SyncPointRing::new()),
            notify_lock: Mutex::new(()),
            condvar: Condvar::new(),
            created: Instant::now(),
        }
    }

    /// Lock-free read of the monotonically increasing write cursor.
    #[must_use]
    pub fn write_pos(&self) -> u64 {
        self.write_pos.load(Ordering::Acquire)
    }

    /// Oldest position still resident in the ring.
    #[must_use]
    pub fn oldest_valid(&self) -> u64 {
        self.write_pos().saturating_sub(self.size)
    }

    /// `writePos` minus a small trailing lag, so a listener rebased to
    /// "live" is not immediately starved waiting on the very next byte.
    #[must_use]
    pub fn live_position(&self) -> u64 {
        self.write_pos().saturating_sub(LIVE_POSITION_LAG)
    }

    #[must_use]
    pub fn bytes_total(&self) -> u64 {
        self.bytes_total.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created
    }

    /// Greatest indexed sync-point position in `(pos, writePos)`, or `pos`
    /// if the index holds nothing in range.
    #[must_use]
    pub fn sync_point_near(&self, pos: u64) -> u64 {
        let write_pos = self.write_pos();
        self.sync_points
            .lock()
            .near(pos, write_pos)
            .unwrap_or(pos)
    }

    /// Copies `bytes` into the ring, bumps the write cursor, records a sync
    /// point if one is due, and wakes every blocked reader. A zero-length
    /// append is a no-op.
    pub fn append(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let _guard = self.write_lock.lock();

        let start = self.write_pos();
        let mut remaining = bytes;
        let mut pos = start;
        let mut data = self.data.write();
        while !remaining.is_empty() {
            let idx = (pos & self.mask) as usize;
            let chunk = remaining.len().min(self.size as usize - idx);
            data[idx..idx + chunk].copy_from_slice(&remaining[..chunk]);
            pos += chunk as u64;
            remaining = &remaining[chunk..];
        }
        drop(data);

        let new_pos = start + bytes.len() as u64;

        {
            let mut sync = self.sync_points.lock();
            let crossed_stride = new_pos / SYNC_POINT_STRIDE > sync.last_stride_mark;
            let looks_clean = looks_like_frame_header(bytes);
            if crossed_stride {
                sync.last_stride_mark = new_pos / SYNC_POINT_STRIDE;
                sync.push(start);
            } else if looks_clean {
                sync.push(start);
            }
        }

        self.bytes_total
            .fetch_add(bytes.len() as u64, Ordering::AcqRel);
        self.write_pos.store(new_pos, Ordering::Release);

        let _notify_guard = self.notify_lock.lock();
        self.condvar.notify_all();
    }

    /// Copies up to `dst.len()` bytes starting at `pos` into `dst`. If `pos`
    /// has fallen out of the retained window, rebases to a recent sync
    /// point at or after `OldestValid` and reports the bytes skipped.
    /// Returns `(n, new_pos, skipped)`.
    pub fn read_into(&self, pos: u64, dst: &mut [u8]) -> (usize, u64, u64) {
        let write_pos = self.write_pos();
        let oldest = self.oldest_valid();

        let (mut pos, skipped) = if pos < oldest {
            let rebased = self.sync_point_near(oldest);
            (rebased.max(oldest), rebased.max(oldest) - pos)
        } else {
            (pos, 0)
        };

        if pos >= write_pos || dst.is_empty() {
            return (0, pos, skipped);
        }

        let available = (write_pos - pos) as usize;
        let want = dst.len().min(available);
        let data = self.data.read();
        let mut written = 0;
        while written < want {
            let idx = (pos & self.mask) as usize;
            let chunk = (want - written).min(self.size as usize - idx);
            dst[written..written + chunk].copy_from_slice(&data[idx..idx + chunk]);
            written += chunk;
            pos += chunk as u64;
        }
        (written, pos, skipped)
    }

    /// Returns up to `burst_size` recent bytes ending at `writePos`,
    /// anchored on the most recent sync point within that window.
    #[must_use]
    pub fn burst(&self) -> Vec<u8> {
        let write_pos = self.write_pos();
        let oldest = self.oldest_valid();
        let window_start = write_pos.saturating_sub(self.burst_size as u64).max(oldest);
        let start = self.sync_point_near(window_start).max(window_start);
        if start >= write_pos {
            return Vec::new();
        }
        let mut out = vec![0u8; (write_pos - start) as usize];
        let (n, _, _) = self.read_into(start, &mut out);
        out.truncate(n);
        out
    }

    /// Blocks until `writePos > pos`, `deadline` passes, or `cancel` fires.
    /// Returns whether data became available.
    pub async fn wait_for_data(
        self: &std::sync::Arc<Self>,
        pos: u64,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
    ) -> bool {
        if self.write_pos() > pos {
            return true;
        }
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return false;
                }
            }
            let this = std::sync::Arc::clone(self);
            let slice = match deadline {
                Some(d) => WAIT_SLICE.min(d.saturating_duration_since(Instant::now())),
                None => WAIT_SLICE,
            };
            let cancelled_during_wait = tokio::select! {
                biased;
                _ = cancel.cancelled() => true,
                woke = tokio::task::spawn_blocking(move || this.wait_slice(pos, slice)) => {
                    if woke.unwrap_or(false) {
                        return true;
                    }
                    false
                }
            };
            if cancelled_during_wait {
                return false;
            }
        }
    }

    /// Blocking helper run on a `spawn_blocking` thread: waits on the
    /// condvar for up to `slice`, returning whether data is now available.
    fn wait_slice(&self, pos: u64, slice: Duration) -> bool {
        if self.write_pos() > pos {
            return true;
        }
        let guard = self.notify_lock.lock();
        let mut guard = guard;
        let result = self.condvar.wait_for(&mut guard, slice);
        let _ = result;
        self.write_pos() > pos
    }

    /// Clears the cursor, sync-point index, and statistics, then wakes any
    /// waiters so they re-examine state (a mount restart calls this before
    /// the new source's first write).
    pub fn reset(&self) {
        let _guard = self.write_lock.lock();
        self.write_pos.store(0, Ordering::Release);
        self.bytes_total.store(0, Ordering::Release);
        self.sync_points.lock().clear();
        let _notify_guard = self.notify_lock.lock();
        self.condvar.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn monotonic_writer() {
        let buf = RingBuffer::new(4096, 1024);
        let mut last = 0;
        for _ in 0..10 {
            buf.append(b"0123456789");
            assert!(buf.write_pos() > last);
            last = buf.write_pos();
        }
        assert_eq!(buf.write_pos(), 100);
        assert_eq!(buf.bytes_total(), 100);
    }

    #[test]
    fn in_range_reader_gets_exact_contiguous_slice() {
        let buf = RingBuffer::new(1 << 16, 1024);
        let payload = b"0123456789".repeat(1000);
        for chunk in payload.chunks(1024) {
            buf.append(chunk);
        }
        let mut pos = 0u64;
        let mut received = Vec::new();
        loop {
            let mut dst = [0u8; 512];
            let (n, new_pos, skipped) = buf.read_into(pos, &mut dst);
            assert_eq!(skipped, 0);
            if n == 0 {
                break;
            }
            received.extend_from_slice(&dst[..n]);
            pos = new_pos;
        }
        assert_eq!(received, payload);
    }

    #[test]
    fn wraparound_preserves_order() {
        let buf = RingBuffer::new(256, 64); // rounds to 256
        let first = vec![1u8; 200];
        buf.append(&first);
        let mut dst = vec![0u8; 200];
        let (n, pos, _) = buf.read_into(0, &mut dst);
        assert_eq!(n, 200);
        assert_eq!(dst, first);

        let second = vec![2u8; 200]; // wraps past the 256-byte ring
        buf.append(&second);
        let mut dst2 = vec![0u8; 200];
        let (n2, _, _) = buf.read_into(pos, &mut dst2);
        assert_eq!(n2, 200);
        assert_eq!(dst2, second);
    }

    #[test]
    fn reader_beyond_write_pos_gets_nothing() {
        let buf = RingBuffer::new(4096, 1024);
        buf.append(b"hello");
        let mut dst = [0u8; 16];
        let (n, pos, skipped) = buf.read_into(1000, &mut dst);
        assert_eq!(n, 0);
        assert_eq!(skipped, 0);
        assert_eq!(pos, 1000);
    }

    #[test]
    fn overrun_reader_is_rebased_with_skip_reported() {
        let buf = RingBuffer::new(1024, 128);
        for _ in 0..20 {
            buf.append(&[7u8; 128]); // 2560 bytes total, ring holds only 1024
        }
        let mut dst = [0u8; 64];
        let (n, new_pos, skipped) = buf.read_into(0, &mut dst);
        assert!(skipped > 0);
        assert!(new_pos >= buf.oldest_valid());
        assert!(n > 0 || new_pos == buf.write_pos());
    }

    #[test]
    fn zero_length_append_is_noop() {
        let buf = RingBuffer::new(1024, 128);
        buf.append(b"abc");
        let pos = buf.write_pos();
        buf.append(b"");
        assert_eq!(buf.write_pos(), pos);
    }

    #[test]
    fn reset_zeroes_cursor_and_stats() {
        let buf = RingBuffer::new(1024, 128);
        buf.append(b"abcdef");
        buf.reset();
        assert_eq!(buf.write_pos(), 0);
        assert_eq!(buf.bytes_total(), 0);
    }

    #[tokio::test]
    async fn fair_wakeup_after_append() {
        let buf = Arc::new(RingBuffer::new(4096, 128));
        let cancel = CancellationToken::new();
        let waiter = {
            let buf = Arc::clone(&buf);
            let cancel = cancel.clone();
            tokio::spawn(async move { buf.wait_for_data(0, None, &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        buf.append(b"data");
        let woke = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter did not finish")
            .expect("waiter task panicked");
        assert!(woke);
    }

    #[tokio::test]
    async fn cancellation_unblocks_wait() {
        let buf = Arc::new(RingBuffer::new(4096, 128));
        let cancel = CancellationToken::new();
        let waiter = {
            let buf = Arc::clone(&buf);
            let cancel = cancel.clone();
            tokio::spawn(async move { buf.wait_for_data(0, None, &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        let woke = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter did not finish")
            .expect("waiter task panicked");
        assert!(!woke);
    }
}
