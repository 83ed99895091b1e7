//! A single mount point: its ring buffer, active source, listeners and
//! metadata, all under one roof.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::MountConfig;
use crate::cursor::ListenerCursor;
use crate::error::{IcecastError, IcecastResult};
use crate::metadata::{MetadataHolder, MetadataPatch, StreamMetadata};
use crate::ring_buffer::RingBuffer;

pub type ListenerId = Uuid;

/// Identity of the currently connected source, if any.
#[derive(Debug, Clone)]
pub struct SourceIdentity {
    pub remote_addr: IpAddr,
    pub connected_at: Instant,
    pub user_agent: Option<String>,
}

/// Server-side handle to one connected listener, held by the mount so admin
/// operations (`killclient`, `moveclients`) can reach it without the
/// listener task itself being addressable.
pub struct ListenerHandle {
    pub cursor: Arc<ListenerCursor>,
    pub remote_addr: IpAddr,
    pub user_agent: Option<String>,
    pub is_bot: bool,
}

/// Point-in-time statistics for a mount, serialized directly by the admin
/// `/admin/stats` endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct MountStats {
    pub path: String,
    pub active: bool,
    pub listener_count: usize,
    pub unique_listener_count: usize,
    pub peak_listeners: u64,
    pub peak_unique_listeners: u64,
    pub bytes_received: u64,
    pub metadata: StreamMetadata,
    pub content_type: String,
}

/// One mount point. Holds the ring buffer the source writes into and the
/// listener map readers are tracked in.
pub struct Mount {
    path: String,
    config: RwLock<MountConfig>,
    buffer: Arc<RingBuffer>,
    metadata: MetadataHolder,
    listeners: RwLock<HashMap<ListenerId, ListenerHandle>>,
    source_active: AtomicBool,
    source: RwLock<Option<SourceIdentity>>,
    /// Cancellation handle for the currently connected source's read task,
    /// so `kill_source`/`killsource` can stop the physical task rather than
    /// just flipping `source_active`.
    source_cancel: RwLock<Option<CancellationToken>>,
    bytes_received: AtomicU64,
    peak_listeners: AtomicUsize,
    /// `(ip, user-agent)` pairs ever seen as non-bot listeners, used only to
    /// compute `peak_unique_listeners`'s high-water mark; never pruned, so
    /// it must not be read as the *current* unique listener count (see
    /// `stats()`, which derives that from the live `listeners` map).
    peak_unique_seen: RwLock<HashSet<(IpAddr, Option<String>)>>,
    peak_unique_listeners: AtomicU64,
}

impl Mount {
    #[must_use]
    pub fn new(config: MountConfig) -> Self {
        let buffer = Arc::new(RingBuffer::new(config.buffer_size, config.burst_size));
        let metadata = MetadataHolder::new(StreamMetadata {
            genre: config.genre.clone(),
            description: config.description.clone(),
            url: config.url.clone(),
            content_type: Some(config.content_type.clone()),
            public: config.public,
            ..Default::default()
        });
        Self {
            path: config.path.clone(),
            config: RwLock::new(config),
            buffer,
            metadata,
            listeners: RwLock::new(HashMap::new()),
            source_active: AtomicBool::new(false),
            source: RwLock::new(None),
            source_cancel: RwLock::new(None),
            bytes_received: AtomicU64::new(0),
            peak_listeners: AtomicUsize::new(0),
            peak_unique_seen: RwLock::new(HashSet::new()),
            peak_unique_listeners: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.source_active.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn buffer(&self) -> &Arc<RingBuffer> {
        &self.buffer
    }

    #[must_use]
    pub fn config(&self) -> MountConfig {
        self.config.read().clone()
    }

    #[must_use]
    pub fn metadata(&self) -> &MetadataHolder {
        &self.metadata
    }

    /// Claims this mount for a source connection. Fails with
    /// `SourceAlreadyConnected` if one is already live — one source per
    /// mount at a time. `cancel` is the source task's own cancellation
    /// handle, stored so `kill_source` can stop that specific task.
    pub fn start_source(&self, identity: SourceIdentity, cancel: CancellationToken) -> IcecastResult<()> {
        if self
            .source_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(IcecastError::SourceAlreadyConnected(self.path.clone()));
        }
        *self.source.write() = Some(identity);
        *self.source_cancel.write() = Some(cancel);
        self.buffer.reset();
        Ok(())
    }

    /// Releases the source slot and clears the buffer so the next source
    /// starts from a clean state. Idempotent.
    pub fn stop_source(&self) {
        self.source_active.store(false, Ordering::Release);
        *self.source.write() = None;
        *self.source_cancel.write() = None;
    }

    /// Forcibly stops the connected source's task (used by `/admin/killsource`)
    /// and releases the source slot immediately, rather than waiting for the
    /// task to notice cancellation on its own. Returns `false` if no source
    /// was connected.
    pub fn kill_source(&self) -> bool {
        let cancel = self.source_cancel.write().take();
        let had_source = self.is_active();
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        self.stop_source();
        had_source
    }

    #[must_use]
    pub fn source_identity(&self) -> Option<SourceIdentity> {
        self.source.read().clone()
    }

    /// Appends source audio to the ring buffer, waking any listener blocked
    /// on new data. Fails with `NoSource` if this mount's source slot isn't
    /// currently claimed (e.g. a zombie task whose source was `kill_source`'d).
    pub fn write(&self, chunk: &[u8]) -> IcecastResult<()> {
        if !self.is_active() {
            return Err(IcecastError::NoSource(self.path.clone()));
        }
        self.buffer.append(chunk);
        self.bytes_received
            .fetch_add(chunk.len() as u64, Ordering::AcqRel);
        Ok(())
    }

    /// Admission check: is there room for one more listener under the
    /// mount's configured cap.
    #[must_use]
    pub fn can_add_listener(&self) -> bool {
        self.listeners.read().len() < self.config.read().max_listeners
    }

    /// Registers a listener and returns its cursor, or `MaxListeners` if the
    /// mount is already at capacity. Uniqueness for the peak-listener stat
    /// is keyed on `(ip, user-agent)`, excluding bots — still served, just
    /// not counted.
    pub fn add_listener(
        &self,
        remote_addr: IpAddr,
        user_agent: Option<String>,
    ) -> IcecastResult<(ListenerId, Arc<ListenerCursor>)> {
        let config = self.config.read().clone();
        let is_bot = crate::listener::looks_like_bot(user_agent.as_deref());
        let mut listeners = self.listeners.write();
        if listeners.len() >= config.max_listeners {
            return Err(IcecastError::MaxListeners(self.path.clone()));
        }
        let cursor = Arc::new(ListenerCursor::new(
            Arc::clone(&self.buffer),
            config.burst_size,
            config.max_lag,
        ));
        let id = Uuid::new_v4();
        listeners.insert(
            id,
            ListenerHandle {
                cursor: Arc::clone(&cursor),
                remote_addr,
                user_agent: user_agent.clone(),
                is_bot,
            },
        );
        let count = listeners.len();
        drop(listeners);
        self.peak_listeners.fetch_max(count, Ordering::AcqRel);

        if !is_bot {
            let mut seen = self.peak_unique_seen.write();
            seen.insert((remote_addr, user_agent));
            let seen_count = seen.len() as u64;
            drop(seen);
            self.peak_unique_listeners.fetch_max(seen_count, Ordering::AcqRel);
        }
        Ok((id, cursor))
    }

    /// Removes a listener by id. A no-op if it's already gone (e.g. the
    /// listener task finished concurrently with an admin `killclient`).
    pub fn remove_listener(&self, id: ListenerId) {
        if let Some(handle) = self.listeners.write().remove(&id) {
            handle.cursor.close();
        }
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Forcibly disconnects one listener by id, used by `/admin/killclient`.
    pub fn kill_listener(&self, id: ListenerId) -> bool {
        if let Some(handle) = self.listeners.write().remove(&id) {
            handle.cursor.close();
            true
        } else {
            false
        }
    }

    /// Disconnects every listener currently attached, used by
    /// `/admin/killsource` and in preparation for `moveclients`.
    pub fn kill_all_listeners(&self) -> Vec<(ListenerId, IpAddr, Option<String>)> {
        let mut listeners = self.listeners.write();
        let drained: Vec<_> = listeners
            .drain()
            .map(|(id, handle)| {
                handle.cursor.close();
                (id, handle.remote_addr, handle.user_agent)
            })
            .collect();
        drained
    }

    pub fn update_metadata(&self, patch: MetadataPatch) {
        self.metadata.update(patch);
    }

    /// Applies a hot-reloaded configuration. The active source and the
    /// ring buffer's contents are left untouched; only the admission and
    /// identity fields move.
    pub fn update_from_config(&self, config: MountConfig) {
        let mut guard = self.config.write();
        self.metadata.update(MetadataPatch {
            genre: config.genre.clone(),
            description: config.description.clone(),
            url: config.url.clone(),
            content_type: Some(config.content_type.clone()),
            public: Some(config.public),
            ..Default::default()
        });
        *guard = config;
    }

    #[must_use]
    pub fn stats(&self) -> MountStats {
        let config = self.config.read();
        let listeners = self.listeners.read();
        let unique_listener_count = listeners
            .values()
            .filter(|handle| !handle.is_bot)
            .map(|handle| (handle.remote_addr, handle.user_agent.clone()))
            .collect::<HashSet<_>>()
            .len();
        let listener_count = listeners.len();
        drop(listeners);
        MountStats {
            path: self.path.clone(),
            active: self.is_active(),
            listener_count,
            unique_listener_count,
            peak_listeners: self.peak_listeners.load(Ordering::Acquire) as u64,
            peak_unique_listeners: self.peak_unique_listeners.load(Ordering::Acquire),
            bytes_received: self.bytes_received.load(Ordering::Acquire),
            metadata: self.metadata.snapshot(),
            content_type: config.content_type.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    fn mount() -> Mount {
        Mount::new(MountConfig {
            path: "/test".into(),
            max_listeners: 2,
            buffer_size: 4096,
            burst_size: 256,
            ..Default::default()
        })
    }

    #[test]
    fn second_source_is_rejected_while_first_is_active() {
        let m = mount();
        let id = SourceIdentity {
            remote_addr: addr(),
            connected_at: Instant::now(),
            user_agent: None,
        };
        assert!(m.start_source(id.clone(), CancellationToken::new()).is_ok());
        assert!(matches!(
            m.start_source(id, CancellationToken::new()),
            Err(IcecastError::SourceAlreadyConnected(_))
        ));
    }

    #[test]
    fn source_slot_reopens_after_stop() {
        let m = mount();
        let id = SourceIdentity {
            remote_addr: addr(),
            connected_at: Instant::now(),
            user_agent: None,
        };
        m.start_source(id.clone(), CancellationToken::new()).unwrap();
        m.stop_source();
        assert!(m.start_source(id, CancellationToken::new()).is_ok());
    }

    #[test]
    fn write_is_rejected_once_source_is_inactive() {
        let m = mount();
        assert!(matches!(m.write(b"data"), Err(IcecastError::NoSource(_))));
        let id = SourceIdentity {
            remote_addr: addr(),
            connected_at: Instant::now(),
            user_agent: None,
        };
        m.start_source(id, CancellationToken::new()).unwrap();
        assert!(m.write(b"data").is_ok());
    }

    #[test]
    fn kill_source_cancels_the_source_task_and_frees_the_slot() {
        let m = mount();
        let cancel = CancellationToken::new();
        let id = SourceIdentity {
            remote_addr: addr(),
            connected_at: Instant::now(),
            user_agent: None,
        };
        m.start_source(id, cancel.clone()).unwrap();
        assert!(m.kill_source());
        assert!(cancel.is_cancelled());
        assert!(!m.is_active());
        assert!(matches!(m.write(b"data"), Err(IcecastError::NoSource(_))));
    }

    #[test]
    fn listener_admission_respects_max_listeners() {
        let m = mount();
        assert!(m.add_listener(addr(), None).is_ok());
        assert!(m.add_listener(addr(), None).is_ok());
        assert!(matches!(
            m.add_listener(addr(), None),
            Err(IcecastError::MaxListeners(_))
        ));
    }

    #[test]
    fn kill_all_listeners_drains_and_closes_cursors() {
        let m = mount();
        let (_, cursor) = m.add_listener(addr(), None).unwrap();
        let killed = m.kill_all_listeners();
        assert_eq!(killed.len(), 1);
        assert!(cursor.is_closed());
        assert_eq!(m.listener_count(), 0);
    }
}
