//! Listener serve: the `GET` handler a player connects to for live audio.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_stream::stream;
use axum::body::Body;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use log::info;

use crate::api::AppState;
use crate::error::IcecastError;
use crate::icy::IcyMetadataInjector;
use crate::mount::ListenerId;
use crate::protocol_constants::SOURCE_READ_CHUNK;

/// Bot/crawler user-agent substrings. A listener matching one of these is
/// still served, but is excluded from the "unique listener" stats a human
/// dashboard cares about.
const BOT_USER_AGENTS: &[&str] = &["bot", "crawler", "spider", "curl", "wget", "facebookexternalhit"];

#[must_use]
pub fn looks_like_bot(user_agent: Option<&str>) -> bool {
    match user_agent {
        Some(ua) => {
            let lower = ua.to_lowercase();
            BOT_USER_AGENTS.iter().any(|needle| lower.contains(needle))
        }
        None => false,
    }
}

/// Drop guard that removes the listener from its mount and logs connection
/// duration/bytes regardless of which path the stream exits through.
struct ListenerGuard {
    mount: Arc<crate::mount::Mount>,
    id: ListenerId,
    remote: SocketAddr,
    connected_at: Instant,
    bytes_sent: Arc<AtomicU64>,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.mount.remove_listener(self.id);
        info!(
            "listener {} on {} disconnected after {:?}, {} bytes",
            self.remote,
            self.mount.path(),
            self.connected_at.elapsed(),
            self.bytes_sent.load(Ordering::Relaxed)
        );
    }
}

/// Serves live audio to a listener, interleaving ICY metadata if the
/// client negotiated it via `Icy-MetaData: 1`.
pub async fn listener_handler(
    State(state): State<AppState>,
    Path(mount_path): Path<String>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let mount_path = format!("/{}", mount_path.trim_start_matches('/'));

    let mount = match state.registry.get(&mount_path) {
        Some(m) => m,
        None => return IcecastError::MountNotFound(mount_path).into_response(),
    };
    if !mount.is_active() {
        return IcecastError::NoSource(mount_path).into_response();
    }
    if !mount.can_add_listener() {
        return IcecastError::MaxListeners(mount_path).into_response();
    }

    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let (id, cursor) = match mount.add_listener(remote.ip(), user_agent.clone()) {
        Ok(pair) => pair,
        Err(err) => return err.into_response(),
    };

    let config = mount.config();
    let wants_metadata = headers
        .get("Icy-MetaData")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim() == "1")
        .unwrap_or(false);
    let metaint = if wants_metadata { config.icy_metaint } else { 0 };

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        axum::http::header::CONTENT_TYPE,
        HeaderValue::from_str(&config.content_type).unwrap_or(HeaderValue::from_static("audio/mpeg")),
    );
    if metaint > 0 {
        response_headers.insert(
            "icy-metaint",
            HeaderValue::from_str(&metaint.to_string()).unwrap(),
        );
    }
    let meta = mount.metadata().snapshot();
    if let Some(name) = &config.name {
        if let Ok(v) = HeaderValue::from_str(name) {
            response_headers.insert("icy-name", v);
        }
    }
    if let Some(genre) = &meta.genre {
        if let Ok(v) = HeaderValue::from_str(genre) {
            response_headers.insert("icy-genre", v);
        }
    }
    if let Some(description) = &meta.description {
        if let Ok(v) = HeaderValue::from_str(description) {
            response_headers.insert("icy-description", v);
        }
    }
    if let Some(url) = &meta.url {
        if let Ok(v) = HeaderValue::from_str(url) {
            response_headers.insert("icy-url", v);
        }
    }
    if let Some(bitrate) = meta.bitrate {
        if let Ok(v) = HeaderValue::from_str(&bitrate.to_string()) {
            response_headers.insert("icy-br", v);
        }
    }
    response_headers.insert(
        "icy-pub",
        HeaderValue::from_static(if meta.public { "1" } else { "0" }),
    );
    response_headers.insert(
        axum::http::header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );

    let cancel = state.cancel_token.child_token();
    let stall_timeout = std::time::Duration::from_secs(state.registry.config_snapshot().client_timeout_secs);
    let bytes_sent = Arc::new(AtomicU64::new(0));
    let guard = ListenerGuard {
        mount: Arc::clone(&mount),
        id,
        remote,
        connected_at: Instant::now(),
        bytes_sent: Arc::clone(&bytes_sent),
    };
    let metadata_holder_mount = Arc::clone(&mount);

    let body_stream = stream! {
        let _guard = guard;
        let mut injector = IcyMetadataInjector::new(metaint.max(1));
        let burst = cursor.burst();

        if !burst.is_empty() {
            bytes_sent.fetch_add(burst.len() as u64, Ordering::Relaxed);
            if metaint > 0 {
                let meta = metadata_holder_mount.metadata().snapshot();
                yield Ok::<Bytes, std::io::Error>(injector.inject(&burst, &meta));
            } else {
                yield Ok::<Bytes, std::io::Error>(Bytes::from(burst));
            }
        }

        let mut buf = vec![0u8; SOURCE_READ_CHUNK];
        loop {
            if cursor.is_closed() {
                break;
            }
            let deadline = Instant::now() + stall_timeout;
            let got_data = cursor.buffer().wait_for_data(cursor.position(), Some(deadline), &cancel).await;
            if cancel.is_cancelled() {
                break;
            }
            if !got_data {
                // No data within client_timeout_secs: treat as a dead
                // connection rather than waiting indefinitely.
                break;
            }
            let n = cursor.read(&mut buf);
            if n == 0 {
                continue;
            }
            bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
            if metaint > 0 {
                let meta = metadata_holder_mount.metadata().snapshot();
                yield Ok::<Bytes, std::io::Error>(injector.inject(&buf[..n], &meta));
            } else {
                yield Ok::<Bytes, std::io::Error>(Bytes::copy_from_slice(&buf[..n]));
            }
        }
    };

    let mut response: Response = Body::from_stream(body_stream).into_response();
    response.headers_mut().extend(response_headers);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_crawler_user_agents_are_flagged() {
        assert!(looks_like_bot(Some("Googlebot/2.1")));
        assert!(looks_like_bot(Some("curl/8.4.0")));
        assert!(looks_like_bot(Some("facebookexternalhit/1.1")));
    }

    #[test]
    fn ordinary_player_user_agent_is_not_flagged() {
        assert!(!looks_like_bot(Some("VLC/3.0.18 LibVLC/3.0.18")));
        assert!(!looks_like_bot(None));
    }
}
