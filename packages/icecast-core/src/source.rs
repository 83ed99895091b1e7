//! Source ingest: the `PUT`/`SOURCE` handler a broadcast encoder connects to.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use futures::StreamExt;
use log::{info, warn};

use crate::api::AppState;
use crate::auth::{check_admin_credentials, check_source_password};
use crate::error::IcecastError;
use crate::mount::SourceIdentity;

/// A source's presented credential: an optional username (present for
/// `ice-username`/Basic auth, absent for a bare ICY password header) plus
/// the password.
struct SourceCredential {
    username: Option<String>,
    password: String,
}

/// Reads source credentials from the request, trying in order:
/// `Authorization: Basic`, the ICY-style `ice-username`/`ice-password`
/// header pair, or a bare `Authorization` header (legacy ICY source
/// clients that send the password with no scheme).
fn extract_source_credential(headers: &HeaderMap) -> Option<SourceCredential> {
    if let Some(raw) = headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(encoded) = raw.strip_prefix("Basic ") {
            let decoded = decode_basic_auth(encoded)?;
            let text = String::from_utf8(decoded).ok()?;
            let (user, password) = text.split_once(':')?;
            return Some(SourceCredential {
                username: Some(user.to_string()),
                password: password.to_string(),
            });
        }
        return Some(SourceCredential {
            username: None,
            password: raw.to_string(),
        });
    }

    let password = headers.get("ice-password")?.to_str().ok()?.to_string();
    let username = headers
        .get("ice-username")
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    Some(SourceCredential { username, password })
}

/// Minimal base64 decoder for Basic-auth header values; avoids pulling in
/// a dedicated base64 crate for this one call site. Shared with the admin
/// route guard in [`crate::api::http`].
pub(crate) fn decode_basic_auth(input: &str) -> Option<Vec<u8>> {
    const TABLE: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut lookup = [255u8; 256];
    for (i, &c) in TABLE.iter().enumerate() {
        lookup[c as usize] = i as u8;
    }
    let input = input.trim_end_matches('=');
    let mut out = Vec::with_capacity(input.len() * 3 / 4);
    let mut buf = 0u32;
    let mut bits = 0u32;
    for c in input.bytes() {
        let val = lookup[c as usize];
        if val == 255 {
            return None;
        }
        buf = (buf << 6) | val as u32;
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            out.push((buf >> bits) as u8);
        }
    }
    Some(out)
}

/// Handles a source connection: authenticates, claims the mount, then
/// streams the request body into the ring buffer until the source
/// disconnects or goes idle past its timeout.
pub async fn source_handler(
    State(state): State<AppState>,
    Path(mount_path): Path<String>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Body,
) -> impl IntoResponse {
    let mount_path = format!("/{}", mount_path.trim_start_matches('/'));

    if state.auth_lockout.is_locked(remote.ip()) {
        return IcecastError::AuthFailed.into_response();
    }

    let credential = match extract_source_credential(&headers) {
        Some(c) => c,
        None => return IcecastError::AuthFailed.into_response(),
    };

    let expected_source_password = state.registry.source_password_for(&mount_path);
    let (admin_user, admin_pass) = state.registry.admin_credentials();
    let authorized_by_source_password = expected_source_password
        .as_deref()
        .map(|exp| check_source_password(&credential.password, exp))
        .unwrap_or(false);
    let authorized_by_admin = credential
        .username
        .as_deref()
        .map(|user| check_admin_credentials(user, &credential.password, &admin_user, &admin_pass))
        .unwrap_or(false);

    if !authorized_by_source_password && !authorized_by_admin {
        state.auth_lockout.record_failure(remote.ip());
        warn!("source auth failed for {} from {}", mount_path, remote.ip());
        return IcecastError::AuthFailed.into_response();
    }
    state.auth_lockout.record_success(remote.ip());

    let mount = match state.registry.get_or_create(&mount_path) {
        Ok(m) => m,
        Err(err) => return err.into_response(),
    };

    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let cancel = state.cancel_token.child_token();
    if let Err(err) = mount.start_source(
        SourceIdentity {
            remote_addr: remote.ip(),
            connected_at: Instant::now(),
            user_agent,
        },
        cancel.clone(),
    ) {
        return err.into_response();
    }

    info!("source connected to {} from {}", mount_path, remote.ip());

    let timeout = Duration::from_secs(state.registry.config_snapshot().source_timeout_secs);
    let mut stream = body.into_data_stream();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("source on {} cancelled by shutdown or admin kill", mount_path);
                break;
            }
            chunk = tokio::time::timeout(timeout, stream.next()) => {
                match chunk {
                    Ok(Some(Ok(bytes))) => {
                        if mount.write(&bytes).is_err() {
                            info!("source on {} lost its slot, stopping", mount_path);
                            break;
                        }
                    }
                    Ok(Some(Err(err))) => {
                        warn!("source read error on {}: {}", mount_path, err);
                        break;
                    }
                    Ok(None) => {
                        info!("source on {} disconnected", mount_path);
                        break;
                    }
                    Err(_) => {
                        warn!("source on {} timed out after {:?} idle", mount_path, timeout);
                        break;
                    }
                }
            }
        }
    }

    mount.stop_source();
    (StatusCode::OK, "").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_decode_roundtrips_known_pair() {
        // "source:hackme" base64-encoded.
        let decoded = decode_basic_auth("c291cmNlOmhhY2ttZQ==").unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), "source:hackme");
    }

    #[test]
    fn extract_credential_from_basic_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Basic c291cmNlOmhhY2ttZQ==".parse().unwrap(),
        );
        let credential = extract_source_credential(&headers).unwrap();
        assert_eq!(credential.username.as_deref(), Some("source"));
        assert_eq!(credential.password, "hackme");
    }

    #[test]
    fn extract_credential_from_bare_icy_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            "hackme".parse().unwrap(),
        );
        let credential = extract_source_credential(&headers).unwrap();
        assert_eq!(credential.username, None);
        assert_eq!(credential.password, "hackme");
    }

    #[test]
    fn extract_credential_from_ice_username_password_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("ice-username", "broadcaster".parse().unwrap());
        headers.insert("ice-password", "hackme".parse().unwrap());
        let credential = extract_source_credential(&headers).unwrap();
        assert_eq!(credential.username.as_deref(), Some("broadcaster"));
        assert_eq!(credential.password, "hackme");
    }
}
