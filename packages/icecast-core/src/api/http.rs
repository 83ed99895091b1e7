//! Route table and admin handlers.
//!
//! Mount serve/ingest handlers are thin wrappers delegating to
//! [`crate::source`] and [`crate::listener`]; this module owns the router
//! itself plus the smaller `/admin/*` and playlist/health surface.

use std::str::FromStr;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, on, MethodFilter};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::api::AppState;
use crate::auth::check_admin_credentials;
use crate::error::IcecastError;
use crate::listener::listener_handler;
use crate::metadata::MetadataPatch;
use crate::source::source_handler;

/// Builds the full route table.
///
/// The playlist extensions (`.m3u`, `.pls`, `.xspf`) share the same path
/// shape as a plain mount, so they're dispatched from inside `mount_get`
/// rather than as separate route patterns.
pub fn create_router(state: AppState) -> Router {
    let source_method = MethodFilter::PUT.or(MethodFilter::from_bytes(b"SOURCE").expect("valid method"));

    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/admin/metadata", get(admin_update_metadata))
        .route("/admin/killclient", get(admin_kill_client))
        .route("/admin/killsource", get(admin_kill_source))
        .route("/admin/moveclients", get(admin_move_clients))
        .route("/admin/stats", get(admin_stats))
        .route("/{*mount}", on(source_method, source_handler).get(mount_get))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `GET /{mount}` dispatch: serves a playlist document for a recognized
/// extension, otherwise serves live audio.
async fn mount_get(
    state: State<AppState>,
    path: Path<String>,
    connect_info: axum::extract::ConnectInfo<std::net::SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let raw = path.0.clone();
    if let Some(stem) = raw.strip_suffix(".m3u") {
        return playlist_m3u(stem.to_string()).await.into_response();
    }
    if let Some(stem) = raw.strip_suffix(".pls") {
        return playlist_pls(stem.to_string()).await.into_response();
    }
    if let Some(stem) = raw.strip_suffix(".xspf") {
        return playlist_xspf(stem.to_string()).await.into_response();
    }
    listener_handler(state, path, connect_info, headers)
        .await
        .into_response()
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({ "mounts": state.registry.mount_count() })),
    )
}

/// Checks HTTP Basic admin credentials, returning an `AuthFailed` response
/// on mismatch. Shared by every `/admin/*` handler.
fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let (expected_user, expected_pass) = state.registry.admin_credentials();
    let auth_header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let (user, pass) = match auth_header.and_then(parse_basic_auth) {
        Some(pair) => pair,
        None => return Err(IcecastError::AuthFailed.into_response()),
    };

    if check_admin_credentials(&user, &pass, &expected_user, &expected_pass) {
        Ok(())
    } else {
        Err(IcecastError::AuthFailed.into_response())
    }
}

fn parse_basic_auth(header: &str) -> Option<(String, String)> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = crate::source::decode_basic_auth(encoded)?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, pass) = text.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

#[derive(Deserialize)]
pub struct MountQuery {
    pub mount: String,
}

async fn admin_update_metadata(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<MountQuery>,
    Json(patch): Json<MetadataPatch>,
) -> impl IntoResponse {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    let mount_path = format!("/{}", query.mount.trim_start_matches('/'));
    match state.registry.get(&mount_path) {
        Some(mount) => {
            mount.update_metadata(patch);
            Json(json!({ "ok": true })).into_response()
        }
        None => IcecastError::MountNotFound(mount_path).into_response(),
    }
}

#[derive(Deserialize)]
pub struct KillClientQuery {
    pub mount: String,
    pub id: String,
}

async fn admin_kill_client(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<KillClientQuery>,
) -> impl IntoResponse {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    let mount_path = format!("/{}", query.mount.trim_start_matches('/'));
    let Some(mount) = state.registry.get(&mount_path) else {
        return IcecastError::MountNotFound(mount_path).into_response();
    };
    let Ok(id) = Uuid::from_str(&query.id) else {
        return (StatusCode::BAD_REQUEST, "invalid listener id").into_response();
    };
    Json(json!({ "killed": mount.kill_listener(id) })).into_response()
}

#[derive(Deserialize)]
pub struct KillSourceQuery {
    pub mount: String,
}

async fn admin_kill_source(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<KillSourceQuery>,
) -> impl IntoResponse {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    let mount_path = format!("/{}", query.mount.trim_start_matches('/'));
    let Some(mount) = state.registry.get(&mount_path) else {
        return IcecastError::MountNotFound(mount_path).into_response();
    };
    mount.kill_source();
    mount.kill_all_listeners();
    Json(json!({ "ok": true })).into_response()
}

#[derive(Deserialize)]
pub struct MoveClientsQuery {
    pub mount: String,
    pub destination: String,
}

/// Moves every listener on `mount` to `destination`. The moved listeners
/// reconnect at the destination's current live position with fresh ICY
/// metadata state rather than carrying over in-flight frame state.
async fn admin_move_clients(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<MoveClientsQuery>,
) -> impl IntoResponse {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    let source_path = format!("/{}", query.mount.trim_start_matches('/'));
    let dest_path = format!("/{}", query.destination.trim_start_matches('/'));

    let Some(source_mount) = state.registry.get(&source_path) else {
        return IcecastError::MountNotFound(source_path).into_response();
    };
    let Some(dest_mount) = state.registry.get(&dest_path) else {
        return IcecastError::InvalidMoveDestination(dest_path).into_response();
    };
    if !dest_mount.is_active() {
        return IcecastError::InvalidMoveDestination(dest_path).into_response();
    }

    let moved = source_mount.kill_all_listeners();
    let mut moved_count = 0;
    for (_, remote_addr, user_agent) in moved {
        if dest_mount.add_listener(remote_addr, user_agent).is_ok() {
            moved_count += 1;
        }
    }
    Json(json!({ "moved": moved_count })).into_response()
}

async fn admin_stats(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(resp) = require_admin(&state, &headers) {
        return resp;
    }
    Json(json!({ "mounts": state.registry.all_stats() })).into_response()
}

async fn playlist_m3u(mount: String) -> impl IntoResponse {
    let body = format!("#EXTM3U\n/{}\n", mount.trim_start_matches('/'));
    ([(axum::http::header::CONTENT_TYPE, "audio/x-mpegurl")], body)
}

async fn playlist_pls(mount: String) -> impl IntoResponse {
    let body = format!(
        "[playlist]\nNumberOfEntries=1\nFile1=/{}\nVersion=2\n",
        mount.trim_start_matches('/')
    );
    ([(axum::http::header::CONTENT_TYPE, "audio/x-scpls")], body)
}

async fn playlist_xspf(mount: String) -> impl IntoResponse {
    let body = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<playlist version=\"1\" xmlns=\"http://xspf.org/ns/0/\"><trackList><track><location>/{}</location></track></trackList></playlist>\n",
        mount.trim_start_matches('/')
    );
    ([(axum::http::header::CONTENT_TYPE, "application/xspf+xml")], body)
}

