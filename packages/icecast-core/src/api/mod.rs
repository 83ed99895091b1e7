//! HTTP API layer.
//!
//! Thin handlers that delegate to the mount registry; router construction
//! and server startup live here.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::auth::AuthLockout;
use crate::registry::MountRegistry;

pub mod http;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),
}

/// Shared application state for every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<MountRegistry>,
    pub auth_lockout: Arc<AuthLockout>,
    pub cancel_token: CancellationToken,
}

/// Starts the HTTP server and serves until `state.cancel_token` is cancelled.
pub async fn start_server(
    state: AppState,
    bind_addr: &str,
    bind_port: u16,
) -> Result<(), ServerError> {
    let addr = format!("{}:{}", bind_addr, bind_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("listening on http://{}", addr);

    let app = http::create_router(state.clone());
    let cancel = state.cancel_token.clone();

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        cancel.cancelled().await;
        log::info!("http server received shutdown signal");
    })
    .await?;
    Ok(())
}
