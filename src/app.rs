//! HTTP router assembly and the serve loop with bounded graceful shutdown.

use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::connection::{CLOSE_GOING_AWAY, SHUTDOWN_REASON};
use crate::lifecycle::{self, ShutdownReason};
use crate::state::AppState;
use crate::{api, ws};

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Connections did not drain within {0:?}")]
    DrainTimeout(std::time::Duration),
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(api::health))
        .route("/api/status", get(api::status))
        .route("/api/connections", get(api::connections))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until shutdown is triggered, then close every connection and wait
/// for them to drain, bounded by the configured shutdown timeout.
///
/// Returns the shutdown reason on a clean drain.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<ShutdownReason, ServeError> {
    let app = build_router(state.clone());

    let shutdown = state.shutdown.clone();
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown.wait().await;
    });
    let mut server = tokio::spawn(async move { server.await });

    // axum stops tracking upgraded sockets, so its graceful shutdown can finish
    // before any WebSocket has been closed. Only an unprompted exit returns early.
    let finished = tokio::select! {
        biased;
        _ = state.shutdown.wait() => None,
        result = &mut server => Some(result),
    };
    let server_result = match finished {
        Some(result) if !state.shutdown.is_triggered() => {
            // The listener stopped on its own
            result??;
            return Ok(ShutdownReason::Signal);
        }
        other => other,
    };

    let reason = state.shutdown.wait().await;
    tracing::info!("Shutdown started ({:?})", reason);

    lifecycle::close_all(&state, CLOSE_GOING_AWAY, SHUTDOWN_REASON).await;

    let timeout = state.config.shutdown_timeout;
    let drained = tokio::time::timeout(timeout, async {
        let server_result = match server_result {
            Some(result) => result,
            None => (&mut server).await,
        };
        lifecycle::wait_for_drain(&state).await;
        server_result
    })
    .await;

    match drained {
        Ok(result) => {
            result??;
            tracing::info!("All connections drained");
            Ok(reason)
        }
        Err(_) => {
            server.abort();
            Err(ServeError::DrainTimeout(timeout))
        }
    }
}
