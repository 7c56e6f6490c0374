//! Read-only HTTP status endpoints.
//!
//! Every handler reads the registry as it is at call time and never changes it.

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::state::AppState;
use crate::types::ConnectionRecord;

/// Aggregate view of the relay
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusResponse {
    pub server: String,
    pub version: String,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub connections: usize,
    pub scan_devices: usize,
    pub control_clients: usize,
    /// Connected but not yet announced
    pub unidentified: usize,
}

/// GET /health
pub async fn health() -> &'static str {
    "ok"
}

/// GET /api/status
pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let counts = state.registry.role_counts().await;
    Json(StatusResponse {
        server: state.config.server_name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        started_at: state.started_at,
        uptime_secs: Utc::now()
            .signed_duration_since(state.started_at)
            .num_seconds(),
        connections: counts.total(),
        scan_devices: counts.scan_devices,
        control_clients: counts.control_clients,
        unidentified: counts.unknown,
    })
}

/// GET /api/connections
pub async fn connections(State(state): State<Arc<AppState>>) -> Json<Vec<ConnectionRecord>> {
    Json(state.registry.snapshot().await)
}
