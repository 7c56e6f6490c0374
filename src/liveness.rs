//! Background liveness checks: periodic pings and eviction of silent peers.

use crate::error::RelayError;
use crate::lifecycle::{self, CloseCause};
use crate::registry::Registry;
use crate::state::AppState;
use crate::types::ConnectionRecord;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Ping every live connection. Returns how many pings were queued.
///
/// Does not touch `last_liveness`; only the peer's pong does.
pub async fn heartbeat_sweep(registry: &Registry) -> usize {
    let targets = registry.connections_where(|_| true).await;
    let mut pinged = 0;
    for target in targets {
        match target.ping() {
            Ok(()) => pinged += 1,
            Err(e) => tracing::debug!("Heartbeat skipped: {}", e),
        }
    }
    pinged
}

/// Terminate and deregister every connection silent for longer than the
/// configured threshold as of `now`. Returns the evicted records.
pub async fn evict_stale(state: &AppState, now: DateTime<Utc>) -> Vec<ConnectionRecord> {
    let threshold =
        chrono::Duration::from_std(state.config.stale_after).unwrap_or(chrono::Duration::MAX);

    let candidates: Vec<_> = state
        .registry
        .snapshot()
        .await
        .into_iter()
        .filter(|r| r.is_stale(now, threshold))
        .map(|r| r.id)
        .collect();

    let mut evicted = Vec::new();
    for id in candidates {
        // Re-check under the registry lock; traffic may have arrived since the snapshot
        let Some((record, handle)) = state
            .registry
            .remove_if(&id, |r| r.is_stale(now, threshold))
            .await
        else {
            continue;
        };

        let reason = RelayError::StaleConnection {
            connection: record.id,
            idle_secs: now.signed_duration_since(record.last_liveness).num_seconds(),
        };
        tracing::warn!("Evicting: {}", reason);

        if let Err(e) = handle.terminate() {
            tracing::debug!("Evicted connection already gone: {}", e);
        }
        lifecycle::announce_departure(state, &record, CloseCause::Evicted).await;
        evicted.push(record);
    }
    evicted
}

fn sweep_interval(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Spawn the periodic heartbeat sweep. Stops when shutdown begins.
pub fn spawn_heartbeat_sweep(state: Arc<AppState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = sweep_interval(state.config.heartbeat_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let pinged = heartbeat_sweep(&state.registry).await;
                    tracing::debug!("Heartbeat sweep pinged {} connections", pinged);
                }
                _ = state.shutdown.wait() => break,
            }
        }
    })
}

/// Spawn the periodic eviction sweep, on its own clock. Stops when shutdown begins.
pub fn spawn_eviction_sweep(state: Arc<AppState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = sweep_interval(state.config.eviction_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let evicted = evict_stale(&state, Utc::now()).await;
                    if !evicted.is_empty() {
                        tracing::info!("Evicted {} stale connections", evicted.len());
                    }
                }
                _ = state.shutdown.wait() => break,
            }
        }
    })
}
