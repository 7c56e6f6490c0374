//! Scan device messages

use crate::broadcast::{broadcast, Audience};
use crate::connection::ConnectionHandle;
use crate::protocol::{server_now, ConnectionStatus, InboundEvent, ServerMessage};
use crate::state::AppState;
use crate::types::Role;
use std::sync::Arc;

use super::handlers::Routed;

/// Declare the sender a scan device and tell every control client it is here.
///
/// Re-announcing is allowed and re-broadcasts the (possibly new) device id.
pub async fn handle_device_announce(state: &Arc<AppState>, sender: &ConnectionHandle) -> Routed {
    let outcome = state
        .registry
        .update(&sender.id(), |r| (r.assign_role(Role::ScanDevice), r.clone()))
        .await;
    let Some((accepted, record)) = outcome else {
        return Routed::Dropped;
    };

    if !accepted {
        return super::reject_role_change(sender, record.role);
    }

    tracing::info!(
        "Connection {} announced as scan device {:?}",
        record.id,
        record.device_id
    );

    let confirmation = ServerMessage::Confirmation {
        role: Role::ScanDevice,
        device_id: record.device_id.clone(),
        message: "scan device registered".to_string(),
    };
    if let Err(e) = sender.send(&confirmation) {
        tracing::debug!("Confirmation not delivered: {}", e);
    }

    let status = ServerMessage::Status {
        role: Role::ScanDevice,
        status: ConnectionStatus::Connected,
        device_id: record.device_id,
    };
    let notified = broadcast(
        &state.registry,
        Audience::Role(Role::ControlClient),
        &status,
        None,
    )
    .await;

    Routed::Announced {
        role: Role::ScanDevice,
        notified,
    }
}

/// Fan a scan out to control clients and hand the sender a receipt
pub async fn handle_scan_event(
    state: &Arc<AppState>,
    sender: &ConnectionHandle,
    event: &InboundEvent,
) -> Routed {
    let Some(record) = state.registry.get(&sender.id()).await else {
        return Routed::Dropped;
    };

    let scan_id = event.scan_id();
    let timestamp = server_now();

    let scan = ServerMessage::ScanEvent {
        scan_id: scan_id.clone(),
        device_id: record.device_id,
        network: event.get("network").cloned(),
        payload: event.payload(),
        timestamp: timestamp.clone(),
    };
    let notified = broadcast(
        &state.registry,
        Audience::Role(Role::ControlClient),
        &scan,
        None,
    )
    .await;
    tracing::info!("Scan {} from {} sent to {} control clients", scan_id, sender.id(), notified);

    let receipt = ServerMessage::Receipt { scan_id, timestamp };
    if let Err(e) = sender.send(&receipt) {
        tracing::debug!("Receipt not delivered: {}", e);
    }

    Routed::Scanned { notified }
}
