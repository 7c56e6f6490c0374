//! Control client messages

use crate::connection::ConnectionHandle;
use crate::protocol::ServerMessage;
use crate::state::AppState;
use crate::types::Role;
use std::sync::Arc;

use super::handlers::Routed;

/// Declare the sender a control client. Only the sender hears about it.
pub async fn handle_client_announce(state: &Arc<AppState>, sender: &ConnectionHandle) -> Routed {
    let outcome = state
        .registry
        .update(&sender.id(), |r| (r.assign_role(Role::ControlClient), r.clone()))
        .await;
    let Some((accepted, record)) = outcome else {
        return Routed::Dropped;
    };

    if !accepted {
        return super::reject_role_change(sender, record.role);
    }

    tracing::info!("Connection {} announced as control client", record.id);
    let confirmation = ServerMessage::Confirmation {
        role: Role::ControlClient,
        device_id: record.device_id,
        message: "control client registered".to_string(),
    };
    if let Err(e) = sender.send(&confirmation) {
        tracing::debug!("Confirmation not delivered: {}", e);
    }

    Routed::Announced {
        role: Role::ControlClient,
        notified: 0,
    }
}
