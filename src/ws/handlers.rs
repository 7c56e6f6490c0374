//! Inbound message dispatch
//!
//! Parses an inbound payload, refreshes the sender's record, then hands the
//! event to the role-specific handler modules.

use crate::broadcast::{broadcast_text, Audience};
use crate::connection::ConnectionHandle;
use crate::protocol::{server_now, EventKind, InboundEvent, ServerMessage};
use crate::state::AppState;
use crate::types::{ConnectionId, Role};
use std::sync::Arc;

use super::{client, device, payment};

/// What the router did with one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// Payload did not parse; the sender got an `error` event
    Rejected,
    /// The sender's record is gone (closed or evicted mid-flight)
    Dropped,
    /// Role declared; `notified` control clients were told
    Announced { role: Role, notified: usize },
    /// Announce conflicting with the already declared role
    RoleConflict { current: Role },
    /// Scan fanned out to `notified` control clients
    Scanned { notified: usize },
    /// Authorization handed to the provider; the result is broadcast later
    AuthorizationPending,
    HeartbeatAck,
    /// Unrecognized type relayed verbatim to `delivered` other connections
    Relayed { delivered: usize },
}

/// Handle one inbound payload from `from`
pub async fn handle_message(state: &Arc<AppState>, from: &ConnectionId, payload: &str) -> Routed {
    let Some(sender) = state.registry.handle(from).await else {
        tracing::debug!("Dropping message from deregistered connection {}", from);
        return Routed::Dropped;
    };

    let event = match InboundEvent::parse(payload) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!("Malformed message from {}: {}", from, e);
            let error = ServerMessage::Error {
                message: e.to_string(),
            };
            if let Err(e) = sender.send(&error) {
                tracing::debug!("Could not report parse error: {}", e);
            }
            return Routed::Rejected;
        }
    };

    let device_id = event.device_id().map(str::to_string);
    let refreshed = state
        .registry
        .update(from, |record| {
            record.touch();
            if let Some(device_id) = device_id {
                record.device_id = Some(device_id);
            }
        })
        .await;
    if refreshed.is_none() {
        return Routed::Dropped;
    }

    tracing::debug!("Message {:?} from {}", event.kind, from);

    match &event.kind {
        EventKind::DeviceAnnounce => device::handle_device_announce(state, &sender).await,
        EventKind::ClientAnnounce => client::handle_client_announce(state, &sender).await,
        EventKind::ScanEvent => device::handle_scan_event(state, &sender, &event).await,
        EventKind::AuthorizationRequest => {
            payment::handle_authorization_request(state, &sender, &event).await
        }
        EventKind::HeartbeatProbe => handle_heartbeat_probe(&sender),
        EventKind::Other(kind) => relay_verbatim(state, &sender, kind, payload).await,
    }
}

fn handle_heartbeat_probe(sender: &ConnectionHandle) -> Routed {
    let ack = ServerMessage::HeartbeatAck { time: server_now() };
    if let Err(e) = sender.send(&ack) {
        tracing::debug!("Heartbeat ack not delivered: {}", e);
    }
    Routed::HeartbeatAck
}

/// Unrecognized types go to everyone but the sender, exactly as received.
///
/// This lets any peer push arbitrary event types to every other peer.
// TODO: replace with an allow-list of relayable types once clients publish theirs
async fn relay_verbatim(
    state: &AppState,
    sender: &ConnectionHandle,
    kind: &str,
    payload: &str,
) -> Routed {
    let delivered = broadcast_text(
        &state.registry,
        Audience::All,
        payload.to_string(),
        Some(&sender.id()),
    )
    .await;
    tracing::debug!("Relayed {:?} from {} to {} connections", kind, sender.id(), delivered);
    Routed::Relayed { delivered }
}
