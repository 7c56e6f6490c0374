//! Payment authorization requests

use crate::authorization::{
    AuthorizationDecision, AuthorizationError, AuthorizationRequest,
};
use crate::broadcast::{broadcast, Audience};
use crate::connection::ConnectionHandle;
use crate::protocol::{server_now, AuthorizationOutcome, InboundEvent, ServerMessage};
use crate::state::AppState;
use std::sync::Arc;

use super::handlers::Routed;

/// Hand the request to the authorization provider on its own task.
///
/// Nothing is sent now. When the provider answers, the result goes to every
/// scan device and control client. A provider that never answers produces no
/// event at all.
pub async fn handle_authorization_request(
    state: &Arc<AppState>,
    sender: &ConnectionHandle,
    event: &InboundEvent,
) -> Routed {
    let device_id = state
        .registry
        .get(&sender.id())
        .await
        .and_then(|r| r.device_id);

    let request = AuthorizationRequest {
        scan_id: event.scan_id(),
        amount: event.amount(),
        device_id,
        requested_by: sender.id(),
    };
    tracing::info!(
        "Authorization requested for scan {} (amount {:?}) by {}",
        request.scan_id,
        request.amount,
        request.requested_by
    );

    let state = Arc::clone(state);
    tokio::spawn(async move {
        let result = state.authorizer.authorize(request.clone()).await;
        let msg = authorization_result(&request, result);
        let delivered = broadcast(&state.registry, Audience::Announced, &msg, None).await;
        tracing::info!(
            "Authorization result for scan {} sent to {} connections",
            request.scan_id,
            delivered
        );
    });

    Routed::AuthorizationPending
}

fn authorization_result(
    request: &AuthorizationRequest,
    result: Result<AuthorizationDecision, AuthorizationError>,
) -> ServerMessage {
    let (outcome, reference_id, reason) = match result {
        Ok(AuthorizationDecision::Approved { reference_id }) => {
            (AuthorizationOutcome::Approved, Some(reference_id), None)
        }
        Ok(AuthorizationDecision::Declined { reason }) => {
            (AuthorizationOutcome::Declined, None, Some(reason))
        }
        Err(e) => {
            tracing::error!("Authorization provider failed: {}", e);
            (AuthorizationOutcome::Error, None, Some(e.to_string()))
        }
    };

    ServerMessage::AuthorizationResult {
        scan_id: request.scan_id.clone(),
        outcome,
        reference_id,
        reason,
        amount: request.amount,
        device_id: request.device_id.clone(),
        timestamp: server_now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConnectionId;
    use serde_json::json;

    fn request() -> AuthorizationRequest {
        AuthorizationRequest {
            scan_id: json!("S7"),
            amount: Some(42.0),
            device_id: Some("D1".to_string()),
            requested_by: ConnectionId::new(),
        }
    }

    #[test]
    fn test_provider_error_becomes_error_outcome() {
        let msg = authorization_result(
            &request(),
            Err(AuthorizationError::Unavailable("gateway down".to_string())),
        );
        match msg {
            ServerMessage::AuthorizationResult {
                scan_id,
                outcome,
                reference_id,
                reason,
                ..
            } => {
                assert_eq!(scan_id, json!("S7"));
                assert_eq!(outcome, AuthorizationOutcome::Error);
                assert!(reference_id.is_none());
                assert!(reason.unwrap().contains("gateway down"));
            }
            other => panic!("Expected AuthorizationResult, got {:?}", other),
        }
    }

    #[test]
    fn test_approval_carries_reference() {
        let msg = authorization_result(
            &request(),
            Ok(AuthorizationDecision::Approved {
                reference_id: "AUTH-1".to_string(),
            }),
        );
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["outcome"], "approved");
        assert_eq!(json["reference_id"], "AUTH-1");
        assert_eq!(json["device_id"], "D1");
        assert_eq!(json["amount"], 42.0);
        assert!(json.get("reason").is_none());
    }
}
