//! Payment authorization collaborator.
//!
//! The router hands requests to an [`Authorizer`] on a spawned task and
//! broadcasts whatever comes back. The bundled [`SimulatedAuthorizer`] stands
//! in for a real payment provider.

use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;

use crate::config::AuthorizerConfig;
use crate::types::ConnectionId;

pub type AuthorizationResult<T> = Result<T, AuthorizationError>;

#[derive(Debug, thiserror::Error)]
pub enum AuthorizationError {
    #[error("Authorization provider unavailable: {0}")]
    Unavailable(String),

    #[error("Authorization rejected by provider: {0}")]
    Provider(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizationRequest {
    pub scan_id: Value,
    pub amount: Option<f64>,
    pub device_id: Option<String>,
    pub requested_by: ConnectionId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthorizationDecision {
    Approved { reference_id: String },
    Declined { reason: String },
}

#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(
        &self,
        request: AuthorizationRequest,
    ) -> AuthorizationResult<AuthorizationDecision>;

    fn name(&self) -> &str;
}

/// Approves after a fixed delay with a configurable approval rate
pub struct SimulatedAuthorizer {
    config: AuthorizerConfig,
}

impl SimulatedAuthorizer {
    pub fn new(config: AuthorizerConfig) -> Self {
        Self { config }
    }

    fn decide(&self, request: &AuthorizationRequest) -> AuthorizationDecision {
        let amount = match request.amount {
            Some(amount) if amount > 0.0 => amount,
            _ => {
                return AuthorizationDecision::Declined {
                    reason: "invalid amount".to_string(),
                }
            }
        };

        if let Some(max) = self.config.max_amount {
            if amount > max {
                return AuthorizationDecision::Declined {
                    reason: "amount exceeds limit".to_string(),
                };
            }
        }

        if rand::rng().random_bool(self.config.approval_rate) {
            AuthorizationDecision::Approved {
                reference_id: format!("AUTH-{}", ulid::Ulid::new()),
            }
        } else {
            AuthorizationDecision::Declined {
                reason: "declined by issuer".to_string(),
            }
        }
    }
}

#[async_trait]
impl Authorizer for SimulatedAuthorizer {
    async fn authorize(
        &self,
        request: AuthorizationRequest,
    ) -> AuthorizationResult<AuthorizationDecision> {
        if !self.config.delay.is_zero() {
            tokio::time::sleep(self.config.delay).await;
        }
        let decision = self.decide(&request);
        tracing::info!(
            "Authorization for scan {} from {}: {:?}",
            request.scan_id,
            request.requested_by,
            decision
        );
        Ok(decision)
    }

    fn name(&self) -> &str {
        "simulated"
    }
}
