use crate::error::{RelayError, RelayResult};
use crate::types::{ConnectionId, Role};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Inbound event types the router understands. Matching is case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    DeviceAnnounce,
    ClientAnnounce,
    ScanEvent,
    AuthorizationRequest,
    HeartbeatProbe,
    /// Anything else is relayed verbatim to every other connection
    Other(String),
}

impl From<&str> for EventKind {
    fn from(kind: &str) -> Self {
        match kind {
            "device_announce" => EventKind::DeviceAnnounce,
            "client_announce" => EventKind::ClientAnnounce,
            "scan_event" => EventKind::ScanEvent,
            "authorization_request" => EventKind::AuthorizationRequest,
            "heartbeat_probe" => EventKind::HeartbeatProbe,
            other => EventKind::Other(other.to_string()),
        }
    }
}

/// A parsed inbound message: a JSON object with a string `type` and any
/// other fields the sender chose to include.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub kind: EventKind,
    fields: Map<String, Value>,
}

impl InboundEvent {
    pub fn parse(payload: &str) -> RelayResult<Self> {
        let value: Value = serde_json::from_str(payload)?;
        let Value::Object(fields) = value else {
            return Err(RelayError::MalformedMessage(
                "message must be a JSON object".to_string(),
            ));
        };

        let kind = match fields.get("type") {
            Some(Value::String(kind)) => EventKind::from(kind.as_str()),
            Some(_) => {
                return Err(RelayError::MalformedMessage(
                    "`type` must be a string".to_string(),
                ))
            }
            None => {
                return Err(RelayError::MalformedMessage(
                    "missing required field `type`".to_string(),
                ))
            }
        };

        Ok(Self { kind, fields })
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// `device_id` when the sender supplied it as a string
    pub fn device_id(&self) -> Option<&str> {
        self.get("device_id").and_then(Value::as_str)
    }

    /// `scan_id` exactly as sent, or null
    pub fn scan_id(&self) -> Value {
        self.get("scan_id").cloned().unwrap_or(Value::Null)
    }

    pub fn amount(&self) -> Option<f64> {
        self.get("amount").and_then(Value::as_f64)
    }

    /// Every field except `type`
    pub fn payload(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .filter(|(k, _)| k.as_str() != "type")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationOutcome {
    Approved,
    Declined,
    /// The authorization provider itself failed
    Error,
}

/// Events emitted by the server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        server: String,
        version: String,
        connection_id: ConnectionId,
        time: String,
    },
    Error {
        message: String,
    },
    Confirmation {
        role: Role,
        device_id: Option<String>,
        message: String,
    },
    Status {
        role: Role,
        status: ConnectionStatus,
        device_id: Option<String>,
    },
    ScanEvent {
        scan_id: Value,
        device_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        network: Option<Value>,
        payload: Map<String, Value>,
        timestamp: String,
    },
    Receipt {
        scan_id: Value,
        timestamp: String,
    },
    HeartbeatAck {
        time: String,
    },
    AuthorizationResult {
        scan_id: Value,
        outcome: AuthorizationOutcome,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reference_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        amount: Option<f64>,
        device_id: Option<String>,
        timestamp: String,
    },
}

/// Server clock in the format every emitted timestamp uses
pub fn server_now() -> String {
    chrono::Utc::now().to_rfc3339()
}
