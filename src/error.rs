use crate::types::ConnectionId;

/// Connection-scoped failures. None of these are fatal to the process; an
/// unhandled fault is a panic and goes through the shutdown path instead.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Invalid message format: {0}")]
    MalformedMessage(String),

    #[error("Delivery to connection {0} failed: channel closed")]
    DeliveryFailure(ConnectionId),

    #[error("Transport error: {0}")]
    TransportFault(String),

    #[error("Connection {connection} silent for {idle_secs}s")]
    StaleConnection {
        connection: ConnectionId,
        idle_secs: i64,
    },
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        RelayError::MalformedMessage(e.to_string())
    }
}

impl From<axum::Error> for RelayError {
    fn from(e: axum::Error) -> Self {
        RelayError::TransportFault(e.to_string())
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
