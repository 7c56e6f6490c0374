pub mod client;
pub mod device;
pub mod handlers;
pub mod payment;

use axum::{
    body::Bytes,
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
};
use futures::{
    sink::SinkExt,
    stream::{SplitSink, StreamExt},
};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::connection::{
    ConnectionHandle, Outbound, OutboundReceiver, CLOSE_GOING_AWAY, SHUTDOWN_REASON,
};
use crate::error::RelayError;
use crate::lifecycle::{self, CloseCause, ConnectionPhase};
use crate::protocol::ServerMessage;
use crate::state::AppState;
use crate::types::{ConnectionId, Role};

use handlers::Routed;

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    tracing::info!("WebSocket connection request from {}", addr);
    ws.on_upgrade(move |socket| handle_socket(socket, addr.to_string(), state))
}

/// How a connection's writer stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterExit {
    /// Sent a close frame
    Closed,
    /// Told to drop the connection without a handshake
    Terminated,
    /// The socket rejected a write
    Failed,
    /// Every handle was dropped
    Drained,
}

/// Drive one connection from accept to close.
///
/// Inbound messages are handled one at a time, in arrival order. Outbound
/// frames from any task are written by a separate writer task.
async fn handle_socket(mut socket: WebSocket, remote_address: String, state: Arc<AppState>) {
    let mut phase = ConnectionPhase::Connecting;

    if state.shutdown.is_triggered() {
        tracing::info!("Refusing connection from {} during shutdown", remote_address);
        let refusal = Message::Close(Some(CloseFrame {
            code: CLOSE_GOING_AWAY,
            reason: SHUTDOWN_REASON.into(),
        }));
        if let Err(e) = socket.send(refusal).await {
            tracing::debug!("Close frame to {} not sent: {}", remote_address, e);
        }
        return;
    }

    let (sink, mut stream) = socket.split();
    let (handle, outbound) = lifecycle::accept(&state, remote_address).await;
    let id = handle.id();
    phase.advance(ConnectionPhase::Open);

    // Shutdown may have swept the registry between the check above and accept
    if state.shutdown.is_triggered() {
        if let Err(e) = handle.close(CLOSE_GOING_AWAY, SHUTDOWN_REASON) {
            tracing::debug!("Could not close {} after late accept: {}", id, e);
        }
    }

    let mut writer = tokio::spawn(write_outbound(sink, outbound, id));

    let cause = loop {
        tokio::select! {
            exit = &mut writer => {
                break match exit {
                    Ok(WriterExit::Closed) => CloseCause::Shutdown,
                    Ok(WriterExit::Terminated) => CloseCause::Evicted,
                    Ok(WriterExit::Failed) | Ok(WriterExit::Drained) => CloseCause::TransportFault,
                    Err(e) => {
                        tracing::error!("Writer for {} crashed: {}", id, e);
                        CloseCause::TransportFault
                    }
                };
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!("Received message from {}: {}", id, text.as_str());
                        if handlers::handle_message(&state, &id, text.as_str()).await == Routed::Dropped {
                            break CloseCause::Evicted;
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => {
                            if handlers::handle_message(&state, &id, text).await == Routed::Dropped {
                                break CloseCause::Evicted;
                            }
                        }
                        Err(e) => report_malformed(&handle, RelayError::MalformedMessage(e.to_string())),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        state.registry.touch(&id).await;
                        if handle.pong(data.to_vec()).is_err() {
                            break CloseCause::TransportFault;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        state.registry.touch(&id).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!("Connection {} sent close: {:?}", id, frame);
                        break CloseCause::PeerClosed;
                    }
                    Some(Err(e)) => {
                        tracing::warn!("Connection {}: {}", id, RelayError::from(e));
                        break CloseCause::TransportFault;
                    }
                    None => break CloseCause::PeerClosed,
                }
            }
        }
    };

    phase.advance(ConnectionPhase::Closing);
    writer.abort();
    lifecycle::disconnect(&state, &id, cause).await;
    phase.advance(ConnectionPhase::Closed);
    tracing::debug!("Connection {} reached {:?}", id, phase);
}

fn report_malformed(handle: &ConnectionHandle, error: RelayError) {
    tracing::warn!("Malformed frame from {}: {}", handle.id(), error);
    let msg = ServerMessage::Error {
        message: error.to_string(),
    };
    if let Err(e) = handle.send(&msg) {
        tracing::debug!("Error report to {} not delivered: {}", handle.id(), e);
    }
}

/// Reply to an announce that contradicts the sender's declared role
pub(crate) fn reject_role_change(sender: &ConnectionHandle, current: Role) -> Routed {
    tracing::warn!(
        "Connection {} tried to change its role from {}",
        sender.id(),
        current
    );
    let msg = ServerMessage::Error {
        message: format!("connection already announced as {}", current),
    };
    if let Err(e) = sender.send(&msg) {
        tracing::debug!("Role conflict notice to {} not delivered: {}", sender.id(), e);
    }
    Routed::RoleConflict { current }
}

async fn write_outbound(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: OutboundReceiver,
    id: ConnectionId,
) -> WriterExit {
    while let Some(frame) = outbound.recv().await {
        let msg = match frame {
            Outbound::Text(text) => Message::Text(text.into()),
            Outbound::Ping => Message::Ping(Bytes::new()),
            Outbound::Pong(data) => Message::Pong(data.into()),
            Outbound::Close { code, reason } => {
                let frame = CloseFrame {
                    code,
                    reason: reason.into(),
                };
                if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                    tracing::debug!("Close frame to {} not sent: {}", id, e);
                }
                return WriterExit::Closed;
            }
            Outbound::Terminate => {
                tracing::debug!("Terminating connection {}", id);
                return WriterExit::Terminated;
            }
        };

        // A peer that stops reading must not keep a close or terminate waiting
        tokio::select! {
            biased;
            control = outbound.recv_control() => {
                return match control {
                    Some(Outbound::Terminate) => WriterExit::Terminated,
                    Some(_) => {
                        tracing::debug!("Write to {} stalled, closing without a close frame", id);
                        WriterExit::Closed
                    }
                    None => WriterExit::Drained,
                };
            }
            result = sink.send(msg) => {
                if let Err(e) = result {
                    tracing::debug!("Write to {} failed: {}", id, e);
                    return WriterExit::Failed;
                }
            }
        }
    }
    WriterExit::Drained
}
