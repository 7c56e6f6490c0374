//! Connection lifecycle: accept, deregistration and process shutdown.

use crate::broadcast::{broadcast, Audience};
use crate::connection::{ConnectionHandle, OutboundReceiver};
use crate::protocol::{server_now, ConnectionStatus, ServerMessage};
use crate::state::AppState;
use crate::types::{ConnectionId, ConnectionRecord, Role};
use std::sync::Arc;
use tokio::sync::watch;

/// Per-connection state machine. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionPhase {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionPhase {
    /// Move to `next`; returns false if that would go backwards
    pub fn advance(&mut self, next: ConnectionPhase) -> bool {
        if next <= *self {
            return false;
        }
        *self = next;
        true
    }
}

/// Why a connection went from open to closing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCause {
    PeerClosed,
    TransportFault,
    Shutdown,
    Evicted,
}

/// Register a freshly accepted connection and greet it.
///
/// Returns the connection's handle and the queue its writer must drain.
pub async fn accept(
    state: &AppState,
    remote_address: String,
) -> (ConnectionHandle, OutboundReceiver) {
    let (handle, outbound) = ConnectionHandle::channel(ConnectionId::new());
    let record = state.registry.register(handle.clone(), remote_address).await;

    let welcome = ServerMessage::Welcome {
        server: state.config.server_name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        connection_id: record.id,
        time: server_now(),
    };
    if let Err(e) = handle.send(&welcome) {
        tracing::warn!("Failed to queue welcome: {}", e);
    }

    tracing::info!(
        "Connection {} open from {} ({} live)",
        record.id,
        record.remote_address,
        state.registry.len().await
    );
    (handle, outbound)
}

/// Deregister a connection. Safe to call more than once: only the call that
/// actually removes the record notifies anyone.
pub async fn disconnect(
    state: &AppState,
    id: &ConnectionId,
    cause: CloseCause,
) -> Option<ConnectionRecord> {
    let record = state.registry.remove(id).await?;
    announce_departure(state, &record, cause).await;
    Some(record)
}

/// Tell control clients that a scan device left. Other roles leave silently.
pub async fn announce_departure(state: &AppState, record: &ConnectionRecord, cause: CloseCause) {
    tracing::info!(
        "Connection {} ({}) closed: {:?} ({} live)",
        record.id,
        record.role,
        cause,
        state.registry.len().await
    );

    if record.role != Role::ScanDevice {
        return;
    }

    let msg = ServerMessage::Status {
        role: Role::ScanDevice,
        status: ConnectionStatus::Disconnected,
        device_id: record.device_id.clone(),
    };
    let notified = broadcast(
        &state.registry,
        Audience::Role(Role::ControlClient),
        &msg,
        None,
    )
    .await;
    tracing::debug!(
        "Device {:?} disconnect sent to {} control clients",
        record.device_id,
        notified
    );
}

/// Send a close frame to every open connection. Returns how many were queued.
pub async fn close_all(state: &AppState, code: u16, reason: &str) -> usize {
    let targets = state.registry.connections_where(|_| true).await;
    let mut closed = 0;
    for target in targets {
        match target.close(code, reason) {
            Ok(()) => closed += 1,
            Err(e) => tracing::debug!("Close skipped: {}", e),
        }
    }
    tracing::info!("Sent close frame to {} connections", closed);
    closed
}

/// Wait until every connection task has deregistered
pub async fn wait_for_drain(state: &AppState) {
    state.registry.wait_until_empty().await;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Termination signal from the OS
    Signal,
    /// Unhandled panic somewhere in the process
    Fault,
}

/// Process-wide shutdown trigger, shared by signal handling, the panic hook,
/// the HTTP server and every background task.
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<Option<ShutdownReason>>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Start shutdown. Returns true only for the first caller.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        })
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        *self.tx.borrow()
    }

    pub fn is_triggered(&self) -> bool {
        self.reason().is_some()
    }

    /// Resolve once shutdown has been triggered
    pub async fn wait(&self) -> ShutdownReason {
        let mut rx = self.tx.subscribe();
        let reason = rx.wait_for(Option::is_some).await.ok().and_then(|r| *r);
        reason.unwrap_or(ShutdownReason::Signal)
    }
}

/// Trigger shutdown on Ctrl-C or SIGTERM
pub async fn listen_for_signals(shutdown: Shutdown) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = shutdown.wait() => return,
    }

    if shutdown.trigger(ShutdownReason::Signal) {
        tracing::info!("Termination signal received, shutting down");
    }
}

/// Route panics anywhere in the process into the shutdown path
pub fn install_panic_hook(shutdown: Shutdown) {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("Unhandled fault: {}", info);
        if shutdown.trigger(ShutdownReason::Fault) {
            tracing::error!("Shutting down after unhandled fault");
        }
        default_hook(info);
    }));
}
