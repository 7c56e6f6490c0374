//! Handle to a live connection.
//!
//! The socket itself belongs to its connection task; everything else talks to
//! it through this handle, which only queues frames for the task's writer.

use crate::error::{RelayError, RelayResult};
use crate::protocol::ServerMessage;
use crate::types::ConnectionId;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};

/// Close code sent to every peer when the server shuts down (going away)
pub const CLOSE_GOING_AWAY: u16 = 1001;
pub const SHUTDOWN_REASON: &str = "server shutting down";

/// Frames queued for a connection's writer
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text(String),
    /// Transport-level liveness probe
    Ping,
    /// Reply to a peer's ping
    Pong(Vec<u8>),
    /// Clean close with a close frame
    Close { code: u16, reason: String },
    /// Drop the connection without a close handshake
    Terminate,
}

/// Data frames a connection may have waiting before further sends fail
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;
/// Close and terminate travel on their own queue; one pending is enough
const CONTROL_QUEUE_CAPACITY: usize = 2;

/// Receiving side of a connection's queues, drained by its writer.
///
/// Close and terminate are kept apart from data frames so they are seen even
/// when the data queue is full or the socket has stopped accepting writes.
#[derive(Debug)]
pub struct OutboundReceiver {
    control: mpsc::Receiver<Outbound>,
    frames: mpsc::Receiver<Outbound>,
}

impl OutboundReceiver {
    /// Next frame, control frames first
    pub async fn recv(&mut self) -> Option<Outbound> {
        tokio::select! {
            biased;
            Some(frame) = self.control.recv() => Some(frame),
            frame = self.frames.recv() => frame,
        }
    }

    /// Waits for a close or terminate only
    pub async fn recv_control(&mut self) -> Option<Outbound> {
        self.control.recv().await
    }

    pub fn try_recv(&mut self) -> Result<Outbound, TryRecvError> {
        match self.control.try_recv() {
            Ok(frame) => Ok(frame),
            Err(_) => self.frames.try_recv(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    control: mpsc::Sender<Outbound>,
    frames: mpsc::Sender<Outbound>,
}

impl ConnectionHandle {
    /// Create a handle plus the receiving end its writer drains
    pub fn channel(id: ConnectionId) -> (Self, OutboundReceiver) {
        let (control, control_rx) = mpsc::channel(CONTROL_QUEUE_CAPACITY);
        let (frames, frames_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        (
            Self {
                id,
                control,
                frames,
            },
            OutboundReceiver {
                control: control_rx,
                frames: frames_rx,
            },
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn send(&self, msg: &ServerMessage) -> RelayResult<()> {
        // Serializing our own enum cannot fail; treat it like a lost frame if it does
        let json = serde_json::to_string(msg).map_err(|e| {
            tracing::error!("Failed to serialize {:?}: {}", msg, e);
            RelayError::DeliveryFailure(self.id)
        })?;
        self.send_text(json)
    }

    pub fn send_text(&self, text: String) -> RelayResult<()> {
        self.push(Outbound::Text(text))
    }

    pub fn ping(&self) -> RelayResult<()> {
        self.push(Outbound::Ping)
    }

    pub fn pong(&self, data: Vec<u8>) -> RelayResult<()> {
        self.push(Outbound::Pong(data))
    }

    pub fn close(&self, code: u16, reason: &str) -> RelayResult<()> {
        self.push_control(Outbound::Close {
            code,
            reason: reason.to_string(),
        })
    }

    pub fn terminate(&self) -> RelayResult<()> {
        self.push_control(Outbound::Terminate)
    }

    pub fn is_closed(&self) -> bool {
        self.frames.is_closed()
    }

    fn push(&self, frame: Outbound) -> RelayResult<()> {
        self.frames.try_send(frame).map_err(|e| {
            if let TrySendError::Full(_) = e {
                tracing::warn!("Outbound queue for {} is full, dropping frame", self.id);
            }
            RelayError::DeliveryFailure(self.id)
        })
    }

    fn push_control(&self, frame: Outbound) -> RelayResult<()> {
        match self.control.try_send(frame) {
            Ok(()) => Ok(()),
            // The writer already has a close or terminate to act on
            Err(TrySendError::Full(_)) => Ok(()),
            Err(TrySendError::Closed(_)) => Err(RelayError::DeliveryFailure(self.id)),
        }
    }
}
