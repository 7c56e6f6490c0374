use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier for a live connection.
///
/// ULIDs sort by creation time, so ordering by id matches accept order for
/// connections accepted in different milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(ulid::Ulid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Declared category of a connection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Unknown,
    ScanDevice,
    ControlClient,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Unknown => "unknown",
            Role::ScanDevice => "scan_device",
            Role::ControlClient => "control_client",
        }
    }

    pub fn is_announced(&self) -> bool {
        *self != Role::Unknown
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata attached 1:1 to a live connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionRecord {
    pub id: ConnectionId,
    pub role: Role,
    pub device_id: Option<String>,
    pub remote_address: String,
    pub connected_at: DateTime<Utc>,
    pub last_liveness: DateTime<Utc>,
}

impl ConnectionRecord {
    pub fn new(id: ConnectionId, remote_address: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            role: Role::Unknown,
            device_id: None,
            remote_address,
            connected_at: now,
            last_liveness: now,
        }
    }

    /// Declare the connection's role. The first declared role is final:
    /// returns false and leaves the record untouched when `role` is `Unknown`
    /// or differs from an already declared role.
    pub fn assign_role(&mut self, role: Role) -> bool {
        match (self.role, role) {
            (_, Role::Unknown) => false,
            (Role::Unknown, requested) => {
                self.role = requested;
                true
            }
            (current, requested) => current == requested,
        }
    }

    /// Refresh `last_liveness` to now
    pub fn touch(&mut self) {
        self.last_liveness = Utc::now();
    }

    /// Whether the peer has been silent for longer than `threshold` as of `now`
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
        now.signed_duration_since(self.last_liveness) > threshold
    }
}
