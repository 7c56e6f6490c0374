use crate::protocol::ServerMessage;
use crate::registry::Registry;
use crate::types::{ConnectionId, ConnectionRecord, Role};

/// Which connections a broadcast targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    All,
    Role(Role),
    /// Every connection that has declared a role
    Announced,
}

impl Audience {
    pub fn matches(&self, record: &ConnectionRecord) -> bool {
        match self {
            Audience::All => true,
            Audience::Role(role) => record.role == *role,
            Audience::Announced => record.role.is_announced(),
        }
    }
}

/// Send `msg` to every connection in `audience`, skipping `except`.
///
/// Returns how many targets accepted the message. A target whose channel is
/// already closed is logged and skipped.
pub async fn broadcast(
    registry: &Registry,
    audience: Audience,
    msg: &ServerMessage,
    except: Option<&ConnectionId>,
) -> usize {
    let json = match serde_json::to_string(msg) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!("Failed to serialize broadcast {:?}: {}", msg, e);
            return 0;
        }
    };
    broadcast_text(registry, audience, json, except).await
}

/// Like [`broadcast`] but for an already-encoded payload
pub async fn broadcast_text(
    registry: &Registry,
    audience: Audience,
    text: String,
    except: Option<&ConnectionId>,
) -> usize {
    let targets = registry
        .connections_where(|r| audience.matches(r) && Some(&r.id) != except)
        .await;

    let mut delivered = 0;
    for target in targets {
        match target.send_text(text.clone()) {
            Ok(()) => delivered += 1,
            Err(e) => tracing::debug!("Broadcast skipped target: {}", e),
        }
    }
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionHandle, Outbound};

    #[tokio::test]
    async fn test_broadcast_filters_by_role_and_excludes_sender() {
        let registry = Registry::new();
        let (a, mut a_rx) = ConnectionHandle::channel(ConnectionId::new());
        let (b, mut b_rx) = ConnectionHandle::channel(ConnectionId::new());
        let (c, mut c_rx) = ConnectionHandle::channel(ConnectionId::new());
        let (a_id, b_id, c_id) = (a.id(), b.id(), c.id());
        registry.register(a, "a".to_string()).await;
        registry.register(b, "b".to_string()).await;
        registry.register(c, "c".to_string()).await;
        registry.update(&a_id, |r| r.assign_role(Role::ControlClient)).await;
        registry.update(&b_id, |r| r.assign_role(Role::ControlClient)).await;
        registry.update(&c_id, |r| r.assign_role(Role::ScanDevice)).await;

        let msg = ServerMessage::Error {
            message: "hello".to_string(),
        };
        let delivered = broadcast(
            &registry,
            Audience::Role(Role::ControlClient),
            &msg,
            Some(&b_id),
        )
        .await;
        assert_eq!(delivered, 1);
        assert!(matches!(a_rx.try_recv(), Ok(Outbound::Text(_))));
        assert!(b_rx.try_recv().is_err());
        assert!(c_rx.try_recv().is_err());

        assert_eq!(broadcast(&registry, Audience::All, &msg, None).await, 3);
        assert_eq!(broadcast(&registry, Audience::Announced, &msg, None).await, 3);
    }

    #[tokio::test]
    async fn test_closed_target_does_not_stop_broadcast() {
        let registry = Registry::new();
        let (dead, dead_rx) = ConnectionHandle::channel(ConnectionId::new());
        let (live, mut live_rx) = ConnectionHandle::channel(ConnectionId::new());
        registry.register(dead, "dead".to_string()).await;
        registry.register(live, "live".to_string()).await;
        drop(dead_rx);

        let delivered = broadcast_text(&registry, Audience::All, "{}".to_string(), None).await;
        assert_eq!(delivered, 1);
        assert_eq!(live_rx.try_recv().unwrap(), Outbound::Text("{}".to_string()));
    }

    #[tokio::test]
    async fn test_announced_skips_unknown() {
        let registry = Registry::new();
        let (a, _a_rx) = ConnectionHandle::channel(ConnectionId::new());
        registry.register(a, "a".to_string()).await;
        let delivered = broadcast_text(&registry, Audience::Announced, "{}".to_string(), None).await;
        assert_eq!(delivered, 0);
    }
}
