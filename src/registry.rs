//! Connection registry: live connection handles and their metadata.
//!
//! One lock guards the whole map, held only for the duration of a lookup or a
//! single record mutation. Broadcasts collect handles under a read lock and
//! send after releasing it.

use crate::connection::ConnectionHandle;
use crate::types::{ConnectionId, ConnectionRecord, Role};
use std::collections::HashMap;
use tokio::sync::{watch, RwLock};

struct Entry {
    record: ConnectionRecord,
    handle: ConnectionHandle,
}

/// Count of live connections per role
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoleCounts {
    pub unknown: usize,
    pub scan_devices: usize,
    pub control_clients: usize,
}

impl RoleCounts {
    pub fn total(&self) -> usize {
        self.unknown + self.scan_devices + self.control_clients
    }
}

pub struct Registry {
    entries: RwLock<HashMap<ConnectionId, Entry>>,
    /// Live connection count, published on every insert and removal
    live: watch::Sender<usize>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            live: watch::Sender::new(0),
        }
    }

    /// Create a record with role `Unknown` for a freshly accepted connection
    pub async fn register(
        &self,
        handle: ConnectionHandle,
        remote_address: String,
    ) -> ConnectionRecord {
        let record = ConnectionRecord::new(handle.id(), remote_address);
        let mut entries = self.entries.write().await;
        entries.insert(
            handle.id(),
            Entry {
                record: record.clone(),
                handle,
            },
        );
        self.live.send_replace(entries.len());
        record
    }

    pub async fn get(&self, id: &ConnectionId) -> Option<ConnectionRecord> {
        self.entries
            .read()
            .await
            .get(id)
            .map(|e| e.record.clone())
    }

    pub async fn handle(&self, id: &ConnectionId) -> Option<ConnectionHandle> {
        self.entries
            .read()
            .await
            .get(id)
            .map(|e| e.handle.clone())
    }

    /// Apply `mutator` to the record under exclusive access.
    ///
    /// Returns `None` without calling `mutator` when the record is gone; a
    /// removed record is never recreated.
    pub async fn update<R>(
        &self,
        id: &ConnectionId,
        mutator: impl FnOnce(&mut ConnectionRecord) -> R,
    ) -> Option<R> {
        let mut entries = self.entries.write().await;
        entries.get_mut(id).map(|e| mutator(&mut e.record))
    }

    /// Refresh `last_liveness`. Returns false if the connection is gone.
    pub async fn touch(&self, id: &ConnectionId) -> bool {
        self.update(id, ConnectionRecord::touch).await.is_some()
    }

    pub async fn remove(&self, id: &ConnectionId) -> Option<ConnectionRecord> {
        let mut entries = self.entries.write().await;
        let removed = entries.remove(id).map(|e| e.record);
        self.live.send_replace(entries.len());
        removed
    }

    /// Remove the connection only if its record still satisfies `predicate`
    /// at the moment of removal
    pub async fn remove_if(
        &self,
        id: &ConnectionId,
        predicate: impl FnOnce(&ConnectionRecord) -> bool,
    ) -> Option<(ConnectionRecord, ConnectionHandle)> {
        let mut entries = self.entries.write().await;
        if !predicate(&entries.get(id)?.record) {
            return None;
        }
        let removed = entries.remove(id).map(|e| (e.record, e.handle));
        self.live.send_replace(entries.len());
        removed
    }

    /// Point-in-time copy of every record, oldest connection first
    pub async fn snapshot(&self) -> Vec<ConnectionRecord> {
        let mut records: Vec<ConnectionRecord> = self
            .entries
            .read()
            .await
            .values()
            .map(|e| e.record.clone())
            .collect();
        records.sort_by(|a, b| a.connected_at.cmp(&b.connected_at).then(a.id.cmp(&b.id)));
        records
    }

    /// Handles of every connection whose record matches `predicate`
    pub async fn connections_where(
        &self,
        predicate: impl Fn(&ConnectionRecord) -> bool,
    ) -> Vec<ConnectionHandle> {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| predicate(&e.record))
            .map(|e| e.handle.clone())
            .collect()
    }

    pub async fn role_counts(&self) -> RoleCounts {
        let entries = self.entries.read().await;
        let mut counts = RoleCounts::default();
        for entry in entries.values() {
            match entry.record.role {
                Role::Unknown => counts.unknown += 1,
                Role::ScanDevice => counts.scan_devices += 1,
                Role::ControlClient => counts.control_clients += 1,
            }
        }
        counts
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Resolves once the last connection has been removed
    pub async fn wait_until_empty(&self) {
        let mut live = self.live.subscribe();
        // The sender lives as long as `self`, so this only ends on an empty registry
        if live.wait_for(|count| *count == 0).await.is_err() {
            tracing::debug!("Registry count channel closed");
        }
    }
}
