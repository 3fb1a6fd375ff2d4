//! Connection registry and admission control.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use pulse_core::ClientId;

use super::connection::ClientConnection;

/// Live connections plus a slot counter enforcing `max_connections`.
pub struct ConnectionRegistry {
    connections: DashMap<ClientId, Arc<ClientConnection>>,
    reserved: AtomicUsize,
    max_connections: usize,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize) -> Arc<Self> {
        Arc::new(Self {
            connections: DashMap::new(),
            reserved: AtomicUsize::new(0),
            max_connections,
        })
    }

    /// Claim a connection slot, or `None` at the limit.
    ///
    /// The slot is released when the returned guard drops.
    pub fn try_reserve(self: &Arc<Self>) -> Option<ConnectionSlot> {
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_connections).then_some(n + 1)
            })
            .ok()
            .map(|_| ConnectionSlot {
                registry: Arc::clone(self),
            })
    }

    pub fn add(&self, connection: Arc<ClientConnection>) {
        let _ = self.connections.insert(connection.id.clone(), connection);
    }

    pub fn remove(&self, id: &ClientId) -> Option<Arc<ClientConnection>> {
        self.connections.remove(id).map(|(_, conn)| conn)
    }

    pub fn get(&self, id: &ClientId) -> Option<Arc<ClientConnection>> {
        self.connections.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Registered connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Slots currently held, including upgrades still in progress.
    pub fn reserved(&self) -> usize {
        self.reserved.load(Ordering::Acquire)
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Connections whose session is calibrating or measuring.
    pub fn active_sessions(&self) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.value().is_active())
            .count()
    }
}

/// A held connection slot.
pub struct ConnectionSlot {
    registry: Arc<ConnectionRegistry>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        let _ = self.registry.reserved.fetch_sub(1, Ordering::AcqRel);
    }
}
