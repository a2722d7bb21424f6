use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use super::ConnectionHandle;

/// Live duplex connections, so they can be counted and closed on shutdown.
#[derive(Clone, Default)]
pub struct ConnectionPool {
    connections: Arc<RwLock<HashMap<Uuid, ConnectionHandle>>>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, handle: ConnectionHandle) {
        let id = handle.id();
        self.connections.write().await.insert(id, handle);
        info!("Added connection {} to pool", id);
    }

    pub async fn remove(&self, id: &Uuid) -> bool {
        let removed = self.connections.write().await.remove(id).is_some();
        if removed {
            info!("Removed connection {} from pool", id);
        }
        removed
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Signals every connection to shut down. Each removes itself once closed.
    pub async fn close_all(&self) {
        let connections = self.connections.read().await;
        for handle in connections.values() {
            handle.close();
        }
        info!("Closing {} connections", connections.len());
    }
}
