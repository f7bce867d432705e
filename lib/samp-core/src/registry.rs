//! Registry of web profile clients allowed to use translator paths

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// ClientRegistry tracks registered web clients and the origin they came from
#[derive(Clone, Default)]
pub struct ClientRegistry {
    // Map of client_id to registration details
    clients: Arc<RwLock<HashMap<String, RegisteredClient>>>,
}

/// A browser client admitted through the web profile
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisteredClient {
    pub client_id: String,
    pub origin: String,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client, replacing any previous entry with the same id
    pub async fn add_client(&self, client_id: impl Into<String>, origin: impl Into<String>) {
        let client_id = client_id.into();
        let origin = origin.into();

        let mut clients = self.clients.write().await;
        debug!("Registered web client {} from {}", client_id, origin);
        clients.insert(
            client_id.clone(),
            RegisteredClient { client_id, origin },
        );
    }

    /// Remove a client; unknown ids are ignored
    pub async fn remove_client(&self, client_id: &str) {
        let mut clients = self.clients.write().await;
        if clients.remove(client_id).is_some() {
            debug!("Removed web client {}", client_id);
        }
    }

    pub async fn contains(&self, client_id: &str) -> bool {
        let clients = self.clients.read().await;
        clients.contains_key(client_id)
    }

    pub async fn get_client(&self, client_id: &str) -> Option<RegisteredClient> {
        let clients = self.clients.read().await;
        clients.get(client_id).cloned()
    }

    pub async fn list_clients(&self) -> Vec<RegisteredClient> {
        let clients = self.clients.read().await;
        clients.values().cloned().collect()
    }

    pub async fn client_count(&self) -> usize {
        let clients = self.clients.read().await;
        clients.len()
    }
}
