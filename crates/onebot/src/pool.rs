//! Shared client registry, one [`OneBotClient`] per distinct endpoint.

use std::{collections::HashMap, sync::Arc};

use {tokio::sync::Mutex, tracing::debug};

use crate::client::OneBotClient;

/// A gateway endpoint: WebSocket URL plus access token. Two bindings with
/// the same pair share one connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub ws_url: String,
    pub access_token: String,
}

impl Endpoint {
    pub fn new(ws_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            access_token: access_token.into(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.ws_url.is_empty()
    }
}

/// Lazily spawns and caches clients; stopping the pool stops every client.
#[derive(Default)]
pub struct ClientPool {
    clients: Mutex<HashMap<Endpoint, Arc<OneBotClient>>>,
}

impl ClientPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the client for an endpoint, spawning it on first use.
    /// Returns `None` for unconfigured endpoints.
    pub async fn resolve(&self, endpoint: &Endpoint) -> Option<Arc<OneBotClient>> {
        if !endpoint.is_configured() {
            return None;
        }
        let mut clients = self.clients.lock().await;
        let client = clients.entry(endpoint.clone()).or_insert_with(|| {
            debug!(ws_url = %endpoint.ws_url, "spawning gateway client");
            OneBotClient::spawn(&endpoint.ws_url, &endpoint.access_token)
        });
        Some(Arc::clone(client))
    }

    /// Stop every client and clear the registry.
    pub async fn shutdown(&self) {
        let mut clients = self.clients.lock().await;
        for (endpoint, client) in clients.drain() {
            debug!(ws_url = %endpoint.ws_url, "stopping gateway client");
            client.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_endpoint_shares_one_client() {
        let pool = ClientPool::new();
        let endpoint = Endpoint::new("ws://127.0.0.1:1/", "t");
        let a = pool.resolve(&endpoint).await.unwrap();
        let b = pool.resolve(&endpoint).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn unconfigured_endpoint_resolves_to_none() {
        let pool = ClientPool::new();
        assert!(pool.resolve(&Endpoint::new("", "t")).await.is_none());
    }

    #[tokio::test]
    async fn distinct_tokens_get_distinct_clients() {
        let pool = ClientPool::new();
        let a = pool.resolve(&Endpoint::new("ws://127.0.0.1:1/", "a")).await.unwrap();
        let b = pool.resolve(&Endpoint::new("ws://127.0.0.1:1/", "b")).await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        pool.shutdown().await;
    }
}
