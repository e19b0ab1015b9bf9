//! Delivery seam between the engine and the gateway client pool.

use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    herald_common::Segment,
    herald_onebot::{CallError, ClientPool, Endpoint, Target},
    serde_json::Value,
    tracing::warn,
};

/// Outbound message sink. The engine only ever talks to this trait; tests
/// swap in a recording implementation.
#[async_trait]
pub trait GatewaySink: Send + Sync {
    /// Fire-and-forget plain text.
    async fn send_text(&self, endpoint: &Endpoint, target: &Target, text: &str);

    /// Fire-and-forget segment list.
    async fn send_segments(&self, endpoint: &Endpoint, target: &Target, segments: &[Segment]);

    /// Fire-and-wait text send, returning the gateway's correlated reply.
    async fn send_text_with_result(
        &self,
        endpoint: &Endpoint,
        target: &Target,
        text: &str,
        timeout: Duration,
    ) -> Result<Value, CallError>;
}

/// Sink backed by the shared [`ClientPool`].
pub struct PooledSink {
    pool: Arc<ClientPool>,
}

impl PooledSink {
    pub fn new(pool: Arc<ClientPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GatewaySink for PooledSink {
    async fn send_text(&self, endpoint: &Endpoint, target: &Target, text: &str) {
        match self.pool.resolve(endpoint).await {
            Some(client) => client.send_text(target, text),
            None => warn!(ws_url = %endpoint.ws_url, "drop message for unconfigured endpoint"),
        }
    }

    async fn send_segments(&self, endpoint: &Endpoint, target: &Target, segments: &[Segment]) {
        match self.pool.resolve(endpoint).await {
            Some(client) => client.send_segments(target, segments),
            None => warn!(ws_url = %endpoint.ws_url, "drop message for unconfigured endpoint"),
        }
    }

    async fn send_text_with_result(
        &self,
        endpoint: &Endpoint,
        target: &Target,
        text: &str,
        timeout: Duration,
    ) -> Result<Value, CallError> {
        match self.pool.resolve(endpoint).await {
            Some(client) => client.send_text_with_result(target, text, timeout).await,
            None => Err(CallError::NotConfigured),
        }
    }
}
