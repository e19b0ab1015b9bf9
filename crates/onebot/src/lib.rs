//! OneBot v11 gateway client.
//!
//! One [`OneBotClient`] per (ws_url, access_token) pair owns a persistent
//! WebSocket session: an outbound queue, a reconnecting connection task, and
//! an echo-tag correlation table for fire-and-wait calls. [`ClientPool`]
//! hands out shared clients keyed by endpoint.

pub mod client;
pub mod pool;
pub mod wire;

pub use {
    client::{CallError, OneBotClient},
    pool::{ClientPool, Endpoint},
    wire::{ApiFrame, Target, TargetKind},
};
