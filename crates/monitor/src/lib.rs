//! Monitoring engine: polls watched accounts, detects new posts and
//! live-state transitions, and dispatches notifications through the
//! gateway sink.

pub mod engine;
pub mod intervals;
pub mod sink;
pub mod state;
pub mod status;
pub mod store;

pub use {
    engine::{Command, EngineSettings, Monitor, MonitorDeps, MonitorHandle},
    sink::{GatewaySink, PooledSink},
    status::{MemoryStatusCache, SqliteStatusCache, StatusCache, StatusSnapshot},
    store::{Binding, ConfigWatchStore, WatchStore, WatchedAccount},
};
