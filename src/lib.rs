//! Chat Dashboard Library
//!
//! This library provides tools to:
//! - Fetch chat-session event records from a webhook
//! - Aggregate records into summary metrics and per-day series
//! - Poll on half-hour marks, reusing cached data across restarts
//! - Persist the last fetch in a pluggable key/value store
//! - Export Prometheus metrics for the fetch loop

pub mod aggregator;
pub mod commands;
pub mod config;
pub mod error;
pub mod metrics;
pub mod poller;
pub mod record;
pub mod store;
pub mod webhook;
pub mod window;

// Re-export common types
pub use aggregator::{
    build_daily_series, build_snapshot, summarize, DailySeries, DashboardMetrics,
    DashboardSnapshot,
};
pub use config::Config;
pub use error::{Error, Result};
pub use poller::{PollState, Poller, PollerConfig, PollerHandle};
pub use record::EventRecord;
pub use store::{DashboardCache, FileStore, KeyValueStore, MemoryStore};
pub use webhook::{RecordSource, WebhookClient, WebhookConfig};
pub use window::Window;
