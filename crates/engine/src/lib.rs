//! Pulse engine: per-kind translation of cluster changes into outbound messages.

#![forbid(unsafe_code)]

mod config;
mod dispatch;
pub mod handlers;
pub mod mock;
pub mod resolver;
mod sink;

pub use config::{Policy, WatchConfig};
pub use dispatch::{DispatchStats, StatsSnapshot, Watcher};
pub use handlers::{Context, HandlerTable, Translate};
pub use sink::OutboundSink;
