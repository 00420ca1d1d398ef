//! Shared utilities for the Troof hub.

pub mod logging;
pub mod stats;
pub mod time;

pub use logging::{init_logging, init_tracing, LogFormat};
pub use stats::HubCounters;
pub use time::format_duration;
