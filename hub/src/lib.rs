//! Troof hub node: wires the presence core to storage and the WebSocket
//! transport.
//!
//! The node:
//! - loads configuration from TOML
//! - opens the JSON file store and restores keys and rosters
//! - serves observer and sender connections
//! - sweeps expired challenges, idle meetings and rate buckets
//! - persists state on graceful shutdown

pub mod config;
pub mod error;
pub mod node;
pub mod shutdown;

pub use config::HubConfig;
pub use error::HubError;
pub use node::HubNode;
pub use shutdown::ShutdownController;
