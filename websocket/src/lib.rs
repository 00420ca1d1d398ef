//! WebSocket transport for the presence hub.
//!
//! Connections declare a role:
//! - verifiers observe every hub event and issue administrative commands
//!   (roster upload, manual binding, `verify_now`, key reset);
//! - senders announce a participant, register its public key and answer
//!   the challenges routed to them.

pub mod error;
pub mod fanout;
pub mod messages;
pub mod server;
pub mod timers;

pub use error::WsError;
pub use fanout::{ConnectionId, FanOut};
pub use messages::{ClientMessage, Role, ServerMessage};
pub use server::{ServerConfig, WebSocketServer, WsState};
pub use timers::DetectionTimers;
