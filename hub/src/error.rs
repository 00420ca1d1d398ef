use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("config error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] troof_store::StoreError),

    #[error("presence error: {0}")]
    Presence(#[from] troof_presence::PresenceError),

    #[error("WebSocket server error: {0}")]
    WebSocket(#[from] troof_websocket::WsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("hub is already running")]
    AlreadyStarted,

    #[error("shutdown timeout")]
    ShutdownTimeout,
}
