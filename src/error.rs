use thiserror::Error;

/// Failures of the relay connection itself, below the signaling protocol.
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("relay rejected frame: {0}")]
    Rejected(String),

    #[error("relay connection is closed")]
    Closed,

    #[error("already connected")]
    AlreadyConnected,
}
