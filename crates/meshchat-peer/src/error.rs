use meshchat_shared::ProtocolError;
use thiserror::Error;

use crate::transport::ChannelId;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Transport is not connected")]
    NotConnected,

    #[error("Unknown channel {0}")]
    UnknownChannel(ChannelId),

    #[error("Invalid transport state: {0}")]
    InvalidState(String),

    #[error("Transport closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum MeshError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Login rejected: {0}")]
    LoginRejected(String),

    #[error("Login timed out")]
    LoginTimeout,

    #[error("Relay connection closed")]
    RelayClosed,

    #[error("Unknown peer: {0}")]
    UnknownPeer(String),

    #[error("Session with '{0}' is not established")]
    NotEstablished(String),

    #[error("File too large: {size} bytes (max {max})")]
    FileTooLarge { size: usize, max: usize },

    #[error("Transfer of '{0}' already in progress")]
    TransferInProgress(String),

    #[error("Transfer of '{filename}' aborted: {reason}")]
    TransferAborted { filename: String, reason: String },
}
