//! # meshchat-shared
//!
//! Types shared by the relay and the peers: the JSON envelopes exchanged
//! with the relay, the frames exchanged over direct peer channels, and the
//! protocol constants both sides agree on.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use protocol::{
    ChatFrame, DescriptionKind, Envelope, FileRequest, Reply, ServerEvent, SessionDescription,
    SignalRequest,
};
pub use types::{now_millis, FrameKind, SignalKind};
