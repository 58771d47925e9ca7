//! Point-to-point transport seam.
//!
//! The mesh does not implement ICE, DTLS or SCTP itself. A transport
//! primitive is plugged in through [`TransportConnector`]; operations that
//! take time (description creation with candidate gathering, channel
//! opening) return immediately and report completion as a
//! [`TransportEvent`] on the sender handed to [`TransportConnector::connect`].

use std::fmt;

use bytes::Bytes;
use tokio::sync::mpsc;

use meshchat_shared::SessionDescription;

use crate::error::TransportError;

/// Identifier of one sub-channel, shared by both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One message on a sub-channel. Message boundaries are preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelData {
    Text(String),
    Binary(Bytes),
}

#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The local offer/answer is ready and candidate gathering finished.
    LocalDescriptionReady {
        peer: String,
        description: SessionDescription,
    },
    /// A sub-channel is open, whether opened locally or by the peer.
    ChannelOpened {
        peer: String,
        channel: ChannelId,
        label: String,
    },
    ChannelMessage {
        peer: String,
        channel: ChannelId,
        data: ChannelData,
    },
    ChannelClosed {
        peer: String,
        channel: ChannelId,
    },
    ChannelError {
        peer: String,
        channel: ChannelId,
        reason: String,
    },
    /// The whole session with `peer` failed or was closed remotely.
    Disconnected {
        peer: String,
        reason: String,
    },
}

impl TransportEvent {
    pub fn peer(&self) -> &str {
        match self {
            TransportEvent::LocalDescriptionReady { peer, .. }
            | TransportEvent::ChannelOpened { peer, .. }
            | TransportEvent::ChannelMessage { peer, .. }
            | TransportEvent::ChannelClosed { peer, .. }
            | TransportEvent::ChannelError { peer, .. }
            | TransportEvent::Disconnected { peer, .. } => peer,
        }
    }
}

/// A transport session with one remote peer.
pub trait PeerTransport: Send {
    /// Start creating a local offer. Reported as `LocalDescriptionReady`.
    fn create_offer(&mut self) -> Result<(), TransportError>;

    /// Start creating a local answer to the applied remote offer.
    /// Reported as `LocalDescriptionReady`.
    fn create_answer(&mut self) -> Result<(), TransportError>;

    fn apply_remote_description(
        &mut self,
        description: &SessionDescription,
    ) -> Result<(), TransportError>;

    /// Open a labeled sub-channel. Reported as `ChannelOpened` on both ends.
    fn open_channel(&mut self, label: &str) -> Result<ChannelId, TransportError>;

    fn send(&mut self, channel: ChannelId, data: ChannelData) -> Result<(), TransportError>;

    fn close_channel(&mut self, channel: ChannelId);

    /// Close every sub-channel and release the session.
    fn close(&mut self);
}

/// Factory for [`PeerTransport`] sessions.
pub trait TransportConnector: Send {
    type Transport: PeerTransport;

    fn connect(
        &mut self,
        peer: &str,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Self::Transport, TransportError>;
}
