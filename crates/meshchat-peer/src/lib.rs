//! # meshchat-peer
//!
//! Client side of meshchat: a full mesh of direct peer sessions negotiated
//! through the relay.
//!
//! - [`negotiator`]: offer/answer state machine per remote participant
//! - [`mesh`]: session registry, chat and file operations
//! - [`transfer`]: chunked file streaming and reassembly
//! - [`message_log`]: timestamp-ordered log with system notices
//! - [`transport`]: the point-to-point transport seam, with an in-process
//!   implementation in [`loopback`]
//! - [`runtime`]: the tokio task that drives everything, fed by
//!   [`signal_client`]

pub mod config;
pub mod error;
pub mod loopback;
pub mod mesh;
pub mod message_log;
pub mod negotiator;
pub mod runtime;
pub mod session;
pub mod signal_client;
pub mod transfer;
pub mod transport;

pub use config::MeshConfig;
pub use error::{MeshError, TransportError};
pub use mesh::{MeshManager, MeshNotification};
pub use message_log::{Message, MessageLog, SystemNotice};
pub use negotiator::{NegotiationState, Role};
pub use runtime::{spawn_mesh, MeshCommand};
pub use transport::{ChannelData, ChannelId, PeerTransport, TransportConnector, TransportEvent};
