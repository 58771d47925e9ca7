//! In-process transport.
//!
//! Every participant gets a [`LoopbackConnector`] on a shared
//! [`LoopbackNetwork`]. Descriptions are synthetic; two endpoints are linked
//! once both sides created their own description and applied the other's,
//! after which sub-channels carry data directly between the two event
//! queues.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use meshchat_shared::{DescriptionKind, SessionDescription};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::TransportError;
use crate::transport::{
    ChannelData, ChannelId, PeerTransport, TransportConnector, TransportEvent,
};

/// Traffic counters of one sub-channel, kept after it closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub text_frames: usize,
    pub binary_frames: usize,
    pub bytes: usize,
    pub closed: bool,
}

#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    state: Arc<Mutex<NetworkState>>,
}

#[derive(Default)]
struct NetworkState {
    /// Keyed by (local, remote).
    endpoints: HashMap<(String, String), Endpoint>,
    channels: HashMap<ChannelId, ChannelEnds>,
    stats: HashMap<ChannelId, ChannelStats>,
    next_channel: u64,
    next_generation: u64,
}

struct Endpoint {
    generation: u64,
    events: mpsc::UnboundedSender<TransportEvent>,
    has_local: bool,
    has_remote: bool,
}

struct ChannelEnds {
    opener: String,
    acceptor: String,
}

impl ChannelEnds {
    fn other(&self, me: &str) -> Option<&str> {
        if self.opener == me {
            Some(&self.acceptor)
        } else if self.acceptor == me {
            Some(&self.opener)
        } else {
            None
        }
    }

    fn joins(&self, a: &str, b: &str) -> bool {
        self.other(a) == Some(b)
    }
}

impl NetworkState {
    fn key(local: &str, remote: &str) -> (String, String) {
        (local.to_string(), remote.to_string())
    }

    /// Deliver `event` to the endpoint `local` holds towards `remote`.
    fn emit(&self, local: &str, remote: &str, event: TransportEvent) {
        if let Some(endpoint) = self.endpoints.get(&Self::key(local, remote)) {
            let _ = endpoint.events.send(event);
        }
    }

    fn linked(&self, a: &str, b: &str) -> bool {
        let ready = |local: &str, remote: &str| {
            self.endpoints
                .get(&Self::key(local, remote))
                .is_some_and(|e| e.has_local && e.has_remote)
        };
        ready(a, b) && ready(b, a)
    }
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self, local: impl Into<String>) -> LoopbackConnector {
        LoopbackConnector {
            network: self.clone(),
            local: local.into(),
        }
    }

    pub fn channel_stats(&self, channel: ChannelId) -> Option<ChannelStats> {
        self.lock().stats.get(&channel).copied()
    }

    /// Fail a sub-channel on both ends.
    pub fn fail_channel(&self, channel: ChannelId, reason: &str) {
        let mut state = self.lock();
        let Some(ends) = state.channels.remove(&channel) else {
            return;
        };
        if let Some(stats) = state.stats.get_mut(&channel) {
            stats.closed = true;
        }
        for (local, remote) in [
            (&ends.opener, &ends.acceptor),
            (&ends.acceptor, &ends.opener),
        ] {
            state.emit(
                local,
                remote,
                TransportEvent::ChannelError {
                    peer: remote.clone(),
                    channel,
                    reason: reason.to_string(),
                },
            );
        }
    }

    /// Whether `local` currently holds an endpoint towards `remote`.
    pub fn has_endpoint(&self, local: &str, remote: &str) -> bool {
        self.lock()
            .endpoints
            .contains_key(&NetworkState::key(local, remote))
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct LoopbackConnector {
    network: LoopbackNetwork,
    local: String,
}

impl TransportConnector for LoopbackConnector {
    type Transport = LoopbackTransport;

    fn connect(
        &mut self,
        peer: &str,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<LoopbackTransport, TransportError> {
        let mut state = self.network.lock();
        state.next_generation += 1;
        let generation = state.next_generation;
        state.endpoints.insert(
            NetworkState::key(&self.local, peer),
            Endpoint {
                generation,
                events,
                has_local: false,
                has_remote: false,
            },
        );
        debug!(local = %self.local, peer = %peer, "Loopback endpoint created");

        Ok(LoopbackTransport {
            network: self.network.clone(),
            local: self.local.clone(),
            remote: peer.to_string(),
            generation,
        })
    }
}

pub struct LoopbackTransport {
    network: LoopbackNetwork,
    local: String,
    remote: String,
    generation: u64,
}

impl LoopbackTransport {
    fn endpoint<'a>(
        &self,
        state: &'a mut NetworkState,
    ) -> Result<&'a mut Endpoint, TransportError> {
        state
            .endpoints
            .get_mut(&NetworkState::key(&self.local, &self.remote))
            .filter(|e| e.generation == self.generation)
            .ok_or(TransportError::Closed)
    }

    fn describe(&mut self, kind: DescriptionKind) -> Result<(), TransportError> {
        let mut state = self.network.lock();
        let endpoint = self.endpoint(&mut state)?;
        if kind == DescriptionKind::Answer && !endpoint.has_remote {
            return Err(TransportError::InvalidState(
                "no remote offer applied".to_string(),
            ));
        }
        endpoint.has_local = true;
        let description = SessionDescription::new(
            kind,
            format!("loopback {} -> {}", self.local, self.remote),
        );
        state.emit(
            &self.local,
            &self.remote,
            TransportEvent::LocalDescriptionReady {
                peer: self.remote.clone(),
                description,
            },
        );
        Ok(())
    }
}

impl PeerTransport for LoopbackTransport {
    fn create_offer(&mut self) -> Result<(), TransportError> {
        self.describe(DescriptionKind::Offer)
    }

    fn create_answer(&mut self) -> Result<(), TransportError> {
        self.describe(DescriptionKind::Answer)
    }

    fn apply_remote_description(
        &mut self,
        _description: &SessionDescription,
    ) -> Result<(), TransportError> {
        let mut state = self.network.lock();
        self.endpoint(&mut state)?.has_remote = true;
        Ok(())
    }

    fn open_channel(&mut self, label: &str) -> Result<ChannelId, TransportError> {
        let mut state = self.network.lock();
        self.endpoint(&mut state)?;
        if !state.linked(&self.local, &self.remote) {
            return Err(TransportError::NotConnected);
        }

        state.next_channel += 1;
        let channel = ChannelId(state.next_channel);
        state.channels.insert(
            channel,
            ChannelEnds {
                opener: self.local.clone(),
                acceptor: self.remote.clone(),
            },
        );
        state.stats.insert(channel, ChannelStats::default());

        for (local, remote) in [(&self.local, &self.remote), (&self.remote, &self.local)] {
            state.emit(
                local,
                remote,
                TransportEvent::ChannelOpened {
                    peer: remote.clone(),
                    channel,
                    label: label.to_string(),
                },
            );
        }
        Ok(channel)
    }

    fn send(&mut self, channel: ChannelId, data: ChannelData) -> Result<(), TransportError> {
        let mut state = self.network.lock();
        let other = state
            .channels
            .get(&channel)
            .and_then(|ends| ends.other(&self.local))
            .map(str::to_string)
            .ok_or(TransportError::UnknownChannel(channel))?;

        if let Some(stats) = state.stats.get_mut(&channel) {
            match &data {
                ChannelData::Text(text) => {
                    stats.text_frames += 1;
                    stats.bytes += text.len();
                }
                ChannelData::Binary(bytes) => {
                    stats.binary_frames += 1;
                    stats.bytes += bytes.len();
                }
            }
        }

        state.emit(
            &other,
            &self.local,
            TransportEvent::ChannelMessage {
                peer: self.local.clone(),
                channel,
                data,
            },
        );
        Ok(())
    }

    fn close_channel(&mut self, channel: ChannelId) {
        let mut state = self.network.lock();
        if state.channels.remove(&channel).is_none() {
            return;
        }
        if let Some(stats) = state.stats.get_mut(&channel) {
            stats.closed = true;
        }
        for (local, remote) in [(&self.local, &self.remote), (&self.remote, &self.local)] {
            state.emit(
                local,
                remote,
                TransportEvent::ChannelClosed {
                    peer: remote.clone(),
                    channel,
                },
            );
        }
    }

    fn close(&mut self) {
        let mut state = self.network.lock();
        if self.endpoint(&mut state).is_err() {
            return;
        }
        let linked = state.linked(&self.local, &self.remote);

        let closing: Vec<ChannelId> = state
            .channels
            .iter()
            .filter(|(_, ends)| ends.joins(&self.local, &self.remote))
            .map(|(id, _)| *id)
            .collect();
        for channel in closing {
            state.channels.remove(&channel);
            if let Some(stats) = state.stats.get_mut(&channel) {
                stats.closed = true;
            }
            state.emit(
                &self.remote,
                &self.local,
                TransportEvent::ChannelClosed {
                    peer: self.local.clone(),
                    channel,
                },
            );
        }

        if linked {
            state.emit(
                &self.remote,
                &self.local,
                TransportEvent::Disconnected {
                    peer: self.local.clone(),
                    reason: "remote closed the session".to_string(),
                },
            );
        }
        state
            .endpoints
            .remove(&NetworkState::key(&self.local, &self.remote));
        debug!(local = %self.local, peer = %self.remote, "Loopback endpoint closed");
    }
}
