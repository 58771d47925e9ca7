use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use meshchat_shared::constants::{FILE_CHANNEL_LABEL, MAX_FILE_SIZE};
use meshchat_shared::{ChatFrame, FileRequest, ServerEvent, SessionDescription, SignalRequest};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::MeshError;
use crate::message_log::{Message, MessageLog, SystemNotice};
use crate::negotiator::{NegotiationAction, NegotiationState, Negotiator, Role};
use crate::session::{FileChannel, OpenedChannel, PeerSession};
use crate::transfer::ChunkProducer;
use crate::transport::{ChannelData, ChannelId, PeerTransport, TransportConnector, TransportEvent};

/// What the mesh reports to its owner.
#[derive(Debug, Clone)]
pub enum MeshNotification {
    MessageLogged(Message),
    /// The text channel with `peer` is open.
    PeerJoined { peer: String },
    /// The session with `peer` was torn down.
    PeerLeft { peer: String },
    FileReceived {
        owner: String,
        filename: String,
        mime: Option<String>,
        data: Bytes,
    },
    TransferFailed {
        peer: String,
        filename: String,
        reason: String,
    },
}

/// Owns every peer session of one participant.
pub struct MeshManager<C: TransportConnector> {
    local: String,
    connector: C,
    sessions: HashMap<String, PeerSession<C::Transport>>,
    /// Peers whose link dropped before the relay reported their logout.
    departed: HashSet<String>,
    log: MessageLog,
    shared_files: HashMap<String, Bytes>,
    signal_tx: mpsc::UnboundedSender<SignalRequest>,
    transport_tx: mpsc::UnboundedSender<TransportEvent>,
    notify_tx: mpsc::UnboundedSender<MeshNotification>,
}

impl<C: TransportConnector> MeshManager<C> {
    pub fn new(
        local: impl Into<String>,
        connector: C,
        signal_tx: mpsc::UnboundedSender<SignalRequest>,
        transport_tx: mpsc::UnboundedSender<TransportEvent>,
        notify_tx: mpsc::UnboundedSender<MeshNotification>,
    ) -> Self {
        Self {
            local: local.into(),
            connector,
            sessions: HashMap::new(),
            departed: HashSet::new(),
            log: MessageLog::new(),
            shared_files: HashMap::new(),
            signal_tx,
            transport_tx,
            notify_tx,
        }
    }

    pub fn local_name(&self) -> &str {
        &self.local
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    /// Remote participants with a session, sorted.
    pub fn members(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn session_state(&self, peer: &str) -> Option<NegotiationState> {
        self.sessions.get(peer).map(|s| s.negotiator.state())
    }

    pub fn session_color(&self, peer: &str) -> Option<&str> {
        self.sessions.get(peer).map(|s| s.color())
    }

    /// Called once the relay accepted our login.
    pub fn start(&mut self) {
        self.notice(SystemNotice::Connected(self.local.clone()));
        self.signal(SignalRequest::Users {
            name: self.local.clone(),
        });
    }

    /// Log out from the relay and drop every session.
    pub fn logout(&mut self) {
        self.signal(SignalRequest::Logout {
            name: self.local.clone(),
        });
        self.shutdown();
    }

    pub fn shutdown(&mut self) {
        for peer in self.members() {
            self.teardown(&peer);
        }
    }

    /// Record a relay connection failure.
    pub fn relay_lost(&mut self) {
        self.notice(SystemNotice::FailedToConnect);
    }

    // -----------------------------------------------------------------------
    // Relay events
    // -----------------------------------------------------------------------

    pub fn handle_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Users(names) => self.connect_to(names),
            ServerEvent::PeerLoggedOut { name } => {
                let departed = self.departed.remove(&name);
                if departed || self.sessions.contains_key(&name) {
                    self.notice(SystemNotice::Logout(name.clone()));
                    self.teardown(&name);
                }
            }
            ServerEvent::Offer { from, description } => self.on_offer(from, description),
            ServerEvent::Answer { from, description } => self.on_answer(&from, description),
            ServerEvent::Rejected { kind, reason } => {
                warn!(%kind, %reason, "Relay rejected request");
            }
            ServerEvent::LoginAccepted | ServerEvent::LoginRejected { .. } => {
                debug!("Ignoring login reply outside handshake");
            }
            ServerEvent::Candidate { from } => {
                debug!(?from, "Ignoring candidate");
            }
        }
    }

    fn connect_to(&mut self, names: Vec<String>) {
        for name in names {
            if name == self.local || self.sessions.contains_key(&name) {
                continue;
            }
            if let Err(e) = self.start_initiator(&name) {
                warn!(peer = %name, error = %e, "Failed to start session");
            }
        }
    }

    fn start_initiator(&mut self, peer: &str) -> Result<(), MeshError> {
        let mut transport = self.connector.connect(peer, self.transport_tx.clone())?;
        if let Err(e) = transport.create_offer() {
            transport.close();
            return Err(e.into());
        }
        info!(peer = %peer, "Starting session as initiator");
        self.departed.remove(peer);
        self.sessions.insert(
            peer.to_string(),
            PeerSession::new(Negotiator::initiator(&self.local, peer), transport),
        );
        Ok(())
    }

    fn start_responder(
        &mut self,
        peer: String,
        offer: SessionDescription,
    ) -> Result<(), MeshError> {
        let mut negotiator = Negotiator::responder(&self.local, &peer);
        let NegotiationAction::AcceptOffer(offer) = negotiator.on_offer(offer) else {
            return Ok(());
        };

        let mut transport = self.connector.connect(&peer, self.transport_tx.clone())?;
        let accepted = transport
            .apply_remote_description(&offer)
            .and_then(|()| transport.create_answer());
        if let Err(e) = accepted {
            transport.close();
            return Err(e.into());
        }

        info!(peer = %peer, "Starting session as responder");
        self.departed.remove(&peer);
        self.sessions
            .insert(peer, PeerSession::new(negotiator, transport));
        Ok(())
    }

    fn on_offer(&mut self, from: String, offer: SessionDescription) {
        let existing = self
            .sessions
            .get(&from)
            .map(|s| (s.negotiator.role(), s.negotiator.state()));

        match existing {
            None => {}
            Some((Role::Initiator, NegotiationState::New | NegotiationState::OfferSent)) => {
                if self.local < from {
                    debug!(peer = %from, "Offer glare, keeping initiator role");
                    return;
                }
                debug!(peer = %from, "Offer glare, switching to responder");
                if let Some(mut session) = self.sessions.remove(&from) {
                    session.close();
                }
            }
            Some((_, state)) => {
                debug!(peer = %from, ?state, "Ignoring offer for active session");
                return;
            }
        }

        if let Err(e) = self.start_responder(from.clone(), offer) {
            warn!(peer = %from, error = %e, "Failed to answer offer");
        }
    }

    fn on_answer(&mut self, from: &str, answer: SessionDescription) {
        let Some(session) = self.sessions.get_mut(from) else {
            debug!(peer = %from, "Answer from unknown peer");
            return;
        };
        let NegotiationAction::ApplyAnswer(answer) = session.negotiator.on_answer(answer) else {
            return;
        };

        let opened = session
            .transport
            .apply_remote_description(&answer)
            .map_err(MeshError::from)
            .and_then(|()| session.request_text_channel().map_err(MeshError::from));

        match opened {
            Ok(channel) => {
                session.negotiator.mark_established();
                info!(peer = %from, channel = %channel, "Session established");
            }
            Err(e) => {
                warn!(peer = %from, error = %e, "Failed to apply answer");
                self.teardown(from);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Transport events
    // -----------------------------------------------------------------------

    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        if !self.sessions.contains_key(event.peer()) {
            debug!(peer = %event.peer(), "Transport event for unknown session");
            return;
        }

        match event {
            TransportEvent::LocalDescriptionReady { peer, description } => {
                self.on_local_description(&peer, description)
            }
            TransportEvent::ChannelOpened {
                peer,
                channel,
                label,
            } => self.on_channel_opened(&peer, channel, &label),
            TransportEvent::ChannelMessage {
                peer,
                channel,
                data,
            } => self.on_channel_message(&peer, channel, data),
            TransportEvent::ChannelClosed { peer, channel } => {
                self.on_channel_closed(&peer, channel)
            }
            TransportEvent::ChannelError {
                peer,
                channel,
                reason,
            } => self.on_channel_error(&peer, channel, &reason),
            TransportEvent::Disconnected { peer, reason } => {
                info!(peer = %peer, %reason, "Peer disconnected");
                self.link_lost(&peer);
            }
        }
    }

    fn on_local_description(&mut self, peer: &str, description: SessionDescription) {
        let Some(session) = self.sessions.get_mut(peer) else {
            return;
        };
        match session.negotiator.on_local_description(description) {
            Ok(NegotiationAction::Signal(request)) => self.signal(request),
            Ok(_) => {}
            Err(e) => {
                warn!(peer = %peer, error = %e, "Failed to encode description");
                self.teardown(peer);
            }
        }
    }

    fn on_channel_opened(&mut self, peer: &str, channel: ChannelId, label: &str) {
        let Some(session) = self.sessions.get_mut(peer) else {
            return;
        };

        match session.channel_opened(channel, label) {
            OpenedChannel::Text => {
                debug!(peer = %peer, channel = %channel, "Text channel open");
                self.notice(SystemNotice::Login(peer.to_string()));
                self.notify(MeshNotification::PeerJoined {
                    peer: peer.to_string(),
                });
            }
            OpenedChannel::Download(filename) => {
                let sent = FileRequest {
                    filename: filename.clone(),
                }
                .encode()
                .map_err(MeshError::from)
                .and_then(|request| {
                    session
                        .transport
                        .send(channel, ChannelData::Text(request))
                        .map_err(MeshError::from)
                });
                if let Err(e) = sent {
                    self.fail_download(peer, channel, &e.to_string());
                } else {
                    debug!(peer = %peer, %filename, "Requested file");
                }
            }
            OpenedChannel::AwaitingRequest => {
                debug!(peer = %peer, channel = %channel, "File channel opened by peer");
            }
            OpenedChannel::Ignored => {
                debug!(peer = %peer, %label, "Ignoring channel");
            }
        }
    }

    fn on_channel_message(&mut self, peer: &str, channel: ChannelId, data: ChannelData) {
        let Some(session) = self.sessions.get_mut(peer) else {
            return;
        };

        if session.is_text_channel(channel) {
            let ChannelData::Text(text) = data else {
                debug!(peer = %peer, "Ignoring binary frame on text channel");
                return;
            };
            match ChatFrame::decode(&text) {
                Ok(frame) => {
                    let message = Message::from_frame(frame, session.color());
                    self.append(message);
                }
                Err(e) => warn!(peer = %peer, error = %e, "Dropping malformed chat frame"),
            }
            return;
        }

        match (session.file_channel(channel), data) {
            (Some(FileChannel::AwaitingRequest), ChannelData::Text(text)) => {
                let request = match FileRequest::decode(&text) {
                    Ok(request) => request,
                    Err(e) => {
                        warn!(peer = %peer, error = %e, "Malformed file request");
                        session.remove_file_channel(channel);
                        session.transport.close_channel(channel);
                        return;
                    }
                };
                match self.shared_files.get(&request.filename) {
                    Some(data) => {
                        info!(
                            peer = %peer,
                            filename = %request.filename,
                            size = data.len(),
                            "Sending file"
                        );
                        let producer = ChunkProducer::new(request.filename, data.clone());
                        session.start_upload(channel, producer);
                    }
                    None => {
                        warn!(
                            peer = %peer,
                            filename = %request.filename,
                            "Requested file is not shared"
                        );
                        session.remove_file_channel(channel);
                        session.transport.close_channel(channel);
                    }
                }
            }
            (Some(FileChannel::Download(filename)), ChannelData::Binary(chunk)) => {
                let filename = filename.clone();
                if let Some(transfer) = session.download_mut(&filename) {
                    transfer.push_chunk(chunk);
                }
            }
            (Some(_), _) => {
                debug!(peer = %peer, channel = %channel, "Unexpected frame on file channel")
            }
            (None, _) => debug!(peer = %peer, channel = %channel, "Frame on unknown channel"),
        }
    }

    fn on_channel_closed(&mut self, peer: &str, channel: ChannelId) {
        let Some(session) = self.sessions.get_mut(peer) else {
            return;
        };

        if session.is_text_channel(channel) {
            info!(peer = %peer, "Text channel closed");
            self.link_lost(peer);
            return;
        }

        if let Some(transfer) = session.remove_file_channel(channel) {
            let filename = transfer.filename().to_string();
            let mime = transfer.mime().map(str::to_string);
            match transfer.finish() {
                Ok(data) => {
                    info!(peer = %peer, %filename, size = data.len(), "File received");
                    self.notify(MeshNotification::FileReceived {
                        owner: peer.to_string(),
                        filename,
                        mime,
                        data,
                    });
                }
                Err(e) => {
                    warn!(peer = %peer, %filename, error = %e, "Transfer failed");
                    self.notify(MeshNotification::TransferFailed {
                        peer: peer.to_string(),
                        filename,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    fn on_channel_error(&mut self, peer: &str, channel: ChannelId, reason: &str) {
        let Some(session) = self.sessions.get(peer) else {
            return;
        };

        if session.is_text_channel(channel) {
            warn!(peer = %peer, %reason, "Text channel error");
            self.link_lost(peer);
        } else {
            self.fail_download(peer, channel, reason);
        }
    }

    /// Abort whatever transfer runs on `channel`.
    fn fail_download(&mut self, peer: &str, channel: ChannelId, reason: &str) {
        let Some(session) = self.sessions.get_mut(peer) else {
            return;
        };
        let transfer = session.remove_file_channel(channel);
        session.transport.close_channel(channel);

        if let Some(transfer) = transfer {
            warn!(peer = %peer, filename = %transfer.filename(), %reason, "Transfer aborted");
            self.notify(MeshNotification::TransferFailed {
                peer: peer.to_string(),
                filename: transfer.filename().to_string(),
                reason: reason.to_string(),
            });
        }
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Send a chat message to every peer whose text channel is open.
    pub fn send_to_all(&mut self, text: impl Into<String>) -> Message {
        let message = Message::text(text, self.local.clone());
        self.append(message.clone());
        self.broadcast(&message);
        message
    }

    pub fn send_to(&mut self, peer: &str, text: impl Into<String>) -> Result<Message, MeshError> {
        if !self.sessions.contains_key(peer) {
            return Err(MeshError::UnknownPeer(peer.to_string()));
        }
        let message = Message::text(text, self.local.clone());
        self.append(message.clone());
        let frame = message.to_frame().encode()?;
        if let Some(session) = self.sessions.get_mut(peer) {
            send_text(session, frame);
        }
        Ok(message)
    }

    /// Make `data` available to peers under `filename` and announce it.
    pub fn share_file(
        &mut self,
        filename: impl Into<String>,
        mime: Option<String>,
        data: Bytes,
    ) -> Result<Message, MeshError> {
        if data.len() > MAX_FILE_SIZE {
            return Err(MeshError::FileTooLarge {
                size: data.len(),
                max: MAX_FILE_SIZE,
            });
        }
        let filename = filename.into();
        self.shared_files.insert(filename.clone(), data.clone());

        let message = Message::file(filename, self.local.clone(), mime, data);
        self.append(message.clone());
        self.broadcast(&message);
        Ok(message)
    }

    /// Fetch `filename` from `owner` over a dedicated file channel.
    pub fn request_file(&mut self, owner: &str, filename: &str) -> Result<ChannelId, MeshError> {
        let (declared_size, mime) = self
            .log
            .find_file(owner, filename)
            .map_or((None, None), |m| (m.size, m.mime.clone()));
        let session = self
            .sessions
            .get_mut(owner)
            .ok_or_else(|| MeshError::UnknownPeer(owner.to_string()))?;
        if !session.negotiator.is_established() {
            return Err(MeshError::NotEstablished(owner.to_string()));
        }
        if session.has_download(filename) {
            return Err(MeshError::TransferInProgress(filename.to_string()));
        }

        let channel = session.transport.open_channel(FILE_CHANNEL_LABEL)?;
        session.start_download(channel, filename, declared_size, mime);
        debug!(peer = %owner, %filename, channel = %channel, "Opening file channel");
        Ok(channel)
    }

    pub fn has_pending_chunks(&self) -> bool {
        self.sessions.values().any(|s| s.has_pending_chunks())
    }

    /// Send one chunk for every outbound transfer. Returns the number of
    /// transfers that made progress.
    pub fn pump_transfers(&mut self) -> usize {
        self.sessions
            .values_mut()
            .map(|s| s.pump_uploads().len())
            .sum()
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn broadcast(&mut self, message: &Message) {
        let frame = match message.to_frame().encode() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Failed to encode chat frame");
                return;
            }
        };
        for session in self.sessions.values_mut() {
            send_text(session, frame.clone());
        }
    }

    /// Close and forget the session with `peer`.
    pub fn teardown(&mut self, peer: &str) {
        let Some(mut session) = self.sessions.remove(peer) else {
            return;
        };
        for filename in session.close() {
            self.notify(MeshNotification::TransferFailed {
                peer: peer.to_string(),
                filename,
                reason: "session closed".to_string(),
            });
        }
        info!(peer = %peer, "Session closed");
        self.notify(MeshNotification::PeerLeft {
            peer: peer.to_string(),
        });
    }

    /// Tear down a session whose link dropped. The relay's logout for
    /// `peer` may still follow.
    fn link_lost(&mut self, peer: &str) {
        self.teardown(peer);
        self.departed.insert(peer.to_string());
    }

    fn append(&mut self, message: Message) {
        self.log.push(message.clone());
        self.notify(MeshNotification::MessageLogged(message));
    }

    fn notice(&mut self, notice: SystemNotice) {
        self.append(notice.into_message());
    }

    fn notify(&self, notification: MeshNotification) {
        let _ = self.notify_tx.send(notification);
    }

    fn signal(&self, request: SignalRequest) {
        if self.signal_tx.send(request).is_err() {
            debug!("Relay connection gone, dropping request");
        }
    }
}

fn send_text<T: PeerTransport>(session: &mut PeerSession<T>, frame: String) {
    let Some(channel) = session.open_text_channel() else {
        debug!(peer = %session.remote(), "Text channel not open, skipping");
        return;
    };
    if let Err(e) = session.transport.send(channel, ChannelData::Text(frame)) {
        warn!(peer = %session.remote(), error = %e, "Failed to send chat frame");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::{LoopbackConnector, LoopbackNetwork};
    use meshchat_shared::{FrameKind, Reply};

    /// One participant with its queues, pumped by hand.
    struct Client {
        mesh: MeshManager<LoopbackConnector>,
        signals: mpsc::UnboundedReceiver<SignalRequest>,
        transport: mpsc::UnboundedReceiver<TransportEvent>,
        notifications: mpsc::UnboundedReceiver<MeshNotification>,
    }

    impl Client {
        fn new(network: &LoopbackNetwork, name: &str) -> Self {
            let (signal_tx, signals) = mpsc::unbounded_channel();
            let (transport_tx, transport) = mpsc::unbounded_channel();
            let (notify_tx, notifications) = mpsc::unbounded_channel();
            Self {
                mesh: MeshManager::new(
                    name,
                    network.connector(name),
                    signal_tx,
                    transport_tx,
                    notify_tx,
                ),
                signals,
                transport,
                notifications,
            }
        }

        fn drain_notifications(&mut self) -> Vec<MeshNotification> {
            let mut out = Vec::new();
            while let Ok(n) = self.notifications.try_recv() {
                out.push(n);
            }
            out
        }
    }

    /// Stand-in relay: forwards offers and answers between clients, the
    /// way the relay turns them into replies.
    fn relay(from: &str, request: SignalRequest) -> Option<(String, ServerEvent)> {
        let (target, reply) = match request {
            SignalRequest::Offer { peername, offer, .. } => {
                (peername, Reply::forward_offer(from, offer))
            }
            SignalRequest::Answer {
                peername, answer, ..
            } => (peername, Reply::forward_answer(from, answer)),
            _ => return None,
        };
        let wire = reply.encode().unwrap();
        Some((target, Reply::parse(&wire).unwrap().into_event().unwrap()))
    }

    /// Deliver queued traffic until every queue is empty.
    fn settle(clients: &mut [&mut Client]) {
        loop {
            let mut progressed = false;
            for i in 0..clients.len() {
                while let Ok(event) = clients[i].transport.try_recv() {
                    clients[i].mesh.handle_transport_event(event);
                    progressed = true;
                }
                while let Ok(request) = clients[i].signals.try_recv() {
                    progressed = true;
                    let from = clients[i].mesh.local_name().to_string();
                    if let Some((target, event)) = relay(&from, request) {
                        let target = clients.iter_mut().find(|c| c.mesh.local_name() == target);
                        if let Some(c) = target {
                            c.mesh.handle_server_event(event);
                        }
                    }
                }
                if clients[i].mesh.has_pending_chunks() {
                    clients[i].mesh.pump_transfers();
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
    }

    fn connected_pair(network: &LoopbackNetwork) -> (Client, Client) {
        let mut alice = Client::new(network, "alice");
        let mut bob = Client::new(network, "bob");

        alice
            .mesh
            .handle_server_event(ServerEvent::Users(vec!["alice".into(), "bob".into()]));
        settle(&mut [&mut alice, &mut bob]);
        (alice, bob)
    }

    #[test]
    fn test_alice_and_bob_establish() {
        let network = LoopbackNetwork::new();
        let (mut alice, bob) = connected_pair(&network);

        assert_eq!(alice.mesh.session_state("bob"), Some(NegotiationState::Established));
        assert_eq!(bob.mesh.session_state("alice"), Some(NegotiationState::Established));
        assert_eq!(alice.mesh.members(), vec!["bob".to_string()]);

        let bob_log: Vec<&str> = bob
            .mesh
            .log()
            .messages()
            .iter()
            .map(|m| m.text.as_str())
            .collect();
        assert!(bob_log.contains(&"User 'alice' is logged in"));
        assert!(alice
            .drain_notifications()
            .iter()
            .any(|n| matches!(n, MeshNotification::PeerJoined { peer } if peer == "bob")));
    }

    #[test]
    fn test_users_skips_self_and_known_names() {
        let network = LoopbackNetwork::new();
        let (mut alice, _bob) = connected_pair(&network);

        alice
            .mesh
            .handle_server_event(ServerEvent::Users(vec!["alice".into(), "bob".into()]));
        assert_eq!(alice.mesh.session_state("bob"), Some(NegotiationState::Established));
        assert!(alice.transport.try_recv().is_err());
        assert!(alice.signals.try_recv().is_err());
    }

    #[test]
    fn test_text_exchange_uses_sender_color() {
        let network = LoopbackNetwork::new();
        let (mut alice, mut bob) = connected_pair(&network);

        alice.mesh.send_to_all("hello bob");
        settle(&mut [&mut alice, &mut bob]);

        let received = bob
            .mesh
            .log()
            .messages()
            .iter()
            .find(|m| m.text == "hello bob")
            .cloned()
            .unwrap();
        assert_eq!(received.author, "alice");
        assert_eq!(received.color, bob.mesh.session_color("alice").unwrap());
        assert!(alice.mesh.log().messages().iter().any(|m| m.text == "hello bob"));
    }

    #[test]
    fn test_send_to_unknown_peer() {
        let network = LoopbackNetwork::new();
        let mut alice = Client::new(&network, "alice");
        assert!(matches!(
            alice.mesh.send_to("carol", "hi"),
            Err(MeshError::UnknownPeer(_))
        ));
    }

    #[test]
    fn test_send_before_channel_open_skips_peer() {
        let network = LoopbackNetwork::new();
        let mut alice = Client::new(&network, "alice");
        alice
            .mesh
            .handle_server_event(ServerEvent::Users(vec!["bob".into()]));

        // Session exists, but nothing was negotiated yet.
        let message = alice.mesh.send_to_all("early");
        assert_eq!(message.text, "early");
        assert_eq!(alice.mesh.log().len(), 1);
    }

    #[test]
    fn test_file_transfer_50000_bytes() {
        let network = LoopbackNetwork::new();
        let (mut alice, mut bob) = connected_pair(&network);
        let data = Bytes::from((0..50_000u32).map(|i| (i % 256) as u8).collect::<Vec<u8>>());

        alice
            .mesh
            .share_file("movie.bin", Some("application/octet-stream".into()), data.clone())
            .unwrap();
        settle(&mut [&mut alice, &mut bob]);

        let announced = bob.mesh.log().find_file("alice", "movie.bin").unwrap();
        assert_eq!(announced.kind, FrameKind::File);
        assert_eq!(announced.size, Some(50_000));
        assert_eq!(announced.mime.as_deref(), Some("application/octet-stream"));
        assert!(announced.content.is_none());

        bob.drain_notifications();
        let channel = bob.mesh.request_file("alice", "movie.bin").unwrap();
        settle(&mut [&mut alice, &mut bob]);

        let stats = network.channel_stats(channel).unwrap();
        assert_eq!(stats.binary_frames, 4);
        assert!(stats.closed);

        let received: Vec<_> = bob
            .drain_notifications()
            .into_iter()
            .filter_map(|n| match n {
                MeshNotification::FileReceived {
                    owner,
                    filename,
                    mime,
                    data,
                } => Some((owner, filename, mime, data)),
                _ => None,
            })
            .collect();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0, "alice");
        assert_eq!(received[0].1, "movie.bin");
        assert_eq!(received[0].2.as_deref(), Some("application/octet-stream"));
        assert_eq!(received[0].3, data);
        assert!(!alice.mesh.has_pending_chunks());
    }

    #[test]
    fn test_request_unknown_file_closes_channel() {
        let network = LoopbackNetwork::new();
        let (mut alice, mut bob) = connected_pair(&network);
        bob.drain_notifications();

        let channel = bob.mesh.request_file("alice", "missing.txt").unwrap();
        settle(&mut [&mut alice, &mut bob]);

        let stats = network.channel_stats(channel).unwrap();
        assert_eq!(stats.binary_frames, 0);
        assert!(stats.closed);
        let notifications = bob.drain_notifications();
        assert!(notifications.iter().any(|n| matches!(
            n,
            MeshNotification::TransferFailed { filename, .. } if filename == "missing.txt"
        )));
        assert!(!notifications
            .iter()
            .any(|n| matches!(n, MeshNotification::FileReceived { .. })));
    }

    #[test]
    fn test_duplicate_request_rejected() {
        let network = LoopbackNetwork::new();
        let (_alice, mut bob) = connected_pair(&network);

        bob.mesh.request_file("alice", "a.txt").unwrap();
        assert!(matches!(
            bob.mesh.request_file("alice", "a.txt"),
            Err(MeshError::TransferInProgress(_))
        ));
    }

    #[test]
    fn test_share_file_too_large() {
        let network = LoopbackNetwork::new();
        let mut alice = Client::new(&network, "alice");
        let data = Bytes::from(vec![0u8; MAX_FILE_SIZE + 1]);
        assert!(matches!(
            alice.mesh.share_file("big.bin", None, data),
            Err(MeshError::FileTooLarge { .. })
        ));
    }

    #[test]
    fn test_channel_error_aborts_transfer() {
        let network = LoopbackNetwork::new();
        let (mut alice, mut bob) = connected_pair(&network);
        let data = Bytes::from(vec![7u8; 100_000]);
        alice.mesh.share_file("big.bin", None, data).unwrap();
        settle(&mut [&mut alice, &mut bob]);
        bob.drain_notifications();

        let channel = bob.mesh.request_file("alice", "big.bin").unwrap();
        // Open the channel and let alice start streaming, then break it.
        while let Ok(event) = bob.transport.try_recv() {
            bob.mesh.handle_transport_event(event);
        }
        while let Ok(event) = alice.transport.try_recv() {
            alice.mesh.handle_transport_event(event);
        }
        assert!(alice.mesh.has_pending_chunks());
        alice.mesh.pump_transfers();

        network.fail_channel(channel, "connection reset");
        settle(&mut [&mut alice, &mut bob]);

        assert!(!alice.mesh.has_pending_chunks());
        let notifications = bob.drain_notifications();
        let failures = notifications
            .iter()
            .filter(|n| matches!(n, MeshNotification::TransferFailed { .. }))
            .count();
        assert_eq!(failures, 1);
        assert!(!notifications
            .iter()
            .any(|n| matches!(n, MeshNotification::FileReceived { .. })));
        // The session survives a file channel failure.
        assert_eq!(bob.mesh.session_state("alice"), Some(NegotiationState::Established));
    }

    #[test]
    fn test_logout_tears_down_session() {
        let network = LoopbackNetwork::new();
        let (mut alice, mut bob) = connected_pair(&network);

        bob.mesh.handle_server_event(ServerEvent::PeerLoggedOut {
            name: "alice".into(),
        });

        assert_eq!(bob.mesh.session_state("alice"), None);
        assert!(bob.mesh.members().is_empty());
        let last = bob.mesh.log().messages().last().unwrap();
        assert_eq!(last.text, "User 'alice' is logged out");
        assert_eq!(last.color, "grey");
        assert!(!network.has_endpoint("bob", "alice"));

        // alice's side sees the link go away.
        settle(&mut [&mut alice, &mut bob]);
        assert_eq!(alice.mesh.session_state("bob"), None);
    }

    #[test]
    fn test_logout_notice_after_link_drop() {
        let network = LoopbackNetwork::new();
        let (mut alice, mut bob) = connected_pair(&network);

        // The link goes down before the relay tells bob about the logout.
        alice.mesh.logout();
        settle(&mut [&mut alice, &mut bob]);
        assert_eq!(bob.mesh.session_state("alice"), None);

        bob.mesh.handle_server_event(ServerEvent::PeerLoggedOut {
            name: "alice".into(),
        });
        let last = bob.mesh.log().messages().last().unwrap();
        assert_eq!(last.text, "User 'alice' is logged out");
        assert_eq!(last.color, "grey");

        // Only once.
        let before = bob.mesh.log().len();
        bob.mesh.handle_server_event(ServerEvent::PeerLoggedOut {
            name: "alice".into(),
        });
        assert_eq!(bob.mesh.log().len(), before);
    }

    #[test]
    fn test_logout_for_unknown_peer_is_silent() {
        let network = LoopbackNetwork::new();
        let mut bob = Client::new(&network, "bob");
        bob.mesh.handle_server_event(ServerEvent::PeerLoggedOut {
            name: "carol".into(),
        });
        assert!(bob.mesh.log().is_empty());
    }

    #[test]
    fn test_stale_answer_ignored() {
        let network = LoopbackNetwork::new();
        let (mut alice, _bob) = connected_pair(&network);

        let answer = SessionDescription::new(meshchat_shared::DescriptionKind::Answer, "late");
        alice.mesh.handle_server_event(ServerEvent::Answer {
            from: "bob".into(),
            description: answer,
        });
        assert_eq!(alice.mesh.session_state("bob"), Some(NegotiationState::Established));
        assert!(alice.transport.try_recv().is_err());
    }

    #[test]
    fn test_offer_glare_resolves_to_one_session() {
        let network = LoopbackNetwork::new();
        let mut alice = Client::new(&network, "alice");
        let mut bob = Client::new(&network, "bob");

        // Both learn about each other at the same time.
        alice
            .mesh
            .handle_server_event(ServerEvent::Users(vec!["bob".into()]));
        bob.mesh
            .handle_server_event(ServerEvent::Users(vec!["alice".into()]));
        settle(&mut [&mut alice, &mut bob]);

        assert_eq!(alice.mesh.session_state("bob"), Some(NegotiationState::Established));
        assert_eq!(bob.mesh.session_state("alice"), Some(NegotiationState::Established));

        alice.mesh.send_to("bob", "still here").unwrap();
        settle(&mut [&mut alice, &mut bob]);
        assert!(bob.mesh.log().messages().iter().any(|m| m.text == "still here"));
    }

    #[test]
    fn test_start_logs_connected_and_requests_users() {
        let network = LoopbackNetwork::new();
        let mut alice = Client::new(&network, "alice");
        alice.mesh.start();

        assert_eq!(
            alice.mesh.log().messages()[0].text,
            "You are connected as 'alice'"
        );
        assert!(matches!(
            alice.signals.try_recv().unwrap(),
            SignalRequest::Users { name } if name == "alice"
        ));
    }

    #[test]
    fn test_logout_sends_envelope_and_closes_sessions() {
        let network = LoopbackNetwork::new();
        let (mut alice, _bob) = connected_pair(&network);

        alice.mesh.logout();
        assert!(matches!(
            alice.signals.try_recv().unwrap(),
            SignalRequest::Logout { name } if name == "alice"
        ));
        assert!(alice.mesh.members().is_empty());
    }
}
