//! Signaling relay.
//!
//! [`Relay`] holds the directory and the per-connection login state and
//! handles one envelope at a time. [`spawn_relay`] runs it as a single-owner
//! task fed by the WebSocket connection tasks, so handlers for different
//! connections interleave but never run concurrently.

use std::collections::HashMap;

use serde_json::value::RawValue;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use meshchat_shared::{ProtocolError, Reply, SignalKind, SignalRequest};

use crate::directory::{ConnectionHandle, ConnectionId, Directory};
use crate::error::RelayError;

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Commands sent *into* the relay task.
#[derive(Debug)]
pub enum RelayCommand {
    /// A WebSocket connection was accepted.
    Connected(ConnectionHandle),
    /// A text frame arrived on a connection.
    Frame { conn: ConnectionId, text: String },
    /// A connection closed, with or without an explicit logout.
    Closed(ConnectionId),
    /// Request the number of logged-in participants.
    Online(oneshot::Sender<usize>),
}

// ---------------------------------------------------------------------------
// Relay state
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Connection {
    handle: ConnectionHandle,
    /// `None` while unauthenticated.
    name: Option<String>,
}

#[derive(Debug, Default)]
pub struct Relay {
    directory: Directory,
    connections: HashMap<ConnectionId, Connection>,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&mut self, handle: ConnectionHandle) {
        debug!(conn = %handle.id(), "Connection opened");
        self.connections
            .insert(handle.id(), Connection { handle, name: None });
    }

    /// Connection-close path: logs out whatever name the connection held.
    pub fn disconnect(&mut self, conn: ConnectionId) {
        let Some(connection) = self.connections.remove(&conn) else {
            return;
        };
        debug!(conn = %conn, "Connection closed");

        if let Some(name) = connection.name {
            info!(conn = %conn, user = %name, "Connection dropped without logout");
            self.drop_participant(&name);
        }
    }

    pub fn online(&self) -> usize {
        self.directory.len()
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Handle one text frame from `conn`.
    pub fn handle_frame(&mut self, conn: ConnectionId, text: &str) {
        if !self.connections.contains_key(&conn) {
            debug!(conn = %conn, "Frame for unknown connection");
            return;
        }

        let request = match SignalRequest::parse(text) {
            Ok(request) => request,
            Err(ProtocolError::UnknownType(kind)) => {
                let reason = RelayError::UnknownAction(kind.clone()).to_string();
                self.reply(conn, &Reply::failure(kind, reason));
                return;
            }
            Err(e) => {
                debug!(conn = %conn, error = %e, "Dropping malformed envelope");
                return;
            }
        };

        debug!(conn = %conn, kind = %request.kind(), user = %request.name(), "Request");

        if request.kind().requires_login() && !self.is_bound_to(conn, request.name()) {
            let reason = RelayError::NotLoggedIn.to_string();
            self.reply(conn, &Reply::failure(request.kind().as_str(), reason));
            return;
        }

        match request {
            SignalRequest::Login { name } => self.login(conn, name),
            SignalRequest::Logout { name } => self.logout(conn, &name),
            SignalRequest::Offer {
                name,
                peername,
                offer,
            } => self.forward(SignalKind::Offer, name, &peername, offer),
            SignalRequest::Answer {
                name,
                peername,
                answer,
            } => self.forward(SignalKind::Answer, name, &peername, answer),
            SignalRequest::Candidate { name } => {
                debug!(user = %name, "Candidate envelope ignored");
            }
            SignalRequest::Users { .. } => {
                let names = self.directory.list_names(&[]);
                self.reply(conn, &Reply::users(names));
            }
        }
    }

    fn login(&mut self, conn: ConnectionId, name: String) {
        let Some(connection) = self.connections.get_mut(&conn) else {
            return;
        };

        let result = if name.is_empty() {
            Err(RelayError::EmptyName)
        } else if let Some(bound) = &connection.name {
            Err(RelayError::AlreadyLoggedIn(bound.clone()))
        } else {
            self.directory.register(&name, connection.handle.clone())
        };

        match result {
            Ok(()) => {
                info!(conn = %conn, user = %name, "User logged in");
                connection.name = Some(name);
                connection.handle.send(&Reply::success(SignalKind::Login));
            }
            Err(e) => {
                info!(conn = %conn, user = %name, reason = %e, "Login rejected");
                connection
                    .handle
                    .send(&Reply::failure(SignalKind::Login.as_str(), e.to_string()));
            }
        }
    }

    fn logout(&mut self, conn: ConnectionId, name: &str) {
        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.name = None;
        }
        info!(conn = %conn, user = %name, "User logged out");
        self.drop_participant(name);
    }

    /// Unregister `name` (closing its connection) and tell everybody else.
    fn drop_participant(&mut self, name: &str) {
        if self.directory.unregister(name).is_none() {
            return;
        }

        let notice = Reply::logout_notice(name);
        for handle in self.directory.handles(&[name]) {
            handle.send(&notice);
        }
    }

    fn forward(&self, kind: SignalKind, from: String, peername: &str, payload: Box<RawValue>) {
        let Some(target) = self.directory.lookup(peername) else {
            debug!(
                kind = %kind,
                from = %from,
                to = %peername,
                "Peer unreachable, dropping"
            );
            return;
        };

        let reply = match kind {
            SignalKind::Offer => Reply::forward_offer(from, payload),
            SignalKind::Answer => Reply::forward_answer(from, payload),
            other => {
                warn!(kind = %other, "Refusing to forward non-negotiation envelope");
                return;
            }
        };
        target.send(&reply);
    }

    fn is_bound_to(&self, conn: ConnectionId, name: &str) -> bool {
        self.connections
            .get(&conn)
            .and_then(|c| c.name.as_deref())
            .is_some_and(|bound| bound == name)
    }

    fn reply(&self, conn: ConnectionId, reply: &Reply) {
        if let Some(connection) = self.connections.get(&conn) {
            connection.handle.send(reply);
        }
    }
}

// ---------------------------------------------------------------------------
// Spawn
// ---------------------------------------------------------------------------

/// Spawn the relay as a background tokio task.
///
/// Returns the command sender used by connection tasks. The task ends once
/// every sender has been dropped.
pub fn spawn_relay() -> mpsc::Sender<RelayCommand> {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<RelayCommand>(1024);

    tokio::spawn(async move {
        let mut relay = Relay::new();

        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                RelayCommand::Connected(handle) => relay.connect(handle),
                RelayCommand::Frame { conn, text } => relay.handle_frame(conn, &text),
                RelayCommand::Closed(conn) => relay.disconnect(conn),
                RelayCommand::Online(reply) => {
                    let _ = reply.send(relay.online());
                }
            }
        }

        info!("Relay task terminated");
    });

    cmd_tx
}
