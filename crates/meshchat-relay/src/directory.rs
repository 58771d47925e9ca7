//! Participant directory.
//!
//! Maps each logged-in name to the connection that owns it. The directory is
//! owned by the relay task, so every register/unregister is serialized.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use meshchat_shared::Reply;

use crate::error::RelayError;

pub type ConnectionId = Uuid;

/// Instructions for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(String),
    Close,
}

/// Relay-side reference to one client connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a reply for this connection. Frames for a connection whose
    /// writer is gone are dropped.
    pub fn send(&self, reply: &Reply) {
        match reply.encode() {
            Ok(text) => {
                if self.tx.send(Outbound::Frame(text)).is_err() {
                    debug!(conn = %self.id, "Connection gone, dropping frame");
                }
            }
            Err(e) => warn!(conn = %self.id, error = %e, "Failed to encode reply"),
        }
    }

    /// Ask the writer to close the underlying socket.
    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }
}

#[derive(Debug, Default)]
pub struct Directory {
    entries: HashMap<String, ConnectionHandle>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to `handle`. Fails if the name is already bound.
    pub fn register(&mut self, name: &str, handle: ConnectionHandle) -> Result<(), RelayError> {
        if self.entries.contains_key(name) {
            return Err(RelayError::NameTaken(name.to_string()));
        }
        self.entries.insert(name.to_string(), handle);
        Ok(())
    }

    /// Remove the binding for `name` and close its connection. No-op if the
    /// name is not bound.
    pub fn unregister(&mut self, name: &str) -> Option<ConnectionHandle> {
        let handle = self.entries.remove(name)?;
        handle.close();
        Some(handle)
    }

    pub fn lookup(&self, name: &str) -> Option<&ConnectionHandle> {
        self.entries.get(name)
    }

    /// All bound names except those in `exclude`, sorted.
    pub fn list_names(&self, exclude: &[&str]) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .keys()
            .filter(|name| !exclude.contains(&name.as_str()))
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Handles of every bound connection except those in `exclude`.
    pub fn handles(&self, exclude: &[&str]) -> Vec<&ConnectionHandle> {
        self.entries
            .iter()
            .filter(|(name, _)| !exclude.contains(&name.as_str()))
            .map(|(_, handle)| handle)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (ConnectionHandle, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new(Uuid::new_v4(), tx), rx)
    }

    #[test]
    fn test_register_and_lookup() {
        let mut dir = Directory::new();
        let (h, _rx) = handle();
        let id = h.id();

        dir.register("alice", h).unwrap();
        assert_eq!(dir.lookup("alice").map(|h| h.id()), Some(id));
        assert!(dir.lookup("bob").is_none());
    }

    #[test]
    fn test_name_taken_keeps_holder() {
        let mut dir = Directory::new();
        let (first, _rx1) = handle();
        let (second, _rx2) = handle();
        let first_id = first.id();

        dir.register("alice", first).unwrap();
        let err = dir.register("alice", second).unwrap_err();
        assert!(matches!(err, RelayError::NameTaken(ref n) if n == "alice"));
        assert_eq!(dir.lookup("alice").map(|h| h.id()), Some(first_id));
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn test_unregister_closes_and_is_idempotent() {
        let mut dir = Directory::new();
        let (h, mut rx) = handle();
        dir.register("alice", h).unwrap();

        assert!(dir.unregister("alice").is_some());
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
        assert!(dir.unregister("alice").is_none());
        assert!(dir.is_empty());
    }

    #[test]
    fn test_list_names_excludes() {
        let mut dir = Directory::new();
        for name in ["carol", "alice", "bob"] {
            let (h, _rx) = handle();
            dir.register(name, h).unwrap();
        }

        assert_eq!(dir.list_names(&[]), vec!["alice", "bob", "carol"]);
        assert_eq!(dir.list_names(&["bob"]), vec!["alice", "carol"]);
        assert_eq!(dir.handles(&["alice"]).len(), 2);
    }
}
