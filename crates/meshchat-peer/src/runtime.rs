//! Mesh event loop with a tokio mpsc command/notification pattern.
//!
//! One task owns the [`MeshManager`]. Relay events, transport events, user
//! commands and outbound file chunks are multiplexed with `select!`; chunks
//! go out one per transfer per turn, yielding in between.

use std::time::Duration;

use bytes::Bytes;
use meshchat_shared::{ServerEvent, SignalRequest};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::MeshConfig;
use crate::error::MeshError;
use crate::mesh::{MeshManager, MeshNotification};
use crate::message_log::Message;
use crate::signal_client::SignalConnection;
use crate::transport::{TransportConnector, TransportEvent};

// ---------------------------------------------------------------------------
// Command types
// ---------------------------------------------------------------------------

/// Commands sent *into* the mesh task.
#[derive(Debug)]
pub enum MeshCommand {
    /// Send a chat message to every connected peer.
    SendText(String),
    /// Send a chat message to one peer.
    SendTo { peer: String, text: String },
    /// Share a file and announce it to every peer.
    ShareFile {
        filename: String,
        mime: Option<String>,
        data: Bytes,
    },
    /// Download a file announced by `owner`.
    RequestFile { owner: String, filename: String },
    /// Snapshot of the message log.
    GetMessages(oneshot::Sender<Vec<Message>>),
    /// Names of the peers with a session.
    GetMembers(oneshot::Sender<Vec<String>>),
    /// Log out from the relay and close every session.
    Logout,
    /// Close every session without logging out.
    Shutdown,
}

/// Connect to the relay, log in and spawn the mesh task.
///
/// Returns `(command_tx, notification_rx)`.
pub async fn spawn_mesh<C>(
    config: MeshConfig,
    connector: C,
) -> Result<
    (
        mpsc::Sender<MeshCommand>,
        mpsc::UnboundedReceiver<MeshNotification>,
    ),
    MeshError,
>
where
    C: TransportConnector + 'static,
    C::Transport: 'static,
{
    let SignalConnection {
        requests,
        mut events,
    } = SignalConnection::open(&config.relay_url).await?;

    login(&config.name, &requests, &mut events, config.login_timeout).await?;
    info!(name = %config.name, url = %config.relay_url, "Logged in");

    Ok(spawn_session(config.name, connector, requests, events))
}

/// Send `login` and wait for the relay's verdict.
pub async fn login(
    name: &str,
    requests: &mpsc::UnboundedSender<SignalRequest>,
    events: &mut mpsc::UnboundedReceiver<ServerEvent>,
    wait: Duration,
) -> Result<(), MeshError> {
    requests
        .send(SignalRequest::Login {
            name: name.to_string(),
        })
        .map_err(|_| MeshError::RelayClosed)?;

    let verdict = tokio::time::timeout(wait, async {
        while let Some(event) = events.recv().await {
            match event {
                ServerEvent::LoginAccepted => return Ok(()),
                ServerEvent::LoginRejected { reason } => {
                    return Err(MeshError::LoginRejected(reason))
                }
                other => debug!(?other, "Ignoring relay event before login"),
            }
        }
        Err(MeshError::RelayClosed)
    })
    .await;

    verdict.map_err(|_| MeshError::LoginTimeout)?
}

/// Spawn the mesh task for an already logged-in participant.
pub fn spawn_session<C>(
    name: String,
    connector: C,
    requests: mpsc::UnboundedSender<SignalRequest>,
    events: mpsc::UnboundedReceiver<ServerEvent>,
) -> (
    mpsc::Sender<MeshCommand>,
    mpsc::UnboundedReceiver<MeshNotification>,
)
where
    C: TransportConnector + 'static,
    C::Transport: 'static,
{
    let (cmd_tx, cmd_rx) = mpsc::channel::<MeshCommand>(256);
    let (notif_tx, notif_rx) = mpsc::unbounded_channel::<MeshNotification>();
    let (transport_tx, transport_rx) = mpsc::unbounded_channel::<TransportEvent>();

    let mut mesh = MeshManager::new(name, connector, requests, transport_tx, notif_tx);
    mesh.start();

    tokio::spawn(run(mesh, cmd_rx, events, transport_rx));

    (cmd_tx, notif_rx)
}

async fn run<C: TransportConnector>(
    mut mesh: MeshManager<C>,
    mut cmd_rx: mpsc::Receiver<MeshCommand>,
    mut events: mpsc::UnboundedReceiver<ServerEvent>,
    mut transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
) {
    let mut relay_open = true;

    loop {
        tokio::select! {
            // --- Commands ---
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(MeshCommand::Logout) => {
                        info!(name = %mesh.local_name(), "Logging out");
                        mesh.logout();
                        break;
                    }
                    Some(MeshCommand::Shutdown) => {
                        info!("Mesh shutdown requested");
                        mesh.shutdown();
                        break;
                    }
                    Some(cmd) => handle_command(&mut mesh, cmd),
                    None => {
                        info!("Command channel closed, shutting down mesh");
                        mesh.shutdown();
                        break;
                    }
                }
            }

            // --- Relay events ---
            event = events.recv(), if relay_open => {
                match event {
                    Some(event) => mesh.handle_server_event(event),
                    None => {
                        warn!("Lost connection to relay");
                        relay_open = false;
                        mesh.relay_lost();
                    }
                }
            }

            // --- Transport events ---
            Some(event) = transport_rx.recv() => {
                mesh.handle_transport_event(event);
            }

            // --- Outbound chunks ---
            _ = std::future::ready(()), if mesh.has_pending_chunks() => {
                mesh.pump_transfers();
                tokio::task::yield_now().await;
            }
        }
    }
}

fn handle_command<C: TransportConnector>(mesh: &mut MeshManager<C>, cmd: MeshCommand) {
    match cmd {
        MeshCommand::SendText(text) => {
            mesh.send_to_all(text);
        }
        MeshCommand::SendTo { peer, text } => {
            if let Err(e) = mesh.send_to(&peer, text) {
                warn!(peer = %peer, error = %e, "Send failed");
            }
        }
        MeshCommand::ShareFile {
            filename,
            mime,
            data,
        } => {
            if let Err(e) = mesh.share_file(filename, mime, data) {
                warn!(error = %e, "Share failed");
            }
        }
        MeshCommand::RequestFile { owner, filename } => {
            if let Err(e) = mesh.request_file(&owner, &filename) {
                warn!(peer = %owner, %filename, error = %e, "File request failed");
            }
        }
        MeshCommand::GetMessages(reply) => {
            let _ = reply.send(mesh.log().messages().to_vec());
        }
        MeshCommand::GetMembers(reply) => {
            let _ = reply.send(mesh.members());
        }
        MeshCommand::Logout | MeshCommand::Shutdown => {}
    }
}
