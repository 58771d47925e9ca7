//! WebSocket connection to the relay.
//!
//! The socket is split into a writer task draining [`SignalRequest`]s and a
//! reader task turning relay replies into [`ServerEvent`]s. When the relay
//! goes away the event receiver yields `None`.

use futures::{SinkExt, StreamExt};
use meshchat_shared::{Reply, ServerEvent, SignalRequest};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use crate::error::MeshError;

pub struct SignalConnection {
    pub requests: mpsc::UnboundedSender<SignalRequest>,
    pub events: mpsc::UnboundedReceiver<ServerEvent>,
}

impl SignalConnection {
    pub async fn open(url: &str) -> Result<Self, MeshError> {
        let (ws, _) = connect_async(url).await?;
        debug!(%url, "Connected to relay");
        let (mut sink, mut stream) = ws.split();

        let (request_tx, mut request_rx) = mpsc::unbounded_channel::<SignalRequest>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<ServerEvent>();

        tokio::spawn(async move {
            while let Some(request) = request_rx.recv().await {
                let kind = request.kind();
                let text = match request.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(%kind, error = %e, "Failed to encode request");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    debug!(error = %e, "Relay write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        match Reply::parse(&text).and_then(Reply::into_event) {
                            Ok(event) => {
                                if event_tx.send(event).is_err() {
                                    break;
                                }
                            }
                            Err(e) => debug!(error = %e, "Dropping malformed relay frame"),
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(error = %e, "Relay read failed");
                        break;
                    }
                }
            }
            debug!("Relay connection closed");
        });

        Ok(Self {
            requests: request_tx,
            events: event_rx,
        })
    }
}
