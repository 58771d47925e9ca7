use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::directory::{ConnectionHandle, Outbound};
use crate::error::RelayError;
use crate::relay::RelayCommand;

#[derive(Clone)]
pub struct AppState {
    pub relay: mpsc::Sender<RelayCommand>,
    pub config: Arc<RelayConfig>,
    pub open_connections: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(relay: mpsc::Sender<RelayCommand>, config: RelayConfig) -> Self {
        Self {
            relay,
            config: Arc::new(config),
            open_connections: Arc::new(AtomicUsize::new(0)),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(signal_socket))
        .route("/health", get(health_check))
        .route("/info", get(relay_info))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct RelayInfoResponse {
    name: String,
    version: &'static str,
    online: usize,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn relay_info(State(state): State<AppState>) -> Result<Json<RelayInfoResponse>, RelayError> {
    let (tx, rx) = oneshot::channel();
    state
        .relay
        .send(RelayCommand::Online(tx))
        .await
        .map_err(|_| RelayError::Unavailable)?;
    let online = rx.await.map_err(|_| RelayError::Unavailable)?;

    Ok(Json(RelayInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        online,
    }))
}

async fn signal_socket(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Result<Response, RelayError> {
    let max = state.config.max_connections;
    if max > 0 && state.open_connections.load(Ordering::Relaxed) >= max {
        return Err(RelayError::TooManyConnections(max));
    }

    Ok(ws
        .max_message_size(state.config.max_frame_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state)))
}

/// Pump one client connection: frames go to the relay task, replies come
/// back through the connection's outbound queue.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn = Uuid::new_v4();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();

    if state
        .relay
        .send(RelayCommand::Connected(ConnectionHandle::new(conn, out_tx)))
        .await
        .is_err()
    {
        return;
    }
    state.open_connections.fetch_add(1, Ordering::Relaxed);

    let (mut sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(out) = out_rx.recv().await {
            match out {
                Outbound::Frame(text) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut writer => break,
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if state.relay.send(RelayCommand::Frame { conn, text }).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Binary(_))) => {
                    debug!(conn = %conn, "Ignoring binary frame");
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(conn = %conn, error = %e, "WebSocket read error");
                    break;
                }
            }
        }
    }

    let _ = state.relay.send(RelayCommand::Closed(conn)).await;
    writer.abort();
    state.open_connections.fetch_sub(1, Ordering::Relaxed);
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting signaling server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
