//! Maestro Dashboard - live pipeline status over WebSocket
//!
//! Every connection to `GET /ws` becomes an observer of the shared
//! [`PipelineState`]: it receives a `status_update` on connect, then every
//! broadcast event, and its text frames are handled as inbound commands.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};

use maestro_core::{ChannelObserver, PipelineState};

/// Default listen host.
pub const DEFAULT_HOST: &str = "localhost";

/// Default listen port.
pub const DEFAULT_PORT: u16 = 8765;

/// Routes: `GET /ws` and `GET /health`.
pub fn router(state: Arc<PipelineState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Serve the dashboard on an already-bound listener until the task is dropped.
pub async fn serve(listener: TcpListener, state: Arc<PipelineState>) -> std::io::Result<()> {
    let addr: SocketAddr = listener.local_addr()?;
    info!(addr = %addr, "Dashboard listening");
    axum::serve(listener, router(state)).await
}

/// Bind `host:port` and serve.
pub async fn bind_and_serve(
    host: &str,
    port: u16,
    state: Arc<PipelineState>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind((host, port)).await?;
    serve(listener, state).await
}

/// GET /health -- liveness plus a summary of the hub.
async fn health_handler(State(state): State<Arc<PipelineState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "task": state.task().await,
        "observers": state.broadcaster().observer_count().await,
        "version": maestro_core::VERSION,
    }))
}

/// WebSocket GET /ws -- status stream and command channel.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<PipelineState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<PipelineState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (observer, mut rx) = ChannelObserver::new();
    let id = state.register_observer(Arc::new(observer)).await;
    info!(observer = %id, "Dashboard client connected");

    // Dropping the receiver makes the next broadcast prune this observer.
    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if let Err(e) = state.handle_inbound(id, text.as_str()).await {
                    debug!(observer = %id, error = %e, "Inbound message rejected");
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    state.unregister_observer(id).await;
    writer.abort();
    info!(observer = %id, "Dashboard client disconnected");
}
