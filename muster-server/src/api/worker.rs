//! Worker API Handlers
//!
//! Listing of connected workers and the WebSocket endpoint workers connect to.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Json,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use muster_core::domain::worker::Worker;
use muster_core::dto::protocol::{AgentMessage, ServerMessage};

use crate::api::AppState;
use crate::pipeline::{RemotePipeline, TransportError, WorkerSink, WorkerStream};

/// GET /workers
/// List connected workers in registration order
pub async fn list_workers(State(state): State<AppState>) -> Json<Vec<Worker>> {
    Json(state.pipeline.workers().await)
}

/// GET /agent
/// Upgrade to the worker protocol
pub async fn agent_socket(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let pipeline = state.pipeline.clone();
    ws.on_upgrade(move |socket| serve_agent(pipeline, socket))
}

async fn serve_agent(pipeline: Arc<RemotePipeline>, socket: WebSocket) {
    let (writer, reader) = socket.split();
    if let Err(e) = pipeline
        .accept(SocketSink { writer }, SocketStream { reader })
        .await
    {
        tracing::warn!("Worker connection refused: {}", e);
    }
}

struct SocketSink {
    writer: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl WorkerSink for SocketSink {
    async fn send(&mut self, message: ServerMessage) -> Result<(), TransportError> {
        let json = serde_json::to_string(&message)
            .map_err(|e| TransportError::Malformed(e.to_string()))?;
        self.writer
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| TransportError::Closed(e.to_string()))
    }
}

struct SocketStream {
    reader: SplitStream<WebSocket>,
}

#[async_trait]
impl WorkerStream for SocketStream {
    async fn recv(&mut self) -> Option<Result<AgentMessage, TransportError>> {
        loop {
            match self.reader.next().await? {
                Ok(Message::Text(text)) => {
                    return Some(
                        serde_json::from_str(text.as_str())
                            .map_err(|e| TransportError::Malformed(e.to_string())),
                    );
                }
                Ok(Message::Close(_)) => return None,
                // Pings are answered by axum itself.
                Ok(Message::Ping(_) | Message::Pong(_)) => {}
                Ok(Message::Binary(_)) => {
                    tracing::debug!("Ignoring binary frame from worker");
                }
                Err(e) => return Some(Err(TransportError::Closed(e.to_string()))),
            }
        }
    }
}
