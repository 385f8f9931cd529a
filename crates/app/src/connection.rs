use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use runner::{ExecutionResult, Pipeline};
use uuid::Uuid;

use crate::protocol::{self, RequestKind};

/// Per-connection driver: one inbound frame in, at most one result out,
/// strictly in order.
pub struct ConnectionHandler {
    id: Uuid,
    pipeline: Arc<Pipeline>,
}

impl ConnectionHandler {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            id: Uuid::new_v4(),
            pipeline,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns `None` for frames that expect no reply (`input_response`).
    pub async fn handle_frame(&self, payload: &str) -> Option<ExecutionResult> {
        let inbound = match protocol::decode_request(payload) {
            Ok(inbound) => inbound,
            Err(err) => {
                log::warn!("connection {}: invalid request: {err}", self.id);
                return Some(protocol::invalid_json_result());
            }
        };
        if inbound.kind == RequestKind::InputResponse {
            log::debug!("connection {}: ignoring input_response", self.id);
            return None;
        }

        // A panic inside the pipeline must become a result, not a dropped connection.
        let pipeline = Arc::clone(&self.pipeline);
        let request = inbound.request;
        match tokio::spawn(async move { pipeline.execute(request).await }).await {
            Ok(result) => Some(result),
            Err(err) => {
                log::error!("connection {}: execution task failed: {err}", self.id);
                Some(ExecutionResult::executor_error(err))
            }
        }
    }

    pub async fn handle_bytes(&self, payload: &[u8]) -> Option<ExecutionResult> {
        match std::str::from_utf8(payload) {
            Ok(text) => self.handle_frame(text).await,
            Err(_) => Some(protocol::invalid_json_result()),
        }
    }
}

pub async fn serve_websocket(mut socket: WebSocket, pipeline: Arc<Pipeline>) {
    let handler = ConnectionHandler::new(pipeline);
    log::info!("connection {} opened", handler.id());

    while let Some(frame) = socket.recv().await {
        let reply = match frame {
            Ok(Message::Text(text)) => handler.handle_frame(text.as_str()).await,
            Ok(Message::Binary(bytes)) => handler.handle_bytes(&bytes).await,
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_) | Message::Pong(_)) => continue,
            Err(err) => {
                log::warn!("connection {}: transport error: {err}", handler.id());
                break;
            }
        };
        let Some(result) = reply else {
            continue;
        };
        let payload = protocol::encode_result(&result);
        if let Err(err) = socket.send(Message::Text(payload.into())).await {
            log::warn!("connection {}: failed to send result: {err}", handler.id());
            break;
        }
    }

    log::info!("connection {} closed", handler.id());
}
