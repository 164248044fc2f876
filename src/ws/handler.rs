use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::State;
use axum::{response::IntoResponse, routing::get, Router};

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use crate::controller::{InteractionController, InteractionState};
use crate::inference::InferenceService;
use crate::model::{GenerationParams, RawGenerationParams};

// ------------------------------------------------------------
// TYPES
// ------------------------------------------------------------
#[derive(Clone)]
pub struct AppState {
    pub infer: Arc<InferenceService>,
    pub model_name: String,
}

#[derive(Deserialize, Debug)]
pub struct ClientMsg {
    #[serde(rename = "type")]
    pub msg_type: MsgType,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub max_length: Option<f64>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MsgType {
    Ask,
}

impl ClientMsg {
    fn params(&self) -> GenerationParams {
        RawGenerationParams {
            max_length: self.max_length,
            temperature: self.temperature,
            top_p: self.top_p,
        }
        .into()
    }
}

// ------------------------------------------------------------
// ROUTER
// ------------------------------------------------------------
pub fn ws_router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_handler))
}

async fn ws_handler(
    ws: axum::extract::WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

// ------------------------------------------------------------
// WEBSOCKET HANDLER (SPLIT SOCKET)
// ------------------------------------------------------------
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<WsMessage>(32);

    // Dedicated writer task keeps websocket flushing while a generation runs.
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match timeout(Duration::from_secs(5), ws_sender.send(msg)).await {
                Ok(Ok(_)) => {}
                Ok(Err(_)) => break,
                Err(_) => continue,
            }
        }
    });

    let mut controller = InteractionController::new(state.infer.clone());
    info!("ws session opened");

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            WsMessage::Text(raw) => {
                let parsed: ClientMsg = match serde_json::from_str(raw.as_str()) {
                    Ok(v) => v,
                    Err(err) => {
                        debug!("rejecting ws frame: {err}");
                        if send_json(&tx, json_error("Invalid JSON")).await.is_err() {
                            break;
                        }
                        continue;
                    }
                };

                match parsed.msg_type {
                    MsgType::Ask => {
                        let params = parsed.params();
                        let events = tx.clone();
                        let outcome = controller
                            .submit(&parsed.question, params, move |s| {
                                // busy indicator; dropped frames are harmless
                                let _ = events.try_send(state_frame(s));
                            })
                            .await;

                        let payload = match serde_json::to_value(&outcome) {
                            Ok(v) => v,
                            Err(err) => json_error(&format!("failed to encode outcome: {err}")),
                        };
                        if send_json(&tx, payload).await.is_err() {
                            warn!("ws channel closed before the answer was delivered");
                            break;
                        }
                    }
                }
            }
            WsMessage::Ping(payload) => {
                let _ = tx.send(WsMessage::Pong(payload)).await;
            }
            WsMessage::Close(_) => break,
            _ => {}
        };
    }

    info!(last_state = controller.state().name(), "ws session closed");

    // Drop sender to stop writer task
    drop(tx);
    let _ = writer.await;
}

// ------------------------------------------------------------
// SEND JSON WRAPPER
// ------------------------------------------------------------
async fn send_json(sender: &mpsc::Sender<WsMessage>, value: serde_json::Value) -> anyhow::Result<()> {
    let msg = WsMessage::Text(value.to_string().into());

    match timeout(Duration::from_secs(2), sender.send(msg)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(_)) => Err(anyhow::anyhow!("ws channel closed")),
        Err(_) => Ok(()),
    }
}

fn state_frame(state: &InteractionState) -> WsMessage {
    let value = serde_json::json!({
        "type": "state",
        "state": state.name(),
    });
    WsMessage::Text(value.to_string().into())
}

fn json_error(msg: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "error",
        "message": msg
    })
}
