//! WebSocket chat channel
//!
//! Clients connect to `/ws/chat/{conversation_id}` and exchange JSON
//! frames. Incoming: `{message, user_id?, context?}`. Outgoing frames
//! are tagged: `connection`, `typing`, `message`, `error`.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use greenroom_core::{CancelFlag, ChatRequest};

use crate::routes::conversation::ChatReply;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WsIncoming {
    message: String,
    user_id: Option<String>,
    #[allow(dead_code)]
    context: Option<serde_json::Value>,
}

/// WebSocket upgrade handler - GET /ws/chat/{conversation_id}
pub async fn chat_socket(
    ws: WebSocketUpgrade,
    Path(conversation_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, conversation_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, conversation_id: String) {
    let (mut sender, mut receiver) = socket.split();
    tracing::debug!(conversation_id, "websocket client connected");

    let hello = serde_json::json!({
        "type": "connection",
        "conversationId": conversation_id,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    if sender
        .send(Message::Text(hello.to_string().into()))
        .await
        .is_err()
    {
        return;
    }

    let cancel = CancelFlag::new();
    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                let incoming: WsIncoming = match serde_json::from_str(&text) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        let error = serde_json::json!({
                            "type": "error",
                            "error": "validation_error",
                            "detail": format!("malformed frame: {e}"),
                        });
                        if sender.send(Message::Text(error.to_string().into())).await.is_err() {
                            break;
                        }
                        continue;
                    }
                };

                let typing = serde_json::json!({ "type": "typing" });
                if sender.send(Message::Text(typing.to_string().into())).await.is_err() {
                    break;
                }

                let request = ChatRequest {
                    conversation_id: Some(conversation_id.clone()),
                    user_id: incoming.user_id,
                    ..ChatRequest::message(incoming.message)
                };
                let outgoing = match state.orchestrator.chat(request, cancel.clone()).await {
                    Ok(response) => {
                        let reply = ChatReply::from(response);
                        serde_json::json!({
                            "type": "message",
                            "response": reply.response,
                            "conversationId": reply.conversation_id,
                            "messageId": reply.message_id,
                            "metadata": reply.metadata,
                        })
                    }
                    Err(e) => serde_json::json!({
                        "type": "error",
                        "error": e.kind(),
                        "detail": e.to_string(),
                    }),
                };
                if sender.send(Message::Text(outgoing.to_string().into())).await.is_err() {
                    break;
                }
            }
            Ok(Message::Ping(data)) => {
                if sender.send(Message::Pong(data)).await.is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    // The client is gone: cancel anything still in flight
    cancel.cancel();
    tracing::debug!(conversation_id, "websocket client disconnected");
}
