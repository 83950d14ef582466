//! Conversation routes
//!
//! POST /conversation/chat        - one-shot chat
//! POST /conversation/chat/stream - SSE stream (`data: {chunk}` frames,
//!                                  one terminal `data: {done, metadata}`)
//! GET  /conversation/{id}        - transcript
//! DELETE /conversation/{id}      - clear session

use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use axum::Json;
use serde::Serialize;

use greenroom_core::{CancelFlag, ChatEvent, ChatRequest, ChatResponse, CoreError};

use crate::http_error::{ApiError, ApiResult};
use crate::state::AppState;

/// Wire shape of a chat reply (metadata flattened per the public API)
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub response: String,
    pub conversation_id: String,
    pub message_id: String,
    pub model_used: String,
    pub tokens_used: u32,
    pub response_time_ms: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub memories_used: Vec<String>,
    pub metadata: serde_json::Value,
}

impl From<ChatResponse> for ChatReply {
    fn from(r: ChatResponse) -> Self {
        let memories_used = r.metadata.memories_used.clone();
        let degraded = !r.metadata.degraded.is_empty();
        let mut metadata = serde_json::to_value(&r.metadata).unwrap_or_default();
        if let Some(object) = metadata.as_object_mut() {
            object.insert("degraded".into(), serde_json::json!(r.metadata.degraded));
            object.insert("isDegraded".into(), serde_json::json!(degraded));
        }
        Self {
            response: r.response,
            conversation_id: r.conversation_id,
            message_id: r.message_id,
            model_used: r.model_used,
            tokens_used: r.tokens_used,
            response_time_ms: r.response_time_ms,
            memories_used,
            metadata,
        }
    }
}

pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Json<ChatReply>> {
    let response = tokio::time::timeout(
        state.config.request_timeout,
        state.orchestrator.chat(request, CancelFlag::new()),
    )
    .await
    .map_err(|_| ApiError(CoreError::timeout("request", state.config.request_timeout)))??;
    Ok(Json(response.into()))
}

pub async fn chat_stream(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Sse<impl futures::Stream<Item = Result<Event, std::convert::Infallible>>> {
    let rx = state.orchestrator.chat_stream(request, CancelFlag::new());

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        let frame = match event {
            ChatEvent::Chunk(chunk) => serde_json::json!({ "chunk": chunk }),
            ChatEvent::Done(response) => {
                let reply = ChatReply::from(*response);
                serde_json::json!({
                    "done": true,
                    "conversationId": reply.conversation_id,
                    "messageId": reply.message_id,
                    "modelUsed": reply.model_used,
                    "tokensUsed": reply.tokens_used,
                    "responseTimeMs": reply.response_time_ms,
                    "metadata": reply.metadata,
                })
            }
            ChatEvent::Error(detail) => serde_json::json!({ "error": detail }),
        };
        Some((
            Ok(Event::default().data(frame.to_string())),
            rx,
        ))
    });

    Sse::new(stream)
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    if !state.sessions.contains(&id) {
        return Err(ApiError(CoreError::NotFound(format!("conversation {id}"))));
    }
    let messages = state.sessions.get(&id, None);
    let count = messages.len();
    Ok(Json(serde_json::json!({
        "conversationId": id,
        "messages": messages,
        "messageCount": count,
    })))
}

pub async fn delete_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    if !state.sessions.clear(&id) {
        return Err(ApiError(CoreError::NotFound(format!("conversation {id}"))));
    }
    Ok(Json(serde_json::json!({
        "status": "ok",
        "message": format!("conversation {id} cleared"),
    })))
}
