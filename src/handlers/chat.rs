use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use tracing::debug;

use crate::chat::{ChatMessage, ChatResponse};
use crate::errors::ApiError;
use crate::throttle::extract_client_ip;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(rename = "sessionId", default)]
    pub session_id: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

/// POST /api/v1/chat
pub async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if request.messages.is_empty() {
        return Err(ApiError::BadRequest(
            "messages must contain at least one entry".to_string(),
        ));
    }

    let client_ip = extract_client_ip(&headers);
    debug!(
        session = %request.session_id,
        client_ip = %client_ip,
        messages = request.messages.len(),
        "chat request received"
    );

    let response = state
        .chat
        .handle(&request.session_id, &client_ip, &request.messages)
        .await?;
    Ok(Json(response))
}
