//! Single-turn orchestration endpoint.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::{blocking, persistence_error};
use crate::shared_state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrateRequest {
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub input: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrateResponse {
    pub ok: bool,
    pub conversation_id: String,
    pub output: String,
}

/// Resolve the conversation, answer the input and persist both sides of the
/// exchange. Orchestration failures come back as text inside a 200.
pub async fn orchestrate(
    State(state): State<AppState>,
    Json(req): Json<OrchestrateRequest>,
) -> Result<Json<OrchestrateResponse>, Response> {
    let input = req.input.trim();
    if input.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "ok": false, "error": "input must not be empty" })),
        )
            .into_response());
    }

    let store = state.history.conversations.clone();
    let requested = req.conversation_id.clone();
    let conversation = blocking({
        let store = store.clone();
        move || store.get_or_create(requested.as_deref())
    })
    .await
    .map_err(persistence_error)?;
    info!("Orchestrating turn for conversation {}", conversation.id);

    let output = state
        .orchestrator
        .handle(input, &conversation.id, state.shutdown.child_token())
        .await;

    let (id, question, answer) = (conversation.id.clone(), input.to_string(), output.clone());
    blocking(move || {
        store
            .add_messages(&id, &[("user", question.as_str()), ("assistant", answer.as_str())])
            .map(|_| ())
    })
    .await
    .map_err(persistence_error)?;

    Ok(Json(OrchestrateResponse {
        ok: true,
        conversation_id: conversation.id,
        output,
    }))
}
