//! Read-only views over persisted conversations.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{blocking, persistence_error};
use crate::history_db::{Conversation, StoredMessage};
use crate::shared_state::AppState;

const DEFAULT_LIST_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ConversationsResponse {
    pub conversations: Vec<Conversation>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMessagesResponse {
    pub conversation: Conversation,
    pub messages: Vec<StoredMessage>,
}

/// Most recently updated conversations first.
pub async fn get_conversations(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ConversationsResponse>, Response> {
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, 500);
    let store = state.history.conversations.clone();
    let conversations = blocking(move || store.list_conversations(limit))
        .await
        .map_err(persistence_error)?;
    Ok(Json(ConversationsResponse { conversations }))
}

pub async fn get_conversation_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationMessagesResponse>, Response> {
    let store = state.history.conversations.clone();
    let lookup_id = id.clone();
    let found = blocking(move || {
        let Some(conversation) = store.get_conversation(&lookup_id)? else {
            return Ok(None);
        };
        let messages = store.list_messages(&lookup_id)?;
        Ok(Some((conversation, messages)))
    })
    .await
    .map_err(persistence_error)?;
    let (conversation, messages) = match found {
        Some(c) => c,
        None => {
            return Err((
                StatusCode::NOT_FOUND,
                Json(json!({ "ok": false, "error": format!("Conversation {} not found", id) })),
            )
                .into_response())
        }
    };
    Ok(Json(ConversationMessagesResponse { conversation, messages }))
}
