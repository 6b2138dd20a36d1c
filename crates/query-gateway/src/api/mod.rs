//! HTTP handlers.

pub mod conversation_api;
pub mod dbcheck_api;
pub mod orchestrate_api;

pub use conversation_api::{get_conversation_messages, get_conversations};
pub use dbcheck_api::dbcheck;
pub use orchestrate_api::{orchestrate, OrchestrateRequest, OrchestrateResponse};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{error, warn};

use crate::error::GatewayError;
use crate::shared_state::AppState;

pub async fn ping() -> impl IntoResponse {
    Json(json!({ "ok": true, "msg": "pong" }))
}

/// Liveness of the process and its history store.
pub async fn healthz(State(state): State<AppState>) -> (StatusCode, &'static str) {
    let store = state.history.conversations.clone();
    match blocking(move || store.ping()).await {
        Ok(()) => (StatusCode::OK, "OK"),
        Err(e) => {
            warn!("History store unreachable: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "history store unavailable")
        }
    }
}

/// Runs a history store call on the blocking pool.
pub(crate) async fn blocking<T, F>(work: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| anyhow::anyhow!("history task failed: {}", e))?
}

/// 500 carrying the vendor code when a history store call fails.
pub(crate) fn persistence_error(err: anyhow::Error) -> Response {
    let detail = match err.downcast_ref::<rusqlite::Error>() {
        Some(sqlite) => GatewayError::from(sqlite).to_string(),
        None => format!("SQL#-1: {}", err),
    };
    error!("History store failure: {}", detail);
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "ok": false, "error": detail }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::Value;

    async fn error_body(response: Response) -> (StatusCode, String) {
        let status = response.status();
        let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["ok"], false);
        (status, body["error"].as_str().unwrap().to_string())
    }

    #[tokio::test]
    async fn test_sqlite_failure_keeps_vendor_code() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let failure = conn.execute("INSERT INTO nowhere VALUES (1)", []).unwrap_err();

        let (status, detail) = error_body(persistence_error(anyhow::Error::from(failure))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(detail.starts_with("SQL#1: "), "{}", detail);
        assert!(detail.contains("nowhere"));
    }

    #[tokio::test]
    async fn test_other_failures_use_placeholder_code() {
        let (status, detail) =
            error_body(persistence_error(anyhow::anyhow!("Failed to get connection from pool"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(detail, "SQL#-1: Failed to get connection from pool");
    }

    #[tokio::test]
    async fn test_blocking_surfaces_store_errors() {
        let result: anyhow::Result<()> = blocking(|| Err(anyhow::anyhow!("disk full"))).await;
        assert_eq!(result.unwrap_err().to_string(), "disk full");
    }
}
