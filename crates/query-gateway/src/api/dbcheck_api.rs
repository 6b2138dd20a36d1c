//! Connectivity check for the private database.

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

use crate::error::GatewayError;
use crate::shared_state::{AppState, MISSING_DATABASE_URL};

const CHECK_BUDGET: Duration = Duration::from_secs(6);

pub async fn dbcheck(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let Some(executor) = state.executor.as_ref() else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "ok": false, "error": MISSING_DATABASE_URL })),
        );
    };

    let check = tokio::time::timeout(CHECK_BUDGET, executor.ping(CHECK_BUDGET)).await;
    match check {
        Ok(Ok(())) => (StatusCode::OK, Json(json!({ "ok": true, "result": 1 }))),
        Ok(Err(GatewayError::Database { code, message })) => {
            warn!("Database check failed: SQL#{}: {}", code, message);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "ok": false, "sql": code, "error": message })),
            )
        }
        Ok(Err(e)) if !e.is_timeout() => {
            warn!("Database check failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "ok": false, "error": e.to_string() })),
            )
        }
        _ => (
            StatusCode::GATEWAY_TIMEOUT,
            Json(json!({
                "ok": false,
                "error": "SQL connect timed out (6s). Check the database path, permissions and locks."
            })),
        ),
    }
}
