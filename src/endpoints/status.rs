use axum::extract::State;
use axum::response::Json;
use serde::Serialize;
use serde_json::{json, Value};

use crate::gateway_util::AppState;

pub const QUOTA_GATEWAY_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub version: String,
    pub store_ready: bool,
}

/// A handler for a simple liveness check
pub async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Reports the crate version and whether the store client has initialized.
pub async fn status_handler(State(app_state): AppState) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok".to_string(),
        version: QUOTA_GATEWAY_VERSION.to_string(),
        store_ready: app_state.store.is_ready(),
    })
}
