pub mod admin;
pub mod completions;
pub mod models;
pub mod status;

use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use metrics::counter;
use serde::Serialize;

use crate::classifier::{classify, RequestKind};
use crate::error::Error;
use crate::gateway_util::AppStateData;
use crate::proxy;

/// The JSON envelope shared by every terminal response the gateway emits.
#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub code: &'static str,
    pub message: String,
    pub success: bool,
    pub data: Option<serde_json::Value>,
}

impl ApiResponse {
    pub fn success(
        code: &'static str,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            success: true,
            data,
        }
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Fallback entrypoint: the classifier is suffix-based, so dispatch happens
/// here rather than in fixed route segments.
pub async fn entrypoint_handler(State(state): State<AppStateData>, req: Request) -> Response {
    let kind = classify(req.uri().path(), &state.config.admin_path);
    let endpoint = match kind {
        RequestKind::Completion => "completion",
        RequestKind::Admin(_) => "admin",
        RequestKind::Catalogue => "models",
        RequestKind::PassThrough => "pass_through",
    };
    counter!("request_count", "endpoint" => endpoint).increment(1);

    let is_get = req.method() == Method::GET;
    let result = match kind {
        RequestKind::Completion => completions::handle(&state, req).await,
        RequestKind::Admin(op) => admin::handle(&state, op, req).await,
        RequestKind::Catalogue if is_get => models::handle(&state).await,
        RequestKind::Catalogue | RequestKind::PassThrough => pass_through(&state, req).await,
    };
    match result {
        Ok(response) => response,
        Err(error) => error.into_response(),
    }
}

async fn pass_through(state: &AppStateData, req: Request) -> Result<Response, Error> {
    let (parts, body) = req.into_parts();
    proxy::forward(
        state,
        &parts,
        reqwest::Body::wrap_stream(body.into_data_stream()),
    )
    .await
}
