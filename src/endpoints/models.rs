//! Model catalogue synthesized from the provider configuration. No upstream
//! call is made; the list is a pure function of the model mapping.

use axum::body::Body;
use axum::http::{header::CONTENT_TYPE, StatusCode};
use axum::response::Response;
use serde::Serialize;

use crate::config_parser::ProviderConfig;
use crate::error::{Error, ErrorDetails};
use crate::gateway_util::AppStateData;

/// Fixed creation timestamp carried by every synthesized model entry.
const MODELS_CREATED_AT: u64 = 1_686_935_002;

#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub object: &'static str,
    pub created: u64,
    pub owned_by: String,
}

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub object: &'static str,
    pub data: Vec<ModelInfo>,
}

pub async fn handle(state: &AppStateData) -> Result<Response, Error> {
    let models = build_models_response(state.config.provider.as_ref());
    let body = serde_json::to_vec(&models).map_err(|e| {
        Error::new(ErrorDetails::BuildModelsFailed {
            message: e.to_string(),
        })
    })?;
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .map_err(|e| {
            Error::new(ErrorDetails::SendModelsResponseFailed {
                message: e.to_string(),
            })
        })
}

/// Concrete mapping entries become catalogue rows; the wildcard key, prefix
/// patterns, and entries mapped to the empty string are skipped. `data` is
/// always an array, sorted by id for deterministic output.
pub fn build_models_response(provider: Option<&ProviderConfig>) -> ModelsResponse {
    let Some(provider) = provider else {
        return ModelsResponse {
            object: "list",
            data: Vec::new(),
        };
    };

    let mut data: Vec<ModelInfo> = provider
        .model_mapping
        .iter()
        .filter(|(name, target)| {
            name.as_str() != "*" && !name.ends_with('*') && !target.is_empty()
        })
        .map(|(name, _)| ModelInfo {
            id: name.clone(),
            object: "model",
            created: MODELS_CREATED_AT,
            owned_by: owned_by(&provider.r#type).to_string(),
        })
        .collect();
    data.sort_by(|a, b| a.id.cmp(&b.id));
    ModelsResponse {
        object: "list",
        data,
    }
}

fn owned_by(provider_type: &str) -> &str {
    match provider_type {
        "openai" => "openai",
        "azure" => "openai-internal",
        "qwen" => "alibaba",
        "moonshot" => "moonshot",
        "claude" => "anthropic",
        "gemini" => "google",
        other => other,
    }
}
