//! Admin surface: query, refresh, and delta operations on the quota counters
//! plus gate-flag management. Every operation requires the admin key header.

use std::collections::HashMap;

use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::classifier::AdminOp;
use crate::config_parser::Config;
use crate::error::{Error, ErrorDetails};
use crate::gateway_util::AppStateData;

use super::ApiResponse;

/// Form bodies beyond this size are rejected outright.
const MAX_FORM_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy)]
enum CounterKind {
    Total,
    Used,
}

impl CounterKind {
    fn key(self, config: &Config, user_id: &str) -> String {
        match self {
            CounterKind::Total => config.total_key(user_id),
            CounterKind::Used => config.used_key(user_id),
        }
    }

    fn type_label(self) -> &'static str {
        match self {
            CounterKind::Total => "total_quota",
            CounterKind::Used => "used_quota",
        }
    }
}

pub async fn handle(state: &AppStateData, op: AdminOp, req: Request) -> Result<Response, Error> {
    let (parts, body) = req.into_parts();

    let provided = parts
        .headers
        .get(state.config.admin_header.as_str())
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if provided != state.config.admin_key {
        return Err(Error::new(ErrorDetails::Unauthorized));
    }

    let params: HashMap<String, String> = if op.is_mutation() {
        let bytes = axum::body::to_bytes(body, MAX_FORM_BYTES).await.map_err(|e| {
            Error::new(ErrorDetails::InvalidParams {
                message: format!("failed to read form body: {e}"),
            })
        })?;
        serde_urlencoded::from_bytes(&bytes).map_err(|e| {
            Error::new(ErrorDetails::InvalidParams {
                message: format!("invalid form body: {e}"),
            })
        })?
    } else {
        serde_urlencoded::from_str(parts.uri.query().unwrap_or("")).map_err(|e| {
            Error::new(ErrorDetails::InvalidParams {
                message: format!("invalid query string: {e}"),
            })
        })?
    };

    match op {
        AdminOp::TotalQuery => query(state, &params, CounterKind::Total).await,
        AdminOp::UsedQuery => query(state, &params, CounterKind::Used).await,
        AdminOp::TotalRefresh => refresh(state, &params, CounterKind::Total).await,
        AdminOp::UsedRefresh => refresh(state, &params, CounterKind::Used).await,
        AdminOp::TotalDelta => delta(state, &params, CounterKind::Total).await,
        AdminOp::UsedDelta => delta(state, &params, CounterKind::Used).await,
        AdminOp::StarQuery => star_query(state, &params).await,
        AdminOp::StarSet => star_set(state, &params).await,
    }
}

fn require_user_id<'a>(params: &'a HashMap<String, String>) -> Result<&'a str, Error> {
    params
        .get("user_id")
        .filter(|id| !id.is_empty())
        .map(String::as_str)
        .ok_or_else(|| {
            Error::new(ErrorDetails::InvalidParams {
                message: "user_id can't be empty.".to_string(),
            })
        })
}

fn require_int_param(params: &HashMap<String, String>, name: &str) -> Result<i64, Error> {
    params
        .get(name)
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(|| {
            Error::new(ErrorDetails::InvalidQuotaFormat {
                message: format!("`{name}` must be an integer"),
            })
        })
}

async fn query(
    state: &AppStateData,
    params: &HashMap<String, String>,
    kind: CounterKind,
) -> Result<Response, Error> {
    let user_id = require_user_id(params)?;
    let quota = state.store.read_int(&kind.key(&state.config, user_id)).await?;
    Ok(ApiResponse::success(
        "ai-gateway.queryquota",
        "query quota successful",
        Some(json!({
            "user_id": user_id,
            "quota": quota,
            "type": kind.type_label(),
        })),
    )
    .into_response())
}

async fn refresh(
    state: &AppStateData,
    params: &HashMap<String, String>,
    kind: CounterKind,
) -> Result<Response, Error> {
    let user_id = require_user_id(params)?;
    let quota = require_int_param(params, "quota")?;
    let key = kind.key(&state.config, user_id);
    state.store.write_int(&key, quota).await?;
    tracing::debug!(key = %key, quota, "refreshed quota counter");
    Ok(ApiResponse::success(
        "ai-gateway.refreshquota",
        "refresh quota successful",
        Some(json!({
            "user_id": user_id,
            "quota": quota,
            "type": kind.type_label(),
        })),
    )
    .into_response())
}

async fn delta(
    state: &AppStateData,
    params: &HashMap<String, String>,
    kind: CounterKind,
) -> Result<Response, Error> {
    let user_id = require_user_id(params)?;
    let value = require_int_param(params, "value")?;
    let key = kind.key(&state.config, user_id);
    let new_value = state.store.delta(&key, value).await?;
    tracing::debug!(key = %key, value, new_value, "applied quota delta");
    Ok(ApiResponse::success(
        "ai-gateway.deltaquota",
        "delta quota successful",
        Some(json!({
            "user_id": user_id,
            "quota": new_value,
            "type": kind.type_label(),
        })),
    )
    .into_response())
}

async fn star_query(
    state: &AppStateData,
    params: &HashMap<String, String>,
) -> Result<Response, Error> {
    let user_id = require_user_id(params)?;

    let star_value = if state.star_cache.contains(user_id) {
        "true"
    } else {
        let stored = state
            .store
            .read_string(&state.config.star_key(user_id))
            .await?;
        match stored.as_deref() {
            Some("true") => {
                state.star_cache.insert(user_id);
                "true"
            }
            Some("false") | None => "false",
            Some(other) => {
                tracing::warn!(
                    user_id,
                    value = other,
                    "unexpected gate flag value, reporting \"false\""
                );
                "false"
            }
        }
    };

    Ok(ApiResponse::success(
        "ai-gateway.querystar",
        "query star flag successful",
        Some(json!({
            "user_id": user_id,
            "star_value": star_value,
        })),
    )
    .into_response())
}

async fn star_set(
    state: &AppStateData,
    params: &HashMap<String, String>,
) -> Result<Response, Error> {
    let user_id = require_user_id(params)?;
    let star_value = match params.get("star_value").map(String::as_str) {
        Some(value @ ("true" | "false")) => value,
        _ => {
            return Err(Error::new(ErrorDetails::InvalidParams {
                message: "star_value must be \"true\" or \"false\".".to_string(),
            }))
        }
    };

    // The cache entry goes before the store write; it is repopulated only by
    // a subsequent positive read.
    state.star_cache.invalidate(user_id);
    state
        .store
        .set_string(&state.config.star_key(user_id), star_value)
        .await?;

    Ok(ApiResponse::success(
        "ai-gateway.setstar",
        "set star flag successful",
        Some(json!({
            "user_id": user_id,
            "star_value": star_value,
        })),
    )
    .into_response())
}
