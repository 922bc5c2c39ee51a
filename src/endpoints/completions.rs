//! The completion gate: identity extraction, optional gate-flag check, quota
//! arithmetic, and conditional deduction.
//!
//! The phases run as one linear routine; each store call is awaited before
//! the next is issued, so a request never has more than one store operation
//! in flight.

use axum::extract::Request;
use axum::response::Response;
use bytes::Bytes;

use crate::auth;
use crate::error::{Error, ErrorDetails};
use crate::gateway_util::AppStateData;
use crate::proxy;

/// Completion bodies beyond this size are rejected before JSON parsing.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

pub async fn handle(state: &AppStateData, req: Request) -> Result<Response, Error> {
    let (parts, body) = req.into_parts();

    // Identity comes first; the body stays unread until the caller is known.
    let raw_header = parts
        .headers
        .get(state.config.token_header.as_str())
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if raw_header.trim().is_empty() {
        return Err(Error::new(ErrorDetails::NoToken));
    }
    let token = auth::extract_token(raw_header);
    if token.is_empty() {
        return Err(Error::new(ErrorDetails::InvalidToken));
    }
    let identity =
        auth::identity_from_token(token)?.ok_or_else(|| Error::new(ErrorDetails::NoUserId))?;

    let body_bytes = axum::body::to_bytes(body, MAX_BODY_BYTES).await.map_err(|e| {
        Error::new(ErrorDetails::InvalidParams {
            message: format!("failed to buffer request body: {e}"),
        })
    })?;
    let model = extract_model(&body_bytes);
    let weight = i64::try_from(state.config.weight_for(&model)).unwrap_or(i64::MAX);

    // Weight zero bypasses everything, the gate check included: the model is
    // not subject to quota.
    if weight == 0 {
        tracing::debug!(model = %model, user_id = %identity, "model carries no quota weight, resuming");
        return proxy::forward(state, &parts, reqwest::Body::from(body_bytes)).await;
    }

    if state.config.check_github_star {
        check_star_gate(state, &identity).await?;
    }

    let should_deduct = parts
        .headers
        .get(state.config.deduct_header.as_str())
        .and_then(|value| value.to_str().ok())
        .map(|value| value == state.config.deduct_header_value)
        .unwrap_or(false);

    let total_key = state.config.total_key(&identity);
    let used_key = state.config.used_key(&identity);
    let total = state
        .store
        .read_int(&total_key)
        .await
        .map_err(map_total_error)?;
    let used = state
        .store
        .read_int(&used_key)
        .await
        .map_err(map_used_error)?;
    let remaining = total - used;
    if used > total + weight {
        tracing::warn!(
            user_id = %identity,
            total,
            used,
            "used quota significantly exceeds total quota"
        );
    }

    if remaining < weight {
        return Err(Error::new(ErrorDetails::InsufficientQuota {
            required: weight,
            available: remaining,
        }));
    }
    if !should_deduct {
        return proxy::forward(state, &parts, reqwest::Body::from(body_bytes)).await;
    }

    let new_used = state.store.delta(&used_key, weight).await.map_err(|e| {
        Error::new(ErrorDetails::DeductionFailed {
            message: e.to_string(),
        })
    })?;
    if new_used < weight {
        return Err(Error::new(ErrorDetails::DeductionInconsistent {
            new_used,
            weight,
        }));
    }
    tracing::info!(
        user_id = %identity,
        model = %model,
        weight,
        new_used,
        "quota deducted for completion request"
    );
    proxy::forward(state, &parts, reqwest::Body::from(body_bytes)).await
}

/// Gate-flag check with a positive cache in front of the store.
///
/// A store error fails open: the request proceeds to the quota check. Only
/// the literal value `"true"` opens the gate and populates the cache.
async fn check_star_gate(state: &AppStateData, identity: &str) -> Result<(), Error> {
    if state.star_cache.contains(identity) {
        return Ok(());
    }
    let star_key = state.config.star_key(identity);
    match state.store.read_string(&star_key).await {
        Err(error) => {
            tracing::warn!(
                user_id = %identity,
                "gate flag read failed, allowing request through: {error}"
            );
            Ok(())
        }
        Ok(Some(value)) if value == "true" => {
            state.star_cache.insert(identity);
            Ok(())
        }
        Ok(_) => Err(Error::new(ErrorDetails::StarRequired {
            user_id: identity.to_string(),
        })),
    }
}

/// Pull the `model` field out of the JSON body; anything unparseable reads as
/// "no model", which weighs zero.
fn extract_model(body: &Bytes) -> String {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("model")
                .and_then(|model| model.as_str())
                .map(str::to_string)
        })
        .unwrap_or_default()
}

fn map_total_error(error: Error) -> Error {
    match error.get_details() {
        ErrorDetails::InvalidQuotaValue { .. } => Error::new(ErrorDetails::InvalidTotalQuota {
            message: error.to_string(),
        }),
        _ => Error::new(ErrorDetails::TotalQuotaError {
            message: error.to_string(),
        }),
    }
}

fn map_used_error(error: Error) -> Error {
    match error.get_details() {
        ErrorDetails::InvalidQuotaValue { .. } => Error::new(ErrorDetails::InvalidUsedQuota {
            message: error.to_string(),
        }),
        _ => Error::new(ErrorDetails::UsedQuotaError {
            message: error.to_string(),
        }),
    }
}
