//! Caller identity extraction: bearer header handling and unverified JWT
//! claim parsing. Signature verification belongs to the issuer's
//! infrastructure, not this filter.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;

use crate::error::{Error, ErrorDetails};

/// Claims the gateway cares about. `universal_id` is the current field name;
/// `id` is accepted for tokens minted before the rename.
#[derive(Debug, Deserialize)]
struct TokenClaims {
    #[serde(default)]
    universal_id: Option<String>,
    #[serde(default)]
    id: Option<String>,
}

/// Strip an optional `Bearer ` prefix and surrounding whitespace.
pub fn extract_token(header: &str) -> &str {
    match header.strip_prefix("Bearer ") {
        Some(token) => token.trim(),
        None => header.trim(),
    }
}

/// Decode the payload segment of a JWT without verifying the signature and
/// return the caller identity, if the token carries one.
pub fn identity_from_token(token: &str) -> Result<Option<String>, Error> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(Error::new(ErrorDetails::TokenParseFailed {
            message: "token is not a three-segment JWT".to_string(),
        }));
    };

    let payload_bytes = URL_SAFE_NO_PAD.decode(payload).map_err(|e| {
        Error::new(ErrorDetails::TokenParseFailed {
            message: format!("payload is not base64url: {e}"),
        })
    })?;
    let claims: TokenClaims = serde_json::from_slice(&payload_bytes).map_err(|e| {
        Error::new(ErrorDetails::TokenParseFailed {
            message: format!("payload is not a JSON claim set: {e}"),
        })
    })?;

    let identity = claims
        .universal_id
        .filter(|id| !id.is_empty())
        .or(claims.id.filter(|id| !id.is_empty()));
    Ok(identity)
}
