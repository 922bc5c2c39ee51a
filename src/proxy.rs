//! Upstream forwarder. Resumed completions and unclassified paths are
//! replayed against the configured upstream base URL; response bodies are
//! streamed back without buffering. No retries: the upstream call happens at
//! most once per request.

use axum::body::Body;
use axum::http::header::{HeaderMap, HeaderName, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use axum::http::request::Parts;
use axum::response::Response;

use crate::error::{Error, ErrorDetails};
use crate::gateway_util::AppStateData;

/// Hop-by-hop headers (RFC 9110 §7.6.1) that must not be replayed.
const HOP_BY_HOP: [&str; 6] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "upgrade",
];

/// Forward a request upstream with its original method, path, and headers.
pub async fn forward(
    state: &AppStateData,
    parts: &Parts,
    body: reqwest::Body,
) -> Result<Response, Error> {
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!(
        "{}{path_and_query}",
        state.config.upstream.base_url.trim_end_matches('/')
    );

    let upstream_response = state
        .http_client
        .request(parts.method.clone(), &url)
        .headers(strip_untransferable_headers(&parts.headers))
        .body(body)
        .send()
        .await
        .map_err(|e| {
            Error::new(ErrorDetails::Upstream {
                message: e.to_string(),
            })
        })?;

    let mut builder = Response::builder().status(upstream_response.status());
    if let Some(headers) = builder.headers_mut() {
        for (name, value) in upstream_response.headers() {
            if !is_hop_by_hop(name) {
                headers.insert(name.clone(), value.clone());
            }
        }
    }
    builder
        .body(Body::from_stream(upstream_response.bytes_stream()))
        .map_err(|e| {
            Error::new(ErrorDetails::Upstream {
                message: format!("failed to assemble upstream response: {e}"),
            })
        })
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

fn strip_untransferable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        // Host and framing headers are recomputed by the HTTP client.
        if is_hop_by_hop(name)
            || name == HOST
            || name == CONTENT_LENGTH
            || name == TRANSFER_ENCODING
        {
            continue;
        }
        forwarded.insert(name.clone(), value.clone());
    }
    forwarded
}
