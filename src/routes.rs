//! Route definitions for the quota gateway.
//!
//! Only the meta-observability endpoints are fixed routes; everything else
//! goes through the fallback entrypoint because the request classifier
//! matches path suffixes, not fixed segments.

use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::endpoints;
use crate::gateway_util::AppStateData;

pub fn build_api_routes(metrics_handle: Option<PrometheusHandle>) -> Router<AppStateData> {
    let mut router = Router::new()
        .route("/status", get(endpoints::status::status_handler))
        .route("/health", get(endpoints::status::health_handler));
    if let Some(handle) = metrics_handle {
        router = router.route("/metrics", get(move || std::future::ready(handle.render())));
    }
    router.fallback(endpoints::entrypoint_handler)
}
