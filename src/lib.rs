//! Quota gateway: a request-path filter in front of an upstream
//! chat-completion API. Callers authenticate with a bearer token; a
//! Redis-backed counter pair (total and used) decides whether a request may
//! proceed, optionally deducting a per-model weight. An authenticated admin
//! surface manipulates the counters, and a model catalogue endpoint is
//! synthesized from the provider configuration.

pub mod auth;
pub mod classifier;
pub mod config_parser;
pub mod endpoints;
pub mod error;
pub mod gateway_util;
pub mod observability;
pub mod proxy;
pub mod quota;
pub mod redis;
pub mod routes;
pub mod star_cache;

mod testing;
