//! End-to-end scenarios driven through the full router, with an in-memory
//! dispatch backend standing in for Redis and a local stub standing in for
//! the upstream completion API.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use quota_gateway::config_parser::Config;
use quota_gateway::gateway_util::AppStateData;
use quota_gateway::quota::QuotaStore;
use quota_gateway::redis::codec;
use quota_gateway::redis::dispatch::{Dispatch, DispatchFailure, STATUS_CONNECTION};
use quota_gateway::redis::{FqdnCluster, RedisClusterClient};
use quota_gateway::routes::build_api_routes;

/// In-memory Redis stand-in: decodes RESP command frames, runs them against a
/// hash map, counts data commands, and fails on demand per key.
struct FakeRedis {
    data: Mutex<HashMap<String, String>>,
    fail_keys: Mutex<HashSet<String>>,
    data_commands: AtomicU64,
}

impl FakeRedis {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(HashMap::new()),
            fail_keys: Mutex::new(HashSet::new()),
            data_commands: AtomicU64::new(0),
        })
    }

    fn seed(&self, key: &str, value: &str) {
        self.data
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    fn value(&self, key: &str) -> Option<String> {
        self.data.lock().unwrap().get(key).cloned()
    }

    fn fail_on(&self, key: &str) {
        self.fail_keys.lock().unwrap().insert(key.to_string());
    }

    fn data_command_count(&self) -> u64 {
        self.data_commands.load(Ordering::Relaxed)
    }

    fn run(&self, args: &[String]) -> Result<Vec<u8>, DispatchFailure> {
        let command = args[0].to_ascii_lowercase();
        if matches!(command.as_str(), "ping" | "auth" | "select") {
            return Ok(b"+PONG\r\n".to_vec());
        }
        self.data_commands.fetch_add(1, Ordering::Relaxed);

        let key = &args[1];
        if self.fail_keys.lock().unwrap().contains(key) {
            return Err(DispatchFailure::new(STATUS_CONNECTION, "connection refused"));
        }
        match command.as_str() {
            "get" => Ok(match self.value(key) {
                Some(v) => format!("${}\r\n{v}\r\n", v.len()).into_bytes(),
                None => b"$-1\r\n".to_vec(),
            }),
            "set" => {
                let nx = args.iter().any(|a| a.eq_ignore_ascii_case("nx"));
                let mut data = self.data.lock().unwrap();
                if nx && data.contains_key(key) {
                    return Ok(b"$-1\r\n".to_vec());
                }
                data.insert(key.clone(), args[2].clone());
                Ok(b"+OK\r\n".to_vec())
            }
            "incrby" | "decrby" => {
                let mut delta: i64 = args[2].parse().unwrap();
                if command == "decrby" {
                    delta = -delta;
                }
                let mut data = self.data.lock().unwrap();
                let current: i64 = data.get(key).map(|v| v.parse().unwrap()).unwrap_or(0);
                let next = current + delta;
                data.insert(key.clone(), next.to_string());
                Ok(format!(":{next}\r\n").into_bytes())
            }
            other => Ok(format!("-ERR unknown command '{other}'\r\n").into_bytes()),
        }
    }
}

#[async_trait]
impl Dispatch for FakeRedis {
    async fn dispatch(&self, payload: &[u8]) -> Result<Vec<u8>, DispatchFailure> {
        let frame = codec::parse_reply(payload)
            .map_err(|e| DispatchFailure::new(0, format!("bad command frame: {e}")))?;
        let codec::Value::Array(items) = frame else {
            return Err(DispatchFailure::new(0, "command must be an array"));
        };
        let args: Vec<String> = items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect();
        self.run(&args)
    }
}

/// Spawn a stub upstream that answers every request with a canned completion.
async fn spawn_upstream() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().fallback(|| async {
        axum::Json(json!({"id": "stub-completion", "object": "chat.completion"}))
    });
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn harness(extra_toml: &str) -> (Router, Arc<FakeRedis>, AppStateData) {
    let upstream = spawn_upstream().await;
    let toml_text = format!(
        r#"
admin_key = "admin-secret"
{extra_toml}

[upstream]
base_url = "{upstream}"

[redis]
service_name = "redis.test"
"#
    );
    let table = toml_text.parse::<toml::Table>().unwrap();
    let config = Arc::new(Config::load_from_toml(table).unwrap());

    let dispatch = FakeRedis::new();
    let cluster = FqdnCluster {
        fqdn: "redis.test".to_string(),
        port: 6379,
    };
    let client = RedisClusterClient::with_dispatch(cluster, dispatch.clone());
    let state = AppStateData::with_store(config, Arc::new(QuotaStore::new(client)));
    let router = build_api_routes(None).with_state(state.clone());
    (router, dispatch, state)
}

fn make_token(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.unverified")
}

async fn response_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_completion_without_token_is_rejected_before_any_store_call() {
    let (router, redis, _state) = harness("").await;

    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"model":"gpt-4","messages":[]}"#))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = response_json(response).await;
    assert_eq!(body["code"], "ai-gateway.no_token");
    assert_eq!(body["success"], false);
    assert_eq!(redis.data_command_count(), 0);
}

#[tokio::test]
async fn test_weight_zero_model_resumes_with_zero_store_calls() {
    let (router, redis, _state) = harness(
        r#"
[model_quota_weights]
"gpt-3.5-turbo" = 1
"#,
    )
    .await;

    let token = make_token(&json!({"universal_id": "u42"}));
    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("authorization", format!("Bearer {token}"))
        .header("content-type", "application/json")
        .body(Body::from(
            r#"{"model":"claude-3","messages":[{"role":"user","content":"hi"}]}"#,
        ))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["id"], "stub-completion");
    assert_eq!(redis.data_command_count(), 0);
}

#[tokio::test]
async fn test_sufficient_quota_with_deduction() {
    let (router, redis, state) = harness(
        r#"
[model_quota_weights]
"gpt-4" = 2
"#,
    )
    .await;
    redis.seed("chat_quota:u1", "10");
    redis.seed("chat_quota_used:u1", "3");

    let token = make_token(&json!({"universal_id": "u1"}));
    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("authorization", format!("Bearer {token}"))
        .header("x-quota-identity", "user")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"model":"gpt-4","messages":[]}"#))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["id"], "stub-completion");
    assert_eq!(redis.value("chat_quota_used:u1").as_deref(), Some("5"));
    // Sequential chain: total read, used read, one increment.
    assert_eq!(redis.data_command_count(), 3);
    let metrics = state.store.client().metrics().snapshot();
    assert_eq!(metrics.successful_calls, 3);
    assert_eq!(metrics.failed_calls, 0);
}

#[tokio::test]
async fn test_insufficient_quota_is_rejected_without_a_write() {
    let (router, redis, _state) = harness(
        r#"
[model_quota_weights]
"gpt-4" = 2
"#,
    )
    .await;
    redis.seed("chat_quota:u2", "4");
    redis.seed("chat_quota_used:u2", "3");

    let token = make_token(&json!({"universal_id": "u2"}));
    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("authorization", format!("Bearer {token}"))
        .header("x-quota-identity", "user")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"model":"gpt-4","messages":[]}"#))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = response_json(response).await;
    assert_eq!(body["code"], "quota-check.insufficient_quota");
    assert!(
        body["message"]
            .as_str()
            .unwrap()
            .contains("Required: 2, Available: 1"),
        "message: {}",
        body["message"]
    );
    assert_eq!(redis.value("chat_quota_used:u2").as_deref(), Some("3"));
}

#[tokio::test]
async fn test_gate_check_fails_open_on_store_error() {
    let (router, redis, _state) = harness(
        r#"
check_github_star = true

[model_quota_weights]
"gpt-4" = 1
"#,
    )
    .await;
    redis.seed("chat_quota:u3", "10");
    redis.fail_on("chat_quota_star:u3");

    let token = make_token(&json!({"universal_id": "u3"}));
    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("authorization", format!("Bearer {token}"))
        .header("x-quota-identity", "user")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"model":"gpt-4","messages":[]}"#))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(redis.value("chat_quota_used:u3").as_deref(), Some("1"));
}

#[tokio::test]
async fn test_star_required_when_flag_is_absent() {
    let (router, _redis, state) = harness(
        r#"
check_github_star = true

[model_quota_weights]
"gpt-4" = 1
"#,
    )
    .await;

    let token = make_token(&json!({"universal_id": "u4"}));
    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("authorization", format!("Bearer {token}"))
        .header("content-type", "application/json")
        .body(Body::from(r#"{"model":"gpt-4","messages":[]}"#))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = response_json(response).await;
    assert_eq!(body["code"], "quota-check.star_required");
    assert!(!state.star_cache.contains("u4"));
}

#[tokio::test]
async fn test_admin_refresh_then_query_round_trip() {
    let (router, _redis, _state) = harness("").await;

    let refresh = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions/quota/refresh")
        .header("x-admin-key", "admin-secret")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from("user_id=u9&quota=100"))
        .unwrap();
    let response = router.clone().oneshot(refresh).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["code"], "ai-gateway.refreshquota");
    assert_eq!(body["success"], true);

    let query = Request::builder()
        .method("GET")
        .uri("/v1/chat/completions/quota?user_id=u9")
        .header("x-admin-key", "admin-secret")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(query).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["quota"], 100);
    assert_eq!(body["data"]["type"], "total_quota");
    assert_eq!(body["data"]["user_id"], "u9");
}

#[tokio::test]
async fn test_admin_delta_round_trip_restores_the_original_value() {
    let (router, redis, _state) = harness("").await;
    redis.seed("chat_quota_used:u5", "8");

    for (value, expected) in [("5", "13"), ("-5", "8")] {
        let request = Request::builder()
            .method("POST")
            .uri("/v1/chat/completions/quota/used/delta")
            .header("x-admin-key", "admin-secret")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(format!("user_id=u5&value={value}")))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body["code"], "ai-gateway.deltaquota");
        assert_eq!(
            redis.value("chat_quota_used:u5").as_deref(),
            Some(expected),
            "after delta {value}"
        );
    }
}

#[tokio::test]
async fn test_admin_requires_the_configured_key() {
    let (router, _redis, _state) = harness("").await;

    let request = Request::builder()
        .method("GET")
        .uri("/v1/chat/completions/quota?user_id=u1")
        .header("x-admin-key", "wrong")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = response_json(response).await;
    assert_eq!(body["code"], "ai-gateway.unauthorized");
}

#[tokio::test]
async fn test_admin_rejects_missing_and_malformed_params() {
    let (router, _redis, _state) = harness("").await;

    // Missing user_id on a query.
    let request = Request::builder()
        .method("GET")
        .uri("/v1/chat/completions/quota")
        .header("x-admin-key", "admin-secret")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Non-integer quota on a refresh.
    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions/quota/refresh")
        .header("x-admin-key", "admin-secret")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from("user_id=u1&quota=lots"))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["code"], "ai-gateway.invalid_quota_format");
}

#[tokio::test]
async fn test_gate_set_invalidates_the_cache() {
    let (router, redis, state) = harness("").await;
    redis.seed("chat_quota_star:u7", "true");

    // A positive query populates the cache.
    let query = Request::builder()
        .method("GET")
        .uri("/v1/chat/completions/quota/star?user_id=u7")
        .header("x-admin-key", "admin-secret")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(query).await.unwrap();
    let body = response_json(response).await;
    assert_eq!(body["data"]["star_value"], "true");
    assert!(state.star_cache.contains("u7"));

    // Setting the flag drops the entry before the store write.
    let set = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions/quota/star/set")
        .header("x-admin-key", "admin-secret")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from("user_id=u7&star_value=false"))
        .unwrap();
    let response = router.clone().oneshot(set).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!state.star_cache.contains("u7"));
    assert_eq!(redis.value("chat_quota_star:u7").as_deref(), Some("false"));

    // The next query reads the store, not a stale cache entry.
    let query = Request::builder()
        .method("GET")
        .uri("/v1/chat/completions/quota/star?user_id=u7")
        .header("x-admin-key", "admin-secret")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(query).await.unwrap();
    let body = response_json(response).await;
    assert_eq!(body["data"]["star_value"], "false");
}

#[tokio::test]
async fn test_gate_set_rejects_values_outside_true_false() {
    let (router, _redis, _state) = harness("").await;

    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions/quota/star/set")
        .header("x-admin-key", "admin-secret")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from("user_id=u7&star_value=maybe"))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_model_catalogue_synthesis() {
    let (router, _redis, _state) = harness(
        r#"
[provider]
type = "qwen"

[provider.modelMapping]
"gpt-4" = "qwen-max"
"gpt-4-*" = "qwen-max"
"*" = "qwen-turbo"
"dead" = ""
"#,
    )
    .await;

    let request = Request::builder()
        .method("GET")
        .uri("/ai-gateway/api/v1/models")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(
        body,
        json!({
            "object": "list",
            "data": [{
                "id": "gpt-4",
                "object": "model",
                "created": 1686935002u64,
                "owned_by": "alibaba",
            }],
        })
    );
}

#[tokio::test]
async fn test_unclassified_paths_pass_through_to_the_upstream() {
    let (router, redis, _state) = harness("").await;

    let request = Request::builder()
        .method("GET")
        .uri("/v1/embeddings")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["id"], "stub-completion");
    assert_eq!(redis.data_command_count(), 0);
}

#[tokio::test]
async fn test_store_failure_on_total_read_is_a_quota_error() {
    let (router, redis, _state) = harness(
        r#"
[model_quota_weights]
"gpt-4" = 2
"#,
    )
    .await;
    redis.fail_on("chat_quota:u8");

    let token = make_token(&json!({"universal_id": "u8"}));
    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("authorization", format!("Bearer {token}"))
        .header("content-type", "application/json")
        .body(Body::from(r#"{"model":"gpt-4","messages":[]}"#))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = response_json(response).await;
    assert_eq!(body["code"], "quota-check.total_quota_error");
}

#[tokio::test]
async fn test_legacy_id_claim_is_accepted() {
    let (router, redis, _state) = harness(
        r#"
[model_quota_weights]
"gpt-4" = 1
"#,
    )
    .await;
    redis.seed("chat_quota:legacy-user", "5");

    let token = make_token(&json!({"id": "legacy-user"}));
    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("authorization", format!("Bearer {token}"))
        .header("x-quota-identity", "user")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"model":"gpt-4","messages":[]}"#))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        redis.value("chat_quota_used:legacy-user").as_deref(),
        Some("1")
    );
}

#[tokio::test]
async fn test_without_deduct_header_the_counter_is_untouched() {
    let (router, redis, _state) = harness(
        r#"
[model_quota_weights]
"gpt-4" = 2
"#,
    )
    .await;
    redis.seed("chat_quota:u10", "10");

    let token = make_token(&json!({"universal_id": "u10"}));
    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("authorization", format!("Bearer {token}"))
        .header("content-type", "application/json")
        .body(Body::from(r#"{"model":"gpt-4","messages":[]}"#))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(redis.value("chat_quota_used:u10"), None);
    // Two reads, no write.
    assert_eq!(redis.data_command_count(), 2);
}

#[tokio::test]
async fn test_status_reports_store_readiness() {
    let (router, _redis, _state) = harness("").await;

    let request = Request::builder()
        .method("GET")
        .uri("/status")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["status"], "ok");
    // The client is constructed without an init probe here, so readiness
    // flips only after the first successful operation.
    assert_eq!(body["store_ready"], false);
}
