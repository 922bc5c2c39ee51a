//! Command-oriented Redis client over a swappable dispatch seam.
//!
//! The client encodes commands as RESP arrays of bulk strings, hands the
//! payload to a [`Dispatch`] implementation, parses the reply into a tagged
//! [`Value`], and classifies every failure into the store error taxonomy.
//! Each call resolves exactly once.

pub mod codec;
pub mod dispatch;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::error::{Error, ErrorDetails, StoreErrorKind};
use codec::{CommandArg, Value};
use dispatch::{
    ConnectionParams, Dispatch, DispatchFailure, StoreMetrics, TcpDispatch, STATUS_AUTH,
    STATUS_CONNECTION, STATUS_TIMEOUT,
};

/// Capability interface for the upstream the client talks to: only a name,
/// used in logs and not-ready errors.
pub trait Cluster: Send + Sync + 'static {
    fn cluster_name(&self) -> String;
}

#[derive(Debug, Clone)]
pub struct FqdnCluster {
    pub fqdn: String,
    pub port: u16,
}

impl Cluster for FqdnCluster {
    fn cluster_name(&self) -> String {
        format!("{}:{}", self.fqdn, self.port)
    }
}

/// Retry intent carried through for logging. The client never sleeps: a
/// retryable failure is surfaced to the caller together with the delay the
/// policy would have used, and the caller decides whether to reissue.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub jitter_enabled: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            jitter_enabled: true,
        }
    }
}

impl RetryPolicy {
    /// Geometric backoff clamped at `max_delay`, with deterministic jitter in
    /// `[0.5, 0.9]` of the computed delay derived from the attempt index.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let mut delay = self.initial_delay;
        for _ in 0..attempt {
            delay = delay.mul_f64(self.backoff_factor);
            if delay > self.max_delay {
                delay = self.max_delay;
                break;
            }
        }
        if self.jitter_enabled {
            let jitter_factor = 0.5 + f64::from(attempt % 5) * 0.1;
            delay = delay.mul_f64(jitter_factor);
        }
        delay
    }
}

pub struct RedisClusterClient<C: Cluster> {
    cluster: C,
    dispatch: Arc<dyn Dispatch>,
    ready: AtomicBool,
    metrics: Arc<StoreMetrics>,
    retry_policy: RetryPolicy,
}

impl<C: Cluster> RedisClusterClient<C> {
    /// Build a client over an already-constructed dispatcher. The client is
    /// not ready until [`init`](Self::init) (or the first operation's
    /// deferred init) succeeds.
    pub fn with_dispatch(cluster: C, dispatch: Arc<dyn Dispatch>) -> Self {
        Self {
            cluster,
            dispatch,
            ready: AtomicBool::new(false),
            metrics: Arc::new(StoreMetrics::default()),
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Build a TCP-backed client and attempt initialization once. A failed
    /// attempt is logged and deferred: the first subsequent operation
    /// reattempts it.
    pub async fn connect(cluster: C, params: &ConnectionParams) -> Self {
        let client = Self::with_dispatch(cluster, Arc::new(TcpDispatch::new(params)));
        client.init().await;
        client
    }

    /// Probe the upstream with PING and mark the client ready on success.
    pub async fn init(&self) {
        match self.probe().await {
            Ok(()) => {
                self.ready.store(true, Ordering::Release);
                tracing::info!(
                    cluster = %self.cluster.cluster_name(),
                    "redis client initialized"
                );
            }
            Err(message) => {
                tracing::warn!(
                    cluster = %self.cluster.cluster_name(),
                    "failed to init redis: {message}, will retry on first use"
                );
            }
        }
    }

    pub fn ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn metrics(&self) -> &StoreMetrics {
        &self.metrics
    }

    async fn probe(&self) -> Result<(), String> {
        let payload = codec::encode_command(&[CommandArg::from("ping")]);
        let reply = self
            .dispatch
            .dispatch(&payload)
            .await
            .map_err(|f| f.message)?;
        match codec::parse_reply(&reply) {
            Ok(Value::Error(text)) => Err(text),
            Ok(_) => Ok(()),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Fail fast while not ready, reattempting the deferred init first.
    async fn ensure_ready(&self) -> Result<(), Error> {
        if self.ready() {
            return Ok(());
        }
        match self.probe().await {
            Ok(()) => {
                self.ready.store(true, Ordering::Release);
                Ok(())
            }
            Err(message) => {
                tracing::debug!(
                    cluster = %self.cluster.cluster_name(),
                    "deferred init attempt failed: {message}"
                );
                Err(Error::new(ErrorDetails::StoreNotReady {
                    cluster_name: self.cluster.cluster_name(),
                }))
            }
        }
    }

    /// Submit one command with the client's default retry policy.
    pub async fn call(
        &self,
        operation: &str,
        key: &str,
        args: &[CommandArg],
    ) -> Result<Value, Error> {
        let policy = self.retry_policy.clone();
        self.call_with_retry(operation, key, args, &policy, 0).await
    }

    /// Submit one command. Resolves exactly once, with the parsed reply or a
    /// classified error. `attempt` is nonzero when the caller is reissuing.
    pub async fn call_with_retry(
        &self,
        operation: &str,
        key: &str,
        args: &[CommandArg],
        policy: &RetryPolicy,
        attempt: u32,
    ) -> Result<Value, Error> {
        self.ensure_ready().await?;

        let request_id = Uuid::new_v4();
        let payload = codec::encode_command(args);
        self.metrics.record_dispatch();
        if attempt > 0 {
            self.metrics.record_retry();
        }
        tracing::debug!(
            %request_id,
            operation,
            key,
            cluster = %self.cluster.cluster_name(),
            "dispatching store command"
        );

        let reply = match self.dispatch.dispatch(&payload).await {
            Ok(reply) => reply,
            Err(failure) => {
                self.metrics.record_failure();
                let kind = classify_dispatch_failure(&failure);
                let error = Error::new(ErrorDetails::Store {
                    kind,
                    operation: operation.to_string(),
                    key: key.to_string(),
                    message: failure.message,
                });
                self.log_retry_intent(&error, operation, key, policy, attempt, request_id);
                return Err(error);
            }
        };

        match codec::parse_reply(&reply) {
            Err(e) => {
                self.metrics.record_failure();
                Err(Error::new(ErrorDetails::Store {
                    kind: StoreErrorKind::Protocol,
                    operation: operation.to_string(),
                    key: key.to_string(),
                    message: format!("failed to parse reply: {e}"),
                }))
            }
            Ok(Value::Error(text)) => {
                self.metrics.record_failure();
                let kind = classify_error_text(&text);
                let error = Error::new(ErrorDetails::Store {
                    kind,
                    operation: operation.to_string(),
                    key: key.to_string(),
                    message: text,
                });
                self.log_retry_intent(&error, operation, key, policy, attempt, request_id);
                Err(error)
            }
            Ok(value) => {
                self.metrics.record_success();
                tracing::debug!(
                    %request_id,
                    operation,
                    key,
                    "store command succeeded"
                );
                Ok(value)
            }
        }
    }

    fn log_retry_intent(
        &self,
        error: &Error,
        operation: &str,
        key: &str,
        policy: &RetryPolicy,
        attempt: u32,
        request_id: Uuid,
    ) {
        if error.is_retryable() && attempt < policy.max_attempts {
            let delay = policy.delay_for_attempt(attempt);
            tracing::warn!(
                %request_id,
                operation,
                key,
                attempt = attempt + 1,
                max_attempts = policy.max_attempts,
                "store operation failed; a reissue would back off for {delay:?}"
            );
        }
    }

    pub async fn get(&self, key: &str) -> Result<Value, Error> {
        self.call("GET", key, &[CommandArg::from("get"), CommandArg::from(key)])
            .await
    }

    pub async fn set(&self, key: &str, value: CommandArg) -> Result<Value, Error> {
        self.call(
            "SET",
            key,
            &[CommandArg::from("set"), CommandArg::from(key), value],
        )
        .await
    }

    pub async fn set_ex(&self, key: &str, value: CommandArg, ttl_secs: i64) -> Result<Value, Error> {
        self.call(
            "SETEX",
            key,
            &[
                CommandArg::from("set"),
                CommandArg::from(key),
                value,
                CommandArg::from("ex"),
                CommandArg::Int(ttl_secs),
            ],
        )
        .await
    }

    /// SET with the NX marker always attached; the TTL marker is attached
    /// only when positive. The reply does not distinguish "set because
    /// absent" from "no-op".
    pub async fn set_nx(&self, key: &str, value: CommandArg, ttl_secs: i64) -> Result<Value, Error> {
        let mut args = vec![
            CommandArg::from("set"),
            CommandArg::from(key),
            value,
            CommandArg::from("nx"),
        ];
        if ttl_secs > 0 {
            args.push(CommandArg::from("ex"));
            args.push(CommandArg::Int(ttl_secs));
        }
        self.call("SETNX", key, &args).await
    }

    pub async fn incr_by(&self, key: &str, delta: i64) -> Result<Value, Error> {
        self.call(
            "INCRBY",
            key,
            &[
                CommandArg::from("incrby"),
                CommandArg::from(key),
                CommandArg::Int(delta),
            ],
        )
        .await
    }

    pub async fn decr_by(&self, key: &str, delta: i64) -> Result<Value, Error> {
        self.call(
            "DECRBY",
            key,
            &[
                CommandArg::from("decrby"),
                CommandArg::from(key),
                CommandArg::Int(delta),
            ],
        )
        .await
    }

    /// Forward a server-side script. Used for compound operations that must
    /// read and write atomically.
    pub async fn eval(
        &self,
        script: &str,
        keys: &[&str],
        args: &[CommandArg],
    ) -> Result<Value, Error> {
        let mut command = Vec::with_capacity(3 + keys.len() + args.len());
        command.push(CommandArg::from("eval"));
        command.push(CommandArg::from(script));
        command.push(CommandArg::Int(keys.len() as i64));
        for key in keys {
            command.push(CommandArg::from(*key));
        }
        command.extend_from_slice(args);
        let key_label = keys.first().copied().unwrap_or("");
        self.call("EVAL", key_label, &command).await
    }
}

fn classify_dispatch_failure(failure: &DispatchFailure) -> StoreErrorKind {
    match failure.status {
        0 => classify_error_text(&failure.message),
        STATUS_CONNECTION => StoreErrorKind::Connection,
        STATUS_TIMEOUT => StoreErrorKind::Timeout,
        STATUS_AUTH => StoreErrorKind::Auth,
        _ => StoreErrorKind::Network,
    }
}

/// Keyword classification for error text reported without a transport status.
fn classify_error_text(text: &str) -> StoreErrorKind {
    let lower = text.to_ascii_lowercase();
    if contains_any(&lower, &["connection", "connect", "dial"]) {
        StoreErrorKind::Connection
    } else if contains_any(&lower, &["timeout", "deadline"]) {
        StoreErrorKind::Timeout
    } else if contains_any(&lower, &["auth", "authentication", "password"]) {
        StoreErrorKind::Auth
    } else if contains_any(&lower, &["protocol", "parse", "invalid"]) {
        StoreErrorKind::Protocol
    } else if contains_any(&lower, &["network", "io", "broken pipe"]) {
        StoreErrorKind::Network
    } else {
        StoreErrorKind::Unknown
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}
