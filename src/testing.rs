#![cfg(test)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::redis::codec::{self, Value};
use crate::redis::dispatch::{Dispatch, DispatchFailure, STATUS_CONNECTION};

/// Build an unsigned JWT carrying the given claim set.
pub fn make_token(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.unverified")
}

/// In-memory dispatch backend for unit tests: interprets the handful of
/// commands the gateway issues against a hash map, counts data commands, and
/// can be told to fail on specific keys.
pub struct MemoryDispatch {
    data: Mutex<HashMap<String, String>>,
    fail_keys: Mutex<HashSet<String>>,
    data_commands: AtomicU64,
}

impl MemoryDispatch {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(HashMap::new()),
            fail_keys: Mutex::new(HashSet::new()),
            data_commands: AtomicU64::new(0),
        })
    }

    pub fn seed(&self, key: &str, value: &str) {
        self.lock_data().insert(key.to_string(), value.to_string());
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.lock_data().get(key).cloned()
    }

    /// Commands touching this key fail with a connection-status failure.
    pub fn fail_on(&self, key: &str) {
        self.lock_fail_keys().insert(key.to_string());
    }

    /// Number of data commands dispatched (PING/AUTH/SELECT excluded).
    pub fn data_command_count(&self) -> u64 {
        self.data_commands.load(Ordering::Relaxed)
    }

    fn lock_data(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_fail_keys(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.fail_keys
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn should_fail(&self, key: &str) -> bool {
        self.lock_fail_keys().contains(key)
    }

    fn counter_update(&self, key: &str, delta: i64) -> Result<Vec<u8>, DispatchFailure> {
        let mut data = self.lock_data();
        let current: i64 = match data.get(key) {
            Some(raw) => match raw.parse() {
                Ok(n) => n,
                Err(_) => {
                    return Ok(b"-ERR value is not an integer or out of range\r\n".to_vec())
                }
            },
            None => 0,
        };
        let next = current + delta;
        data.insert(key.to_string(), next.to_string());
        Ok(format!(":{next}\r\n").into_bytes())
    }

    fn execute(&self, args: &[String]) -> Result<Vec<u8>, DispatchFailure> {
        let command = args[0].to_ascii_lowercase();
        match command.as_str() {
            "ping" => return Ok(b"+PONG\r\n".to_vec()),
            "auth" | "select" => return Ok(b"+OK\r\n".to_vec()),
            _ => {}
        }

        self.data_commands.fetch_add(1, Ordering::Relaxed);
        match command.as_str() {
            "get" => {
                let key = &args[1];
                if self.should_fail(key) {
                    return Err(DispatchFailure::new(STATUS_CONNECTION, "connection refused"));
                }
                match self.value(key) {
                    Some(v) => Ok(format!("${}\r\n{v}\r\n", v.len()).into_bytes()),
                    None => Ok(b"$-1\r\n".to_vec()),
                }
            }
            "set" => {
                let key = &args[1];
                if self.should_fail(key) {
                    return Err(DispatchFailure::new(STATUS_CONNECTION, "connection refused"));
                }
                let nx = args.iter().any(|a| a.eq_ignore_ascii_case("nx"));
                let mut data = self.lock_data();
                if nx && data.contains_key(key) {
                    return Ok(b"$-1\r\n".to_vec());
                }
                data.insert(key.clone(), args[2].clone());
                Ok(b"+OK\r\n".to_vec())
            }
            "incrby" => {
                let key = &args[1];
                if self.should_fail(key) {
                    return Err(DispatchFailure::new(STATUS_CONNECTION, "connection refused"));
                }
                let delta: i64 = args[2].parse().unwrap_or(0);
                self.counter_update(key, delta)
            }
            "decrby" => {
                let key = &args[1];
                if self.should_fail(key) {
                    return Err(DispatchFailure::new(STATUS_CONNECTION, "connection refused"));
                }
                let delta: i64 = args[2].parse().unwrap_or(0);
                self.counter_update(key, -delta)
            }
            "eval" => {
                // The only script the gateway ships: check-and-deduct over
                // [total_key, used_key] with the weight as the sole argument.
                let total_key = &args[3];
                let used_key = &args[4];
                if self.should_fail(total_key) || self.should_fail(used_key) {
                    return Err(DispatchFailure::new(STATUS_CONNECTION, "connection refused"));
                }
                let weight: i64 = args[5].parse().unwrap_or(0);
                let read = |key: &str| -> i64 {
                    self.value(key).and_then(|v| v.parse().ok()).unwrap_or(0)
                };
                let total = read(total_key);
                let used = read(used_key);
                let remaining = total - used;
                if remaining < weight {
                    return Ok(format!("*4\r\n:{total}\r\n:{used}\r\n:{remaining}\r\n:0\r\n")
                        .into_bytes());
                }
                self.lock_data()
                    .insert(used_key.clone(), (used + weight).to_string());
                Ok(format!("*4\r\n:{total}\r\n:{used}\r\n:{remaining}\r\n:1\r\n").into_bytes())
            }
            _ => Ok(format!("-ERR unknown command '{command}'\r\n").into_bytes()),
        }
    }
}

#[async_trait]
impl Dispatch for MemoryDispatch {
    async fn dispatch(&self, payload: &[u8]) -> Result<Vec<u8>, DispatchFailure> {
        let parsed = codec::parse_reply(payload)
            .map_err(|e| DispatchFailure::new(0, format!("bad command frame: {e}")))?;
        let Value::Array(items) = parsed else {
            return Err(DispatchFailure::new(0, "command must be an array"));
        };
        let args: Vec<String> = items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect();
        if args.is_empty() {
            return Err(DispatchFailure::new(0, "empty command"));
        }
        self.execute(&args)
    }
}
