//! Fixed-shape quota operations layered on the Redis client.
//!
//! Counters are plain string keys holding decimal integers; a missing key
//! reads as zero. The compound check-and-deduct runs server-side so the
//! read-compare-increment sequence cannot interleave with another request.

use crate::error::{Error, ErrorDetails, StoreErrorKind};
use crate::redis::codec::{CommandArg, Value};
use crate::redis::{Cluster, RedisClusterClient};

/// Atomic quota check and deduction. Returns `{total, used_before,
/// remaining, decision}` where the decision is 1 only when the increment
/// happened.
const CHECK_AND_DEDUCT_SCRIPT: &str = r#"
local total_key = KEYS[1]
local used_key = KEYS[2]
local weight = tonumber(ARGV[1])

local total = tonumber(redis.call('get', total_key)) or 0
local used = tonumber(redis.call('get', used_key)) or 0
local remaining = total - used

if remaining < weight then
    return {total, used, remaining, 0}
end

redis.call('incrby', used_key, weight)
return {total, used, remaining, 1}
"#;

/// Result of [`QuotaStore::atomic_check_and_deduct`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeductionOutcome {
    pub total: i64,
    pub used_before: i64,
    pub remaining: i64,
    pub deducted: bool,
}

pub struct QuotaStore<C: Cluster> {
    client: RedisClusterClient<C>,
}

impl<C: Cluster> QuotaStore<C> {
    pub fn new(client: RedisClusterClient<C>) -> Self {
        Self { client }
    }

    pub fn is_ready(&self) -> bool {
        self.client.ready()
    }

    pub fn client(&self) -> &RedisClusterClient<C> {
        &self.client
    }

    /// Read a counter. A missing key is zero; a present value that is not a
    /// non-negative decimal integer is a user-visible error.
    pub async fn read_int(&self, key: &str) -> Result<i64, Error> {
        let value = self.client.get(key).await?;
        if value.is_null() {
            return Ok(0);
        }
        match value.as_i64() {
            Some(n) if n >= 0 => Ok(n),
            _ => {
                let raw = value
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{value:?}"));
                Err(Error::new(ErrorDetails::InvalidQuotaValue {
                    key: key.to_string(),
                    raw,
                }))
            }
        }
    }

    pub async fn write_int(&self, key: &str, value: i64) -> Result<(), Error> {
        self.client.set(key, CommandArg::Int(value)).await?;
        Ok(())
    }

    pub async fn set_string(&self, key: &str, value: &str) -> Result<(), Error> {
        self.client.set(key, CommandArg::from(value)).await?;
        Ok(())
    }

    pub async fn read_string(&self, key: &str) -> Result<Option<String>, Error> {
        let value = self.client.get(key).await?;
        if value.is_null() {
            return Ok(None);
        }
        Ok(value.as_str().map(str::to_string))
    }

    /// Atomic add for non-negative deltas, atomic subtract otherwise; the
    /// magnitude sent on the wire is always non-negative. Resolves with the
    /// post-operation counter value.
    pub async fn delta(&self, key: &str, delta: i64) -> Result<i64, Error> {
        let magnitude = i64::try_from(delta.unsigned_abs()).unwrap_or(i64::MAX);
        let (operation, value) = if delta >= 0 {
            ("INCRBY", self.client.incr_by(key, magnitude).await?)
        } else {
            ("DECRBY", self.client.decr_by(key, magnitude).await?)
        };
        value.as_i64().ok_or_else(|| {
            Error::new(ErrorDetails::Store {
                kind: StoreErrorKind::Protocol,
                operation: operation.to_string(),
                key: key.to_string(),
                message: "counter update returned a non-integer reply".to_string(),
            })
        })
    }

    /// Read both counters, compare against `weight`, and increment `used` in
    /// one server-side step.
    pub async fn atomic_check_and_deduct(
        &self,
        total_key: &str,
        used_key: &str,
        weight: i64,
    ) -> Result<DeductionOutcome, Error> {
        let value = self
            .client
            .eval(
                CHECK_AND_DEDUCT_SCRIPT,
                &[total_key, used_key],
                &[CommandArg::Int(weight)],
            )
            .await?;
        parse_deduction_reply(&value).ok_or_else(|| {
            Error::new(ErrorDetails::Store {
                kind: StoreErrorKind::Protocol,
                operation: "EVAL".to_string(),
                key: total_key.to_string(),
                message: format!("check-and-deduct returned an unexpected reply: {value:?}"),
            })
        })
    }
}

fn parse_deduction_reply(value: &Value) -> Option<DeductionOutcome> {
    let Value::Array(items) = value else {
        return None;
    };
    if items.len() != 4 {
        return None;
    }
    Some(DeductionOutcome {
        total: items[0].as_i64()?,
        used_before: items[1].as_i64()?,
        remaining: items[2].as_i64()?,
        deducted: items[3].as_i64()? == 1,
    })
}
