use std::collections::HashMap;
use std::net::SocketAddr;

use serde::Deserialize;

use crate::error::{Error, ErrorDetails};

/// Validated gateway configuration. Immutable after load.
#[derive(Debug)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub admin_path: String,
    pub token_header: String,
    pub admin_header: String,
    pub admin_key: String,
    pub deduct_header: String,
    pub deduct_header_value: String,
    pub redis_key_prefix: String,
    pub redis_used_prefix: String,
    pub redis_star_prefix: String,
    pub check_github_star: bool,
    pub model_quota_weights: HashMap<String, u64>,
    pub provider: Option<ProviderConfig>,
    pub upstream: UpstreamConfig,
    pub redis: RedisConfig,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    pub bind_address: Option<SocketAddr>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    pub r#type: String,
    #[serde(rename = "modelMapping", default)]
    pub model_mapping: HashMap<String, String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamConfig {
    pub base_url: String,
}

/// Connection details for the quota store.
#[derive(Debug)]
pub struct RedisConfig {
    pub service_name: String,
    pub service_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_ms: u64,
    pub database: u32,
}

impl RedisConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.service_name, self.service_port)
    }
}

impl Config {
    pub fn load() -> Result<Config, Error> {
        let config_path = UninitializedConfig::get_config_path();
        let config_table = UninitializedConfig::read_toml_config(&config_path)?;
        Self::load_from_toml(config_table)
    }

    pub fn load_from_toml(table: toml::Table) -> Result<Config, Error> {
        let uninitialized = UninitializedConfig::try_from(table)?;
        uninitialized.into_config()
    }

    pub fn total_key(&self, identity: &str) -> String {
        format!("{}{identity}", self.redis_key_prefix)
    }

    pub fn used_key(&self, identity: &str) -> String {
        format!("{}{identity}", self.redis_used_prefix)
    }

    pub fn star_key(&self, identity: &str) -> String {
        format!("{}{identity}", self.redis_star_prefix)
    }

    /// Deduction weight of a model; unlisted models weigh zero.
    pub fn weight_for(&self, model: &str) -> u64 {
        self.model_quota_weights.get(model).copied().unwrap_or(0)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UninitializedConfig {
    gateway: Option<GatewayConfig>,
    admin_path: Option<String>,
    token_header: Option<String>,
    admin_header: Option<String>,
    admin_key: Option<String>,
    deduct_header: Option<String>,
    deduct_header_value: Option<String>,
    redis_key_prefix: Option<String>,
    redis_used_prefix: Option<String>,
    redis_star_prefix: Option<String>,
    check_github_star: Option<bool>,
    model_quota_weights: Option<HashMap<String, u64>>,
    provider: Option<ProviderConfig>,
    upstream: Option<UpstreamConfig>,
    redis: Option<UninitializedRedisConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UninitializedRedisConfig {
    service_name: String,
    service_port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    timeout: Option<u64>,
    database: Option<u32>,
}

impl UninitializedConfig {
    fn get_config_path() -> String {
        match std::env::args().nth(1) {
            Some(path) => path,
            None => "quota-gateway.toml".to_string(),
        }
    }

    /// Read a file from the file system and parse it as TOML
    fn read_toml_config(path: &str) -> Result<toml::Table, Error> {
        std::fs::read_to_string(path)
            .map_err(|_| {
                Error::new(ErrorDetails::Config {
                    message: format!("Failed to read config file: {path}"),
                })
            })?
            .parse::<toml::Table>()
            .map_err(|_| {
                Error::new(ErrorDetails::Config {
                    message: format!("Failed to parse config file as valid TOML: {path}"),
                })
            })
    }

    fn into_config(self) -> Result<Config, Error> {
        let admin_key = match self.admin_key {
            Some(key) if !key.is_empty() => key,
            _ => {
                return Err(Error::new(ErrorDetails::Config {
                    message: "Invalid Config: `admin_key` is required and must not be empty"
                        .to_string(),
                }))
            }
        };

        let admin_path = self.admin_path.unwrap_or_else(|| "/quota".to_string());
        if !admin_path.starts_with('/') {
            return Err(Error::new(ErrorDetails::Config {
                message: format!("Invalid Config: `admin_path` must begin with `/`: {admin_path}"),
            }));
        }

        let Some(upstream) = self.upstream else {
            return Err(Error::new(ErrorDetails::Config {
                message: "Invalid Config: `upstream.base_url` is required".to_string(),
            }));
        };
        if upstream.base_url.is_empty() {
            return Err(Error::new(ErrorDetails::Config {
                message: "Invalid Config: `upstream.base_url` must not be empty".to_string(),
            }));
        }

        let Some(redis) = self.redis else {
            return Err(Error::new(ErrorDetails::Config {
                message: "Invalid Config: `redis` section is required".to_string(),
            }));
        };
        if redis.service_name.is_empty() {
            return Err(Error::new(ErrorDetails::Config {
                message: "Invalid Config: `redis.service_name` must not be empty".to_string(),
            }));
        }
        let service_port = redis.service_port.unwrap_or_else(|| {
            // Static services sit behind a logical port 80; everything else
            // defaults to the standard Redis port.
            if redis.service_name.ends_with(".static") {
                80
            } else {
                6379
            }
        });
        let redis = RedisConfig {
            service_name: redis.service_name,
            service_port,
            username: redis.username,
            password: redis.password,
            timeout_ms: redis.timeout.unwrap_or(1000),
            database: redis.database.unwrap_or(0),
        };

        Ok(Config {
            gateway: self.gateway.unwrap_or_default(),
            admin_path,
            token_header: self
                .token_header
                .unwrap_or_else(|| "authorization".to_string()),
            admin_header: self
                .admin_header
                .unwrap_or_else(|| "x-admin-key".to_string()),
            admin_key,
            deduct_header: self
                .deduct_header
                .unwrap_or_else(|| "x-quota-identity".to_string()),
            deduct_header_value: self
                .deduct_header_value
                .unwrap_or_else(|| "user".to_string()),
            redis_key_prefix: self
                .redis_key_prefix
                .unwrap_or_else(|| "chat_quota:".to_string()),
            redis_used_prefix: self
                .redis_used_prefix
                .unwrap_or_else(|| "chat_quota_used:".to_string()),
            redis_star_prefix: self
                .redis_star_prefix
                .unwrap_or_else(|| "chat_quota_star:".to_string()),
            check_github_star: self.check_github_star.unwrap_or(false),
            model_quota_weights: self.model_quota_weights.unwrap_or_default(),
            provider: self.provider,
            upstream,
            redis,
        })
    }
}

/// Deserialize a TOML table into `UninitializedConfig`
impl TryFrom<toml::Table> for UninitializedConfig {
    type Error = Error;

    fn try_from(table: toml::Table) -> Result<Self, Self::Error> {
        match table.try_into() {
            Ok(config) => Ok(config),
            Err(e) => Err(Error::new(ErrorDetails::Config {
                message: format!("Failed to parse config: {e}"),
            })),
        }
    }
}
