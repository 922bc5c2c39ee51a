use std::sync::Arc;

use reqwest::Client;

use crate::config_parser::Config;
use crate::error::Error;
use crate::quota::QuotaStore;
use crate::redis::dispatch::ConnectionParams;
use crate::redis::{FqdnCluster, RedisClusterClient};
use crate::star_cache::StarCache;

/// State for the API
#[derive(Clone)]
pub struct AppStateData {
    pub config: Arc<Config>,
    pub http_client: Client,
    pub store: Arc<QuotaStore<FqdnCluster>>,
    pub star_cache: Arc<StarCache>,
}

pub type AppState = axum::extract::State<AppStateData>;

impl AppStateData {
    /// Connect the store client (initialization is deferred on failure) and
    /// assemble the shared state.
    pub async fn new(config: Arc<Config>) -> Result<Self, Error> {
        let cluster = FqdnCluster {
            fqdn: config.redis.service_name.clone(),
            port: config.redis.service_port,
        };
        let params = ConnectionParams {
            address: config.redis.address(),
            username: config.redis.username.clone(),
            password: config.redis.password.clone(),
            timeout_ms: config.redis.timeout_ms,
            database: config.redis.database,
        };
        let client = RedisClusterClient::connect(cluster, &params).await;
        Ok(Self::with_store(config, Arc::new(QuotaStore::new(client))))
    }

    /// Assemble state around an existing store handle.
    pub fn with_store(config: Arc<Config>, store: Arc<QuotaStore<FqdnCluster>>) -> Self {
        Self {
            config,
            http_client: Client::new(),
            store,
            star_cache: Arc::new(StarCache::new()),
        }
    }
}
