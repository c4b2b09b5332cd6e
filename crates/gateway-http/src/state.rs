//! Shared application state handed to every request: the parsed config,
//! the resolved route table, and the process-wide caches/pools the
//! pipeline stages share across requests.

use std::collections::HashMap;
use std::sync::Arc;

use gateway_config::{FileStoreConfig, GatewayConfig};
use gateway_core::cache::{ProxyCacheEntry, SingleflightCache};
use gateway_core::error::Result;
use gateway_core::file_store::{LocalStore, StorePool};
use gateway_core::query_chain::ConnectionFactory;
use gateway_core::route_resolver::RouteTable;

use crate::auth::discovery::DiscoveryCache;
use crate::auth::userinfo::UserInfoCache;
use crate::build_route_table;

/// Everything a request handler needs, shared across the whole server.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub routes: Arc<RouteTable>,
    pub connection_strings: Arc<HashMap<String, String>>,
    pub connection_factory: Arc<ConnectionFactory>,
    pub query_cache: Arc<SingleflightCache<String, gateway_core::cache::DbCacheEntry>>,
    pub proxy_cache: Arc<SingleflightCache<String, ProxyCacheEntry>>,
    pub discovery_cache: Arc<DiscoveryCache>,
    pub userinfo_cache: Arc<UserInfoCache>,
    pub store_pool: Arc<StorePool>,
    pub http_client: reqwest::Client,
}

impl AppState {
    /// Build the process-wide state from a fully parsed config: the route
    /// table, connection-string map, process-wide caches, and the store
    /// pool (local stores are wired directly; SFTP stores have no concrete
    /// implementor in this workspace — see `gateway_core::file_store`).
    pub fn from_config(config: GatewayConfig) -> Result<Self> {
        let routes = build_route_table(&config)?;
        let connection_strings = config
            .connection_strings
            .iter()
            .map(|(name, entry)| (name.clone(), entry.value.clone()))
            .collect();

        let mut store_pool = StorePool::new();
        for (name, store) in &config.file_management.stores {
            match store {
                FileStoreConfig::Local { base_path } => {
                    store_pool.register(name.clone(), Arc::new(LocalStore { base_path: base_path.into() }));
                }
                FileStoreConfig::Sftp { .. } => {
                    tracing::warn!(store = %name, "SFTP store configured but no concrete FileStore implementor is wired; commits to it will fail at lookup time");
                }
            }
        }

        let http_client = reqwest::Client::new();

        Ok(Self {
            config: Arc::new(config),
            routes: Arc::new(routes),
            connection_strings: Arc::new(connection_strings),
            connection_factory: Arc::new(ConnectionFactory::new()),
            query_cache: Arc::new(SingleflightCache::new()),
            proxy_cache: Arc::new(SingleflightCache::new()),
            discovery_cache: Arc::new(DiscoveryCache::new(http_client.clone())),
            userinfo_cache: Arc::new(UserInfoCache::new(http_client.clone())),
            store_pool: Arc::new(store_pool),
            http_client,
        })
    }
}
