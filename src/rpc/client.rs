//! Provider bundle for one chain.

use std::path::Path;
use std::sync::Arc;

use alloy::providers::{DynProvider, ProviderBuilder, WsConnect};
use anyhow::{Context, Result};
use log::warn;
use serde_json::Value;
use tokio::sync::Mutex;
use url::Url;

use super::{is_cacheable_method, RateLimiter, StaticCache};
use crate::config::PlatformConfig;

/// Shared chain access handle: the WebSocket provider for subscriptions,
/// a call provider for view reads, the chain's rate-limit bucket and its
/// static call cache. Cloning is cheap; every clone shares the bucket and
/// the cache.
#[derive(Clone)]
pub struct ChainClient {
    chain_id: u64,
    ws: DynProvider,
    call: DynProvider,
    limiter: Arc<RateLimiter>,
    cache: Arc<Mutex<StaticCache>>,
}

impl ChainClient {
    pub async fn connect(platform: &PlatformConfig, cache_dir: &Path) -> Result<Self> {
        let ws = ProviderBuilder::new()
            .connect_ws(WsConnect::new(&platform.ws_rpc_url))
            .await
            .with_context(|| format!("WebSocket connect failed for {}", platform.name))?;
        let ws = DynProvider::new(ws);

        // View calls go over HTTP when configured, sparing the WS session.
        let call = match &platform.http_rpc_url {
            Some(raw) => {
                let url = Url::parse(raw)
                    .with_context(|| format!("Invalid HTTP RPC URL for {}", platform.name))?;
                DynProvider::new(ProviderBuilder::new().connect_http(url))
            }
            None => ws.clone(),
        };

        Ok(Self {
            chain_id: platform.chain_id,
            ws,
            call,
            limiter: Arc::new(RateLimiter::new(&platform.rate_limit)),
            cache: Arc::new(Mutex::new(StaticCache::load(cache_dir, platform.chain_id))),
        })
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Provider carrying the pubsub session.
    pub fn ws_provider(&self) -> &DynProvider {
        &self.ws
    }

    /// Provider used for view calls.
    pub fn call_provider(&self) -> &DynProvider {
        &self.call
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Look up a static call result. Returns None for non-cacheable methods.
    pub async fn cache_get(&self, method: &str, key: &str) -> Option<Value> {
        if !is_cacheable_method(method) {
            return None;
        }
        self.cache.lock().await.get(key).cloned()
    }

    /// Record a static call result and persist the cache. Ignored for
    /// methods outside the closed cacheable set.
    pub async fn cache_put(&self, method: &str, key: String, value: Value) {
        if !is_cacheable_method(method) {
            return;
        }
        let mut cache = self.cache.lock().await;
        cache.insert(key, value);
        if let Err(e) = cache.flush() {
            warn!("Chain {}: failed to persist static cache: {e:#}", self.chain_id);
        }
    }
}
