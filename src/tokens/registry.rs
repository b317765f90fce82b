//! Token registry with on-chain ERC-20 introspection.
//!
//! Known tokens come from the configured trusted list; anything else is
//! read from the chain exactly once (name, symbol, decimals through one
//! multicall) and stored untrusted. Contracts that fail introspection are
//! negatively cached so they are not retried on every event.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use alloy::primitives::Address;
use alloy::providers::MULTICALL3_ADDRESS;
use alloy::sol_types::SolCall;
use log::warn;
use moka::future::Cache;
use rustc_hash::FxHashMap;
use serde_json::json;

use crate::abis::{Call3, IMulticall3, IERC20};
use crate::config::PlatformConfig;
use crate::errors::EngineError;
use crate::model::Token;
use crate::rpc::{cache_key, ChainClient};

/// Timeout for the introspection multicall.
const RPC_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Failed introspections are suppressed for an hour, then retried in case
/// the contract was only temporarily unreadable.
const INVALID_TOKEN_TTL: Duration = Duration::from_secs(3600);

pub struct TokenRegistry {
    chain_id: u64,
    client: ChainClient,
    tokens: RwLock<FxHashMap<String, Token>>,
    invalid: Cache<String, ()>,
}

impl TokenRegistry {
    /// Seed the registry with the platform's trusted list and wrapped
    /// native token.
    pub fn new(client: ChainClient, platform: &PlatformConfig) -> Arc<Self> {
        let mut tokens = FxHashMap::default();

        let mut seeds = platform.tokens.clone();
        seeds.push(platform.wrapped_native.clone());
        for seed in seeds {
            let token = Token::new(
                platform.chain_id,
                seed.address,
                seed.symbol,
                seed.name,
                seed.decimals,
                true,
            );
            tokens.insert(token.address.clone(), token);
        }

        let invalid = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(INVALID_TOKEN_TTL)
            .build();

        Arc::new(Self { chain_id: platform.chain_id, client, tokens: RwLock::new(tokens), invalid })
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn get_by_address(&self, address: &str) -> Option<Token> {
        let key = address.to_lowercase();
        self.tokens.read().ok()?.get(&key).cloned()
    }

    /// Advisory lookup: the first registered token carrying this symbol.
    pub fn get_by_symbol(&self, symbol: &str) -> Option<Token> {
        self.tokens.read().ok()?.values().find(|t| t.symbol == symbol).cloned()
    }

    /// Resolve a token, introspecting the contract on first sight.
    pub async fn ensure_registered(&self, address: Address) -> Result<Token, EngineError> {
        let key = format!("{address:#x}");

        if let Some(token) = self.get_by_address(&key) {
            return Ok(token);
        }
        if self.invalid.contains_key(&key) {
            return Err(EngineError::IntrospectionFailed(key));
        }

        let token = match self.introspect(address, &key).await {
            Ok(token) => token,
            Err(e) => {
                self.invalid.insert(key.clone(), ()).await;
                return Err(e);
            }
        };

        warn!(
            "Chain {}: registered unknown token {} ({}) as untrusted",
            self.chain_id, token.symbol, token.address
        );
        if let Ok(mut map) = self.tokens.write() {
            map.insert(token.address.clone(), token.clone());
        }
        Ok(token)
    }

    /// One multicall carrying name(), symbol() and decimals(). All three
    /// must succeed for the token to register.
    async fn introspect(&self, address: Address, key: &str) -> Result<Token, EngineError> {
        // The metadata methods are in the static-cache set; a warm cache
        // avoids the RPC entirely.
        if let Some(token) = self.from_static_cache(key).await {
            return Ok(token);
        }

        let erc20 = IERC20::new(address, self.client.call_provider());
        let calls = vec![
            Call3 { target: address, allowFailure: true, callData: erc20.name().calldata().to_vec().into() },
            Call3 { target: address, allowFailure: true, callData: erc20.symbol().calldata().to_vec().into() },
            Call3 {
                target: address,
                allowFailure: true,
                callData: erc20.decimals().calldata().to_vec().into(),
            },
        ];

        let multicall = IMulticall3::new(MULTICALL3_ADDRESS, self.client.call_provider());
        let _permit = self.client.limiter().acquire().await;
        let results = tokio::time::timeout(RPC_CALL_TIMEOUT, multicall.aggregate3(calls).call())
            .await
            .map_err(|_| EngineError::Rpc(String::from("introspection multicall timeout")))?
            .map_err(|e| EngineError::Rpc(e.to_string()))?;

        let [name_res, symbol_res, decimals_res] = results.as_slice() else {
            return Err(EngineError::IntrospectionFailed(key.to_string()));
        };
        if !(name_res.success && symbol_res.success && decimals_res.success) {
            return Err(EngineError::IntrospectionFailed(key.to_string()));
        }

        let name = IERC20::nameCall::abi_decode_returns(&name_res.returnData)
            .map_err(|_| EngineError::IntrospectionFailed(key.to_string()))?;
        let symbol = IERC20::symbolCall::abi_decode_returns(&symbol_res.returnData)
            .map_err(|_| EngineError::IntrospectionFailed(key.to_string()))?;
        let decimals = IERC20::decimalsCall::abi_decode_returns(&decimals_res.returnData)
            .map_err(|_| EngineError::IntrospectionFailed(key.to_string()))?;

        if decimals > 24 {
            return Err(EngineError::IntrospectionFailed(key.to_string()));
        }

        self.to_static_cache(key, &name, &symbol, decimals).await;

        Ok(Token::new(self.chain_id, key.to_string(), symbol, name, decimals, false))
    }

    async fn from_static_cache(&self, address: &str) -> Option<Token> {
        let args = json!([]);
        let name = self.client.cache_get("name", &cache_key(address, "name", &args)).await?;
        let symbol = self.client.cache_get("symbol", &cache_key(address, "symbol", &args)).await?;
        let decimals =
            self.client.cache_get("decimals", &cache_key(address, "decimals", &args)).await?;

        Some(Token::new(
            self.chain_id,
            address.to_string(),
            symbol.as_str()?.to_string(),
            name.as_str()?.to_string(),
            u8::try_from(decimals.as_u64()?).ok()?,
            false,
        ))
    }

    async fn to_static_cache(&self, address: &str, name: &str, symbol: &str, decimals: u8) {
        let args = json!([]);
        self.client.cache_put("name", cache_key(address, "name", &args), json!(name)).await;
        self.client.cache_put("symbol", cache_key(address, "symbol", &args), json!(symbol)).await;
        self.client
            .cache_put("decimals", cache_key(address, "decimals", &args), json!(decimals))
            .await;
    }
}
