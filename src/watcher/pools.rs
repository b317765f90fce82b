//! Authoritative per-chain pool state (C4).
//!
//! Owns every `VenueState` for its chain. Events are applied strictly in
//! `(block, txIndex, logIndex)` order per pool; unknown pools are
//! introspected from their first event; stale metadata is discarded.

use std::collections::BTreeSet;

use log::{debug, info, warn};
use rustc_hash::FxHashMap;

use crate::dex::{AdapterContext, AdapterRegistry};
use crate::errors::EngineError;
use crate::model::{EventMetadata, PoolEvent, TokenPairOnChain, VenueState};

/// What an event application did to the pool map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The pool was introspected from this event and inserted.
    Added,
    /// An existing pool advanced to this event's state.
    Updated,
}

pub struct PoolStateManager {
    chain_id: u64,
    pools: FxHashMap<String, VenueState>,
    latest_pool_event_meta: FxHashMap<String, EventMetadata>,
    /// Pool ids touched since the last outbound batch, deterministic order.
    pending_updates: BTreeSet<String>,
}

impl PoolStateManager {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            pools: FxHashMap::default(),
            latest_pool_event_meta: FxHashMap::default(),
            pending_updates: BTreeSet::new(),
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn get(&self, pool_id: &str) -> Option<&VenueState> {
        self.pools.get(pool_id)
    }

    pub fn pool_ids(&self) -> Vec<String> {
        self.pools.keys().cloned().collect()
    }

    pub fn states(&self) -> impl Iterator<Item = &VenueState> {
        self.pools.values()
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Pool addresses (or V4 keys) currently monitored, for the log filter.
    pub fn monitored_addresses(&self) -> Vec<String> {
        self.pools
            .values()
            .filter_map(|state| match state {
                VenueState::DexV2Pool(p) => Some(p.address.clone()),
                VenueState::DexV3Pool(p) => Some(p.address.clone()),
                VenueState::DexV4Pool(_) | VenueState::CexMarket(_) => None,
            })
            .collect()
    }

    /// Register a state produced outside the event path (discovery,
    /// explicit add-pool).
    pub fn insert(&mut self, state: VenueState) {
        let id = state.id().to_string();
        if let Some(meta) = state.latest_event_meta() {
            self.latest_pool_event_meta.insert(id.clone(), meta.clone());
        }
        self.pending_updates.insert(id.clone());
        self.pools.insert(id, state);
    }

    pub fn remove(&mut self, pool_id: &str) -> Option<VenueState> {
        self.latest_pool_event_meta.remove(pool_id);
        self.pending_updates.remove(pool_id);
        self.pools.remove(pool_id)
    }

    /// Apply one decoded event.
    ///
    /// Unknown pools are introspected and treated as receiving their first
    /// event; known pools reject anything not strictly newer than what
    /// they already reflect.
    pub async fn apply_event(
        &mut self,
        ctx: &AdapterContext,
        registry: &AdapterRegistry,
        event: &PoolEvent,
    ) -> Result<ApplyOutcome, EngineError> {
        let adapter = registry
            .adapter_for_event(&event.kind)
            .ok_or_else(|| EngineError::UnknownPool(event.pool_id.clone()))?;

        if !self.pools.contains_key(&event.pool_id) {
            let state = adapter.introspect_from_event(ctx, event).await?;
            info!(
                "Chain {}: new pool {} discovered from {} event",
                self.chain_id,
                event.pool_id,
                event.kind.name()
            );
            self.latest_pool_event_meta.insert(event.pool_id.clone(), event.meta.clone());
            self.pending_updates.insert(event.pool_id.clone());
            self.pools.insert(event.pool_id.clone(), state);
            return Ok(ApplyOutcome::Added);
        }

        self.apply_to_existing(registry, event)
    }

    /// The in-order application path for a pool already in the map.
    pub fn apply_to_existing(
        &mut self,
        registry: &AdapterRegistry,
        event: &PoolEvent,
    ) -> Result<ApplyOutcome, EngineError> {
        if let Some(latest) = self.latest_pool_event_meta.get(&event.pool_id) {
            if !event.meta.is_strictly_newer_than(latest) {
                return Err(EngineError::OutdatedEvent);
            }
        }

        let state = self
            .pools
            .get_mut(&event.pool_id)
            .ok_or_else(|| EngineError::UnknownPool(event.pool_id.clone()))?;
        let adapter = registry
            .adapter_for_state(state)
            .ok_or_else(|| EngineError::UnknownPool(event.pool_id.clone()))?;
        adapter.apply_event(state, event)?;
        state.set_latest_event_meta(event.meta.clone());
        self.latest_pool_event_meta.insert(event.pool_id.clone(), event.meta.clone());
        self.pending_updates.insert(event.pool_id.clone());
        Ok(ApplyOutcome::Updated)
    }

    /// True iff the manager and every listed pool agree on the newest
    /// event seen: no stored meta lags the pool's own.
    pub fn are_pools_fresh(&self, pool_ids: &[String]) -> bool {
        pool_ids.iter().all(|id| {
            let pool_meta = self.pools.get(id).and_then(|s| s.latest_event_meta());
            match (self.latest_pool_event_meta.get(id), pool_meta) {
                (Some(stored), Some(own)) => stored.ordering_key() >= own.ordering_key(),
                (None, Some(_)) => false,
                _ => true,
            }
        })
    }

    /// Forget all event ordering. Used during reorg recovery: after every
    /// pool is re-read from the chain, pre-reorg metadata must not shadow
    /// events from the rewound range.
    pub fn reset_event_ordering(&mut self) {
        self.latest_pool_event_meta.clear();
        for state in self.pools.values_mut() {
            match state {
                VenueState::DexV2Pool(p) => p.latest_event_meta = None,
                VenueState::DexV3Pool(p) => p.latest_event_meta = None,
                VenueState::DexV4Pool(p) => p.latest_event_meta = None,
                VenueState::CexMarket(p) => p.latest_event_meta = None,
            }
        }
    }

    /// Ask every adapter for the pools of each configured pair and insert
    /// anything new.
    pub async fn discover_and_register(
        &mut self,
        ctx: &AdapterContext,
        registry: &AdapterRegistry,
        watched_pairs: &[TokenPairOnChain],
    ) -> usize {
        let mut discovered = 0;
        for pair in watched_pairs {
            for adapter in registry.adapters() {
                match adapter.discover(ctx, pair).await {
                    Ok(states) => {
                        for state in states {
                            if self.pools.contains_key(state.id()) {
                                continue;
                            }
                            debug!(
                                "Chain {}: discovered {} on {}",
                                self.chain_id,
                                state.id(),
                                state.venue()
                            );
                            self.insert(state);
                            discovered += 1;
                        }
                    }
                    Err(e) => {
                        warn!(
                            "Chain {}: discovery failed for {} on {}: {e}",
                            self.chain_id,
                            pair.symbol_key(),
                            adapter.venue_name()
                        );
                    }
                }
            }
        }
        discovered
    }

    /// Refresh every pool over RPC. Individual failures are logged and do
    /// not abort the batch.
    pub async fn update_all(&mut self, ctx: &AdapterContext, registry: &AdapterRegistry) {
        let ids: Vec<String> = self.pools.keys().cloned().collect();
        let mut failures = 0usize;

        for id in ids {
            let Some(state) = self.pools.get_mut(&id) else { continue };
            let Some(adapter) = registry.adapter_for_state(state) else {
                warn!("Chain {}: no adapter for {id}", self.chain_id);
                continue;
            };
            match adapter.refresh(ctx, state).await {
                Ok(()) => {
                    self.pending_updates.insert(id);
                }
                Err(e) => {
                    failures += 1;
                    warn!("Chain {}: refresh failed for {id}: {e}", self.chain_id);
                }
            }
        }

        if failures > 0 {
            warn!("Chain {}: update_all completed with {failures} failure(s)", self.chain_id);
        }
    }

    /// Drain the outbound batch: the states touched since the last drain,
    /// in deterministic id order.
    pub fn drain_pending(&mut self) -> Vec<VenueState> {
        let ids = std::mem::take(&mut self.pending_updates);
        ids.iter().filter_map(|id| self.pools.get(id).cloned()).collect()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending_updates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{dex_pool_id, DexV2PoolState, PoolEventKind, Token, VenueId, VenueName};
    use alloy::primitives::U256;

    const POOL: &str = "0xb4e16d0168e52d35cacd2c6185b44281ec28c9dc";

    fn sample_pool() -> VenueState {
        let weth = Token::new(
            1,
            "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2".into(),
            "WETH".into(),
            "Wrapped Ether".into(),
            18,
            true,
        );
        let usdc = Token::new(
            1,
            "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48".into(),
            "USDC".into(),
            "USD Coin".into(),
            6,
            true,
        );
        let pair = TokenPairOnChain::new(weth, usdc);
        let mut pool = DexV2PoolState {
            id: dex_pool_id(1, POOL),
            venue: VenueId::Dex { name: VenueName::UniswapV2, chain_id: 1 },
            pair_id: pair.pair_id(),
            pair,
            address: POOL.into(),
            reserve0: U256::from(10u128.pow(20)),
            reserve1: U256::from(2u128 * 10u128.pow(23)),
            fee_bps: 30,
            spot_price_0_to_1: 0.0,
            spot_price_1_to_0: 0.0,
            latest_event_meta: None,
            total_liquidity_usd: 0.0,
            disabled: false,
        };
        pool.recompute_spot_prices();
        VenueState::DexV2Pool(pool)
    }

    fn meta(block: u64, tx: u32, log: u32) -> EventMetadata {
        EventMetadata {
            block_number: block,
            transaction_index: tx,
            log_index: log,
            transaction_hash: String::from("0xcafe"),
            block_received_timestamp: 0,
        }
    }

    fn sync_event(block: u64, tx: u32, log: u32) -> PoolEvent {
        PoolEvent {
            pool_id: dex_pool_id(1, POOL),
            chain_id: 1,
            address: POOL.into(),
            meta: meta(block, tx, log),
            kind: PoolEventKind::V2Sync {
                reserve0: U256::from(101u128 * 10u128.pow(18)),
                reserve1: U256::from(198u128 * 10u128.pow(21)),
            },
        }
    }

    /// Ordering checks do not need adapters; exercise the metadata gate
    /// directly through the same comparisons `apply_event` uses.
    #[test]
    fn freshness_tracks_manager_vs_pool_meta() {
        let mut manager = PoolStateManager::new(1);
        let mut state = sample_pool();
        state.set_latest_event_meta(meta(100, 0, 0));
        manager.insert(state);
        let ids = manager.pool_ids();

        // Manager learned the same meta through insert.
        assert!(manager.are_pools_fresh(&ids));

        // A pool that claims newer state than the manager recorded is stale.
        if let Some(VenueState::DexV2Pool(p)) = manager.pools.get_mut(&ids[0]) {
            p.latest_event_meta = Some(meta(101, 0, 0));
        }
        assert!(!manager.are_pools_fresh(&ids));
    }

    #[test]
    fn insert_and_drain_round_trip() {
        let mut manager = PoolStateManager::new(1);
        manager.insert(sample_pool());
        assert!(manager.has_pending());

        let batch = manager.drain_pending();
        assert_eq!(batch.len(), 1);
        assert!(!manager.has_pending());
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.monitored_addresses(), vec![POOL.to_string()]);
    }

    #[test]
    fn reset_event_ordering_clears_both_sides() {
        let mut manager = PoolStateManager::new(1);
        let mut state = sample_pool();
        state.set_latest_event_meta(meta(105, 0, 0));
        manager.insert(state);

        manager.reset_event_ordering();
        let ids = manager.pool_ids();
        assert!(manager.are_pools_fresh(&ids));
        assert!(manager.get(&ids[0]).unwrap().latest_event_meta().is_none());
    }

    fn registry() -> AdapterRegistry {
        use crate::config::{DexConfig, DexProtocolConfig, PlatformConfig, TokenSeed};
        let platform = PlatformConfig {
            name: String::from("mainnet"),
            chain_id: 1,
            ws_rpc_url: String::from("wss://unused.example"),
            http_rpc_url: None,
            wrapped_native: TokenSeed {
                address: String::from("0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2"),
                symbol: String::from("WETH"),
                name: String::from("Wrapped Ether"),
                decimals: 18,
            },
            stablecoins: Vec::new(),
            preferred_borrow_tokens: Vec::new(),
            tokens: Vec::new(),
            dexes: vec![DexConfig {
                name: VenueName::UniswapV2,
                protocol: DexProtocolConfig::V2 {
                    factory: String::from("0x5c69bee701ef814a2b6a3edd4b1652cb9cc5aa6f"),
                    router: String::from("0x7a250d5630b4cf539739df2c5dacb4c659f2488d"),
                    init_code_hash: None,
                },
            }],
            watched_pairs: Vec::new(),
            arbitrage: Default::default(),
            rate_limit: Default::default(),
            enabled: true,
        };
        AdapterRegistry::from_platform(&platform).unwrap()
    }

    #[test]
    fn events_apply_in_order_and_stale_metadata_is_dropped() {
        // Spec scenario: apply (100,0,0), then reject (99,5,5).
        let mut manager = PoolStateManager::new(1);
        manager.insert(sample_pool());
        manager.drain_pending();
        let registry = registry();

        let outcome = manager.apply_to_existing(&registry, &sync_event(100, 0, 0)).unwrap();
        assert_eq!(outcome, ApplyOutcome::Updated);
        let spot = manager.get(&dex_pool_id(1, POOL)).unwrap().spot_price_0_to_1().unwrap();
        assert!((spot - 1960.4).abs() < 0.1);
        assert!(manager.has_pending());

        let stale = manager.apply_to_existing(&registry, &sync_event(99, 5, 5)).unwrap_err();
        assert_eq!(stale, EngineError::OutdatedEvent);
        // State still reflects the newest event.
        let spot_after = manager.get(&dex_pool_id(1, POOL)).unwrap().spot_price_0_to_1().unwrap();
        assert_eq!(spot, spot_after);
    }

    #[test]
    fn equal_metadata_does_not_reapply() {
        let mut manager = PoolStateManager::new(1);
        manager.insert(sample_pool());
        let registry = registry();

        manager.apply_to_existing(&registry, &sync_event(100, 0, 0)).unwrap();
        let replay = manager.apply_to_existing(&registry, &sync_event(100, 0, 0)).unwrap_err();
        assert_eq!(replay, EngineError::OutdatedEvent);
    }

    #[test]
    fn after_reorg_reset_rewound_blocks_are_accepted() {
        let mut manager = PoolStateManager::new(1);
        manager.insert(sample_pool());
        let registry = registry();
        manager.apply_to_existing(&registry, &sync_event(105, 0, 0)).unwrap();

        // Without a reset, block 104 would be stale after seeing 105.
        assert_eq!(
            manager.apply_to_existing(&registry, &sync_event(104, 0, 0)).unwrap_err(),
            EngineError::OutdatedEvent
        );

        manager.reset_event_ordering();
        let outcome = manager.apply_to_existing(&registry, &sync_event(104, 0, 0)).unwrap();
        assert_eq!(outcome, ApplyOutcome::Updated);
    }
}
