//! Multi-indexed venue-state store.
//!
//! The primary map owns the aggregator's copy of every venue state;
//! secondary indices are exact inverses of it. Listeners run synchronously
//! on the writing thread, in registration order, after the indices are
//! updated and before the write call returns.

use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};

use log::{error, warn};
use rustc_hash::FxHashMap;

use crate::model::{canonical_pair_id, VenueName, VenueState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Add,
    Update,
    Remove,
}

/// A change notification; carries the state after the write (for removes,
/// the state that was evicted).
pub struct VenueChange {
    pub kind: ChangeKind,
    pub state: VenueState,
}

pub type ListenerId = u64;

type Listener = Box<dyn Fn(&VenueChange) + Send>;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct StoreStats {
    pub total: usize,
    pub disabled: usize,
    pub by_chain: Vec<(u64, usize)>,
    pub by_venue: Vec<(VenueName, usize)>,
}

#[derive(Default)]
pub struct AggregatorStore {
    states: FxHashMap<String, VenueState>,
    // BTreeSet keeps membership iteration deterministic, which in turn
    // makes oracle propagation deterministic.
    by_chain: FxHashMap<u64, BTreeSet<String>>,
    by_token: FxHashMap<String, BTreeSet<String>>,
    by_venue: FxHashMap<VenueName, BTreeSet<String>>,
    by_address_pair: FxHashMap<String, BTreeSet<String>>,
    by_symbol_pair: FxHashMap<String, BTreeSet<String>>,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener: ListenerId,
}

impl AggregatorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a state. Indices are only touched on insert: a
    /// venue's identity (chain, tokens, venue, pair) never changes across
    /// updates.
    pub fn set(&mut self, state: VenueState) {
        let id = state.id().to_string();
        let inserting = !self.states.contains_key(&id);

        if inserting {
            self.index(&id, &state);
        }
        self.states.insert(id.clone(), state.clone());

        let kind = if inserting { ChangeKind::Add } else { ChangeKind::Update };
        self.notify(&VenueChange { kind, state });
    }

    pub fn set_batch(&mut self, states: Vec<VenueState>) {
        for state in states {
            self.set(state);
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<VenueState> {
        let state = self.states.remove(id)?;
        self.unindex(id, &state);
        self.notify(&VenueChange { kind: ChangeKind::Remove, state: state.clone() });
        Some(state)
    }

    /// Flip the disabled flag in place. Deliberately silent: consumers see
    /// disablement only when they next read.
    pub fn set_disabled(&mut self, id: &str, disabled: bool) {
        if let Some(state) = self.states.get_mut(id) {
            state.set_disabled(disabled);
        }
    }

    /// Silent in-place annotation (oracle USD-liquidity fill). Like
    /// `set_disabled`, this does not notify listeners.
    pub fn annotate(&mut self, id: &str, annotate: impl FnOnce(&mut VenueState)) {
        if let Some(state) = self.states.get_mut(id) {
            annotate(state);
        }
    }

    pub fn get(&self, id: &str) -> Option<&VenueState> {
        self.states.get(id)
    }

    pub fn get_all(&self) -> impl Iterator<Item = &VenueState> {
        self.states.values()
    }

    pub fn get_active(&self) -> Vec<&VenueState> {
        self.states.values().filter(|s| !s.disabled()).collect()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn by_chain(&self, chain_id: u64) -> Vec<&VenueState> {
        self.resolve(self.by_chain.get(&chain_id))
    }

    /// Lookup by `(chain, token address)`.
    pub fn by_token(&self, chain_id: u64, address: &str) -> Vec<&VenueState> {
        let key = format!("{}:{}", chain_id, address.to_lowercase());
        self.resolve(self.by_token.get(&key))
    }

    pub fn by_venue(&self, name: VenueName) -> Vec<&VenueState> {
        self.resolve(self.by_venue.get(&name))
    }

    /// Lookup by unordered address pair on a chain.
    pub fn by_pair(&self, chain_id: u64, address_a: &str, address_b: &str) -> Vec<&VenueState> {
        let lower_a = address_a.to_lowercase();
        let lower_b = address_b.to_lowercase();
        let (a, b) = sorted(&lower_a, &lower_b);
        let key = format!("{chain_id}:{a}:{b}");
        self.resolve(self.by_address_pair.get(&key))
    }

    /// Lookup by unordered symbol pair across every venue.
    pub fn by_symbol_pair(&self, symbol_a: &str, symbol_b: &str) -> Vec<&VenueState> {
        let key = canonical_pair_id(symbol_a, symbol_b);
        self.resolve(self.by_symbol_pair.get(&key))
    }

    /// Register a synchronous listener; the returned id unsubscribes it.
    pub fn subscribe(&mut self, listener: impl Fn(&VenueChange) + Send + 'static) -> ListenerId {
        let id = self.next_listener;
        self.next_listener += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: ListenerId) {
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
    }

    /// Aggregate counts, computed by scanning the primary map.
    pub fn stats(&self) -> StoreStats {
        let mut by_chain: FxHashMap<u64, usize> = FxHashMap::default();
        let mut by_venue: FxHashMap<VenueName, usize> = FxHashMap::default();
        let mut disabled = 0;

        for state in self.states.values() {
            if let Some(chain) = state.chain_id() {
                *by_chain.entry(chain).or_default() += 1;
            }
            *by_venue.entry(state.venue().name()).or_default() += 1;
            if state.disabled() {
                disabled += 1;
            }
        }

        let mut by_chain: Vec<_> = by_chain.into_iter().collect();
        by_chain.sort_unstable();
        let mut by_venue: Vec<_> = by_venue.into_iter().collect();
        by_venue.sort_unstable_by_key(|(name, _)| name.as_str());

        StoreStats { total: self.states.len(), disabled, by_chain, by_venue }
    }

    fn resolve(&self, ids: Option<&BTreeSet<String>>) -> Vec<&VenueState> {
        ids.map(|set| set.iter().filter_map(|id| self.states.get(id)).collect())
            .unwrap_or_default()
    }

    fn index(&mut self, id: &str, state: &VenueState) {
        if let Some(chain) = state.chain_id() {
            self.by_chain.entry(chain).or_default().insert(id.to_string());
        }
        self.by_venue.entry(state.venue().name()).or_default().insert(id.to_string());
        self.by_symbol_pair
            .entry(state.pair_id().to_string())
            .or_default()
            .insert(id.to_string());

        if let (Some(pair), Some(chain)) = (state.pair(), state.chain_id()) {
            for token in [&pair.token0, &pair.token1] {
                self.by_token.entry(token.key()).or_default().insert(id.to_string());
            }
            let key = format!("{chain}:{}", pair.address_key());
            self.by_address_pair.entry(key).or_default().insert(id.to_string());
        }
    }

    fn unindex(&mut self, id: &str, state: &VenueState) {
        if let Some(chain) = state.chain_id() {
            prune(&mut self.by_chain, &chain, id);
        }
        prune(&mut self.by_venue, &state.venue().name(), id);
        prune(&mut self.by_symbol_pair, &state.pair_id().to_string(), id);

        if let (Some(pair), Some(chain)) = (state.pair(), state.chain_id()) {
            for token in [&pair.token0, &pair.token1] {
                prune(&mut self.by_token, &token.key(), id);
            }
            let key = format!("{chain}:{}", pair.address_key());
            prune(&mut self.by_address_pair, &key, id);
        }
    }

    /// Listeners run in registration order on the writer's thread; a
    /// panicking listener is logged and skipped, never aborting the write.
    fn notify(&self, change: &VenueChange) {
        for (id, listener) in &self.listeners {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(change))) {
                let what = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| String::from("unknown panic"));
                error!("store listener {id} panicked: {what}");
            }
        }
    }
}

fn sorted<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn prune<K: std::hash::Hash + Eq + Clone>(
    index: &mut FxHashMap<K, BTreeSet<String>>,
    key: &K,
    id: &str,
) {
    if let Some(set) = index.get_mut(key) {
        set.remove(id);
        if set.is_empty() {
            index.remove(key);
        }
    } else {
        warn!("index entry missing during unindex");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        dex_pool_id, DexV2PoolState, Token, TokenPairOnChain, VenueId, VenueName,
    };
    use alloy::primitives::U256;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const WETH: &str = "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2";
    const USDC: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";

    fn sample_pool(chain_id: u64, address: &str) -> VenueState {
        let weth = Token::new(chain_id, WETH.into(), "WETH".into(), "Wrapped Ether".into(), 18, true);
        let usdc = Token::new(chain_id, USDC.into(), "USDC".into(), "USD Coin".into(), 6, true);
        let pair = TokenPairOnChain::new(weth, usdc);
        let mut pool = DexV2PoolState {
            id: dex_pool_id(chain_id, address),
            venue: VenueId::Dex { name: VenueName::UniswapV3, chain_id },
            pair_id: pair.pair_id(),
            pair,
            address: address.to_string(),
            reserve0: U256::from(1_000_000u64),
            reserve1: U256::from(2_000_000u64),
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

    #[test]
    fn every_index_resolves_and_empties_after_remove() {
        let mut store = AggregatorStore::new();
        let pool = sample_pool(1, "0xaaa0000000000000000000000000000000000001");
        let id = pool.id().to_string();
        store.set(pool);

        assert_eq!(store.by_chain(1).len(), 1);
        assert_eq!(store.by_token(1, WETH).len(), 1);
        assert_eq!(store.by_token(1, &WETH.to_uppercase().replace("0X", "0x")).len(), 1);
        assert_eq!(store.by_venue(VenueName::UniswapV3).len(), 1);
        assert_eq!(store.by_pair(1, WETH, USDC).len(), 1);
        assert_eq!(store.by_symbol_pair("USDC", "WETH").len(), 1);
        assert_eq!(store.by_symbol_pair("WETH", "USDC").len(), 1);

        store.remove(&id);
        assert!(store.by_chain(1).is_empty());
        assert!(store.by_token(1, WETH).is_empty());
        assert!(store.by_venue(VenueName::UniswapV3).is_empty());
        assert!(store.by_pair(1, WETH, USDC).is_empty());
        assert!(store.by_symbol_pair("USDC", "WETH").is_empty());
        assert!(store.get(&id).is_none());
    }

    #[test]
    fn double_set_is_one_add_then_one_update_with_stable_indices() {
        let mut store = AggregatorStore::new();
        let adds = Arc::new(AtomicUsize::new(0));
        let updates = Arc::new(AtomicUsize::new(0));
        let (a, u) = (Arc::clone(&adds), Arc::clone(&updates));
        store.subscribe(move |change| match change.kind {
            ChangeKind::Add => {
                a.fetch_add(1, Ordering::SeqCst);
            }
            ChangeKind::Update => {
                u.fetch_add(1, Ordering::SeqCst);
            }
            ChangeKind::Remove => {}
        });

        let pool = sample_pool(1, "0xaaa0000000000000000000000000000000000001");
        store.set(pool.clone());
        let chain_index_size = store.by_chain(1).len();
        store.set(pool);

        assert_eq!(adds.load(Ordering::SeqCst), 1);
        assert_eq!(updates.load(Ordering::SeqCst), 1);
        assert_eq!(store.by_chain(1).len(), chain_index_size);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn listeners_fire_in_registration_order_and_survive_panics() {
        let mut store = AggregatorStore::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let first = Arc::clone(&order);
        store.subscribe(move |_| first.lock().unwrap().push(1));
        store.subscribe(|_| panic!("listener bug"));
        let third = Arc::clone(&order);
        store.subscribe(move |_| third.lock().unwrap().push(3));

        store.set(sample_pool(1, "0xaaa0000000000000000000000000000000000001"));
        assert_eq!(*order.lock().unwrap(), vec![1, 3]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let mut store = AggregatorStore::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let id = store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.set(sample_pool(1, "0xaaa0000000000000000000000000000000000001"));
        store.unsubscribe(id);
        store.set(sample_pool(1, "0xaaa0000000000000000000000000000000000002"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn set_disabled_does_not_notify_but_filters_active() {
        let mut store = AggregatorStore::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let pool = sample_pool(1, "0xaaa0000000000000000000000000000000000001");
        let id = pool.id().to_string();
        store.set(pool);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        store.set_disabled(&id, true);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(store.get_active().is_empty());
        assert_eq!(store.stats().disabled, 1);
    }

    #[test]
    fn stats_count_by_chain_and_venue() {
        let mut store = AggregatorStore::new();
        store.set(sample_pool(1, "0xaaa0000000000000000000000000000000000001"));
        store.set(sample_pool(1, "0xaaa0000000000000000000000000000000000002"));
        store.set(sample_pool(137, "0xaaa0000000000000000000000000000000000003"));

        let stats = store.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_chain, vec![(1, 2), (137, 1)]);
        assert_eq!(stats.by_venue, vec![(VenueName::UniswapV3, 3)]);
    }
}
