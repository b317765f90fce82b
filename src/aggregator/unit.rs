//! The aggregator execution unit.
//!
//! Consumes the bus event stream from every watcher, maintains the
//! multi-index store, and drives the price oracle off the store's change
//! notifications. Runs on its own task; watcher units never touch the
//! store directly.

use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bus::BusEvent;
use crate::model::VenueState;

use super::oracle::PriceOracle;
use super::store::AggregatorStore;

pub struct AggregatorUnit {
    store: AggregatorStore,
    oracle: PriceOracle,
    events_rx: mpsc::Receiver<(String, BusEvent)>,
    /// Ids delivered by the change-notification listener, in notification
    /// order. The oracle consumes them after each batch write.
    changed: Arc<Mutex<Vec<String>>>,
}

impl AggregatorUnit {
    /// Build the unit. `anchors` seeds the oracle with `(chain, address)`
    /// stable coins pinned at 1.0.
    pub fn new(
        events_rx: mpsc::Receiver<(String, BusEvent)>,
        anchors: Vec<(u64, String)>,
    ) -> Self {
        let mut store = AggregatorStore::new();
        let mut oracle = PriceOracle::new();
        for (chain_id, address) in anchors {
            oracle.add_anchor(chain_id, &address);
        }

        // The oracle is notification-driven: collect changed ids as the
        // store reports them.
        let changed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&changed);
        store.subscribe(move |change| {
            if let Ok(mut ids) = sink.lock() {
                ids.push(change.state.id().to_string());
            }
        });

        Self { store, oracle, events_rx, changed }
    }

    pub fn store(&self) -> &AggregatorStore {
        &self.store
    }

    pub fn oracle(&self) -> &PriceOracle {
        &self.oracle
    }

    pub async fn run(mut self, cancel: CancellationToken) -> (AggregatorStore, PriceOracle) {
        info!("Aggregator unit running");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = self.events_rx.recv() => {
                    match event {
                        Some((worker, event)) => self.handle_event(&worker, event),
                        None => break,
                    }
                }
            }
        }
        info!("Aggregator unit stopped ({} venue states)", self.store.len());
        (self.store, self.oracle)
    }

    pub fn handle_event(&mut self, worker: &str, event: BusEvent) {
        match event.name.as_str() {
            "pool-update-batch" => {
                let states: Vec<VenueState> = match serde_json::from_value(
                    event.data.get("updatedPoolStates").cloned().unwrap_or_default(),
                ) {
                    Ok(states) => states,
                    Err(e) => {
                        warn!("{worker}: undecodable pool-update-batch: {e}");
                        return;
                    }
                };
                self.absorb_states(states);
            }
            "worker-initialized" => info!("{worker}: initialized"),
            "reorg-detected" => {
                let block = event.data.get("blockNumber").and_then(|v| v.as_u64()).unwrap_or(0);
                warn!("{worker}: reorg detected at block {block}");
            }
            "pool-states-updated" => info!("{worker}: pool states refreshed after reorg"),
            "connection-degraded" => warn!("{worker}: connection degraded"),
            "newBlock" => {
                debug!(
                    "{worker}: block {}",
                    event.data.get("number").and_then(|v| v.as_u64()).unwrap_or(0)
                );
            }
            other => debug!("{worker}: unhandled event {other}"),
        }
    }

    /// Write a batch, then run the oracle over the ids the store reported,
    /// in notification order, and annotate USD liquidity.
    fn absorb_states(&mut self, states: Vec<VenueState>) {
        if states.is_empty() {
            return;
        }
        if let Ok(mut ids) = self.changed.lock() {
            ids.clear();
        }

        self.store.set_batch(states);

        let changed_ids: Vec<String> = match self.changed.lock() {
            Ok(mut ids) => ids.drain(..).collect(),
            Err(_) => Vec::new(),
        };

        let changed_states: Vec<&VenueState> =
            changed_ids.iter().filter_map(|id| self.store.get(id)).collect();
        self.oracle.on_pools_updated(&changed_states);

        for id in &changed_ids {
            let mut annotated = match self.store.get(id) {
                Some(state) => state.clone(),
                None => continue,
            };
            self.oracle.fill_liquidity_usd(&mut annotated);
            let tvl = annotated.total_liquidity_usd();
            self.store.annotate(id, |state| state.set_total_liquidity_usd(tvl));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusEvent;
    use crate::model::{
        dex_pool_id, DexV2PoolState, Token, TokenPairOnChain, VenueId, VenueName,
    };
    use alloy::primitives::U256;
    use serde_json::json;

    const USDC: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";
    const WETH: &str = "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2";

    fn weth_usdc_pool() -> VenueState {
        let usdc = Token::new(1, USDC.into(), "USDC".into(), "USD Coin".into(), 6, true);
        let weth = Token::new(1, WETH.into(), "WETH".into(), "Wrapped Ether".into(), 18, true);
        let pair = TokenPairOnChain::new(usdc, weth);
        VenueState::DexV2Pool(DexV2PoolState {
            id: dex_pool_id(1, "0xb4e16d0168e52d35cacd2c6185b44281ec28c9dc"),
            venue: VenueId::Dex { name: VenueName::UniswapV2, chain_id: 1 },
            pair_id: pair.pair_id(),
            pair,
            address: "0xb4e16d0168e52d35cacd2c6185b44281ec28c9dc".into(),
            reserve0: U256::from(5_000_000_000u64),
            reserve1: U256::from(2u128 * 10u128.pow(18)),
            fee_bps: 30,
            spot_price_0_to_1: 1.0 / 2500.0,
            spot_price_1_to_0: 2500.0,
            latest_event_meta: None,
            total_liquidity_usd: 0.0,
            disabled: false,
        })
    }

    fn unit() -> AggregatorUnit {
        let (_tx, rx) = mpsc::channel(8);
        AggregatorUnit::new(rx, vec![(1, USDC.to_string())])
    }

    #[test]
    fn batches_index_states_and_derive_prices() {
        let mut unit = unit();
        let pool = weth_usdc_pool();
        let id = pool.id().to_string();

        unit.handle_event(
            "mainnet",
            BusEvent {
                name: String::from("pool-update-batch"),
                data: json!({ "updatedPoolStates": [pool] }),
            },
        );

        assert_eq!(unit.store().len(), 1);
        assert!(unit.store().get(&id).is_some());
        // USDC anchored at 1, pool spot prices WETH at 2500.
        let weth_price = unit.oracle().price(1, WETH).unwrap();
        assert!((weth_price - 2500.0).abs() < 1e-6);
        // TVL annotation: 5000 USDC + 2 WETH * 2500.
        let tvl = unit.store().get(&id).unwrap().total_liquidity_usd();
        assert!((tvl - 10_000.0).abs() < 1.0, "tvl {tvl}");
    }

    #[test]
    fn malformed_batches_are_dropped_not_fatal() {
        let mut unit = unit();
        unit.handle_event(
            "mainnet",
            BusEvent {
                name: String::from("pool-update-batch"),
                data: json!({ "updatedPoolStates": "not-an-array" }),
            },
        );
        assert_eq!(unit.store().len(), 0);
    }

    #[test]
    fn wire_round_trip_preserves_big_reserves() {
        // A batch that has been through JSON keeps full U256 precision.
        let mut unit = unit();
        let mut pool = weth_usdc_pool();
        if let VenueState::DexV2Pool(p) = &mut pool {
            p.reserve0 = (U256::from(1u8) << 112) - U256::from(1u8);
        }
        let id = pool.id().to_string();
        let encoded = serde_json::to_value(vec![pool]).unwrap();

        unit.handle_event(
            "mainnet",
            BusEvent {
                name: String::from("pool-update-batch"),
                data: json!({ "updatedPoolStates": encoded }),
            },
        );

        match unit.store().get(&id).unwrap() {
            VenueState::DexV2Pool(p) => {
                assert_eq!(p.reserve0, (U256::from(1u8) << 112) - U256::from(1u8));
            }
            _ => panic!("wrong state shape"),
        }
    }
}
