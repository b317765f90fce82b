//! DEX protocol adapters.
//!
//! One adapter per protocol family, each exposing the same capability set
//! over its own state shape: discover pools for a pair, initialise from an
//! unsolicited event, refresh dynamic state, apply an event, simulate,
//! quote, fee. Shared infrastructure (chain client, token registry) is
//! passed as an explicit context; dispatch is an exhaustive match on the
//! adapter enum.

mod quote;
mod v2;
mod v3;
mod v4;

pub use quote::TradeQuote;
pub use v2::V2Adapter;
pub use v3::V3Adapter;
pub use v4::V4Adapter;

use std::sync::Arc;

use alloy::primitives::U256;

use crate::config::{DexConfig, DexProtocolConfig, PlatformConfig};
use crate::errors::EngineError;
use crate::model::{PoolEvent, PoolEventKind, TokenPairOnChain, VenueState};
use crate::rpc::ChainClient;
use crate::tokens::TokenRegistry;

/// Shared handles every adapter call receives.
#[derive(Clone)]
pub struct AdapterContext {
    pub client: ChainClient,
    pub tokens: Arc<TokenRegistry>,
}

impl AdapterContext {
    pub fn chain_id(&self) -> u64 {
        self.client.chain_id()
    }
}

/// A protocol adapter, dispatched by exhaustive matching.
pub enum DexAdapter {
    V2(V2Adapter),
    V3(V3Adapter),
    V4(V4Adapter),
}

impl DexAdapter {
    pub fn from_config(chain_id: u64, dex: &DexConfig) -> Result<Self, EngineError> {
        match &dex.protocol {
            DexProtocolConfig::V2 { factory, router, .. } => {
                Ok(DexAdapter::V2(V2Adapter::new(dex.name, chain_id, factory, router)?))
            }
            DexProtocolConfig::V3 { factory, quoter, .. } => {
                Ok(DexAdapter::V3(V3Adapter::new(dex.name, chain_id, factory, quoter)?))
            }
            DexProtocolConfig::V4 { pool_manager, state_view, quoter } => Ok(DexAdapter::V4(
                V4Adapter::new(dex.name, chain_id, pool_manager, state_view, quoter)?,
            )),
        }
    }

    /// Find every pool this venue offers for the pair. "No pool" is an
    /// empty result, not an error.
    pub async fn discover(
        &self,
        ctx: &AdapterContext,
        pair: &TokenPairOnChain,
    ) -> Result<Vec<VenueState>, EngineError> {
        match self {
            DexAdapter::V2(a) => a.discover(ctx, pair).await,
            DexAdapter::V3(a) => a.discover(ctx, pair).await,
            DexAdapter::V4(a) => a.discover(ctx, pair).await,
        }
    }

    /// Build a fully initialised state from the first event of an unknown
    /// pool.
    pub async fn introspect_from_event(
        &self,
        ctx: &AdapterContext,
        event: &PoolEvent,
    ) -> Result<VenueState, EngineError> {
        match self {
            DexAdapter::V2(a) => a.introspect_from_event(ctx, event).await,
            DexAdapter::V3(a) => a.introspect_from_event(ctx, event).await,
            DexAdapter::V4(a) => a.introspect_from_event(ctx, event).await,
        }
    }

    /// Re-read the dynamic fields of an existing pool over RPC.
    pub async fn refresh(
        &self,
        ctx: &AdapterContext,
        state: &mut VenueState,
    ) -> Result<(), EngineError> {
        match self {
            DexAdapter::V2(a) => a.refresh(ctx, state).await,
            DexAdapter::V3(a) => a.refresh(ctx, state).await,
            DexAdapter::V4(a) => a.refresh(ctx, state).await,
        }
    }

    /// Apply a decoded event to an owned state. Pure; no I/O.
    pub fn apply_event(&self, state: &mut VenueState, event: &PoolEvent) -> Result<(), EngineError> {
        match self {
            DexAdapter::V2(a) => a.apply_event(state, event),
            DexAdapter::V3(a) => a.apply_event(state, event),
            DexAdapter::V4(a) => a.apply_event(state, event),
        }
    }

    /// Locally simulate a swap against the stored state.
    pub fn simulate(
        &self,
        state: &VenueState,
        amount_in: U256,
        zero_for_one: bool,
    ) -> Result<U256, EngineError> {
        match self {
            DexAdapter::V2(a) => a.simulate(state, amount_in, zero_for_one),
            DexAdapter::V3(a) => a.simulate(state, amount_in, zero_for_one),
            DexAdapter::V4(a) => a.simulate(state, amount_in, zero_for_one),
        }
    }

    /// Produce an executable-quality quote.
    pub async fn quote(
        &self,
        ctx: &AdapterContext,
        state: &VenueState,
        amount_in: U256,
        zero_for_one: bool,
    ) -> Result<TradeQuote, EngineError> {
        match self {
            DexAdapter::V2(a) => a.quote(state, amount_in, zero_for_one),
            DexAdapter::V3(a) => a.quote(ctx, state, amount_in, zero_for_one).await,
            DexAdapter::V4(a) => a.quote(ctx, state, amount_in, zero_for_one).await,
        }
    }

    pub fn fee_percent(&self, state: &VenueState) -> f64 {
        match self {
            DexAdapter::V2(a) => a.fee_percent(state),
            DexAdapter::V3(a) => a.fee_percent(state),
            DexAdapter::V4(a) => a.fee_percent(state),
        }
    }

    pub fn venue_name(&self) -> crate::model::VenueName {
        match self {
            DexAdapter::V2(a) => a.venue_name(),
            DexAdapter::V3(a) => a.venue_name(),
            DexAdapter::V4(a) => a.venue_name(),
        }
    }

    /// Whether this adapter understands the given event kind.
    fn handles_kind(&self, kind: &PoolEventKind) -> bool {
        matches!(
            (self, kind),
            (DexAdapter::V2(_), PoolEventKind::V2Sync { .. })
                | (
                    DexAdapter::V3(_),
                    PoolEventKind::V3Swap { .. }
                        | PoolEventKind::V3Mint { .. }
                        | PoolEventKind::V3Burn { .. }
                )
                | (
                    DexAdapter::V4(_),
                    PoolEventKind::V4Swap { .. } | PoolEventKind::V4ModifyLiquidity { .. }
                )
        )
    }
}

/// All adapters configured for one chain.
pub struct AdapterRegistry {
    adapters: Vec<DexAdapter>,
}

impl AdapterRegistry {
    pub fn from_platform(platform: &PlatformConfig) -> Result<Self, EngineError> {
        let adapters = platform
            .dexes
            .iter()
            .map(|dex| DexAdapter::from_config(platform.chain_id, dex))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { adapters })
    }

    pub fn adapters(&self) -> &[DexAdapter] {
        &self.adapters
    }

    pub fn adapter_for_venue(&self, name: crate::model::VenueName) -> Option<&DexAdapter> {
        self.adapters.iter().find(|adapter| adapter.venue_name() == name)
    }

    pub fn adapter_for_state(&self, state: &VenueState) -> Option<&DexAdapter> {
        self.adapter_for_venue(state.venue().name())
    }

    /// The adapter responsible for an unsolicited event, chosen by kind.
    pub fn adapter_for_event(&self, kind: &PoolEventKind) -> Option<&DexAdapter> {
        self.adapters.iter().find(|adapter| adapter.handles_kind(kind))
    }
}
