// 12.1 engine/core.rs: main engine. holds the store, the clock and every component.

use std::sync::Arc;

use super::config::EngineConfig;
use super::results::EngineError;
use crate::clearing::ClearingEngine;
use crate::clock::{Clock, SystemClock};
use crate::config::MarketConfig;
use crate::contract::ContractRegistry;
use crate::events::{Event, EventLog};
use crate::ledger::BidLedger;
use crate::pnl::PnlEngine;
use crate::price_feed::PriceSource;
use crate::store::MarketStore;

/** 12.1: main engine struct. components share one store */
pub struct Engine {
    pub(super) config: EngineConfig,
    pub(super) store: Arc<MarketStore>,
    pub(super) events: Arc<EventLog>,
    pub(super) ledger: BidLedger,
    pub(super) clearing: ClearingEngine,
    pub(super) contracts: ContractRegistry,
    pub(super) pnl: PnlEngine,
}

impl Engine {
    /// Engine on the wall clock
    pub fn new(config: EngineConfig, prices: Arc<dyn PriceSource>) -> Result<Self, EngineError> {
        Self::with_clock(config, prices, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: EngineConfig,
        prices: Arc<dyn PriceSource>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let store = Arc::new(MarketStore::new());
        let events = Arc::new(EventLog::new(config.max_events).with_echo(config.verbose));
        let market = Arc::new(config.market.clone());

        Ok(Self {
            ledger: BidLedger::new(Arc::clone(&store), Arc::clone(&clock), market, Arc::clone(&events)),
            clearing: ClearingEngine::new(Arc::clone(&store), Arc::clone(&clock), Arc::clone(&events)),
            contracts: ContractRegistry::new(Arc::clone(&store), Arc::clone(&clock), Arc::clone(&events)),
            pnl: PnlEngine::new(Arc::clone(&store), prices, clock, Arc::clone(&events)),
            config,
            store,
            events,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn market(&self) -> &MarketConfig {
        &self.config.market
    }

    pub fn store(&self) -> &Arc<MarketStore> {
        &self.store
    }

    pub fn ledger(&self) -> &BidLedger {
        &self.ledger
    }

    pub fn clearing(&self) -> &ClearingEngine {
        &self.clearing
    }

    pub fn contract_registry(&self) -> &ContractRegistry {
        &self.contracts
    }

    pub fn pnl_engine(&self) -> &PnlEngine {
        &self.pnl
    }

    /// Audit trail, oldest first
    pub fn events(&self) -> Vec<Event> {
        self.events.events()
    }

    pub fn recent_events(&self, count: usize) -> Vec<Event> {
        self.events.recent(count)
    }
}
