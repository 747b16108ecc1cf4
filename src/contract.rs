//! Contracts and the contract registry.
//!
//! Clearing creates one contract per matched bid fragment, always ACTIVE. The
//! registry is the only place a contract ever changes: ACTIVE to COMPLETED,
//! after which it is immutable.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::events::{ContractCompletedEvent, EventLog, EventPayload};
use crate::store::MarketStore;
use crate::types::{BidId, ContractId, Hour, Money, Price, Side, Timestamp, TradingDate, UserId};

/// Contract lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractStatus {
    Active,
    Completed,
}

/// A matched fragment of one bid
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub id: ContractId,
    pub originating_bid_id: BidId,
    /// Opposing bid of the same match
    pub counterparty_bid_id: BidId,
    pub user_id: UserId,
    pub trading_date: TradingDate,
    pub hour: Hour,
    pub side: Side,
    pub quantity: Decimal,
    pub execution_price: Price,
    pub status: ContractStatus,
    pub created_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

impl Contract {
    pub fn is_active(&self) -> bool {
        self.status == ContractStatus::Active
    }

    pub fn notional(&self) -> Money {
        Money::new(self.execution_price.value() * self.quantity)
    }
}

/// Query filter. every None matches anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContractFilter {
    pub status: Option<ContractStatus>,
    pub user_id: Option<UserId>,
    pub trading_date: Option<TradingDate>,
    pub hour: Option<Hour>,
}

impl ContractFilter {
    pub fn for_user(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    pub fn on_date(trading_date: TradingDate) -> Self {
        Self {
            trading_date: Some(trading_date),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: ContractStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_hour(mut self, hour: Hour) -> Self {
        self.hour = Some(hour);
        self
    }

    pub fn matches(&self, contract: &Contract) -> bool {
        self.status.map_or(true, |s| contract.status == s)
            && self.user_id.map_or(true, |u| contract.user_id == u)
            && self.trading_date.map_or(true, |d| contract.trading_date == d)
            && self.hour.map_or(true, |h| contract.hour == h)
    }
}

/// Contract counts per status for one trading date
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractStatusCounts {
    pub total: usize,
    pub active: usize,
    pub completed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractError {
    #[error("Contract {0} not found")]
    NotFound(ContractId),
}

/// Owns contract status transitions
pub struct ContractRegistry {
    store: Arc<MarketStore>,
    clock: Arc<dyn Clock>,
    events: Arc<EventLog>,
}

impl ContractRegistry {
    pub fn new(store: Arc<MarketStore>, clock: Arc<dyn Clock>, events: Arc<EventLog>) -> Self {
        Self { store, clock, events }
    }

    /// Complete one contract. returns 1 if it moved, 0 if it was already completed.
    pub fn complete(&self, contract_id: ContractId) -> Result<usize, ContractError> {
        let now = self.clock.now();
        let completed = self.store.complete_contract(contract_id, Timestamp::from(now))?;

        match &completed {
            Some(contract) => {
                debug!(contract = %contract_id, "contract completed");
                self.record_completion(contract, now);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    /// Complete every ACTIVE contract of a trading date in one atomic pass.
    pub fn complete_all_active(&self, trading_date: TradingDate) -> usize {
        let now = self.clock.now();
        let completed = self.store.complete_active_on(trading_date, Timestamp::from(now));

        for contract in &completed {
            self.record_completion(contract, now);
        }

        info!(%trading_date, count = completed.len(), "completed active contracts");
        completed.len()
    }

    pub fn get(&self, contract_id: ContractId) -> Option<Contract> {
        self.store.contract(contract_id)
    }

    /// Contracts matching the filter, ordered by id
    pub fn query(&self, filter: ContractFilter) -> Vec<Contract> {
        self.store.contracts_matching(&filter)
    }

    pub fn status_counts(&self, trading_date: TradingDate) -> ContractStatusCounts {
        self.query(ContractFilter::on_date(trading_date))
            .iter()
            .fold(ContractStatusCounts::default(), |mut acc, c| {
                acc.total += 1;
                match c.status {
                    ContractStatus::Active => acc.active += 1,
                    ContractStatus::Completed => acc.completed += 1,
                }
                acc
            })
    }

    fn record_completion(&self, contract: &Contract, at: chrono::DateTime<chrono::Utc>) {
        self.events.record(
            at,
            EventPayload::ContractCompleted(ContractCompletedEvent {
                contract_id: contract.id,
                user_id: contract.user_id,
                trading_date: contract.trading_date,
                hour: contract.hour,
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn day() -> TradingDate {
        NaiveDate::from_ymd_opt(2025, 9, 1).unwrap()
    }

    fn contract(user: u64, hour: u8, side: Side) -> Contract {
        Contract {
            id: ContractId(0),
            originating_bid_id: BidId(1),
            counterparty_bid_id: BidId(2),
            user_id: UserId(user),
            trading_date: day(),
            hour: Hour::new(hour).unwrap(),
            side,
            quantity: dec!(10),
            execution_price: Price::new_unchecked(dec!(45)),
            status: ContractStatus::Active,
            created_at: Timestamp::from_millis(0),
            completed_at: None,
        }
    }

    fn registry_with(contracts: Vec<Contract>) -> (ContractRegistry, Vec<ContractId>) {
        let store = Arc::new(MarketStore::new());
        let ids = contracts.into_iter().map(|c| store.insert_contract(c)).collect();
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 9, 2, 0, 0, 0).unwrap()));
        let registry = ContractRegistry::new(store, clock, Arc::new(EventLog::new(100)));
        (registry, ids)
    }

    #[test]
    fn filter_matches_every_field() {
        let c = contract(1, 10, Side::Buy);
        assert!(ContractFilter::default().matches(&c));
        assert!(ContractFilter::for_user(UserId(1)).matches(&c));
        assert!(!ContractFilter::for_user(UserId(2)).matches(&c));
        assert!(ContractFilter::on_date(day()).with_hour(Hour::new(10).unwrap()).matches(&c));
        assert!(!ContractFilter::default().with_status(ContractStatus::Completed).matches(&c));
    }

    #[test]
    fn complete_is_idempotent() {
        let (registry, ids) = registry_with(vec![contract(1, 10, Side::Buy)]);

        assert_eq!(registry.complete(ids[0]).unwrap(), 1);
        assert_eq!(registry.complete(ids[0]).unwrap(), 0);

        let stored = registry.get(ids[0]).unwrap();
        assert_eq!(stored.status, ContractStatus::Completed);
        assert!(stored.completed_at.is_some());
    }

    #[test]
    fn complete_unknown_contract() {
        let (registry, _) = registry_with(vec![]);
        assert_eq!(registry.complete(ContractId(99)), Err(ContractError::NotFound(ContractId(99))));
    }

    #[test]
    fn bulk_completion_counts_only_active() {
        let (registry, ids) = registry_with(vec![
            contract(1, 10, Side::Buy),
            contract(2, 10, Side::Sell),
            contract(1, 11, Side::Buy),
        ]);
        registry.complete(ids[0]).unwrap();

        assert_eq!(registry.complete_all_active(day()), 2);
        assert_eq!(registry.complete_all_active(day()), 0);

        let counts = registry.status_counts(day());
        assert_eq!(counts, ContractStatusCounts { total: 3, active: 0, completed: 3 });
    }

    #[test]
    fn query_by_user_and_status() {
        let (registry, ids) = registry_with(vec![
            contract(1, 10, Side::Buy),
            contract(2, 10, Side::Sell),
            contract(1, 11, Side::Buy),
        ]);
        registry.complete(ids[2]).unwrap();

        let active_for_user = registry.query(ContractFilter::for_user(UserId(1)).with_status(ContractStatus::Active));
        assert_eq!(active_for_user.len(), 1);
        assert_eq!(active_for_user[0].id, ids[0]);
    }
}
