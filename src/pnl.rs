//! PnL Engine.
//!
//! Marks every contract of a user against the real-time price of its hour.
//! The day-ahead side of the comparison is the contract's own execution price.
//! Records are upserted per contract, so recomputing never duplicates and always
//! reflects the latest real-time prices and contract status.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::contract::{Contract, ContractFilter, ContractStatus};
use crate::events::{EventLog, EventPayload, PnlComputedEvent};
use crate::price_feed::{PriceKind, PriceSource};
use crate::store::MarketStore;
use crate::types::{ContractId, Hour, Money, PnlRecordId, Price, Side, Timestamp, TradingDate, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PnlType {
    /// Contract completed
    Realized,
    /// Contract still active
    Unrealized,
}

impl PnlType {
    pub fn for_status(status: ContractStatus) -> Self {
        match status {
            ContractStatus::Completed => PnlType::Realized,
            ContractStatus::Active => PnlType::Unrealized,
        }
    }
}

/// Latest PnL of one contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PnlRecord {
    pub id: PnlRecordId,
    pub contract_id: ContractId,
    pub user_id: UserId,
    pub trading_date: TradingDate,
    pub hour: Hour,
    pub side: Side,
    pub day_ahead_price: Price,
    pub real_time_price: Price,
    pub quantity: Decimal,
    pub pnl_amount: Money,
    pub pnl_type: PnlType,
    pub computed_at: Timestamp,
}

/// PnL of one hour of a user's day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourlyPnl {
    pub hour: Hour,
    pub pnl: Money,
    pub realized: Money,
    pub unrealized: Money,
    pub quantity: Decimal,
    pub contracts: usize,
}

impl HourlyPnl {
    fn new(hour: Hour) -> Self {
        Self {
            hour,
            pnl: Money::zero(),
            realized: Money::zero(),
            unrealized: Money::zero(),
            quantity: Decimal::ZERO,
            contracts: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PnlSummary {
    pub user_id: UserId,
    pub trading_date: TradingDate,
    pub total_pnl: Money,
    pub realized_pnl: Money,
    pub unrealized_pnl: Money,
    pub total_quantity: Decimal,
    pub records_count: usize,
    /// Only hours with contracts, ordered by hour
    pub hourly: Vec<HourlyPnl>,
}

/// PnL across every stored record of a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioPnl {
    pub user_id: UserId,
    pub total_pnl: Money,
    pub realized_pnl: Money,
    pub unrealized_pnl: Money,
    pub total_quantity: Decimal,
    pub contracts: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PnlError {
    #[error("No real-time price for {trading_date} hour {hour}")]
    PriceUnavailable { trading_date: TradingDate, hour: Hour },

    #[error("PnL of {contract_id} is out of range")]
    Overflow { contract_id: ContractId },
}

/// BUY gains when real-time settles above the execution price, SELL when below.
/// None when the product leaves Decimal range.
pub fn contract_pnl(side: Side, day_ahead: Price, real_time: Price, quantity: Decimal) -> Option<Money> {
    let delta = real_time.value().checked_sub(day_ahead.value())?;
    let amount = delta.checked_mul(quantity)?.checked_mul(side.sign())?;
    Some(Money::new(amount).rounded())
}

pub struct PnlEngine {
    store: Arc<MarketStore>,
    prices: Arc<dyn PriceSource>,
    clock: Arc<dyn Clock>,
    events: Arc<EventLog>,
}

impl PnlEngine {
    pub fn new(
        store: Arc<MarketStore>,
        prices: Arc<dyn PriceSource>,
        clock: Arc<dyn Clock>,
        events: Arc<EventLog>,
    ) -> Self {
        Self {
            store,
            prices,
            clock,
            events,
        }
    }

    /// Recompute and store the PnL of every contract the user holds on the date.
    ///
    /// All real-time prices are fetched before anything is written: a single
    /// missing hour fails the whole call with PriceUnavailable and leaves the
    /// stored records untouched.
    pub fn calculate(&self, user_id: UserId, trading_date: TradingDate) -> Result<Vec<PnlRecord>, PnlError> {
        let now = self.clock.now();
        let contracts = self
            .store
            .contracts_matching(&ContractFilter::on_date(trading_date).with_user(user_id));

        let records = contracts
            .iter()
            .map(|c| self.mark(c, Timestamp::from(now)))
            .collect::<Result<Vec<_>, _>>()?;

        let written = self.store.upsert_pnl(records);
        for r in &written {
            debug!(contract = %r.contract_id, hour = %r.hour, pnl = %r.pnl_amount, kind = ?r.pnl_type, "pnl marked");
        }

        let total_pnl: Money = written.iter().map(|r| r.pnl_amount).sum();
        info!(user = %user_id, %trading_date, records = written.len(), total = %total_pnl, "pnl computed");
        self.events.record(
            now,
            EventPayload::PnlComputed(PnlComputedEvent {
                user_id,
                trading_date,
                records: written.len(),
                total_pnl,
            }),
        );
        Ok(written)
    }

    fn mark(&self, contract: &Contract, at: Timestamp) -> Result<PnlRecord, PnlError> {
        let real_time_price = self
            .prices
            .get_price(contract.trading_date, contract.hour, PriceKind::RealTime)
            .ok_or(PnlError::PriceUnavailable {
                trading_date: contract.trading_date,
                hour: contract.hour,
            })?;
        let pnl_amount = contract_pnl(contract.side, contract.execution_price, real_time_price, contract.quantity)
            .ok_or(PnlError::Overflow { contract_id: contract.id })?;

        Ok(PnlRecord {
            id: PnlRecordId(0),
            contract_id: contract.id,
            user_id: contract.user_id,
            trading_date: contract.trading_date,
            hour: contract.hour,
            side: contract.side,
            day_ahead_price: contract.execution_price,
            real_time_price,
            quantity: contract.quantity,
            pnl_amount,
            pnl_type: PnlType::for_status(contract.status),
            computed_at: at,
        })
    }

    /// Day summary. always recomputes first, real-time prices move intraday.
    pub fn summarize(&self, user_id: UserId, trading_date: TradingDate) -> Result<PnlSummary, PnlError> {
        let records = self.calculate(user_id, trading_date)?;

        let mut hourly: BTreeMap<Hour, HourlyPnl> = BTreeMap::new();
        for r in &records {
            let h = hourly.entry(r.hour).or_insert_with(|| HourlyPnl::new(r.hour));
            h.pnl = h.pnl.add(r.pnl_amount);
            match r.pnl_type {
                PnlType::Realized => h.realized = h.realized.add(r.pnl_amount),
                PnlType::Unrealized => h.unrealized = h.unrealized.add(r.pnl_amount),
            }
            h.quantity += r.quantity;
            h.contracts += 1;
        }

        let totals = Totals::of(&records);
        Ok(PnlSummary {
            user_id,
            trading_date,
            total_pnl: totals.total,
            realized_pnl: totals.realized,
            unrealized_pnl: totals.unrealized,
            total_quantity: totals.quantity,
            records_count: records.len(),
            hourly: hourly.into_values().collect(),
        })
    }

    /// Stored records of a user, newest date first then by hour.
    /// Both bounds are inclusive.
    pub fn records(&self, user_id: UserId, from: Option<TradingDate>, to: Option<TradingDate>) -> Vec<PnlRecord> {
        let mut records: Vec<PnlRecord> = self
            .store
            .pnl_for_user(user_id)
            .into_iter()
            .filter(|r| from.map_or(true, |d| r.trading_date >= d))
            .filter(|r| to.map_or(true, |d| r.trading_date <= d))
            .collect();

        records.sort_by(|a, b| {
            b.trading_date
                .cmp(&a.trading_date)
                .then(a.hour.cmp(&b.hour))
                .then(a.contract_id.cmp(&b.contract_id))
        });
        records
    }

    /// Totals over everything stored for the user. does not recompute.
    pub fn portfolio(&self, user_id: UserId) -> PortfolioPnl {
        let records = self.store.pnl_for_user(user_id);
        let totals = Totals::of(&records);
        let contracts: BTreeSet<ContractId> = records.iter().map(|r| r.contract_id).collect();

        PortfolioPnl {
            user_id,
            total_pnl: totals.total,
            realized_pnl: totals.realized,
            unrealized_pnl: totals.unrealized,
            total_quantity: totals.quantity,
            contracts: contracts.len(),
        }
    }
}

struct Totals {
    total: Money,
    realized: Money,
    unrealized: Money,
    quantity: Decimal,
}

impl Totals {
    fn of(records: &[PnlRecord]) -> Self {
        let by_type = |kind: PnlType| -> Money {
            records.iter().filter(|r| r.pnl_type == kind).map(|r| r.pnl_amount).sum()
        };
        Self {
            total: records.iter().map(|r| r.pnl_amount).sum(),
            realized: by_type(PnlType::Realized),
            unrealized: by_type(PnlType::Unrealized),
            quantity: records.iter().map(|r| r.quantity).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::price_feed::PriceBook;
    use crate::types::BidId;
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn day() -> TradingDate {
        NaiveDate::from_ymd_opt(2025, 9, 1).unwrap()
    }

    fn hour(h: u8) -> Hour {
        Hour::new(h).unwrap()
    }

    fn price(p: Decimal) -> Price {
        Price::new_unchecked(p)
    }

    struct Fixture {
        engine: PnlEngine,
        store: Arc<MarketStore>,
        prices: Arc<PriceBook>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MarketStore::new());
        let prices = Arc::new(PriceBook::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 9, 2, 0, 0, 0).unwrap()));
        let engine = PnlEngine::new(Arc::clone(&store), prices.clone(), clock, Arc::new(EventLog::new(100)));
        Fixture { engine, store, prices }
    }

    fn add_contract(store: &MarketStore, user: u64, date: TradingDate, h: u8, side: Side, qty: Decimal, exec: Decimal) -> ContractId {
        store.insert_contract(Contract {
            id: ContractId(0),
            originating_bid_id: BidId(1),
            counterparty_bid_id: BidId(2),
            user_id: UserId(user),
            trading_date: date,
            hour: hour(h),
            side,
            quantity: qty,
            execution_price: price(exec),
            status: ContractStatus::Active,
            created_at: Timestamp::from_millis(0),
            completed_at: None,
        })
    }

    #[test]
    fn sign_follows_side() {
        assert_eq!(contract_pnl(Side::Buy, price(dec!(45)), price(dec!(50)), dec!(100)).unwrap().value(), dec!(500));
        assert_eq!(contract_pnl(Side::Sell, price(dec!(45)), price(dec!(50)), dec!(100)).unwrap().value(), dec!(-500));
        assert_eq!(contract_pnl(Side::Sell, price(dec!(45)), price(dec!(40)), dec!(10)).unwrap().value(), dec!(50));
    }

    #[test]
    fn huge_real_time_price_fails_without_panicking() {
        let f = fixture();
        let id = add_contract(&f.store, 1, day(), 10, Side::Buy, dec!(10_000), dec!(45));
        f.prices.set_price(day(), hour(10), PriceKind::RealTime, price(dec!(50_000_000_000_000_000_000_000_000)));

        let err = f.engine.calculate(UserId(1), day()).unwrap_err();
        assert_eq!(err, PnlError::Overflow { contract_id: id });
        assert!(f.engine.summarize(UserId(1), day()).is_err());
        assert_eq!(f.store.pnl_record_count(), 0);
    }

    #[test]
    fn unrealized_then_realized() {
        let f = fixture();
        let id = add_contract(&f.store, 1, day(), 10, Side::Buy, dec!(100), dec!(45));
        f.prices.set_price(day(), hour(10), PriceKind::RealTime, price(dec!(50)));

        let first = f.engine.calculate(UserId(1), day()).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].pnl_amount.value(), dec!(500.00));
        assert_eq!(first[0].pnl_type, PnlType::Unrealized);
        assert_eq!(first[0].day_ahead_price.value(), dec!(45));

        f.store.complete_contract(id, Timestamp::from_millis(1)).unwrap();
        let second = f.engine.calculate(UserId(1), day()).unwrap();
        assert_eq!(second[0].pnl_type, PnlType::Realized);
        assert_eq!(second[0].id, first[0].id);
        assert_eq!(f.store.pnl_record_count(), 1);
    }

    #[test]
    fn missing_price_writes_nothing() {
        let f = fixture();
        add_contract(&f.store, 1, day(), 10, Side::Buy, dec!(100), dec!(45));
        add_contract(&f.store, 1, day(), 11, Side::Buy, dec!(100), dec!(45));
        f.prices.set_price(day(), hour(10), PriceKind::RealTime, price(dec!(50)));

        let err = f.engine.calculate(UserId(1), day()).unwrap_err();
        assert_eq!(err, PnlError::PriceUnavailable { trading_date: day(), hour: hour(11) });
        assert_eq!(f.store.pnl_record_count(), 0);
    }

    #[test]
    fn no_contracts_no_records() {
        let f = fixture();
        assert!(f.engine.calculate(UserId(9), day()).unwrap().is_empty());
        let summary = f.engine.summarize(UserId(9), day()).unwrap();
        assert_eq!(summary.records_count, 0);
        assert_eq!(summary.total_pnl, Money::zero());
    }

    #[test]
    fn summary_picks_up_new_real_time_prices() {
        let f = fixture();
        let id = add_contract(&f.store, 1, day(), 10, Side::Buy, dec!(100), dec!(45));
        add_contract(&f.store, 1, day(), 10, Side::Sell, dec!(20), dec!(45));
        add_contract(&f.store, 1, day(), 12, Side::Sell, dec!(10), dec!(30));
        f.prices.set_price(day(), hour(10), PriceKind::RealTime, price(dec!(50)));
        f.prices.set_price(day(), hour(12), PriceKind::RealTime, price(dec!(25)));
        f.store.complete_contract(id, Timestamp::from_millis(1)).unwrap();

        let summary = f.engine.summarize(UserId(1), day()).unwrap();
        // 500 - 100 + 50
        assert_eq!(summary.total_pnl.value(), dec!(450));
        assert_eq!(summary.realized_pnl.value(), dec!(500));
        assert_eq!(summary.unrealized_pnl.value(), dec!(-50));
        assert_eq!(summary.total_quantity, dec!(130));
        assert_eq!(summary.hourly.len(), 2);
        assert_eq!(summary.hourly[0].contracts, 2);
        assert_eq!(summary.hourly[0].pnl.value(), dec!(400));

        f.prices.set_price(day(), hour(10), PriceKind::RealTime, price(dec!(55)));
        let moved = f.engine.summarize(UserId(1), day()).unwrap();
        // 1000 - 200 + 50
        assert_eq!(moved.total_pnl.value(), dec!(850));
    }

    #[test]
    fn history_and_portfolio() {
        let f = fixture();
        let next = day().succ_opt().unwrap();
        add_contract(&f.store, 1, day(), 14, Side::Buy, dec!(1), dec!(40));
        add_contract(&f.store, 1, day(), 2, Side::Buy, dec!(1), dec!(40));
        add_contract(&f.store, 1, next, 5, Side::Buy, dec!(2), dec!(40));
        f.prices.set_hourly(day(), PriceKind::RealTime, [(hour(2), price(dec!(41))), (hour(14), price(dec!(42)))]);
        f.prices.set_price(next, hour(5), PriceKind::RealTime, price(dec!(43)));

        f.engine.calculate(UserId(1), day()).unwrap();
        f.engine.calculate(UserId(1), next).unwrap();

        let all = f.engine.records(UserId(1), None, None);
        let order: Vec<(TradingDate, u8)> = all.iter().map(|r| (r.trading_date, r.hour.value())).collect();
        assert_eq!(order, vec![(next, 5), (day(), 2), (day(), 14)]);
        assert_eq!(f.engine.records(UserId(1), Some(next), None).len(), 1);
        assert_eq!(f.engine.records(UserId(1), None, Some(day())).len(), 2);

        let portfolio = f.engine.portfolio(UserId(1));
        // 1 + 2 + 6
        assert_eq!(portfolio.total_pnl.value(), dec!(9));
        assert_eq!(portfolio.contracts, 3);
        assert_eq!(portfolio.total_quantity, dec!(4));
        assert_eq!(portfolio.realized_pnl, Money::zero());
    }
}
