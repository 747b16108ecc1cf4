// 9.0 store.rs: in-memory persistent store. bids, contracts and pnl records plus
// the indexes needed to answer pending-bids-per-slot and contracts-per-user-date in O(log n).
//
// every public mutation is one write-lock critical section. that section is the
// atomic region: either all of its writes land or none do.

use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::bid::{Bid, BidError, BidStatus, BidTerms};
use crate::clearing::{ClearingError, Match};
use crate::contract::{Contract, ContractError, ContractFilter, ContractStatus};
use crate::pnl::PnlRecord;
use crate::types::{BidId, ContractId, Hour, PnlRecordId, Side, Timestamp, TradingDate, UserId};

/// (user, trading date, hour). the unit of the pending-bid cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey {
    pub user_id: UserId,
    pub trading_date: TradingDate,
    pub hour: Hour,
}

impl SlotKey {
    pub fn of(bid: &Bid) -> Self {
        Self {
            user_id: bid.user_id,
            trading_date: bid.trading_date,
            hour: bid.hour,
        }
    }
}

/// A validated bid about to be inserted
#[derive(Debug, Clone)]
pub struct NewBid {
    pub user_id: UserId,
    pub trading_date: TradingDate,
    pub side: Side,
    pub terms: BidTerms,
    pub submitted_at: Timestamp,
}

/// What one committed match wrote
#[derive(Debug, Clone)]
pub struct MatchReceipt {
    pub buy_contract_id: ContractId,
    pub sell_contract_id: ContractId,
    pub buy_version: u64,
    pub sell_version: u64,
    pub buy_executed: bool,
    pub sell_executed: bool,
}

#[derive(Debug, Default)]
struct Tables {
    next_bid_id: u64,
    next_contract_id: u64,
    next_pnl_id: u64,

    bids: HashMap<BidId, Bid>,
    pending_by_slot: BTreeMap<SlotKey, BTreeSet<BidId>>,
    bids_by_date: BTreeMap<TradingDate, BTreeSet<BidId>>,

    contracts: BTreeMap<ContractId, Contract>,
    contracts_by_user_date: BTreeMap<(UserId, TradingDate), Vec<ContractId>>,
    contracts_by_date: BTreeMap<TradingDate, Vec<ContractId>>,

    pnl_by_contract: BTreeMap<ContractId, PnlRecord>,
}

impl Tables {
    fn pending_count(&self, slot: &SlotKey) -> usize {
        self.pending_by_slot.get(slot).map_or(0, |ids| ids.len())
    }

    fn unindex_pending(&mut self, slot: &SlotKey, id: BidId) {
        if let Some(ids) = self.pending_by_slot.get_mut(slot) {
            ids.remove(&id);
            if ids.is_empty() {
                self.pending_by_slot.remove(slot);
            }
        }
    }

    fn index_pending(&mut self, slot: SlotKey, id: BidId) {
        self.pending_by_slot.entry(slot).or_default().insert(id);
    }

    fn insert_contract(&mut self, mut contract: Contract) -> ContractId {
        self.next_contract_id += 1;
        let id = ContractId(self.next_contract_id);
        contract.id = id;

        self.contracts_by_user_date
            .entry((contract.user_id, contract.trading_date))
            .or_default()
            .push(id);
        self.contracts_by_date.entry(contract.trading_date).or_default().push(id);
        self.contracts.insert(id, contract);
        id
    }

    fn check_matchable(&self, id: BidId, expected_version: u64, quantity: Decimal) -> Result<&Bid, ClearingError> {
        let bid = self
            .bids
            .get(&id)
            .ok_or(ClearingError::ConcurrencyConflict { bid_id: id })?;
        if !bid.is_pending() || bid.version != expected_version || bid.remaining_quantity < quantity {
            return Err(ClearingError::ConcurrencyConflict { bid_id: id });
        }
        Ok(bid)
    }

    fn apply_fill(&mut self, id: BidId, quantity: Decimal, at: Timestamp) -> (u64, bool) {
        let Some(bid) = self.bids.get_mut(&id) else {
            return (0, false);
        };
        bid.fill(quantity);
        bid.touch(at);
        let executed = bid.status == BidStatus::Executed;
        let version = bid.version;
        let slot = SlotKey::of(bid);
        if executed {
            self.unindex_pending(&slot, id);
        }
        (version, executed)
    }
}

/// Shared store. cheap to wrap in an Arc and hand to every component.
#[derive(Debug, Default)]
pub struct MarketStore {
    tables: RwLock<Tables>,
}

impl MarketStore {
    pub fn new() -> Self {
        Self::default()
    }

    // 9.1: bids

    /// Count PENDING bids in the slot and insert only if under `cap`, atomically.
    pub fn insert_bid_capped(&self, new_bid: NewBid, cap: usize) -> Result<Bid, BidError> {
        let mut tables = self.tables.write();

        let slot = SlotKey {
            user_id: new_bid.user_id,
            trading_date: new_bid.trading_date,
            hour: new_bid.terms.hour,
        };
        if tables.pending_count(&slot) >= cap {
            return Err(BidError::LimitExceeded {
                user_id: slot.user_id,
                trading_date: slot.trading_date,
                hour: slot.hour,
                limit: cap,
            });
        }

        tables.next_bid_id += 1;
        let id = BidId(tables.next_bid_id);
        let bid = Bid {
            id,
            user_id: new_bid.user_id,
            trading_date: new_bid.trading_date,
            hour: new_bid.terms.hour,
            side: new_bid.side,
            quantity: new_bid.terms.quantity,
            remaining_quantity: new_bid.terms.quantity,
            limit_price: new_bid.terms.limit_price,
            status: BidStatus::Pending,
            submitted_at: new_bid.submitted_at,
            updated_at: new_bid.submitted_at,
            version: 0,
        };

        tables.index_pending(slot, id);
        tables.bids_by_date.entry(bid.trading_date).or_default().insert(id);
        tables.bids.insert(id, bid.clone());
        Ok(bid)
    }

    /// Rewrite a PENDING bid through `update`, atomically.
    ///
    /// Fails with ConcurrencyConflict when the bid is no longer at
    /// `expected_version`. If the rewrite moves the bid to another slot the
    /// target slot's cap is checked inside the same critical section.
    pub fn update_pending_bid<F>(
        &self,
        id: BidId,
        expected_version: u64,
        cap: usize,
        at: Timestamp,
        update: F,
    ) -> Result<Bid, BidError>
    where
        F: FnOnce(&Bid) -> Result<Bid, BidError>,
    {
        let mut tables = self.tables.write();

        let current = tables.bids.get(&id).ok_or(BidError::NotFound(id))?;
        if !current.is_pending() {
            return Err(BidError::NotCancellable {
                id,
                status: current.status,
            });
        }
        if current.version != expected_version {
            return Err(BidError::ConcurrencyConflict(id));
        }

        let old_slot = SlotKey::of(current);
        let mut updated = update(current)?;
        let new_slot = SlotKey::of(&updated);

        if updated.is_pending() && new_slot != old_slot && tables.pending_count(&new_slot) >= cap {
            return Err(BidError::LimitExceeded {
                user_id: new_slot.user_id,
                trading_date: new_slot.trading_date,
                hour: new_slot.hour,
                limit: cap,
            });
        }

        updated.id = id;
        updated.touch(at);

        tables.unindex_pending(&old_slot, id);
        if updated.is_pending() {
            tables.index_pending(new_slot, id);
        }
        tables.bids.insert(id, updated.clone());
        Ok(updated)
    }

    pub fn bid(&self, id: BidId) -> Option<Bid> {
        self.tables.read().bids.get(&id).cloned()
    }

    pub fn pending_count(&self, slot: &SlotKey) -> usize {
        self.tables.read().pending_count(slot)
    }

    /// Every bid of a date, ordered by id
    pub fn bids_on(&self, trading_date: TradingDate) -> Vec<Bid> {
        let tables = self.tables.read();
        tables
            .bids_by_date
            .get(&trading_date)
            .map(|ids| ids.iter().filter_map(|id| tables.bids.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    /// Every bid of a user, optionally restricted to one date, ordered by id
    pub fn bids_for_user(&self, user_id: UserId, trading_date: Option<TradingDate>) -> Vec<Bid> {
        let mut bids: Vec<Bid> = match trading_date {
            Some(date) => self.bids_on(date).into_iter().filter(|b| b.user_id == user_id).collect(),
            None => self
                .tables
                .read()
                .bids
                .values()
                .filter(|b| b.user_id == user_id)
                .cloned()
                .collect(),
        };
        bids.sort_by_key(|b| b.id);
        bids
    }

    /// PENDING bids with volume left, for one date and optionally one hour
    pub fn pending_bids(&self, trading_date: TradingDate, hour: Option<Hour>) -> Vec<Bid> {
        self.bids_on(trading_date)
            .into_iter()
            .filter(|b| b.is_pending() && b.remaining_quantity > Decimal::ZERO)
            .filter(|b| hour.map_or(true, |h| b.hour == h))
            .collect()
    }

    // 9.2: clearing

    /// Commit one match: two contracts plus both bid fills, or nothing.
    ///
    /// Both bids must still be PENDING at the versions the matcher read them at.
    pub fn commit_match(
        &self,
        m: &Match,
        buy_version: u64,
        sell_version: u64,
        at: Timestamp,
    ) -> Result<MatchReceipt, ClearingError> {
        let mut tables = self.tables.write();

        let buy = tables.check_matchable(m.buy_bid_id, buy_version, m.quantity)?.clone();
        let sell = tables.check_matchable(m.sell_bid_id, sell_version, m.quantity)?.clone();

        let buy_contract_id = tables.insert_contract(contract_for(&buy, &sell, m, at));
        let sell_contract_id = tables.insert_contract(contract_for(&sell, &buy, m, at));

        let (buy_version, buy_executed) = tables.apply_fill(buy.id, m.quantity, at);
        let (sell_version, sell_executed) = tables.apply_fill(sell.id, m.quantity, at);

        Ok(MatchReceipt {
            buy_contract_id,
            sell_contract_id,
            buy_version,
            sell_version,
            buy_executed,
            sell_executed,
        })
    }

    /// Move every PENDING bid of a date to UNFILLED. returns the bids it moved.
    pub fn mark_unfilled(&self, trading_date: TradingDate, at: Timestamp) -> Vec<Bid> {
        let mut tables = self.tables.write();

        let ids: Vec<BidId> = tables
            .bids_by_date
            .get(&trading_date)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();

        let mut moved = Vec::new();
        for id in ids {
            let Some(bid) = tables.bids.get_mut(&id) else {
                continue;
            };
            if !bid.is_pending() {
                continue;
            }
            bid.status = BidStatus::Unfilled;
            bid.touch(at);
            let snapshot = bid.clone();
            tables.unindex_pending(&SlotKey::of(&snapshot), id);
            moved.push(snapshot);
        }
        moved
    }

    // 9.3: contracts

    /// Insert a contract as-is, assigning a fresh id. clearing goes through commit_match.
    #[cfg(test)]
    pub(crate) fn insert_contract(&self, contract: Contract) -> ContractId {
        self.tables.write().insert_contract(contract)
    }

    pub fn contract(&self, id: ContractId) -> Option<Contract> {
        self.tables.read().contracts.get(&id).cloned()
    }

    pub fn contracts_matching(&self, filter: &ContractFilter) -> Vec<Contract> {
        let tables = self.tables.read();

        let by_ids = |ids: &[ContractId]| -> Vec<Contract> {
            ids.iter()
                .filter_map(|id| tables.contracts.get(id))
                .filter(|c| filter.matches(c))
                .cloned()
                .collect()
        };

        let mut contracts = match (filter.user_id, filter.trading_date) {
            (Some(user_id), Some(date)) => tables
                .contracts_by_user_date
                .get(&(user_id, date))
                .map(|ids| by_ids(ids.as_slice()))
                .unwrap_or_default(),
            (None, Some(date)) => tables
                .contracts_by_date
                .get(&date)
                .map(|ids| by_ids(ids.as_slice()))
                .unwrap_or_default(),
            _ => tables.contracts.values().filter(|c| filter.matches(c)).cloned().collect(),
        };
        contracts.sort_by_key(|c| c.id);
        contracts
    }

    /// ACTIVE -> COMPLETED. Ok(None) when the contract was already completed.
    pub fn complete_contract(&self, id: ContractId, at: Timestamp) -> Result<Option<Contract>, ContractError> {
        let mut tables = self.tables.write();
        let contract = tables.contracts.get_mut(&id).ok_or(ContractError::NotFound(id))?;

        if contract.status == ContractStatus::Completed {
            return Ok(None);
        }
        contract.status = ContractStatus::Completed;
        contract.completed_at = Some(at);
        Ok(Some(contract.clone()))
    }

    /// Complete every ACTIVE contract of a date. returns the contracts it moved.
    pub fn complete_active_on(&self, trading_date: TradingDate, at: Timestamp) -> Vec<Contract> {
        let mut tables = self.tables.write();

        let ids = tables.contracts_by_date.get(&trading_date).cloned().unwrap_or_default();
        let mut completed = Vec::new();
        for id in ids {
            if let Some(contract) = tables.contracts.get_mut(&id) {
                if contract.status == ContractStatus::Active {
                    contract.status = ContractStatus::Completed;
                    contract.completed_at = Some(at);
                    completed.push(contract.clone());
                }
            }
        }
        completed
    }

    // 9.4: pnl records

    /// Upsert a batch keyed by contract id. existing records keep their id.
    pub fn upsert_pnl(&self, records: Vec<PnlRecord>) -> Vec<PnlRecord> {
        let mut tables = self.tables.write();

        let mut written = Vec::with_capacity(records.len());
        for mut record in records {
            record.id = match tables.pnl_by_contract.get(&record.contract_id) {
                Some(existing) => existing.id,
                None => {
                    tables.next_pnl_id += 1;
                    PnlRecordId(tables.next_pnl_id)
                }
            };
            tables.pnl_by_contract.insert(record.contract_id, record.clone());
            written.push(record);
        }
        written
    }

    pub fn pnl_for_contract(&self, contract_id: ContractId) -> Option<PnlRecord> {
        self.tables.read().pnl_by_contract.get(&contract_id).cloned()
    }

    pub fn pnl_for_user(&self, user_id: UserId) -> Vec<PnlRecord> {
        self.tables
            .read()
            .pnl_by_contract
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn pnl_record_count(&self) -> usize {
        self.tables.read().pnl_by_contract.len()
    }
}

fn contract_for(own: &Bid, other: &Bid, m: &Match, at: Timestamp) -> Contract {
    Contract {
        id: ContractId(0),
        originating_bid_id: own.id,
        counterparty_bid_id: other.id,
        user_id: own.user_id,
        trading_date: own.trading_date,
        hour: own.hour,
        side: own.side,
        quantity: m.quantity,
        execution_price: m.execution_price,
        status: ContractStatus::Active,
        created_at: at,
        completed_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Price;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn day() -> TradingDate {
        NaiveDate::from_ymd_opt(2025, 9, 1).unwrap()
    }

    fn new_bid(user: u64, side: Side, quantity: Decimal, price: Decimal) -> NewBid {
        NewBid {
            user_id: UserId(user),
            trading_date: day(),
            side,
            terms: BidTerms {
                hour: Hour::new(10).unwrap(),
                quantity,
                limit_price: Price::new_unchecked(price),
            },
            submitted_at: Timestamp::from_millis(0),
        }
    }

    fn matched(buy: &Bid, sell: &Bid, quantity: Decimal) -> Match {
        Match {
            hour: buy.hour,
            buy_bid_id: buy.id,
            sell_bid_id: sell.id,
            quantity,
            execution_price: buy.limit_price.midpoint(sell.limit_price),
        }
    }

    #[test]
    fn cap_is_enforced_per_slot() {
        let store = MarketStore::new();
        store.insert_bid_capped(new_bid(1, Side::Buy, dec!(1), dec!(10)), 2).unwrap();
        store.insert_bid_capped(new_bid(1, Side::Sell, dec!(1), dec!(10)), 2).unwrap();

        let err = store.insert_bid_capped(new_bid(1, Side::Buy, dec!(1), dec!(10)), 2).unwrap_err();
        assert!(matches!(err, BidError::LimitExceeded { limit: 2, .. }));

        // other users have their own slot
        assert!(store.insert_bid_capped(new_bid(2, Side::Buy, dec!(1), dec!(10)), 2).is_ok());
    }

    #[test]
    fn commit_match_is_all_or_nothing() {
        let store = MarketStore::new();
        let buy = store.insert_bid_capped(new_bid(1, Side::Buy, dec!(100), dec!(50)), 10).unwrap();
        let sell = store.insert_bid_capped(new_bid(2, Side::Sell, dec!(60), dec!(40)), 10).unwrap();
        let m = matched(&buy, &sell, dec!(60));

        // stale sell version: nothing written
        let err = store.commit_match(&m, buy.version, sell.version + 1, Timestamp::from_millis(1)).unwrap_err();
        assert_eq!(err, ClearingError::ConcurrencyConflict { bid_id: sell.id });
        assert!(store.contracts_matching(&ContractFilter::default()).is_empty());
        assert_eq!(store.bid(buy.id).unwrap().remaining_quantity, dec!(100));

        let receipt = store.commit_match(&m, buy.version, sell.version, Timestamp::from_millis(1)).unwrap();
        assert!(!receipt.buy_executed);
        assert!(receipt.sell_executed);

        let buy_after = store.bid(buy.id).unwrap();
        assert_eq!(buy_after.remaining_quantity, dec!(40));
        assert_eq!(buy_after.version, receipt.buy_version);
        assert_eq!(store.bid(sell.id).unwrap().status, BidStatus::Executed);
        assert_eq!(store.contracts_matching(&ContractFilter::default()).len(), 2);
    }

    #[test]
    fn executed_bids_leave_the_pending_index() {
        let store = MarketStore::new();
        let buy = store.insert_bid_capped(new_bid(1, Side::Buy, dec!(10), dec!(50)), 10).unwrap();
        let sell = store.insert_bid_capped(new_bid(2, Side::Sell, dec!(10), dec!(40)), 10).unwrap();
        store
            .commit_match(&matched(&buy, &sell, dec!(10)), 0, 0, Timestamp::from_millis(1))
            .unwrap();

        assert_eq!(store.pending_count(&SlotKey::of(&buy)), 0);
        assert!(store.pending_bids(day(), None).is_empty());
    }

    #[test]
    fn update_rejects_non_pending() {
        let store = MarketStore::new();
        let bid = store.insert_bid_capped(new_bid(1, Side::Buy, dec!(10), dec!(50)), 10).unwrap();
        store.mark_unfilled(day(), Timestamp::from_millis(5));

        let err = store
            .update_pending_bid(bid.id, bid.version, 10, Timestamp::from_millis(6), |b| Ok(b.clone()))
            .unwrap_err();
        assert!(matches!(err, BidError::NotCancellable { status: BidStatus::Unfilled, .. }));
    }

    #[test]
    fn update_detects_stale_version() {
        let store = MarketStore::new();
        let bid = store.insert_bid_capped(new_bid(1, Side::Buy, dec!(10), dec!(50)), 10).unwrap();
        let bump = |b: &Bid| -> Result<Bid, BidError> { Ok(b.clone()) };

        let updated = store.update_pending_bid(bid.id, 0, 10, Timestamp::from_millis(1), bump).unwrap();
        assert_eq!(updated.version, 1);

        let err = store.update_pending_bid(bid.id, 0, 10, Timestamp::from_millis(2), bump).unwrap_err();
        assert_eq!(err, BidError::ConcurrencyConflict(bid.id));
    }

    #[test]
    fn pnl_upsert_keeps_one_record_per_contract() {
        use crate::pnl::PnlType;
        use crate::types::Money;

        let store = MarketStore::new();
        let record = |amount: Decimal| PnlRecord {
            id: PnlRecordId(0),
            contract_id: ContractId(7),
            user_id: UserId(1),
            trading_date: day(),
            hour: Hour::new(10).unwrap(),
            side: Side::Buy,
            day_ahead_price: Price::new_unchecked(dec!(45)),
            real_time_price: Price::new_unchecked(dec!(50)),
            quantity: dec!(100),
            pnl_amount: Money::new(amount),
            pnl_type: PnlType::Unrealized,
            computed_at: Timestamp::from_millis(0),
        };

        let first = store.upsert_pnl(vec![record(dec!(500))]);
        let second = store.upsert_pnl(vec![record(dec!(600))]);

        assert_eq!(first[0].id, second[0].id);
        assert_eq!(store.pnl_record_count(), 1);
        assert_eq!(store.pnl_for_contract(ContractId(7)).unwrap().pnl_amount.value(), dec!(600));
    }
}
