// 10.0 clearing.rs: uniform double auction per delivery hour.
//
// 10.1 match_hour is pure: sort buys high-to-low and sells low-to-high (ties go to
// the earlier submission), walk both lists while buy >= sell, and price every
// match at the midpoint of the two limits.
// 10.2 ClearingEngine::clear snapshots PENDING bids, runs match_hour per hour and
// commits each match as one atomic unit. clear holds a per-date lock, so two clears
// of the same date never read the same remaining quantity.

use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::bid::Bid;
use crate::clock::Clock;
use crate::contract::ContractFilter;
use crate::events::{
    BidExecutedEvent, BidUnfilledEvent, ClearingCompletedEvent, EventLog, EventPayload, MatchEvent,
};
use crate::store::{MarketStore, MatchReceipt};
use crate::types::{round_money, BidId, Hour, Price, Side, Timestamp, TradingDate};

/// One crossing of a buy and a sell bid
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub hour: Hour,
    pub buy_bid_id: BidId,
    pub sell_bid_id: BidId,
    pub quantity: Decimal,
    pub execution_price: Price,
}

/// Outcome of one clear call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearingResult {
    pub trading_date: TradingDate,
    /// Two per match, one for each side
    pub contracts_created: usize,
    /// PENDING bids considered
    pub bids_processed: usize,
    /// Bids whose whole quantity was consumed by this call
    pub bids_executed: usize,
    pub matched_volume: Decimal,
    pub hours_matched: usize,
}

impl ClearingResult {
    fn empty(trading_date: TradingDate, bids_processed: usize) -> Self {
        Self {
            trading_date,
            contracts_created: 0,
            bids_processed,
            bids_executed: 0,
            matched_volume: Decimal::ZERO,
            hours_matched: 0,
        }
    }
}

/// Aggregate view of what clearing produced for a date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearingSummary {
    pub trading_date: TradingDate,
    pub total_contracts: usize,
    pub buy_contracts: usize,
    pub sell_contracts: usize,
    /// Counted once per match, on the buy side
    pub matched_volume: Decimal,
    /// Volume weighted execution price, None before anything cleared
    pub average_price: Option<Price>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClearingError {
    #[error("Bid {bid_id} changed while clearing was in progress, retry")]
    ConcurrencyConflict { bid_id: BidId },
}

/// Price-time priority. buys by highest limit, sells by lowest, then earliest
/// submission, then lowest id so the order is total.
pub fn priority(a: &Bid, b: &Bid) -> Ordering {
    let by_price = match a.side {
        Side::Buy => b.limit_price.cmp(&a.limit_price),
        Side::Sell => a.limit_price.cmp(&b.limit_price),
    };
    by_price
        .then(a.submitted_at.cmp(&b.submitted_at))
        .then(a.id.cmp(&b.id))
}

/// Match the bids of a single hour. deterministic for a given input set,
/// whatever order the bids arrive in.
pub fn match_hour(bids: &[Bid]) -> Vec<Match> {
    let (mut buys, mut sells): (Vec<&Bid>, Vec<&Bid>) = bids
        .iter()
        .filter(|b| b.is_pending() && b.remaining_quantity > Decimal::ZERO)
        .partition(|b| b.side == Side::Buy);
    buys.sort_by(|a, b| priority(a, b));
    sells.sort_by(|a, b| priority(a, b));

    let mut buy_left: Vec<Decimal> = buys.iter().map(|b| b.remaining_quantity).collect();
    let mut sell_left: Vec<Decimal> = sells.iter().map(|b| b.remaining_quantity).collect();

    let mut matches = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < buys.len() && j < sells.len() {
        let (buy, sell) = (buys[i], sells[j]);
        if buy.limit_price < sell.limit_price {
            break;
        }

        let quantity = buy_left[i].min(sell_left[j]);
        matches.push(Match {
            hour: buy.hour,
            buy_bid_id: buy.id,
            sell_bid_id: sell.id,
            quantity,
            execution_price: buy.limit_price.midpoint(sell.limit_price),
        });

        buy_left[i] -= quantity;
        sell_left[j] -= quantity;
        if buy_left[i].is_zero() {
            i += 1;
        }
        if sell_left[j].is_zero() {
            j += 1;
        }
    }
    matches
}

/// One mutex per trading date, created on first use
#[derive(Debug, Default)]
struct DateLocks {
    locks: Mutex<HashMap<TradingDate, Arc<Mutex<()>>>>,
}

impl DateLocks {
    fn for_date(&self, trading_date: TradingDate) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.lock().entry(trading_date).or_default())
    }
}

pub struct ClearingEngine {
    store: Arc<MarketStore>,
    clock: Arc<dyn Clock>,
    events: Arc<EventLog>,
    locks: DateLocks,
}

impl ClearingEngine {
    pub fn new(store: Arc<MarketStore>, clock: Arc<dyn Clock>, events: Arc<EventLog>) -> Self {
        Self {
            store,
            clock,
            events,
            locks: DateLocks::default(),
        }
    }

    /// Clear every hour of a trading date. safe to call again at any time:
    /// only PENDING volume is ever matched, so a rerun creates nothing new
    /// for volume already settled.
    pub fn clear(&self, trading_date: TradingDate) -> Result<ClearingResult, ClearingError> {
        let lock = self.locks.for_date(trading_date);
        let _guard = lock.lock();

        let now = self.clock.now();
        let pending = self.store.pending_bids(trading_date, None);
        let mut result = ClearingResult::empty(trading_date, pending.len());

        if pending.is_empty() {
            info!(%trading_date, "no pending bids to clear");
            return Ok(result);
        }
        info!(%trading_date, bids = pending.len(), "clearing started");

        let mut versions: HashMap<BidId, u64> = pending.iter().map(|b| (b.id, b.version)).collect();
        let mut by_hour: BTreeMap<Hour, Vec<Bid>> = BTreeMap::new();
        for bid in pending {
            by_hour.entry(bid.hour).or_default().push(bid);
        }

        for (hour, bids) in &by_hour {
            let matches = match_hour(bids);
            if matches.is_empty() {
                debug!(%trading_date, %hour, "no crossing bids");
                continue;
            }
            result.hours_matched += 1;

            for m in &matches {
                let receipt = self.commit(m, &mut versions, Timestamp::from(now))?;
                self.record_match(trading_date, m, &receipt, now);

                result.contracts_created += 2;
                result.matched_volume += m.quantity;
                result.bids_executed += usize::from(receipt.buy_executed) + usize::from(receipt.sell_executed);
            }
        }

        info!(
            %trading_date,
            contracts = result.contracts_created,
            volume = %result.matched_volume,
            hours = result.hours_matched,
            "clearing finished"
        );
        self.events.record(
            now,
            EventPayload::ClearingCompleted(ClearingCompletedEvent {
                trading_date,
                contracts_created: result.contracts_created,
                bids_processed: result.bids_processed,
                matched_volume: result.matched_volume,
            }),
        );
        Ok(result)
    }

    fn commit(
        &self,
        m: &Match,
        versions: &mut HashMap<BidId, u64>,
        at: Timestamp,
    ) -> Result<MatchReceipt, ClearingError> {
        let buy_version = versions.get(&m.buy_bid_id).copied().unwrap_or_default();
        let sell_version = versions.get(&m.sell_bid_id).copied().unwrap_or_default();

        let receipt = self
            .store
            .commit_match(m, buy_version, sell_version, at)
            .map_err(|e| {
                warn!(buy = %m.buy_bid_id, sell = %m.sell_bid_id, error = %e, "match aborted");
                e
            })?;

        versions.insert(m.buy_bid_id, receipt.buy_version);
        versions.insert(m.sell_bid_id, receipt.sell_version);
        Ok(receipt)
    }

    fn record_match(
        &self,
        trading_date: TradingDate,
        m: &Match,
        receipt: &MatchReceipt,
        at: chrono::DateTime<chrono::Utc>,
    ) {
        debug!(
            hour = %m.hour,
            buy = %m.buy_bid_id,
            sell = %m.sell_bid_id,
            quantity = %m.quantity,
            price = %m.execution_price,
            "matched"
        );
        self.events.record(
            at,
            EventPayload::Match(MatchEvent {
                trading_date,
                hour: m.hour,
                buy_bid_id: m.buy_bid_id,
                sell_bid_id: m.sell_bid_id,
                buy_contract_id: receipt.buy_contract_id,
                sell_contract_id: receipt.sell_contract_id,
                quantity: m.quantity,
                execution_price: m.execution_price,
            }),
        );

        for (bid_id, executed) in [(m.buy_bid_id, receipt.buy_executed), (m.sell_bid_id, receipt.sell_executed)] {
            if executed {
                self.events.record(
                    at,
                    EventPayload::BidExecuted(BidExecutedEvent {
                        bid_id,
                        quantity: m.quantity,
                    }),
                );
            }
        }
    }

    /// Close out a trading date: every bid still PENDING becomes UNFILLED.
    /// Partially filled bids keep their contracts. Returns how many bids moved.
    pub fn settle_unfilled(&self, trading_date: TradingDate) -> usize {
        let lock = self.locks.for_date(trading_date);
        let _guard = lock.lock();

        let now = self.clock.now();
        let settled = self.store.mark_unfilled(trading_date, Timestamp::from(now));
        for bid in &settled {
            self.events.record(
                now,
                EventPayload::BidUnfilled(BidUnfilledEvent {
                    bid_id: bid.id,
                    user_id: bid.user_id,
                    remaining_quantity: bid.remaining_quantity,
                }),
            );
        }

        info!(%trading_date, bids = settled.len(), "unfilled bids settled");
        settled.len()
    }

    pub fn summary(&self, trading_date: TradingDate) -> ClearingSummary {
        let contracts = self.store.contracts_matching(&ContractFilter::on_date(trading_date));

        let mut buy_contracts = 0;
        let mut matched_volume = Decimal::ZERO;
        let mut notional = Decimal::ZERO;
        for c in contracts.iter().filter(|c| c.side == Side::Buy) {
            buy_contracts += 1;
            matched_volume += c.quantity;
            notional += c.execution_price.value() * c.quantity;
        }

        let average_price = if matched_volume.is_zero() {
            None
        } else {
            Price::new(round_money(notional / matched_volume))
        };

        ClearingSummary {
            trading_date,
            total_contracts: contracts.len(),
            buy_contracts,
            sell_contracts: contracts.len() - buy_contracts,
            matched_volume,
            average_price,
        }
    }
}
