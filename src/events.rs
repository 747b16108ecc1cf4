// 11.0: every state change produces an event. used for audit trails and for
// notifying external systems. the EventPayload enum lists all event types.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::info;

use crate::types::{BidId, ContractId, Hour, Money, Price, Side, Timestamp, TradingDate, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            id,
            timestamp,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    // Ledger events
    BidSubmitted(BidSubmittedEvent),
    BidRejected(BidRejectedEvent),
    BidAmended(BidAmendedEvent),
    BidCancelled(BidCancelledEvent),

    // Clearing events
    Match(MatchEvent),
    BidExecuted(BidExecutedEvent),
    BidUnfilled(BidUnfilledEvent),
    ClearingCompleted(ClearingCompletedEvent),

    // Contract events
    ContractCompleted(ContractCompletedEvent),

    // PnL events
    PnlComputed(PnlComputedEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidSubmittedEvent {
    pub bid_id: BidId,
    pub user_id: UserId,
    pub trading_date: TradingDate,
    pub hour: Hour,
    pub side: Side,
    pub quantity: Decimal,
    pub limit_price: Price,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidRejectedEvent {
    pub user_id: UserId,
    pub trading_date: TradingDate,
    pub hour: u8,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidAmendedEvent {
    pub bid_id: BidId,
    pub hour: Hour,
    pub quantity: Decimal,
    pub remaining_quantity: Decimal,
    pub limit_price: Price,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidCancelledEvent {
    pub bid_id: BidId,
    pub user_id: UserId,
    pub remaining_quantity: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchEvent {
    pub trading_date: TradingDate,
    pub hour: Hour,
    pub buy_bid_id: BidId,
    pub sell_bid_id: BidId,
    pub buy_contract_id: ContractId,
    pub sell_contract_id: ContractId,
    pub quantity: Decimal,
    pub execution_price: Price,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidExecutedEvent {
    pub bid_id: BidId,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidUnfilledEvent {
    pub bid_id: BidId,
    pub user_id: UserId,
    pub remaining_quantity: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearingCompletedEvent {
    pub trading_date: TradingDate,
    pub contracts_created: usize,
    pub bids_processed: usize,
    pub matched_volume: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractCompletedEvent {
    pub contract_id: ContractId,
    pub user_id: UserId,
    pub trading_date: TradingDate,
    pub hour: Hour,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PnlComputedEvent {
    pub user_id: UserId,
    pub trading_date: TradingDate,
    pub records: usize,
    pub total_pnl: Money,
}

/// Bounded, thread-safe event log. oldest events drop first.
#[derive(Debug)]
pub struct EventLog {
    inner: Mutex<LogState>,
    max_events: usize,
    echo: bool,
}

#[derive(Debug)]
struct LogState {
    events: VecDeque<Event>,
    next_id: u64,
}

impl EventLog {
    pub fn new(max_events: usize) -> Self {
        Self {
            inner: Mutex::new(LogState {
                events: VecDeque::new(),
                next_id: 1,
            }),
            max_events,
            echo: false,
        }
    }

    /// Also log every recorded event through tracing
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn record(&self, at: DateTime<Utc>, payload: EventPayload) -> EventId {
        let mut state = self.inner.lock();
        let id = EventId(state.next_id);
        state.next_id += 1;

        if self.echo {
            info!(event = id.0, payload = ?payload, "event");
        }
        state.events.push_back(Event::new(id, Timestamp::from(at), payload));

        while state.events.len() > self.max_events {
            state.events.pop_front();
        }
        id
    }

    pub fn events(&self) -> Vec<Event> {
        self.inner.lock().events.iter().cloned().collect()
    }

    pub fn recent(&self, count: usize) -> Vec<Event> {
        let state = self.inner.lock();
        let start = state.events.len().saturating_sub(count);
        state.events.iter().skip(start).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use rust_decimal_macros::dec;

    fn cancelled(id: u64) -> EventPayload {
        EventPayload::BidCancelled(BidCancelledEvent {
            bid_id: BidId(id),
            user_id: UserId(1),
            remaining_quantity: dec!(5),
        })
    }

    #[test]
    fn event_log_assigns_sequential_ids() {
        let log = EventLog::new(10);
        let at = Utc.with_ymd_and_hms(2025, 9, 1, 8, 0, 0).unwrap();

        assert_eq!(log.record(at, cancelled(1)), EventId(1));
        assert_eq!(log.record(at, cancelled(2)), EventId(2));
        assert_eq!(log.len(), 2);
        assert_eq!(log.events()[0].timestamp, Timestamp::from(at));
    }

    #[test]
    fn event_log_is_bounded() {
        let log = EventLog::new(3);
        let at = Utc.with_ymd_and_hms(2025, 9, 1, 8, 0, 0).unwrap();
        for i in 0..5 {
            log.record(at, cancelled(i));
        }

        let events = log.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].id, EventId(3));
        assert_eq!(log.recent(1)[0].id, EventId(5));
    }

    #[test]
    fn match_event_serializes() {
        let event = MatchEvent {
            trading_date: NaiveDate::from_ymd_opt(2025, 9, 1).unwrap(),
            hour: Hour::new(10).unwrap(),
            buy_bid_id: BidId(1),
            sell_bid_id: BidId(2),
            buy_contract_id: ContractId(1),
            sell_contract_id: ContractId(2),
            quantity: dec!(100),
            execution_price: Price::new_unchecked(dec!(45)),
        };
        let json = serde_json::to_string(&EventPayload::Match(event)).unwrap();
        assert!(json.contains("Match"));
    }
}
