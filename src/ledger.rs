//! Bid Ledger.
//!
//! Validates and stores bids, enforces gate closure and the per-hour pending
//! cap. Owns bid rows until clearing touches them; after that the only thing
//! the ledger may still do is cancel or amend the PENDING remainder.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::bid::{Bid, BidAmendment, BidError, BidRequest, BidStatus, BidTerms};
use crate::clock::Clock;
use crate::config::MarketConfig;
use crate::events::{
    BidAmendedEvent, BidCancelledEvent, BidRejectedEvent, BidSubmittedEvent, EventLog, EventPayload,
};
use crate::store::{MarketStore, NewBid};
use crate::types::{BidId, Hour, Timestamp, TradingDate, UserId};

pub struct BidLedger {
    store: Arc<MarketStore>,
    clock: Arc<dyn Clock>,
    config: Arc<MarketConfig>,
    events: Arc<EventLog>,
}

impl BidLedger {
    pub fn new(
        store: Arc<MarketStore>,
        clock: Arc<dyn Clock>,
        config: Arc<MarketConfig>,
        events: Arc<EventLog>,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            events,
        }
    }

    /// Validate and insert a new PENDING bid.
    ///
    /// Order of checks: input bounds, gate closure, then the per-hour cap.
    /// The cap check and the insert happen under one store lock.
    pub fn submit(&self, request: BidRequest) -> Result<Bid, BidError> {
        let now = self.clock.now();

        let result = self.try_submit(&request, now);
        match &result {
            Ok(bid) => {
                debug!(bid = %bid.id, user = %bid.user_id, hour = %bid.hour, side = %bid.side, "bid submitted");
                self.events.record(
                    now,
                    EventPayload::BidSubmitted(BidSubmittedEvent {
                        bid_id: bid.id,
                        user_id: bid.user_id,
                        trading_date: bid.trading_date,
                        hour: bid.hour,
                        side: bid.side,
                        quantity: bid.quantity,
                        limit_price: bid.limit_price,
                    }),
                );
            }
            Err(e) => {
                warn!(user = %request.user_id, date = %request.trading_date, hour = request.hour, error = %e, "bid rejected");
                self.events.record(
                    now,
                    EventPayload::BidRejected(BidRejectedEvent {
                        user_id: request.user_id,
                        trading_date: request.trading_date,
                        hour: request.hour,
                        reason: e.to_string(),
                    }),
                );
            }
        }
        result
    }

    fn try_submit(&self, request: &BidRequest, now: DateTime<Utc>) -> Result<Bid, BidError> {
        let terms = BidTerms::validate(request.hour, request.quantity, request.limit_price, &self.config)?;
        self.ensure_open(request.trading_date, now)?;

        self.store.insert_bid_capped(
            NewBid {
                user_id: request.user_id,
                trading_date: request.trading_date,
                side: request.side,
                terms,
                submitted_at: Timestamp::from(now),
            },
            self.config.max_pending_bids_per_hour,
        )
    }

    /// Withdraw a PENDING bid. a partially filled bid keeps its contracts.
    pub fn cancel(&self, bid_id: BidId) -> Result<Bid, BidError> {
        let now = self.clock.now();
        let current = self.store.bid(bid_id).ok_or(BidError::NotFound(bid_id))?;
        self.ensure_open(current.trading_date, now)?;

        let cancelled = self.store.update_pending_bid(
            bid_id,
            current.version,
            self.config.max_pending_bids_per_hour,
            Timestamp::from(now),
            |bid| {
                let mut next = bid.clone();
                next.status = BidStatus::Cancelled;
                Ok(next)
            },
        )?;

        debug!(bid = %bid_id, "bid cancelled");
        self.events.record(
            now,
            EventPayload::BidCancelled(BidCancelledEvent {
                bid_id,
                user_id: cancelled.user_id,
                remaining_quantity: cancelled.remaining_quantity,
            }),
        );
        Ok(cancelled)
    }

    /// Change hour, quantity or price of a PENDING bid.
    ///
    /// The merged bid is validated like a fresh submission. Submission time is
    /// kept, so an amendment does not reset price-time priority. Once part of
    /// the bid has been matched its hour is fixed and its quantity can only
    /// move above the already filled volume.
    pub fn amend(&self, bid_id: BidId, amendment: BidAmendment) -> Result<Bid, BidError> {
        let now = self.clock.now();
        let current = self.store.bid(bid_id).ok_or(BidError::NotFound(bid_id))?;
        self.ensure_open(current.trading_date, now)?;

        let amended = self.store.update_pending_bid(
            bid_id,
            current.version,
            self.config.max_pending_bids_per_hour,
            Timestamp::from(now),
            |bid| merge_amendment(bid, &amendment, &self.config),
        )?;

        debug!(bid = %bid_id, hour = %amended.hour, quantity = %amended.quantity, price = %amended.limit_price, "bid amended");
        self.events.record(
            now,
            EventPayload::BidAmended(BidAmendedEvent {
                bid_id,
                hour: amended.hour,
                quantity: amended.quantity,
                remaining_quantity: amended.remaining_quantity,
                limit_price: amended.limit_price,
            }),
        );
        Ok(amended)
    }

    pub fn get(&self, bid_id: BidId) -> Option<Bid> {
        self.store.bid(bid_id)
    }

    /// A user's bids in id order, optionally for one trading date
    pub fn bids_for_user(&self, user_id: UserId, trading_date: Option<TradingDate>) -> Vec<Bid> {
        self.store.bids_for_user(user_id, trading_date)
    }

    /// PENDING bids with volume left
    pub fn pending_bids(&self, trading_date: TradingDate, hour: Option<Hour>) -> Vec<Bid> {
        self.store.pending_bids(trading_date, hour)
    }

    pub fn cutoff_for(&self, trading_date: TradingDate) -> DateTime<Utc> {
        self.config.cutoff_instant(trading_date)
    }

    /// True while bids for the date can still be created or changed
    pub fn is_open(&self, trading_date: TradingDate) -> bool {
        self.clock.now() < self.cutoff_for(trading_date)
    }

    fn ensure_open(&self, trading_date: TradingDate, now: DateTime<Utc>) -> Result<(), BidError> {
        let cutoff = self.cutoff_for(trading_date);
        if now >= cutoff {
            return Err(BidError::MarketClosed { trading_date, cutoff });
        }
        Ok(())
    }
}

fn merge_amendment(bid: &Bid, amendment: &BidAmendment, config: &MarketConfig) -> Result<Bid, BidError> {
    let terms = BidTerms::validate(
        amendment.hour.unwrap_or(bid.hour.value()),
        amendment.quantity.unwrap_or(bid.quantity),
        amendment.limit_price.unwrap_or(bid.limit_price.value()),
        config,
    )?;

    let filled = bid.filled_quantity();
    if filled > Decimal::ZERO {
        if terms.hour != bid.hour {
            return Err(BidError::InvalidInput {
                reason: format!("{} is partially filled, its hour cannot change", bid.id),
            });
        }
        if terms.quantity <= filled {
            return Err(BidError::InvalidInput {
                reason: format!("quantity {} must exceed the {} already filled", terms.quantity, filled),
            });
        }
    }

    let mut next = bid.clone();
    next.hour = terms.hour;
    next.quantity = terms.quantity;
    next.remaining_quantity = terms.quantity - filled;
    next.limit_price = terms.limit_price;
    Ok(next)
}
