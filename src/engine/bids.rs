//! Bid submission and management.

use chrono::{DateTime, Utc};

use super::core::Engine;
use super::results::EngineError;
use crate::bid::{Bid, BidAmendment, BidRequest};
use crate::types::{BidId, Hour, TradingDate, UserId};

impl Engine {
    /// Submit a new bid. fails with InvalidInput, MarketClosed or LimitExceeded.
    pub fn submit_bid(&self, request: BidRequest) -> Result<Bid, EngineError> {
        Ok(self.ledger.submit(request)?)
    }

    pub fn cancel_bid(&self, bid_id: BidId) -> Result<Bid, EngineError> {
        Ok(self.ledger.cancel(bid_id)?)
    }

    pub fn amend_bid(&self, bid_id: BidId, amendment: BidAmendment) -> Result<Bid, EngineError> {
        Ok(self.ledger.amend(bid_id, amendment)?)
    }

    pub fn bid(&self, bid_id: BidId) -> Option<Bid> {
        self.ledger.get(bid_id)
    }

    pub fn bids_for_user(&self, user_id: UserId, trading_date: Option<TradingDate>) -> Vec<Bid> {
        self.ledger.bids_for_user(user_id, trading_date)
    }

    pub fn pending_bids(&self, trading_date: TradingDate, hour: Option<Hour>) -> Vec<Bid> {
        self.ledger.pending_bids(trading_date, hour)
    }

    pub fn cutoff_for(&self, trading_date: TradingDate) -> DateTime<Utc> {
        self.ledger.cutoff_for(trading_date)
    }

    pub fn is_open(&self, trading_date: TradingDate) -> bool {
        self.ledger.is_open(trading_date)
    }
}
