//! Bid types and validation.
//!
//! A bid is one user's hourly order for a trading date. The original quantity
//! is immutable once clearing has touched it; partial fills only ever reduce
//! `remaining_quantity`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::MarketConfig;
use crate::types::{BidId, Hour, Price, Side, Timestamp, TradingDate, UserId};

/// Bid lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BidStatus {
    /// Waiting for (more) counterparty volume
    Pending,
    /// Whole quantity matched
    Executed,
    /// Refused downstream. kept for parity with externally owned bid rows
    Rejected,
    /// Withdrawn by the user before gate closure
    Cancelled,
    /// Trading date settled with volume still unmatched
    Unfilled,
}

impl BidStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BidStatus::Pending)
    }
}

/// A stored bid
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bid {
    pub id: BidId,
    pub user_id: UserId,
    pub trading_date: TradingDate,
    pub hour: Hour,
    pub side: Side,
    pub quantity: Decimal,
    pub remaining_quantity: Decimal,
    pub limit_price: Price,
    pub status: BidStatus,
    pub submitted_at: Timestamp,
    pub updated_at: Timestamp,
    /// Bumped on every write, used to detect lost updates
    pub version: u64,
}

impl Bid {
    pub fn is_pending(&self) -> bool {
        self.status == BidStatus::Pending
    }

    pub fn filled_quantity(&self) -> Decimal {
        self.quantity - self.remaining_quantity
    }

    pub fn is_partially_filled(&self) -> bool {
        self.remaining_quantity < self.quantity
    }

    /// Consume matched volume. flips to Executed once nothing remains.
    pub fn fill(&mut self, quantity: Decimal) {
        debug_assert!(quantity <= self.remaining_quantity, "cannot fill more than remaining");
        self.remaining_quantity -= quantity;
        if self.remaining_quantity.is_zero() {
            self.status = BidStatus::Executed;
        }
    }

    pub(crate) fn touch(&mut self, at: Timestamp) {
        self.updated_at = at;
        self.version += 1;
    }
}

/// Raw submission as it arrives from the request layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidRequest {
    pub user_id: UserId,
    pub trading_date: TradingDate,
    pub hour: u8,
    pub side: Side,
    pub quantity: Decimal,
    pub limit_price: Decimal,
}

impl BidRequest {
    pub fn buy(user_id: UserId, trading_date: TradingDate, hour: u8, quantity: Decimal, limit_price: Decimal) -> Self {
        Self {
            user_id,
            trading_date,
            hour,
            side: Side::Buy,
            quantity,
            limit_price,
        }
    }

    pub fn sell(user_id: UserId, trading_date: TradingDate, hour: u8, quantity: Decimal, limit_price: Decimal) -> Self {
        Self {
            user_id,
            trading_date,
            hour,
            side: Side::Sell,
            quantity,
            limit_price,
        }
    }
}

/// Fields a user may change on a pending bid. None keeps the current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BidAmendment {
    pub quantity: Option<Decimal>,
    pub limit_price: Option<Decimal>,
    pub hour: Option<u8>,
}

/// Validated hour, quantity and price of a bid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BidTerms {
    pub hour: Hour,
    pub quantity: Decimal,
    pub limit_price: Price,
}

impl BidTerms {
    /// Check bounds and round the price to tick.
    pub fn validate(hour: u8, quantity: Decimal, limit_price: Decimal, config: &MarketConfig) -> Result<Self, BidError> {
        let hour = Hour::new(hour).ok_or_else(|| BidError::InvalidInput {
            reason: format!("hour {hour} is outside 0..=23"),
        })?;

        if quantity <= Decimal::ZERO {
            return Err(BidError::InvalidInput {
                reason: format!("quantity {quantity} must be positive"),
            });
        }
        if quantity > config.max_bid_quantity {
            return Err(BidError::InvalidInput {
                reason: format!("quantity {quantity} exceeds maximum {}", config.max_bid_quantity),
            });
        }
        if !config.is_whole_lot(quantity) {
            return Err(BidError::InvalidInput {
                reason: format!("quantity {quantity} is not a multiple of lot size {}", config.lot_size),
            });
        }

        if limit_price > config.max_limit_price {
            return Err(BidError::InvalidInput {
                reason: format!("limit price {limit_price} exceeds maximum {}", config.max_limit_price),
            });
        }
        let limit_price = config
            .round_to_tick(limit_price)
            .and_then(Price::new)
            .ok_or_else(|| BidError::InvalidInput {
                reason: format!("limit price {limit_price} must be positive"),
            })?;

        Ok(Self {
            hour,
            quantity,
            limit_price,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BidError {
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("{user_id} already has {limit} pending bids for {trading_date} hour {hour}")]
    LimitExceeded {
        user_id: UserId,
        trading_date: TradingDate,
        hour: Hour,
        limit: usize,
    },

    #[error("Market for {trading_date} closed at {cutoff}")]
    MarketClosed {
        trading_date: TradingDate,
        cutoff: DateTime<Utc>,
    },

    #[error("Bid {0} not found")]
    NotFound(BidId),

    #[error("Bid {id} is {status:?}, only pending bids can change")]
    NotCancellable { id: BidId, status: BidStatus },

    #[error("Bid {0} was modified concurrently")]
    ConcurrencyConflict(BidId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn sample_bid(quantity: Decimal) -> Bid {
        Bid {
            id: BidId(1),
            user_id: UserId(7),
            trading_date: NaiveDate::from_ymd_opt(2025, 9, 1).unwrap(),
            hour: Hour::new(10).unwrap(),
            side: Side::Buy,
            quantity,
            remaining_quantity: quantity,
            limit_price: Price::new_unchecked(dec!(50)),
            status: BidStatus::Pending,
            submitted_at: Timestamp::from_millis(0),
            updated_at: Timestamp::from_millis(0),
            version: 0,
        }
    }

    #[test]
    fn partial_fill_stays_pending() {
        let mut bid = sample_bid(dec!(100));
        bid.fill(dec!(40));
        assert!(bid.is_pending());
        assert!(bid.is_partially_filled());
        assert_eq!(bid.remaining_quantity, dec!(60));
        assert_eq!(bid.filled_quantity(), dec!(40));
        assert_eq!(bid.quantity, dec!(100));
    }

    #[test]
    fn full_fill_executes() {
        let mut bid = sample_bid(dec!(100));
        bid.fill(dec!(60));
        bid.fill(dec!(40));
        assert_eq!(bid.status, BidStatus::Executed);
        assert!(bid.status.is_terminal());
    }

    #[test]
    fn terms_reject_bad_hour() {
        let config = MarketConfig::default();
        let err = BidTerms::validate(24, dec!(1), dec!(10), &config).unwrap_err();
        assert!(matches!(err, BidError::InvalidInput { .. }));
    }

    #[test]
    fn terms_reject_non_positive_quantity_and_price() {
        let config = MarketConfig::default();
        assert!(BidTerms::validate(1, dec!(0), dec!(10), &config).is_err());
        assert!(BidTerms::validate(1, dec!(-5), dec!(10), &config).is_err());
        assert!(BidTerms::validate(1, dec!(5), dec!(0), &config).is_err());
        // rounds to zero at cent precision
        assert!(BidTerms::validate(1, dec!(5), dec!(0.004), &config).is_err());
    }

    #[test]
    fn terms_enforce_lot_and_max() {
        let config = MarketConfig::default();
        assert!(BidTerms::validate(1, dec!(0.0005), dec!(10), &config).is_err());
        assert!(BidTerms::validate(1, dec!(10_001), dec!(10), &config).is_err());
        assert!(BidTerms::validate(1, dec!(10_000), dec!(10), &config).is_ok());
    }

    #[test]
    fn terms_enforce_max_price() {
        let config = MarketConfig::default();
        assert!(BidTerms::validate(1, dec!(1), dec!(100_000), &config).is_ok());
        let err = BidTerms::validate(1, dec!(1), dec!(100_000.01), &config).unwrap_err();
        assert!(matches!(err, BidError::InvalidInput { .. }));
        // far outside Decimal's tick-division range, still a clean rejection
        let err = BidTerms::validate(1, dec!(1), Decimal::MAX, &config).unwrap_err();
        assert!(matches!(err, BidError::InvalidInput { .. }));
    }

    #[test]
    fn terms_round_price_to_tick() {
        let config = MarketConfig::default();
        let terms = BidTerms::validate(1, dec!(5), dec!(45.678), &config).unwrap();
        assert_eq!(terms.limit_price.value(), dec!(45.68));
        assert_eq!(terms.hour.value(), 1);
    }
}
