// 12.0.2: request types and errors for engine operations.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::bid::BidError;
use crate::clearing::ClearingError;
use crate::config::ConfigError;
use crate::contract::ContractError;
use crate::pnl::PnlError;
use crate::types::{ContractId, TradingDate};

/// What complete_contracts should complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionTarget {
    /// Every ACTIVE contract of the date
    Date(TradingDate),
    /// A single contract
    Contract(ContractId),
}

/// Failure classes a caller can act on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidInput,
    LimitExceeded,
    MarketClosed,
    NotFound,
    NotCancellable,
    PriceUnavailable,
    ConcurrencyConflict,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::LimitExceeded => "LIMIT_EXCEEDED",
            ErrorKind::MarketClosed => "MARKET_CLOSED",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::NotCancellable => "NOT_CANCELLABLE",
            ErrorKind::PriceUnavailable => "PRICE_UNAVAILABLE",
            ErrorKind::ConcurrencyConflict => "CONCURRENCY_CONFLICT",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("Bid error: {0}")]
    Bid(#[from] BidError),

    #[error("Clearing error: {0}")]
    Clearing(#[from] ClearingError),

    #[error("Contract error: {0}")]
    Contract(#[from] ContractError),

    #[error("PnL error: {0}")]
    Pnl(#[from] PnlError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Bid(e) => match e {
                BidError::InvalidInput { .. } => ErrorKind::InvalidInput,
                BidError::LimitExceeded { .. } => ErrorKind::LimitExceeded,
                BidError::MarketClosed { .. } => ErrorKind::MarketClosed,
                BidError::NotFound(_) => ErrorKind::NotFound,
                BidError::NotCancellable { .. } => ErrorKind::NotCancellable,
                BidError::ConcurrencyConflict(_) => ErrorKind::ConcurrencyConflict,
            },
            EngineError::Clearing(ClearingError::ConcurrencyConflict { .. }) => ErrorKind::ConcurrencyConflict,
            EngineError::Contract(ContractError::NotFound(_)) => ErrorKind::NotFound,
            EngineError::Pnl(PnlError::PriceUnavailable { .. }) => ErrorKind::PriceUnavailable,
            EngineError::Pnl(PnlError::Overflow { .. }) => ErrorKind::InvalidInput,
            EngineError::Config(_) => ErrorKind::InvalidInput,
        }
    }

    /// True when retrying the same request unchanged can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::ConcurrencyConflict | ErrorKind::PriceUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BidId, Hour};
    use chrono::NaiveDate;

    #[test]
    fn kinds_map_onto_the_taxonomy() {
        let missing = EngineError::from(BidError::NotFound(BidId(1)));
        assert_eq!(missing.kind(), ErrorKind::NotFound);
        assert!(!missing.is_retryable());

        let missing_price = EngineError::from(PnlError::PriceUnavailable {
            trading_date: NaiveDate::from_ymd_opt(2025, 9, 1).unwrap(),
            hour: Hour::new(3).unwrap(),
        });
        assert_eq!(missing_price.kind(), ErrorKind::PriceUnavailable);
        assert!(missing_price.is_retryable());

        let conflict = EngineError::from(ClearingError::ConcurrencyConflict { bid_id: BidId(2) });
        assert!(conflict.is_retryable());
        assert_eq!(conflict.kind().to_string(), "CONCURRENCY_CONFLICT");

        let overflow = EngineError::from(PnlError::Overflow { contract_id: ContractId(4) });
        assert_eq!(overflow.kind(), ErrorKind::InvalidInput);
        assert!(!overflow.is_retryable());
    }
}
