//! PnL requests.

use super::core::Engine;
use super::results::EngineError;
use crate::pnl::{PnlRecord, PnlSummary, PortfolioPnl};
use crate::types::{TradingDate, UserId};

impl Engine {
    pub fn compute_pnl(&self, user_id: UserId, trading_date: TradingDate) -> Result<Vec<PnlRecord>, EngineError> {
        Ok(self.pnl.calculate(user_id, trading_date)?)
    }

    pub fn pnl_summary(&self, user_id: UserId, trading_date: TradingDate) -> Result<PnlSummary, EngineError> {
        Ok(self.pnl.summarize(user_id, trading_date)?)
    }

    /// Stored records between two dates, both inclusive
    pub fn pnl_history(
        &self,
        user_id: UserId,
        from: Option<TradingDate>,
        to: Option<TradingDate>,
    ) -> Vec<PnlRecord> {
        self.pnl.records(user_id, from, to)
    }

    pub fn portfolio_pnl(&self, user_id: UserId) -> PortfolioPnl {
        self.pnl.portfolio(user_id)
    }
}
