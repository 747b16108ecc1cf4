//! Clearing runs and contract lifecycle.

use super::core::Engine;
use super::results::{CompletionTarget, EngineError};
use crate::clearing::{ClearingResult, ClearingSummary};
use crate::contract::{Contract, ContractFilter, ContractStatusCounts};
use crate::types::{ContractId, TradingDate};

impl Engine {
    /// Clear every hour of the date. safe to rerun.
    pub fn run_clearing(&self, trading_date: TradingDate) -> Result<ClearingResult, EngineError> {
        Ok(self.clearing.clear(trading_date)?)
    }

    /// Move every bid of the date still PENDING to UNFILLED
    pub fn settle_unfilled(&self, trading_date: TradingDate) -> usize {
        self.clearing.settle_unfilled(trading_date)
    }

    pub fn clearing_summary(&self, trading_date: TradingDate) -> ClearingSummary {
        self.clearing.summary(trading_date)
    }

    /// ACTIVE -> COMPLETED for one contract or a whole date. returns how many moved.
    pub fn complete_contracts(&self, target: CompletionTarget) -> Result<usize, EngineError> {
        match target {
            CompletionTarget::Date(trading_date) => Ok(self.contracts.complete_all_active(trading_date)),
            CompletionTarget::Contract(contract_id) => Ok(self.contracts.complete(contract_id)?),
        }
    }

    pub fn contracts(&self, filter: ContractFilter) -> Vec<Contract> {
        self.contracts.query(filter)
    }

    pub fn contract(&self, contract_id: ContractId) -> Option<Contract> {
        self.contracts.get(contract_id)
    }

    pub fn contract_status_counts(&self, trading_date: TradingDate) -> ContractStatusCounts {
        self.contracts.status_counts(trading_date)
    }
}
