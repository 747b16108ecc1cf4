// Price Source Integration
//
// The core only reads hourly prices. Whether they come from a mock generator,
// an ISO settlement feed or a database table is the collaborator's business;
// anything that can answer get_price(date, hour, kind) plugs in here.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{Hour, Price, TradingDate};

/// Which market a price belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceKind {
    DayAhead,
    RealTime,
}

/// Trait for price sources. Implement this to integrate a specific feed.
pub trait PriceSource: Send + Sync {
    /// Hourly price, or None when the feed has not published it yet
    fn get_price(&self, date: TradingDate, hour: Hour, kind: PriceKind) -> Option<Price>;
}

/// In-memory price table. prices can be republished, real-time ones usually are.
#[derive(Debug, Default)]
pub struct PriceBook {
    prices: RwLock<HashMap<(TradingDate, Hour, PriceKind), Price>>,
}

impl PriceBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish or overwrite a single hourly price
    pub fn set_price(&self, date: TradingDate, hour: Hour, kind: PriceKind, price: Price) {
        self.prices.write().insert((date, hour, kind), price);
    }

    /// Publish a batch of hourly prices for one date
    pub fn set_hourly<I>(&self, date: TradingDate, kind: PriceKind, prices: I)
    where
        I: IntoIterator<Item = (Hour, Price)>,
    {
        let mut table = self.prices.write();
        for (hour, price) in prices {
            table.insert((date, hour, kind), price);
        }
    }

    /// Withdraw a published price
    pub fn remove_price(&self, date: TradingDate, hour: Hour, kind: PriceKind) -> Option<Price> {
        self.prices.write().remove(&(date, hour, kind))
    }

    /// All published prices for a date, ordered by hour
    pub fn prices_for(&self, date: TradingDate, kind: PriceKind) -> Vec<(Hour, Price)> {
        let table = self.prices.read();
        Hour::all()
            .filter_map(|hour| table.get(&(date, hour, kind)).map(|p| (hour, *p)))
            .collect()
    }
}

impl PriceSource for PriceBook {
    fn get_price(&self, date: TradingDate, hour: Hour, kind: PriceKind) -> Option<Price> {
        self.prices.read().get(&(date, hour, kind)).copied()
    }
}
