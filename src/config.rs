// 7.0 config.rs: market settings in one place. gate closure, per-hour caps, tick and lot sizes.
// 7.1 cutoff_instant resolves the local gate closure time to a UTC instant.

use chrono::{DateTime, Days, Duration, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::TradingDate;

// Complete configuration for one market
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketConfig {
    // Human readable market name
    pub name: String,
    // Market timezone, gate closure is evaluated in local time
    #[serde(with = "tz_serde")]
    pub timezone: Tz,
    // Local time-of-day at which bidding for a trading date closes
    pub cutoff_time: NaiveTime,
    // How many days before the trading date the cutoff falls (0 = same day)
    pub cutoff_lead_days: u32,
    // Max PENDING bids per (user, trading date, hour)
    pub max_pending_bids_per_hour: usize,
    // Limit prices are rounded to this increment
    pub tick_size: Decimal,
    // Quantities must be a whole number of lots
    pub lot_size: Decimal,
    // Largest quantity a single bid may carry
    pub max_bid_quantity: Decimal,
    // Highest limit price a bid may carry
    pub max_limit_price: Decimal,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            name: "Simulated Day-Ahead".to_string(),
            timezone: chrono_tz::UTC,
            cutoff_time: NaiveTime::from_hms_opt(11, 0, 0).unwrap_or_default(),
            cutoff_lead_days: 0,
            max_pending_bids_per_hour: 10,
            tick_size: Decimal::new(1, 2),           // $0.01
            lot_size: Decimal::new(1, 3),            // 0.001 MWh
            max_bid_quantity: Decimal::new(10_000, 0), // 10 GWh
            max_limit_price: Decimal::new(100_000, 0),  // $100k/MWh
        }
    }
}

impl MarketConfig {
    // ERCOT style gate: 10:00 Central on the day before delivery
    pub fn ercot() -> Self {
        Self {
            name: "ERCOT DAM".to_string(),
            timezone: chrono_tz::America::Chicago,
            cutoff_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap_or_default(),
            cutoff_lead_days: 1,
            ..Self::default()
        }
    }

    // CAISO style gate: 10:00 Pacific on the day before delivery
    pub fn caiso() -> Self {
        Self {
            name: "CAISO IFM".to_string(),
            timezone: chrono_tz::America::Los_Angeles,
            cutoff_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap_or_default(),
            cutoff_lead_days: 1,
            ..Self::default()
        }
    }

    // Validate the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_pending_bids_per_hour == 0 {
            return Err(ConfigError::InvalidLimit {
                reason: "per-hour bid cap must be at least 1".to_string(),
            });
        }

        if self.tick_size <= Decimal::ZERO {
            return Err(ConfigError::InvalidIncrement {
                reason: "tick size must be positive".to_string(),
            });
        }

        if self.lot_size <= Decimal::ZERO {
            return Err(ConfigError::InvalidIncrement {
                reason: "lot size must be positive".to_string(),
            });
        }

        if self.max_bid_quantity < self.lot_size {
            return Err(ConfigError::InvalidLimit {
                reason: "max bid quantity is below one lot".to_string(),
            });
        }

        if self.max_limit_price < self.tick_size {
            return Err(ConfigError::InvalidLimit {
                reason: "max limit price is below one tick".to_string(),
            });
        }

        Ok(())
    }

    /// Instant after which bids for `trading_date` can no longer be created or modified.
    ///
    /// Ambiguous local times (DST fold) resolve to the earlier instant. A local time
    /// that does not exist (DST gap) resolves to the first instant after the gap.
    pub fn cutoff_instant(&self, trading_date: TradingDate) -> DateTime<Utc> {
        let gate_date = trading_date
            .checked_sub_days(Days::new(u64::from(self.cutoff_lead_days)))
            .unwrap_or(trading_date);
        let local = NaiveDateTime::new(gate_date, self.cutoff_time);

        resolve_local(&self.timezone, local).with_timezone(&Utc)
    }

    /// Round a limit price to the configured tick. None if the price is out of Decimal range.
    pub fn round_to_tick(&self, price: Decimal) -> Option<Decimal> {
        price.checked_div(self.tick_size)?.round().checked_mul(self.tick_size)
    }

    pub fn is_whole_lot(&self, quantity: Decimal) -> bool {
        (quantity % self.lot_size).is_zero()
    }
}

fn resolve_local(tz: &Tz, local: NaiveDateTime) -> DateTime<Tz> {
    if let Some(dt) = tz.from_local_datetime(&local).earliest() {
        return dt;
    }
    // gaps are at most a couple of hours, step forward minute by minute
    let mut candidate = local;
    for _ in 0..180 {
        candidate += Duration::minutes(1);
        if let Some(dt) = tz.from_local_datetime(&candidate).earliest() {
            return dt;
        }
    }
    tz.from_utc_datetime(&local)
}

// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid limit: {reason}")]
    InvalidLimit { reason: String },

    #[error("Invalid increment: {reason}")]
    InvalidIncrement { reason: String },
}

/// Tz serializes by IANA name
mod tz_serde {
    use chrono_tz::Tz;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    pub fn serialize<S>(tz: &Tz, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(tz.name())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Tz, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Tz::from_str(&s).map_err(serde::de::Error::custom)
    }
}
