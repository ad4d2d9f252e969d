//! Market observation model: one timestamped price/volume sample for a symbol.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// A single market data point delivered by the feed (live or synthetic).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketObservation {
    /// Asset symbol (e.g., "BTC")
    pub symbol: String,

    /// When the observation was taken
    pub timestamp: DateTime<Utc>,

    /// Last traded price in USD
    pub price: Decimal,

    /// Traded volume in USD for the observation period
    pub volume: Decimal,

    /// Percentage change over the last 24 hours
    #[serde(default)]
    pub change_24h: f64,

    /// Percentage change over the last hour
    #[serde(default)]
    pub change_1h: f64,

    /// 24h high
    pub high_24h: Decimal,

    /// 24h low
    pub low_24h: Decimal,
}

impl MarketObservation {
    /// Build an observation whose high/low collapse onto the price.
    pub fn new(symbol: impl Into<String>, timestamp: DateTime<Utc>, price: Decimal, volume: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp,
            price,
            volume,
            change_24h: 0.0,
            change_1h: 0.0,
            high_24h: price,
            low_24h: price,
        }
    }

    /// Reject observations that cannot describe a real market state.
    pub fn validate(&self) -> Result<()> {
        if self.symbol.is_empty() {
            return Err(EngineError::invalid_observation("<empty>", "symbol is empty"));
        }
        if self.price <= Decimal::ZERO {
            return Err(EngineError::invalid_observation(
                &self.symbol,
                format!("price must be positive, got {}", self.price),
            ));
        }
        if self.volume < Decimal::ZERO {
            return Err(EngineError::invalid_observation(
                &self.symbol,
                format!("volume must be non-negative, got {}", self.volume),
            ));
        }
        if !self.change_24h.is_finite() || !self.change_1h.is_finite() {
            return Err(EngineError::invalid_observation(
                &self.symbol,
                "change fields must be finite",
            ));
        }
        if self.high_24h < self.low_24h {
            return Err(EngineError::invalid_observation(
                &self.symbol,
                format!("high {} below low {}", self.high_24h, self.low_24h),
            ));
        }
        Ok(())
    }

    pub fn price_f64(&self) -> f64 {
        self.price.to_f64().unwrap_or(0.0)
    }

    pub fn volume_f64(&self) -> f64 {
        self.volume.to_f64().unwrap_or(0.0)
    }

    /// Typical price `(high + low + close) / 3`.
    pub fn typical_price(&self) -> f64 {
        let high = self.high_24h.to_f64().unwrap_or(0.0);
        let low = self.low_24h.to_f64().unwrap_or(0.0);
        (high + low + self.price_f64()) / 3.0
    }
}
