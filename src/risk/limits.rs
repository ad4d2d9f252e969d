//! Portfolio risk limits.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Limits read by every risk check. Percentages are in percent units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Largest exposure to a single symbol, as a percent of portfolio value
    pub max_position_size_pct: f64,

    /// Largest total exposure, as a percent of portfolio value
    pub max_total_exposure_pct: f64,

    /// New buys are refused beyond this drawdown
    pub max_drawdown_pct: f64,

    /// Highest tolerated return correlation with an existing holding
    pub max_correlation: f64,

    /// Highest tolerated per-period return volatility of the traded symbol
    pub max_daily_volatility_pct: f64,

    /// Minimum traded volume of the latest observation, in USD
    pub min_liquidity: Decimal,

    /// Portfolio drawdown that triggers a full exit
    pub emergency_stop_loss_pct: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_size_pct: 20.0,
            max_total_exposure_pct: 80.0,
            max_drawdown_pct: 20.0,
            max_correlation: 0.8,
            max_daily_volatility_pct: 15.0,
            min_liquidity: dec!(10000),
            emergency_stop_loss_pct: 15.0,
        }
    }
}

impl RiskLimits {
    pub fn validate(&self) -> Result<()> {
        let pct_fields = [
            ("max_position_size_pct", self.max_position_size_pct),
            ("max_total_exposure_pct", self.max_total_exposure_pct),
            ("max_drawdown_pct", self.max_drawdown_pct),
            ("max_daily_volatility_pct", self.max_daily_volatility_pct),
            ("emergency_stop_loss_pct", self.emergency_stop_loss_pct),
        ];
        for (name, value) in pct_fields {
            if !(value > 0.0 && value <= 100.0) {
                return Err(EngineError::config(format!("{name} must be in (0, 100], got {value}")));
            }
        }
        if !(self.max_correlation > 0.0 && self.max_correlation <= 1.0) {
            return Err(EngineError::config(format!(
                "max_correlation must be in (0, 1], got {}",
                self.max_correlation
            )));
        }
        if self.min_liquidity < Decimal::ZERO {
            return Err(EngineError::config("min_liquidity must not be negative"));
        }
        Ok(())
    }
}
