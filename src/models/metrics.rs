//! Performance and risk metric records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One point of the portfolio value time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceHistoryPoint {
    pub timestamp: DateTime<Utc>,
    pub portfolio_value: Decimal,
    /// Decline from the running peak, in percent
    pub drawdown_pct: f64,
}

/// Backtest performance statistics for one (scenario, strategy) run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    // === Returns ===
    /// Total return in percent
    pub total_return_pct: f64,

    /// Annualized return in percent
    pub annualized_return_pct: f64,

    /// Per-period return volatility, annualized, in percent
    pub volatility_pct: f64,

    // === Risk-adjusted ===
    /// Maximum drawdown in percent
    pub max_drawdown_pct: f64,

    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,

    // === Trades ===
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,

    /// Win rate (0.0 to 1.0)
    pub win_rate: f64,

    /// Gross profit / gross loss
    pub profit_factor: f64,

    pub avg_win: Decimal,
    pub avg_loss: Decimal,
    pub largest_win: Decimal,
    pub largest_loss: Decimal,
}

/// Portfolio-level risk snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub portfolio_value: Decimal,

    /// Market value of all open positions
    pub total_exposure: Decimal,

    /// Exposure as a percent of portfolio value
    pub exposure_pct: f64,

    pub max_drawdown_pct: f64,
    pub current_drawdown_pct: f64,

    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,

    /// Historical 95% value-at-risk, as a per-period return (negative = loss)
    pub var_95: f64,

    /// Mean of returns at or below the VaR cutoff
    pub cvar_95: f64,

    /// Mean absolute pairwise return correlation of held symbols; `None` when
    /// there is not enough overlapping history to measure it
    pub correlation: Option<f64>,

    /// Portfolio beta against an equal-weighted index of observed symbols; `None`
    /// when not measurable
    pub beta: Option<f64>,

    /// Value-weighted per-period volatility of held symbols, in percent
    pub volatility_pct: f64,
}

/// Dashboard summary for a single strategy instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub strategy_id: String,
    pub cash: Decimal,
    pub invested: Decimal,
    pub market_value: Decimal,
    pub total_value: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub open_positions: usize,
    pub closed_trades: usize,
    /// Win rate over closed trades (0.0 to 1.0)
    pub win_rate: f64,
}

impl PerformanceMetrics {
    /// Whether enough trades closed for win-rate based statements to mean anything.
    pub fn has_trade_sample(&self) -> bool {
        self.total_trades >= 3
    }
}
