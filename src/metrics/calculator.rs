//! Calculator for equity-curve and trade statistics: drawdown, Sharpe, Sortino, Calmar, VaR.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use statrs::statistics::Statistics;

use crate::market::indicators;
use crate::models::{PerformanceHistoryPoint, PerformanceMetrics};
use crate::strategies::ClosedTrade;

/// Annual risk-free rate used when the caller has no better figure.
pub const DEFAULT_RISK_FREE_RATE: f64 = 0.02;

const SECONDS_PER_YEAR: f64 = 365.0 * 24.0 * 3600.0;
const DAILY_PERIODS_PER_YEAR: f64 = 365.0;

/// Calculator for portfolio performance metrics.
pub struct MetricsCalculator;

impl MetricsCalculator {
    /// Calculate performance metrics from a portfolio value series and its closed trades.
    pub fn calculate(
        history: &[PerformanceHistoryPoint],
        trades: &[ClosedTrade],
        risk_free_rate: f64,
    ) -> PerformanceMetrics {
        let mut metrics = PerformanceMetrics::default();

        Self::calculate_trade_metrics(&mut metrics, trades);

        if history.len() < 2 {
            return metrics;
        }

        let values: Vec<f64> = history
            .iter()
            .map(|p| p.portfolio_value.to_f64().unwrap_or(0.0))
            .collect();
        let timestamps: Vec<DateTime<Utc>> = history.iter().map(|p| p.timestamp).collect();
        let returns = indicators::returns(&values);
        let ppy = Self::periods_per_year(&timestamps);

        metrics.total_return_pct = indicators::pct_change(&values);
        metrics.annualized_return_pct =
            Self::annualized_return_pct(metrics.total_return_pct, returns.len(), ppy);
        metrics.volatility_pct = indicators::std_dev(&returns) * ppy.sqrt() * 100.0;
        metrics.max_drawdown_pct = Self::max_drawdown_pct(&values);
        metrics.sharpe_ratio = Self::sharpe_ratio(&returns, risk_free_rate, ppy);
        metrics.sortino_ratio = Self::sortino_ratio(&returns, risk_free_rate, ppy);
        metrics.calmar_ratio =
            Self::calmar_ratio(metrics.annualized_return_pct, metrics.max_drawdown_pct);

        metrics
    }

    /// Win/loss statistics from closed trades.
    fn calculate_trade_metrics(metrics: &mut PerformanceMetrics, trades: &[ClosedTrade]) {
        if trades.is_empty() {
            return;
        }

        let (wins, losses): (Vec<Decimal>, Vec<Decimal>) = trades
            .iter()
            .map(|t| t.pnl)
            .filter(|p| !p.is_zero())
            .partition(|p| *p > Decimal::ZERO);

        metrics.total_trades = trades.len();
        metrics.winning_trades = wins.len();
        metrics.losing_trades = losses.len();
        metrics.win_rate = wins.len() as f64 / trades.len() as f64;

        if !wins.is_empty() {
            metrics.avg_win = wins.iter().copied().sum::<Decimal>() / Decimal::from(wins.len() as u32);
            metrics.largest_win = wins.iter().copied().max().unwrap_or(Decimal::ZERO);
        }
        if !losses.is_empty() {
            metrics.avg_loss = losses.iter().map(|l| l.abs()).sum::<Decimal>()
                / Decimal::from(losses.len() as u32);
            metrics.largest_loss = losses.iter().map(|l| l.abs()).max().unwrap_or(Decimal::ZERO);
        }

        let gross_profit: Decimal = wins.iter().copied().sum();
        let gross_loss: Decimal = losses.iter().map(|l| l.abs()).sum();
        if gross_loss > Decimal::ZERO {
            metrics.profit_factor =
                gross_profit.to_f64().unwrap_or(0.0) / gross_loss.to_f64().unwrap_or(1.0);
        }
    }

    /// Periods per year implied by the median spacing of `timestamps`.
    ///
    /// Falls back to daily data when the spacing cannot be measured.
    pub fn periods_per_year(timestamps: &[DateTime<Utc>]) -> f64 {
        let mut gaps: Vec<f64> = timestamps
            .windows(2)
            .map(|w| (w[1] - w[0]).num_milliseconds() as f64 / 1000.0)
            .filter(|g| *g > 0.0)
            .collect();
        if gaps.is_empty() {
            return DAILY_PERIODS_PER_YEAR;
        }
        gaps.sort_by(|a, b| a.total_cmp(b));
        let mid = gaps.len() / 2;
        let median = if gaps.len() % 2 == 0 {
            (gaps[mid - 1] + gaps[mid]) / 2.0
        } else {
            gaps[mid]
        };
        SECONDS_PER_YEAR / median
    }

    /// Compound `total_return_pct` over `periods` up to a yearly rate.
    pub fn annualized_return_pct(total_return_pct: f64, periods: usize, periods_per_year: f64) -> f64 {
        if periods == 0 || periods_per_year <= 0.0 {
            return 0.0;
        }
        let growth = 1.0 + total_return_pct / 100.0;
        if growth <= 0.0 {
            return -100.0;
        }
        let annualized = (growth.powf(periods_per_year / periods as f64) - 1.0) * 100.0;
        if annualized.is_finite() {
            annualized
        } else {
            f64::MAX
        }
    }

    /// Maximum decline from a running peak, in percent.
    pub fn max_drawdown_pct(values: &[f64]) -> f64 {
        let mut peak = f64::MIN;
        let mut max_dd = 0.0f64;
        for &v in values {
            if v > peak {
                peak = v;
            }
            if peak > 0.0 {
                max_dd = max_dd.max((peak - v) / peak * 100.0);
            }
        }
        max_dd
    }

    pub fn sharpe_ratio(returns: &[f64], risk_free_rate: f64, periods_per_year: f64) -> f64 {
        if returns.len() < 2 {
            return 0.0;
        }
        let rf = risk_free_rate / periods_per_year;
        let excess: Vec<f64> = returns.iter().map(|r| r - rf).collect();
        let sd = indicators::std_dev(&excess);
        if sd <= 0.0 {
            return 0.0;
        }
        excess.iter().mean() / sd * periods_per_year.sqrt()
    }

    /// Sortino ratio using downside deviation below the per-period risk-free rate.
    pub fn sortino_ratio(returns: &[f64], risk_free_rate: f64, periods_per_year: f64) -> f64 {
        if returns.len() < 2 {
            return 0.0;
        }
        let rf = risk_free_rate / periods_per_year;
        let excess: Vec<f64> = returns.iter().map(|r| r - rf).collect();
        let downside =
            (excess.iter().map(|e| e.min(0.0).powi(2)).sum::<f64>() / excess.len() as f64).sqrt();
        if downside <= 0.0 {
            return 0.0;
        }
        excess.iter().mean() / downside * periods_per_year.sqrt()
    }

    pub fn calmar_ratio(annualized_return_pct: f64, max_drawdown_pct: f64) -> f64 {
        if max_drawdown_pct <= 0.0 {
            return 0.0;
        }
        annualized_return_pct / max_drawdown_pct
    }

    /// Historical-simulation VaR and CVaR at `confidence` (e.g. 0.95).
    ///
    /// Both are per-period returns; negative values are losses.
    pub fn value_at_risk(returns: &[f64], confidence: f64) -> (f64, f64) {
        let mut sorted: Vec<f64> = returns.iter().copied().filter(|r| r.is_finite()).collect();
        if sorted.is_empty() {
            return (0.0, 0.0);
        }
        sorted.sort_by(|a, b| a.total_cmp(b));
        let idx = (((1.0 - confidence) * sorted.len() as f64).floor() as usize).min(sorted.len() - 1);
        let var = sorted[idx];
        let cvar = indicators::mean(&sorted[..=idx]);
        (var, cvar)
    }
}
