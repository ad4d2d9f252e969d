//! Scenario scoring: turns run statistics into a 0-100 score, issues and recommendations.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{PerformanceMetrics, PerformanceSummary, RiskMetrics, SignalAction};

use super::scenarios::Scenario;

/// Score required to pass.
pub const PASS_SCORE: f64 = 60.0;
/// Most issues a passing result may carry.
pub const MAX_PASSING_ISSUES: usize = 2;

/// Minimum total return expected in a bull run, in percent
const BULL_MIN_RETURN_PCT: f64 = 10.0;
/// Largest acceptable drawdown through a crash, in percent
const CRASH_MAX_DRAWDOWN_PCT: f64 = 20.0;
/// Executed trades above which a range-bound run counts as overtrading
const OVERTRADING_TRADES: usize = 20;

/// One signal that made it through risk validation and into the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutedTrade {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub key: String,
    pub action: SignalAction,
    pub quantity: Decimal,
    pub price: Decimal,
    pub confidence: f64,
    pub reason: String,
    #[serde(default)]
    pub stop_loss: bool,
    pub realized_pnl: Decimal,
}

/// Outcome of one (scenario, strategy) run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub scenario: Scenario,
    pub strategy_id: String,
    pub performance_metrics: PerformanceMetrics,
    pub trades: Vec<ExecutedTrade>,
    pub risk_metrics: RiskMetrics,

    /// Ledger summary at the end of the run
    pub summary: Option<PerformanceSummary>,

    /// Signals produced by the evaluator, before risk validation
    pub signals_emitted: usize,

    /// Signals the risk manager refused
    pub signals_rejected: usize,

    pub passed: bool,
    pub score: f64,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

impl TestResult {
    /// Result for a run that could not complete.
    pub fn failed(scenario: Scenario, strategy_id: impl Into<String>, issue: impl Into<String>) -> Self {
        Self {
            scenario,
            strategy_id: strategy_id.into(),
            performance_metrics: PerformanceMetrics::default(),
            trades: Vec::new(),
            risk_metrics: RiskMetrics::default(),
            summary: None,
            signals_emitted: 0,
            signals_rejected: 0,
            passed: false,
            score: 0.0,
            issues: vec![issue.into()],
            recommendations: vec!["Fix the failure before evaluating performance".to_string()],
        }
    }

    pub fn sells(&self) -> usize {
        self.trades.iter().filter(|t| t.action == SignalAction::Sell).count()
    }
}

/// Score, issues and recommendations for a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub score: f64,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

impl Assessment {
    pub fn passed(&self) -> bool {
        self.score >= PASS_SCORE && self.issues.len() <= MAX_PASSING_ISSUES
    }
}

/// Grade a run against general and scenario-specific thresholds.
pub fn score_result(scenario: Scenario, metrics: &PerformanceMetrics, trades: &[ExecutedTrade]) -> Assessment {
    let mut score: f64 = 50.0;
    let mut issues = Vec::new();
    let mut recommendations = Vec::new();

    let ret = metrics.total_return_pct;
    let dd = metrics.max_drawdown_pct;
    let sells = trades.iter().filter(|t| t.action == SignalAction::Sell).count();

    // General
    if ret > 0.0 {
        score += 10.0;
    } else if ret < -10.0 {
        score -= 10.0;
        issues.push(format!("Large loss of {:.1}%", ret));
    }
    if dd <= 10.0 {
        score += 10.0;
    } else if dd > CRASH_MAX_DRAWDOWN_PCT {
        score -= 15.0;
        issues.push(format!("Max drawdown {:.1}% above {:.0}%", dd, CRASH_MAX_DRAWDOWN_PCT));
        recommendations.push("Tighten stop losses or reduce position sizes".to_string());
    }
    if metrics.sharpe_ratio > 1.5 {
        score += 10.0;
    } else if metrics.sharpe_ratio < 0.0 {
        score -= 5.0;
    }
    if metrics.total_trades > 0 && metrics.win_rate > 0.6 {
        score += 10.0;
    }

    // Scenario-specific
    match scenario {
        Scenario::Bull | Scenario::VolatileBull => {
            let target = if scenario == Scenario::Bull {
                BULL_MIN_RETURN_PCT
            } else {
                BULL_MIN_RETURN_PCT / 2.0
            };
            if ret >= target {
                score += 15.0;
            } else {
                issues.push(format!("Return {:.1}% below {:.0}% in a rising market", ret, target));
                recommendations.push("Increase exposure when the trend is strong".to_string());
            }
        }
        Scenario::Bear => {
            if ret >= -5.0 {
                score += 15.0;
            } else {
                issues.push(format!("Lost {:.1}% in a falling market", -ret));
                recommendations.push("Reduce exposure or exit earlier in downtrends".to_string());
            }
        }
        Scenario::Crash => {
            if dd <= CRASH_MAX_DRAWDOWN_PCT {
                score += 20.0;
            } else {
                score -= 20.0;
                issues.push(format!("Crash drawdown {:.1}% above {:.0}%", dd, CRASH_MAX_DRAWDOWN_PCT));
            }
            if sells > 0 {
                score += 5.0;
            } else if !trades.is_empty() {
                issues.push("No exit during the crash".to_string());
                recommendations.push("Add protective exits for sharp declines".to_string());
            }
        }
        Scenario::Sideways | Scenario::VolatileSideways => {
            if ret >= -3.0 {
                score += 10.0;
            } else {
                issues.push(format!("Lost {:.1}% in a range-bound market", -ret));
            }
            if trades.len() > OVERTRADING_TRADES {
                issues.push(format!("Overtrading: {} trades in a range-bound market", trades.len()));
                recommendations.push("Lengthen cooldowns or rebalance intervals".to_string());
            }
        }
        Scenario::FlashCrashRecovery => {
            if dd <= 25.0 {
                score += 10.0;
            }
            if ret >= -5.0 {
                score += 10.0;
            } else {
                issues.push(format!("Did not recover from the flash crash ({:.1}%)", ret));
                recommendations.push("Avoid selling into a sudden spike on heavy volume".to_string());
            }
        }
        Scenario::LowLiquidity => {
            if trades.iter().any(|t| t.action == SignalAction::Buy) {
                issues.push("Bought into a market without liquidity".to_string());
                recommendations.push("Raise the minimum liquidity requirement".to_string());
            } else {
                score += 20.0;
            }
        }
    }

    if metrics.sharpe_ratio < 0.5 && metrics.total_trades > 0 && recommendations.is_empty() {
        recommendations.push("Improve risk-adjusted returns before going live".to_string());
    }

    Assessment {
        score: score.clamp(0.0, 100.0),
        issues,
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn metrics(ret: f64, dd: f64) -> PerformanceMetrics {
        PerformanceMetrics {
            total_return_pct: ret,
            max_drawdown_pct: dd,
            ..PerformanceMetrics::default()
        }
    }

    fn trade(action: SignalAction) -> ExecutedTrade {
        ExecutedTrade {
            timestamp: Utc::now(),
            symbol: "BTC".to_string(),
            key: "BTC".to_string(),
            action,
            quantity: dec!(1),
            price: dec!(100),
            confidence: 80.0,
            reason: String::new(),
            stop_loss: false,
            realized_pnl: Decimal::ZERO,
        }
    }

    #[test]
    fn test_strong_bull_run_passes() {
        let m = PerformanceMetrics {
            sharpe_ratio: 2.0,
            win_rate: 0.7,
            total_trades: 3,
            ..metrics(15.0, 4.0)
        };
        let a = score_result(Scenario::Bull, &m, &[trade(SignalAction::Buy)]);
        assert_eq!(a.score, 100.0);
        assert!(a.issues.is_empty());
        assert!(a.passed());
    }

    #[test]
    fn test_weak_bull_run_flags_return() {
        let a = score_result(Scenario::Bull, &metrics(2.0, 3.0), &[trade(SignalAction::Buy)]);
        assert_eq!(a.issues.len(), 1);
        assert_eq!(a.score, 70.0);
    }

    #[test]
    fn test_deep_crash_fails() {
        let a = score_result(Scenario::Crash, &metrics(-25.0, 28.0), &[trade(SignalAction::Buy)]);
        assert!(!a.passed());
        assert!(a.issues.len() >= 3);
        assert!(a.score < PASS_SCORE);
    }

    #[test]
    fn test_standing_aside_in_thin_market() {
        let a = score_result(Scenario::LowLiquidity, &metrics(0.0, 0.0), &[]);
        assert!(a.passed());

        let a = score_result(Scenario::LowLiquidity, &metrics(0.0, 0.0), &[trade(SignalAction::Buy)]);
        assert_eq!(a.issues.len(), 1);
    }

    #[test]
    fn test_pass_needs_few_issues() {
        let a = Assessment {
            score: 90.0,
            issues: vec!["a".into(), "b".into(), "c".into()],
            recommendations: Vec::new(),
        };
        assert!(!a.passed());
    }
}
