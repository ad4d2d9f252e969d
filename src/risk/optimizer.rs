//! Parameter optimizer: nudges strategy parameters toward the classified market condition.

use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::{StrategyConfig, StrategyKind, StrategyParams};

use super::conditions::{MarketCondition, MarketTrend, Sentiment, VolatilityLevel};

/// Proposed configuration and the reasoning behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub strategy: StrategyKind,
    pub original: StrategyConfig,
    pub optimized: StrategyConfig,

    /// Human-readable description of each nudge
    pub changes: Vec<String>,

    /// Estimated improvement in risk-adjusted return, in percent
    pub expected_improvement_pct: f64,

    /// Estimated reduction in risk, in percent
    pub risk_reduction_pct: f64,

    /// 0-100, grows with the number of nudges applied
    pub confidence: f64,
}

/// Tracks nudges as they are applied.
struct Nudges {
    changes: Vec<String>,
    improvement: f64,
    risk_reduction: f64,
}

impl Nudges {
    fn new() -> Self {
        Self {
            changes: Vec::new(),
            improvement: 0.0,
            risk_reduction: 0.0,
        }
    }

    fn push(&mut self, change: String, improvement: f64, risk_reduction: f64) {
        self.changes.push(change);
        self.improvement += improvement;
        self.risk_reduction += risk_reduction;
    }
}

/// Propose parameter adjustments for `config` under `condition`.
///
/// The original config is left untouched; the optimized copy is validated
/// before it is returned and falls back to the original if it fails.
pub fn optimize_algorithm(config: &StrategyConfig, condition: &MarketCondition) -> OptimizationResult {
    let mut optimized = config.clone();
    let mut nudges = Nudges::new();

    tighten_stops(&mut optimized, condition, &mut nudges);

    match &mut optimized.params {
        StrategyParams::Momentum(p) => {
            if condition.volatility >= VolatilityLevel::High {
                p.rebalance_interval_mins = (p.rebalance_interval_mins * 2).min(240);
                nudges.push(
                    format!("Rebalance interval raised to {} min", p.rebalance_interval_mins),
                    2.0,
                    10.0,
                );
            }
            if condition.trend == MarketTrend::Bull && condition.volatility <= VolatilityLevel::Medium {
                p.rebalance_threshold_pct = (p.rebalance_threshold_pct * 0.5).max(5.0);
                nudges.push(
                    format!("Rebalance threshold lowered to {:.0}%", p.rebalance_threshold_pct),
                    5.0,
                    0.0,
                );
            }
            if condition.trend == MarketTrend::Bear && optimized.max_positions > 1 {
                optimized.max_positions -= 1;
                nudges.push(
                    format!("Max positions reduced to {}", optimized.max_positions),
                    1.0,
                    15.0,
                );
            }
        }
        StrategyParams::Dca(p) => {
            if condition.sentiment.is_fearful() || condition.trend == MarketTrend::Bear {
                p.base_amount = (p.base_amount * dec!(1.2)).round_dp(2);
                nudges.push(format!("Base amount raised to ${} into weakness", p.base_amount), 6.0, 0.0);
            } else if matches!(condition.sentiment, Sentiment::ExtremeGreed) {
                p.base_amount = (p.base_amount * dec!(0.8)).round_dp(2);
                nudges.push(format!("Base amount cut to ${} into euphoria", p.base_amount), 2.0, 10.0);
            }
            if condition.volatility >= VolatilityLevel::High && !p.dynamic_sizing {
                p.dynamic_sizing = true;
                nudges.push("Dynamic sizing enabled".to_string(), 3.0, 10.0);
            }
        }
        StrategyParams::Staking(p) => {
            if condition.volatility >= VolatilityLevel::High {
                p.max_allocation_pct = (p.max_allocation_pct - 10.0).max(10.0);
                nudges.push(
                    format!("Single allocation cap lowered to {:.0}%", p.max_allocation_pct),
                    1.0,
                    15.0,
                );
            }
            if condition.trend == MarketTrend::Sideways && condition.volatility == VolatilityLevel::Low {
                p.rebalance_threshold_pct = (p.rebalance_threshold_pct * 1.5).min(25.0);
                nudges.push(
                    format!("Rebalance threshold widened to {:.0}%", p.rebalance_threshold_pct),
                    2.0,
                    0.0,
                );
            }
        }
        StrategyParams::ChannelIndex(p) => match condition.volatility {
            VolatilityLevel::High | VolatilityLevel::Extreme => {
                p.overbought = 150.0;
                p.oversold = -150.0;
                nudges.push("Channel thresholds widened to ±150".to_string(), 4.0, 10.0);
            }
            VolatilityLevel::Low => {
                p.overbought = 80.0;
                p.oversold = -80.0;
                nudges.push("Channel thresholds narrowed to ±80".to_string(), 3.0, 0.0);
            }
            VolatilityLevel::Medium => {
                if condition.strength > 50.0 {
                    p.smoothing = (p.smoothing + 2).min(9);
                    nudges.push(format!("Oscillator smoothing raised to {}", p.smoothing), 2.0, 5.0);
                }
            }
        },
    }

    if let Err(err) = optimized.validate() {
        info!(strategy = %config.id, error = %err, "Optimized config invalid, keeping original");
        return OptimizationResult {
            strategy: config.kind(),
            original: config.clone(),
            optimized: config.clone(),
            changes: Vec::new(),
            expected_improvement_pct: 0.0,
            risk_reduction_pct: 0.0,
            confidence: 0.0,
        };
    }

    let confidence = (nudges.changes.len() as f64 * 20.0).min(100.0) * condition.confidence.max(50.0) / 100.0;
    info!(
        strategy = %config.id,
        changes = nudges.changes.len(),
        confidence,
        "Parameter optimization complete"
    );

    OptimizationResult {
        strategy: config.kind(),
        original: config.clone(),
        optimized,
        changes: nudges.changes,
        expected_improvement_pct: nudges.improvement,
        risk_reduction_pct: nudges.risk_reduction.min(100.0),
        confidence,
    }
}

/// Shared across kinds: tighter stops in falling or violent markets.
fn tighten_stops(config: &mut StrategyConfig, condition: &MarketCondition, nudges: &mut Nudges) {
    if condition.trend == MarketTrend::Bear || condition.volatility == VolatilityLevel::Extreme {
        let tightened = (config.stop_loss_pct * 0.8).max(2.0);
        if tightened < config.stop_loss_pct {
            config.stop_loss_pct = tightened;
            nudges.push(format!("Stop loss tightened to {:.1}%", tightened), 1.0, 20.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::conditions::VolumeLevel;

    fn condition(trend: MarketTrend, volatility: VolatilityLevel, sentiment: Sentiment) -> MarketCondition {
        MarketCondition {
            trend,
            volatility,
            volume: VolumeLevel::Normal,
            sentiment,
            strength: 60.0,
            confidence: 100.0,
            ..MarketCondition::default()
        }
    }

    #[test]
    fn test_bear_market_tightens_momentum() {
        let config = StrategyConfig::default_for(StrategyKind::Momentum);
        let result = optimize_algorithm(
            &config,
            &condition(MarketTrend::Bear, VolatilityLevel::Medium, Sentiment::Fear),
        );
        assert!(result.optimized.stop_loss_pct < config.stop_loss_pct);
        assert_eq!(result.optimized.max_positions, config.max_positions - 1);
        assert_eq!(result.changes.len(), 2);
        assert!(result.risk_reduction_pct > 0.0);
        assert!(result.confidence > 0.0);
    }

    #[test]
    fn test_dca_buys_more_into_fear() {
        let config = StrategyConfig::default_for(StrategyKind::Dca);
        let result = optimize_algorithm(
            &config,
            &condition(MarketTrend::Sideways, VolatilityLevel::Low, Sentiment::ExtremeFear),
        );
        let StrategyParams::Dca(p) = &result.optimized.params else {
            panic!("expected dca params");
        };
        assert_eq!(p.base_amount, dec!(300));
    }

    #[test]
    fn test_channel_thresholds_follow_volatility() {
        let config = StrategyConfig::default_for(StrategyKind::ChannelIndex);
        let result = optimize_algorithm(
            &config,
            &condition(MarketTrend::Sideways, VolatilityLevel::High, Sentiment::Neutral),
        );
        let StrategyParams::ChannelIndex(p) = &result.optimized.params else {
            panic!("expected channel params");
        };
        assert_eq!(p.oversold, -150.0);
    }

    #[test]
    fn test_quiet_market_changes_nothing_for_momentum() {
        let config = StrategyConfig::default_for(StrategyKind::Momentum);
        let result = optimize_algorithm(
            &config,
            &condition(MarketTrend::Sideways, VolatilityLevel::Low, Sentiment::Neutral),
        );
        assert!(result.changes.is_empty());
        assert_eq!(result.optimized, config);
        assert_eq!(result.confidence, 0.0);
    }
}
