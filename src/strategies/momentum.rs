//! Momentum rotation: rank enabled symbols by a composite momentum score and
//! hold the top `max_positions` at equal target weight.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::market::{indicators, HistoryStore};
use crate::models::{
    MomentumParams, RiskLevel, RiskProfile, StrategyConfig, StrategyParams, TradingSignal,
};

use super::{
    exit_signal, protective_exit, risk_for_confidence, to_f64, units_for, EngineState,
    ProtectiveExit, Strategy,
};

/// Observations needed before a symbol can be scored.
pub const MIN_HISTORY: usize = 5;

const SHORT_LOOKBACK: usize = 4;
const MEDIUM_LOOKBACK: usize = 24;
const VOLUME_LOOKBACK: usize = 10;
const VOLATILITY_LOOKBACK: usize = 20;
const TREND_LOOKBACK: usize = 10;

/// Sub-scores and composite for one symbol. All values are in percent-like units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MomentumScores {
    pub short_term: f64,
    pub medium_term: f64,
    pub volume_weighted: f64,
    pub volatility_adjusted: f64,
    pub trend_strength: f64,
    pub composite: f64,
}

impl MomentumScores {
    /// Score a symbol from its history. `None` until [`MIN_HISTORY`] observations exist.
    pub fn compute(history: &HistoryStore, symbol: &str, profile: RiskProfile) -> Option<Self> {
        history.compute_indicators(symbol, MIN_HISTORY, |series| {
            let prices: Vec<f64> = series.iter().map(|o| o.price_f64()).collect();
            let volumes: Vec<f64> = series.iter().map(|o| o.volume_f64()).collect();
            Self::from_series(&prices, &volumes, profile)
        })
    }

    fn from_series(prices: &[f64], volumes: &[f64], profile: RiskProfile) -> Self {
        let short_term = short_term_momentum(prices, volumes);
        let medium_term = medium_term_momentum(prices);
        let volume_weighted = volume_weighted_momentum(prices, volumes);

        let recent_returns = indicators::returns(tail(prices, VOLATILITY_LOOKBACK + 1));
        let volatility_pct = indicators::std_dev(&recent_returns) * 100.0;
        let volatility_adjusted = short_term / (1.0 + volatility_pct);

        let trend_strength = trend_strength(tail(prices, TREND_LOOKBACK));

        let w = profile.momentum_weights();
        let composite = w[0] * short_term
            + w[1] * medium_term
            + w[2] * volume_weighted
            + w[3] * volatility_adjusted
            + w[4] * trend_strength;

        Self {
            short_term,
            medium_term,
            volume_weighted,
            volatility_adjusted,
            trend_strength,
            composite: if composite.is_finite() { composite } else { 0.0 },
        }
    }
}

fn tail(values: &[f64], n: usize) -> &[f64] {
    &values[values.len().saturating_sub(n)..]
}

/// Percent change over the last 4 observations, scaled by the volume trend.
pub fn short_term_momentum(prices: &[f64], volumes: &[f64]) -> f64 {
    let change = indicators::pct_change(tail(prices, SHORT_LOOKBACK + 1));

    let multiplier = match volumes.split_last() {
        Some((latest, trailing)) => {
            let avg = indicators::mean(tail(trailing, VOLATILITY_LOOKBACK));
            if avg > 0.0 {
                (latest / avg).clamp(0.5, 2.0)
            } else {
                0.0
            }
        }
        None => 0.0,
    };

    change * multiplier
}

/// Percent change over the last 24 observations, scaled by the fraction of ticks
/// moving in the direction of the net change.
fn medium_term_momentum(prices: &[f64]) -> f64 {
    let window = tail(prices, MEDIUM_LOOKBACK + 1);
    let change = indicators::pct_change(window);
    let rets = indicators::returns(window);
    if rets.is_empty() {
        return 0.0;
    }
    let agreeing = rets
        .iter()
        .filter(|r| (change >= 0.0 && **r > 0.0) || (change < 0.0 && **r < 0.0))
        .count();
    change * agreeing as f64 / rets.len() as f64
}

/// Volume-weighted mean of the last 10 returns, in percent.
fn volume_weighted_momentum(prices: &[f64], volumes: &[f64]) -> f64 {
    let window = tail(prices, VOLUME_LOOKBACK + 1);
    let rets = indicators::returns(window);
    let vols = tail(volumes, rets.len());
    let total: f64 = vols.iter().sum();
    if total <= 0.0 || vols.len() != rets.len() {
        return 0.0;
    }
    rets.iter().zip(vols).map(|(r, v)| r * v).sum::<f64>() / total * 100.0
}

/// OLS slope (percent of mean price per step) times R².
fn trend_strength(prices: &[f64]) -> f64 {
    let (slope, r2) = indicators::linear_regression(prices);
    let avg = indicators::mean(prices);
    if avg <= 0.0 {
        return 0.0;
    }
    slope / avg * 100.0 * r2
}

/// Momentum rotation strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MomentumStrategy {
    config: StrategyConfig,
    params: MomentumParams,
    state: EngineState,
    last_rebalance: Option<DateTime<Utc>>,
}

impl MomentumStrategy {
    pub fn new(config: StrategyConfig, params: MomentumParams) -> Self {
        let state = EngineState::new(params.history_limit, config.allocation_capital);
        Self {
            config,
            params,
            state,
            last_rebalance: None,
        }
    }

    /// Score and rank enabled symbols, best first.
    pub fn rank(&self) -> Vec<(String, MomentumScores)> {
        let mut ranked: Vec<(String, MomentumScores)> = self
            .config
            .enabled_symbols
            .iter()
            .filter(|s| self.state.has_liquidity(s))
            .filter_map(|s| {
                MomentumScores::compute(&self.state.history, s, self.config.risk_profile)
                    .map(|scores| (s.clone(), scores))
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.1.composite
                .partial_cmp(&a.1.composite)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked
    }

    fn rebalance_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_rebalance {
            None => true,
            Some(at) => now - at >= Duration::minutes(self.params.rebalance_interval_mins),
        }
    }

    fn protective_exits(&mut self, now: DateTime<Utc>) -> (Vec<TradingSignal>, BTreeSet<String>) {
        let mut signals = Vec::new();
        let mut exited = BTreeSet::new();

        for pos in self.state.ledger.positions() {
            let Some(exit) = protective_exit(pos, self.config.stop_loss_pct, self.config.take_profit_pct) else {
                continue;
            };
            let signal = exit.signal(pos, now);
            info!(symbol = %pos.symbol, reason = %signal.reason, "Momentum protective exit");
            exited.insert(pos.key.clone());
            signals.push(signal);
        }

        for key in &exited {
            self.state.touch(key, now);
        }
        (signals, exited)
    }

    fn rebalance(&mut self, now: DateTime<Utc>, exited: &BTreeSet<String>) -> Vec<TradingSignal> {
        let ranked = self.rank();
        if ranked.is_empty() {
            return Vec::new();
        }
        self.last_rebalance = Some(now);

        let top: Vec<&(String, MomentumScores)> = ranked
            .iter()
            .filter(|(_, s)| s.composite > 0.0)
            .take(self.config.max_positions)
            .collect();
        let top_symbols: BTreeSet<&str> = top.iter().map(|(s, _)| s.as_str()).collect();

        let mut signals = Vec::new();

        // Rotate out of holdings that left the top set
        let held: Vec<_> = self.state.ledger.positions().cloned().collect();
        for pos in &held {
            if exited.contains(&pos.key) || top_symbols.contains(pos.symbol.as_str()) {
                continue;
            }
            let score = ranked
                .iter()
                .find(|(s, _)| s == &pos.symbol)
                .map_or(0.0, |(_, sc)| sc.composite);
            signals.push(
                exit_signal(pos, None, now)
                    .with_confidence(70.0)
                    .with_reason(format!(
                        "Dropped out of top {} (score {:.2})",
                        self.config.max_positions, score
                    ))
                    .with_risk(RiskLevel::Medium),
            );
            self.state.touch(&pos.key, now);
        }

        let max_positions = Decimal::from(self.config.max_positions as u64);
        let target = (self.config.allocation_capital / max_positions).min(self.state.position_cap(&self.config));
        if target <= Decimal::ZERO {
            return signals;
        }
        let threshold = self.params.rebalance_threshold_pct;

        for (symbol, scores) in top {
            if exited.contains(symbol) || self.state.in_cooldown(symbol, now, self.params.signal_cooldown_mins) {
                continue;
            }
            let Some(latest) = self.state.history.latest(symbol) else {
                continue;
            };
            let price = latest.price;
            let current = self
                .state
                .ledger
                .position(symbol)
                .map_or(Decimal::ZERO, |p| p.market_value());

            let deviation_pct = to_f64((target - current) / target) * 100.0;
            let confidence = (60.0 + scores.composite).min(95.0);

            let signal = if current.is_zero() {
                TradingSignal::buy(symbol, price, units_for(target, price), now).with_reason(format!(
                    "Entering top {}: composite {:.2} (short {:.2}, medium {:.2}, trend {:.2})",
                    self.config.max_positions,
                    scores.composite,
                    scores.short_term,
                    scores.medium_term,
                    scores.trend_strength
                ))
            } else if deviation_pct.abs() > threshold {
                let diff = (target - current).abs();
                let units = units_for(diff, price);
                let base = if deviation_pct > 0.0 {
                    TradingSignal::buy(symbol, price, units, now)
                } else {
                    TradingSignal::sell(symbol, price, units, now)
                };
                base.with_reason(format!(
                    "Rebalancing toward target: {:+.1}% deviation",
                    deviation_pct
                ))
            } else {
                continue;
            };

            if signal.quantity.map_or(true, |q| q <= Decimal::ZERO) {
                continue;
            }
            debug!(symbol = %symbol, composite = scores.composite, action = %signal.action, "Momentum signal");
            signals.push(
                signal
                    .with_confidence(confidence)
                    .with_risk(risk_for_confidence(confidence)),
            );
            self.state.touch(symbol, now);
        }

        signals
    }
}

impl Strategy for MomentumStrategy {
    fn config(&self) -> &StrategyConfig {
        &self.config
    }

    fn state(&self) -> &EngineState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut EngineState {
        &mut self.state
    }

    fn evaluate(&mut self, now: DateTime<Utc>) -> Vec<TradingSignal> {
        let (mut signals, exited) = self.protective_exits(now);
        if self.rebalance_due(now) {
            signals.extend(self.rebalance(now, &exited));
        }
        signals
    }

    fn reconfigure(&mut self, config: StrategyConfig) -> Result<()> {
        config.validate()?;
        if let StrategyParams::Momentum(p) = &config.params {
            self.params = p.clone();
        }
        self.config = config;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MarketObservation, StrategyKind};
    use crate::strategies::to_decimal;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn t(i: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(i)
    }

    fn strategy() -> MomentumStrategy {
        let config = StrategyConfig::default_for(StrategyKind::Momentum);
        let StrategyParams::Momentum(p) = config.params.clone() else {
            unreachable!()
        };
        MomentumStrategy::new(config, p)
    }

    fn feed(s: &mut MomentumStrategy, symbol: &str, prices: &[f64]) {
        for (i, p) in prices.iter().enumerate() {
            s.observe(MarketObservation::new(
                symbol,
                t(i as i64),
                to_decimal(*p),
                dec!(100000),
            ))
            .unwrap();
        }
    }

    #[test]
    fn test_short_term_sign_follows_direction() {
        let up: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let down: Vec<f64> = up.iter().rev().copied().collect();
        let vols = vec![1000.0; 30];
        assert!(short_term_momentum(&up, &vols) > 0.0);
        assert!(short_term_momentum(&down, &vols) < 0.0);
    }

    #[test]
    fn test_scores_none_until_min_history() {
        let mut s = strategy();
        feed(&mut s, "BTC", &[100.0, 101.0, 102.0, 103.0]);
        assert!(MomentumScores::compute(&s.state.history, "BTC", RiskProfile::Moderate).is_none());
    }

    #[test]
    fn test_buys_rising_symbols_only() {
        let mut s = strategy();
        let up: Vec<f64> = (0..30).map(|i| 100.0 * 1.01_f64.powi(i)).collect();
        let down: Vec<f64> = (0..30).map(|i| 100.0 * 0.99_f64.powi(i)).collect();
        feed(&mut s, "BTC", &up);
        feed(&mut s, "ETH", &down);

        let signals = s.evaluate(t(30));
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].symbol, "BTC");
        assert_eq!(signals[0].action, crate::models::SignalAction::Buy);
        assert!(signals[0].confidence >= 60.0 && signals[0].confidence <= 95.0);
    }

    #[test]
    fn test_rebalance_is_rate_limited() {
        let mut s = strategy();
        let up: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        feed(&mut s, "BTC", &up);

        assert!(!s.evaluate(t(30)).is_empty());
        assert!(s.evaluate(t(30) + Duration::minutes(5)).is_empty());
    }

    #[test]
    fn test_stop_loss_fires_between_rebalances() {
        let mut s = strategy();
        let up: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        feed(&mut s, "BTC", &up);
        let buys = s.evaluate(t(30));
        let qty = buys[0].quantity.unwrap();
        s.apply_trade(&buys[0], qty, t(30));

        s.observe(MarketObservation::new("BTC", t(31), dec!(100), dec!(100000)))
            .unwrap();
        let signals = s.evaluate(t(31));
        assert!(signals.iter().any(|sig| sig.stop_loss && sig.symbol == "BTC"));
    }

    #[test]
    fn test_zero_volume_yields_nothing() {
        let mut s = strategy();
        for i in 0..30 {
            s.observe(MarketObservation::new("BTC", t(i), dec!(100), Decimal::ZERO))
                .unwrap();
        }
        assert!(s.evaluate(t(30)).is_empty());
    }

    #[test]
    fn test_entry_sized_to_position_cap() {
        let mut s = strategy();
        let up: Vec<f64> = (0..30).map(|i| 100.0 * 1.01_f64.powi(i)).collect();
        feed(&mut s, "BTC", &up);

        let signals = s.evaluate(t(30));
        let value = signals[0].quantity.unwrap() * signals[0].price;
        // a third of the allocation would exceed the 20% cap
        assert!((value - dec!(2000)).abs() < dec!(0.01), "{value}");
    }

    #[test]
    fn test_held_symbol_rotated_out_of_top_set() {
        let mut s = strategy();
        s.config.max_positions = 1;
        let slow: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        feed(&mut s, "BTC", &slow);
        let buys = s.evaluate(t(30));
        assert_eq!(buys[0].symbol, "BTC");
        s.apply_trade(&buys[0], buys[0].quantity.unwrap(), t(30));

        let fast: Vec<f64> = (0..30).map(|i| 100.0 * 1.03_f64.powi(i)).collect();
        feed(&mut s, "ETH", &fast);

        let signals = s.evaluate(t(32));
        let exit = signals
            .iter()
            .find(|sig| sig.symbol == "BTC")
            .expect("BTC should be rotated out");
        assert_eq!(exit.action, crate::models::SignalAction::Sell);
        assert!(!exit.stop_loss);
        assert_eq!(exit.quantity, buys[0].quantity);
        assert!(exit.reason.contains("Dropped out of top 1"));
        assert!(signals
            .iter()
            .any(|sig| sig.symbol == "ETH" && sig.action == crate::models::SignalAction::Buy));
    }
}
