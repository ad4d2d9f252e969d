//! Portfolio risk manager: signal validation, risk metrics and emergency de-risking.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::market::{indicators, HistoryStore};
use crate::metrics::{MetricsCalculator, DEFAULT_RISK_FREE_RATE};
use crate::models::{
    PerformanceHistoryPoint, Position, RiskLevel, RiskMetrics, SignalAction, StrategyConfig,
    TradingSignal, QUANTITY_EPSILON,
};
use crate::strategies::to_decimal;

use super::conditions::{analyze_market_conditions, MarketCondition, VolatilityLevel, CONDITION_WINDOW};
use super::optimizer::{optimize_algorithm, OptimizationResult};
use super::RiskLimits;

/// Points kept in the performance history.
pub const PERFORMANCE_HISTORY_LIMIT: usize = 1000;

/// Overlapping returns required before a correlation is trusted.
pub const MIN_CORRELATION_SAMPLES: usize = 20;

/// Observations considered for correlation and beta
const RETURN_LOOKBACK: usize = 50;
/// Observations considered for a symbol's volatility
const VOLATILITY_LOOKBACK: usize = 24;

/// Outcome of validating one signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalValidation {
    pub approved: bool,

    /// Reduced quantity when the signal was resized; always below the requested quantity
    pub adjusted_quantity: Option<Decimal>,

    pub reason: String,
    pub risk_level: RiskLevel,
}

impl SignalValidation {
    fn approve(reason: impl Into<String>, risk_level: RiskLevel) -> Self {
        Self {
            approved: true,
            adjusted_quantity: None,
            reason: reason.into(),
            risk_level,
        }
    }

    fn resize(quantity: Decimal, reason: impl Into<String>, risk_level: RiskLevel) -> Self {
        Self {
            approved: true,
            adjusted_quantity: Some(quantity),
            reason: reason.into(),
            risk_level,
        }
    }

    fn reject(reason: impl Into<String>, risk_level: RiskLevel) -> Self {
        Self {
            approved: false,
            adjusted_quantity: None,
            reason: reason.into(),
            risk_level,
        }
    }

    /// Quantity to execute, or `None` when rejected or unsized.
    pub fn executable_quantity(&self, signal: &TradingSignal) -> Option<Decimal> {
        if !self.approved {
            return None;
        }
        self.adjusted_quantity.or(signal.quantity)
    }
}

fn pct_of(value: Decimal, pct: f64) -> Decimal {
    value * to_decimal(pct / 100.0)
}

fn venue_of(position: &Position) -> Option<&str> {
    position.key.split_once('@').map(|(_, venue)| venue)
}

/// Per-period returns of two symbols over their shared timestamps.
fn aligned_returns(history: &HistoryStore, a: &str, b: &str) -> (Vec<f64>, Vec<f64>) {
    let other: BTreeMap<DateTime<Utc>, f64> = history
        .window(b, RETURN_LOOKBACK + 1)
        .iter()
        .map(|o| (o.timestamp, o.price_f64()))
        .collect();
    let pairs: Vec<(f64, f64)> = history
        .window(a, RETURN_LOOKBACK + 1)
        .iter()
        .filter_map(|o| other.get(&o.timestamp).map(|pb| (o.price_f64(), *pb)))
        .collect();

    pairs
        .windows(2)
        .filter(|w| w[0].0 > 0.0 && w[0].1 > 0.0)
        .map(|w| ((w[1].0 - w[0].0) / w[0].0, (w[1].1 - w[0].1) / w[0].1))
        .unzip()
}

/// Return correlation of two symbols, `None` below [`MIN_CORRELATION_SAMPLES`] shared returns.
pub fn return_correlation(history: &HistoryStore, a: &str, b: &str) -> Option<f64> {
    let (ra, rb) = aligned_returns(history, a, b);
    if ra.len() < MIN_CORRELATION_SAMPLES {
        return None;
    }
    indicators::pearson(&ra, &rb)
}

fn symbol_volatility_pct(history: &HistoryStore, symbol: &str) -> f64 {
    let prices = history.prices(symbol, VOLATILITY_LOOKBACK + 1);
    indicators::std_dev(&indicators::returns(&prices)) * 100.0
}

/// Risk manager for one portfolio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskManager {
    limits: RiskLimits,
    capital_base: Decimal,
    performance: VecDeque<PerformanceHistoryPoint>,
    peak_value: Decimal,
    risk_free_rate: f64,
}

impl RiskManager {
    pub fn new(limits: RiskLimits, capital_base: Decimal) -> Self {
        Self {
            limits,
            capital_base,
            performance: VecDeque::new(),
            peak_value: capital_base,
            risk_free_rate: DEFAULT_RISK_FREE_RATE,
        }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Replace the limits after validating them.
    pub fn update_limits(&mut self, limits: RiskLimits) -> Result<()> {
        limits.validate()?;
        info!(?limits, "Risk limits updated");
        self.limits = limits;
        Ok(())
    }

    /// Append a portfolio value to the performance history.
    pub fn record_performance(&mut self, value: Decimal, now: DateTime<Utc>) -> PerformanceHistoryPoint {
        if value > self.peak_value {
            self.peak_value = value;
        }
        let drawdown_pct = if self.peak_value > Decimal::ZERO {
            ((self.peak_value - value) / self.peak_value).to_f64().unwrap_or(0.0) * 100.0
        } else {
            0.0
        };
        let point = PerformanceHistoryPoint {
            timestamp: now,
            portfolio_value: value,
            drawdown_pct: drawdown_pct.max(0.0),
        };
        self.performance.push_back(point.clone());
        while self.performance.len() > PERFORMANCE_HISTORY_LIMIT {
            self.performance.pop_front();
        }
        point
    }

    pub fn performance_history(&self) -> Vec<PerformanceHistoryPoint> {
        self.performance.iter().cloned().collect()
    }

    /// Latest recorded portfolio value, or the capital base before any was recorded.
    pub fn portfolio_value(&self) -> Decimal {
        self.performance
            .back()
            .map(|p| p.portfolio_value)
            .unwrap_or(self.capital_base)
    }

    pub fn current_drawdown_pct(&self) -> f64 {
        self.performance.back().map(|p| p.drawdown_pct).unwrap_or(0.0)
    }

    /// Approve, resize or reject a signal against the limits.
    ///
    /// SELL signals are always approved (resized down to the held quantity);
    /// BUY signals go through position size, total exposure, drawdown, volatility,
    /// correlation, market condition and liquidity checks in that order.
    pub fn validate_signal(
        &self,
        signal: &TradingSignal,
        positions: &[Position],
        history: &HistoryStore,
    ) -> SignalValidation {
        if signal.price <= Decimal::ZERO {
            return SignalValidation::reject("Signal price must be positive", RiskLevel::High);
        }

        let validation = match signal.action {
            SignalAction::Hold => SignalValidation::approve("Hold", signal.risk_level),
            SignalAction::Sell => self.validate_sell(signal, positions),
            SignalAction::Buy => self.validate_buy(signal, positions, history),
        };

        if !validation.approved {
            debug!(symbol = %signal.symbol, reason = %validation.reason, "Signal rejected");
        } else if let Some(qty) = validation.adjusted_quantity {
            debug!(symbol = %signal.symbol, quantity = %qty, reason = %validation.reason, "Signal resized");
        }
        validation
    }

    fn validate_sell(&self, signal: &TradingSignal, positions: &[Position]) -> SignalValidation {
        let key = signal.position_key();
        let held: Decimal = positions.iter().filter(|p| p.key == key).map(|p| p.quantity).sum();
        if held <= Decimal::ZERO {
            return SignalValidation::reject(format!("No position to sell for {key}"), signal.risk_level);
        }
        match signal.quantity {
            Some(qty) if qty > held => SignalValidation::resize(
                held,
                format!("Sell reduced to held quantity {held}"),
                signal.risk_level,
            ),
            _ => SignalValidation::approve("Exit approved", signal.risk_level),
        }
    }

    fn validate_buy(
        &self,
        signal: &TradingSignal,
        positions: &[Position],
        history: &HistoryStore,
    ) -> SignalValidation {
        let Some(requested) = signal.quantity.filter(|q| *q > Decimal::ZERO) else {
            return SignalValidation::reject("Buy without a quantity", signal.risk_level);
        };
        let portfolio_value = self.portfolio_value();
        if portfolio_value <= Decimal::ZERO {
            return SignalValidation::reject("Portfolio has no value", RiskLevel::High);
        }

        let mut quantity = requested;
        let mut risk = signal.risk_level;
        let price = signal.price;

        // Position size: resize instead of rejecting
        let symbol_exposure: Decimal = positions
            .iter()
            .filter(|p| p.symbol == signal.symbol)
            .map(Position::market_value)
            .sum();
        let max_position = pct_of(portfolio_value, self.limits.max_position_size_pct);
        if symbol_exposure + quantity * price > max_position {
            let room = max_position - symbol_exposure;
            if room <= Decimal::ZERO {
                return SignalValidation::reject(
                    format!("Position limit reached for {}", signal.symbol),
                    risk.max(RiskLevel::Medium),
                );
            }
            quantity = (room / price).round_dp_with_strategy(8, RoundingStrategy::ToZero);
            if quantity < QUANTITY_EPSILON {
                return SignalValidation::reject(
                    format!("No room left for {}", signal.symbol),
                    risk.max(RiskLevel::Medium),
                );
            }
            risk = risk.max(RiskLevel::Medium);
        }

        let total_exposure: Decimal = positions.iter().map(Position::market_value).sum();
        let max_total = pct_of(portfolio_value, self.limits.max_total_exposure_pct);
        if total_exposure + quantity * price > max_total {
            return SignalValidation::reject(
                format!("Total exposure would exceed {:.0}%", self.limits.max_total_exposure_pct),
                RiskLevel::High,
            );
        }

        let drawdown = self.current_drawdown_pct();
        if drawdown > self.limits.max_drawdown_pct {
            return SignalValidation::reject(
                format!("Drawdown {:.1}% above limit", drawdown),
                RiskLevel::High,
            );
        }

        let volatility = symbol_volatility_pct(history, &signal.symbol);
        if volatility > self.limits.max_daily_volatility_pct {
            return SignalValidation::reject(
                format!("Volatility {:.1}% above limit", volatility),
                RiskLevel::High,
            );
        }

        let held: BTreeSet<&str> = positions
            .iter()
            .map(|p| p.symbol.as_str())
            .filter(|s| *s != signal.symbol)
            .collect();
        for other in held {
            if let Some(corr) = return_correlation(history, &signal.symbol, other) {
                if corr > self.limits.max_correlation {
                    return SignalValidation::reject(
                        format!("Correlation {:.2} with {} above limit", corr, other),
                        RiskLevel::High,
                    );
                }
            }
        }

        let condition = analyze_market_conditions(history.window(&signal.symbol, CONDITION_WINDOW));
        if condition.volatility == VolatilityLevel::Extreme {
            return SignalValidation::reject("Extreme volatility, buys paused", RiskLevel::High);
        }

        let Some(latest) = history.latest(&signal.symbol) else {
            return SignalValidation::reject("No market data", RiskLevel::High);
        };
        if latest.volume < self.limits.min_liquidity {
            return SignalValidation::reject(
                format!("Volume {} below liquidity floor", latest.volume),
                RiskLevel::High,
            );
        }

        if quantity < requested {
            SignalValidation::resize(
                quantity,
                format!("Resized to {:.0}% position limit", self.limits.max_position_size_pct),
                risk,
            )
        } else {
            SignalValidation::approve("Within limits", risk)
        }
    }

    /// Portfolio risk snapshot from positions, the performance history and market data.
    pub fn calculate_risk_metrics(&self, positions: &[Position], history: &HistoryStore) -> RiskMetrics {
        let portfolio_value = self.portfolio_value();
        let total_exposure: Decimal = positions.iter().map(Position::market_value).sum();
        let exposure_pct = if portfolio_value > Decimal::ZERO {
            (total_exposure / portfolio_value).to_f64().unwrap_or(0.0) * 100.0
        } else {
            0.0
        };

        let values: Vec<f64> = self
            .performance
            .iter()
            .map(|p| p.portfolio_value.to_f64().unwrap_or(0.0))
            .collect();
        let timestamps: Vec<DateTime<Utc>> = self.performance.iter().map(|p| p.timestamp).collect();
        let returns = indicators::returns(&values);
        let ppy = MetricsCalculator::periods_per_year(&timestamps);

        let max_drawdown_pct = self
            .performance
            .iter()
            .map(|p| p.drawdown_pct)
            .fold(0.0, f64::max);
        let annualized = MetricsCalculator::annualized_return_pct(
            indicators::pct_change(&values),
            returns.len(),
            ppy,
        );
        let (var_95, cvar_95) = MetricsCalculator::value_at_risk(&returns, 0.95);

        RiskMetrics {
            portfolio_value,
            total_exposure,
            exposure_pct,
            max_drawdown_pct,
            current_drawdown_pct: self.current_drawdown_pct(),
            sharpe_ratio: MetricsCalculator::sharpe_ratio(&returns, self.risk_free_rate, ppy),
            sortino_ratio: MetricsCalculator::sortino_ratio(&returns, self.risk_free_rate, ppy),
            calmar_ratio: MetricsCalculator::calmar_ratio(annualized, max_drawdown_pct),
            var_95,
            cvar_95,
            correlation: self.portfolio_correlation(positions, history),
            beta: self.portfolio_beta(positions, history),
            volatility_pct: self.portfolio_volatility_pct(positions, history),
        }
    }

    /// Mean absolute pairwise correlation of held symbols.
    fn portfolio_correlation(&self, positions: &[Position], history: &HistoryStore) -> Option<f64> {
        let symbols: Vec<&str> = positions
            .iter()
            .map(|p| p.symbol.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let mut measured = Vec::new();
        for (i, a) in symbols.iter().enumerate() {
            for b in &symbols[i + 1..] {
                if let Some(c) = return_correlation(history, a, b) {
                    measured.push(c.abs());
                }
            }
        }
        (!measured.is_empty()).then(|| indicators::mean(&measured))
    }

    /// Beta of the held basket against an equal-weighted index of every observed symbol.
    fn portfolio_beta(&self, positions: &[Position], history: &HistoryStore) -> Option<f64> {
        let total: Decimal = positions.iter().map(Position::market_value).sum();
        if total <= Decimal::ZERO {
            return None;
        }
        let mut weights: BTreeMap<&str, f64> = BTreeMap::new();
        for pos in positions {
            *weights.entry(pos.symbol.as_str()).or_default() +=
                (pos.market_value() / total).to_f64().unwrap_or(0.0);
        }

        let symbols: Vec<&str> = history.symbols().collect();
        let series: Vec<BTreeMap<DateTime<Utc>, f64>> = symbols
            .iter()
            .map(|s| {
                history
                    .window(s, RETURN_LOOKBACK + 1)
                    .iter()
                    .map(|o| (o.timestamp, o.price_f64()))
                    .collect()
            })
            .collect();
        let anchor = weights.keys().next()?;
        let timeline: Vec<DateTime<Utc>> = history
            .window(anchor, RETURN_LOOKBACK + 1)
            .iter()
            .map(|o| o.timestamp)
            .filter(|ts| series.iter().all(|s| s.contains_key(ts)))
            .collect();

        let mut index_returns = Vec::new();
        let mut portfolio_returns = Vec::new();
        for pair in timeline.windows(2) {
            let mut index = 0.0;
            let mut portfolio = 0.0;
            for (symbol, prices) in symbols.iter().zip(&series) {
                let (Some(p0), Some(p1)) = (prices.get(&pair[0]), prices.get(&pair[1])) else {
                    continue;
                };
                if *p0 <= 0.0 {
                    continue;
                }
                let r = (p1 - p0) / p0;
                index += r / symbols.len() as f64;
                portfolio += r * weights.get(symbol).copied().unwrap_or(0.0);
            }
            index_returns.push(index);
            portfolio_returns.push(portfolio);
        }

        if index_returns.len() < MIN_CORRELATION_SAMPLES {
            return None;
        }
        indicators::beta(&portfolio_returns, &index_returns)
    }

    fn portfolio_volatility_pct(&self, positions: &[Position], history: &HistoryStore) -> f64 {
        let total: Decimal = positions.iter().map(Position::market_value).sum();
        if total <= Decimal::ZERO {
            return 0.0;
        }
        positions
            .iter()
            .map(|p| {
                let weight = (p.market_value() / total).to_f64().unwrap_or(0.0);
                weight * symbol_volatility_pct(history, &p.symbol)
            })
            .sum()
    }

    /// Unilateral de-risking signals for the current state.
    ///
    /// Full exit beyond the emergency drawdown; 50% trims under extreme volatility
    /// with fearful sentiment; 30% trims of the most correlated half of positions
    /// when correlation exceeds 1.5× the limit.
    pub fn emergency_risk_management(
        &self,
        positions: &[Position],
        history: &HistoryStore,
        now: DateTime<Utc>,
    ) -> Vec<TradingSignal> {
        if positions.is_empty() {
            return Vec::new();
        }

        let drawdown = self.current_drawdown_pct();
        if drawdown > self.limits.emergency_stop_loss_pct {
            warn!(drawdown, "Emergency stop loss, exiting all positions");
            return positions
                .iter()
                .map(|p| {
                    Self::trim(p, Decimal::ONE, now)
                        .with_confidence(100.0)
                        .with_reason(format!("Emergency exit at {:.1}% drawdown", drawdown))
                        .as_stop_loss()
                })
                .collect();
        }

        let condition = analyze_market_conditions(&history.recent(CONDITION_WINDOW));
        if condition.volatility == VolatilityLevel::Extreme && condition.sentiment.is_fearful() {
            warn!(volatility = condition.volatility_pct, "Extreme volatility with fear, halving positions");
            return positions
                .iter()
                .map(|p| {
                    Self::trim(p, dec!(0.5), now)
                        .with_confidence(90.0)
                        .with_reason("De-risk 50% under extreme volatility")
                })
                .collect();
        }

        let threshold = self.limits.max_correlation * 1.5;
        let mut scored: Vec<(&Position, f64)> = positions
            .iter()
            .map(|p| {
                let corrs: Vec<f64> = positions
                    .iter()
                    .filter(|o| o.symbol != p.symbol)
                    .filter_map(|o| return_correlation(history, &p.symbol, &o.symbol))
                    .map(f64::abs)
                    .collect();
                (p, indicators::mean(&corrs))
            })
            .collect();
        let overall = indicators::mean(&scored.iter().map(|(_, c)| *c).collect::<Vec<_>>());
        if overall <= threshold {
            return Vec::new();
        }

        warn!(correlation = overall, "Portfolio correlation above emergency threshold");
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        let count = scored.len().div_ceil(2);
        scored
            .into_iter()
            .take(count)
            .map(|(p, corr)| {
                Self::trim(p, dec!(0.3), now)
                    .with_confidence(80.0)
                    .with_reason(format!("Trim 30%, correlation {:.2}", corr))
            })
            .collect()
    }

    fn trim(position: &Position, fraction: Decimal, now: DateTime<Utc>) -> TradingSignal {
        let quantity = if fraction >= Decimal::ONE {
            position.quantity
        } else {
            (position.quantity * fraction).round_dp(8)
        };
        let signal = TradingSignal::sell(&position.symbol, position.current_price, quantity, now)
            .with_risk(RiskLevel::High);
        match venue_of(position) {
            Some(venue) => signal.with_venue(venue),
            None => signal,
        }
    }

    /// Parameter nudges for a strategy under `condition`.
    pub fn optimize_algorithm(&self, config: &StrategyConfig, condition: &MarketCondition) -> OptimizationResult {
        optimize_algorithm(config, condition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MarketObservation;
    use chrono::{Duration, TimeZone};

    fn t(i: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(i)
    }

    fn calm_history(symbols: &[&str]) -> HistoryStore {
        let mut history = HistoryStore::new(200);
        for i in 0..30 {
            for (k, s) in symbols.iter().enumerate() {
                let amplitude = dec!(0.5) * Decimal::from(k as u32 + 1);
                let wiggle = if (i + k as i64) % 2 == 0 { amplitude } else { -amplitude };
                history
                    .record(MarketObservation::new(*s, t(i), dec!(100) + wiggle, dec!(1000000)))
                    .unwrap();
            }
        }
        history
    }

    fn manager() -> RiskManager {
        RiskManager::new(RiskLimits::default(), dec!(10000))
    }

    #[test]
    fn test_buy_within_limits_approved() {
        let history = calm_history(&["BTC"]);
        let signal = TradingSignal::buy("BTC", dec!(100), dec!(10), t(30));
        let v = manager().validate_signal(&signal, &[], &history);
        assert!(v.approved);
        assert!(v.adjusted_quantity.is_none());
    }

    #[test]
    fn test_oversized_buy_is_resized_down() {
        let history = calm_history(&["BTC"]);
        let signal = TradingSignal::buy("BTC", dec!(100), dec!(50), t(30));
        let v = manager().validate_signal(&signal, &[], &history);
        assert!(v.approved);
        assert_eq!(v.adjusted_quantity, Some(dec!(20)));
        assert_eq!(v.executable_quantity(&signal), Some(dec!(20)));
    }

    #[test]
    fn test_total_exposure_rejects() {
        let history = calm_history(&["BTC", "ETH", "SOL", "ADA", "DOT"]);
        let positions: Vec<Position> = ["ETH", "SOL", "ADA", "DOT"]
            .iter()
            .map(|s| Position::new(s.to_string(), s.to_string(), dec!(20), dec!(100), t(0)))
            .collect();
        let signal = TradingSignal::buy("BTC", dec!(100), dec!(5), t(30));
        let v = manager().validate_signal(&signal, &positions, &history);
        assert!(!v.approved);
        assert!(v.reason.contains("Total exposure"));
    }

    #[test]
    fn test_drawdown_blocks_buys_not_sells() {
        let history = calm_history(&["BTC"]);
        let mut rm = manager();
        rm.record_performance(dec!(10000), t(0));
        rm.record_performance(dec!(7500), t(1));

        let buy = TradingSignal::buy("BTC", dec!(100), dec!(1), t(30));
        assert!(!rm.validate_signal(&buy, &[], &history).approved);

        let pos = Position::new("BTC".into(), "BTC".into(), dec!(2), dec!(100), t(0));
        let sell = TradingSignal::sell("BTC", dec!(100), dec!(5), t(30));
        let v = rm.validate_signal(&sell, &[pos], &history);
        assert!(v.approved);
        assert_eq!(v.adjusted_quantity, Some(dec!(2)));
    }

    #[test]
    fn test_low_liquidity_rejects() {
        let mut history = HistoryStore::new(100);
        for i in 0..5 {
            history
                .record(MarketObservation::new("BTC", t(i), dec!(100), dec!(500)))
                .unwrap();
        }
        let signal = TradingSignal::buy("BTC", dec!(100), dec!(1), t(5));
        let v = manager().validate_signal(&signal, &[], &history);
        assert!(!v.approved);
        assert!(v.reason.contains("liquidity"));
    }

    #[test]
    fn test_performance_history_is_bounded() {
        let mut rm = manager();
        for i in 0..(PERFORMANCE_HISTORY_LIMIT as i64 + 10) {
            rm.record_performance(dec!(10000), t(i));
        }
        assert_eq!(rm.performance_history().len(), PERFORMANCE_HISTORY_LIMIT);
    }

    #[test]
    fn test_emergency_exit_on_deep_drawdown() {
        let history = calm_history(&["BTC"]);
        let mut rm = manager();
        rm.record_performance(dec!(10000), t(0));
        rm.record_performance(dec!(8000), t(1));

        let pos = Position::new("SOL".into(), "SOL@marinade".into(), dec!(3), dec!(100), t(0));
        let signals = rm.emergency_risk_management(&[pos], &history, t(2));
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].quantity, Some(dec!(3)));
        assert_eq!(signals[0].venue.as_deref(), Some("marinade"));
        assert!(signals[0].stop_loss);
    }

    #[test]
    fn test_extreme_volatility_with_fear_halves_positions() {
        let mut history = HistoryStore::new(200);
        for i in 0..30 {
            for s in ["BTC", "ETH"] {
                let price = if i % 2 == 0 { dec!(100) } else { dec!(120) };
                let mut obs = MarketObservation::new(s, t(i), price, dec!(1000000));
                obs.change_24h = -8.0;
                history.record(obs).unwrap();
            }
        }
        let positions = vec![
            Position::new("BTC".into(), "BTC".into(), dec!(4), dec!(100), t(0)),
            Position::new("ETH".into(), "ETH@lido".into(), dec!(10), dec!(100), t(0)),
        ];

        let signals = manager().emergency_risk_management(&positions, &history, t(30));
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].quantity, Some(dec!(2)));
        assert_eq!(signals[1].quantity, Some(dec!(5)));
        assert_eq!(signals[1].venue.as_deref(), Some("lido"));
        assert!(signals.iter().all(|s| s.action == SignalAction::Sell && !s.stop_loss));
        assert!(signals[0].reason.contains("50%"));
    }

    #[test]
    fn test_correlated_book_trims_most_correlated_half() {
        let history = calm_history(&["BTC", "ETH", "SOL"]);
        let positions: Vec<Position> = ["BTC", "ETH", "SOL"]
            .iter()
            .map(|s| Position::new(s.to_string(), s.to_string(), dec!(10), dec!(100), t(0)))
            .collect();

        // default limit puts the trigger above any attainable correlation
        assert!(manager().emergency_risk_management(&positions, &history, t(30)).is_empty());

        let limits = RiskLimits {
            max_correlation: 0.5,
            ..RiskLimits::default()
        };
        let signals = RiskManager::new(limits, dec!(10000)).emergency_risk_management(&positions, &history, t(30));
        assert_eq!(signals.len(), 2);
        for signal in &signals {
            assert_eq!(signal.action, SignalAction::Sell);
            assert_eq!(signal.quantity, Some(dec!(3)));
            assert!(signal.reason.starts_with("Trim 30%"));
        }
    }

    #[test]
    fn test_risk_metrics_correlation_needs_samples() {
        let history = calm_history(&["BTC", "ETH"]);
        let positions = vec![
            Position::new("BTC".into(), "BTC".into(), dec!(1), dec!(100), t(0)),
            Position::new("ETH".into(), "ETH".into(), dec!(1), dec!(100), t(0)),
        ];
        let metrics = manager().calculate_risk_metrics(&positions, &history);
        // Anti-phased wiggles
        let corr = metrics.correlation.unwrap();
        assert!(corr > 0.99);
        assert!(metrics.beta.is_some());

        let short = HistoryStore::new(10);
        assert!(manager().calculate_risk_metrics(&positions, &short).correlation.is_none());
    }
}
