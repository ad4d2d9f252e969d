//! Channel-index mean reversion.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::market::indicators;
use crate::models::{
    ChannelParams, MarketObservation, PositionExtension, RiskLevel, SignalAction, StrategyConfig,
    StrategyParams, TradingSignal,
};

use super::{risk_for_confidence, to_decimal, units_for, EngineState, Fill, Strategy};

const HISTORY_WINDOW: usize = 300;
/// Points compared by divergence detection (two halves)
const DIVERGENCE_WINDOW: usize = 20;
/// Trailing periods averaged for volume confirmation
const VOLUME_LOOKBACK: usize = 10;
const MIN_BUY_CONFIDENCE: f64 = 60.0;
const MIN_SELL_CONFIDENCE: f64 = 65.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChannelZone {
    Overbought,
    Oversold,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Trend {
    Bullish,
    Bearish,
    Sideways,
}

/// Oscillator state for one symbol at the latest observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelReading {
    /// Smoothed oscillator value
    pub value: f64,
    /// Unsmoothed oscillator value
    pub raw: f64,
    pub zone: ChannelZone,
    /// Beyond the extreme threshold in the zone's direction
    pub extreme: bool,
    pub trend: Trend,
    /// Linear-fit R² of recent prices, 0-100
    pub strength: f64,
    pub bullish_divergence: bool,
    pub bearish_divergence: bool,
    pub volume_confirmed: bool,
}

impl ChannelReading {
    /// Compute the reading from a symbol's history, or `None` before the oscillator has a smoothed value.
    pub fn compute(observations: &[MarketObservation], params: &ChannelParams) -> Option<Self> {
        let smoothing = params.smoothing.max(1);
        let min_len = params.period + smoothing - 1;
        if params.period == 0 || observations.len() < min_len {
            return None;
        }

        let span = (min_len + DIVERGENCE_WINDOW).max(params.confirmation_window + 1);
        let recent = &observations[observations.len().saturating_sub(span)..];
        let typical: Vec<f64> = recent.iter().map(MarketObservation::typical_price).collect();
        let prices: Vec<f64> = recent.iter().map(MarketObservation::price_f64).collect();

        let raw_series = indicators::channel_index(&typical, params.period);
        let smoothed = indicators::sma(&raw_series, smoothing);
        let value = *smoothed.last()?;
        let raw = raw_series.last().copied().unwrap_or(0.0);

        let (zone, extreme) = if value >= params.overbought {
            (ChannelZone::Overbought, value >= params.extreme_overbought)
        } else if value <= params.oversold {
            (ChannelZone::Oversold, value <= params.extreme_oversold)
        } else {
            (ChannelZone::Neutral, false)
        };

        let window = params.confirmation_window.max(2);
        let confirm_prices = &prices[prices.len().saturating_sub(window + 1)..];
        let price_move = indicators::pct_change(confirm_prices);
        let osc_then = smoothed[smoothed.len().saturating_sub(window + 1)];
        let osc_direction = value - osc_then;
        let trend = if price_move >= 5.0 && osc_direction > 0.0 {
            Trend::Bullish
        } else if price_move <= -5.0 && osc_direction < 0.0 {
            Trend::Bearish
        } else {
            Trend::Sideways
        };
        let (_, r2) = indicators::linear_regression(confirm_prices);

        let (bullish_divergence, bearish_divergence) = divergence(&prices, &smoothed);

        Some(Self {
            value,
            raw,
            zone,
            extreme,
            trend,
            strength: r2 * 100.0,
            bullish_divergence,
            bearish_divergence,
            volume_confirmed: volume_confirmed(recent, params.volume_multiplier),
        })
    }

    /// BUY confidence tier for an entry at this reading.
    pub fn buy_confidence(&self) -> f64 {
        if self.zone != ChannelZone::Oversold {
            return 0.0;
        }
        match (self.extreme, self.bullish_divergence) {
            (true, true) => 90.0,
            (true, false) | (false, true) => 80.0,
            (false, false) if self.trend != Trend::Bearish => 70.0,
            (false, false) if self.strength < 50.0 => 60.0,
            _ => 50.0,
        }
    }

    /// SELL confidence for a discretionary exit at this reading.
    pub fn sell_confidence(&self) -> f64 {
        match self.zone {
            ChannelZone::Overbought => match (self.extreme, self.bearish_divergence) {
                (true, true) => 90.0,
                (true, false) => 85.0,
                (false, true) => 80.0,
                (false, false) if self.trend == Trend::Bearish => 70.0,
                (false, false) if self.trend == Trend::Sideways => 65.0,
                _ => 55.0,
            },
            _ if self.bearish_divergence && self.trend == Trend::Bearish => 70.0,
            _ => 0.0,
        }
    }
}

/// Compare the first and second halves of the last [`DIVERGENCE_WINDOW`] points.
fn divergence(prices: &[f64], oscillator: &[f64]) -> (bool, bool) {
    if prices.len() < DIVERGENCE_WINDOW || oscillator.len() < DIVERGENCE_WINDOW {
        return (false, false);
    }
    let half = DIVERGENCE_WINDOW / 2;
    let p = &prices[prices.len() - DIVERGENCE_WINDOW..];
    let o = &oscillator[oscillator.len() - DIVERGENCE_WINDOW..];
    let (p_first, p_last) = p.split_at(half);
    let (o_first, o_last) = o.split_at(half);

    let min = |s: &[f64]| s.iter().copied().fold(f64::INFINITY, f64::min);
    let max = |s: &[f64]| s.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let bullish = min(p_last) < min(p_first) && min(o_last) > min(o_first);
    let bearish = max(p_last) > max(p_first) && max(o_last) < max(o_first);
    (bullish, bearish)
}

fn volume_confirmed(observations: &[MarketObservation], multiplier: f64) -> bool {
    let Some((latest, rest)) = observations.split_last() else {
        return false;
    };
    let trailing: Vec<f64> = rest[rest.len().saturating_sub(VOLUME_LOOKBACK)..]
        .iter()
        .map(MarketObservation::volume_f64)
        .collect();
    let avg = indicators::mean(&trailing);
    avg > 0.0 && latest.volume_f64() >= multiplier * avg
}

/// Channel-index strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelIndexStrategy {
    config: StrategyConfig,
    params: ChannelParams,
    state: EngineState,
}

impl ChannelIndexStrategy {
    pub fn new(config: StrategyConfig, params: ChannelParams) -> Self {
        let state = EngineState::new(HISTORY_WINDOW, config.allocation_capital);
        Self {
            config,
            params,
            state,
        }
    }

    pub fn reading(&self, symbol: &str) -> Option<ChannelReading> {
        ChannelReading::compute(self.state.history.all(symbol), &self.params)
    }

    fn exit(&self, symbol: &str, now: DateTime<Utc>) -> Option<TradingSignal> {
        let pos = self.state.ledger.position(symbol)?;
        let price = pos.current_price;

        if let PositionExtension::Channel {
            stop_loss_price,
            take_profit_price,
        } = &pos.extension
        {
            if price <= *stop_loss_price {
                warn!(symbol = %symbol, price = %price, stop = %stop_loss_price, "Channel stop loss hit");
                return Some(
                    TradingSignal::sell(symbol, price, pos.quantity, now)
                        .with_confidence(100.0)
                        .with_reason(format!("Stop loss at {}", stop_loss_price))
                        .with_risk(RiskLevel::High)
                        .as_stop_loss(),
                );
            }
            if let Some(tp) = take_profit_price {
                if price >= *tp {
                    info!(symbol = %symbol, price = %price, "Channel take profit hit");
                    return Some(
                        TradingSignal::sell(symbol, price, pos.quantity, now)
                            .with_confidence(90.0)
                            .with_reason(format!("Take profit at {}", tp))
                            .with_risk(RiskLevel::Low),
                    );
                }
            }
        }

        if self.state.in_cooldown(symbol, now, self.params.signal_cooldown_mins) {
            return None;
        }
        let reading = self.reading(symbol)?;
        if !reading.volume_confirmed {
            return None;
        }
        let confidence = reading.sell_confidence();
        if confidence < MIN_SELL_CONFIDENCE {
            return None;
        }
        Some(
            TradingSignal::sell(symbol, price, pos.quantity, now)
                .with_confidence(confidence)
                .with_reason(format!(
                    "Channel {:.0} {:?}, trend {:?}{}",
                    reading.value,
                    reading.zone,
                    reading.trend,
                    if reading.bearish_divergence { ", bearish divergence" } else { "" }
                ))
                .with_risk(risk_for_confidence(confidence)),
        )
    }

    fn entry(&self, symbol: &str, now: DateTime<Utc>) -> Option<TradingSignal> {
        if self.state.ledger.open_count() >= self.config.max_positions
            || !self.state.has_liquidity(symbol)
            || self.state.in_cooldown(symbol, now, self.params.signal_cooldown_mins)
        {
            return None;
        }
        let reading = self.reading(symbol)?;
        if !reading.volume_confirmed {
            return None;
        }
        let confidence = reading.buy_confidence();
        if confidence < MIN_BUY_CONFIDENCE {
            return None;
        }

        let price = self.state.history.latest(symbol)?.price;
        let budget = (self.config.allocation_capital * to_decimal(self.params.position_size_pct / 100.0))
            .min(self.state.ledger.cash())
            .min(self.state.room_in(symbol, &self.config));
        let quantity = units_for(budget, price);
        if quantity <= Decimal::ZERO {
            return None;
        }

        debug!(symbol = %symbol, value = reading.value, confidence, "Channel entry");
        Some(
            TradingSignal::buy(symbol, price, quantity, now)
                .with_confidence(confidence)
                .with_reason(format!(
                    "Channel {:.0}{}, trend {:?}{}",
                    reading.value,
                    if reading.extreme { " extreme oversold" } else { " oversold" },
                    reading.trend,
                    if reading.bullish_divergence { ", bullish divergence" } else { "" }
                ))
                .with_risk(risk_for_confidence(confidence)),
        )
    }
}

impl Strategy for ChannelIndexStrategy {
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
        let mut signals = Vec::new();
        let symbols = self.config.enabled_symbols.clone();

        for symbol in &symbols {
            let signal = if self.state.ledger.position(symbol).is_some() {
                self.exit(symbol, now)
            } else {
                self.entry(symbol, now)
            };
            if let Some(signal) = signal {
                self.state.touch(symbol, now);
                signals.push(signal);
            }
        }

        signals
    }

    fn apply_trade(&mut self, signal: &TradingSignal, quantity: Decimal, now: DateTime<Utc>) -> Fill {
        let key = signal.position_key();
        let fill = self
            .state
            .ledger
            .apply_trade(&signal.symbol, &key, signal.action, quantity, signal.price, now);

        if signal.action == SignalAction::Buy && !fill.is_empty() {
            let stop = to_decimal(1.0 - self.config.stop_loss_pct / 100.0);
            let take = self.config.take_profit_pct.map(|tp| to_decimal(1.0 + tp / 100.0));
            if let Some(pos) = self.state.ledger.position_mut(&key) {
                pos.extension = PositionExtension::Channel {
                    stop_loss_price: (pos.average_price * stop).round_dp(8),
                    take_profit_price: take.map(|t| (pos.average_price * t).round_dp(8)),
                };
            }
        }
        fill
    }

    fn reconfigure(&mut self, config: StrategyConfig) -> Result<()> {
        config.validate()?;
        if let StrategyParams::ChannelIndex(p) = &config.params {
            self.params = p.clone();
        }
        self.config = config;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StrategyKind;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn t(i: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(i)
    }

    fn series(prices: &[f64], volumes: &[f64]) -> Vec<MarketObservation> {
        prices
            .iter()
            .zip(volumes)
            .enumerate()
            .map(|(i, (p, v))| {
                MarketObservation::new("BTC", t(i as i64), to_decimal(*p), to_decimal(*v))
            })
            .collect()
    }

    fn strategy() -> ChannelIndexStrategy {
        let mut config = StrategyConfig::default_for(StrategyKind::ChannelIndex);
        config.enabled_symbols = vec!["BTC".into()];
        ChannelIndexStrategy::new(config, ChannelParams::default())
    }

    /// Calm drift then a sharp drop on a volume spike.
    fn crash_path() -> (Vec<f64>, Vec<f64>) {
        let mut prices: Vec<f64> = (0..40).map(|i| 100.0 + (i % 2) as f64 * 0.5).collect();
        let mut volumes = vec![1000.0; 40];
        for i in 1..=4 {
            prices.push(100.0 - 4.0 * i as f64);
            volumes.push(3000.0);
        }
        (prices, volumes)
    }

    #[test]
    fn test_flat_series_reads_zero() {
        let obs = series(&[50.0; 30], &[1000.0; 30]);
        let reading = ChannelReading::compute(&obs, &ChannelParams::default()).unwrap();
        assert_eq!(reading.value, 0.0);
        assert_eq!(reading.zone, ChannelZone::Neutral);
        assert_eq!(reading.trend, Trend::Sideways);
    }

    #[test]
    fn test_insufficient_history() {
        let obs = series(&[50.0; 10], &[1000.0; 10]);
        assert!(ChannelReading::compute(&obs, &ChannelParams::default()).is_none());
    }

    #[test]
    fn test_drop_reads_oversold_with_volume() {
        let (prices, volumes) = crash_path();
        let reading = ChannelReading::compute(&series(&prices, &volumes), &ChannelParams::default()).unwrap();
        assert_eq!(reading.zone, ChannelZone::Oversold);
        assert!(reading.volume_confirmed);
        assert!(reading.buy_confidence() >= MIN_BUY_CONFIDENCE);
    }

    #[test]
    fn test_divergence_halves() {
        let mut prices = vec![10.0; 10];
        prices.extend(vec![9.0; 10]);
        let mut osc = vec![-150.0; 10];
        osc.extend(vec![-80.0; 10]);
        assert_eq!(divergence(&prices, &osc), (true, false));
        assert_eq!(divergence(&prices[..15], &osc[..15]), (false, false));
    }

    #[test]
    fn test_no_signal_without_volume_confirmation() {
        let (prices, _) = crash_path();
        let volumes = vec![1000.0; prices.len()];
        let mut s = strategy();
        for obs in series(&prices, &volumes) {
            s.observe(obs).unwrap();
        }
        assert!(s.evaluate(t(prices.len() as i64)).is_empty());
    }

    #[test]
    fn test_entry_then_stop_loss() {
        let (prices, volumes) = crash_path();
        let mut s = strategy();
        for obs in series(&prices, &volumes) {
            s.observe(obs).unwrap();
        }
        let now = t(prices.len() as i64 - 1);
        let signals = s.evaluate(now);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].action, SignalAction::Buy);
        s.apply_trade(&signals[0], signals[0].quantity.unwrap(), now);

        let pos = s.state().ledger.position("BTC").unwrap();
        assert!(matches!(
            pos.extension,
            PositionExtension::Channel { stop_loss_price, .. }
                if stop_loss_price > dec!(79.79) && stop_loss_price < dec!(79.81)
        ));

        let last = prices.len();
        s.observe(MarketObservation::new("BTC", t(last as i64), dec!(78), dec!(1000)))
            .unwrap();
        let exits = s.evaluate(t(last as i64));
        assert_eq!(exits.len(), 1);
        assert!(exits[0].stop_loss);
    }

    fn reading(zone: ChannelZone, extreme: bool, trend: Trend, bearish_divergence: bool) -> ChannelReading {
        ChannelReading {
            value: 0.0,
            raw: 0.0,
            zone,
            extreme,
            trend,
            strength: 50.0,
            bullish_divergence: false,
            bearish_divergence,
            volume_confirmed: true,
        }
    }

    #[test]
    fn test_sell_confidence_tiers() {
        use ChannelZone::*;
        use Trend::*;

        assert_eq!(reading(Overbought, true, Bullish, true).sell_confidence(), 90.0);
        assert_eq!(reading(Overbought, true, Bullish, false).sell_confidence(), 85.0);
        assert_eq!(reading(Overbought, false, Bullish, true).sell_confidence(), 80.0);
        assert_eq!(reading(Overbought, false, Bearish, false).sell_confidence(), 70.0);
        assert_eq!(reading(Overbought, false, Sideways, false).sell_confidence(), 65.0);
        assert!(reading(Overbought, false, Bullish, false).sell_confidence() < MIN_SELL_CONFIDENCE);

        assert_eq!(reading(Neutral, false, Bearish, true).sell_confidence(), 70.0);
        assert_eq!(reading(Neutral, false, Sideways, true).sell_confidence(), 0.0);
        assert_eq!(reading(Oversold, false, Bearish, false).sell_confidence(), 0.0);
    }

    #[test]
    fn test_entry_capped_at_position_limit() {
        let (prices, volumes) = crash_path();
        let mut s = strategy();
        for obs in series(&prices, &volumes) {
            s.observe(obs).unwrap();
        }
        let signals = s.evaluate(t(prices.len() as i64 - 1));
        let value = signals[0].quantity.unwrap() * signals[0].price;
        let cap = s.state().position_cap(s.config());
        assert_eq!(cap, dec!(2000));
        assert!((value - cap).abs() < dec!(0.01));
    }

    #[test]
    fn test_overbought_rally_exits_before_take_profit() {
        let (prices, volumes) = crash_path();
        let mut s = strategy();
        for obs in series(&prices, &volumes) {
            s.observe(obs).unwrap();
        }
        let entry_at = t(prices.len() as i64 - 1);
        let entry = s.evaluate(entry_at);
        s.apply_trade(&entry[0], entry[0].quantity.unwrap(), entry_at);

        let mut hour = prices.len() as i64;
        for _ in 0..20 {
            s.observe(MarketObservation::new("BTC", t(hour), dec!(84), dec!(1000)))
                .unwrap();
            hour += 1;
        }
        for (price, volume) in [(dec!(85.5), dec!(1000)), (dec!(87), dec!(1000)), (dec!(88.5), dec!(3000))] {
            s.observe(MarketObservation::new("BTC", t(hour), price, volume))
                .unwrap();
            hour += 1;
        }

        let reading = s.reading("BTC").unwrap();
        assert_eq!(reading.zone, ChannelZone::Overbought);

        let exits = s.evaluate(t(hour));
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].action, SignalAction::Sell);
        assert!(!exits[0].stop_loss);
        assert!(exits[0].confidence >= MIN_SELL_CONFIDENCE);
    }
}
