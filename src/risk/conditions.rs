//! Market-condition classification from recent observations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::market::indicators;
use crate::models::MarketObservation;

/// Observations per symbol considered when classifying.
pub const CONDITION_WINDOW: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarketTrend {
    Bull,
    Bear,
    Sideways,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VolatilityLevel {
    Low,
    Medium,
    High,
    Extreme,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VolumeLevel {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Sentiment {
    ExtremeFear,
    Fear,
    Neutral,
    Greed,
    ExtremeGreed,
}

impl Sentiment {
    pub fn is_fearful(&self) -> bool {
        matches!(self, Sentiment::Fear | Sentiment::ExtremeFear)
    }
}

/// Classified market state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketCondition {
    pub trend: MarketTrend,
    pub volatility: VolatilityLevel,
    pub volume: VolumeLevel,
    pub sentiment: Sentiment,

    /// Trend strength, 0-100
    pub strength: f64,

    /// How much data backed the classification, 0-100
    pub confidence: f64,

    /// Mean net price change over the window, in percent
    pub price_change_pct: f64,

    /// Mean per-period return volatility, in percent
    pub volatility_pct: f64,

    /// Fear/greed index, 0 (fear) to 100 (greed)
    pub fear_greed: f64,
}

impl Default for MarketCondition {
    fn default() -> Self {
        Self {
            trend: MarketTrend::Sideways,
            volatility: VolatilityLevel::Low,
            volume: VolumeLevel::Normal,
            sentiment: Sentiment::Neutral,
            strength: 0.0,
            confidence: 0.0,
            price_change_pct: 0.0,
            volatility_pct: 0.0,
            fear_greed: 50.0,
        }
    }
}

impl VolatilityLevel {
    pub fn classify(volatility_pct: f64) -> Self {
        if volatility_pct < 2.0 {
            VolatilityLevel::Low
        } else if volatility_pct < 5.0 {
            VolatilityLevel::Medium
        } else if volatility_pct < 10.0 {
            VolatilityLevel::High
        } else {
            VolatilityLevel::Extreme
        }
    }
}

/// Classify trend, volatility, volume and sentiment over `observations`.
///
/// Observations may mix symbols; each symbol's last [`CONDITION_WINDOW`] points
/// are measured separately and the per-symbol figures averaged.
pub fn analyze_market_conditions(observations: &[MarketObservation]) -> MarketCondition {
    let mut by_symbol: BTreeMap<&str, Vec<&MarketObservation>> = BTreeMap::new();
    for obs in observations {
        by_symbol.entry(obs.symbol.as_str()).or_default().push(obs);
    }

    let mut changes = Vec::new();
    let mut volatilities = Vec::new();
    let mut volume_ratios = Vec::new();
    let mut day_changes = Vec::new();
    let mut samples = 0usize;

    for series in by_symbol.values_mut() {
        series.sort_by_key(|o| o.timestamp);
        let window = &series[series.len().saturating_sub(CONDITION_WINDOW)..];
        if window.len() < 2 {
            continue;
        }
        samples += window.len();

        let prices: Vec<f64> = window.iter().map(|o| o.price_f64()).collect();
        changes.push(indicators::pct_change(&prices));
        volatilities.push(indicators::std_dev(&indicators::returns(&prices)) * 100.0);

        let volumes: Vec<f64> = window.iter().map(|o| o.volume_f64()).collect();
        if let Some((last, trailing)) = volumes.split_last() {
            let avg = indicators::mean(trailing);
            if avg > 0.0 {
                volume_ratios.push(last / avg);
            }
        }
        if let Some(latest) = window.last() {
            day_changes.push(latest.change_24h);
        }
    }

    if changes.is_empty() {
        return MarketCondition::default();
    }

    let price_change_pct = indicators::mean(&changes);
    let volatility_pct = indicators::mean(&volatilities);

    let trend = if price_change_pct > 5.0 {
        MarketTrend::Bull
    } else if price_change_pct < -5.0 {
        MarketTrend::Bear
    } else {
        MarketTrend::Sideways
    };

    let volume_ratio = indicators::mean(&volume_ratios);
    let volume = if volume_ratios.is_empty() || volume_ratio < 0.5 {
        VolumeLevel::Low
    } else if volume_ratio > 1.5 {
        VolumeLevel::High
    } else {
        VolumeLevel::Normal
    };

    let fear_greed = (50.0 + indicators::mean(&day_changes) * 5.0).clamp(0.0, 100.0);
    let sentiment = if fear_greed < 20.0 {
        Sentiment::ExtremeFear
    } else if fear_greed < 40.0 {
        Sentiment::Fear
    } else if fear_greed < 60.0 {
        Sentiment::Neutral
    } else if fear_greed < 80.0 {
        Sentiment::Greed
    } else {
        Sentiment::ExtremeGreed
    };

    // Symbols that disagree on direction weaken the read
    let agreeing = changes
        .iter()
        .filter(|c| c.signum() == price_change_pct.signum())
        .count() as f64
        / changes.len() as f64;
    let coverage = (samples as f64 / (CONDITION_WINDOW * changes.len()) as f64).min(1.0);

    MarketCondition {
        trend,
        volatility: VolatilityLevel::classify(volatility_pct),
        volume,
        sentiment,
        strength: (price_change_pct.abs() * 10.0).min(100.0),
        confidence: (coverage * agreeing * 100.0).clamp(0.0, 100.0),
        price_change_pct,
        volatility_pct,
        fear_greed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::to_decimal;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn path(symbol: &str, prices: &[f64], change_24h: f64) -> Vec<MarketObservation> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        prices
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let mut obs =
                    MarketObservation::new(symbol, start + Duration::hours(i as i64), to_decimal(*p), dec!(50000));
                obs.change_24h = change_24h;
                obs
            })
            .collect()
    }

    #[test]
    fn test_empty_is_neutral() {
        let condition = analyze_market_conditions(&[]);
        assert_eq!(condition.trend, MarketTrend::Sideways);
        assert_eq!(condition.confidence, 0.0);
    }

    #[test]
    fn test_rising_market_is_bull_and_greedy() {
        let prices: Vec<f64> = (0..24).map(|i| 100.0 * 1.005f64.powi(i)).collect();
        let condition = analyze_market_conditions(&path("BTC", &prices, 4.0));
        assert_eq!(condition.trend, MarketTrend::Bull);
        assert_eq!(condition.volatility, VolatilityLevel::Low);
        assert_eq!(condition.sentiment, Sentiment::Greed);
        assert!((condition.confidence - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_whipsaw_is_extreme_volatility() {
        let prices: Vec<f64> = (0..24).map(|i| if i % 2 == 0 { 100.0 } else { 120.0 }).collect();
        let condition = analyze_market_conditions(&path("ETH", &prices, -12.0));
        assert_eq!(condition.volatility, VolatilityLevel::Extreme);
        assert_eq!(condition.sentiment, Sentiment::ExtremeFear);
    }

    #[test]
    fn test_volatility_buckets() {
        assert_eq!(VolatilityLevel::classify(1.0), VolatilityLevel::Low);
        assert_eq!(VolatilityLevel::classify(4.9), VolatilityLevel::Medium);
        assert_eq!(VolatilityLevel::classify(9.9), VolatilityLevel::High);
        assert_eq!(VolatilityLevel::classify(10.0), VolatilityLevel::Extreme);
    }
}
