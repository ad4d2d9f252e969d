//! Bounded per-symbol rolling history of market observations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::models::MarketObservation;

/// Overflow tolerated before a trim, so trimming happens in batches.
pub const DEFAULT_TRIM_TOLERANCE: usize = 200;

/// Append-only observation window per symbol.
///
/// Symbols are kept in a `BTreeMap` so iteration order (and therefore every
/// decision derived from it) is deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryStore {
    window: usize,
    tolerance: usize,
    series: BTreeMap<String, Vec<MarketObservation>>,
}

impl HistoryStore {
    pub fn new(window: usize) -> Self {
        Self::with_tolerance(window, DEFAULT_TRIM_TOLERANCE)
    }

    pub fn with_tolerance(window: usize, tolerance: usize) -> Self {
        Self {
            window: window.max(1),
            tolerance,
            series: BTreeMap::new(),
        }
    }

    /// Validate and append an observation.
    ///
    /// Invalid or out-of-order observations are rejected and leave the store untouched.
    pub fn record(&mut self, observation: MarketObservation) -> Result<()> {
        observation.validate()?;

        let series = self.series.entry(observation.symbol.clone()).or_default();
        if let Some(last) = series.last() {
            if observation.timestamp < last.timestamp {
                return Err(EngineError::invalid_observation(
                    &observation.symbol,
                    format!(
                        "out of order: {} precedes {}",
                        observation.timestamp, last.timestamp
                    ),
                ));
            }
        }
        series.push(observation);

        if series.len() > self.window + self.tolerance {
            let excess = series.len() - self.window;
            series.drain(..excess);
            debug!(window = self.window, dropped = excess, "Trimmed history");
        }
        Ok(())
    }

    /// Last `n` observations for a symbol (fewer if not available).
    pub fn window(&self, symbol: &str, n: usize) -> &[MarketObservation] {
        match self.series.get(symbol) {
            Some(series) => &series[series.len().saturating_sub(n)..],
            None => &[],
        }
    }

    /// All retained observations for a symbol.
    pub fn all(&self, symbol: &str) -> &[MarketObservation] {
        self.series.get(symbol).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn latest(&self, symbol: &str) -> Option<&MarketObservation> {
        self.series.get(symbol).and_then(|s| s.last())
    }

    pub fn len(&self, symbol: &str) -> usize {
        self.series.get(symbol).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.series.values().all(Vec::is_empty)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    /// Closing prices of the last `n` observations.
    pub fn prices(&self, symbol: &str, n: usize) -> Vec<f64> {
        self.window(symbol, n).iter().map(MarketObservation::price_f64).collect()
    }

    pub fn volumes(&self, symbol: &str, n: usize) -> Vec<f64> {
        self.window(symbol, n).iter().map(MarketObservation::volume_f64).collect()
    }

    /// Run `compute` over the full retained window only once `min_len` observations exist.
    pub fn compute_indicators<T>(
        &self,
        symbol: &str,
        min_len: usize,
        compute: impl FnOnce(&[MarketObservation]) -> T,
    ) -> Option<T> {
        let series = self.all(symbol);
        if series.len() < min_len.max(1) {
            return None;
        }
        Some(compute(series))
    }

    /// Flatten the last `n` observations of every symbol.
    pub fn recent(&self, n: usize) -> Vec<MarketObservation> {
        self.series
            .keys()
            .flat_map(|symbol| self.window(symbol, n).iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn obs(i: i64, price: Decimal) -> MarketObservation {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        MarketObservation::new("BTC", t0 + Duration::minutes(i), price, dec!(1000))
    }

    #[test]
    fn test_window_returns_at_most_n() {
        let mut store = HistoryStore::new(50);
        for i in 0..5 {
            store.record(obs(i, dec!(100))).unwrap();
        }
        assert_eq!(store.window("BTC", 3).len(), 3);
        assert_eq!(store.window("BTC", 10).len(), 5);
        assert!(store.window("ETH", 10).is_empty());
    }

    #[test]
    fn test_trims_in_batches() {
        let mut store = HistoryStore::with_tolerance(10, 5);
        for i in 0..15 {
            store.record(obs(i, dec!(100))).unwrap();
        }
        // Not yet over window + tolerance
        assert_eq!(store.len("BTC"), 15);
        store.record(obs(15, dec!(100))).unwrap();
        assert_eq!(store.len("BTC"), 10);
        assert_eq!(store.latest("BTC").unwrap().timestamp, obs(15, dec!(1)).timestamp);
    }

    #[test]
    fn test_rejects_invalid_and_out_of_order() {
        let mut store = HistoryStore::new(10);
        assert!(store.record(obs(0, dec!(-1))).is_err());
        assert_eq!(store.len("BTC"), 0);

        store.record(obs(5, dec!(100))).unwrap();
        assert!(store.record(obs(4, dec!(100))).is_err());
        assert_eq!(store.len("BTC"), 1);
    }

    #[test]
    fn test_indicators_none_until_ready() {
        let mut store = HistoryStore::new(10);
        for i in 0..3 {
            store.record(obs(i, dec!(100))).unwrap();
        }
        assert!(store.compute_indicators("BTC", 4, |s| s.len()).is_none());
        store.record(obs(3, dec!(100))).unwrap();
        assert_eq!(store.compute_indicators("BTC", 4, |s| s.len()), Some(4));
    }
}
