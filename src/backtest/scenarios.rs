//! Deterministic synthetic market scenarios.
//!
//! Every path is generated from `seed ^ hash(scenario, symbol)`, so the same seed
//! always reproduces the same observations regardless of run order or threading.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::models::MarketObservation;
use crate::strategies::{to_decimal, to_f64};

/// Named market regimes the harness can replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    Bull,
    VolatileBull,
    Bear,
    Crash,
    Sideways,
    VolatileSideways,
    FlashCrashRecovery,
    LowLiquidity,
}

impl Scenario {
    pub const ALL: [Scenario; 8] = [
        Scenario::Bull,
        Scenario::VolatileBull,
        Scenario::Bear,
        Scenario::Crash,
        Scenario::Sideways,
        Scenario::VolatileSideways,
        Scenario::FlashCrashRecovery,
        Scenario::LowLiquidity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scenario::Bull => "bull",
            Scenario::VolatileBull => "volatile_bull",
            Scenario::Bear => "bear",
            Scenario::Crash => "crash",
            Scenario::Sideways => "sideways",
            Scenario::VolatileSideways => "volatile_sideways",
            Scenario::FlashCrashRecovery => "flash_crash_recovery",
            Scenario::LowLiquidity => "low_liquidity",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Scenario::Bull => "Steady uptrend with low noise",
            Scenario::VolatileBull => "Uptrend with large swings",
            Scenario::Bear => "Steady downtrend",
            Scenario::Crash => "Rising first half, then a 30% decline on heavy volume",
            Scenario::Sideways => "Range-bound market around the starting price",
            Scenario::VolatileSideways => "Wide range with sharp reversals",
            Scenario::FlashCrashRecovery => "Sudden 25% drop followed by a full recovery",
            Scenario::LowLiquidity => "Quiet prices with almost no traded volume",
        }
    }

    /// Drift, noise and volume shape of step `step` out of `steps`.
    fn step(&self, step: usize, steps: usize) -> StepShape {
        let half = steps / 2;
        match self {
            Scenario::Bull => StepShape::drift(0.006, 0.003),
            Scenario::VolatileBull => StepShape::drift(0.006, 0.025),
            Scenario::Bear => StepShape::drift(-0.005, 0.004),
            Scenario::Crash => {
                if step < half {
                    StepShape::drift(0.002, 0.002)
                } else {
                    let decline_steps = (steps - half).max(1) as f64;
                    StepShape {
                        volume: 3.0,
                        ..StepShape::drift(0.7f64.powf(1.0 / decline_steps) - 1.0, 0.002)
                    }
                }
            }
            Scenario::Sideways => StepShape::revert(0.004),
            Scenario::VolatileSideways => StepShape::revert(0.03),
            Scenario::FlashCrashRecovery => {
                let drop_at = steps / 3;
                let recovery = (steps / 3).max(1);
                if step == drop_at {
                    StepShape {
                        volume: 5.0,
                        ..StepShape::drift(-0.25, 0.0)
                    }
                } else if step > drop_at && step <= drop_at + recovery {
                    StepShape {
                        volume: 2.0,
                        ..StepShape::drift((1.0 / 0.75f64).powf(1.0 / recovery as f64) - 1.0, 0.002)
                    }
                } else {
                    StepShape::drift(0.0, 0.002)
                }
            }
            Scenario::LowLiquidity => StepShape {
                volume: 0.0005,
                ..StepShape::revert(0.004)
            },
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scenario {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Scenario::ALL
            .into_iter()
            .find(|sc| sc.as_str() == normalized)
            .ok_or_else(|| EngineError::UnknownScenario(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy)]
struct StepShape {
    /// Deterministic per-step return
    drift: f64,
    /// Amplitude of the uniform per-step noise
    noise: f64,
    /// Pull back toward the base price, as a fraction of the gap
    reversion: f64,
    /// Multiplier on the base volume
    volume: f64,
}

impl StepShape {
    fn drift(drift: f64, noise: f64) -> Self {
        Self {
            drift,
            noise,
            reversion: 0.0,
            volume: 1.0,
        }
    }

    fn revert(noise: f64) -> Self {
        Self {
            drift: 0.0,
            noise,
            reversion: 0.3,
            volume: 1.0,
        }
    }
}

/// Shape and timing of generated paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioSettings {
    /// Simulated steps per scenario
    pub steps: usize,

    /// Minutes between observations
    pub step_minutes: i64,

    /// Calm observations replayed before step 0
    pub warmup_steps: usize,

    /// Typical traded volume per observation, in USD
    pub base_volume: Decimal,

    /// Timestamp of step 0
    pub start: DateTime<Utc>,
}

impl Default for ScenarioSettings {
    fn default() -> Self {
        Self {
            steps: 24,
            step_minutes: 60,
            warmup_steps: 72,
            base_volume: dec!(5000000),
            start: DateTime::from_timestamp(1_704_067_200, 0).unwrap_or_default(),
        }
    }
}

impl ScenarioSettings {
    pub fn validate(&self) -> Result<()> {
        if self.steps < 2 {
            return Err(EngineError::config("scenario needs at least 2 steps"));
        }
        if self.step_minutes < 1 {
            return Err(EngineError::config("scenario step must be at least one minute"));
        }
        if self.base_volume <= Decimal::ZERO {
            return Err(EngineError::config("scenario base volume must be positive"));
        }
        Ok(())
    }

    pub fn step(&self) -> Duration {
        Duration::minutes(self.step_minutes)
    }

    /// Observations spanning roughly one day.
    fn day_lookback(&self) -> usize {
        ((24 * 60) / self.step_minutes).max(1) as usize
    }

    /// Observations spanning roughly one hour.
    fn hour_lookback(&self) -> usize {
        (60 / self.step_minutes).max(1) as usize
    }
}

/// Observations delivered at one simulated instant.
#[derive(Debug, Clone)]
pub struct ScenarioTick {
    pub at: DateTime<Utc>,
    pub observations: Vec<MarketObservation>,
}

/// A generated scenario: warm-up history plus the steps to replay.
#[derive(Debug, Clone)]
pub struct ScenarioData {
    pub scenario: Scenario,
    pub warmup: Vec<MarketObservation>,
    pub ticks: Vec<ScenarioTick>,
}

impl ScenarioData {
    /// Every observation in timestamp order, warm-up included.
    pub fn observations(&self) -> impl Iterator<Item = &MarketObservation> {
        self.warmup
            .iter()
            .chain(self.ticks.iter().flat_map(|t| t.observations.iter()))
    }
}

/// Reference starting price for a symbol.
pub fn base_price(symbol: &str) -> f64 {
    match symbol {
        "BTC" => 40_000.0,
        "ETH" => 2_500.0,
        "SOL" => 100.0,
        "ADA" => 0.5,
        "DOT" => 7.0,
        "MATIC" => 0.8,
        "AVAX" => 35.0,
        "ATOM" => 10.0,
        _ => 100.0,
    }
}

/// FNV-1a, stable across builds so seeds reproduce everywhere.
pub(crate) fn stable_hash(parts: &[&str]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for part in parts {
        for byte in part.bytes().chain(std::iter::once(0xff)) {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
    }
    hash
}

/// Price and volume-multiplier path for one symbol, warm-up first.
fn price_path(scenario: Scenario, symbol: &str, seed: u64, settings: &ScenarioSettings) -> Vec<(f64, f64)> {
    let mut rng = StdRng::seed_from_u64(seed ^ stable_hash(&[scenario.as_str(), symbol]));
    let base = base_price(symbol);
    let mut path = Vec::with_capacity(settings.warmup_steps + settings.steps);

    for _ in 0..settings.warmup_steps {
        let noise: f64 = rng.gen_range(-1.0..1.0);
        let volume: f64 = rng.gen_range(-1.0..1.0);
        path.push((base * (1.0 + noise * 0.002), 1.0 + volume * 0.1));
    }

    let mut price = base;
    for step in 0..settings.steps {
        let shape = scenario.step(step, settings.steps);
        let noise: f64 = rng.gen_range(-1.0..1.0);
        let volume: f64 = rng.gen_range(-1.0..1.0);
        if step > 0 || shape.drift < -0.1 {
            let reversion = (base - price) / price * shape.reversion;
            price *= 1.0 + shape.drift + shape.noise * noise + reversion;
        }
        price = price.max(base * 1e-4);
        path.push((price, shape.volume * (1.0 + volume * 0.1)));
    }
    path
}

/// Turn a price path into observations with rolling 24h high/low and change fields.
fn to_observations(
    symbol: &str,
    path: &[(f64, f64)],
    first_at: DateTime<Utc>,
    settings: &ScenarioSettings,
) -> Vec<MarketObservation> {
    let day = settings.day_lookback();
    let hour = settings.hour_lookback();
    let prices: Vec<f64> = path.iter().map(|(p, _)| *p).collect();

    path.iter()
        .enumerate()
        .map(|(i, (price, volume_mult))| {
            let window = &prices[i.saturating_sub(day - 1)..=i];
            let high = window.iter().copied().fold(f64::MIN, f64::max);
            let low = window.iter().copied().fold(f64::MAX, f64::min);
            let change = |back: usize| {
                let prev = prices[i.saturating_sub(back)];
                if prev > 0.0 {
                    (price - prev) / prev * 100.0
                } else {
                    0.0
                }
            };

            let mut obs = MarketObservation::new(
                symbol,
                first_at + settings.step() * i as i32,
                to_decimal(*price).round_dp(8),
                (settings.base_volume * to_decimal(*volume_mult)).round_dp(2),
            );
            obs.high_24h = to_decimal(high).round_dp(8).max(obs.price);
            obs.low_24h = to_decimal(low).round_dp(8).min(obs.price);
            obs.change_24h = change(day);
            obs.change_1h = change(hour);
            obs
        })
        .collect()
}

/// Generate `scenario` for `symbols`.
pub fn generate(
    scenario: Scenario,
    symbols: &[String],
    seed: u64,
    settings: &ScenarioSettings,
) -> Result<ScenarioData> {
    settings.validate()?;
    let first_at = settings.start - settings.step() * settings.warmup_steps as i32;

    let per_symbol: Vec<Vec<MarketObservation>> = symbols
        .iter()
        .map(|symbol| {
            let path = price_path(scenario, symbol, seed, settings);
            to_observations(symbol, &path, first_at, settings)
        })
        .collect();

    let mut warmup = Vec::with_capacity(settings.warmup_steps * symbols.len());
    for i in 0..settings.warmup_steps {
        warmup.extend(per_symbol.iter().filter_map(|s| s.get(i).cloned()));
    }

    let ticks = (0..settings.steps)
        .map(|step| ScenarioTick {
            at: settings.start + settings.step() * step as i32,
            observations: per_symbol
                .iter()
                .filter_map(|s| s.get(settings.warmup_steps + step).cloned())
                .collect(),
        })
        .collect();

    Ok(ScenarioData {
        scenario,
        warmup,
        ticks,
    })
}

/// Closing price of `symbol` at the last step, relative to step 0, in percent.
pub fn path_return_pct(data: &ScenarioData, symbol: &str) -> f64 {
    let price_at = |tick: Option<&ScenarioTick>| {
        tick.and_then(|t| t.observations.iter().find(|o| o.symbol == symbol))
            .map(|o| to_f64(o.price))
    };
    match (price_at(data.ticks.first()), price_at(data.ticks.last())) {
        (Some(first), Some(last)) if first > 0.0 => (last - first) / first * 100.0,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbols() -> Vec<String> {
        vec!["BTC".to_string(), "ETH".to_string()]
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("crash".parse::<Scenario>().unwrap(), Scenario::Crash);
        assert_eq!("flash-crash-recovery".parse::<Scenario>().unwrap(), Scenario::FlashCrashRecovery);
        assert!(matches!(
            "moon".parse::<Scenario>(),
            Err(EngineError::UnknownScenario(_))
        ));
    }

    #[test]
    fn test_generation_is_deterministic() {
        let settings = ScenarioSettings::default();
        let a = generate(Scenario::VolatileBull, &symbols(), 7, &settings).unwrap();
        let b = generate(Scenario::VolatileBull, &symbols(), 7, &settings).unwrap();
        let c = generate(Scenario::VolatileBull, &symbols(), 8, &settings).unwrap();

        let prices = |d: &ScenarioData| d.observations().map(|o| o.price).collect::<Vec<_>>();
        assert_eq!(prices(&a), prices(&b));
        assert_ne!(prices(&a), prices(&c));
    }

    #[test]
    fn test_shape_and_timestamps() {
        let settings = ScenarioSettings::default();
        let data = generate(Scenario::Sideways, &symbols(), 1, &settings).unwrap();
        assert_eq!(data.warmup.len(), settings.warmup_steps * 2);
        assert_eq!(data.ticks.len(), settings.steps);
        assert_eq!(data.ticks[0].at, settings.start);
        assert!(data.warmup.iter().all(|o| o.timestamp < settings.start));
        assert!(data.observations().all(|o| o.validate().is_ok()));
    }

    #[test]
    fn test_crash_declines_thirty_percent_from_peak() {
        let settings = ScenarioSettings::default();
        let data = generate(Scenario::Crash, &symbols(), 42, &settings).unwrap();
        let btc: Vec<f64> = data
            .ticks
            .iter()
            .filter_map(|t| t.observations.iter().find(|o| o.symbol == "BTC"))
            .map(|o| o.price_f64())
            .collect();
        let peak = btc[..settings.steps / 2].iter().copied().fold(f64::MIN, f64::max);
        let last = btc[btc.len() - 1];
        let decline = (peak - last) / peak * 100.0;
        assert!(decline > 25.0 && decline < 35.0, "decline {decline}");

        let early_volume = data.ticks[2].observations[0].volume;
        let crash_volume = data.ticks[settings.steps - 2].observations[0].volume;
        assert!(crash_volume > early_volume * dec!(2));
    }

    #[test]
    fn test_bull_rises_and_low_liquidity_is_thin() {
        let settings = ScenarioSettings::default();
        let bull = generate(Scenario::Bull, &symbols(), 3, &settings).unwrap();
        assert!(path_return_pct(&bull, "ETH") > 10.0);

        let thin = generate(Scenario::LowLiquidity, &symbols(), 3, &settings).unwrap();
        assert!(thin
            .ticks
            .iter()
            .flat_map(|t| &t.observations)
            .all(|o| o.volume < dec!(10000)));
    }

    #[test]
    fn test_flash_crash_recovers() {
        let settings = ScenarioSettings::default();
        let data = generate(Scenario::FlashCrashRecovery, &symbols(), 5, &settings).unwrap();
        assert!(path_return_pct(&data, "BTC").abs() < 5.0);
    }
}
