//! Fixed edge-case suite: malformed, degenerate and adversarial feeds.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::models::{MarketObservation, SignalAction, StrategyConfig};
use crate::risk::RiskLimits;
use crate::strategies::to_decimal;

use super::harness::{panic_message, Simulation};
use super::scenarios::{base_price, stable_hash, ScenarioTick};

/// Most evaluator signals tolerated during the signal storm.
pub const STORM_SIGNAL_LIMIT: usize = 10;

const STORM_OBSERVATIONS: usize = 100;
const STORM_STEP: f64 = 10.0;
const STORM_BASE_PRICE: f64 = 1000.0;
const WARMUP_HOURS: usize = 72;
const VOLUME: Decimal = dec!(5000000);
const SPIKE_AT: usize = 12;
const SPIKE_FACTOR: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeCase {
    /// Healthy history, then observations with no traded volume
    ZeroVolume,
    /// One observation at ten times the price, then straight back
    ExtremeSpike,
    /// Nothing delivered for the strategy's symbols
    MissingData,
    /// Every observation carries a negative price
    NegativePrice,
    /// 100 observations one second apart on a ±10 random walk
    SignalStorm,
}

impl EdgeCase {
    pub const ALL: [EdgeCase; 5] = [
        EdgeCase::ZeroVolume,
        EdgeCase::ExtremeSpike,
        EdgeCase::MissingData,
        EdgeCase::NegativePrice,
        EdgeCase::SignalStorm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeCase::ZeroVolume => "zero_volume",
            EdgeCase::ExtremeSpike => "extreme_spike",
            EdgeCase::MissingData => "missing_data",
            EdgeCase::NegativePrice => "negative_price",
            EdgeCase::SignalStorm => "signal_storm",
        }
    }
}

impl fmt::Display for EdgeCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one (edge case, strategy) run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeCaseResult {
    pub case: EdgeCase,
    pub strategy_id: String,
    pub passed: bool,

    /// Signals produced by the evaluator during the case
    pub signals: usize,

    /// Observations the evaluator refused
    pub invalid_observations: usize,

    pub issues: Vec<String>,
}

/// Calm hourly history ending one hour before `start`.
fn calm_history(symbol: &str, base: f64, rng: &mut StdRng, start: DateTime<Utc>) -> Vec<MarketObservation> {
    (0..WARMUP_HOURS)
        .map(|i| {
            let at = start - Duration::hours((WARMUP_HOURS - i) as i64);
            let noise: f64 = rng.gen_range(-1.0..1.0);
            MarketObservation::new(symbol, at, to_decimal(base * (1.0 + noise * 0.002)).round_dp(8), VOLUME)
        })
        .collect()
}

fn hourly(start: DateTime<Utc>, count: usize, make: impl Fn(usize, DateTime<Utc>) -> Vec<MarketObservation>) -> Vec<ScenarioTick> {
    (0..count)
        .map(|i| {
            let at = start + Duration::hours(i as i64);
            ScenarioTick {
                at,
                observations: make(i, at),
            }
        })
        .collect()
}

/// Warm-up history and ticks for an edge case on `symbol`.
fn feed(case: EdgeCase, symbol: &str, seed: u64, start: DateTime<Utc>) -> (Vec<MarketObservation>, Vec<ScenarioTick>) {
    let mut rng = StdRng::seed_from_u64(seed ^ stable_hash(&[case.as_str(), symbol]));
    let base = base_price(symbol);

    match case {
        EdgeCase::ZeroVolume => {
            let warmup = calm_history(symbol, base, &mut rng, start);
            let price = to_decimal(base);
            let ticks = hourly(start, 24, |_, at| vec![MarketObservation::new(symbol, at, price, Decimal::ZERO)]);
            (warmup, ticks)
        }
        EdgeCase::ExtremeSpike => {
            let warmup = calm_history(symbol, base, &mut rng, start);
            let ticks = hourly(start, 24, |i, at| {
                let price = if i == SPIKE_AT { base * SPIKE_FACTOR } else { base };
                vec![MarketObservation::new(symbol, at, to_decimal(price), VOLUME)]
            });
            (warmup, ticks)
        }
        EdgeCase::MissingData => {
            let ticks = hourly(start, 24, |i, at| {
                if i % 6 == 0 {
                    vec![MarketObservation::new("UNLISTED", at, dec!(1), VOLUME)]
                } else {
                    Vec::new()
                }
            });
            (Vec::new(), ticks)
        }
        EdgeCase::NegativePrice => {
            let price = -to_decimal(base);
            let ticks = hourly(start, 10, |_, at| vec![MarketObservation::new(symbol, at, price, VOLUME)]);
            (Vec::new(), ticks)
        }
        EdgeCase::SignalStorm => {
            let warmup = calm_history(symbol, STORM_BASE_PRICE, &mut rng, start);
            let mut price = STORM_BASE_PRICE;
            let ticks = (0..STORM_OBSERVATIONS)
                .map(|i| {
                    let at = start + Duration::seconds(i as i64);
                    let step: f64 = rng.gen_range(-STORM_STEP..=STORM_STEP);
                    price = (price + step).max(1.0);
                    ScenarioTick {
                        at,
                        observations: vec![MarketObservation::new(symbol, at, to_decimal(price), VOLUME)],
                    }
                })
                .collect();
            (warmup, ticks)
        }
    }
}

/// Judge a finished edge-case run.
fn assess(case: EdgeCase, symbol: &str, sim: &Simulation, fed: usize) -> Vec<String> {
    let mut issues = Vec::new();
    let signals = sim.signals();

    if let Some(bad) = signals
        .iter()
        .find(|s| s.price <= Decimal::ZERO || !(0.0..=100.0).contains(&s.confidence))
    {
        issues.push(format!(
            "Malformed signal on {}: price {} confidence {}",
            bad.symbol, bad.price, bad.confidence
        ));
    }

    match case {
        EdgeCase::ZeroVolume | EdgeCase::MissingData => {
            if !signals.is_empty() {
                issues.push(format!("{} signals without usable data", signals.len()));
            }
        }
        EdgeCase::NegativePrice => {
            if sim.invalid_observations() != fed {
                issues.push(format!(
                    "Accepted {} of {} negative-price observations",
                    fed.saturating_sub(sim.invalid_observations()),
                    fed
                ));
            }
            if !signals.is_empty() {
                issues.push(format!("{} signals from rejected data", signals.len()));
            }
        }
        EdgeCase::ExtremeSpike => {
            let spike_price = to_decimal(base_price(symbol) * SPIKE_FACTOR);
            if let Some(trade) = sim
                .trades()
                .iter()
                .find(|t| t.action == SignalAction::Buy && t.price >= spike_price)
            {
                issues.push(format!("Bought into the spike at {}", trade.price));
            }
            if sim.total_value() <= Decimal::ZERO {
                issues.push("Portfolio value collapsed".to_string());
            }
        }
        EdgeCase::SignalStorm => {
            if signals.len() > STORM_SIGNAL_LIMIT {
                issues.push(format!(
                    "{} signals in {} seconds, limit {}",
                    signals.len(),
                    STORM_OBSERVATIONS,
                    STORM_SIGNAL_LIMIT
                ));
            }
        }
    }
    issues
}

/// Drive `config` through `case`. A panic fails the case without propagating.
pub fn run_edge_case(
    case: EdgeCase,
    config: &StrategyConfig,
    limits: &RiskLimits,
    seed: u64,
    start: DateTime<Utc>,
) -> EdgeCaseResult {
    let symbol = config.enabled_symbols.first().map(String::as_str).unwrap_or("BTC");
    let (warmup, ticks) = feed(case, symbol, seed, start);
    let fed = ticks.iter().map(|t| t.observations.len()).sum();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut sim = Simulation::new(config.clone(), limits.clone())?;
        sim.warm_up(warmup, start - Duration::hours(1));
        for tick in ticks {
            sim.step(tick.at, tick.observations);
        }
        let issues = assess(case, symbol, &sim, fed);
        Ok::<_, crate::error::EngineError>((sim.signals().len(), sim.invalid_observations(), issues))
    }));

    let (signals, invalid_observations, issues) = match outcome {
        Ok(Ok(run)) => run,
        Ok(Err(err)) => (0, 0, vec![err.to_string()]),
        Err(payload) => (0, 0, vec![format!("Strategy panicked: {}", panic_message(payload.as_ref()))]),
    };

    let passed = issues.is_empty();
    if passed {
        info!(case = %case, strategy = %config.id, signals, "Edge case passed");
    } else {
        warn!(case = %case, strategy = %config.id, ?issues, "Edge case failed");
    }

    EdgeCaseResult {
        case,
        strategy_id: config.id.clone(),
        passed,
        signals,
        invalid_observations,
        issues,
    }
}
