//! Backtest harness: replays scenarios through strategy evaluators and the risk manager.

use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::metrics::{MetricsCalculator, DEFAULT_RISK_FREE_RATE};
use crate::models::{MarketObservation, RiskMetrics, SignalAction, StrategyConfig, StrategyKind, TradingSignal};
use crate::risk::{analyze_market_conditions, MarketCondition, OptimizationResult, RiskLimits, RiskManager};
use crate::strategies::{AnyStrategy, Strategy};

use super::edge_cases::{run_edge_case, EdgeCase, EdgeCaseResult};
use super::scenarios::{self, Scenario, ScenarioSettings};
use super::scoring::{score_result, ExecutedTrade, TestResult};

/// One strategy driven step by step with its own risk manager.
pub(crate) struct Simulation {
    strategy: AnyStrategy,
    risk: RiskManager,
    trades: Vec<ExecutedTrade>,
    signals: Vec<TradingSignal>,
    rejections: Vec<String>,
    invalid_observations: usize,
}

impl Simulation {
    /// The strategy's own position cap is held at or below the risk limit.
    pub(crate) fn new(mut config: StrategyConfig, limits: RiskLimits) -> Result<Self> {
        config.max_position_pct = config.max_position_pct.min(limits.max_position_size_pct);
        let capital = config.allocation_capital;
        Ok(Self {
            strategy: AnyStrategy::from_config(config)?,
            risk: RiskManager::new(limits, capital),
            trades: Vec::new(),
            signals: Vec::new(),
            rejections: Vec::new(),
            invalid_observations: 0,
        })
    }

    /// Observe history without evaluating, then mark the starting value.
    pub(crate) fn warm_up(&mut self, observations: impl IntoIterator<Item = MarketObservation>, at: DateTime<Utc>) {
        for obs in observations {
            self.observe(obs);
        }
        let value = self.strategy.state().ledger.total_value();
        self.risk.record_performance(value, at);
    }

    fn observe(&mut self, observation: MarketObservation) {
        if let Err(err) = self.strategy.observe(observation) {
            self.invalid_observations += 1;
            debug!(error = %err, "Observation rejected");
        }
    }

    /// One evaluation cycle at `at`; returns the number of evaluator signals.
    pub(crate) fn step(&mut self, at: DateTime<Utc>, observations: Vec<MarketObservation>) -> usize {
        for obs in observations {
            self.observe(obs);
        }

        let signals = self.strategy.evaluate(at);
        let emitted = signals.len();
        for signal in signals {
            self.execute(&signal, at);
            self.signals.push(signal);
        }

        let positions = self.strategy.positions();
        let emergency = self
            .risk
            .emergency_risk_management(&positions, &self.strategy.state().history, at);
        for signal in emergency {
            self.execute(&signal, at);
        }

        let value = self.strategy.state().ledger.total_value();
        self.risk.record_performance(value, at);
        emitted
    }

    fn execute(&mut self, signal: &TradingSignal, at: DateTime<Utc>) {
        if signal.action == SignalAction::Hold {
            return;
        }
        let positions = self.strategy.positions();
        let validation = self
            .risk
            .validate_signal(signal, &positions, &self.strategy.state().history);
        let Some(quantity) = validation.executable_quantity(signal) else {
            debug!(
                symbol = %signal.symbol,
                action = %signal.action,
                reason = %validation.reason,
                "Signal rejected"
            );
            self.rejections.push(validation.reason);
            return;
        };

        let fill = self.strategy.apply_trade(signal, quantity, at);
        if fill.is_empty() {
            return;
        }
        self.trades.push(ExecutedTrade {
            timestamp: at,
            symbol: signal.symbol.clone(),
            key: signal.position_key(),
            action: signal.action,
            quantity: fill.quantity,
            price: fill.price,
            confidence: signal.confidence,
            reason: signal.reason.clone(),
            stop_loss: signal.stop_loss,
            realized_pnl: fill.realized_pnl,
        });
    }

    pub(crate) fn signals(&self) -> &[TradingSignal] {
        &self.signals
    }

    /// Risk manager reasons for every rejected signal, in order.
    pub(crate) fn rejections(&self) -> &[String] {
        &self.rejections
    }

    pub(crate) fn trades(&self) -> &[ExecutedTrade] {
        &self.trades
    }

    pub(crate) fn invalid_observations(&self) -> usize {
        self.invalid_observations
    }

    pub(crate) fn total_value(&self) -> Decimal {
        self.strategy.state().ledger.total_value()
    }

    fn risk_metrics(&self) -> RiskMetrics {
        self.risk
            .calculate_risk_metrics(&self.strategy.positions(), &self.strategy.state().history)
    }

    /// Compute metrics and grade the run.
    pub(crate) fn finish(self, scenario: Scenario) -> TestResult {
        let history = self.risk.performance_history();
        let metrics = MetricsCalculator::calculate(
            &history,
            self.strategy.state().ledger.closed_trades(),
            DEFAULT_RISK_FREE_RATE,
        );
        let risk_metrics = self.risk_metrics();
        let assessment = score_result(scenario, &metrics, &self.trades);

        TestResult {
            scenario,
            strategy_id: self.strategy.id().to_string(),
            passed: assessment.passed(),
            score: assessment.score,
            issues: assessment.issues,
            recommendations: assessment.recommendations,
            performance_metrics: metrics,
            risk_metrics,
            summary: Some(self.strategy.summary()),
            signals_emitted: self.signals.len(),
            signals_rejected: self.rejections.len(),
            trades: self.trades,
        }
    }
}

/// Render a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Market condition and end-of-path risk for one scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioAnalysis {
    pub scenario: Scenario,
    pub condition: MarketCondition,

    /// Step-0 to final-step price change per symbol, in percent
    pub path_returns: Vec<(String, f64)>,

    /// End-of-run risk snapshot per strategy
    pub risk: Vec<(String, RiskMetrics)>,
}

/// Deterministic scenario runner over a fixed set of strategy configurations.
#[derive(Debug, Clone)]
pub struct BacktestHarness {
    strategies: Vec<StrategyConfig>,
    limits: RiskLimits,
    settings: ScenarioSettings,
    seed: u64,
}

impl BacktestHarness {
    pub fn new(strategies: Vec<StrategyConfig>, limits: RiskLimits, settings: ScenarioSettings, seed: u64) -> Self {
        Self {
            strategies,
            limits,
            settings,
            seed,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.strategies.clone(),
            config.risk_limits.clone(),
            config.scenario.clone(),
            config.seed,
        )
    }

    pub fn strategies(&self) -> &[StrategyConfig] {
        &self.strategies
    }

    /// Keep only strategies of `kind`.
    pub fn only(mut self, kind: StrategyKind) -> Self {
        self.strategies.retain(|c| c.kind() == kind);
        self
    }

    /// Run one strategy through one scenario. Panics are caught and reported as a failed result.
    pub fn run_scenario(&self, scenario: Scenario, config: &StrategyConfig) -> TestResult {
        info!(scenario = %scenario, strategy = %config.id, "Running scenario");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.simulate(scenario, config)));
        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                warn!(scenario = %scenario, strategy = %config.id, error = %err, "Scenario failed");
                TestResult::failed(scenario, &config.id, err.to_string())
            }
            Err(payload) => {
                let err = EngineError::StrategyPanic {
                    strategy: config.id.clone(),
                    scenario: scenario.to_string(),
                    message: panic_message(payload.as_ref()),
                };
                warn!(error = %err, "Strategy panicked");
                TestResult::failed(scenario, &config.id, err.to_string())
            }
        };

        info!(
            scenario = %scenario,
            strategy = %config.id,
            score = result.score,
            passed = result.passed,
            trades = result.trades.len(),
            "Scenario complete"
        );
        result
    }

    fn simulate(&self, scenario: Scenario, config: &StrategyConfig) -> Result<TestResult> {
        Ok(self.replay(scenario, config)?.finish(scenario))
    }

    fn replay(&self, scenario: Scenario, config: &StrategyConfig) -> Result<Simulation> {
        let data = scenarios::generate(scenario, &config.enabled_symbols, self.seed, &self.settings)?;
        let mut sim = Simulation::new(config.clone(), self.limits.clone())?;

        sim.warm_up(data.warmup, self.settings.start - self.settings.step());
        for tick in data.ticks {
            sim.step(tick.at, tick.observations);
        }
        Ok(sim)
    }

    /// Every (scenario, strategy) pair, sequentially, scenario-major.
    pub fn run_all(&self, scenarios: &[Scenario]) -> Vec<TestResult> {
        scenarios
            .iter()
            .flat_map(|scenario| self.strategies.iter().map(move |config| (*scenario, config)))
            .map(|(scenario, config)| self.run_scenario(scenario, config))
            .collect()
    }

    /// Same pairs as [`run_all`](Self::run_all), one blocking worker each.
    ///
    /// Pairs not yet started when `abort` is set are skipped. Results come back in
    /// `run_all` order regardless of completion order.
    pub async fn run_parallel(&self, scenarios: &[Scenario], abort: Arc<AtomicBool>) -> Vec<TestResult> {
        let harness = Arc::new(self.clone());
        let mut workers = JoinSet::new();

        for (si, scenario) in scenarios.iter().copied().enumerate() {
            for (ci, config) in self.strategies.iter().enumerate() {
                let harness = Arc::clone(&harness);
                let abort = Arc::clone(&abort);
                let config = config.clone();
                workers.spawn_blocking(move || {
                    if abort.load(Ordering::Relaxed) {
                        return None;
                    }
                    Some(((si, ci), harness.run_scenario(scenario, &config)))
                });
            }
        }

        let mut results = Vec::new();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Some(result)) => results.push(result),
                Ok(None) => {}
                Err(err) => warn!(error = %err, "Scenario worker failed"),
            }
        }
        if abort.load(Ordering::Relaxed) {
            info!(completed = results.len(), "Suite aborted");
        }

        results.sort_by_key(|(order, _)| *order);
        results.into_iter().map(|(_, result)| result).collect()
    }

    /// The fixed edge-case suite for every strategy.
    pub fn run_edge_cases(&self) -> Vec<EdgeCaseResult> {
        EdgeCase::ALL
            .into_iter()
            .flat_map(|case| self.strategies.iter().map(move |config| (case, config)))
            .map(|(case, config)| run_edge_case(case, config, &self.limits, self.seed, self.settings.start))
            .collect()
    }

    fn symbols(&self) -> Vec<String> {
        self.strategies
            .iter()
            .flat_map(|c| c.enabled_symbols.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Classify the market over `scenario` and report end-of-run risk per strategy.
    pub fn analyze(&self, scenario: Scenario) -> Result<ScenarioAnalysis> {
        let symbols = self.symbols();
        let data = scenarios::generate(scenario, &symbols, self.seed, &self.settings)?;
        let observations: Vec<MarketObservation> =
            data.ticks.iter().flat_map(|t| t.observations.iter().cloned()).collect();
        let condition = analyze_market_conditions(&observations);
        let path_returns = symbols
            .iter()
            .map(|s| (s.clone(), scenarios::path_return_pct(&data, s)))
            .collect();

        let risk = self
            .strategies
            .iter()
            .map(|config| (config.id.clone(), self.run_scenario(scenario, config).risk_metrics))
            .collect();

        Ok(ScenarioAnalysis {
            scenario,
            condition,
            path_returns,
            risk,
        })
    }

    /// Parameter nudges for the first strategy of `kind` under `scenario`'s conditions.
    pub fn optimize(&self, kind: StrategyKind, scenario: Scenario) -> Result<OptimizationResult> {
        let config = self
            .strategies
            .iter()
            .find(|c| c.kind() == kind)
            .cloned()
            .unwrap_or_else(|| StrategyConfig::default_for(kind));
        let data = scenarios::generate(scenario, &config.enabled_symbols, self.seed, &self.settings)?;
        let observations: Vec<MarketObservation> =
            data.ticks.iter().flat_map(|t| t.observations.iter().cloned()).collect();
        let condition = analyze_market_conditions(&observations);

        let manager = RiskManager::new(self.limits.clone(), config.allocation_capital);
        Ok(manager.optimize_algorithm(&config, &condition))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn harness(kind: StrategyKind) -> BacktestHarness {
        BacktestHarness::new(
            vec![StrategyConfig::default_for(kind)],
            RiskLimits::default(),
            ScenarioSettings::default(),
            42,
        )
    }

    #[test]
    fn test_run_is_repeatable() {
        let h = harness(StrategyKind::Momentum);
        let a = h.run_all(&[Scenario::VolatileBull]);
        let b = h.run_all(&[Scenario::VolatileBull]);
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].trades, b[0].trades);
        assert_eq!(a[0].score, b[0].score);
    }

    #[test]
    fn test_dca_buys_in_bull_market() {
        let result = harness(StrategyKind::Dca).run_all(&[Scenario::Bull]).remove(0);
        assert!(result.trades.iter().any(|t| t.action == SignalAction::Buy));
        assert!(result.performance_metrics.total_return_pct > 0.0);
        assert!(result.summary.is_some());
    }

    #[test]
    fn test_low_liquidity_stands_aside() {
        for kind in StrategyKind::ALL {
            let result = harness(kind).run_all(&[Scenario::LowLiquidity]).remove(0);
            assert!(
                result.trades.iter().all(|t| t.action != SignalAction::Buy),
                "{kind:?} bought without liquidity"
            );
        }
    }

    #[test]
    fn test_invalid_config_is_reported_not_raised() {
        let mut config = StrategyConfig::default_for(StrategyKind::Dca);
        config.enabled_symbols.clear();
        let h = BacktestHarness::new(vec![config], RiskLimits::default(), ScenarioSettings::default(), 1);
        let result = h.run_all(&[Scenario::Bull]).remove(0);
        assert!(!result.passed);
        assert_eq!(result.issues.len(), 1);
    }

    #[test]
    fn test_buys_stay_inside_position_limit() {
        for kind in [StrategyKind::Momentum, StrategyKind::Staking] {
            let h = harness(kind);
            for scenario in [Scenario::Bull, Scenario::Sideways] {
                let sim = h.replay(scenario, &h.strategies()[0]).unwrap();
                let emitted = sim.signals().len();
                let at_limit = sim
                    .rejections()
                    .iter()
                    .filter(|r| r.starts_with("Position limit") || r.starts_with("No room left"))
                    .count();
                assert!(
                    at_limit * 10 <= emitted + 10,
                    "{kind:?} in {scenario}: {at_limit} of {emitted} signals hit the position limit"
                );
            }
        }
    }

    #[test]
    fn test_strategy_cap_clamped_to_risk_limit() {
        let mut config = StrategyConfig::default_for(StrategyKind::Momentum);
        config.max_position_pct = 60.0;
        let limits = RiskLimits {
            max_position_size_pct: 15.0,
            ..RiskLimits::default()
        };
        let sim = Simulation::new(config, limits).unwrap();
        assert_eq!(sim.strategy.config().max_position_pct, 15.0);
    }

    #[test]
    fn test_panic_message() {
        let payload = panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom");
    }

    #[test]
    fn test_optimize_uses_scenario_condition() {
        let result = harness(StrategyKind::Momentum)
            .optimize(StrategyKind::Momentum, Scenario::Bear)
            .unwrap();
        assert_eq!(result.strategy, StrategyKind::Momentum);
        assert!(result.optimized.stop_loss_pct < result.original.stop_loss_pct);
    }
}
