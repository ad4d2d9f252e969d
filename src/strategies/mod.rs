//! Strategy evaluators: momentum, DCA, staking yield and channel-index mean reversion.
//!
//! Every evaluator owns an explicit [`EngineState`] (history + ledger) and is
//! driven with an explicit `now`, so live and simulated execution share one
//! code path and any instance can be snapshotted and replayed.

mod channel;
mod dca;
mod ledger;
mod momentum;
mod staking;

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::market::HistoryStore;
use crate::models::{
    MarketObservation, PerformanceSummary, Position, RiskLevel, StrategyConfig, StrategyKind,
    StrategyParams, TradingSignal,
};

pub use channel::{ChannelIndexStrategy, ChannelReading, ChannelZone, Trend};
pub use dca::DcaStrategy;
pub use ledger::{ClosedTrade, Fill, PositionLedger};
pub use momentum::{short_term_momentum, MomentumScores, MomentumStrategy};
pub use staking::{
    allocate, allocate_within, score_opportunity, AllocationCaps, AllocationPlan, StakingStrategy,
};

/// Mutable state every evaluator carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineState {
    pub history: HistoryStore,
    pub ledger: PositionLedger,
    /// Last discretionary signal time per ledger key
    pub last_signal_at: BTreeMap<String, DateTime<Utc>>,
}

impl EngineState {
    pub fn new(history_window: usize, capital: Decimal) -> Self {
        Self {
            history: HistoryStore::new(history_window),
            ledger: PositionLedger::new(capital),
            last_signal_at: BTreeMap::new(),
        }
    }

    /// Record an observation and mark positions on its symbol.
    pub fn observe(&mut self, observation: MarketObservation) -> Result<()> {
        let symbol = observation.symbol.clone();
        let price = observation.price;
        let at = observation.timestamp;
        self.history.record(observation)?;
        self.ledger.mark(&symbol, price, at);
        Ok(())
    }

    pub fn in_cooldown(&self, key: &str, now: DateTime<Utc>, cooldown_mins: i64) -> bool {
        self.last_signal_at
            .get(key)
            .is_some_and(|at| now - *at < Duration::minutes(cooldown_mins))
    }

    pub fn touch(&mut self, key: &str, now: DateTime<Utc>) {
        self.last_signal_at.insert(key.to_string(), now);
    }

    /// Largest holding allowed in one symbol: `max_position_pct` of the
    /// allocation, or of the book's current value once it has shrunk below it.
    pub fn position_cap(&self, config: &StrategyConfig) -> Decimal {
        let base = config.allocation_capital.min(self.ledger.total_value());
        (base * to_decimal(config.max_position_pct / 100.0)).round_dp(2)
    }

    /// Value that can still be bought in `symbol` before reaching [`position_cap`](Self::position_cap).
    pub fn room_in(&self, symbol: &str, config: &StrategyConfig) -> Decimal {
        (self.position_cap(config) - self.ledger.symbol_exposure(symbol)).max(Decimal::ZERO)
    }

    /// Whether the latest observation for `symbol` shows any traded volume.
    pub fn has_liquidity(&self, symbol: &str) -> bool {
        self.history
            .latest(symbol)
            .is_some_and(|o| o.volume > Decimal::ZERO)
    }
}

/// The capability every evaluator implements.
pub trait Strategy {
    fn config(&self) -> &StrategyConfig;

    fn state(&self) -> &EngineState;

    fn state_mut(&mut self) -> &mut EngineState;

    /// Validate and record an observation. Invalid input leaves state untouched.
    fn observe(&mut self, observation: MarketObservation) -> Result<()> {
        self.state_mut().observe(observation)
    }

    /// Produce this cycle's signals.
    fn evaluate(&mut self, now: DateTime<Utc>) -> Vec<TradingSignal>;

    /// Apply an executed (possibly resized) signal to the ledger.
    fn apply_trade(&mut self, signal: &TradingSignal, quantity: Decimal, now: DateTime<Utc>) -> Fill {
        let key = signal.position_key();
        self.state_mut()
            .ledger
            .apply_trade(&signal.symbol, &key, signal.action, quantity, signal.price, now)
    }

    /// Swap configuration between evaluation cycles.
    fn reconfigure(&mut self, config: StrategyConfig) -> Result<()>;

    fn positions(&self) -> Vec<Position> {
        self.state().ledger.positions().cloned().collect()
    }

    fn summary(&self) -> PerformanceSummary {
        self.state().ledger.summary(&self.config().id)
    }
}

/// Closed set of evaluators, selected from [`StrategyParams`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum AnyStrategy {
    Momentum(MomentumStrategy),
    Dca(DcaStrategy),
    Staking(StakingStrategy),
    ChannelIndex(ChannelIndexStrategy),
}

macro_rules! dispatch {
    ($self:expr, $inner:ident => $body:expr) => {
        match $self {
            AnyStrategy::Momentum($inner) => $body,
            AnyStrategy::Dca($inner) => $body,
            AnyStrategy::Staking($inner) => $body,
            AnyStrategy::ChannelIndex($inner) => $body,
        }
    };
}

impl AnyStrategy {
    /// Validate the configuration and build the matching evaluator.
    pub fn from_config(config: StrategyConfig) -> Result<Self> {
        config.validate()?;
        Ok(match config.params.clone() {
            StrategyParams::Momentum(p) => AnyStrategy::Momentum(MomentumStrategy::new(config, p)),
            StrategyParams::Dca(p) => AnyStrategy::Dca(DcaStrategy::new(config, p)),
            StrategyParams::Staking(p) => AnyStrategy::Staking(StakingStrategy::new(config, p)),
            StrategyParams::ChannelIndex(p) => {
                AnyStrategy::ChannelIndex(ChannelIndexStrategy::new(config, p))
            }
        })
    }

    pub fn kind(&self) -> StrategyKind {
        self.config().kind()
    }

    pub fn id(&self) -> &str {
        &self.config().id
    }

    /// Serialize the full evaluator state.
    pub fn snapshot(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Rebuild an evaluator from [`AnyStrategy::snapshot`] output.
    pub fn restore(snapshot: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(snapshot)?)
    }
}

impl Strategy for AnyStrategy {
    fn config(&self) -> &StrategyConfig {
        dispatch!(self, s => s.config())
    }

    fn state(&self) -> &EngineState {
        dispatch!(self, s => s.state())
    }

    fn state_mut(&mut self) -> &mut EngineState {
        dispatch!(self, s => s.state_mut())
    }

    fn observe(&mut self, observation: MarketObservation) -> Result<()> {
        dispatch!(self, s => s.observe(observation))
    }

    fn evaluate(&mut self, now: DateTime<Utc>) -> Vec<TradingSignal> {
        dispatch!(self, s => s.evaluate(now))
    }

    fn apply_trade(&mut self, signal: &TradingSignal, quantity: Decimal, now: DateTime<Utc>) -> Fill {
        dispatch!(self, s => s.apply_trade(signal, quantity, now))
    }

    fn reconfigure(&mut self, config: StrategyConfig) -> Result<()> {
        dispatch!(self, s => s.reconfigure(config))
    }
}

// ==================== Shared helpers ====================

pub(crate) fn to_decimal(value: f64) -> Decimal {
    if !value.is_finite() {
        return Decimal::ZERO;
    }
    Decimal::from_f64(value).unwrap_or(Decimal::ZERO)
}

pub(crate) fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// Asset units purchasable with `amount` USD at `price`, rounded to 8 places.
pub(crate) fn units_for(amount: Decimal, price: Decimal) -> Decimal {
    if price <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    amount.checked_div(price).map_or(Decimal::ZERO, |units| units.round_dp(8))
}

pub(crate) fn risk_for_confidence(confidence: f64) -> RiskLevel {
    if confidence >= 80.0 {
        RiskLevel::Low
    } else if confidence >= 65.0 {
        RiskLevel::Medium
    } else {
        RiskLevel::High
    }
}

/// Why a protective exit fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProtectiveExit {
    StopLoss,
    TakeProfit,
}

impl ProtectiveExit {
    /// Full exit of `position` tagged with the trigger.
    pub(crate) fn signal(self, position: &Position, now: DateTime<Utc>) -> TradingSignal {
        let signal = exit_signal(position, None, now);
        match self {
            ProtectiveExit::StopLoss => signal
                .with_confidence(100.0)
                .with_reason(format!("Stop loss at {:.1}% return", position.return_pct()))
                .with_risk(RiskLevel::High)
                .as_stop_loss(),
            ProtectiveExit::TakeProfit => signal
                .with_confidence(90.0)
                .with_reason(format!("Take profit at {:.1}% return", position.return_pct()))
                .with_risk(RiskLevel::Low),
        }
    }
}

/// Stop-loss / take-profit check on unrealized return.
pub(crate) fn protective_exit(
    position: &Position,
    stop_loss_pct: f64,
    take_profit_pct: Option<f64>,
) -> Option<ProtectiveExit> {
    let ret = position.return_pct();
    if ret <= -stop_loss_pct {
        return Some(ProtectiveExit::StopLoss);
    }
    match take_profit_pct {
        Some(tp) if ret >= tp => Some(ProtectiveExit::TakeProfit),
        _ => None,
    }
}

/// Full-exit signal for a position.
pub(crate) fn exit_signal(position: &Position, venue: Option<&str>, now: DateTime<Utc>) -> TradingSignal {
    let signal = TradingSignal::sell(&position.symbol, position.current_price, position.quantity, now);
    match venue {
        Some(v) => signal.with_venue(v),
        None => signal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SignalAction;
    use rust_decimal_macros::dec;

    #[test]
    fn test_from_config_rejects_invalid() {
        let mut config = StrategyConfig::default_for(StrategyKind::Momentum);
        config.max_positions = 0;
        assert!(AnyStrategy::from_config(config).is_err());
    }

    #[test]
    fn test_snapshot_restore() {
        let mut strategy =
            AnyStrategy::from_config(StrategyConfig::default_for(StrategyKind::Dca)).unwrap();
        let now = Utc::now();
        strategy
            .observe(MarketObservation::new("BTC", now, dec!(100), dec!(50000)))
            .unwrap();

        let snapshot = strategy.snapshot().unwrap();
        let restored = AnyStrategy::restore(snapshot).unwrap();
        assert_eq!(restored.kind(), StrategyKind::Dca);
        assert_eq!(restored.state().history.len("BTC"), 1);
    }

    #[test]
    fn test_position_cap_follows_shrinking_book() {
        let config = StrategyConfig::default_for(StrategyKind::Momentum);
        let mut state = EngineState::new(100, config.allocation_capital);
        assert_eq!(state.position_cap(&config), dec!(2000));

        let now = Utc::now();
        state.observe(MarketObservation::new("BTC", now, dec!(100), dec!(50000))).unwrap();
        state.ledger.apply_trade("BTC", "BTC", SignalAction::Buy, dec!(15), dec!(100), now);
        assert_eq!(state.room_in("BTC", &config), dec!(500));

        state.observe(MarketObservation::new("BTC", now, dec!(50), dec!(50000))).unwrap();
        // 8500 cash + 750 marked
        assert_eq!(state.position_cap(&config), dec!(1850));
        assert_eq!(state.room_in("BTC", &config), dec!(1100));
    }

    #[test]
    fn test_units_for() {
        assert_eq!(units_for(dec!(100), dec!(3)), dec!(33.33333333));
        assert_eq!(units_for(dec!(100), Decimal::ZERO), Decimal::ZERO);
        assert_eq!(units_for(Decimal::MAX, Decimal::new(1, 28)), Decimal::ZERO);
    }

    #[test]
    fn test_protective_exit() {
        let mut pos = Position::new("BTC".into(), "BTC".into(), dec!(1), dec!(100), Utc::now());
        pos.update_price(dec!(85), Utc::now());
        assert_eq!(protective_exit(&pos, 10.0, Some(20.0)), Some(ProtectiveExit::StopLoss));
        pos.update_price(dec!(125), Utc::now());
        assert_eq!(protective_exit(&pos, 10.0, Some(20.0)), Some(ProtectiveExit::TakeProfit));
        assert_eq!(protective_exit(&pos, 10.0, None), None);

        let exit = ProtectiveExit::TakeProfit.signal(&pos, Utc::now());
        assert_eq!(exit.quantity, Some(dec!(1)));
        assert!(!exit.stop_loss);
        assert!(ProtectiveExit::StopLoss.signal(&pos, Utc::now()).stop_loss);
    }
}
