//! Dollar-cost averaging on a fixed cadence with market-aware purchase sizing.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::market::indicators;
use crate::models::{
    DcaParams, PositionExtension, Purchase, SignalAction, StrategyConfig,
    StrategyParams, TradingSignal,
};

use super::{
    protective_exit, risk_for_confidence, to_decimal, to_f64, units_for, EngineState, Fill,
    ProtectiveExit, Strategy,
};

const HISTORY_WINDOW: usize = 500;
const VOLATILITY_LOOKBACK: usize = 20;
const VOLUME_LOOKBACK: usize = 20;

/// Per-symbol schedule progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DcaSchedule {
    /// Last time a purchase signal was emitted
    pub last_attempt: Option<DateTime<Utc>>,
    /// Purchases actually filled
    pub purchase_count: u32,
}

/// Result of dynamic sizing.
#[derive(Debug, Clone, PartialEq)]
pub struct PurchasePlan {
    pub amount: Decimal,
    pub confidence: f64,
    pub notes: Vec<&'static str>,
}

/// DCA strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DcaStrategy {
    config: StrategyConfig,
    params: DcaParams,
    state: EngineState,
    schedules: BTreeMap<String, DcaSchedule>,
}

impl DcaStrategy {
    pub fn new(config: StrategyConfig, params: DcaParams) -> Self {
        let state = EngineState::new(HISTORY_WINDOW, config.allocation_capital);
        Self {
            config,
            params,
            state,
            schedules: BTreeMap::new(),
        }
    }

    pub fn schedule(&self, symbol: &str) -> Option<&DcaSchedule> {
        self.schedules.get(symbol)
    }

    /// Whether a purchase for `symbol` is due at `now`.
    pub fn purchase_due(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        if let Some(start) = self.params.start_at {
            if now < start {
                return false;
            }
        }
        if let Some(end) = self.params.end_at {
            if now > end {
                return false;
            }
        }

        let schedule = self.schedules.get(symbol);
        if let (Some(max), Some(s)) = (self.params.max_purchases, schedule) {
            if s.purchase_count >= max {
                return false;
            }
        }

        match schedule.and_then(|s| s.last_attempt) {
            None => true,
            Some(last) => now - last >= self.params.frequency.interval(),
        }
    }

    /// Size the next purchase of `symbol` from market conditions and the current position.
    pub fn plan_purchase(&self, symbol: &str) -> Option<PurchasePlan> {
        let latest = self.state.history.latest(symbol)?;
        let base = self.params.base_amount;
        let mut multiplier = 1.0;
        let mut confidence: f64 = 70.0;
        let mut notes = Vec::new();

        let position = self.state.ledger.position(symbol);

        if self.params.dynamic_sizing {
            let prices = self.state.history.prices(symbol, VOLATILITY_LOOKBACK + 1);
            let volatility_pct = indicators::std_dev(&indicators::returns(&prices)) * 100.0;
            if volatility_pct > 5.0 {
                multiplier *= 0.8;
                notes.push("high volatility");
            } else if volatility_pct < 2.0 {
                multiplier *= 1.2;
                notes.push("calm market");
            }

            if let Some(pos) = position {
                let avg = to_f64(pos.average_price);
                if avg > 0.0 {
                    let diff_pct = (latest.price_f64() - avg) / avg * 100.0;
                    if diff_pct <= -10.0 {
                        multiplier *= 1.5;
                        confidence += 15.0;
                        notes.push("buying the dip");
                    } else if diff_pct >= 20.0 {
                        multiplier *= 0.7;
                        confidence -= 15.0;
                        notes.push("price well above cost");
                    }
                }
            }

            let volumes = self.state.history.volumes(symbol, VOLUME_LOOKBACK + 1);
            if let Some((last, trailing)) = volumes.split_last() {
                let avg = indicators::mean(trailing);
                if avg > 0.0 {
                    let ratio = last / avg;
                    if ratio > 1.5 {
                        multiplier *= 1.1;
                        confidence += 5.0;
                        notes.push("high volume");
                    } else if ratio < 0.5 {
                        multiplier *= 0.9;
                        confidence -= 5.0;
                        notes.push("low volume");
                    }
                }
            }

            multiplier *= self.config.risk_profile.dca_multiplier();
        }

        let concentration = position
            .map(|p| to_f64(p.market_value()) / to_f64(self.config.allocation_capital))
            .unwrap_or(0.0);
        if concentration < 0.1 {
            confidence += 10.0;
        } else if concentration > 0.4 {
            confidence -= 10.0;
        }

        let amount = (base * to_decimal(multiplier)).clamp(base * dec!(0.5), base * dec!(2.0));

        Some(PurchasePlan {
            amount: amount.round_dp(2),
            confidence: confidence.clamp(0.0, 100.0),
            notes,
        })
    }

    fn protective_exits(&mut self, now: DateTime<Utc>) -> Vec<TradingSignal> {
        let mut signals = Vec::new();
        for pos in self.state.ledger.positions() {
            let Some(exit) = protective_exit(pos, self.config.stop_loss_pct, self.config.take_profit_pct) else {
                continue;
            };
            match exit {
                ProtectiveExit::StopLoss => {
                    warn!(symbol = %pos.symbol, return_pct = pos.return_pct(), "DCA emergency stop loss")
                }
                ProtectiveExit::TakeProfit => {
                    info!(symbol = %pos.symbol, return_pct = pos.return_pct(), "DCA take profit")
                }
            }
            signals.push(exit.signal(pos, now));
        }
        for signal in &signals {
            self.state.touch(&signal.symbol, now);
        }
        signals
    }
}

impl Strategy for DcaStrategy {
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
        let mut signals = self.protective_exits(now);
        let exiting: Vec<String> = signals.iter().map(|s| s.symbol.clone()).collect();

        let symbols = self.config.enabled_symbols.clone();
        let mut open = self.state.ledger.open_count();
        for symbol in &symbols {
            if exiting.contains(symbol) || !self.state.has_liquidity(symbol) {
                continue;
            }
            if self.state.in_cooldown(symbol, now, self.params.signal_cooldown_mins) {
                debug!(symbol = %symbol, "DCA purchase held back after exit");
                continue;
            }
            let held = self.state.ledger.position(symbol).is_some();
            if !held && open >= self.config.max_positions {
                continue;
            }
            if !self.purchase_due(symbol, now) {
                continue;
            }
            let Some(plan) = self.plan_purchase(symbol) else {
                continue;
            };
            let Some(price) = self.state.history.latest(symbol).map(|o| o.price) else {
                continue;
            };
            let amount = plan.amount.min(self.state.room_in(symbol, &self.config));
            if amount < plan.amount {
                debug!(symbol = %symbol, planned = %plan.amount, amount = %amount, "DCA purchase trimmed to position cap");
            }
            let quantity = units_for(amount, price);
            if quantity <= Decimal::ZERO {
                continue;
            }

            let reason = if plan.notes.is_empty() {
                format!("Scheduled {:?} purchase of ${}", self.params.frequency, amount)
            } else {
                format!("Scheduled purchase of ${} ({})", amount, plan.notes.join(", "))
            };
            debug!(symbol = %symbol, amount = %amount, confidence = plan.confidence, "DCA purchase due");

            signals.push(
                TradingSignal::buy(symbol, price, quantity, now)
                    .with_confidence(plan.confidence)
                    .with_reason(reason)
                    .with_risk(risk_for_confidence(plan.confidence)),
            );
            self.schedules.entry(symbol.clone()).or_default().last_attempt = Some(now);
            if !held {
                open += 1;
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
            self.schedules.entry(signal.symbol.clone()).or_default().purchase_count += 1;
            if let Some(pos) = self.state.ledger.position_mut(&key) {
                let purchase = Purchase {
                    timestamp: now,
                    price: fill.price,
                    quantity: fill.quantity,
                    amount: fill.quantity * fill.price,
                };
                match &mut pos.extension {
                    PositionExtension::Dca { purchases } => purchases.push(purchase),
                    ext => {
                        *ext = PositionExtension::Dca {
                            purchases: vec![purchase],
                        }
                    }
                }
            }
        }
        fill
    }

    fn reconfigure(&mut self, config: StrategyConfig) -> Result<()> {
        config.validate()?;
        if let StrategyParams::Dca(p) = &config.params {
            self.params = p.clone();
        }
        self.config = config;
        Ok(())
    }
}
