//! Staking-yield allocation.
//!
//! Opportunities are scored on risk-adjusted yield and capital is assigned
//! greedily, best score first. Staked positions accrue rewards by APY,
//! compound on their platform cadence and exit at unlock maturity.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::models::{
    PositionExtension, RiskLevel, SignalAction, StakingOpportunity, StakingParams,
    StakingStatus, StrategyConfig, StrategyParams, Tier, TradingSignal,
};

use super::{exit_signal, to_decimal, to_f64, units_for, EngineState, Fill, Strategy};

const HISTORY_WINDOW: usize = 200;
const STOP_OUT_COOLDOWN_HOURS: i64 = 24;
const SECONDS_PER_YEAR: f64 = 365.0 * 24.0 * 3600.0;

/// Risk-adjusted yield score for one opportunity.
///
/// `change_24h` is the asset's latest 24h change in percent, when known.
pub fn score_opportunity(opportunity: &StakingOpportunity, change_24h: Option<f64>) -> f64 {
    let mut score = opportunity.apy * 10.0;

    score *= match opportunity.risk {
        Tier::Low => 1.2,
        Tier::Medium => 1.0,
        Tier::High => 0.7,
    };
    score *= match opportunity.liquidity {
        Tier::High => 1.1,
        Tier::Medium => 1.0,
        Tier::Low => 0.8,
    };
    score *= 1.0 - opportunity.fee_pct / 100.0;

    if opportunity.lock_period_days > 0 {
        score *= (1.0 - opportunity.lock_period_days as f64 / 365.0).max(0.5);
    }

    score *= opportunity.compounding.score_factor();

    match change_24h {
        Some(change) if change > -2.0 && change < 5.0 => score *= 1.1,
        Some(change) if change < -10.0 => score *= 0.8,
        _ => {}
    }

    score
}

/// Target stake for one opportunity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub key: String,
    pub symbol: String,
    pub platform: String,
    pub amount: Decimal,
    pub score: f64,
}

/// Limits applied on top of the per-allocation percentage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AllocationCaps {
    /// Single allocation, as a percent of total capital
    pub max_allocation_pct: f64,
    /// Combined allocation to one symbol across venues, in USD
    pub symbol_cap: Decimal,
    /// Number of opportunities funded
    pub max_positions: usize,
}

/// Greedy allocation of `total_capital` over scored opportunities.
///
/// Each allocation is capped at `min(remaining, max_stake, max_allocation_pct of total)`
/// and skipped when the cap falls below the opportunity's minimum stake.
pub fn allocate(
    scored: &[(StakingOpportunity, f64)],
    total_capital: Decimal,
    max_allocation_pct: f64,
) -> Vec<AllocationPlan> {
    let caps = AllocationCaps {
        max_allocation_pct,
        symbol_cap: total_capital,
        max_positions: usize::MAX,
    };
    allocate_within(scored, total_capital, caps)
}

/// [`allocate`] that also bounds each symbol's combined stake and the number of funded opportunities.
pub fn allocate_within(
    scored: &[(StakingOpportunity, f64)],
    total_capital: Decimal,
    caps: AllocationCaps,
) -> Vec<AllocationPlan> {
    let mut ranked: Vec<&(StakingOpportunity, f64)> = scored.iter().collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.key().cmp(&b.0.key()))
    });

    let single_cap = (total_capital * to_decimal(caps.max_allocation_pct / 100.0)).round_dp(2);
    let mut remaining = total_capital;
    let mut per_symbol: BTreeMap<&str, Decimal> = BTreeMap::new();
    let mut plans = Vec::new();

    for (opp, score) in ranked {
        if remaining <= Decimal::ZERO || plans.len() >= caps.max_positions {
            break;
        }
        let symbol_used = per_symbol.get(opp.symbol.as_str()).copied().unwrap_or(Decimal::ZERO);
        let amount = remaining
            .min(opp.max_stake)
            .min(single_cap)
            .min(caps.symbol_cap - symbol_used);
        if amount < opp.min_stake || amount <= Decimal::ZERO {
            debug!(key = %opp.key(), amount = %amount, "Allocation below minimum stake, skipped");
            continue;
        }
        remaining -= amount;
        *per_symbol.entry(opp.symbol.as_str()).or_default() += amount;
        plans.push(AllocationPlan {
            key: opp.key(),
            symbol: opp.symbol.clone(),
            platform: opp.platform.clone(),
            amount,
            score: *score,
        });
    }

    plans
}

fn risk_for_tier(tier: Tier) -> RiskLevel {
    match tier {
        Tier::Low => RiskLevel::Low,
        Tier::Medium => RiskLevel::Medium,
        Tier::High => RiskLevel::High,
    }
}

/// Staking strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakingStrategy {
    config: StrategyConfig,
    params: StakingParams,
    state: EngineState,
    last_rebalance: Option<DateTime<Utc>>,
    /// Reward quantity awaiting compounding, per ledger key
    pending_compound: BTreeMap<String, Decimal>,
    /// Keys exited by stop loss and when
    stopped_out: BTreeMap<String, DateTime<Utc>>,
}

impl StakingStrategy {
    pub fn new(config: StrategyConfig, params: StakingParams) -> Self {
        let state = EngineState::new(HISTORY_WINDOW, config.allocation_capital);
        Self {
            config,
            params,
            state,
            last_rebalance: None,
            pending_compound: BTreeMap::new(),
            stopped_out: BTreeMap::new(),
        }
    }

    fn opportunity(&self, key: &str) -> Option<&StakingOpportunity> {
        self.params.opportunities.iter().find(|o| o.key() == key)
    }

    /// Current target allocations over eligible opportunities.
    pub fn plan_allocations(&self) -> Vec<AllocationPlan> {
        let scored: Vec<(StakingOpportunity, f64)> = self
            .params
            .opportunities
            .iter()
            .filter(|o| self.config.is_enabled(&o.symbol) && self.state.has_liquidity(&o.symbol))
            .map(|o| {
                let change = self.state.history.latest(&o.symbol).map(|obs| obs.change_24h);
                (o.clone(), score_opportunity(o, change))
            })
            .collect();

        let caps = AllocationCaps {
            max_allocation_pct: self.params.max_allocation_pct,
            symbol_cap: self.state.position_cap(&self.config),
            max_positions: self.config.max_positions,
        };
        allocate_within(&scored, self.config.allocation_capital, caps)
    }

    /// Rewards accrued on a position since its last compounding.
    fn accrued_rewards(quantity: Decimal, apy: f64, since: DateTime<Utc>, now: DateTime<Utc>) -> Decimal {
        let elapsed = (now - since).num_seconds().max(0) as f64;
        let units = to_f64(quantity) * apy / 100.0 * elapsed / SECONDS_PER_YEAR;
        to_decimal(units).round_dp(8)
    }

    /// Accrue rewards, advance statuses and emit maturity, compounding and emergency exits.
    fn lifecycle(&mut self, now: DateTime<Utc>) -> Vec<TradingSignal> {
        let mut signals = Vec::new();
        let stop_loss_pct = self.config.stop_loss_pct;
        let keys: Vec<String> = self.state.ledger.positions().map(|p| p.key.clone()).collect();

        for key in keys {
            let fee_pct = self.opportunity(&key).map(|o| o.fee_pct).unwrap_or(0.0);
            let interval = self
                .opportunity(&key)
                .map(|o| o.compounding.interval())
                .unwrap_or_else(|| Duration::days(1));

            let room = self
                .state
                .ledger
                .position(&key)
                .map_or(Decimal::ZERO, |p| self.state.room_in(&p.symbol, &self.config));

            let Some(pos) = self.state.ledger.position_mut(&key) else {
                continue;
            };
            let quantity = pos.quantity;
            let price = pos.current_price;
            let return_pct = pos.return_pct();

            let PositionExtension::Staking {
                platform,
                apy,
                lock_period_days,
                unlock_at,
                status,
                accrued_rewards,
                last_compounded_at,
                ..
            } = &mut pos.extension
            else {
                continue;
            };

            let net_apy = *apy * (1.0 - fee_pct / 100.0);
            *accrued_rewards = Self::accrued_rewards(quantity, net_apy, *last_compounded_at, now);

            let locked = *lock_period_days > 0;
            if locked && now >= *unlock_at {
                *status = StakingStatus::Unlocked;
            } else if locked && now >= *unlock_at - Duration::days(1) {
                *status = StakingStatus::Unlocking;
            }

            let platform = platform.clone();
            let matured = locked && *status == StakingStatus::Unlocked;
            let rewards = *accrued_rewards;
            let compound_due = now - *last_compounded_at >= interval && rewards > Decimal::ZERO;
            let compound_fits = rewards * price <= room;

            let pos = &*pos;
            if return_pct <= -stop_loss_pct {
                warn!(key = %key, return_pct, "Staking emergency stop loss");
                signals.push(
                    exit_signal(pos, Some(&platform), now)
                        .with_confidence(100.0)
                        .with_reason(format!("Emergency exit at {:.1}%", return_pct))
                        .with_risk(RiskLevel::High)
                        .as_stop_loss(),
                );
                self.stopped_out.insert(key.clone(), now);
            } else if matured {
                info!(key = %key, "Stake unlocked, exiting");
                signals.push(
                    exit_signal(pos, Some(&platform), now)
                        .with_confidence(90.0)
                        .with_reason("Lock period ended")
                        .with_risk(RiskLevel::Low),
                );
            } else if compound_due && !compound_fits {
                debug!(key = %key, rewards = %rewards, "Compounding deferred, position at cap");
            } else if compound_due {
                debug!(key = %key, rewards = %rewards, "Compounding rewards");
                signals.push(
                    TradingSignal::buy(&pos.symbol, pos.current_price, rewards, now)
                        .with_venue(platform.as_str())
                        .with_confidence(95.0)
                        .with_reason(format!("Auto-compound {} rewards", rewards))
                        .with_risk(RiskLevel::Low),
                );
                self.pending_compound.insert(key.clone(), rewards);
            }
        }

        signals
    }

    fn is_locked(&self, key: &str, now: DateTime<Utc>) -> bool {
        self.state.ledger.position(key).is_some_and(|p| {
            matches!(
                &p.extension,
                PositionExtension::Staking { lock_period_days, unlock_at, .. }
                    if *lock_period_days > 0 && now < *unlock_at
            )
        })
    }

    fn rebalance(&mut self, now: DateTime<Utc>, handled: &[String]) -> Vec<TradingSignal> {
        let mut signals = Vec::new();
        let plans = self.plan_allocations();
        let threshold = self.params.rebalance_threshold_pct;

        for plan in &plans {
            if handled.contains(&plan.key) {
                continue;
            }
            if self
                .stopped_out
                .get(&plan.key)
                .is_some_and(|at| now - *at < Duration::hours(STOP_OUT_COOLDOWN_HOURS))
            {
                continue;
            }
            let Some(price) = self.state.history.latest(&plan.symbol).map(|o| o.price) else {
                continue;
            };
            let risk = self
                .opportunity(&plan.key)
                .map(|o| risk_for_tier(o.risk))
                .unwrap_or(RiskLevel::Medium);
            let confidence = (50.0 + plan.score / 2.0).min(95.0);

            let current = self
                .state
                .ledger
                .position(&plan.key)
                .map(|p| p.market_value())
                .unwrap_or(Decimal::ZERO);

            if current.is_zero() {
                let quantity = units_for(plan.amount, price);
                if quantity <= Decimal::ZERO {
                    continue;
                }
                info!(key = %plan.key, amount = %plan.amount, score = plan.score, "New staking allocation");
                signals.push(
                    TradingSignal::buy(&plan.symbol, price, quantity, now)
                        .with_venue(plan.platform.as_str())
                        .with_confidence(confidence)
                        .with_reason(format!("Stake ${} at score {:.1}", plan.amount, plan.score))
                        .with_risk(risk),
                );
                continue;
            }

            let deviation_pct = to_f64((current - plan.amount) / plan.amount) * 100.0;
            if deviation_pct.abs() <= threshold {
                continue;
            }

            let diff = (plan.amount - current).abs();
            let quantity = units_for(diff, price);
            if quantity <= Decimal::ZERO {
                continue;
            }
            if deviation_pct < 0.0 {
                signals.push(
                    TradingSignal::buy(&plan.symbol, price, quantity, now)
                        .with_venue(plan.platform.as_str())
                        .with_confidence(confidence)
                        .with_reason(format!("Top up stake, {:.1}% under target", -deviation_pct))
                        .with_risk(risk),
                );
            } else if !self.is_locked(&plan.key, now) {
                signals.push(
                    TradingSignal::sell(&plan.symbol, price, quantity, now)
                        .with_venue(plan.platform.as_str())
                        .with_confidence(confidence)
                        .with_reason(format!("Trim stake, {:.1}% over target", deviation_pct))
                        .with_risk(RiskLevel::Low),
                );
            }
        }

        // Stakes that fell out of the plan are released once unlocked
        let planned: Vec<&str> = plans.iter().map(|p| p.key.as_str()).collect();
        for pos in self.state.ledger.positions() {
            if planned.contains(&pos.key.as_str()) || handled.contains(&pos.key) {
                continue;
            }
            if self.is_locked(&pos.key, now) {
                continue;
            }
            let venue = match &pos.extension {
                PositionExtension::Staking { platform, .. } => Some(platform.as_str()),
                _ => None,
            };
            signals.push(
                exit_signal(pos, venue, now)
                    .with_confidence(70.0)
                    .with_reason("Opportunity no longer allocated")
                    .with_risk(RiskLevel::Low),
            );
        }

        signals
    }
}

impl Strategy for StakingStrategy {
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
        self.pending_compound.clear();
        let mut signals = self.lifecycle(now);

        let due = self
            .last_rebalance
            .map_or(true, |at| now - at >= Duration::minutes(self.params.rebalance_interval_mins));
        if due {
            let handled: Vec<String> = signals.iter().map(TradingSignal::position_key).collect();
            signals.extend(self.rebalance(now, &handled));
            self.last_rebalance = Some(now);
        }

        signals
    }

    fn apply_trade(&mut self, signal: &TradingSignal, quantity: Decimal, now: DateTime<Utc>) -> Fill {
        let key = signal.position_key();

        if signal.action == SignalAction::Buy {
            if let Some(pending) = self.pending_compound.remove(&key) {
                let credited = self.state.ledger.credit(&key, quantity.min(pending), now);
                if let Some(PositionExtension::Staking {
                    accrued_rewards,
                    last_compounded_at,
                    ..
                }) = self.state.ledger.position_mut(&key).map(|p| &mut p.extension)
                {
                    *accrued_rewards = Decimal::ZERO;
                    *last_compounded_at = now;
                }
                return Fill {
                    quantity: credited,
                    price: signal.price,
                    realized_pnl: Decimal::ZERO,
                };
            }
        }

        let fill = self
            .state
            .ledger
            .apply_trade(&signal.symbol, &key, signal.action, quantity, signal.price, now);

        if signal.action == SignalAction::Buy && !fill.is_empty() {
            let opportunity = self.opportunity(&key).cloned();
            if let (Some(opp), Some(pos)) = (opportunity, self.state.ledger.position_mut(&key)) {
                if matches!(pos.extension, PositionExtension::Plain) {
                    pos.extension = PositionExtension::Staking {
                        platform: opp.platform.clone(),
                        apy: opp.apy,
                        lock_period_days: opp.lock_period_days,
                        started_at: now,
                        unlock_at: now + Duration::days(opp.lock_period_days as i64),
                        status: StakingStatus::Active,
                        accrued_rewards: Decimal::ZERO,
                        last_compounded_at: now,
                    };
                }
            }
        }
        fill
    }

    fn reconfigure(&mut self, config: StrategyConfig) -> Result<()> {
        config.validate()?;
        if let StrategyParams::Staking(p) = &config.params {
            self.params = p.clone();
        }
        self.config = config;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Compounding, MarketObservation, StrategyKind};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn t(hours: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(hours)
    }

    fn opp(symbol: &str, platform: &str, apy: f64, lock: u32) -> StakingOpportunity {
        StakingOpportunity {
            symbol: symbol.into(),
            platform: platform.into(),
            apy,
            fee_pct: 0.0,
            lock_period_days: lock,
            risk: Tier::Low,
            liquidity: Tier::High,
            compounding: Compounding::Daily,
            min_stake: dec!(100),
            max_stake: dec!(5000),
        }
    }

    fn strategy(opportunities: Vec<StakingOpportunity>) -> StakingStrategy {
        let params = StakingParams {
            opportunities,
            ..StakingParams::default()
        };
        let mut config = StrategyConfig::default_for(StrategyKind::Staking);
        config.params = StrategyParams::Staking(params.clone());
        StakingStrategy::new(config, params)
    }

    fn observe(s: &mut StakingStrategy, symbol: &str, hour: i64, price: Decimal) {
        s.observe(MarketObservation::new(symbol, t(hour), price, dec!(100000)))
            .unwrap();
    }

    #[test]
    fn test_score_factors() {
        let base = opp("ETH", "a", 5.0, 0);
        // 50 * 1.2 * 1.1 * 1.1 (daily)
        assert!((score_opportunity(&base, None) - 72.6).abs() < 1e-9);
        assert!((score_opportunity(&base, Some(1.0)) - 72.6 * 1.1).abs() < 1e-9);
        assert!((score_opportunity(&base, Some(-15.0)) - 72.6 * 0.8).abs() < 1e-9);

        let locked = opp("ETH", "b", 5.0, 300);
        assert!((score_opportunity(&locked, None) - 72.6 * 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_allocation_caps() {
        let scored = vec![
            (opp("ETH", "a", 10.0, 0), 90.0),
            (opp("SOL", "b", 8.0, 0), 80.0),
            (opp("ADA", "c", 3.0, 0), 30.0),
            (opp("DOT", "d", 2.0, 0), 20.0),
        ];
        let plans = allocate(&scored, dec!(10000), 30.0);

        let total: Decimal = plans.iter().map(|p| p.amount).sum();
        assert!(total <= dec!(10000));
        assert!(plans.iter().all(|p| p.amount <= dec!(3000)));
        assert_eq!(plans[0].key, "ETH@a");
        assert_eq!(plans.len(), 4);
        assert_eq!(plans[3].amount, dec!(1000));
    }

    #[test]
    fn test_allocation_skips_below_min_stake() {
        let mut small = opp("ADA", "c", 3.0, 0);
        small.min_stake = dec!(2000);
        let scored = vec![(opp("ETH", "a", 10.0, 0), 90.0), (small, 30.0)];
        let plans = allocate(&scored, dec!(4000), 30.0);
        assert_eq!(plans.len(), 1);
    }

    #[test]
    fn test_rebalance_at_most_hourly() {
        let mut s = strategy(vec![opp("ETH", "lido", 4.0, 0)]);
        observe(&mut s, "ETH", 0, dec!(2000));
        let first = s.evaluate(t(0));
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].venue.as_deref(), Some("lido"));
        assert!(s.evaluate(t(0) + Duration::minutes(30)).is_empty());
    }

    #[test]
    fn test_compounding_credits_rewards() {
        let mut s = strategy(vec![opp("ETH", "lido", 10.0, 0)]);
        s.config.max_position_pct = 50.0;
        observe(&mut s, "ETH", 0, dec!(2000));
        let buys = s.evaluate(t(0));
        s.apply_trade(&buys[0], buys[0].quantity.unwrap(), t(0));
        let held = s.state().ledger.position("ETH@lido").unwrap().quantity;
        let cash = s.state().ledger.cash();

        observe(&mut s, "ETH", 25, dec!(2000));
        let signals = s.evaluate(t(25));
        let compound = signals
            .iter()
            .find(|sig| sig.reason.starts_with("Auto-compound"))
            .unwrap();
        s.apply_trade(compound, compound.quantity.unwrap(), t(25));

        let pos = s.state().ledger.position("ETH@lido").unwrap();
        assert!(pos.quantity > held);
        assert_eq!(s.state().ledger.cash(), cash);
    }

    #[test]
    fn test_unlock_maturity_exits() {
        let mut s = strategy(vec![opp("DOT", "polkadot", 14.0, 1)]);
        observe(&mut s, "DOT", 0, dec!(7));
        let buys = s.evaluate(t(0));
        s.apply_trade(&buys[0], buys[0].quantity.unwrap(), t(0));

        observe(&mut s, "DOT", 24, dec!(7));
        let signals = s.evaluate(t(24));
        assert!(signals
            .iter()
            .any(|sig| sig.action == SignalAction::Sell && sig.reason == "Lock period ended"));
    }

    #[test]
    fn test_emergency_exit_on_loss() {
        let mut s = strategy(vec![opp("SOL", "marinade", 7.0, 30)]);
        observe(&mut s, "SOL", 0, dec!(100));
        let buys = s.evaluate(t(0));
        s.apply_trade(&buys[0], buys[0].quantity.unwrap(), t(0));

        observe(&mut s, "SOL", 2, dec!(80));
        let signals = s.evaluate(t(2));
        assert!(signals.iter().any(|sig| sig.stop_loss && sig.action == SignalAction::Sell));
        assert!(!signals.iter().any(|sig| sig.action == SignalAction::Buy));
    }

    #[test]
    fn test_symbol_cap_spans_venues() {
        let scored = vec![
            (opp("ETH", "a", 10.0, 0), 90.0),
            (opp("ETH", "b", 9.0, 0), 85.0),
            (opp("SOL", "c", 8.0, 0), 80.0),
        ];
        let caps = AllocationCaps {
            max_allocation_pct: 30.0,
            symbol_cap: dec!(2000),
            max_positions: 5,
        };
        let plans = allocate_within(&scored, dec!(10000), caps);

        let eth: Decimal = plans.iter().filter(|p| p.symbol == "ETH").map(|p| p.amount).sum();
        assert_eq!(eth, dec!(2000));
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[1].key, "SOL@c");
    }

    #[test]
    fn test_max_positions_limits_new_stakes() {
        let mut s = strategy(vec![
            opp("ETH", "lido", 6.0, 0),
            opp("SOL", "marinade", 7.0, 0),
            opp("ADA", "native", 3.0, 0),
            opp("DOT", "polkadot", 14.0, 0),
        ]);
        s.config.max_positions = 1;
        for (symbol, price) in [("ETH", dec!(2000)), ("SOL", dec!(100)), ("ADA", dec!(0.5)), ("DOT", dec!(7))] {
            observe(&mut s, symbol, 0, price);
        }

        let buys = s.evaluate(t(0));
        assert_eq!(buys.len(), 1);
        assert_eq!(buys[0].position_key(), "DOT@polkadot");
    }

    /// Stake ETH at 2000 with a stop loss wide enough to allow large swings.
    fn staked_eth() -> StakingStrategy {
        let mut s = strategy(vec![opp("ETH", "lido", 4.0, 0)]);
        s.config.stop_loss_pct = 50.0;
        observe(&mut s, "ETH", 0, dec!(2000));
        let buys = s.evaluate(t(0));
        s.apply_trade(&buys[0], buys[0].quantity.unwrap(), t(0));
        assert_eq!(s.state().ledger.symbol_exposure("ETH"), dec!(2000));
        s
    }

    #[test]
    fn test_rebalance_tops_up_after_drop() {
        let mut s = staked_eth();
        observe(&mut s, "ETH", 2, dec!(1400));

        let signals = s.evaluate(t(2));
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].action, SignalAction::Buy);
        assert!(signals[0].reason.starts_with("Top up stake"));
        // cap is 20% of the 9400 book
        let value = signals[0].quantity.unwrap() * dec!(1400);
        assert!((value - dec!(480)).abs() < dec!(0.01), "{value}");
    }

    #[test]
    fn test_rebalance_trims_after_rally() {
        let mut s = staked_eth();
        observe(&mut s, "ETH", 2, dec!(2600));

        let signals = s.evaluate(t(2));
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].action, SignalAction::Sell);
        assert!(signals[0].reason.starts_with("Trim stake"));
        let value = signals[0].quantity.unwrap() * dec!(2600);
        assert!((value - dec!(600)).abs() < dec!(0.01), "{value}");
    }

    #[test]
    fn test_compounding_deferred_at_position_cap() {
        let mut s = staked_eth();
        observe(&mut s, "ETH", 25, dec!(2000));

        assert!(s.evaluate(t(25)).is_empty());
        let pos = s.state().ledger.position("ETH@lido").unwrap();
        assert!(matches!(
            &pos.extension,
            PositionExtension::Staking { accrued_rewards, .. } if *accrued_rewards > Decimal::ZERO
        ));
    }
}
