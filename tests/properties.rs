//! Property tests for engine invariants.
//!
//! Uses proptest to verify:
//! 1. Signal sanity: every emitted signal has a positive price and a confidence in [0, 100]
//! 2. Staking allocation never exceeds capital or the single-allocation cap
//! 3. A full BUY/SELL round trip closes the position
//! 4. Risk validation never increases a signal's quantity
//! 5. Short-term momentum follows the direction of a monotonic series
//! 6. The channel oscillator reads zero on a flat series

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use strategy_engine::market::{indicators, HistoryStore};
use strategy_engine::models::{
    ChannelParams, Compounding, MarketObservation, Position, SignalAction, StakingOpportunity,
    StrategyConfig, StrategyKind, Tier, TradingSignal,
};
use strategy_engine::risk::{RiskLimits, RiskManager};
use strategy_engine::strategies::{
    allocate, score_opportunity, short_term_momentum, AnyStrategy, ChannelReading, PositionLedger,
    Strategy as _,
};

fn t(i: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(i)
}

fn decimal(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap().round_dp(8)
}

// ── Strategies (proptest) ────────────────────────────────────────────

/// Positive random walk: start price plus per-step returns, with volumes.
fn arb_walk() -> impl Strategy<Value = (f64, Vec<(f64, f64)>)> {
    (
        1.0..50_000.0_f64,
        prop::collection::vec((-0.05..0.05_f64, 0.0..5_000_000.0_f64), 30..80),
    )
}

fn arb_opportunities() -> impl Strategy<Value = Vec<(f64, u32, u32)>> {
    prop::collection::vec((0.0..30.0_f64, 0u32..500, 500u32..20_000), 1..10)
}

// ── 1. Signal sanity ─────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// No evaluator emits a non-positive price or an out-of-range confidence.
    #[test]
    fn signals_are_well_formed((start, steps) in arb_walk()) {
        for kind in StrategyKind::ALL {
            let config = StrategyConfig::default_for(kind);
            let symbol = config.enabled_symbols[0].clone();
            let mut strategy = AnyStrategy::from_config(config).unwrap();

            let mut price = start;
            for (i, (ret, volume)) in steps.iter().enumerate() {
                price = (price * (1.0 + ret)).max(0.01);
                let obs = MarketObservation::new(&symbol, t(i as i64), decimal(price), decimal(*volume));
                strategy.observe(obs).unwrap();

                for signal in strategy.evaluate(t(i as i64)) {
                    prop_assert!(signal.price > Decimal::ZERO, "{:?}", signal);
                    prop_assert!((0.0..=100.0).contains(&signal.confidence), "{:?}", signal);
                    if let Some(q) = signal.quantity {
                        strategy.apply_trade(&signal, q, t(i as i64));
                    }
                }
            }
        }
    }
}

// ── 2. Staking allocation ────────────────────────────────────────────

proptest! {
    /// Allocations sum to at most the capital and none exceeds 30% of it.
    #[test]
    fn allocation_respects_caps(opps in arb_opportunities(), capital in 1_000u32..1_000_000) {
        let scored: Vec<(StakingOpportunity, f64)> = opps
            .iter()
            .enumerate()
            .map(|(i, (apy, min, max))| {
                let opp = StakingOpportunity {
                    symbol: "ETH".to_string(),
                    platform: format!("venue{i}"),
                    apy: *apy,
                    fee_pct: 5.0,
                    lock_period_days: 0,
                    risk: Tier::Medium,
                    liquidity: Tier::High,
                    compounding: Compounding::Daily,
                    min_stake: Decimal::from(*min),
                    max_stake: Decimal::from(*max),
                };
                let score = score_opportunity(&opp, None);
                (opp, score)
            })
            .collect();

        let total = Decimal::from(capital);
        let plans = allocate(&scored, total, 30.0);
        let sum: Decimal = plans.iter().map(|p| p.amount).sum();
        prop_assert!(sum <= total);
        for plan in &plans {
            prop_assert!(plan.amount <= total * dec!(0.3), "{:?}", plan);
            prop_assert!(plan.amount > Decimal::ZERO);
        }
    }
}

// ── 3. Ledger round trip ─────────────────────────────────────────────

proptest! {
    /// BUY q at p followed by SELL q at p leaves no position behind.
    #[test]
    fn buy_then_sell_closes_position(units in 1i64..100_000_000_000, cents in 1i64..10_000_000) {
        let quantity = Decimal::new(units, 8);
        let price = Decimal::new(cents, 2);
        let mut ledger = PositionLedger::new(dec!(1000000000000000));

        let bought = ledger.apply_trade("BTC", "BTC", SignalAction::Buy, quantity, price, t(0));
        prop_assert_eq!(bought.quantity, quantity);
        ledger.apply_trade("BTC", "BTC", SignalAction::Sell, quantity, price, t(1));

        prop_assert!(ledger.position("BTC").is_none());
        prop_assert_eq!(ledger.cash(), ledger.initial_capital());
    }
}

// ── 4. Risk validation ───────────────────────────────────────────────

proptest! {
    /// The risk manager may shrink or refuse a signal, never grow it.
    #[test]
    fn validation_never_increases_quantity(
        units in 1i64..10_000_000_000,
        cents in 1i64..10_000_000,
        held in 0i64..10_000_000_000,
        sell in any::<bool>(),
    ) {
        let quantity = Decimal::new(units, 8);
        let price = Decimal::new(cents, 2);

        let mut history = HistoryStore::new(100);
        for i in 0..30 {
            let wiggle = if i % 2 == 0 { dec!(1.005) } else { dec!(0.995) };
            history
                .record(MarketObservation::new("BTC", t(i), price * wiggle, dec!(1000000)))
                .unwrap();
        }
        let positions = if held > 0 {
            vec![Position::new("BTC".into(), "BTC".into(), Decimal::new(held, 8), price, t(0))]
        } else {
            Vec::new()
        };
        let signal = if sell {
            TradingSignal::sell("BTC", price, quantity, t(30))
        } else {
            TradingSignal::buy("BTC", price, quantity, t(30))
        };

        let manager = RiskManager::new(RiskLimits::default(), dec!(10000));
        let validation = manager.validate_signal(&signal, &positions, &history);
        if let Some(adjusted) = validation.adjusted_quantity {
            prop_assert!(adjusted < quantity);
        }
        if let Some(executable) = validation.executable_quantity(&signal) {
            prop_assert!(executable <= quantity);
        }
    }
}

// ── 5. Momentum direction ────────────────────────────────────────────

proptest! {
    /// Strictly rising prices never score negative; strictly falling never positive.
    #[test]
    fn short_term_momentum_follows_direction(
        start in 1.0..10_000.0_f64,
        steps in prop::collection::vec(0.001..0.05_f64, 10..40),
        volumes in prop::collection::vec(0.0..1_000_000.0_f64, 40),
    ) {
        let mut rising = vec![start];
        for s in &steps {
            let last = rising[rising.len() - 1];
            rising.push(last * (1.0 + s));
        }
        let falling: Vec<f64> = rising.iter().rev().copied().collect();
        let vols = &volumes[..rising.len().min(volumes.len())];

        prop_assert!(short_term_momentum(&rising, vols) >= 0.0);
        prop_assert!(short_term_momentum(&falling, vols) <= 0.0);
    }
}

// ── 6. Flat channel ──────────────────────────────────────────────────

proptest! {
    /// A constant series reads exactly zero once the window is filled.
    #[test]
    fn flat_series_reads_zero(price in 0.01..100_000.0_f64, len in 40usize..120, period in 2usize..30) {
        let series = vec![price; len];
        let values = indicators::channel_index(&series, period);
        prop_assert_eq!(values.len(), len - period + 1);
        prop_assert!(values.iter().all(|v| *v == 0.0));

        let observations: Vec<MarketObservation> = (0..len)
            .map(|i| MarketObservation::new("SOL", t(i as i64), decimal(price), dec!(100000)))
            .collect();
        let params = ChannelParams { period, ..ChannelParams::default() };
        let reading = ChannelReading::compute(&observations, &params).unwrap();
        prop_assert_eq!(reading.value, 0.0);
        prop_assert_eq!(reading.raw, 0.0);
    }
}
