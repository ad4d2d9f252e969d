//! Strategy configuration: shared fields plus a closed set of per-kind parameter records.

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Investor risk appetite, used to weight scores and scale sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskProfile {
    Conservative,
    #[default]
    Moderate,
    Aggressive,
}

impl RiskProfile {
    /// Momentum sub-score weights: (short, medium, volume-weighted, volatility-adjusted, trend).
    ///
    /// Each row sums to 1.
    pub fn momentum_weights(&self) -> [f64; 5] {
        match self {
            RiskProfile::Conservative => [0.10, 0.35, 0.20, 0.25, 0.10],
            RiskProfile::Moderate => [0.20, 0.25, 0.20, 0.15, 0.20],
            RiskProfile::Aggressive => [0.30, 0.15, 0.15, 0.10, 0.30],
        }
    }

    /// DCA purchase size multiplier.
    pub fn dca_multiplier(&self) -> f64 {
        match self {
            RiskProfile::Conservative => 0.8,
            RiskProfile::Moderate => 1.0,
            RiskProfile::Aggressive => 1.3,
        }
    }
}

/// Which evaluator a configuration instantiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Momentum,
    Dca,
    Staking,
    ChannelIndex,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::Momentum,
        StrategyKind::Dca,
        StrategyKind::Staking,
        StrategyKind::ChannelIndex,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Momentum => "momentum",
            StrategyKind::Dca => "dca",
            StrategyKind::Staking => "staking",
            StrategyKind::ChannelIndex => "channel_index",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "momentum" => Ok(Self::Momentum),
            "dca" => Ok(Self::Dca),
            "staking" | "yield" => Ok(Self::Staking),
            "channel_index" | "channel" | "cci" => Ok(Self::ChannelIndex),
            other => Err(EngineError::config(format!("unknown strategy kind: {}", other))),
        }
    }
}

// ==================== Momentum ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MomentumParams {
    /// Minimum simulated time between rebalances
    pub rebalance_interval_mins: i64,

    /// Per-symbol history cap
    pub history_limit: usize,

    /// Resize a holding when it deviates from target by more than this (percent)
    pub rebalance_threshold_pct: f64,

    /// Quiet period per symbol after a discretionary signal
    pub signal_cooldown_mins: i64,
}

impl Default for MomentumParams {
    fn default() -> Self {
        Self {
            rebalance_interval_mins: 15,
            history_limit: 1000,
            rebalance_threshold_pct: 10.0,
            signal_cooldown_mins: 60,
        }
    }
}

// ==================== DCA ====================

/// Purchase cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cadence", rename_all = "snake_case")]
pub enum DcaFrequency {
    Daily,
    Weekly,
    Monthly,
    CustomHours { hours: u32 },
}

impl DcaFrequency {
    pub fn interval(&self) -> Duration {
        match self {
            DcaFrequency::Daily => Duration::days(1),
            DcaFrequency::Weekly => Duration::weeks(1),
            DcaFrequency::Monthly => Duration::days(30),
            DcaFrequency::CustomHours { hours } => Duration::hours(i64::from(*hours)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DcaParams {
    pub frequency: DcaFrequency,

    /// Base purchase size in USD
    pub base_amount: Decimal,

    /// First purchase is not made before this time
    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,

    /// No purchases after this time
    #[serde(default)]
    pub end_at: Option<DateTime<Utc>>,

    /// Stop after this many purchases per symbol
    #[serde(default)]
    pub max_purchases: Option<u32>,

    /// Scale purchases by volatility, cost basis, volume and risk profile
    pub dynamic_sizing: bool,

    /// No purchase of a symbol this soon after a stop-loss or take-profit exit
    #[serde(default = "default_dca_cooldown_mins")]
    pub signal_cooldown_mins: i64,
}

impl Default for DcaParams {
    fn default() -> Self {
        Self {
            frequency: DcaFrequency::Daily,
            base_amount: dec!(250),
            start_at: None,
            end_at: None,
            max_purchases: None,
            dynamic_sizing: true,
            signal_cooldown_mins: default_dca_cooldown_mins(),
        }
    }
}

// ==================== Staking ====================

/// Three-level qualitative tier used for risk and liquidity ratings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    Low,
    Medium,
    High,
}

/// How often staking rewards are compounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compounding {
    Daily,
    Weekly,
    Monthly,
}

impl Compounding {
    pub fn interval(&self) -> Duration {
        match self {
            Compounding::Daily => Duration::days(1),
            Compounding::Weekly => Duration::weeks(1),
            Compounding::Monthly => Duration::days(30),
        }
    }

    pub fn score_factor(&self) -> f64 {
        match self {
            Compounding::Daily => 1.1,
            Compounding::Weekly => 1.0,
            Compounding::Monthly => 0.9,
        }
    }
}

/// A symbol × platform staking venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StakingOpportunity {
    pub symbol: String,
    pub platform: String,

    /// Annual percentage yield (percent units)
    pub apy: f64,

    /// Platform fee (percent of rewards)
    pub fee_pct: f64,

    pub lock_period_days: u32,
    pub risk: Tier,
    pub liquidity: Tier,
    pub compounding: Compounding,

    /// Minimum stake in USD
    pub min_stake: Decimal,

    /// Maximum stake in USD
    pub max_stake: Decimal,
}

impl StakingOpportunity {
    pub fn key(&self) -> String {
        super::signal::position_key(&self.symbol, Some(&self.platform))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StakingParams {
    pub opportunities: Vec<StakingOpportunity>,

    /// Minimum simulated time between allocation passes
    pub rebalance_interval_mins: i64,

    /// Single-allocation cap as a percent of total capital
    pub max_allocation_pct: f64,

    /// Rebalance when an allocation deviates from target by more than this (percent)
    pub rebalance_threshold_pct: f64,
}

impl Default for StakingParams {
    fn default() -> Self {
        let opp = |symbol: &str, platform: &str, apy: f64, fee: f64, lock: u32, risk: Tier, liquidity: Tier, compounding: Compounding| {
            StakingOpportunity {
                symbol: symbol.to_string(),
                platform: platform.to_string(),
                apy,
                fee_pct: fee,
                lock_period_days: lock,
                risk,
                liquidity,
                compounding,
                min_stake: dec!(100),
                max_stake: dec!(5000),
            }
        };
        Self {
            opportunities: vec![
                opp("ETH", "lido", 4.2, 10.0, 0, Tier::Low, Tier::High, Compounding::Daily),
                opp("ETH", "rocketpool", 4.0, 14.0, 0, Tier::Low, Tier::Medium, Compounding::Daily),
                opp("SOL", "marinade", 7.1, 6.0, 0, Tier::Medium, Tier::High, Compounding::Daily),
                opp("ADA", "native", 3.5, 0.0, 0, Tier::Low, Tier::High, Compounding::Weekly),
                opp("DOT", "polkadot", 14.0, 0.0, 28, Tier::Medium, Tier::Medium, Compounding::Daily),
                opp("DOT", "parachain", 18.0, 5.0, 90, Tier::High, Tier::Low, Compounding::Monthly),
            ],
            rebalance_interval_mins: 60,
            max_allocation_pct: 30.0,
            rebalance_threshold_pct: 10.0,
        }
    }
}

// ==================== Channel index ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelParams {
    /// Oscillator lookback
    pub period: usize,

    /// Moving-average length applied to the oscillator
    pub smoothing: usize,

    pub overbought: f64,
    pub oversold: f64,
    pub extreme_overbought: f64,
    pub extreme_oversold: f64,

    /// Window used for trend confirmation and strength
    pub confirmation_window: usize,

    /// Latest volume must be at least this multiple of the trailing average
    pub volume_multiplier: f64,

    /// Entry size as a percent of allocation capital
    pub position_size_pct: f64,

    pub signal_cooldown_mins: i64,
}

impl Default for ChannelParams {
    fn default() -> Self {
        Self {
            period: 20,
            smoothing: 3,
            overbought: 100.0,
            oversold: -100.0,
            extreme_overbought: 200.0,
            extreme_oversold: -200.0,
            confirmation_window: 10,
            volume_multiplier: 1.2,
            position_size_pct: 25.0,
            signal_cooldown_mins: 60,
        }
    }
}

/// Strongly-typed parameters, one record per strategy kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyParams {
    Momentum(MomentumParams),
    Dca(DcaParams),
    Staking(StakingParams),
    ChannelIndex(ChannelParams),
}

impl StrategyParams {
    pub fn kind(&self) -> StrategyKind {
        match self {
            StrategyParams::Momentum(_) => StrategyKind::Momentum,
            StrategyParams::Dca(_) => StrategyKind::Dca,
            StrategyParams::Staking(_) => StrategyKind::Staking,
            StrategyParams::ChannelIndex(_) => StrategyKind::ChannelIndex,
        }
    }

    pub fn default_for(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::Momentum => StrategyParams::Momentum(MomentumParams::default()),
            StrategyKind::Dca => StrategyParams::Dca(DcaParams::default()),
            StrategyKind::Staking => StrategyParams::Staking(StakingParams::default()),
            StrategyKind::ChannelIndex => StrategyParams::ChannelIndex(ChannelParams::default()),
        }
    }
}

fn default_max_position_pct() -> f64 {
    20.0
}

fn default_dca_cooldown_mins() -> i64 {
    24 * 60
}

/// Configuration for one strategy instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub id: String,

    /// Capital the strategy may deploy, in USD
    pub allocation_capital: Decimal,

    /// Exit when a position loses this much (percent)
    pub stop_loss_pct: f64,

    /// Exit when a position gains this much (percent)
    #[serde(default)]
    pub take_profit_pct: Option<f64>,

    pub max_positions: usize,

    /// Largest holding in one symbol, as a percent of allocation capital
    #[serde(default = "default_max_position_pct")]
    pub max_position_pct: f64,

    #[serde(default)]
    pub risk_profile: RiskProfile,

    pub enabled_symbols: Vec<String>,

    pub params: StrategyParams,
}

impl StrategyConfig {
    /// Default configuration for a strategy kind.
    pub fn default_for(kind: StrategyKind) -> Self {
        let (stop_loss_pct, take_profit_pct, max_positions, symbols): (f64, Option<f64>, usize, &[&str]) =
            match kind {
                StrategyKind::Momentum => (10.0, Some(25.0), 3, &["BTC", "ETH", "SOL", "ADA"]),
                StrategyKind::Dca => (15.0, Some(50.0), 2, &["BTC", "ETH"]),
                StrategyKind::Staking => (15.0, None, 5, &["ETH", "SOL", "ADA", "DOT"]),
                StrategyKind::ChannelIndex => (5.0, Some(10.0), 3, &["BTC", "ETH", "SOL"]),
            };

        Self {
            id: format!("{}-default", kind.as_str()),
            allocation_capital: dec!(10000),
            stop_loss_pct,
            take_profit_pct,
            max_positions,
            max_position_pct: default_max_position_pct(),
            risk_profile: RiskProfile::Moderate,
            enabled_symbols: symbols.iter().map(|s| s.to_string()).collect(),
            params: StrategyParams::default_for(kind),
        }
    }

    pub fn kind(&self) -> StrategyKind {
        self.params.kind()
    }

    pub fn is_enabled(&self, symbol: &str) -> bool {
        self.enabled_symbols.iter().any(|s| s == symbol)
    }

    /// Reject configurations that cannot be instantiated.
    pub fn validate(&self) -> Result<()> {
        if self.allocation_capital <= Decimal::ZERO {
            return Err(EngineError::config(format!(
                "{}: allocation capital must be positive, got {}",
                self.id, self.allocation_capital
            )));
        }
        if !(self.stop_loss_pct > 0.0 && self.stop_loss_pct <= 100.0) {
            return Err(EngineError::config(format!(
                "{}: stop loss must be in (0, 100], got {}",
                self.id, self.stop_loss_pct
            )));
        }
        if let Some(tp) = self.take_profit_pct {
            if !(tp > 0.0 && tp.is_finite()) {
                return Err(EngineError::config(format!(
                    "{}: take profit must be positive, got {}",
                    self.id, tp
                )));
            }
        }
        if self.max_positions < 1 {
            return Err(EngineError::config(format!("{}: max positions must be at least 1", self.id)));
        }
        if !(self.max_position_pct > 0.0 && self.max_position_pct <= 100.0) {
            return Err(EngineError::config(format!(
                "{}: max position size must be in (0, 100], got {}",
                self.id, self.max_position_pct
            )));
        }
        if self.enabled_symbols.is_empty() {
            return Err(EngineError::config(format!("{}: no enabled symbols", self.id)));
        }

        match &self.params {
            StrategyParams::Momentum(p) => {
                if p.rebalance_interval_mins < 0 || p.history_limit < 25 {
                    return Err(EngineError::config(format!(
                        "{}: momentum needs a non-negative interval and at least 25 points of history",
                        self.id
                    )));
                }
            }
            StrategyParams::Dca(p) => {
                if p.signal_cooldown_mins < 0 {
                    return Err(EngineError::config(format!("{}: DCA cooldown cannot be negative", self.id)));
                }
                if p.base_amount <= Decimal::ZERO {
                    return Err(EngineError::config(format!("{}: DCA base amount must be positive", self.id)));
                }
                if let DcaFrequency::CustomHours { hours: 0 } = p.frequency {
                    return Err(EngineError::config(format!("{}: custom DCA cadence must be at least one hour", self.id)));
                }
                if let (Some(start), Some(end)) = (p.start_at, p.end_at) {
                    if end <= start {
                        return Err(EngineError::config(format!("{}: DCA schedule ends before it starts", self.id)));
                    }
                }
            }
            StrategyParams::Staking(p) => {
                if !(p.max_allocation_pct > 0.0 && p.max_allocation_pct <= 100.0) {
                    return Err(EngineError::config(format!("{}: staking allocation cap must be in (0, 100]", self.id)));
                }
                for opp in &p.opportunities {
                    if opp.apy < 0.0 || opp.fee_pct < 0.0 || opp.fee_pct > 100.0 || opp.min_stake > opp.max_stake {
                        return Err(EngineError::config(format!(
                            "{}: invalid staking opportunity {}",
                            self.id,
                            opp.key()
                        )));
                    }
                }
            }
            StrategyParams::ChannelIndex(p) => {
                if p.period < 2 || p.smoothing < 1 || p.confirmation_window < 2 {
                    return Err(EngineError::config(format!(
                        "{}: channel index needs period >= 2, smoothing >= 1, confirmation window >= 2",
                        self.id
                    )));
                }
                if p.oversold >= p.overbought || p.extreme_oversold > p.oversold || p.extreme_overbought < p.overbought {
                    return Err(EngineError::config(format!("{}: channel thresholds are out of order", self.id)));
                }
                if !(p.position_size_pct > 0.0 && p.position_size_pct <= 100.0) {
                    return Err(EngineError::config(format!("{}: position size must be in (0, 100]", self.id)));
                }
            }
        }

        Ok(())
    }
}
