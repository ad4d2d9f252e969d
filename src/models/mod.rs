//! Data models for observations, signals, configuration, positions and metrics.

mod config;
mod metrics;
mod observation;
mod position;
mod signal;

pub use config::{
    ChannelParams, Compounding, DcaFrequency, DcaParams, MomentumParams, RiskProfile,
    StakingOpportunity, StakingParams, StrategyConfig, StrategyKind, StrategyParams, Tier,
};
pub use metrics::{PerformanceHistoryPoint, PerformanceMetrics, PerformanceSummary, RiskMetrics};
pub use observation::MarketObservation;
pub use position::{Position, PositionExtension, Purchase, StakingStatus, QUANTITY_EPSILON};
pub use signal::{position_key, RiskLevel, SignalAction, TradingSignal};
