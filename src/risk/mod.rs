//! Risk layer: limits, market-condition analysis, signal validation and parameter optimization.

pub mod conditions;
mod limits;
mod manager;
mod optimizer;

pub use conditions::{
    analyze_market_conditions, MarketCondition, MarketTrend, Sentiment, VolatilityLevel, VolumeLevel,
};
pub use limits::RiskLimits;
pub use manager::{
    return_correlation, RiskManager, SignalValidation, MIN_CORRELATION_SAMPLES,
    PERFORMANCE_HISTORY_LIMIT,
};
pub use optimizer::{optimize_algorithm, OptimizationResult};
