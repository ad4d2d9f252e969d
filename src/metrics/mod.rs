//! Portfolio statistics shared by the risk manager and the backtest harness.

mod calculator;

pub use calculator::{MetricsCalculator, DEFAULT_RISK_FREE_RATE};
