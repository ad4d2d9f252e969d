//! Strategy-signal and risk-evaluation engine.
//!
//! Turns a stream of market observations into trading signals for four
//! strategies (momentum, DCA, staking yield, channel-index mean reversion),
//! gates every signal through a portfolio risk manager, and replays the whole
//! pipeline against deterministic synthetic scenarios.

pub mod backtest;
pub mod config;
pub mod error;
pub mod market;
pub mod metrics;
pub mod models;
pub mod risk;
pub mod strategies;

pub use config::EngineConfig;
pub use error::{EngineError, Result};
