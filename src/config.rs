//! Engine configuration: strategies, risk limits and scenario settings.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::backtest::ScenarioSettings;
use crate::models::{StrategyConfig, StrategyKind};
use crate::risk::RiskLimits;

/// Everything the engine and harness need, loadable from a JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Capital for the whole book, in USD; strategy allocations must fit inside it
    pub initial_capital: Decimal,

    /// Seed for scenario generation
    pub seed: u64,

    #[serde(default)]
    pub risk_limits: RiskLimits,

    pub strategies: Vec<StrategyConfig>,

    #[serde(default)]
    pub scenario: ScenarioSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_capital: dec!(40000),
            seed: 42,
            risk_limits: RiskLimits::default(),
            strategies: StrategyKind::ALL
                .into_iter()
                .map(StrategyConfig::default_for)
                .collect(),
            scenario: ScenarioSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Read a JSON config from `path`, or fall back to defaults. The result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                let config: EngineConfig = serde_json::from_str(&raw)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))?;
                info!(path = %path.display(), strategies = config.strategies.len(), "Loaded config");
                config
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.initial_capital <= Decimal::ZERO {
            anyhow::bail!("initial capital must be positive, got {}", self.initial_capital);
        }
        if self.strategies.is_empty() {
            anyhow::bail!("at least one strategy must be configured");
        }
        self.risk_limits.validate().context("Invalid risk limits")?;
        self.scenario.validate().context("Invalid scenario settings")?;
        for strategy in &self.strategies {
            strategy
                .validate()
                .with_context(|| format!("Invalid strategy config {}", strategy.id))?;
        }

        let mut ids: Vec<&str> = self.strategies.iter().map(|s| s.id.as_str()).collect();
        ids.sort_unstable();
        if let Some(dup) = ids.windows(2).find(|w| w[0] == w[1]) {
            anyhow::bail!("duplicate strategy id {}", dup[0]);
        }

        let allocated: Decimal = self.strategies.iter().map(|s| s.allocation_capital).sum();
        if allocated > self.initial_capital {
            anyhow::bail!(
                "strategies allocate {} but initial capital is {}",
                allocated,
                self.initial_capital
            );
        }
        Ok(())
    }

    pub fn to_pretty_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize config")
    }
}
