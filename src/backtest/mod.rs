//! Deterministic backtesting: synthetic scenarios, simulation, scoring and reporting.

mod edge_cases;
mod harness;
mod report;
pub mod scenarios;
mod scoring;

pub use edge_cases::{run_edge_case, EdgeCase, EdgeCaseResult, STORM_SIGNAL_LIMIT};
pub use harness::{BacktestHarness, ScenarioAnalysis};
pub use report::{render_edge_cases, render_report};
pub use scenarios::{generate, Scenario, ScenarioData, ScenarioSettings, ScenarioTick};
pub use scoring::{score_result, Assessment, ExecutedTrade, TestResult, MAX_PASSING_ISSUES, PASS_SCORE};
