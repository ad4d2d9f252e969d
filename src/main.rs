//! Strategy engine CLI
//!
//! Runs the scenario backtester, the edge-case suite, market analysis and the
//! parameter optimizer against the configured strategies.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use strategy_engine::backtest::{render_edge_cases, render_report, BacktestHarness, Scenario};
use strategy_engine::models::StrategyKind;
use strategy_engine::EngineConfig;

/// Strategy-signal and risk-evaluation engine.
#[derive(Parser)]
#[command(name = "stratengine")]
#[command(about = "Backtest trading strategies against synthetic market scenarios", long_about = None)]
struct Cli {
    /// JSON configuration file (defaults are used when omitted)
    #[arg(short, long, env = "STRATENGINE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the scenario seed
    #[arg(long, env = "STRATENGINE_SEED")]
    seed: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", env = "STRATENGINE_LOG")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run strategies through market scenarios
    Backtest {
        /// Only this scenario (bull, volatile_bull, bear, crash, sideways, volatile_sideways, flash_crash_recovery, low_liquidity)
        #[arg(short, long)]
        scenario: Option<String>,

        /// Only this strategy kind (momentum, dca, staking, channel_index)
        #[arg(long)]
        strategy: Option<String>,

        /// Run (scenario, strategy) pairs on parallel workers
        #[arg(long)]
        parallel: bool,

        /// Print results as JSON instead of the report
        #[arg(long)]
        json: bool,
    },

    /// Run the edge-case suite
    EdgeCases {
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Classify market conditions and end-of-run risk for a scenario
    Analyze {
        #[arg(short, long)]
        scenario: String,
    },

    /// Propose parameter adjustments for a strategy under a scenario
    Optimize {
        #[arg(long)]
        strategy: String,

        #[arg(short, long)]
        scenario: String,
    },

    /// Show the effective configuration
    Config,
}

fn parse_scenarios(name: Option<&str>) -> Result<Vec<Scenario>> {
    match name {
        Some(name) => Ok(vec![name.parse::<Scenario>()?]),
        None => Ok(Scenario::ALL.to_vec()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = EngineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(seed) = cli.seed {
        config = config.with_seed(seed);
    }

    match cli.command {
        Commands::Backtest {
            scenario,
            strategy,
            parallel,
            json,
        } => {
            let scenarios = parse_scenarios(scenario.as_deref())?;
            let mut harness = BacktestHarness::from_config(&config);
            if let Some(kind) = strategy {
                let kind: StrategyKind = kind.parse()?;
                harness = harness.only(kind);
                if harness.strategies().is_empty() {
                    anyhow::bail!("no {} strategy configured", kind);
                }
            }

            info!(
                scenarios = scenarios.len(),
                strategies = harness.strategies().len(),
                seed = config.seed,
                parallel,
                "Starting backtest"
            );

            let results = if parallel {
                let abort = Arc::new(AtomicBool::new(false));
                let flag = Arc::clone(&abort);
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        warn!("Interrupt received, finishing running scenarios");
                        flag.store(true, Ordering::Relaxed);
                    }
                });
                harness.run_parallel(&scenarios, abort).await
            } else {
                harness.run_all(&scenarios)
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                for result in results.iter().filter(|r| !r.passed) {
                    println!("{}", result);
                }
                println!("{}", render_report(&results));
            }

            let passed = results.iter().filter(|r| r.passed).count();
            info!(passed, total = results.len(), "Backtest complete");
        }

        Commands::EdgeCases { json } => {
            let harness = BacktestHarness::from_config(&config);
            let results = harness.run_edge_cases();
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                println!("{}", render_edge_cases(&results));
            }
        }

        Commands::Analyze { scenario } => {
            let scenario: Scenario = scenario.parse()?;
            let harness = BacktestHarness::from_config(&config);
            let analysis = harness.analyze(scenario)?;
            let c = &analysis.condition;

            println!("\n=== Scenario: {} ===", scenario);
            println!("{}", scenario.description());

            println!("\n--- Market Condition ---");
            println!("Trend:        {:?} (strength {:.0})", c.trend, c.strength);
            println!("Volatility:   {:?} ({:.2}%)", c.volatility, c.volatility_pct);
            println!("Volume:       {:?}", c.volume);
            println!("Sentiment:    {:?} (fear/greed {:.0})", c.sentiment, c.fear_greed);
            println!("Confidence:   {:.0}%", c.confidence);

            println!("\n--- Path Returns ---");
            for (symbol, ret) in &analysis.path_returns {
                println!("  {:<8} {:>8.2}%", symbol, ret);
            }

            println!("\n--- End-of-Run Risk ---");
            println!(
                "{:<22} {:>10} {:>9} {:>8} {:>8} {:>8}",
                "STRATEGY", "EXPOSURE", "DRAWDOWN", "VAR95", "CORR", "BETA"
            );
            println!("{}", "-".repeat(70));
            for (id, r) in &analysis.risk {
                let fmt_opt = |v: Option<f64>| v.map_or_else(|| "n/a".to_string(), |v| format!("{:.2}", v));
                println!(
                    "{:<22} {:>9.1}% {:>8.2}% {:>7.2}% {:>8} {:>8}",
                    id,
                    r.exposure_pct,
                    r.current_drawdown_pct,
                    r.var_95 * 100.0,
                    fmt_opt(r.correlation),
                    fmt_opt(r.beta)
                );
            }
        }

        Commands::Optimize { strategy, scenario } => {
            let kind: StrategyKind = strategy.parse()?;
            let scenario: Scenario = scenario.parse()?;
            let harness = BacktestHarness::from_config(&config);
            let result = harness.optimize(kind, scenario)?;

            println!("\n=== Optimization: {} under {} ===", kind, scenario);
            if result.changes.is_empty() {
                println!("No changes proposed.");
            } else {
                for change in &result.changes {
                    println!("  - {}", change);
                }
                println!("\nExpected Improvement: {:.1}%", result.expected_improvement_pct);
                println!("Risk Reduction:       {:.1}%", result.risk_reduction_pct);
                println!("Confidence:           {:.0}%", result.confidence);
                println!("\n{}", serde_json::to_string_pretty(&result.optimized)?);
            }
        }

        Commands::Config => {
            println!("{}", config.to_pretty_json()?);
        }
    }

    Ok(())
}
