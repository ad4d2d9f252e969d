//! Human-readable comparison report for suite results.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

use super::edge_cases::EdgeCaseResult;
use super::scoring::TestResult;

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let title = format!(" {} / {} ", self.scenario, self.strategy_id);
        writeln!(f, "\n{:=^60}", title)?;
        writeln!(
            f,
            "Result:      {} (score {:.0})",
            if self.passed { "PASSED" } else { "FAILED" },
            self.score
        )?;
        writeln!(f)?;
        let m = &self.performance_metrics;
        writeln!(f, "--- Returns ---")?;
        writeln!(f, "Total:       {:.2}%", m.total_return_pct)?;
        writeln!(f, "Annualized:  {:.2}%", m.annualized_return_pct)?;
        writeln!(f, "Volatility:  {:.2}%", m.volatility_pct)?;
        writeln!(f)?;
        writeln!(f, "--- Trades ---")?;
        writeln!(
            f,
            "Executed:    {} ({} signals, {} rejected)",
            self.trades.len(),
            self.signals_emitted,
            self.signals_rejected
        )?;
        writeln!(f, "Closed:      {} ({:.1}% winners)", m.total_trades, m.win_rate * 100.0)?;
        writeln!(f, "Avg Win:     ${:.2}", m.avg_win)?;
        writeln!(f, "Avg Loss:    ${:.2}", m.avg_loss)?;
        writeln!(f, "Profit Factor: {:.2}", m.profit_factor)?;
        writeln!(f)?;
        writeln!(f, "--- Risk Metrics ---")?;
        writeln!(f, "Max Drawdown: {:.2}%", m.max_drawdown_pct)?;
        writeln!(f, "Sharpe Ratio: {:.2}", m.sharpe_ratio)?;
        writeln!(f, "Sortino Ratio: {:.2}", m.sortino_ratio)?;
        writeln!(f, "Calmar Ratio: {:.2}", m.calmar_ratio)?;
        writeln!(f, "VaR 95:      {:.2}%", self.risk_metrics.var_95 * 100.0)?;
        if !self.issues.is_empty() {
            writeln!(f)?;
            writeln!(f, "--- Issues ---")?;
            for issue in &self.issues {
                writeln!(f, "- {}", issue)?;
            }
        }
        if !self.recommendations.is_empty() {
            writeln!(f)?;
            writeln!(f, "--- Recommendations ---")?;
            for rec in &self.recommendations {
                writeln!(f, "- {}", rec)?;
            }
        }
        writeln!(f, "{:=^60}", "")?;
        Ok(())
    }
}

#[derive(Default)]
struct StrategyAggregate {
    runs: usize,
    passed: usize,
    score_sum: f64,
    return_sum: f64,
    worst_drawdown: f64,
}

/// Per-scenario table plus per-strategy aggregates.
pub fn render_report(results: &[TestResult]) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail
    let _ = write_report(&mut out, results);
    out
}

fn write_report(out: &mut String, results: &[TestResult]) -> fmt::Result {
    writeln!(out, "\n{:=^78}", " STRATEGY COMPARISON ")?;
    writeln!(
        out,
        "{:<22} {:<22} {:>6} {:>9} {:>8} {:>7} {:>6}",
        "Scenario", "Strategy", "Score", "Return", "MaxDD", "Sharpe", "Pass"
    )?;
    writeln!(out, "{:-<78}", "")?;

    let mut aggregates: BTreeMap<&str, StrategyAggregate> = BTreeMap::new();
    for r in results {
        let m = &r.performance_metrics;
        writeln!(
            out,
            "{:<22} {:<22} {:>6.0} {:>8.2}% {:>7.2}% {:>7.2} {:>6}",
            r.scenario.as_str(),
            r.strategy_id,
            r.score,
            m.total_return_pct,
            m.max_drawdown_pct,
            m.sharpe_ratio,
            if r.passed { "yes" } else { "no" }
        )?;

        let agg = aggregates.entry(r.strategy_id.as_str()).or_default();
        agg.runs += 1;
        agg.passed += usize::from(r.passed);
        agg.score_sum += r.score;
        agg.return_sum += m.total_return_pct;
        agg.worst_drawdown = agg.worst_drawdown.max(m.max_drawdown_pct);
    }

    writeln!(out)?;
    writeln!(out, "--- By Strategy ---")?;
    writeln!(
        out,
        "{:<22} {:>8} {:>10} {:>12} {:>10}",
        "Strategy", "Passed", "Avg Score", "Avg Return", "Worst DD"
    )?;
    for (id, agg) in &aggregates {
        let n = agg.runs.max(1) as f64;
        writeln!(
            out,
            "{:<22} {:>4}/{:<3} {:>10.1} {:>11.2}% {:>9.2}%",
            id,
            agg.passed,
            agg.runs,
            agg.score_sum / n,
            agg.return_sum / n,
            agg.worst_drawdown
        )?;
    }

    let failing: Vec<&TestResult> = results.iter().filter(|r| !r.issues.is_empty()).collect();
    if !failing.is_empty() {
        writeln!(out)?;
        writeln!(out, "--- Issues ---")?;
        for r in failing {
            for issue in &r.issues {
                writeln!(out, "[{} / {}] {}", r.scenario, r.strategy_id, issue)?;
            }
        }
    }
    writeln!(out, "{:=^78}", "")?;
    Ok(())
}

/// Pass/fail table for the edge-case suite.
pub fn render_edge_cases(results: &[EdgeCaseResult]) -> String {
    let mut out = String::new();
    let _ = write_edge_cases(&mut out, results);
    out
}

fn write_edge_cases(out: &mut String, results: &[EdgeCaseResult]) -> fmt::Result {
    writeln!(out, "\n{:=^60}", " EDGE CASES ")?;
    for r in results {
        writeln!(
            out,
            "{:<16} {:<22} {:>4} signals  {}",
            r.case.as_str(),
            r.strategy_id,
            r.signals,
            if r.passed { "ok" } else { "FAILED" }
        )?;
        for issue in &r.issues {
            writeln!(out, "    - {}", issue)?;
        }
    }
    let passed = results.iter().filter(|r| r.passed).count();
    writeln!(out, "{}/{} passed", passed, results.len())?;
    writeln!(out, "{:=^60}", "")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::scenarios::Scenario;

    #[test]
    fn test_report_aggregates_per_strategy() {
        let mut a = TestResult::failed(Scenario::Bull, "momentum-default", "boom");
        a.performance_metrics.max_drawdown_pct = 12.0;
        let mut b = TestResult::failed(Scenario::Crash, "momentum-default", "boom");
        b.passed = true;
        b.score = 80.0;
        b.issues.clear();

        let report = render_report(&[a, b]);
        assert!(report.contains("STRATEGY COMPARISON"));
        assert!(report.contains("crash"));
        assert!(report.contains("1/2"));
        assert!(report.contains("[bull / momentum-default] boom"));
        assert!(report.contains("12.00%"));
    }

    #[test]
    fn test_display_lists_issues() {
        let r = TestResult::failed(Scenario::Bear, "dca-default", "Lost 9.0% in a falling market");
        let text = r.to_string();
        assert!(text.contains("FAILED"));
        assert!(text.contains("--- Issues ---"));
        assert!(text.contains("Lost 9.0%"));
    }
}
