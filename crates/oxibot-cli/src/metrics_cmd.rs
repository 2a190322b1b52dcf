//! `oxibot metrics` — inspect and manage recorded usage metrics.
//!
//! Replaces nanobot's `metrics` subcommands:
//! - `oxibot metrics summary [--hours H]` — overview of gateway activity
//! - `oxibot metrics tools [--hours H]` — per-tool call stats
//! - `oxibot metrics sessions [--last N]` — recent session summaries
//! - `oxibot metrics models [--hours H]` — per-model usage stats
//! - `oxibot metrics reset [--yes]` — delete all recorded events

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use oxibot_metrics::{report, MetricsCollector};

const DEFAULT_HOURS: i64 = 24;
const DEFAULT_LAST_N: usize = 20;

/// Metrics subcommands.
#[derive(Subcommand)]
pub enum MetricsCommands {
    /// Overview of gateway activity
    Summary {
        /// Look back this many hours
        #[arg(long, default_value_t = DEFAULT_HOURS)]
        hours: i64,
    },

    /// Per-tool call stats
    Tools {
        /// Look back this many hours
        #[arg(long, default_value_t = DEFAULT_HOURS)]
        hours: i64,
    },

    /// Recent session summaries
    Sessions {
        /// Show the last N sessions
        #[arg(long, default_value_t = DEFAULT_LAST_N)]
        last: usize,
    },

    /// Per-model usage stats
    Models {
        /// Look back this many hours
        #[arg(long, default_value_t = 168)]
        hours: i64,
    },

    /// Delete all recorded metrics events
    Reset {
        /// Skip the confirmation prompt
        #[arg(short, long, default_value_t = false)]
        yes: bool,
    },
}

/// Dispatch a metrics subcommand.
pub async fn dispatch(cmd: MetricsCommands) -> Result<()> {
    match cmd {
        MetricsCommands::Summary { hours } => summary(hours).await,
        MetricsCommands::Tools { hours } => tools(hours).await,
        MetricsCommands::Sessions { last } => sessions(last).await,
        MetricsCommands::Models { hours } => models(hours).await,
        MetricsCommands::Reset { yes } => reset(yes).await,
    }
}

fn make_collector() -> MetricsCollector {
    let config = oxibot_core::config::load_config(None);
    MetricsCollector::new(
        config.metrics.dir.as_deref().map(crate::helpers::expand_tilde),
        true, // CLI reads/resets regardless of the `enabled` flag gating live recording
    )
}

async fn summary(hours: i64) -> Result<()> {
    let collector = make_collector();
    let report = report::summary_report(&collector, hours).await;

    println!();
    println!("{}", format!("  Activity summary (last {hours}h)").cyan().bold());
    println!();
    println!(
        "  Sessions:    {} ({:.0}% success, {:.1} avg iterations)",
        report.overview.total_sessions,
        report.overview.success_rate * 100.0,
        report.overview.avg_iterations_per_session
    );
    println!(
        "  Tokens:      {} total ({} prompt, {} completion, {:.0} avg/session)",
        report.tokens.total, report.tokens.total_prompt, report.tokens.total_completion, report.tokens.avg_per_session
    );
    println!(
        "  Tool calls:  {} ({:.0}% success)",
        report.tools.total_calls,
        report.tools.success_rate * 100.0
    );
    println!("  LLM calls:   {}", report.llm_calls);
    println!();
    Ok(())
}

async fn tools(hours: i64) -> Result<()> {
    let collector = make_collector();
    let entries = report::tool_report(&collector, hours).await;

    if entries.is_empty() {
        println!("  No tool calls recorded in the last {hours}h.");
        return Ok(());
    }

    println!();
    println!("{}", format!("  Tool usage (last {hours}h)").cyan().bold());
    println!();
    println!(
        "  {:<14} {:>8} {:>10} {:>12}",
        "Tool".bold(),
        "Calls".bold(),
        "Success".bold(),
        "Avg ms".bold(),
    );
    println!("  {}", "─".repeat(48));
    for e in &entries {
        println!(
            "  {:<14} {:>8} {:>9.0}% {:>12.0}",
            e.tool,
            e.calls,
            e.success_rate * 100.0,
            e.avg_latency_ms
        );
        for (err, count) in &e.top_errors {
            println!("      {} {} ({}x)", "↳".dimmed(), err.dimmed(), count);
        }
    }
    println!();
    Ok(())
}

async fn sessions(last: usize) -> Result<()> {
    let collector = make_collector();
    let entries = report::session_report(&collector, last).await;

    if entries.is_empty() {
        println!("  No sessions recorded.");
        return Ok(());
    }

    println!();
    println!("{}", format!("  Last {} sessions", entries.len()).cyan().bold());
    println!();
    for s in &entries {
        let status = if s.success { "ok".green().to_string() } else { "failed".red().to_string() };
        println!(
            "  {:<24} {:<8} {:<7} iters={:<3} tools={:<3} tokens={}",
            s.session_id, s.channel, status, s.total_iterations, s.total_tool_calls, s.total_tokens
        );
        if let Some(reason) = &s.failure_reason {
            println!("      {} {}", "↳".dimmed(), reason.dimmed());
        }
    }
    println!();
    Ok(())
}

async fn models(hours: i64) -> Result<()> {
    let collector = make_collector();
    let entries = report::model_report(&collector, hours).await;

    if entries.is_empty() {
        println!("  No sessions recorded in the last {hours}h.");
        return Ok(());
    }

    println!();
    println!("{}", format!("  Model usage (last {hours}h)").cyan().bold());
    println!();
    println!(
        "  {:<28} {:>8} {:>10} {:>12}",
        "Model".bold(),
        "Sessions".bold(),
        "Success".bold(),
        "Tokens".bold(),
    );
    println!("  {}", "─".repeat(62));
    for e in &entries {
        println!(
            "  {:<28} {:>8} {:>9.0}% {:>12}",
            e.model,
            e.sessions,
            e.success_rate * 100.0,
            e.total_tokens
        );
    }
    println!();
    Ok(())
}

async fn reset(yes: bool) -> Result<()> {
    if !yes {
        print!("  This will delete all recorded metrics events. Continue? [y/N] ");
        use std::io::Write;
        std::io::stdout().flush().ok();
        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !matches!(input.trim().to_lowercase().as_str(), "y" | "yes") {
            println!("  Aborted.");
            return Ok(());
        }
    }

    let collector = make_collector();
    collector.reset().await;
    println!("  {} Metrics reset.", "✓".green());
    Ok(())
}
