//! Markdown summary generation
//!
//! This module renders the end-of-run summary as a Markdown report: run
//! information, request counters, control-loop state, cache statistics and a
//! per-target table.

use crate::output::stats::{RunSummary, TargetStatus};
use chrono::Utc;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Writes the Markdown summary to `output_path`
///
/// # Arguments
///
/// * `summary` - The run summary
/// * `output_path` - Path where the markdown file should be written
///
/// # Returns
///
/// * `Ok(())` - Successfully wrote markdown summary
/// * `Err(std::io::Error)` - Failed to create or write the file
pub fn write_markdown_summary(summary: &RunSummary, output_path: &Path) -> std::io::Result<()> {
    let markdown = generate_markdown_summary(summary);

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;

    Ok(())
}

/// Formats a run summary as markdown
pub fn generate_markdown_summary(summary: &RunSummary) -> String {
    let metrics = &summary.control.metrics;
    let control = &summary.control;
    let mut md = String::new();

    md.push_str("# Prompt-Harvest Run Summary\n\n");

    // Run metadata
    md.push_str("## Run Information\n\n");
    md.push_str(&format!(
        "- **Started**: {}\n",
        summary.started_at.to_rfc3339()
    ));
    md.push_str(&format!(
        "- **Duration**: {:.1} seconds ({:.2} minutes)\n",
        summary.duration_secs,
        summary.duration_secs / 60.0
    ));
    md.push_str(&format!(
        "- **Interrupted**: {}\n",
        if summary.interrupted { "yes" } else { "no" }
    ));
    if let Some(hash) = &summary.config_hash {
        md.push_str(&format!("- **Config Hash**: {}\n", hash));
    }
    md.push('\n');

    // Targets
    md.push_str("## Targets\n\n");
    md.push_str(&format!("- **Configured**: {}\n", summary.targets.len()));
    md.push_str(&format!(
        "- **Harvested**: {}\n",
        summary.count(TargetStatus::Harvested)
    ));
    md.push_str(&format!(
        "- **From Cache**: {}\n",
        summary.count(TargetStatus::Cached)
    ));
    md.push_str(&format!(
        "- **Failed**: {}\n",
        summary.count(TargetStatus::Failed)
    ));
    md.push_str(&format!(
        "- **Skipped**: {}\n",
        summary.count(TargetStatus::Skipped)
    ));
    md.push_str(&format!("- **Items**: {}\n\n", summary.total_items()));

    if !summary.targets.is_empty() {
        md.push_str("| # | Category | Status | Attempts | Items | Time (s) | Error |\n");
        md.push_str("|---|----------|--------|----------|-------|----------|-------|\n");
        for target in &summary.targets {
            md.push_str(&format!(
                "| {} | [{}]({}) | {} | {} | {} | {:.2} | {} |\n",
                target.index + 1,
                escape_cell(&target.category),
                target.url,
                target.status,
                target.attempts,
                target.items,
                target.elapsed_secs,
                target.error.as_deref().map(escape_cell).unwrap_or_default()
            ));
        }
        md.push('\n');
    }

    // Requests
    md.push_str("## Requests\n\n");
    md.push_str(&format!("- **Total**: {}\n", metrics.total_requests));
    md.push_str(&format!(
        "- **Successful**: {}\n",
        metrics.successful_requests
    ));
    md.push_str(&format!("- **Failed**: {}\n", metrics.failed_requests));
    md.push_str(&format!(
        "- **Success Rate**: {:.2}%\n",
        metrics.success_rate * 100.0
    ));
    if let Some(avg) = metrics.avg_response_time_secs {
        md.push_str(&format!("- **Average Response Time**: {:.2}s\n", avg));
    }
    if let Some(memory) = metrics.memory_mb {
        md.push_str(&format!("- **Memory**: {:.0} MB\n", memory));
    }
    if let Some(cpu) = metrics.cpu_percent {
        md.push_str(&format!("- **CPU Load**: {:.1}%\n", cpu));
    }
    md.push('\n');

    // Control loop
    md.push_str("## Control Loop\n\n");
    md.push_str(&format!("- **Final Health**: {}\n", metrics.status));
    md.push_str(&format!(
        "- **Circuit Breaker**: {} ({} failures)\n",
        control.breaker_state, control.breaker_failures
    ));
    md.push_str(&format!(
        "- **Delay Multiplier**: {:.2} ({} adaptations)\n",
        control.delay_multiplier, control.adaptations
    ));
    md.push_str(&format!("- **Status Factor**: {:.1}x\n", control.status_factor));
    md.push_str(&format!(
        "- **Current Delay**: {:.2}s\n",
        control.current_delay_secs
    ));
    md.push_str(&format!("- **Alerts Raised**: {}\n\n", control.alert_count));

    if !control.alerts_by_kind.is_empty() {
        md.push_str("| Alert | Count |\n");
        md.push_str("|-------|-------|\n");
        for (kind, count) in &control.alerts_by_kind {
            md.push_str(&format!("| {} | {} |\n", kind, count));
        }
        md.push('\n');
    }

    if !control.blocked_periods.is_empty() {
        let now = Utc::now();
        md.push_str("### Blocked Periods\n\n");
        for period in &control.blocked_periods {
            let end = period
                .ended_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "still blocked".to_string());
            md.push_str(&format!(
                "- {} to {} ({}s)\n",
                period.started_at.to_rfc3339(),
                end,
                period.duration(now).num_seconds()
            ));
        }
        md.push('\n');
    }

    // Cache
    let cache = &control.cache;
    md.push_str("## Cache\n\n");
    md.push_str(&format!("- **Mode**: {:?}\n", cache.mode));
    if let Some(backend) = &cache.backend {
        md.push_str(&format!("- **Backend**: `{}`\n", backend));
    }
    md.push_str(&format!(
        "- **Entries**: {} ({} fresh)\n",
        cache.entries, cache.fresh_entries
    ));
    md.push_str(&format!(
        "- **Hits / Misses**: {} / {}\n\n",
        cache.hits, cache.misses
    ));

    if !summary.recommendations.is_empty() {
        md.push_str("## Recommendations\n\n");
        for rec in &summary.recommendations {
            md.push_str(&format!("- {}\n", rec));
        }
        md.push('\n');
    }

    md.push_str("---\n\n");
    md.push_str(&format!(
        "*Generated by Prompt-Harvest at {}*\n",
        Utc::now().to_rfc3339()
    ));

    md
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}
