//! Output module for run summaries and reports
//!
//! This module handles:
//! - Per-target outcomes and the end-of-run summary
//! - Printing the summary to stdout
//! - Writing a Markdown report

mod markdown;
pub mod stats;

pub use markdown::{generate_markdown_summary, write_markdown_summary};
pub use stats::{print_summary, recommendations, RunSummary, TargetOutcome, TargetStatus};
