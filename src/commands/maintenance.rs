//! Consistency and summarization command handlers.

use super::print_json;
use anyhow::Context;
use std::process::ExitCode;
use world_memory::models::{IssueSeverity, SummaryFormat, SummaryStrategy};
use world_memory::services::{SummaryOptions, ensure_consistent};
use world_memory::MemoryFacade;

/// Check command.
///
/// Exits with failure when `fail_on` is given and an issue at or above that
/// severity was found.
pub fn cmd_check(
    memory: &MemoryFacade,
    session: &str,
    fail_on: Option<String>,
    json: bool,
) -> anyhow::Result<ExitCode> {
    let threshold = fail_on
        .as_deref()
        .map(|s| IssueSeverity::parse(s).with_context(|| format!("unknown severity '{s}'")))
        .transpose()?;
    let issues = memory.check_session(session)?;

    if json {
        print_json(&issues)?;
    } else if issues.is_empty() {
        println!("No consistency issues found.");
    } else {
        for issue in &issues {
            println!(
                "[{}] {} {}",
                issue.severity,
                issue.issue_type.as_str(),
                issue.description
            );
            for fix in &issue.suggested_fixes {
                println!("    fix: {fix}");
            }
        }
    }

    if let Some(threshold) = threshold {
        if let Err(e) = ensure_consistent(&issues, threshold) {
            eprintln!("{e}");
            return Ok(ExitCode::FAILURE);
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Options for the summarize command.
pub struct SummarizeArgs {
    /// Strategy name.
    pub strategy: Option<String>,
    /// Format name.
    pub format: Option<String>,
    /// Generator focus.
    pub context: Option<String>,
    /// Gate on the compaction thresholds.
    pub compact: bool,
}

/// Summarize command.
pub fn cmd_summarize(
    memory: &MemoryFacade,
    session: &str,
    args: SummarizeArgs,
    json: bool,
) -> anyhow::Result<ExitCode> {
    let summary = if args.compact {
        memory.compact(session)?
    } else {
        let mut options = SummaryOptions::default();
        if let Some(s) = args.strategy.as_deref() {
            options = options.with_strategy(
                SummaryStrategy::parse(s).with_context(|| format!("unknown strategy '{s}'"))?,
            );
        }
        if let Some(f) = args.format.as_deref() {
            options = options
                .with_format(SummaryFormat::parse(f).with_context(|| format!("unknown format '{f}'"))?);
        }
        if let Some(context) = args.context {
            options = options.with_context(context);
        }
        memory.summarize_with(session, None, &options)?
    };

    match summary {
        Some(summary) if json => print_json(&summary)?,
        Some(summary) => {
            println!(
                "Summary {} (v{}, {} entities, {})",
                summary.id,
                summary.version,
                summary.original_entity_ids.len(),
                summary.generated_by.as_str()
            );
            println!();
            println!("{}", summary.summary_text);
        },
        None => println!("Nothing to summarize."),
    }
    Ok(ExitCode::SUCCESS)
}
