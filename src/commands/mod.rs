//! Command handlers.
//!
//! - `query.rs`: read-only views (stats, search, timeline, network)
//! - `maintenance.rs`: consistency checks and summaries
//! - `io.rs`: snapshot export and import

mod io;
mod maintenance;
mod query;

pub use io::{cmd_export, cmd_import};
pub use maintenance::{SummarizeArgs, cmd_check, cmd_summarize};
pub use query::{cmd_network, cmd_search, cmd_stats, cmd_timeline};

use anyhow::Context;
use serde::Serialize;

/// Prints a value as pretty JSON.
fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(value).context("serializing output")?;
    println!("{text}");
    Ok(())
}
