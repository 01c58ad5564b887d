//! Binary entry point for world-memory.
//!
//! An admin CLI over the memory engine: inspect a world database, search it,
//! run consistency checks and summaries, and move worlds between databases.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// CLI output goes to stdout/stderr.
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::multiple_crate_versions)]

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use world_memory::config::MemoryConfig;
use world_memory::observability;

/// World Memory - persistent world knowledge for long-running narratives.
#[derive(Parser)]
#[command(name = "world-memory")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, global = true, env = "WORLD_MEMORY_CONFIG")]
    config: Option<PathBuf>,

    /// `SQLite` database path (overrides the config file).
    #[arg(long, global = true, env = "WORLD_MEMORY_DB")]
    db: Option<PathBuf>,

    /// Emit machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Show entity counts, cache and index figures.
    Stats {
        /// Restrict to one session.
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Search entities by meaning, falling back to keywords.
    Search {
        /// Free-text query.
        query: String,

        /// Restrict to one session.
        #[arg(short, long)]
        session: Option<String>,

        /// Restrict to entity types (comma-separated).
        #[arg(short = 't', long)]
        types: Option<String>,

        /// Maximum number of results.
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Print a session timeline, oldest first.
    Timeline {
        /// Session id.
        session: String,

        /// Earliest creation time (RFC 3339).
        #[arg(long)]
        from: Option<String>,

        /// Latest creation time (RFC 3339).
        #[arg(long)]
        to: Option<String>,
    },

    /// Print the relationship network around an entity.
    Network {
        /// Root entity id.
        entity: String,

        /// Traversal depth (capped by configuration).
        #[arg(short, long, default_value = "2")]
        depth: usize,
    },

    /// Run consistency checks over a session.
    Check {
        /// Session id.
        session: String,

        /// Exit non-zero if any issue reaches this severity.
        #[arg(long)]
        fail_on: Option<String>,
    },

    /// Summarize a session and store the summary.
    Summarize {
        /// Session id.
        session: String,

        /// Strategy: time_based, importance_based, relevance_based or hybrid.
        #[arg(long)]
        strategy: Option<String>,

        /// Format: text, structured, timeline or bullet_points.
        #[arg(short, long)]
        format: Option<String>,

        /// Focus passed to the generator.
        #[arg(long)]
        context: Option<String>,

        /// Only summarize if the session crossed the compaction thresholds.
        #[arg(long)]
        compact: bool,
    },

    /// Write a world snapshot as JSON.
    Export {
        /// Output file. Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Restrict to one session.
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Load a world snapshot written by `export`.
    Import {
        /// Snapshot file.
        file: PathBuf,
    },
}

fn main() -> ExitCode {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };

    let _observability = match observability::init(&config.logging) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to initialize observability: {e}");
            return ExitCode::FAILURE;
        },
    };

    match run_command(cli, &config) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
fn run_command(cli: Cli, config: &MemoryConfig) -> anyhow::Result<ExitCode> {
    let memory = world_memory::MemoryFacade::from_config(config)?;
    let json = cli.json;

    match cli.command {
        Commands::Stats { session } => commands::cmd_stats(&memory, session.as_deref(), json),
        Commands::Search {
            query,
            session,
            types,
            limit,
        } => commands::cmd_search(&memory, &query, session, types, limit, json),
        Commands::Timeline { session, from, to } => {
            commands::cmd_timeline(&memory, &session, from, to, json)
        },
        Commands::Network { entity, depth } => commands::cmd_network(&memory, &entity, depth, json),
        Commands::Check { session, fail_on } => {
            commands::cmd_check(&memory, &session, fail_on, json)
        },
        Commands::Summarize {
            session,
            strategy,
            format,
            context,
            compact,
        } => commands::cmd_summarize(
            &memory,
            &session,
            commands::SummarizeArgs {
                strategy,
                format,
                context,
                compact,
            },
            json,
        ),
        Commands::Export { output, session } => {
            commands::cmd_export(&memory, output, session.as_deref())
        },
        Commands::Import { file } => commands::cmd_import(&memory, &file, json),
    }
}

/// Loads configuration: explicit file, else the default location, then
/// environment overrides, then command-line flags.
fn load_config(cli: &Cli) -> world_memory::Result<MemoryConfig> {
    let mut config = match &cli.config {
        Some(path) => MemoryConfig::load_from_file(path)?.with_env_overrides(),
        None => MemoryConfig::load_default(),
    };
    if let Some(db) = &cli.db {
        config = config.with_db_path(db);
    }
    config.validate()?;
    Ok(config)
}
