//! Import and export command handlers.

use anyhow::Context;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use world_memory::MemoryFacade;
use world_memory::models::WorldSnapshot;

/// Executes the export command.
pub fn cmd_export(
    memory: &MemoryFacade,
    output: Option<PathBuf>,
    session: Option<&str>,
) -> anyhow::Result<ExitCode> {
    let snapshot = memory.export(session)?;
    match output {
        Some(path) => {
            let file = File::create(&path)
                .with_context(|| format!("creating {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &snapshot).context("writing snapshot")?;
            writer.flush()?;
            eprintln!(
                "Exported {} entities and {} relations to {}",
                snapshot.entities.len(),
                snapshot.relations.len(),
                path.display()
            );
        },
        None => super::print_json(&snapshot)?,
    }
    Ok(ExitCode::SUCCESS)
}

/// Executes the import command.
pub fn cmd_import(memory: &MemoryFacade, file: &Path, json: bool) -> anyhow::Result<ExitCode> {
    let reader = BufReader::new(
        File::open(file).with_context(|| format!("opening {}", file.display()))?,
    );
    let snapshot: WorldSnapshot = serde_json::from_reader(reader)
        .with_context(|| format!("parsing snapshot {}", file.display()))?;
    let stats = memory.import(&snapshot)?;

    if json {
        super::print_json(&stats)?;
    } else {
        println!(
            "Imported {} entities, {} relations, {} facts, {} plotlines, {} summaries ({} indexed)",
            stats.entities,
            stats.relations,
            stats.facts,
            stats.plotlines,
            stats.summaries,
            stats.indexed
        );
    }
    Ok(ExitCode::SUCCESS)
}
