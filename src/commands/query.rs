//! Read-only command handlers.

use super::print_json;
use anyhow::{Context, bail};
use chrono::{DateTime, Utc};
use world_memory::storage::VectorFilter;
use world_memory::{EntityId, EntityType, MemoryFacade};

/// Stats command.
pub fn cmd_stats(
    memory: &MemoryFacade,
    session: Option<&str>,
    json: bool,
) -> anyhow::Result<std::process::ExitCode> {
    let stats = memory.stats(session)?;
    if json {
        print_json(&stats)?;
        return Ok(std::process::ExitCode::SUCCESS);
    }

    println!("World Memory Status");
    println!("===================");
    println!("Session: {}", session.unwrap_or("(all)"));
    println!("Entities: {}", stats.total_entities);
    let mut by_type: Vec<_> = stats.entities_by_type.iter().collect();
    by_type.sort_by_key(|(t, _)| t.as_str());
    for (entity_type, count) in by_type {
        println!("  {:<14} {count}", entity_type.as_str());
    }
    println!("Relations: {}", stats.relations);
    match stats.vector_points {
        Some(points) => println!("Vector points: {points}"),
        None => println!("Vector points: (index unavailable)"),
    }
    println!(
        "Cache: {} hits, {} misses ({:.1}%)",
        stats.cache_hits,
        stats.cache_misses,
        stats.cache_hit_rate * 100.0
    );
    Ok(std::process::ExitCode::SUCCESS)
}

/// Parses a comma-separated list of entity types.
fn parse_types(types: Option<&str>) -> anyhow::Result<Vec<EntityType>> {
    let Some(types) = types else {
        return Ok(Vec::new());
    };
    types
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| EntityType::parse(t).with_context(|| format!("unknown entity type '{t}'")))
        .collect()
}

/// Search command.
pub fn cmd_search(
    memory: &MemoryFacade,
    query: &str,
    session: Option<String>,
    types: Option<String>,
    limit: usize,
    json: bool,
) -> anyhow::Result<std::process::ExitCode> {
    // An in-process index starts empty on every run.
    if memory.vector_index().is_some_and(|v| v.backend_name() == "memory") {
        memory.reindex(session.as_deref())?;
    }

    let mut filter = VectorFilter::new();
    filter.session_id = session;
    filter.entity_types = parse_types(types.as_deref())?;
    let results = memory.semantic_search(query, &filter, limit)?;

    if json {
        print_json(&results)?;
    } else if results.is_empty() {
        println!("No entities found.");
    } else {
        for (i, entity) in results.iter().enumerate() {
            println!(
                "{}. [{}] {} ({})",
                i + 1,
                entity.entity_type.as_str(),
                entity.content_summary(100),
                entity.id
            );
        }
    }
    Ok(std::process::ExitCode::SUCCESS)
}

fn parse_time(value: Option<&str>) -> anyhow::Result<Option<DateTime<Utc>>> {
    value
        .map(|v| {
            DateTime::parse_from_rfc3339(v)
                .map(|t| t.with_timezone(&Utc))
                .with_context(|| format!("invalid timestamp '{v}'"))
        })
        .transpose()
}

/// Timeline command.
pub fn cmd_timeline(
    memory: &MemoryFacade,
    session: &str,
    from: Option<String>,
    to: Option<String>,
    json: bool,
) -> anyhow::Result<std::process::ExitCode> {
    let start = parse_time(from.as_deref())?;
    let end = parse_time(to.as_deref())?;
    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            bail!("--from must not be after --to");
        }
    }
    let entries = memory.get_timeline(Some(session), start, end)?;

    if json {
        print_json(&entries)?;
        return Ok(std::process::ExitCode::SUCCESS);
    }
    for entry in &entries {
        println!(
            "{}  {:<10} {:.2}  {}",
            entry.timestamp.format("%Y-%m-%d %H:%M"),
            entry.entity_type.as_str(),
            entry.importance,
            entry.content_summary
        );
    }
    Ok(std::process::ExitCode::SUCCESS)
}

/// Network command.
pub fn cmd_network(
    memory: &MemoryFacade,
    entity: &str,
    depth: usize,
    json: bool,
) -> anyhow::Result<std::process::ExitCode> {
    let network = memory.get_relationship_network(&EntityId::new(entity), depth)?;
    if json {
        print_json(&network)?;
        return Ok(std::process::ExitCode::SUCCESS);
    }

    let mut nodes: Vec<_> = network.nodes.iter().collect();
    nodes.sort_by(|a, b| a.1.depth.cmp(&b.1.depth).then_with(|| a.0.cmp(b.0)));
    println!("Nodes ({}):", nodes.len());
    for (id, node) in nodes {
        println!(
            "  {}{} [{}] {id}",
            "  ".repeat(node.depth),
            node.name,
            node.entity_type.as_str()
        );
    }
    println!("Edges ({}):", network.edges.len());
    for edge in &network.edges {
        println!(
            "  {} -{}-> {} ({:.2})",
            edge.source, edge.relation_type, edge.target, edge.strength
        );
    }
    Ok(std::process::ExitCode::SUCCESS)
}
