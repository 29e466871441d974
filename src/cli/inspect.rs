//! CLI `inspect` command — display one record, its edit chain, and its audit log.

use anyhow::Result;

use pairstore::config::PairstoreConfig;
use pairstore::RecordId;

/// Inspect a single record by id.
pub fn inspect(config: &PairstoreConfig, id: RecordId) -> Result<()> {
    let (conn, agent) = super::open(config)?;

    let record = agent.get(&conn, id)?;
    let superseded = agent.is_superseded(&conn, id)?;

    println!("Record: {} ({})", record.id, agent.name());
    println!("{}", "=".repeat(50));
    println!("  Provenance:     {}", record.provenance);
    println!("  Created:        {}", record.created_at);
    if let Some(previous) = record.supersedes {
        println!("  Supersedes:     {previous}");
    }
    println!("  Superseded:     {}", if superseded { "yes" } else { "no" });
    println!(
        "  Embedded:       {}",
        if agent.vectors().contains(&conn, id)? { "yes" } else { "no" }
    );
    println!();
    println!("Input:");
    println!("{}", serde_json::to_string_pretty(&record.input)?);
    println!("Output:");
    println!("{}", serde_json::to_string_pretty(&record.output)?);

    let chain = agent.history(&conn, id)?;
    if chain.len() > 1 {
        println!();
        println!("History (oldest first):");
        for entry in &chain {
            let marker = if entry.id == id { "*" } else { " " };
            println!(
                " {marker} {} [{}] {}",
                entry.id, entry.provenance, entry.created_at
            );
        }
    }

    let log = pairstore::agent::audit_log(&conn, agent.name(), Some(id))?;
    if !log.is_empty() {
        println!();
        println!("Audit Log:");
        for entry in log {
            let details = entry
                .details
                .as_ref()
                .map(|d| d.to_string())
                .unwrap_or_default();
            println!("  {} [{}] {}", entry.created_at, entry.operation, details);
        }
    }

    Ok(())
}
