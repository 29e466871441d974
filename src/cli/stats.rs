use anyhow::Result;

use pairstore::config::PairstoreConfig;

/// Display agent statistics in the terminal.
pub fn stats(config: &PairstoreConfig) -> Result<()> {
    let db_path = config.resolved_db_path();
    let (conn, agent) = super::open(config)?;
    let response = agent.stats(&conn)?;

    println!("Agent Statistics: {}", response.agent);
    println!("{}", "=".repeat(40));
    if let Some(version) = response.schema_version {
        println!("  Schema version:      {version}");
    }
    println!("  Dimension:           {}", response.dimension);
    println!("  Total records:       {}", response.total_records);
    println!("  Active:              {}", response.active_records);
    println!("  Superseded:          {}", response.superseded_records);
    println!("  Embedded:            {}", response.embedded_records);
    println!();

    println!("By Provenance:");
    for p in &["stored", "inferred", "reinforced"] {
        let count = response.by_provenance.get(*p).copied().unwrap_or(0);
        println!("  {:<12} {}", p, count);
    }
    println!();

    if let Ok(meta) = std::fs::metadata(&db_path) {
        println!("Database size:         {} bytes", meta.len());
    }
    if let Some(ref oldest) = response.oldest_record {
        println!("Oldest record:         {oldest}");
    }
    if let Some(ref newest) = response.newest_record {
        println!("Newest record:         {newest}");
    }

    Ok(())
}
