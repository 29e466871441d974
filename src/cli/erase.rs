//! CLI `erase` command — drop an agent and all of its tables after confirmation.

use anyhow::{bail, Result};
use std::io::Write;

use pairstore::config::PairstoreConfig;
use pairstore::Agent;

/// Erase the configured agent after the user types YES.
pub fn erase(config: &PairstoreConfig) -> Result<()> {
    let db_path = config.resolved_db_path();
    let name = &config.agent.name;

    println!("WARNING: This will permanently drop agent '{name}', its records, and its vectors.");
    println!("Database: {}", db_path.display());
    print!("\nType YES to confirm: ");
    std::io::stdout().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;

    if input.trim() != "YES" {
        bail!("erase cancelled");
    }

    let mut conn = pairstore::db::open_database(&db_path)?;
    let agent = Agent::open(&conn, name)?;
    agent.erase(&mut conn)?;

    println!("Agent '{name}' erased.");
    Ok(())
}
