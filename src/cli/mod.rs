//! Local administration commands. Each opens the configured database directly.

pub mod erase;
pub mod find;
pub mod inspect;
pub mod migrate;
pub mod reindex;
pub mod stats;

use anyhow::{Context, Result};
use rusqlite::Connection;

use pairstore::config::PairstoreConfig;
use pairstore::Agent;

/// Resolve the configured agent.
///
/// When both schema files are configured the agent is (re)initialized from them, which
/// migrates its tables; otherwise it is re-opened from the descriptors recorded by its
/// last migration.
pub fn load_agent(conn: &mut Connection, config: &PairstoreConfig) -> Result<Agent> {
    let name = &config.agent.name;
    match config.agent.descriptors()? {
        Some((input, output)) => {
            Agent::init(conn, name, input, output, config.embedding.dimensions)
                .with_context(|| format!("failed to initialize agent '{name}'"))
        }
        None => Agent::open(conn, name).with_context(|| {
            format!(
                "agent '{name}' has no recorded schema; set agent.input_schema and agent.output_schema"
            )
        }),
    }
}

/// Open the database and resolve the configured agent.
pub fn open(config: &PairstoreConfig) -> Result<(Connection, Agent)> {
    let db_path = config.resolved_db_path();
    let mut conn = pairstore::db::open_database(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.display()))?;
    let agent = load_agent(&mut conn, config)?;
    Ok((conn, agent))
}
