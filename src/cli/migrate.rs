//! CLI `migrate` command — reconcile the agent's tables with its schema files.

use anyhow::{bail, Context, Result};

use pairstore::config::PairstoreConfig;
use pairstore::schema::migrate::{MigrationPlan, MigrationStep};
use pairstore::Agent;

/// Apply (or with `dry_run`, only print) the migration plan for the configured agent.
pub fn migrate(config: &PairstoreConfig, dry_run: bool) -> Result<()> {
    let Some((input, output)) = config.agent.descriptors()? else {
        bail!("migrate needs agent.input_schema and agent.output_schema in the config");
    };

    let db_path = config.resolved_db_path();
    let mut conn = pairstore::db::open_database(&db_path)?;
    let name = &config.agent.name;
    let agent = Agent::define(name, input, output, config.embedding.dimensions)?;

    let plan = if dry_run {
        agent.plan(&conn)?
    } else {
        agent
            .migrate(&mut conn)
            .with_context(|| format!("migration of agent '{name}' failed"))?
    };

    print_plan(&plan, dry_run);

    if !dry_run {
        let version = pairstore::agent::schema_version(&conn, name)?.unwrap_or_default();
        println!("Agent '{name}' is at schema version {version}.");
    }
    Ok(())
}

fn print_plan(plan: &MigrationPlan, dry_run: bool) {
    if plan.is_empty() {
        println!("Schema is up to date.");
    } else {
        let verb = if dry_run { "Would apply" } else { "Applied" };
        println!("{verb} {} step(s):", plan.steps.len());
        for step in &plan.steps {
            match step {
                MigrationStep::CreateTable { table, .. } => println!("  create table  {table}"),
                MigrationStep::AddColumn {
                    table,
                    column,
                    sql_type,
                } => println!("  add column    {table}.{column} {sql_type}"),
                MigrationStep::CreateIndex { table, column } => {
                    println!("  create index  {table}.{column}")
                }
            }
        }
    }

    if !plan.orphaned.is_empty() {
        println!();
        println!("Orphaned columns (kept, no longer described):");
        for column in &plan.orphaned {
            println!("  {}.{}", column.table, column.column);
        }
    }
}
