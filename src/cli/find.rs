//! CLI `find` command — list records matching field filters.

use anyhow::{Context, Result};
use serde_json::Value;

use pairstore::config::PairstoreConfig;
use pairstore::{Filter, FindQuery};

fn parse_filter(flag: &str, raw: Option<&str>) -> Result<Option<Filter>> {
    raw.map(|text| {
        let value: Value = serde_json::from_str(text)
            .with_context(|| format!("--{flag} must be a JSON object"))?;
        Filter::from_json(&value).with_context(|| format!("invalid --{flag} filter"))
    })
    .transpose()
}

/// Print matching records, one JSON object per line, oldest first.
pub fn find(
    config: &PairstoreConfig,
    input: Option<&str>,
    output: Option<&str>,
    history: bool,
    limit: usize,
) -> Result<()> {
    let mut query = FindQuery::new();
    if let Some(filter) = parse_filter("input", input)? {
        query = query.input(filter);
    }
    if let Some(filter) = parse_filter("output", output)? {
        query = query.output(filter);
    }
    if history {
        query = query.with_history();
    }

    let (conn, agent) = super::open(config)?;
    let mut shown = 0;
    for record in agent.find(&conn, &query)?.take(limit) {
        println!("{}", serde_json::to_string(&record?)?);
        shown += 1;
    }

    if shown == 0 {
        println!("No records found.");
    }
    Ok(())
}
