use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;

use super::Agent;
use crate::error::Result;
use crate::schema::quote_ident;

/// Counts and time range for one agent.
#[derive(Debug, Serialize)]
pub struct AgentStats {
    pub agent: String,
    pub schema_version: Option<i64>,
    pub dimension: usize,
    pub total_records: u64,
    pub active_records: u64,
    pub superseded_records: u64,
    pub embedded_records: u64,
    pub by_provenance: BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_record: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_record: Option<String>,
}

impl Agent {
    pub fn stats(&self, conn: &Connection) -> Result<AgentStats> {
        let input = quote_ident(&self.input.table.name);

        let (total, oldest, newest): (i64, Option<String>, Option<String>) = conn.query_row(
            &format!("SELECT COUNT(*), MIN(created_at), MAX(created_at) FROM {input}"),
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        let superseded: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {input} i WHERE EXISTS \
                 (SELECT 1 FROM {input} s WHERE s.supersedes = i.id)"
            ),
            [],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT provenance, COUNT(*) FROM {input} GROUP BY provenance"
        ))?;
        let by_provenance = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<std::result::Result<BTreeMap<_, _>, _>>()?;

        Ok(AgentStats {
            agent: self.name.clone(),
            schema_version: super::schema_version(conn, &self.name)?,
            dimension: self.dimension(),
            total_records: total as u64,
            active_records: (total - superseded) as u64,
            superseded_records: superseded as u64,
            embedded_records: self.vectors.count(conn)?,
            by_provenance,
            oldest_record: oldest,
            newest_record: newest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, FieldKind, TypeDescriptor};
    use serde_json::json;

    #[test]
    fn stats_count_by_state_and_provenance() {
        let mut conn = crate::db::open_memory_database().unwrap();
        let agent = Agent::init(
            &mut conn,
            "qa",
            TypeDescriptor::new(vec![Field::required("q", FieldKind::string())]),
            TypeDescriptor::new(vec![Field::required("a", FieldKind::string())]),
            4,
        )
        .unwrap();

        let empty = agent.stats(&conn).unwrap();
        assert_eq!(empty.total_records, 0);
        assert!(empty.oldest_record.is_none());

        let id = agent
            .store(&mut conn, &json!({"q": "1"}), &json!({"a": "x"}))
            .unwrap();
        agent
            .reinforce(&mut conn, &json!({"q": "2"}), &json!({"a": "y"}))
            .unwrap();
        agent.edit(&mut conn, id, None, Some(&json!({"a": "z"}))).unwrap();
        agent.vectors().upsert(&conn, id, &[0.0, 1.0, 0.0, 0.0]).unwrap();

        let stats = agent.stats(&conn).unwrap();
        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.active_records, 2);
        assert_eq!(stats.superseded_records, 1);
        assert_eq!(stats.embedded_records, 1);
        assert_eq!(stats.by_provenance["stored"], 2);
        assert_eq!(stats.by_provenance["reinforced"], 1);
        assert_eq!(stats.schema_version, Some(1));
    }
}
