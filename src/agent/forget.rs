//! Physical deletion of one record, and erasure of a whole agent.
//!
//! These are the only destructive operations. Both run in a single transaction and
//! delete child rows explicitly, so they do not depend on `foreign_keys` being enabled.

use rusqlite::{params, Connection, TransactionBehavior};

use super::types::RecordId;
use super::{write_audit_log, Agent, Definitions};
use crate::error::{Error, Result};
use crate::schema::{quote_ident, TableDefinition};

impl Agent {
    /// Remove record `id`, its child rows, and its embedding.
    ///
    /// Records that supersede `id` keep their (now dangling) `supersedes` link.
    pub fn delete(&self, conn: &mut Connection, id: RecordId) -> Result<()> {
        let tx = conn.transaction()?;

        let exists: bool = tx.query_row(
            &format!(
                "SELECT COUNT(*) > 0 FROM {} WHERE id = ?1",
                quote_ident(&self.input.table.name)
            ),
            params![id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(Error::NotFound(id));
        }

        let had_vector = self.vectors.remove(&tx, id)?;
        delete_tree(&tx, &self.output.table, "SELECT ?1", id)?;
        delete_tree(&tx, &self.input.table, "SELECT ?1", id)?;

        write_audit_log(
            &tx,
            &self.name,
            "delete",
            Some(id),
            Some(&serde_json::json!({"embedding_removed": had_vector})),
        )?;
        tx.commit()?;

        tracing::info!(agent = %self.name, id, "record deleted");
        Ok(())
    }

    /// Drop every table of this agent, its vectors, and its schema marker. Irreversible.
    pub fn erase(self, conn: &mut Connection) -> Result<()> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Exclusive)?;

        let tables = owned_tables(&tx, &self)?;

        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {}",
            quote_ident(self.vectors.table())
        ))?;
        for table in &tables {
            tx.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)))?;
        }

        tx.execute("DELETE FROM agents WHERE name = ?1", params![self.name])?;
        tx.execute(
            "DELETE FROM agent_schema_history WHERE agent = ?1",
            params![self.name],
        )?;
        write_audit_log(
            &tx,
            &self.name,
            "erase",
            None,
            Some(&serde_json::json!({"tables": tables.len() + 1})),
        )?;
        tx.commit()?;

        tracing::info!(agent = %self.name, tables = tables.len() + 1, "agent erased");
        Ok(())
    }
}

/// Every table any applied version of `agent` defined that still exists, children
/// before their parents. Ownership comes from the recorded definitions, not from name
/// prefixes.
fn owned_tables(conn: &Connection, agent: &Agent) -> Result<Vec<String>> {
    let mut versions: Vec<Definitions> = {
        let mut stmt = conn.prepare(
            "SELECT definitions FROM agent_schema_history WHERE agent = ?1 ORDER BY schema_version",
        )?;
        let texts = stmt
            .query_map(params![agent.name], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        texts
            .iter()
            .map(|text| serde_json::from_str(text))
            .collect::<std::result::Result<Vec<_>, _>>()?
    };
    versions.push(Definitions {
        input: agent.input.table.clone(),
        output: agent.output.table.clone(),
    });

    // Parents are listed before their children in every version, and a table first
    // appears no later than any child added under it.
    let mut names: Vec<String> = Vec::new();
    for version in &versions {
        for table in version.input.tables().into_iter().chain(version.output.tables()) {
            if !names.contains(&table.name) {
                names.push(table.name.clone());
            }
        }
    }
    names.reverse();

    let mut stmt =
        conn.prepare("SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?1")?;
    let mut tables = Vec::new();
    for name in names {
        if stmt.query_row(params![name], |row| row.get::<_, bool>(0))? {
            tables.push(name);
        }
    }
    Ok(tables)
}

/// Delete the rows of `table` whose ids `selector` yields, descendants first. Every
/// selector bottoms out in `SELECT ?1`, bound to the record id.
fn delete_tree(
    conn: &Connection,
    table: &TableDefinition,
    selector: &str,
    id: RecordId,
) -> Result<()> {
    let name = quote_ident(&table.name);
    for child in &table.children {
        let child_selector = format!(
            "SELECT id FROM {} WHERE parent_id IN ({selector})",
            quote_ident(&child.table.name)
        );
        delete_tree(conn, &child.table, &child_selector, id)?;
    }
    conn.execute(
        &format!("DELETE FROM {name} WHERE id IN ({selector})"),
        params![id],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, FieldKind, TypeDescriptor};
    use serde_json::json;

    fn planner(conn: &mut Connection) -> Agent {
        let step = TypeDescriptor::new(vec![
            Field::required("name", FieldKind::string()),
            Field::required("tools", FieldKind::array_of(FieldKind::string())).indexed(),
        ]);
        Agent::init(
            conn,
            "planner",
            TypeDescriptor::new(vec![Field::required("goal", FieldKind::string())]),
            TypeDescriptor::new(vec![Field::required(
                "steps",
                FieldKind::array_of(FieldKind::Object(step)),
            )]),
            4,
        )
        .unwrap()
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn delete_removes_rows_children_and_vector() {
        let mut conn = crate::db::open_memory_database().unwrap();
        conn.pragma_update(None, "foreign_keys", "OFF").unwrap();
        let agent = planner(&mut conn);
        let id = agent
            .store(
                &mut conn,
                &json!({"goal": "tea"}),
                &json!({"steps": [{"name": "boil", "tools": ["kettle"]}]}),
            )
            .unwrap();
        let keep = agent
            .store(
                &mut conn,
                &json!({"goal": "toast"}),
                &json!({"steps": [{"name": "slice", "tools": ["knife", "board"]}]}),
            )
            .unwrap();
        agent.vectors().upsert(&conn, id, &[1.0, 0.0, 0.0, 0.0]).unwrap();

        agent.delete(&mut conn, id).unwrap();

        assert_eq!(count(&conn, "planner_input"), 1);
        assert_eq!(count(&conn, "planner_output"), 1);
        assert_eq!(count(&conn, "planner_output__steps"), 1);
        assert_eq!(count(&conn, "planner_output__steps__tools"), 2);
        assert_eq!(agent.vectors().count(&conn).unwrap(), 0);
        assert!(agent.get(&conn, keep).is_ok());
        assert!(matches!(agent.delete(&mut conn, id), Err(Error::NotFound(_))));
    }

    #[test]
    fn erase_drops_all_agent_tables() {
        let mut conn = crate::db::open_memory_database().unwrap();
        let agent = planner(&mut conn);
        agent
            .store(
                &mut conn,
                &json!({"goal": "tea"}),
                &json!({"steps": [{"name": "boil", "tools": []}]}),
            )
            .unwrap();

        agent.erase(&mut conn).unwrap();

        let left: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name LIKE 'planner%'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(left, 0);
        assert_eq!(crate::agent::schema_version(&conn, "planner").unwrap(), None);
        assert!(matches!(
            Agent::open(&conn, "planner"),
            Err(Error::UnknownAgent(_))
        ));
    }
}
