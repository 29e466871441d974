//! Agents — a named input/output table pair, its child tables, and its vector index.
//!
//! - [`Agent::init`] compiles both descriptors and reconciles the live tables under an
//!   exclusive transaction, recording the applied definitions in `agents`
//! - `store` / `infer` / `reinforce` / `edit` — append-only writes ([`store`])
//! - `find` / `get` / `history` — lazy, restartable reads ([`query`])
//! - `delete` / `erase` — the destructive operations ([`forget`])
//! - `embed_record` / `embed_missing` — vector maintenance ([`embed`])

pub mod embed;
pub mod forget;
pub mod query;
pub(crate) mod rows;
pub mod stats;
pub mod store;
pub mod types;
pub mod validate;

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::compiler::check_identifier;
use crate::schema::{self, compile, MigrationPlan, TableDefinition, TableRole, TypeDescriptor};
use crate::vector::VectorIndex;

pub use query::{Condition, Filter, FindQuery, Op, RecordQuery, Records};
pub use store::Inferred;
pub use types::{Payload, Provenance, Record, RecordId};

/// One side (input or output) of an agent.
#[derive(Debug, Clone)]
pub struct Side {
    pub descriptor: TypeDescriptor,
    pub table: TableDefinition,
}

/// The applied pair of table definitions, as stored in the schema-version marker.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Definitions {
    input: TableDefinition,
    output: TableDefinition,
}

fn applied_definitions(conn: &Connection, agent: &str) -> Result<Option<Definitions>> {
    let text: Option<String> = conn
        .query_row(
            "SELECT definitions FROM agents WHERE name = ?1",
            params![agent],
            |row| row.get(0),
        )
        .optional()?;
    text.map(|text| serde_json::from_str(&text).map_err(Error::from))
        .transpose()
}

#[derive(Debug, Clone)]
pub struct Agent {
    name: String,
    input: Side,
    output: Side,
    vectors: VectorIndex,
}

impl Agent {
    /// Compile an agent's tables without touching the database.
    pub fn define(
        name: &str,
        input: TypeDescriptor,
        output: TypeDescriptor,
        dimension: usize,
    ) -> Result<Self> {
        check_identifier(name)?;
        // `qa_` would own `qa__input`, which reads as a child of agent `qa`.
        if name.ends_with('_') {
            return Err(Error::Schema(format!(
                "agent name `{name}` must not end with `_`"
            )));
        }
        if dimension == 0 {
            return Err(Error::Schema("embedding dimension must be positive".into()));
        }
        let input_name = format!("{name}_input");
        let input_table = compile(&input_name, &input, TableRole::Record)?;
        let output_table = compile(
            &format!("{name}_output"),
            &output,
            TableRole::Paired {
                with: input_name.clone(),
            },
        )?;
        Ok(Self {
            name: name.to_string(),
            vectors: VectorIndex::new(format!("{name}_vec"), input_name, dimension),
            input: Side {
                descriptor: input,
                table: input_table,
            },
            output: Side {
                descriptor: output,
                table: output_table,
            },
        })
    }

    /// Define the agent and bring its tables up to date.
    pub fn init(
        conn: &mut Connection,
        name: &str,
        input: TypeDescriptor,
        output: TypeDescriptor,
        dimension: usize,
    ) -> Result<Self> {
        let agent = Self::define(name, input, output, dimension)?;
        agent.migrate(conn)?;
        Ok(agent)
    }

    /// Re-open an agent from the descriptors recorded by its last migration.
    pub fn open(conn: &Connection, name: &str) -> Result<Self> {
        let row: Option<(String, String, i64)> = conn
            .query_row(
                "SELECT input_descriptor, output_descriptor, dimension FROM agents WHERE name = ?1",
                params![name],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let (input, output, dimension) =
            row.ok_or_else(|| Error::UnknownAgent(name.to_string()))?;
        Self::define(
            name,
            serde_json::from_str(&input)?,
            serde_json::from_str(&output)?,
            dimension as usize,
        )
    }

    /// The steps [`Agent::migrate`] would apply, without applying them.
    pub fn plan(&self, conn: &Connection) -> Result<MigrationPlan> {
        if let Some(applied) = applied_definitions(conn, &self.name)? {
            schema::check_compatible(&applied.input, &self.input.table)?;
            schema::check_compatible(&applied.output, &self.output.table)?;
        }
        let mut plan = schema::reconcile(conn, &self.input.table)?;
        plan.extend(schema::reconcile(conn, &self.output.table)?);
        Ok(plan)
    }

    /// Reconcile the live tables with this definition.
    ///
    /// Runs inside an exclusive transaction so no other connection observes a
    /// half-migrated agent. Short-circuits when the recorded definitions already match.
    pub fn migrate(&self, conn: &mut Connection) -> Result<MigrationPlan> {
        let definitions = serde_json::to_string(&Definitions {
            input: self.input.table.clone(),
            output: self.output.table.clone(),
        })?;

        let tx = conn.transaction_with_behavior(TransactionBehavior::Exclusive)?;

        let marker: Option<(String, i64, i64)> = tx
            .query_row(
                "SELECT definitions, dimension, schema_version FROM agents WHERE name = ?1",
                params![self.name],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        if let Some((applied, dimension, _)) = &marker {
            if *dimension as usize != self.dimension() {
                return Err(Error::Dimension {
                    expected: *dimension as usize,
                    actual: self.dimension(),
                });
            }
            if *applied == definitions {
                tracing::debug!(agent = %self.name, "schema unchanged, skipping reconcile");
                tx.commit()?;
                return Ok(MigrationPlan::default());
            }
        }

        let plan = self.plan(&tx)?;
        schema::apply(&tx, &plan)?;
        self.vectors.ensure(&tx)?;

        let now = chrono::Utc::now().to_rfc3339();
        let version = marker.as_ref().map_or(1, |(_, _, v)| v + 1);
        tx.execute(
            "INSERT INTO agents (name, input_descriptor, output_descriptor, definitions, dimension, schema_version, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7) \
             ON CONFLICT(name) DO UPDATE SET input_descriptor = ?2, output_descriptor = ?3, \
             definitions = ?4, schema_version = ?6, updated_at = ?7",
            params![
                self.name,
                serde_json::to_string(&self.input.descriptor)?,
                serde_json::to_string(&self.output.descriptor)?,
                definitions,
                self.dimension() as i64,
                version,
                now,
            ],
        )?;
        tx.execute(
            "INSERT INTO agent_schema_history (agent, schema_version, definitions, applied_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![self.name, version, definitions, now],
        )?;
        write_audit_log(
            &tx,
            &self.name,
            "migrate",
            None,
            Some(&serde_json::json!({
                "schema_version": version,
                "steps": plan.steps,
                "orphaned": plan.orphaned,
            })),
        )?;
        tx.commit()?;

        tracing::info!(
            agent = %self.name,
            schema_version = version,
            plan_steps = plan.steps.len(),
            orphaned = plan.orphaned.len(),
            "agent schema migrated"
        );
        Ok(plan)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input(&self) -> &Side {
        &self.input
    }

    pub fn output(&self) -> &Side {
        &self.output
    }

    pub fn dimension(&self) -> usize {
        self.vectors.dimension()
    }

    pub fn vectors(&self) -> &VectorIndex {
        &self.vectors
    }
}

/// The schema version recorded for `agent`, if it was ever migrated.
pub fn schema_version(conn: &Connection, agent: &str) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT schema_version FROM agents WHERE name = ?1",
            params![agent],
            |row| row.get(0),
        )
        .optional()?)
}

/// One audit log row.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<RecordId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub created_at: String,
}

/// Audit entries for `agent`, oldest first; only those about `record_id` when given.
pub fn audit_log(
    conn: &Connection,
    agent: &str,
    record_id: Option<RecordId>,
) -> Result<Vec<LogEntry>> {
    let mut stmt = conn.prepare(
        "SELECT operation, record_id, details, created_at FROM record_log \
         WHERE agent = ?1 AND (?2 IS NULL OR record_id = ?2) ORDER BY id",
    )?;
    let rows = stmt
        .query_map(params![agent, record_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<RecordId>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(operation, record_id, details, created_at)| {
            Ok(LogEntry {
                operation,
                record_id,
                details: details.map(|d| serde_json::from_str(&d)).transpose()?,
                created_at,
            })
        })
        .collect()
}

/// Append an entry to the audit log.
pub(crate) fn write_audit_log(
    conn: &Connection,
    agent: &str,
    operation: &str,
    record_id: Option<RecordId>,
    details: Option<&serde_json::Value>,
) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    let details_json = details.map(serde_json::to_string).transpose()?;
    conn.execute(
        "INSERT INTO record_log (agent, operation, record_id, details, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![agent, operation, record_id, details_json, now],
    )?;
    Ok(())
}
