//! Additive-only reconciliation of live tables against compiled definitions.
//!
//! [`reconcile`] introspects the live tables and diffs them against a desired
//! [`TableDefinition`]; [`apply`] executes the resulting [`MigrationPlan`]. Missing tables
//! are created and missing columns are added (nullable, default NULL). Columns that are
//! no longer described are kept and reported as orphaned. A column whose declared type
//! changed is a [`Error::MigrationConflict`], never coerced; so is a change of field kind
//! against the recorded definition ([`check_compatible`]).
//!
//! Callers run both halves inside one exclusive transaction.

use std::collections::{HashMap, HashSet};

use rusqlite::Connection;
use serde::Serialize;

use super::compiler::{quote_ident, ChildTable, Column, TableDefinition, TableRole};
use super::descriptor::FieldKind;
use crate::error::{Error, Result};

/// Label used in conflicts where a field is stored as a child table.
const CHILD_TABLE: &str = "CHILD TABLE";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MigrationStep {
    CreateTable {
        table: String,
        #[serde(skip)]
        statements: Vec<String>,
    },
    AddColumn {
        table: String,
        column: String,
        sql_type: String,
    },
    CreateIndex {
        table: String,
        column: String,
    },
}

impl MigrationStep {
    fn statements(&self) -> Vec<String> {
        match self {
            Self::CreateTable { statements, .. } => statements.clone(),
            Self::AddColumn {
                table,
                column,
                sql_type,
            } => vec![format!(
                "ALTER TABLE {} ADD COLUMN {} {} DEFAULT NULL",
                quote_ident(table),
                quote_ident(column),
                sql_type
            )],
            Self::CreateIndex { table, column } => vec![create_index_sql(table, column)],
        }
    }
}

/// A live column no field maps to any more. Retained, never dropped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrphanedColumn {
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MigrationPlan {
    pub steps: Vec<MigrationStep>,
    pub orphaned: Vec<OrphanedColumn>,
}

impl MigrationPlan {
    /// True when applying the plan would change nothing.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn extend(&mut self, other: MigrationPlan) {
        self.steps.extend(other.steps);
        self.orphaned.extend(other.orphaned);
    }
}

#[derive(Debug, Clone)]
pub struct LiveColumn {
    pub name: String,
    pub declared_type: String,
}

/// Snapshot of the live tables and indexes sharing a name prefix.
#[derive(Debug, Default)]
pub struct LiveSchema {
    tables: HashMap<String, Vec<LiveColumn>>,
    indexes: HashSet<String>,
}

impl LiveSchema {
    /// Load every table and index whose name starts with `prefix`.
    pub fn load(conn: &Connection, prefix: &str) -> Result<Self> {
        let mut stmt = conn.prepare(
            "SELECT type, name FROM sqlite_master WHERE type IN ('table', 'index')",
        )?;
        let entries: Vec<(String, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut live = LiveSchema::default();
        for (kind, name) in entries {
            if kind == "index" {
                live.indexes.insert(name);
            } else if name == prefix || name.starts_with(&format!("{prefix}__")) {
                let columns = table_columns(conn, &name)?;
                live.tables.insert(name, columns);
            }
        }
        Ok(live)
    }

    pub fn table(&self, name: &str) -> Option<&[LiveColumn]> {
        self.tables.get(name).map(Vec::as_slice)
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<LiveColumn>> {
    let mut stmt = conn.prepare("SELECT name, type FROM pragma_table_info(?1)")?;
    let columns = stmt
        .query_map([table], |row| {
            Ok(LiveColumn {
                name: row.get(0)?,
                declared_type: row.get(1)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(columns)
}

/// Introspect the live tables under `desired` and compute the plan to reach it.
pub fn reconcile(conn: &Connection, desired: &TableDefinition) -> Result<MigrationPlan> {
    let live = LiveSchema::load(conn, &desired.name)?;
    plan(&live, desired)
}

/// Pure diff of `live` against `desired` (and all of its child tables).
pub fn plan(live: &LiveSchema, desired: &TableDefinition) -> Result<MigrationPlan> {
    let mut plan = MigrationPlan::default();

    for table in desired.tables() {
        let Some(live_columns) = live.table(&table.name) else {
            plan.steps.push(MigrationStep::CreateTable {
                table: table.name.clone(),
                statements: create_table_sql(table),
            });
            continue;
        };

        for column in &table.columns {
            match find_column(live_columns, &column.name) {
                Some(existing) => {
                    if !existing
                        .declared_type
                        .eq_ignore_ascii_case(column.sql_type.as_sql())
                    {
                        return Err(conflict(table, &column.name, &existing.declared_type, column.sql_type.as_sql()));
                    }
                }
                None => {
                    if live.has_table(&format!("{}__{}", table.name, column.name)) {
                        return Err(conflict(table, &column.name, CHILD_TABLE, column.sql_type.as_sql()));
                    }
                    plan.steps.push(MigrationStep::AddColumn {
                        table: table.name.clone(),
                        column: column.name.clone(),
                        sql_type: column.sql_type.as_sql().to_string(),
                    });
                }
            }

            if column.indexed && !live.indexes.contains(&index_name(&table.name, &column.name)) {
                plan.steps.push(MigrationStep::CreateIndex {
                    table: table.name.clone(),
                    column: column.name.clone(),
                });
            }
        }

        for child in &table.children {
            if let Some(existing) = find_column(live_columns, &child.field) {
                return Err(conflict(table, &child.field, &existing.declared_type, CHILD_TABLE));
            }
        }

        let system = system_columns(&table.role);
        for existing in live_columns {
            let known = system.iter().any(|s| s.eq_ignore_ascii_case(&existing.name))
                || find_desired(&table.columns, &existing.name).is_some();
            if !known {
                plan.orphaned.push(OrphanedColumn {
                    table: table.name.clone(),
                    column: existing.name.clone(),
                });
            }
        }
    }

    tracing::debug!(
        table = %desired.name,
        steps = plan.steps.len(),
        orphaned = plan.orphaned.len(),
        "migration plan computed"
    );
    Ok(plan)
}

/// Check `desired` against the definition that was last applied.
///
/// Declared SQL types cannot tell `array<string>` from `array<integer>` (both `JSON_TEXT`),
/// nor a child table holding one object from one holding many. Those changes would leave
/// stored rows unreadable, so they are conflicts.
pub fn check_compatible(applied: &TableDefinition, desired: &TableDefinition) -> Result<()> {
    let previous: HashMap<&str, &TableDefinition> = applied
        .tables()
        .into_iter()
        .map(|table| (table.name.as_str(), table))
        .collect();

    for table in desired.tables() {
        let Some(before) = previous.get(table.name.as_str()) else {
            continue;
        };
        for column in &table.columns {
            if let Some(old) = before.column(&column.name) {
                if !kind_compatible(&old.kind, &column.kind) {
                    return Err(conflict(
                        table,
                        &column.name,
                        &old.kind.to_string(),
                        &column.kind.to_string(),
                    ));
                }
            }
        }
        for child in &table.children {
            if let Some(old) = before.child(&child.field) {
                if old.repeated != child.repeated || old.wrapped != child.wrapped {
                    return Err(conflict(table, &child.field, child_shape(old), child_shape(child)));
                }
            }
        }
    }
    Ok(())
}

/// Rows stored under `old` still decode under `new`.
fn kind_compatible(old: &FieldKind, new: &FieldKind) -> bool {
    match (old, new) {
        (FieldKind::Scalar(a), FieldKind::Scalar(b)) => a == b,
        (FieldKind::Array(a), FieldKind::Array(b)) => kind_compatible(a, b),
        (FieldKind::Object(a), FieldKind::Object(b)) => {
            let kept = a.fields.iter().all(|field| {
                b.field(&field.name).is_some_and(|next| {
                    (next.optional || !field.optional) && kind_compatible(&field.kind, &next.kind)
                })
            });
            let added = b
                .fields
                .iter()
                .all(|next| next.optional || a.field(&next.name).is_some());
            kept && added
        }
        _ => false,
    }
}

fn child_shape(child: &ChildTable) -> &'static str {
    match (child.repeated, child.wrapped) {
        (true, true) => "CHILD TABLE (array of values)",
        (true, false) => "CHILD TABLE (array of objects)",
        (false, _) => "CHILD TABLE (object)",
    }
}

/// Execute every step of `plan`. Must run inside the caller's exclusive transaction.
pub fn apply(conn: &Connection, plan: &MigrationPlan) -> Result<()> {
    for step in &plan.steps {
        for sql in step.statements() {
            conn.execute_batch(&sql)?;
        }
    }
    Ok(())
}

fn find_column<'a>(columns: &'a [LiveColumn], name: &str) -> Option<&'a LiveColumn> {
    columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
}

fn find_desired<'a>(columns: &'a [Column], name: &str) -> Option<&'a Column> {
    columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
}

fn conflict(table: &TableDefinition, column: &str, live: &str, desired: &str) -> Error {
    Error::MigrationConflict {
        table: table.name.clone(),
        column: column.to_string(),
        live: live.to_string(),
        desired: desired.to_string(),
    }
}

fn system_columns(role: &TableRole) -> &'static [&'static str] {
    match role {
        TableRole::Record => &["id", "created_at", "supersedes", "provenance"],
        TableRole::Paired { .. } => &["id"],
        TableRole::Child { .. } => &["id", "parent_id", "position"],
    }
}

fn index_name(table: &str, column: &str) -> String {
    format!("idx_{table}_{column}")
}

fn create_index_sql(table: &str, column: &str) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {} ON {}({})",
        quote_ident(&index_name(table, column)),
        quote_ident(table),
        quote_ident(column)
    )
}

/// DDL for a fresh table and its indexes.
///
/// Payload columns are declared without NOT NULL: required-ness is enforced by
/// validation, so a retired field's column never blocks later inserts.
pub fn create_table_sql(table: &TableDefinition) -> Vec<String> {
    let name = quote_ident(&table.name);
    let mut defs: Vec<String> = match &table.role {
        TableRole::Record => vec![
            "id INTEGER PRIMARY KEY AUTOINCREMENT".into(),
            "created_at TEXT NOT NULL".into(),
            "supersedes INTEGER".into(),
            "provenance TEXT NOT NULL DEFAULT 'stored' \
             CHECK(provenance IN ('stored','inferred','reinforced'))"
                .into(),
        ],
        TableRole::Paired { with } => vec![format!(
            "id INTEGER PRIMARY KEY REFERENCES {}(id) ON DELETE CASCADE",
            quote_ident(with)
        )],
        TableRole::Child { parent } => vec![
            "id INTEGER PRIMARY KEY AUTOINCREMENT".into(),
            format!(
                "parent_id INTEGER NOT NULL REFERENCES {}(id) ON DELETE CASCADE",
                quote_ident(parent)
            ),
            "position INTEGER NOT NULL".into(),
        ],
    };
    defs.extend(
        table
            .columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), c.sql_type.as_sql())),
    );

    let mut statements = vec![format!("CREATE TABLE {name} (\n    {}\n)", defs.join(",\n    "))];
    match &table.role {
        TableRole::Record => statements.push(create_index_sql(&table.name, "supersedes")),
        TableRole::Child { .. } => statements.push(format!(
            "CREATE INDEX IF NOT EXISTS {} ON {name}(parent_id, position)",
            quote_ident(&index_name(&table.name, "parent"))
        )),
        TableRole::Paired { .. } => {}
    }
    statements.extend(
        table
            .columns
            .iter()
            .filter(|c| c.indexed)
            .map(|c| create_index_sql(&table.name, &c.name)),
    );
    statements
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::compiler::compile;
    use crate::schema::descriptor::{Field, FieldKind, TypeDescriptor};

    fn input_v1() -> TypeDescriptor {
        TypeDescriptor::new(vec![Field::required("question", FieldKind::string())])
    }

    fn migrate(conn: &Connection, descriptor: &TypeDescriptor) -> Result<MigrationPlan> {
        let desired = compile("qa_input", descriptor, TableRole::Record)?;
        let plan = reconcile(conn, &desired)?;
        apply(conn, &plan)?;
        Ok(plan)
    }

    #[test]
    fn fresh_database_creates_table() {
        let conn = Connection::open_in_memory().unwrap();
        let plan = migrate(&conn, &input_v1()).unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert!(matches!(plan.steps[0], MigrationStep::CreateTable { ref table, .. } if table == "qa_input"));

        let columns = table_columns(&conn, "qa_input").unwrap();
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["id", "created_at", "supersedes", "provenance", "question"]);
    }

    #[test]
    fn reconcile_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn, &input_v1()).unwrap();
        let second = migrate(&conn, &input_v1()).unwrap();
        assert!(second.is_empty());
        assert!(second.orphaned.is_empty());
    }

    #[test]
    fn new_field_is_added_as_nullable_column() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn, &input_v1()).unwrap();
        conn.execute(
            "INSERT INTO qa_input (created_at, question) VALUES ('now', '2+2?')",
            [],
        )
        .unwrap();

        let mut v2 = input_v1();
        v2.fields.push(Field::optional("context", FieldKind::string()));
        let plan = migrate(&conn, &v2).unwrap();
        assert_eq!(
            plan.steps,
            vec![MigrationStep::AddColumn {
                table: "qa_input".into(),
                column: "context".into(),
                sql_type: "TEXT".into(),
            }]
        );

        let (question, context): (String, Option<String>) = conn
            .query_row("SELECT question, context FROM qa_input", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!(question, "2+2?");
        assert!(context.is_none());
    }

    #[test]
    fn removed_field_is_orphaned_not_dropped() {
        let conn = Connection::open_in_memory().unwrap();
        let mut v1 = input_v1();
        v1.fields.push(Field::required("legacy", FieldKind::string()));
        migrate(&conn, &v1).unwrap();

        let plan = migrate(&conn, &input_v1()).unwrap();
        assert!(plan.is_empty());
        assert_eq!(
            plan.orphaned,
            vec![OrphanedColumn {
                table: "qa_input".into(),
                column: "legacy".into()
            }]
        );
        assert!(table_columns(&conn, "qa_input")
            .unwrap()
            .iter()
            .any(|c| c.name == "legacy"));
    }

    #[test]
    fn changed_type_is_a_conflict() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn, &input_v1()).unwrap();

        let changed = TypeDescriptor::new(vec![Field::required("question", FieldKind::number())]);
        let err = migrate(&conn, &changed).unwrap_err();
        match err {
            Error::MigrationConflict {
                table,
                column,
                live,
                desired,
            } => {
                assert_eq!(table, "qa_input");
                assert_eq!(column, "question");
                assert_eq!(live, "TEXT");
                assert_eq!(desired, "REAL");
            }
            other => panic!("expected conflict, got {other}"),
        }
    }

    #[test]
    fn column_turning_into_child_table_is_a_conflict() {
        let conn = Connection::open_in_memory().unwrap();
        let flat = TypeDescriptor::new(vec![Field::required(
            "tags",
            FieldKind::array_of(FieldKind::string()),
        )]);
        migrate(&conn, &flat).unwrap();

        let indexed = TypeDescriptor::new(vec![Field::required(
            "tags",
            FieldKind::array_of(FieldKind::string()),
        )
        .indexed()]);
        assert!(matches!(
            migrate(&conn, &indexed),
            Err(Error::MigrationConflict { .. })
        ));
    }

    #[test]
    fn child_tables_follow_additive_rule() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn, &input_v1()).unwrap();

        let step = TypeDescriptor::new(vec![Field::required(
            "notes",
            FieldKind::array_of(FieldKind::string()),
        )]);
        let mut v2 = input_v1();
        v2.fields.push(Field::optional(
            "steps",
            FieldKind::array_of(FieldKind::Object(step)),
        ).indexed());
        let plan = migrate(&conn, &v2).unwrap();
        assert!(matches!(plan.steps[0], MigrationStep::CreateTable { ref table, .. } if table == "qa_input__steps"));
        assert!(migrate(&conn, &v2).unwrap().is_empty());
    }

    #[test]
    fn indexed_column_added_later_gets_index() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn, &input_v1()).unwrap();

        let mut v2 = input_v1();
        v2.fields.push(Field::optional("topic", FieldKind::string()).indexed());
        let plan = migrate(&conn, &v2).unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert!(matches!(plan.steps[1], MigrationStep::CreateIndex { .. }));
        assert!(migrate(&conn, &v2).unwrap().is_empty());
    }
}
