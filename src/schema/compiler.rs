//! Type descriptor → table definition.
//!
//! Compilation is pure: the same descriptor always yields the same columns in the same
//! order, so definitions can be diffed and compared as JSON across runs.
//!
//! Scalars become typed columns. Arrays of scalars, and objects (or arrays of objects)
//! whose fields are all scalars, are serialized into one `JSON_TEXT` column. Anything
//! deeper, or any array/object field marked `indexed`, becomes a child table keyed by
//! `parent_id` with an explicit `position`.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::descriptor::{Field, FieldKind, ScalarKind, TypeDescriptor};
use crate::error::{Error, Result};

/// Column names owned by the storage layer. Field names may not collide with these.
pub const RESERVED_COLUMNS: &[&str] = &[
    "id",
    "created_at",
    "createdat",
    "supersedes",
    "provenance",
    "parent_id",
    "position",
];

/// Declared column types. The declared name is what `pragma_table_info` reports back,
/// which is what migration diffing compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlType {
    Text,
    Real,
    Integer,
    Boolean,
    Blob,
    /// Serialized JSON; declared `JSON_TEXT` for TEXT affinity.
    Json,
}

impl SqlType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Real => "REAL",
            Self::Integer => "INTEGER",
            Self::Boolean => "BOOLEAN",
            Self::Blob => "BLOB",
            Self::Json => "JSON_TEXT",
        }
    }

    fn for_scalar(kind: ScalarKind) -> Self {
        match kind {
            ScalarKind::String => Self::Text,
            ScalarKind::Number => Self::Real,
            ScalarKind::Integer => Self::Integer,
            ScalarKind::Boolean => Self::Boolean,
            ScalarKind::Bytes => Self::Blob,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Field name; always quoted in SQL.
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub indexed: bool,
    /// Descriptor kind the column stores, used for validation and decoding.
    pub kind: FieldKind,
}

/// How a table relates to the rest of an agent's storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "role")]
pub enum TableRole {
    /// Owns record identity: auto-increment id, created_at, supersedes, provenance.
    Record,
    /// Shares its id with a row of the `with` table.
    Paired { with: String },
    /// Element rows of a parent row.
    Child { parent: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildTable {
    /// The field this table stores.
    pub field: String,
    /// Array field (many rows) rather than object field (one row).
    pub repeated: bool,
    /// Elements are not objects and live in a single `value` column.
    pub wrapped: bool,
    pub optional: bool,
    pub table: TableDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    pub role: TableRole,
    pub columns: Vec<Column>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ChildTable>,
}

impl TableDefinition {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn child(&self, field: &str) -> Option<&ChildTable> {
        self.children.iter().find(|c| c.field == field)
    }

    /// This table and every descendant, parents before children.
    pub fn tables(&self) -> Vec<&TableDefinition> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.table.tables());
        }
        out
    }
}

/// Compile `descriptor` into the definition of table `name`.
pub fn compile(name: &str, descriptor: &TypeDescriptor, role: TableRole) -> Result<TableDefinition> {
    // Child names embed field names, which are quoted rather than restricted.
    if !matches!(role, TableRole::Child { .. }) {
        check_identifier(name)?;
    }
    let mut columns = Vec::new();
    let mut children = Vec::new();
    let mut seen = HashSet::new();

    for field in &descriptor.fields {
        check_field_name(field, &mut seen)?;

        match spill(field) {
            None => columns.push(column_for(field)?),
            Some((repeated, element)) => {
                let (element_descriptor, wrapped) = match element {
                    FieldKind::Object(inner) => (inner.clone(), false),
                    other => (
                        TypeDescriptor::new(vec![Field::required("value", other.clone())]),
                        true,
                    ),
                };
                let child_name = format!("{name}__{}", field.name);
                let table = compile(
                    &child_name,
                    &element_descriptor,
                    TableRole::Child {
                        parent: name.to_string(),
                    },
                )?;
                children.push(ChildTable {
                    field: field.name.clone(),
                    repeated,
                    wrapped,
                    optional: field.optional,
                    table,
                });
            }
        }
    }

    let definition = TableDefinition {
        name: name.to_string(),
        role,
        columns,
        children,
    };
    if !matches!(definition.role, TableRole::Child { .. }) {
        check_table_names(&definition)?;
    }
    Ok(definition)
}

/// Child table names are built from field names and must not clash once joined.
fn check_table_names(definition: &TableDefinition) -> Result<()> {
    let mut seen = HashSet::new();
    for table in definition.tables() {
        if !seen.insert(table.name.to_ascii_lowercase()) {
            return Err(Error::Schema(format!(
                "child table name `{}` is produced by two different fields",
                table.name
            )));
        }
    }
    Ok(())
}

/// Returns `(repeated, element kind)` when `field` needs a child table.
fn spill(field: &Field) -> Option<(bool, &FieldKind)> {
    match &field.kind {
        FieldKind::Scalar(_) => None,
        FieldKind::Array(element) => {
            let flat = match element.as_ref() {
                FieldKind::Scalar(_) => true,
                FieldKind::Object(inner) => inner.is_scalar_only(),
                FieldKind::Array(_) => false,
            };
            (!flat || field.indexed).then_some((true, element.as_ref()))
        }
        FieldKind::Object(inner) => {
            (!inner.is_scalar_only() || field.indexed).then_some((false, &field.kind))
        }
    }
}

fn column_for(field: &Field) -> Result<Column> {
    let sql_type = match &field.kind {
        FieldKind::Scalar(kind) => SqlType::for_scalar(*kind),
        FieldKind::Array(_) | FieldKind::Object(_) => SqlType::Json,
    };
    Ok(Column {
        name: field.name.clone(),
        sql_type,
        nullable: field.optional,
        indexed: field.indexed && field.kind.is_scalar(),
        kind: field.kind.clone(),
    })
}

fn check_field_name(field: &Field, seen: &mut HashSet<String>) -> Result<()> {
    let name = field.name.as_str();
    if name.is_empty() {
        return Err(Error::Schema("field name must not be empty".into()));
    }
    if name.contains('.') || name.contains('[') || name.chars().any(char::is_control) {
        return Err(Error::Schema(format!(
            "field name `{name}` contains a path separator or control character"
        )));
    }
    // `__` joins parent and field in child table names.
    if name.contains("__") {
        return Err(Error::Schema(format!("field name `{name}` must not contain `__`")));
    }
    let folded = name.to_ascii_lowercase();
    if RESERVED_COLUMNS.contains(&folded.as_str()) {
        return Err(Error::Schema(format!(
            "field name `{name}` collides with a reserved column"
        )));
    }
    // SQLite column names are case-insensitive.
    if !seen.insert(folded) {
        return Err(Error::Schema(format!("duplicate field name `{name}`")));
    }
    Ok(())
}

/// Agent and table names must be plain identifiers without `__`, which is left to child tables.
pub(crate) fn check_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_start || !valid_rest || name.contains("__") {
        return Err(Error::Schema(format!("invalid table name `{name}`")));
    }
    Ok(())
}

/// Quote an identifier for SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
