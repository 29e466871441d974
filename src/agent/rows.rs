//! Payload ↔ row conversion for compiled tables, child tables included.

use std::collections::HashMap;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use serde_json::Value;

use super::types::{Payload, Provenance, RecordId};
use crate::error::{Error, Result};
use crate::schema::descriptor::number_value;
use crate::schema::{canonicalize_kind, quote_ident, ChildTable, Column, SqlType, TableDefinition, TypeDescriptor};

/// The storage-owned columns of a row being inserted.
pub(crate) enum RowKey<'a> {
    Record {
        created_at: &'a str,
        supersedes: Option<RecordId>,
        provenance: Provenance,
    },
    Paired(RecordId),
    Child { parent_id: i64, position: usize },
}

/// Insert `payload` into `table` and its child tables. Returns the row id.
pub(crate) fn insert_row(
    conn: &Connection,
    table: &TableDefinition,
    key: RowKey<'_>,
    payload: &Payload,
) -> Result<i64> {
    let mut names: Vec<String> = Vec::new();
    let mut values: Vec<SqlValue> = Vec::new();

    match &key {
        RowKey::Record {
            created_at,
            supersedes,
            provenance,
        } => {
            names.extend(["created_at", "supersedes", "provenance"].map(String::from));
            values.push(SqlValue::Text(created_at.to_string()));
            values.push(supersedes.map_or(SqlValue::Null, SqlValue::Integer));
            values.push(SqlValue::Text(provenance.as_str().to_string()));
        }
        RowKey::Paired(id) => {
            names.push("id".into());
            values.push(SqlValue::Integer(*id));
        }
        RowKey::Child {
            parent_id,
            position,
        } => {
            names.extend(["parent_id", "position"].map(String::from));
            values.push(SqlValue::Integer(*parent_id));
            values.push(SqlValue::Integer(*position as i64));
        }
    }

    for column in &table.columns {
        names.push(quote_ident(&column.name));
        values.push(match payload.get(&column.name) {
            Some(value) => to_sql(column, value)?,
            None => SqlValue::Null,
        });
    }

    let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("?{i}")).collect();
    conn.execute(
        &format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&table.name),
            names.join(", "),
            placeholders.join(", ")
        ),
        params_from_iter(values.iter()),
    )?;

    let row_id = match key {
        RowKey::Paired(id) => id,
        _ => conn.last_insert_rowid(),
    };

    for child in &table.children {
        match payload.get(&child.field) {
            None | Some(Value::Null) => {}
            Some(value) if child.repeated => {
                let items = value.as_array().ok_or_else(|| {
                    Error::validation(child.field.as_str(), "expected array")
                })?;
                for (position, item) in items.iter().enumerate() {
                    let element = element_payload(child, item)?;
                    insert_row(
                        conn,
                        &child.table,
                        RowKey::Child {
                            parent_id: row_id,
                            position,
                        },
                        &element,
                    )?;
                }
            }
            Some(value) => {
                let element = element_payload(child, value)?;
                insert_row(
                    conn,
                    &child.table,
                    RowKey::Child {
                        parent_id: row_id,
                        position: 0,
                    },
                    &element,
                )?;
            }
        }
    }

    Ok(row_id)
}

fn element_payload(child: &ChildTable, value: &Value) -> Result<Payload> {
    if child.wrapped {
        let mut payload = Payload::new();
        payload.insert("value".into(), value.clone());
        return Ok(payload);
    }
    value
        .as_object()
        .cloned()
        .ok_or_else(|| Error::validation(child.field.as_str(), "expected object element"))
}

/// Load the payloads of rows `ids` from a record or paired table, children attached.
pub(crate) fn load_payloads(
    conn: &Connection,
    table: &TableDefinition,
    ids: &[RecordId],
) -> Result<HashMap<RecordId, Payload>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let sql = format!(
        "SELECT id{} FROM {} WHERE id IN (SELECT value FROM json_each(?1))",
        column_list(&table.columns),
        quote_ident(&table.name)
    );
    let mut rows = select_rows(conn, &sql, &serde_json::to_string(ids)?, table, 1)?
        .into_iter()
        .map(|(key, _, payload)| (key, payload))
        .collect::<Vec<_>>();
    attach_children(conn, table, &mut rows)?;
    Ok(rows.into_iter().collect())
}

fn attach_children(
    conn: &Connection,
    table: &TableDefinition,
    rows: &mut [(i64, Payload)],
) -> Result<()> {
    if table.children.is_empty() || rows.is_empty() {
        return Ok(());
    }
    let parent_ids: Vec<i64> = rows.iter().map(|(id, _)| *id).collect();
    let parent_json = serde_json::to_string(&parent_ids)?;

    for child in &table.children {
        let sql = format!(
            "SELECT id, parent_id{} FROM {} \
             WHERE parent_id IN (SELECT value FROM json_each(?1)) \
             ORDER BY parent_id, position",
            column_list(&child.table.columns),
            quote_ident(&child.table.name)
        );
        let loaded = select_rows(conn, &sql, &parent_json, &child.table, 2)?;
        let parents: Vec<i64> = loaded.iter().map(|(_, parent, _)| *parent).collect();
        let mut child_rows: Vec<(i64, Payload)> =
            loaded.into_iter().map(|(id, _, payload)| (id, payload)).collect();
        attach_children(conn, &child.table, &mut child_rows)?;

        let mut grouped: HashMap<i64, Vec<Value>> = HashMap::new();
        for (parent, (_, mut payload)) in parents.into_iter().zip(child_rows) {
            let element = if child.wrapped {
                payload.remove("value").unwrap_or(Value::Null)
            } else {
                Value::Object(payload)
            };
            grouped.entry(parent).or_default().push(element);
        }

        for (id, payload) in rows.iter_mut() {
            let elements = grouped.remove(id).unwrap_or_default();
            let value = if child.repeated {
                if elements.is_empty() && child.optional {
                    Value::Null
                } else {
                    Value::Array(elements)
                }
            } else {
                elements.into_iter().next().unwrap_or(Value::Null)
            };
            payload.insert(child.field.clone(), value);
        }
    }
    Ok(())
}

/// Run `sql` (bound to a JSON id array) whose first `key_columns` columns are integer
/// keys followed by `table`'s payload columns. Returns `(id, parent_or_id, payload)`.
fn select_rows(
    conn: &Connection,
    sql: &str,
    ids_json: &str,
    table: &TableDefinition,
    key_columns: usize,
) -> Result<Vec<(i64, i64, Payload)>> {
    let mut stmt = conn.prepare(sql)?;
    let raw: Vec<(i64, i64, Vec<SqlValue>)> = stmt
        .query_map([ids_json], |row| {
            let id: i64 = row.get(0)?;
            let second: i64 = if key_columns > 1 { row.get(1)? } else { id };
            let values = (0..table.columns.len())
                .map(|i| row.get::<_, SqlValue>(key_columns + i))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok((id, second, values))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    raw.into_iter()
        .map(|(id, second, values)| {
            let mut payload = Payload::new();
            for (column, value) in table.columns.iter().zip(values) {
                payload.insert(column.name.clone(), from_sql(column, value)?);
            }
            Ok((id, second, payload))
        })
        .collect()
}

fn column_list(columns: &[Column]) -> String {
    columns
        .iter()
        .map(|c| format!(", {}", quote_ident(&c.name)))
        .collect()
}

/// Encode a validated JSON value for `column`.
pub(crate) fn to_sql(column: &Column, value: &Value) -> Result<SqlValue> {
    let bad = || {
        Error::validation(
            column.name.as_str(),
            format!("expected {}", column.kind),
        )
    };
    if value.is_null() {
        return Ok(SqlValue::Null);
    }
    Ok(match column.sql_type {
        SqlType::Text => SqlValue::Text(value.as_str().ok_or_else(bad)?.to_string()),
        SqlType::Real => SqlValue::Real(value.as_f64().ok_or_else(bad)?),
        SqlType::Integer => SqlValue::Integer(value.as_i64().ok_or_else(bad)?),
        SqlType::Boolean => SqlValue::Integer(i64::from(value.as_bool().ok_or_else(bad)?)),
        SqlType::Blob => {
            let items = value.as_array().ok_or_else(bad)?;
            let bytes = items
                .iter()
                .map(|b| b.as_u64().and_then(|n| u8::try_from(n).ok()))
                .collect::<Option<Vec<u8>>>()
                .ok_or_else(bad)?;
            SqlValue::Blob(bytes)
        }
        SqlType::Json => SqlValue::Text(canonicalize_kind(&column.kind, value).to_string()),
    })
}

/// Decode a stored value of `column` back to JSON.
pub(crate) fn from_sql(column: &Column, value: SqlValue) -> Result<Value> {
    let decoded = match (column.sql_type, value) {
        (_, SqlValue::Null) => Value::Null,
        (SqlType::Json, SqlValue::Text(text)) => serde_json::from_str(&text)?,
        (SqlType::Text, SqlValue::Text(text)) => Value::String(text),
        // REAL affinity turns a stored 1 into 1.0.
        (SqlType::Real, SqlValue::Real(f)) => number_value(f),
        (SqlType::Real, SqlValue::Integer(i)) => Value::from(i),
        (SqlType::Integer, SqlValue::Integer(i)) => Value::from(i),
        (SqlType::Boolean, SqlValue::Integer(i)) => Value::Bool(i != 0),
        (SqlType::Blob, SqlValue::Blob(bytes)) => {
            Value::Array(bytes.into_iter().map(Value::from).collect())
        }
        (sql_type, other) => {
            return Err(Error::validation(
                column.name.as_str(),
                format!(
                    "stored {:?} does not fit declared type {}",
                    other.data_type(),
                    sql_type.as_sql()
                ),
            ))
        }
    };
    Ok(decoded)
}

/// Reorder a payload's keys to follow its descriptor.
pub(crate) fn canonical_payload(descriptor: &TypeDescriptor, payload: Payload) -> Payload {
    match descriptor.canonicalize(&Value::Object(payload)) {
        Value::Object(map) => map,
        _ => Payload::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{compile, migrate, Field, FieldKind, TableRole};
    use serde_json::json;

    fn plan_table(conn: &Connection) -> TableDefinition {
        let step = TypeDescriptor::new(vec![
            Field::required("name", FieldKind::string()),
            Field::required("tools", FieldKind::array_of(FieldKind::string())).indexed(),
        ]);
        let descriptor = TypeDescriptor::new(vec![
            Field::required("title", FieldKind::string()),
            Field::required("steps", FieldKind::array_of(FieldKind::Object(step))),
            Field::optional("grid", FieldKind::array_of(FieldKind::array_of(FieldKind::integer()))),
            Field::optional("raw", FieldKind::bytes()),
            Field::required("done", FieldKind::boolean()),
        ]);
        let table = compile("plans", &descriptor, TableRole::Record).unwrap();
        let plan = migrate::reconcile(conn, &table).unwrap();
        migrate::apply(conn, &plan).unwrap();
        table
    }

    #[test]
    fn nested_payload_survives_insert_and_load() {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        let table = plan_table(&conn);

        let payload = json!({
            "title": "bake",
            "steps": [
                {"name": "mix", "tools": ["bowl", "whisk"]},
                {"name": "heat", "tools": []}
            ],
            "grid": [[1, 2], [3]],
            "raw": [0, 7, 255],
            "done": true
        });
        let payload = payload.as_object().unwrap().clone();
        let id = insert_row(
            &conn,
            &table,
            RowKey::Record {
                created_at: "2026-01-01T00:00:00Z",
                supersedes: None,
                provenance: Provenance::Stored,
            },
            &payload,
        )
        .unwrap();

        let mut loaded = load_payloads(&conn, &table, &[id]).unwrap();
        let descriptor_order = loaded.remove(&id).unwrap();
        assert_eq!(Value::Object(descriptor_order), Value::Object(payload));
    }

    #[test]
    fn absent_optional_collections_load_as_null() {
        let conn = Connection::open_in_memory().unwrap();
        let table = plan_table(&conn);
        let payload = json!({"title": "t", "steps": [], "done": false});
        let id = insert_row(
            &conn,
            &table,
            RowKey::Record {
                created_at: "now",
                supersedes: None,
                provenance: Provenance::Stored,
            },
            payload.as_object().unwrap(),
        )
        .unwrap();

        let loaded = load_payloads(&conn, &table, &[id]).unwrap();
        let row = &loaded[&id];
        assert_eq!(row["steps"], json!([]));
        assert_eq!(row["grid"], Value::Null);
        assert_eq!(row["raw"], Value::Null);
        assert_eq!(row["done"], json!(false));
    }

    #[test]
    fn integral_numbers_read_back_as_integers() {
        let column = Column {
            name: "confidence".into(),
            sql_type: SqlType::Real,
            nullable: true,
            indexed: false,
            kind: FieldKind::number(),
        };
        assert_eq!(from_sql(&column, SqlValue::Real(1.0)).unwrap(), json!(1));
        assert_eq!(from_sql(&column, SqlValue::Real(-3.0)).unwrap(), json!(-3));
        assert_eq!(from_sql(&column, SqlValue::Real(0.25)).unwrap(), json!(0.25));
        assert_eq!(from_sql(&column, SqlValue::Real(1e300)).unwrap(), json!(1e300));

        let scores = Column {
            name: "scores".into(),
            sql_type: SqlType::Json,
            nullable: true,
            indexed: false,
            kind: FieldKind::array_of(FieldKind::number()),
        };
        assert_eq!(
            to_sql(&scores, &json!([1.0, 0.5])).unwrap(),
            SqlValue::Text("[1,0.5]".into())
        );
    }

    #[test]
    fn to_sql_rejects_mismatched_values() {
        let column = Column {
            name: "n".into(),
            sql_type: SqlType::Integer,
            nullable: false,
            indexed: false,
            kind: FieldKind::integer(),
        };
        assert!(to_sql(&column, &json!("x")).is_err());
        assert_eq!(to_sql(&column, &json!(3)).unwrap(), SqlValue::Integer(3));
    }
}
