//! Read path — filters, lazy record sequences, and hydration.
//!
//! A [`FindQuery`] compiles to one WHERE clause over the joined input/output tables.
//! [`Records`] walks the matching ids in keyset pages, hydrating each page on demand,
//! and can be restarted from the beginning.

use std::collections::VecDeque;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::rows::{canonical_payload, load_payloads, to_sql};
use super::types::{Provenance, Record, RecordId};
use super::validate::validate_kind;
use super::Agent;
use crate::error::{Error, Result};
use crate::schema::{quote_ident, ChildTable, Column, SqlType, TableDefinition};

const PAGE_SIZE: usize = 64;

/// Comparison operators accepted in filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    /// SQL `LIKE` pattern match on text.
    Like,
    /// Membership in a list of values.
    In,
    /// `true` matches NULL, `false` matches NOT NULL.
    Null,
}

impl Op {
    fn parse(key: &str) -> Option<Self> {
        Some(match key {
            "$eq" => Self::Eq,
            "$ne" => Self::Ne,
            "$gt" => Self::Gt,
            "$gte" => Self::Gte,
            "$lt" => Self::Lt,
            "$lte" => Self::Lte,
            "$like" => Self::Like,
            "$in" => Self::In,
            "$null" => Self::Null,
            _ => return None,
        })
    }

    fn sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Like => "LIKE",
            Self::In => "IN",
            Self::Null => "IS NULL",
        }
    }
}

/// One predicate on a field path. Dotted paths reach into JSON columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub path: String,
    pub op: Op,
    pub value: Value,
}

/// A conjunction of conditions over one side of an agent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality condition.
    pub fn eq(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(path, Op::Eq, value)
    }

    pub fn with(mut self, path: impl Into<String>, op: Op, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition {
            path: path.into(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Parse `{"field": value}` or `{"field": {"$op": value, ...}}`. `null` matches nulls.
    pub fn from_json(value: &Value) -> Result<Self> {
        let object = match value {
            Value::Null => return Ok(Self::default()),
            Value::Object(object) => object,
            _ => return Err(Error::validation("$", "filter must be an object")),
        };

        let mut filter = Self::default();
        for (path, spec) in object {
            match spec {
                Value::Object(ops) if !ops.is_empty() && ops.keys().all(|k| k.starts_with('$')) => {
                    for (key, operand) in ops {
                        let op = Op::parse(key).ok_or_else(|| {
                            Error::validation(path.as_str(), format!("unknown operator {key}"))
                        })?;
                        filter = filter.with(path.as_str(), op, operand.clone());
                    }
                }
                Value::Null => filter = filter.with(path.as_str(), Op::Null, true),
                other => filter = filter.eq(path.as_str(), other.clone()),
            }
        }
        Ok(filter)
    }

    /// Partial payload as an all-equality filter.
    pub fn from_payload(payload: &super::Payload) -> Self {
        payload.iter().fold(Self::default(), |filter, (k, v)| {
            if v.is_null() {
                filter.with(k.as_str(), Op::Null, true)
            } else {
                filter.eq(k.as_str(), v.clone())
            }
        })
    }
}

/// Selection over an agent's records.
#[derive(Debug, Clone, Default)]
pub struct FindQuery {
    pub input: Filter,
    pub output: Filter,
    pub provenance: Option<Provenance>,
    /// Also return records that have been superseded by an edit.
    pub include_history: bool,
}

impl FindQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(mut self, filter: Filter) -> Self {
        self.input = filter;
        self
    }

    pub fn output(mut self, filter: Filter) -> Self {
        self.output = filter;
        self
    }

    pub fn provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = Some(provenance);
        self
    }

    pub fn with_history(mut self) -> Self {
        self.include_history = true;
        self
    }
}

/// A compiled selection bound to a connection.
#[derive(Debug, Clone)]
pub struct RecordQuery<'a> {
    conn: &'a Connection,
    agent: &'a Agent,
    from_where: String,
    params: Vec<SqlValue>,
}

impl<'a> RecordQuery<'a> {
    /// Matching ids in ascending order.
    pub fn ids(&self) -> Result<Vec<RecordId>> {
        self.select_ids("ORDER BY i.id ASC", &[])
    }

    pub fn count(&self) -> Result<u64> {
        let n: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) {}", self.from_where),
            params_from_iter(self.params.iter()),
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    /// Lazy sequence of matching records, oldest first.
    pub fn iter(&self) -> Records<'a> {
        Records {
            query: self.clone(),
            after: 0,
            buffer: VecDeque::new(),
            done: false,
        }
    }

    pub fn collect(&self) -> Result<Vec<Record>> {
        self.iter().collect()
    }

    /// The `n` newest matching records, newest first.
    pub fn latest(&self, n: usize) -> Result<Vec<Record>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let ids = self.select_ids("ORDER BY i.id DESC LIMIT ?", &[SqlValue::Integer(n as i64)])?;
        hydrate(self.conn, self.agent, &ids)
    }

    fn select_ids(&self, tail: &str, extra: &[SqlValue]) -> Result<Vec<RecordId>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT i.id {} {tail}", self.from_where))?;
        let ids = stmt
            .query_map(params_from_iter(self.params.iter().chain(extra)), |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}

/// Lazy, finite, restartable sequence of records.
pub struct Records<'a> {
    query: RecordQuery<'a>,
    after: RecordId,
    buffer: VecDeque<Record>,
    done: bool,
}

impl Records<'_> {
    /// Start over from the first matching record.
    pub fn restart(&mut self) {
        self.after = 0;
        self.buffer.clear();
        self.done = false;
    }

    fn fill(&mut self) -> Result<()> {
        let ids = self.query.select_ids(
            "AND i.id > ? ORDER BY i.id ASC LIMIT ?",
            &[SqlValue::Integer(self.after), SqlValue::Integer(PAGE_SIZE as i64)],
        )?;
        if ids.len() < PAGE_SIZE {
            self.done = true;
        }
        if let Some(last) = ids.last() {
            self.after = *last;
        }
        self.buffer
            .extend(hydrate(self.query.conn, self.query.agent, &ids)?);
        Ok(())
    }
}

impl Iterator for Records<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.buffer.is_empty() && !self.done {
            if let Err(e) = self.fill() {
                self.done = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

impl Agent {
    /// Compile `query` against this agent's tables.
    pub fn query<'a>(&'a self, conn: &'a Connection, query: &FindQuery) -> Result<RecordQuery<'a>> {
        let input = quote_ident(&self.input.table.name);
        let output = quote_ident(&self.output.table.name);
        // `WHERE 1 = 1` lets every clause start with AND, paging included.
        let mut from_where = format!("FROM {input} i JOIN {output} o ON o.id = i.id WHERE 1 = 1");
        let mut params = Vec::new();

        if !query.include_history {
            from_where.push_str(&format!(
                " AND NOT EXISTS (SELECT 1 FROM {input} s WHERE s.supersedes = i.id)"
            ));
        }
        if let Some(provenance) = query.provenance {
            from_where.push_str(" AND i.provenance = ?");
            params.push(SqlValue::Text(provenance.as_str().to_string()));
        }
        for condition in query.input.conditions() {
            push_condition(&mut from_where, &mut params, "i", &self.input.table, condition)?;
        }
        for condition in query.output.conditions() {
            push_condition(&mut from_where, &mut params, "o", &self.output.table, condition)?;
        }

        Ok(RecordQuery {
            conn,
            agent: self,
            from_where,
            params,
        })
    }

    /// Records matching `query`, superseded ones hidden unless history is requested.
    pub fn find<'a>(&'a self, conn: &'a Connection, query: &FindQuery) -> Result<Records<'a>> {
        Ok(self.query(conn, query)?.iter())
    }

    /// One record by id, superseded or not.
    pub fn get(&self, conn: &Connection, id: RecordId) -> Result<Record> {
        hydrate(conn, self, &[id])?
            .pop()
            .ok_or(Error::NotFound(id))
    }

    /// The supersession chain from `id` back to its root, newest first.
    pub fn history(&self, conn: &Connection, id: RecordId) -> Result<Vec<Record>> {
        let mut chain = Vec::new();
        let mut next = Some(id);
        while let Some(current) = next {
            if chain.iter().any(|r: &Record| r.id == current) {
                break;
            }
            let record = match self.get(conn, current) {
                Ok(record) => record,
                // The root of a chain may have been deleted.
                Err(Error::NotFound(_)) if !chain.is_empty() => break,
                Err(e) => return Err(e),
            };
            next = record.supersedes;
            chain.push(record);
        }
        Ok(chain)
    }

    /// Whether another record supersedes `id`.
    pub fn is_superseded(&self, conn: &Connection, id: RecordId) -> Result<bool> {
        let found: Option<i64> = conn
            .query_row(
                &format!(
                    "SELECT id FROM {} WHERE supersedes = ?1 LIMIT 1",
                    quote_ident(&self.input.table.name)
                ),
                [id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

fn push_condition(
    sql: &mut String,
    params: &mut Vec<SqlValue>,
    alias: &str,
    table: &TableDefinition,
    condition: &Condition,
) -> Result<()> {
    let path = condition.path.as_str();
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };

    if let Some(child) = table.child(head) {
        let clause = child_clause(alias, child, rest, condition, params)?;
        sql.push_str(&format!(" AND {clause}"));
        return Ok(());
    }

    let column = table
        .column(head)
        .ok_or_else(|| Error::validation(path, "unknown field"))?;

    let target = match rest {
        Some(json_path) => {
            if column.sql_type != SqlType::Json {
                return Err(Error::validation(path, "nested paths need a JSON column"));
            }
            params.push(SqlValue::Text(format!("$.{json_path}")));
            format!("json_extract({alias}.{}, ?)", quote_ident(&column.name))
        }
        None => format!("{alias}.{}", quote_ident(&column.name)),
    };
    let clause = comparison(&target, column, rest.is_some(), condition, params)?;
    sql.push_str(&format!(" AND {clause}"));
    Ok(())
}

/// `condition` applied to `target`, pushing its operands onto `params` in placeholder order.
fn comparison(
    target: &str,
    column: &Column,
    json: bool,
    condition: &Condition,
    params: &mut Vec<SqlValue>,
) -> Result<String> {
    let path = condition.path.as_str();
    // Operand encoding: column encoding at the top level, raw JSON scalars inside JSON.
    let encode = |value: &Value| -> Result<SqlValue> {
        if json {
            return Ok(json_operand(value));
        }
        validate_kind(&column.kind, value, path)?;
        to_sql(column, value)
    };

    Ok(match condition.op {
        Op::Null => {
            let test = if null_operand(condition)? { "IS NULL" } else { "IS NOT NULL" };
            format!("{target} {test}")
        }
        Op::Eq | Op::Ne if condition.value.is_null() => {
            let test = if condition.op == Op::Eq { "IS NULL" } else { "IS NOT NULL" };
            format!("{target} {test}")
        }
        Op::Like => {
            let pattern = condition
                .value
                .as_str()
                .ok_or_else(|| Error::validation(path, "$like expects a string pattern"))?;
            params.push(SqlValue::Text(pattern.to_string()));
            format!("{target} LIKE ?")
        }
        Op::In => {
            let items = condition
                .value
                .as_array()
                .ok_or_else(|| Error::validation(path, "$in expects an array"))?;
            if items.is_empty() {
                return Ok("0".into());
            }
            for item in items {
                params.push(encode(item)?);
            }
            let placeholders = vec!["?"; items.len()].join(", ");
            format!("{target} IN ({placeholders})")
        }
        op => {
            params.push(encode(&condition.value)?);
            format!("{target} {} ?", op.sql())
        }
    })
}

fn null_operand(condition: &Condition) -> Result<bool> {
    condition
        .value
        .as_bool()
        .ok_or_else(|| Error::validation(condition.path.as_str(), "$null expects a boolean"))
}

/// Conditions on a field stored in a child table, as `EXISTS` subqueries.
///
/// `steps.name` matches when any element's `name` matches. On the field itself, `$eq`
/// and `$ne` with a whole value compare every element in order and `$null` tests for
/// absence. Arrays of scalars also take a single element: `{"tags": "x"}` matches
/// records tagged `x`, and the other operators match when some element satisfies them.
fn child_clause(
    alias: &str,
    child: &ChildTable,
    rest: Option<&str>,
    condition: &Condition,
    params: &mut Vec<SqlValue>,
) -> Result<String> {
    let path = condition.path.as_str();
    let rows = format!(
        "FROM {} c WHERE c.parent_id = {alias}.id",
        quote_ident(&child.table.name)
    );

    if let Some(field) = rest {
        if child.wrapped {
            return Err(Error::validation(path, "elements of this field have no named fields"));
        }
        let column = child
            .table
            .column(field)
            .ok_or_else(|| Error::validation(path, "unknown field"))?;
        let target = format!("c.{}", quote_ident(&column.name));
        let clause = comparison(&target, column, false, condition, params)?;
        return Ok(format!("EXISTS (SELECT 1 {rows} AND {clause})"));
    }

    let whole_value = !child.wrapped || condition.value.is_array();
    match condition.op {
        Op::Null => {
            let test = if null_operand(condition)? { "NOT EXISTS" } else { "EXISTS" };
            Ok(format!("{test} (SELECT 1 {rows})"))
        }
        Op::Eq | Op::Ne if condition.value.is_null() => {
            let test = if condition.op == Op::Eq { "NOT EXISTS" } else { "EXISTS" };
            Ok(format!("{test} (SELECT 1 {rows})"))
        }
        Op::Eq | Op::Ne if whole_value => {
            let exact = exact_match(&rows, child, path, &condition.value, params)?;
            Ok(if condition.op == Op::Eq { exact } else { format!("NOT {exact}") })
        }
        _ if child.wrapped => {
            let column = child.table.column("value").ok_or_else(|| {
                Error::validation(path, "elements stored in nested tables cannot be compared")
            })?;
            let target = format!("c.{}", quote_ident(&column.name));
            // `$ne` on one element: no element equals it.
            if condition.op == Op::Ne {
                let equal = Condition {
                    op: Op::Eq,
                    ..condition.clone()
                };
                let clause = comparison(&target, column, false, &equal, params)?;
                return Ok(format!("NOT EXISTS (SELECT 1 {rows} AND {clause})"));
            }
            let clause = comparison(&target, column, false, condition, params)?;
            Ok(format!("EXISTS (SELECT 1 {rows} AND {clause})"))
        }
        _ => Err(Error::validation(
            path,
            "objects stored in a child table support $eq, $ne and $null",
        )),
    }
}

/// The child rows of a record are exactly `value`: same count, and each position
/// holds a row whose every column matches.
fn exact_match(
    rows: &str,
    child: &ChildTable,
    path: &str,
    value: &Value,
    params: &mut Vec<SqlValue>,
) -> Result<String> {
    if !child.table.children.is_empty() {
        return Err(Error::validation(
            path,
            "elements stored in nested tables cannot be compared",
        ));
    }
    let elements: Vec<&Value> = if child.repeated {
        value
            .as_array()
            .ok_or_else(|| Error::validation(path, "expected an array"))?
            .iter()
            .collect()
    } else {
        vec![value]
    };

    let mut clauses = vec![format!("(SELECT COUNT(*) {rows}) = {}", elements.len())];
    for (position, element) in elements.into_iter().enumerate() {
        let element_path = if child.repeated {
            format!("{path}[{position}]")
        } else {
            path.to_string()
        };
        let mut tests = vec![format!("c.position = {position}")];
        if child.wrapped {
            push_element_test(
                &mut tests,
                params,
                &child.table.columns,
                "value",
                Some(element),
                &element_path,
            )?;
        } else {
            let fields = element
                .as_object()
                .ok_or_else(|| Error::validation(element_path.as_str(), "expected an object"))?;
            if let Some(unknown) = fields.keys().find(|key| child.table.column(key).is_none()) {
                return Err(Error::validation(
                    format!("{element_path}.{unknown}"),
                    "unknown field",
                ));
            }
            for column in &child.table.columns {
                push_element_test(
                    &mut tests,
                    params,
                    &child.table.columns,
                    &column.name,
                    fields.get(&column.name),
                    &element_path,
                )?;
            }
        }
        clauses.push(format!(
            "EXISTS (SELECT 1 {rows} AND {})",
            tests.join(" AND ")
        ));
    }
    Ok(format!("({})", clauses.join(" AND ")))
}

fn push_element_test(
    tests: &mut Vec<String>,
    params: &mut Vec<SqlValue>,
    columns: &[Column],
    name: &str,
    value: Option<&Value>,
    path: &str,
) -> Result<()> {
    let column = columns
        .iter()
        .find(|c| c.name == name)
        .ok_or_else(|| Error::validation(path, "unknown field"))?;
    let target = format!("c.{}", quote_ident(&column.name));
    match value {
        None | Some(Value::Null) => tests.push(format!("{target} IS NULL")),
        Some(value) => {
            validate_kind(&column.kind, value, path)?;
            params.push(to_sql(column, value)?);
            tests.push(format!("{target} = ?"));
        }
    }
    Ok(())
}

fn json_operand(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Load full records for `ids`, in the given order. Unknown ids are skipped.
pub(crate) fn hydrate(conn: &Connection, agent: &Agent, ids: &[RecordId]) -> Result<Vec<Record>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let ids_json = serde_json::to_string(ids)?;
    let mut stmt = conn.prepare(&format!(
        "SELECT id, created_at, supersedes, provenance FROM {} \
         WHERE id IN (SELECT value FROM json_each(?1))",
        quote_ident(&agent.input.table.name)
    ))?;
    let meta: Vec<(RecordId, String, Option<RecordId>, String)> = stmt
        .query_map([&ids_json], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut inputs = load_payloads(conn, &agent.input.table, ids)?;
    let mut outputs = load_payloads(conn, &agent.output.table, ids)?;

    let mut by_id = std::collections::HashMap::with_capacity(meta.len());
    for (id, created_at, supersedes, provenance) in meta {
        let provenance = provenance
            .parse::<Provenance>()
            .map_err(|e| Error::validation("provenance", e))?;
        let input = inputs.remove(&id).unwrap_or_default();
        let output = outputs.remove(&id).unwrap_or_default();
        by_id.insert(
            id,
            Record {
                id,
                created_at,
                supersedes,
                provenance,
                input: canonical_payload(&agent.input.descriptor, input),
                output: canonical_payload(&agent.output.descriptor, output),
            },
        );
    }

    Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
}
