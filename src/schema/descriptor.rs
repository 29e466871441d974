//! Normalized type descriptors.
//!
//! A [`TypeDescriptor`] is an ordered list of [`Field`]s, each a scalar, an array, or a
//! nested object. Descriptors are built directly, deserialized from their native JSON
//! form, or derived from a JSON Schema (including one produced by `schemars`).

use std::collections::HashSet;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::{Error, Result};

/// Leaf value kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarKind {
    String,
    Number,
    Integer,
    Boolean,
    /// Raw bytes, carried in JSON as an array of `0..=255`.
    Bytes,
}

impl ScalarKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Bytes => "bytes",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Scalar(ScalarKind),
    Array(Box<FieldKind>),
    Object(TypeDescriptor),
}

impl FieldKind {
    pub fn string() -> Self {
        Self::Scalar(ScalarKind::String)
    }

    pub fn number() -> Self {
        Self::Scalar(ScalarKind::Number)
    }

    pub fn integer() -> Self {
        Self::Scalar(ScalarKind::Integer)
    }

    pub fn boolean() -> Self {
        Self::Scalar(ScalarKind::Boolean)
    }

    pub fn bytes() -> Self {
        Self::Scalar(ScalarKind::Bytes)
    }

    pub fn array_of(element: FieldKind) -> Self {
        Self::Array(Box::new(element))
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Self::Scalar(_))
    }

    /// True when no nested arrays or objects hide below this kind's elements.
    pub fn is_scalar_only(&self) -> bool {
        match self {
            Self::Scalar(_) => true,
            Self::Array(element) => element.is_scalar(),
            Self::Object(descriptor) => descriptor.is_scalar_only(),
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(kind) => f.write_str(kind.as_str()),
            Self::Array(element) => write!(f, "array<{element}>"),
            Self::Object(descriptor) => {
                f.write_str("{")?;
                for (i, field) in descriptor.fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", field.name)?;
                    if field.optional {
                        f.write_str("?")?;
                    }
                    write!(f, ": {}", field.kind)?;
                }
                f.write_str("}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub optional: bool,
    /// Requests an index (scalars) or a child table (arrays and objects).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub indexed: bool,
}

impl Field {
    pub fn required(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: false,
            indexed: false,
        }
    }

    pub fn optional(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            optional: true,
            ..Self::required(name, kind)
        }
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub fields: Vec<Field>,
}

impl TypeDescriptor {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn is_scalar_only(&self) -> bool {
        self.fields.iter().all(|f| f.kind.is_scalar())
    }

    /// Derive a descriptor from a Rust type's JSON Schema.
    pub fn of<T: JsonSchema>() -> Result<Self> {
        let schema = schemars::schema_for!(T);
        Self::from_json_schema(schema.as_value())
    }

    /// Parse either the native form (`{"fields": [...]}`) or a JSON Schema.
    pub fn from_json(value: &Value) -> Result<Self> {
        if value.get("fields").is_some() {
            let descriptor: TypeDescriptor = serde_json::from_value(value.clone())
                .map_err(|e| Error::Schema(format!("invalid descriptor: {e}")))?;
            Ok(descriptor)
        } else {
            Self::from_json_schema(value)
        }
    }

    pub fn from_json_schema(schema: &Value) -> Result<Self> {
        let mut resolver = SchemaResolver {
            root: schema,
            visiting: Vec::new(),
        };
        resolver.object(schema)
    }

    /// Rebuild `value` with object keys in field order. Keys the descriptor does not
    /// know are kept after the known ones.
    pub fn canonicalize(&self, value: &Value) -> Value {
        let Some(object) = value.as_object() else {
            return value.clone();
        };
        let mut out = Map::new();
        for field in &self.fields {
            if let Some(v) = object.get(&field.name) {
                out.insert(field.name.clone(), canonicalize_kind(&field.kind, v));
            }
        }
        for (key, v) in object {
            if !out.contains_key(key) {
                out.insert(key.clone(), v.clone());
            }
        }
        Value::Object(out)
    }
}

/// [`TypeDescriptor::canonicalize`] for a value of any kind.
pub fn canonicalize_kind(kind: &FieldKind, value: &Value) -> Value {
    match (kind, value) {
        (FieldKind::Object(descriptor), Value::Object(_)) => descriptor.canonicalize(value),
        (FieldKind::Array(element), Value::Array(items)) => Value::Array(
            items
                .iter()
                .map(|item| canonicalize_kind(element, item))
                .collect(),
        ),
        (FieldKind::Scalar(ScalarKind::Number), Value::Number(n)) if n.is_f64() => {
            n.as_f64().map_or_else(|| value.clone(), number_value)
        }
        _ => value.clone(),
    }
}

/// A `number` as JSON. Integral values within the exactly representable range become
/// integers, so `1` and `1.0` read back the same from every storage path.
pub fn number_value(f: f64) -> Value {
    const EXACT: f64 = 9_007_199_254_740_992.0;
    if f.fract() == 0.0 && f.abs() <= EXACT {
        Value::from(f as i64)
    } else {
        Number::from_f64(f).map_or(Value::Null, Value::Number)
    }
}

/// Walks a JSON Schema, following `$ref`s and rejecting reference cycles.
struct SchemaResolver<'a> {
    root: &'a Value,
    visiting: Vec<String>,
}

impl<'a> SchemaResolver<'a> {
    fn object(&mut self, schema: &'a Value) -> Result<TypeDescriptor> {
        if let Some(reference) = schema.get("$ref").and_then(Value::as_str) {
            return self.with_ref(reference, |this, target| this.object(target));
        }

        let properties = schema
            .get("properties")
            .and_then(Value::as_object)
            .ok_or_else(|| Error::Schema("object schema without properties".into()))?;

        if schema
            .get("additionalProperties")
            .is_some_and(Value::is_object)
        {
            return Err(Error::Schema(
                "free-form maps (additionalProperties) are unsupported".into(),
            ));
        }

        let required: HashSet<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let mut fields = Vec::with_capacity(properties.len());
        for (name, property) in properties {
            let (kind, nullable) = self
                .kind(property)
                .map_err(|e| match e {
                    Error::Schema(msg) => Error::Schema(format!("{name}: {msg}")),
                    other => other,
                })?;
            fields.push(Field {
                name: name.clone(),
                kind,
                optional: nullable || !required.contains(name.as_str()),
                indexed: false,
            });
        }
        Ok(TypeDescriptor { fields })
    }

    fn kind(&mut self, schema: &'a Value) -> Result<(FieldKind, bool)> {
        if let Some(reference) = schema.get("$ref").and_then(Value::as_str) {
            return self.with_ref(reference, |this, target| this.kind(target));
        }

        for union in ["anyOf", "oneOf"] {
            if let Some(variants) = schema.get(union).and_then(Value::as_array) {
                let (nulls, others): (Vec<&Value>, Vec<&Value>) =
                    variants.iter().partition(|v| is_null_schema(v));
                if others.len() != 1 {
                    return Err(Error::Schema(format!(
                        "{union} with {} non-null variants is unsupported",
                        others.len()
                    )));
                }
                let (kind, nullable) = self.kind(others[0])?;
                return Ok((kind, nullable || !nulls.is_empty()));
            }
        }

        let (type_name, nullable) = match schema.get("type") {
            Some(Value::String(t)) => (t.as_str(), false),
            Some(Value::Array(types)) => {
                let names: Vec<&str> = types.iter().filter_map(Value::as_str).collect();
                let non_null: Vec<&str> = names.iter().copied().filter(|t| *t != "null").collect();
                if non_null.len() != 1 {
                    return Err(Error::Schema(format!("unsupported type union {names:?}")));
                }
                (non_null[0], names.len() > 1)
            }
            None if schema.get("properties").is_some() => ("object", false),
            _ => return Err(Error::Schema("schema has no usable type".into())),
        };

        let kind = match type_name {
            "string" => FieldKind::string(),
            "number" => FieldKind::number(),
            "integer" => FieldKind::integer(),
            "boolean" => FieldKind::boolean(),
            "array" => {
                let items = schema
                    .get("items")
                    .ok_or_else(|| Error::Schema("array schema without items".into()))?;
                let (element, nullable_items) = self.kind(items)?;
                if nullable_items {
                    return Err(Error::Schema("nullable array elements are unsupported".into()));
                }
                FieldKind::array_of(element)
            }
            "object" => FieldKind::Object(self.object(schema)?),
            other => return Err(Error::Schema(format!("unsupported type `{other}`"))),
        };
        Ok((kind, nullable))
    }

    fn with_ref<T>(
        &mut self,
        reference: &str,
        f: impl FnOnce(&mut Self, &'a Value) -> Result<T>,
    ) -> Result<T> {
        if self.visiting.iter().any(|r| r == reference) {
            return Err(Error::Schema(format!("cyclic reference {reference}")));
        }
        let target = resolve_pointer(self.root, reference)?;
        self.visiting.push(reference.to_string());
        let result = f(self, target);
        self.visiting.pop();
        result
    }
}

fn resolve_pointer<'a>(root: &'a Value, reference: &str) -> Result<&'a Value> {
    let pointer = reference
        .strip_prefix('#')
        .ok_or_else(|| Error::Schema(format!("only local references are supported: {reference}")))?;
    root.pointer(pointer)
        .ok_or_else(|| Error::Schema(format!("unresolved reference {reference}")))
}

fn is_null_schema(schema: &Value) -> bool {
    schema.get("type").and_then(Value::as_str) == Some("null")
}
