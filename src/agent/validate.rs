//! Payload validation against type descriptors.
//!
//! Errors name the first failing path, e.g. `steps[2].name`.

use serde_json::Value;

use crate::error::{Error, Result};
use crate::schema::{FieldKind, ScalarKind, TypeDescriptor};

/// Full validation: every required field present and non-null, no unknown fields.
pub fn validate(descriptor: &TypeDescriptor, value: &Value) -> Result<()> {
    check_object(descriptor, value, "", false)
}

/// Like [`validate`] but missing top-level fields are allowed. Used for edit overrides
/// and query fragments.
pub fn validate_partial(descriptor: &TypeDescriptor, value: &Value) -> Result<()> {
    check_object(descriptor, value, "", true)
}

/// Validate a single value against `kind`, reporting `path` on failure.
pub fn validate_kind(kind: &FieldKind, value: &Value, path: &str) -> Result<()> {
    check_kind(kind, value, path)
}

fn check_object(descriptor: &TypeDescriptor, value: &Value, prefix: &str, partial: bool) -> Result<()> {
    let object = value.as_object().ok_or_else(|| {
        Error::validation(display_path(prefix), format!("expected object, got {}", type_name(value)))
    })?;

    for key in object.keys() {
        if descriptor.field(key).is_none() {
            return Err(Error::validation(join(prefix, key), "unknown field"));
        }
    }

    for field in &descriptor.fields {
        let path = join(prefix, &field.name);
        match object.get(&field.name) {
            None if partial => {}
            None | Some(Value::Null) if !field.optional => {
                return Err(Error::validation(path, "required field is missing"));
            }
            None | Some(Value::Null) => {}
            Some(v) => check_kind(&field.kind, v, &path)?,
        }
    }
    Ok(())
}

fn check_kind(kind: &FieldKind, value: &Value, path: &str) -> Result<()> {
    let ok = match kind {
        FieldKind::Scalar(ScalarKind::String) => value.is_string(),
        FieldKind::Scalar(ScalarKind::Number) => value.is_number(),
        FieldKind::Scalar(ScalarKind::Integer) => value.as_i64().is_some(),
        FieldKind::Scalar(ScalarKind::Boolean) => value.is_boolean(),
        FieldKind::Scalar(ScalarKind::Bytes) => value.as_array().is_some_and(|items| {
            items
                .iter()
                .all(|b| b.as_u64().is_some_and(|n| n <= u64::from(u8::MAX)))
        }),
        FieldKind::Array(element) => {
            let items = value.as_array().ok_or_else(|| mismatch(kind, value, path))?;
            for (i, item) in items.iter().enumerate() {
                check_kind(element, item, &format!("{path}[{i}]"))?;
            }
            true
        }
        FieldKind::Object(descriptor) => {
            check_object(descriptor, value, path, false)?;
            true
        }
    };
    if ok {
        Ok(())
    } else {
        Err(mismatch(kind, value, path))
    }
}

fn mismatch(kind: &FieldKind, value: &Value, path: &str) -> Error {
    Error::validation(
        display_path(path),
        format!("expected {kind}, got {}", type_name(value)),
    )
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn display_path(path: &str) -> String {
    if path.is_empty() {
        "$".to_string()
    } else {
        path.to_string()
    }
}
