//! Schema validation for `schema` assertions
//!
//! The built-in validator understands the commonly used subset of JSON
//! Schema: `type` (single or list), `required`, `properties`, `items`,
//! `enum`, `minimum`, `maximum`, `minLength`, `maxLength`. Other keywords are
//! ignored.

use serde_json::Value;

pub trait SchemaValidator: Send + Sync {
    /// `Err` carries a human-readable description of the first violation
    fn validate(&self, value: &Value, schema: &Value) -> Result<(), String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BasicSchemaValidator;

impl SchemaValidator for BasicSchemaValidator {
    fn validate(&self, value: &Value, schema: &Value) -> Result<(), String> {
        check(value, schema, "$")
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn matches_type(value: &Value, expected: &str) -> bool {
    let actual = type_name(value);
    actual == expected || (expected == "number" && actual == "integer")
}

fn check(value: &Value, schema: &Value, at: &str) -> Result<(), String> {
    let Some(schema) = schema.as_object() else {
        // `true`/`{}` accept everything; `false` accepts nothing
        return match schema {
            Value::Bool(false) => Err(format!("{}: no value is allowed here", at)),
            _ => Ok(()),
        };
    };

    if let Some(expected) = schema.get("type") {
        let allowed: Vec<&str> = match expected {
            Value::String(t) => vec![t.as_str()],
            Value::Array(types) => types.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        if !allowed.is_empty() && !allowed.iter().any(|t| matches_type(value, t)) {
            return Err(format!(
                "{}: expected {}, got {}",
                at,
                allowed.join(" or "),
                type_name(value)
            ));
        }
    }

    if let Some(options) = schema.get("enum").and_then(Value::as_array) {
        if !options.contains(value) {
            return Err(format!("{}: {} is not one of the allowed values", at, value));
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
            if n < min {
                return Err(format!("{}: {} is less than minimum {}", at, n, min));
            }
        }
        if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
            if n > max {
                return Err(format!("{}: {} is greater than maximum {}", at, n, max));
            }
        }
    }

    if let Some(s) = value.as_str() {
        let len = s.chars().count() as u64;
        if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
            if len < min {
                return Err(format!("{}: length {} is shorter than {}", at, len, min));
            }
        }
        if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
            if len > max {
                return Err(format!("{}: length {} is longer than {}", at, len, max));
            }
        }
    }

    if let Some(object) = value.as_object() {
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for key in required.iter().filter_map(Value::as_str) {
                if !object.contains_key(key) {
                    return Err(format!("{}: missing required property '{}'", at, key));
                }
            }
        }
        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (key, property_schema) in properties {
                if let Some(property) = object.get(key) {
                    check(property, property_schema, &format!("{}.{}", at, key))?;
                }
            }
        }
    }

    if let (Some(items), Some(item_schema)) = (value.as_array(), schema.get("items")) {
        for (index, item) in items.iter().enumerate() {
            check(item, item_schema, &format!("{}[{}]", at, index))?;
        }
    }

    Ok(())
}
