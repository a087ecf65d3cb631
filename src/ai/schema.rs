//! A minimal structural schema validator for LLM completions.
//!
//! The core only needs to check that a completion has the shape the
//! workflow declared — required keys, primitive types, and bounded
//! array/string lengths — not full JSON Schema. A hand-rolled `Schema`
//! keeps the dependency surface the same shape as the rest of the
//! ambient stack (serde_json only) instead of pulling in a general
//! validator for a handful of shallow checks.

use serde_json::Value;

#[derive(Debug, Clone)]
pub enum FieldType {
    String { min_len: usize, max_len: usize },
    StringArray { min_items: usize, max_items: usize },
    Integer,
    Boolean,
    Object(Vec<Field>),
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: &'static str,
    pub required: bool,
    pub kind: FieldType,
}

#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

/// Renders `schema` as the wire-format JSON object passed to `LLMPort::complete`
/// — a conventional `{type: object, properties, required}` shape so the
/// provider-side schema enforcement (if any) has something to key off.
pub fn to_wire_schema(schema: &Schema) -> Value {
    fn field_schema(kind: &FieldType) -> Value {
        match kind {
            FieldType::String { min_len, max_len } => {
                serde_json::json!({"type": "string", "minLength": min_len, "maxLength": max_len})
            }
            FieldType::StringArray { min_items, max_items } => {
                serde_json::json!({"type": "array", "items": {"type": "string"}, "minItems": min_items, "maxItems": max_items})
            }
            FieldType::Integer => serde_json::json!({"type": "integer"}),
            FieldType::Boolean => serde_json::json!({"type": "boolean"}),
            FieldType::Object(nested) => object_schema(nested),
        }
    }

    fn object_schema(fields: &[Field]) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for field in fields {
            properties.insert(field.name.to_string(), field_schema(&field.kind));
            if field.required {
                required.push(Value::String(field.name.to_string()));
            }
        }
        serde_json::json!({"type": "object", "properties": properties, "required": required})
    }

    object_schema(&schema.fields)
}

/// Checks `value` is a JSON object matching `schema`. Returns every
/// violation found (not just the first) so the corrective regeneration
/// prefix can name them all.
pub fn validate(schema: &Schema, value: &Value) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    validate_fields(&schema.fields, value, &mut errors, "");
    errors
}

fn validate_fields(fields: &[Field], value: &Value, errors: &mut Vec<ValidationError>, path_prefix: &str) {
    let Some(obj) = value.as_object() else {
        errors.push(ValidationError {
            field: path_prefix.to_string(),
            reason: "expected a JSON object".into(),
        });
        return;
    };

    for field in fields {
        let path = format!("{path_prefix}{}", field.name);
        match obj.get(field.name) {
            None => {
                if field.required {
                    errors.push(ValidationError {
                        field: path,
                        reason: "missing required field".into(),
                    });
                }
            }
            Some(v) => validate_one(&field.kind, v, errors, &path),
        }
    }
}

fn validate_one(kind: &FieldType, v: &Value, errors: &mut Vec<ValidationError>, path: &str) {
    match kind {
        FieldType::String { min_len, max_len } => match v.as_str() {
            Some(s) if s.chars().count() >= *min_len && s.chars().count() <= *max_len => {}
            Some(s) => errors.push(ValidationError {
                field: path.to_string(),
                reason: format!("string length {} outside [{min_len}, {max_len}]", s.chars().count()),
            }),
            None => errors.push(ValidationError {
                field: path.to_string(),
                reason: "expected a string".into(),
            }),
        },
        FieldType::StringArray { min_items, max_items } => match v.as_array() {
            Some(arr) if arr.len() >= *min_items && arr.len() <= *max_items && arr.iter().all(|e| e.is_string()) => {}
            Some(arr) => errors.push(ValidationError {
                field: path.to_string(),
                reason: format!("array of {} items outside [{min_items}, {max_items}], or non-string element", arr.len()),
            }),
            None => errors.push(ValidationError {
                field: path.to_string(),
                reason: "expected an array of strings".into(),
            }),
        },
        FieldType::Integer => {
            if v.as_i64().is_none() {
                errors.push(ValidationError {
                    field: path.to_string(),
                    reason: "expected an integer".into(),
                });
            }
        }
        FieldType::Boolean => {
            if v.as_bool().is_none() {
                errors.push(ValidationError {
                    field: path.to_string(),
                    reason: "expected a boolean".into(),
                });
            }
        }
        FieldType::Object(nested) => {
            let nested_prefix = format!("{path}.");
            validate_fields(nested, v, errors, &nested_prefix);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_required_field_is_reported() {
        let schema = Schema {
            fields: vec![Field {
                name: "headline",
                required: true,
                kind: FieldType::String { min_len: 1, max_len: 200 },
            }],
        };
        let errors = validate(&schema, &json!({}));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "headline");
    }

    #[test]
    fn array_bounds_are_enforced() {
        let schema = Schema {
            fields: vec![Field {
                name: "wins",
                required: true,
                kind: FieldType::StringArray { min_items: 0, max_items: 3 },
            }],
        };
        let ok = validate(&schema, &json!({"wins": ["a", "b"]}));
        assert!(ok.is_empty());
        let bad = validate(&schema, &json!({"wins": ["a", "b", "c", "d"]}));
        assert_eq!(bad.len(), 1);
    }
}
