//! Schema translation
//!
//! Backends describe tool parameters with JSON Schema. The gateway reduces
//! that to a [`ValidatorShape`]: a flat list of typed fields, nested for
//! object properties. Translation never fails; anything it does not
//! understand becomes "accept anything".

use serde_json::{json, Map, Value};

use super::types::PromptArgument;

/// Type check applied to a single field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    String,
    Number,
    Integer,
    Boolean,
    /// Array with unconstrained elements
    Array,
    Object(ValidatorShape),
    Any,
}

impl FieldKind {
    fn name(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::Integer => "integer",
            FieldKind::Boolean => "boolean",
            FieldKind::Array => "array",
            FieldKind::Object(_) => "object",
            FieldKind::Any => "any",
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Array => value.is_array(),
            FieldKind::Object(_) => value.is_object(),
            FieldKind::Any => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub description: Option<String>,
}

/// Argument rejected by a shape
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid argument '{path}': {reason}")]
pub struct SchemaViolation {
    pub path: String,
    pub reason: String,
}

/// Internal validator for a capability's arguments.
///
/// An empty shape accepts anything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatorShape {
    fields: Vec<Field>,
}

/// Translate a foreign JSON Schema into a validator shape
pub fn translate(schema: &Value) -> ValidatorShape {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return ValidatorShape::default();
    };

    if schema
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|t| t != "object")
    {
        return ValidatorShape::default();
    }

    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let fields = properties
        .iter()
        .map(|(name, property)| Field {
            name: name.clone(),
            kind: field_kind(property),
            required: required.contains(&name.as_str()),
            description: property
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
        .collect();

    ValidatorShape { fields }
}

fn field_kind(property: &Value) -> FieldKind {
    // `"type": ["string", "null"]` is treated as its first non-null member
    let type_name = match property.get("type") {
        Some(Value::String(t)) => Some(t.as_str()),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .find(|t| *t != "null"),
        _ => None,
    };

    match type_name {
        Some("string") => FieldKind::String,
        Some("number") => FieldKind::Number,
        Some("integer") => FieldKind::Integer,
        Some("boolean") => FieldKind::Boolean,
        Some("array") => FieldKind::Array,
        Some("object") => FieldKind::Object(translate(property)),
        _ => FieldKind::Any,
    }
}

/// Best-effort shape for prompt arguments: every argument is a string
pub fn prompt_arguments(arguments: &[PromptArgument]) -> ValidatorShape {
    let fields = arguments
        .iter()
        .map(|arg| Field {
            name: arg.name.clone(),
            kind: FieldKind::String,
            required: arg.required,
            description: arg.description.clone(),
        })
        .collect();

    ValidatorShape { fields }
}

impl ValidatorShape {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Render as the JSON Schema republished to frontend clients
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for field in &self.fields {
            let mut property = match &field.kind {
                FieldKind::Object(shape) => shape.to_json_schema(),
                FieldKind::Any => json!({}),
                kind => json!({ "type": kind.name() }),
            };
            if let (Some(description), Some(obj)) = (&field.description, property.as_object_mut()) {
                obj.insert("description".to_string(), Value::String(description.clone()));
            }
            properties.insert(field.name.clone(), property);

            if field.required {
                required.push(Value::String(field.name.clone()));
            }
        }

        let mut schema = json!({ "type": "object", "properties": properties });
        if !required.is_empty() {
            schema["required"] = Value::Array(required);
        }
        schema
    }

    /// Check caller arguments. Fields the shape does not know are passed through.
    pub fn validate(&self, arguments: Option<&Value>) -> Result<(), SchemaViolation> {
        self.validate_at("", arguments)
    }

    fn validate_at(&self, prefix: &str, arguments: Option<&Value>) -> Result<(), SchemaViolation> {
        if self.is_empty() {
            return Ok(());
        }

        let empty = Map::new();
        let object = match arguments {
            None | Some(Value::Null) => &empty,
            Some(Value::Object(object)) => object,
            Some(other) => {
                return Err(SchemaViolation {
                    path: if prefix.is_empty() { "arguments".to_string() } else { prefix.to_string() },
                    reason: format!("expected object, got {}", json_type(other)),
                });
            }
        };

        for field in &self.fields {
            let path = if prefix.is_empty() {
                field.name.clone()
            } else {
                format!("{}.{}", prefix, field.name)
            };

            match object.get(&field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        return Err(SchemaViolation {
                            path,
                            reason: "required field is missing".to_string(),
                        });
                    }
                }
                Some(value) => {
                    if !field.kind.accepts(value) {
                        return Err(SchemaViolation {
                            path,
                            reason: format!(
                                "expected {}, got {}",
                                field.kind.name(),
                                json_type(value)
                            ),
                        });
                    }
                    if let FieldKind::Object(shape) = &field.kind {
                        shape.validate_at(&path, Some(value))?;
                    }
                }
            }
        }

        Ok(())
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
