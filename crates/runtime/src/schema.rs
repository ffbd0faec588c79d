//! Translation from JSON Schema tool inputs to model parameter declarations.
//!
//! Translation never fails: unknown or missing types fall back to free text
//! and a malformed `required` list is treated as empty.

use std::collections::BTreeSet;

use serde_json::{Map, Value, json};

/// Parameter name used when a scalar schema doesn't name itself.
pub const DEFAULT_PARAMETER_NAME: &str = "value";

/// One typed parameter of a tool declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub description: String,
    pub kind: ParameterKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParameterKind {
    Text,
    Enum(Vec<String>),
    /// 32-bit integer.
    Integer,
    /// 64-bit integer.
    Long,
    Number,
    Boolean,
    /// Homogeneous array; `None` when the item schema is absent.
    Array(Option<Box<Parameter>>),
    Object(Vec<Parameter>),
}

/// Parameters and required names extracted from a schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedSchema {
    pub parameters: Vec<Parameter>,
    pub required: BTreeSet<String>,
}

impl ParsedSchema {
    /// Parse a schema from its JSON text. Empty or invalid text yields no
    /// parameters.
    pub fn parse(schema: &str) -> Self {
        if schema.trim().is_empty() {
            return Self::default();
        }
        match serde_json::from_str::<Value>(schema) {
            Ok(value) => translate(&value),
            Err(e) => {
                tracing::warn!(error = %e, "tool schema is not valid JSON, ignoring it");
                Self::default()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Render as an OpenAPI-style object schema with upper-case type names,
    /// the shape Gemini function declarations expect.
    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .parameters
            .iter()
            .map(|p| (p.name.clone(), p.to_json_schema()))
            .collect();

        let mut schema = json!({
            "type": "OBJECT",
            "properties": properties,
        });
        if !self.required.is_empty() {
            schema["required"] = json!(self.required);
        }
        schema
    }
}

impl Parameter {
    fn to_json_schema(&self) -> Value {
        let mut schema = match &self.kind {
            ParameterKind::Text => json!({ "type": "STRING" }),
            ParameterKind::Enum(values) => {
                json!({ "type": "STRING", "format": "enum", "enum": values })
            }
            ParameterKind::Integer => json!({ "type": "INTEGER", "format": "int32" }),
            ParameterKind::Long => json!({ "type": "INTEGER", "format": "int64" }),
            ParameterKind::Number => json!({ "type": "NUMBER", "format": "double" }),
            ParameterKind::Boolean => json!({ "type": "BOOLEAN" }),
            ParameterKind::Array(items) => match items {
                Some(item) => json!({ "type": "ARRAY", "items": item.to_json_schema() }),
                None => json!({ "type": "ARRAY" }),
            },
            ParameterKind::Object(fields) => {
                let properties: Map<String, Value> = fields
                    .iter()
                    .map(|p| (p.name.clone(), p.to_json_schema()))
                    .collect();
                json!({ "type": "OBJECT", "properties": properties })
            }
        };
        schema["description"] = Value::String(self.description.clone());
        schema
    }
}

/// Translate a JSON Schema node into parameters and required names.
///
/// A node with a `type` but no `properties` is a scalar and becomes a single
/// parameter named by its own `name` field. Anything else is read as an
/// object whose `properties` are translated in declaration order.
pub fn translate(schema: &Value) -> ParsedSchema {
    let Some(node) = schema.as_object() else {
        return ParsedSchema::default();
    };

    if node.contains_key("type") && !node.contains_key("properties") {
        let name = node
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_PARAMETER_NAME);
        return ParsedSchema {
            parameters: vec![parameter(name, node)],
            required: BTreeSet::new(),
        };
    }

    let required = node
        .get("required")
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let parameters = node
        .get("properties")
        .and_then(Value::as_object)
        .map(|properties| {
            properties
                .iter()
                .map(|(name, property)| match property.as_object() {
                    Some(property) => parameter(name, property),
                    None => Parameter {
                        name: name.clone(),
                        description: "string".to_string(),
                        kind: ParameterKind::Text,
                    },
                })
                .collect()
        })
        .unwrap_or_default();

    ParsedSchema {
        parameters,
        required,
    }
}

fn parameter(name: &str, node: &Map<String, Value>) -> Parameter {
    let declared = node.get("type").and_then(Value::as_str);
    let description = node
        .get("description")
        .and_then(Value::as_str)
        .or(declared)
        .unwrap_or("string")
        .to_string();

    let kind = match declared {
        Some("string") => match node.get("enum").and_then(Value::as_array) {
            Some(values) => ParameterKind::Enum(
                values
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
            ),
            None => ParameterKind::Text,
        },
        Some("integer") => match node.get("format").and_then(Value::as_str) {
            Some("int64") => ParameterKind::Long,
            _ => ParameterKind::Integer,
        },
        Some("number") => ParameterKind::Number,
        Some("boolean") => ParameterKind::Boolean,
        Some("array") => {
            let item = node
                .get("items")
                .map(translate)
                .and_then(|items| items.parameters.into_iter().next())
                .map(Box::new);
            ParameterKind::Array(item)
        }
        Some("object") => {
            let fields = match node.get("properties") {
                Some(_) => translate(&Value::Object(node.clone())).parameters,
                None => Vec::new(),
            };
            ParameterKind::Object(fields)
        }
        _ => ParameterKind::Text,
    };

    Parameter {
        name: name.to_string(),
        description,
        kind,
    }
}
