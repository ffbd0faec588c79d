//! Tool-related types.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::schema::{Parameter, ParsedSchema};

/// A tool as advertised to the model, independent of where it runs.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDeclaration {
    name: String,
    description: String,
    schema: ParsedSchema,
}

impl ToolDeclaration {
    /// A declaration with no parameters.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema: ParsedSchema::default(),
        }
    }

    /// Build a declaration from a JSON Schema describing the tool's input.
    pub fn from_json_schema(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: &Value,
    ) -> Self {
        Self::new(name, description).with_schema(crate::schema::translate(input_schema))
    }

    pub fn with_schema(mut self, schema: ParsedSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.schema.parameters
    }

    pub fn required(&self) -> &BTreeSet<String> {
        &self.schema.required
    }

    pub fn schema(&self) -> &ParsedSchema {
        &self.schema
    }
}

impl From<&mcp::Tool> for ToolDeclaration {
    fn from(tool: &mcp::Tool) -> Self {
        Self::from_json_schema(
            tool.name.clone(),
            tool.description.clone().unwrap_or_default(),
            &tool.input_schema,
        )
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Correlates the call with its result.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl ToolCallRequest {
    pub fn new(name: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            args,
        }
    }
}

/// What came back from a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success { result: String },
    Error { message: String },
}

/// The result of one [`ToolCallRequest`]; produced even when the call fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub id: String,
    pub name: String,
    pub outcome: ToolOutcome,
}

impl ToolCallResult {
    pub fn success(request: &ToolCallRequest, output: Value) -> Self {
        let result = match output {
            Value::String(s) => s,
            other => other.to_string(),
        };
        Self {
            id: request.id.clone(),
            name: request.name.clone(),
            outcome: ToolOutcome::Success { result },
        }
    }

    pub fn error(request: &ToolCallRequest, message: impl Into<String>) -> Self {
        Self {
            id: request.id.clone(),
            name: request.name.clone(),
            outcome: ToolOutcome::Error {
                message: message.into(),
            },
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Error { .. })
    }

    /// The single-key object handed back to the model:
    /// `{"result": ...}` or `{"error": ...}`.
    pub fn to_payload(&self) -> Value {
        match &self.outcome {
            ToolOutcome::Success { result } => json!({ "result": result }),
            ToolOutcome::Error { message } => json!({ "error": message }),
        }
    }
}
