//! Tools backed by an HTTP endpoint.

use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use super::{ToolDeclaration, ToolError};

/// One remotely hosted tool, as declared in configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteToolConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub url: String,
    /// JSON Schema of the tool input; omitted means no parameters.
    #[serde(default)]
    pub input_schema: Option<Value>,
}

/// A catalog of remote tools invoked over HTTP.
///
/// Each call POSTs an MCP-shaped envelope,
/// `{"method":"tools/call","params":{"name":..,"arguments":{..}}}`, to the
/// tool's URL. A JSON response with a `result` field yields that field;
/// any other body is returned as-is.
#[derive(Debug, Clone)]
pub struct RemoteTools {
    client: reqwest::Client,
    declarations: Vec<ToolDeclaration>,
    urls: Vec<String>,
}

impl RemoteTools {
    pub fn new(configs: impl IntoIterator<Item = RemoteToolConfig>) -> Self {
        Self::with_client(reqwest::Client::new(), configs)
    }

    pub fn with_client(
        client: reqwest::Client,
        configs: impl IntoIterator<Item = RemoteToolConfig>,
    ) -> Self {
        let (declarations, urls) = configs
            .into_iter()
            .map(|config| {
                let declaration = match &config.input_schema {
                    Some(schema) => {
                        ToolDeclaration::from_json_schema(config.name, config.description, schema)
                    }
                    None => ToolDeclaration::new(config.name, config.description),
                };
                (declaration, config.url)
            })
            .unzip();

        Self {
            client,
            declarations,
            urls,
        }
    }

    pub fn declarations(&self) -> &[ToolDeclaration] {
        &self.declarations
    }

    pub async fn call(&self, name: &str, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let i = self
            .declarations
            .iter()
            .position(|d| d.name() == name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        let url = &self.urls[i];

        let envelope = json!({
            "method": mcp::methods::TOOLS_CALL,
            "params": {
                "name": name,
                "arguments": args,
            }
        });
        debug!(tool = name, %url, "calling remote tool");

        let response = self.client.post(url).json(&envelope).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ToolError::Execution(format!("{status}: {body}")));
        }

        Ok(match serde_json::from_str::<Value>(&body) {
            Ok(Value::Object(mut object)) if object.contains_key("result") => {
                object.remove("result").unwrap_or(Value::Null)
            }
            _ => Value::String(body),
        })
    }
}
