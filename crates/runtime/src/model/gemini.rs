//! Gemini `generateContent` backend.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::types::{ChatModel, Message, ModelRequest, ModelResponse, Part, Role, Usage};
use super::errors::ModelError;
use crate::tools::{ToolCallRequest, ToolDeclaration};

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

// ─────────────────────────────────────────────────────────────────────────────
// API Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiRequest {
    contents: Vec<ApiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<ApiContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<ApiPart>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<ApiFunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<ApiFunctionResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: String,
    #[serde(default)]
    args: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunctionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiTool {
    function_declarations: Vec<ApiFunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct ApiFunctionDeclaration {
    name: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    #[serde(default)]
    candidates: Vec<ApiCandidate>,
    #[serde(default)]
    usage_metadata: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiCandidate {
    content: Option<ApiContent>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend Implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for creating a Gemini model.
#[derive(Debug, Clone)]
pub struct GeminiModelBuilder {
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiModelBuilder {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: GEMINI_API_URL.to_string(),
        }
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn build(self) -> GeminiModel {
        GeminiModel {
            client: reqwest::Client::new(),
            api_key: self.api_key,
            model: self.model,
            base_url: self.base_url,
        }
    }
}

/// Gemini API backend.
pub struct GeminiModel {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiModel {
    pub fn builder(api_key: impl Into<String>, model: impl Into<String>) -> GeminiModelBuilder {
        GeminiModelBuilder::new(api_key, model)
    }

    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        format!("{base}/models/{}:generateContent", self.model)
    }

    fn role_to_api(role: Role) -> &'static str {
        match role {
            // Function responses travel in user turns.
            Role::User | Role::Tool => "user",
            Role::Assistant => "model",
        }
    }

    fn message_to_api(msg: &Message) -> ApiContent {
        let parts = msg
            .parts
            .iter()
            .map(|part| match part {
                Part::Text(text) => ApiPart {
                    text: Some(text.clone()),
                    ..Default::default()
                },
                Part::ToolCall(call) => ApiPart {
                    function_call: Some(ApiFunctionCall {
                        id: Some(call.id.clone()),
                        name: call.name.clone(),
                        args: call.args.clone(),
                    }),
                    ..Default::default()
                },
                Part::ToolResult(result) => ApiPart {
                    function_response: Some(ApiFunctionResponse {
                        id: Some(result.id.clone()),
                        name: result.name.clone(),
                        response: result.to_payload(),
                    }),
                    ..Default::default()
                },
            })
            .collect();

        ApiContent {
            role: Some(Self::role_to_api(msg.role).to_string()),
            parts,
        }
    }

    fn tools_to_api(tools: &[ToolDeclaration]) -> Vec<ApiTool> {
        if tools.is_empty() {
            return Vec::new();
        }
        let function_declarations = tools
            .iter()
            .map(|tool| ApiFunctionDeclaration {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: (!tool.schema().is_empty()).then(|| tool.schema().to_json_schema()),
            })
            .collect();
        vec![ApiTool {
            function_declarations,
        }]
    }

    fn build_request(request: &ModelRequest<'_>) -> ApiRequest {
        ApiRequest {
            contents: request.messages.iter().map(Self::message_to_api).collect(),
            system_instruction: request.system.map(|system| ApiContent {
                role: None,
                parts: vec![ApiPart {
                    text: Some(system.to_string()),
                    ..Default::default()
                }],
            }),
            tools: Self::tools_to_api(request.tools),
        }
    }

    /// Decode a `generateContent` body. Malformed parts, such as
    /// function-call args that are not an object, fail the whole response.
    fn decode_response(body: &[u8]) -> Result<ModelResponse, ModelError> {
        let api_response: ApiResponse = serde_json::from_slice(body)
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;

        let usage = api_response
            .usage_metadata
            .as_ref()
            .map(|u| Usage {
                input_tokens: u.prompt_token_count,
                output_tokens: u.candidates_token_count,
            })
            .unwrap_or_default();
        let message = Self::response_to_message(api_response)?;

        Ok(ModelResponse { message, usage })
    }

    fn response_to_message(response: ApiResponse) -> Result<Message, ModelError> {
        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::InvalidResponse("no candidates".into()))?;

        let parts = candidate
            .content
            .map(|c| c.parts)
            .unwrap_or_default()
            .into_iter()
            .flat_map(|part| {
                let text = part.text.filter(|t| !t.is_empty()).map(Part::Text);
                let call = part.function_call.map(|call| {
                    let mut request = ToolCallRequest::new(call.name, call.args);
                    if let Some(id) = call.id {
                        request.id = id;
                    }
                    Part::ToolCall(request)
                });
                text.into_iter().chain(call)
            })
            .collect();

        Ok(Message::assistant(parts))
    }
}

impl std::fmt::Display for GeminiModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "gemini({})", self.model)
    }
}

impl ChatModel for GeminiModel {
    async fn generate(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        let api_request = Self::build_request(&request);
        debug!(
            model = %self.model,
            messages = api_request.contents.len(),
            tools = request.tools.len(),
            "sending request to Gemini"
        );

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api(format!("{status}: {body}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;
        Self::decode_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolCallResult;
    use serde_json::json;

    #[test]
    fn request_wire_format() {
        let call = ToolCallRequest::new("get_device_info", Map::new());
        let messages = vec![
            Message::user("what device am I on?"),
            Message::assistant(vec![Part::ToolCall(call.clone())]),
            Message::tool_results(vec![ToolCallResult::success(&call, json!("linux"))]),
        ];
        let tools = vec![
            ToolDeclaration::new("get_device_info", "Device facts"),
            ToolDeclaration::from_json_schema(
                "search",
                "Search",
                &json!({ "properties": { "q": { "type": "string" } }, "required": ["q"] }),
            ),
        ];
        let request = ModelRequest {
            system: Some("be helpful"),
            tools: &tools,
            messages: &messages,
        };

        let wire = serde_json::to_value(GeminiModel::build_request(&request)).unwrap();

        assert_eq!(wire["systemInstruction"]["parts"][0]["text"], "be helpful");
        assert_eq!(wire["contents"][0]["role"], "user");
        assert_eq!(wire["contents"][1]["role"], "model");
        assert_eq!(
            wire["contents"][1]["parts"][0]["functionCall"]["name"],
            "get_device_info"
        );
        assert_eq!(
            wire["contents"][1]["parts"][0]["functionCall"]["id"],
            call.id.as_str()
        );
        assert_eq!(
            wire["contents"][2]["parts"][0]["functionResponse"]["id"],
            call.id.as_str()
        );
        assert_eq!(wire["contents"][2]["role"], "user");
        assert_eq!(
            wire["contents"][2]["parts"][0]["functionResponse"]["response"],
            json!({ "result": "linux" })
        );

        let declarations = &wire["tools"][0]["functionDeclarations"];
        assert!(declarations[0].get("parameters").is_none());
        assert_eq!(declarations[1]["parameters"]["required"], json!(["q"]));
    }

    #[test]
    fn response_with_function_calls() {
        let response: ApiResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        { "functionCall": { "name": "a", "args": { "x": 1 } } },
                        { "functionCall": { "name": "b" } }
                    ]
                }
            }],
            "usageMetadata": { "promptTokenCount": 10, "candidatesTokenCount": 3 }
        }))
        .unwrap();

        let message = GeminiModel::response_to_message(response).unwrap();
        let calls = message.tool_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "a");
        assert_eq!(calls[0].args["x"], 1);
        assert!(calls[1].args.is_empty());
        assert!(message.text().is_empty());
    }

    #[test]
    fn function_call_ids_are_kept() {
        let body = json!({
            "candidates": [{
                "content": { "parts": [
                    { "functionCall": { "id": "call-7", "name": "a", "args": {} } }
                ] }
            }],
            "usageMetadata": { "promptTokenCount": 4, "candidatesTokenCount": 2 }
        });

        let response = GeminiModel::decode_response(body.to_string().as_bytes()).unwrap();
        assert_eq!(response.message.tool_calls()[0].id, "call-7");
        assert_eq!(response.usage.input_tokens, 4);
        assert_eq!(response.usage.output_tokens, 2);
    }

    #[test]
    fn non_object_function_args_are_invalid() {
        for args in [json!("oops"), json!(null), json!([1, 2])] {
            let body = json!({
                "candidates": [{
                    "content": { "parts": [
                        { "functionCall": { "name": "a", "args": args } }
                    ] }
                }]
            });
            let outcome = GeminiModel::decode_response(body.to_string().as_bytes());
            assert!(
                matches!(outcome, Err(ModelError::InvalidResponse(_))),
                "args {args} should be rejected"
            );
        }
    }

    #[test]
    fn response_without_candidates_is_invalid() {
        let response: ApiResponse = serde_json::from_value(json!({})).unwrap();
        assert!(matches!(
            GeminiModel::response_to_message(response),
            Err(ModelError::InvalidResponse(_))
        ));
    }

    #[test]
    fn endpoint_uses_model_name() {
        let model = GeminiModel::builder("key", "gemini-test")
            .base_url("http://localhost:8080/")
            .build();
        assert_eq!(
            model.endpoint(),
            "http://localhost:8080/models/gemini-test:generateContent"
        );
        assert_eq!(model.to_string(), "gemini(gemini-test)");
    }
}
