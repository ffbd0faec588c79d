use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use mcp::McpSession;
use runtime::tools::{DEVICE_INFO_TOOL, device_info_declaration, device_info_server};
use runtime::{
    ChatModel, ChatResponseState, ChatSession, DeviceInfoTool, FnTool, LocalTools, McpTools,
    Message, ModelError, ModelRequest, ModelResponse, Part, Role, SessionConfig, SourceKind,
    ToolCallRequest, ToolDeclaration, ToolError, ToolOutcome, ToolRegistry, Usage,
};
use serde_json::{Map, Value, json};

/// A model that plays back scripted replies and records what it was sent.
#[derive(Default)]
struct ScriptedModel {
    replies: Mutex<VecDeque<Message>>,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedModel {
    fn new(replies: impl IntoIterator<Item = Message>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
            seen: Mutex::default(),
        })
    }

    fn requests(&self) -> Vec<Vec<Message>> {
        self.seen.lock().unwrap().clone()
    }
}

impl ChatModel for ScriptedModel {
    async fn generate(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        self.seen.lock().unwrap().push(request.messages.to_vec());
        let message = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ModelError::Api("script exhausted".into()))?;
        Ok(ModelResponse {
            message,
            usage: Usage::default(),
        })
    }
}

fn call(name: &str, args: Value) -> Part {
    let Value::Object(args) = args else {
        panic!("arguments must be an object");
    };
    Part::ToolCall(ToolCallRequest::new(name, args))
}

fn reply(parts: Vec<Part>) -> Message {
    Message::assistant(parts)
}

fn text(s: &str) -> Message {
    reply(vec![Part::Text(s.into())])
}

fn device_registry() -> Arc<ToolRegistry> {
    Arc::new(
        ToolRegistry::new()
            .with_source(LocalTools::new().with_tool(device_info_declaration(), DeviceInfoTool)),
    )
}

/// Results of the tool batch the model saw on its `turn`-th call.
fn tool_batch(model: &ScriptedModel, turn: usize) -> Vec<runtime::ToolCallResult> {
    let requests = model.requests();
    let last = requests[turn].last().expect("non-empty history").clone();
    assert_eq!(last.role, Role::Tool);
    last.parts
        .into_iter()
        .map(|part| match part {
            Part::ToolResult(result) => result,
            other => panic!("unexpected part in tool batch: {other:?}"),
        })
        .collect()
}

#[tokio::test]
async fn device_info_round_trip() {
    let model = ScriptedModel::new([
        reply(vec![call(DEVICE_INFO_TOOL, json!({}))]),
        text("You are on a test machine."),
    ]);
    let mut session = ChatSession::new(Arc::clone(&model), device_registry());

    let events: Vec<_> = session.send("what device am I on?").collect().await;

    assert_eq!(
        events,
        [
            ChatResponseState::ToolCall {
                name: DEVICE_INFO_TOOL.into(),
                args: Map::new(),
            },
            ChatResponseState::Success {
                text: "You are on a test machine.".into(),
            },
        ]
    );

    let batch = tool_batch(&model, 1);
    assert_eq!(batch.len(), 1);
    let ToolOutcome::Success { result } = &batch[0].outcome else {
        panic!("device info failed: {:?}", batch[0].outcome);
    };
    let info: Value = serde_json::from_str(result).unwrap();
    assert_eq!(info["arch"], std::env::consts::ARCH);

    // user, model call, tool batch, model answer
    assert_eq!(session.history().len(), 4);
}

#[tokio::test]
async fn bad_tool_name_does_not_abort_the_turn() {
    let model = ScriptedModel::new([
        reply(vec![
            call(DEVICE_INFO_TOOL, json!({})),
            call("launch_rockets", json!({ "count": 3 })),
        ]),
        text("Only one of those worked."),
    ]);
    let mut session = ChatSession::new(Arc::clone(&model), device_registry());

    let events: Vec<_> = session.send("do things").collect().await;

    assert_eq!(events.len(), 3);
    assert!(matches!(&events[1], ChatResponseState::ToolCall { name, .. } if name == "launch_rockets"));
    assert!(matches!(&events[2], ChatResponseState::Success { .. }));

    // The model was asked again, with one result per requested call.
    assert_eq!(model.requests().len(), 2);
    let batch = tool_batch(&model, 1);
    assert_eq!(batch.len(), 2);
    assert!(!batch[0].is_error());
    assert_eq!(batch[1].name, "launch_rockets");
    let payload = batch[1].to_payload();
    assert!(payload["error"].as_str().unwrap().contains("launch_rockets"));
}

#[tokio::test]
async fn parallel_dispatch_keeps_one_result_per_call_in_order() {
    let echo = LocalTools::new().with_tool(
        ToolDeclaration::from_json_schema(
            "echo",
            "Echo n back",
            &json!({ "type": "object", "properties": { "n": { "type": "integer" } } }),
        ),
        FnTool::new(|args: Map<String, Value>| async move {
            Ok::<_, ToolError>(args.get("n").cloned().unwrap_or(Value::Null))
        }),
    );
    let registry = Arc::new(ToolRegistry::new().with_source(echo));
    let model = ScriptedModel::new([
        reply((0..5).map(|n| call("echo", json!({ "n": n }))).collect()),
        text("done"),
    ]);
    let mut session = ChatSession::new(Arc::clone(&model), registry).with_config(SessionConfig {
        parallel_tool_calls: true,
        ..Default::default()
    });

    let events: Vec<_> = session.send("count").collect().await;
    assert_eq!(events.len(), 6);

    let batch = tool_batch(&model, 1);
    let results: Vec<_> = batch
        .iter()
        .map(|r| r.to_payload()["result"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(results, ["0", "1", "2", "3", "4"]);
}

#[tokio::test]
async fn turn_limit_ends_a_runaway_loop() {
    let model = ScriptedModel::new(
        (0..10).map(|_| reply(vec![call(DEVICE_INFO_TOOL, json!({}))])),
    );
    let mut session = ChatSession::new(Arc::clone(&model), device_registry()).with_config(
        SessionConfig {
            max_turns: 2,
            ..Default::default()
        },
    );

    let events: Vec<_> = session.send("loop forever").collect().await;

    assert_eq!(model.requests().len(), 2);
    assert_eq!(
        events.last(),
        Some(&ChatResponseState::Error {
            message: "model exceeded the maximum of 2 turns".into()
        })
    );
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert!(session.history().is_empty());
}

/// Plays back a fixed list of model outcomes, errors included.
struct OutcomeModel(Mutex<VecDeque<Result<Message, ModelError>>>);

impl ChatModel for OutcomeModel {
    async fn generate(&self, _request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        let message = self
            .0
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ModelError::Api("script exhausted".into())))?;
        Ok(ModelResponse {
            message,
            usage: Usage::default(),
        })
    }
}

#[tokio::test]
async fn malformed_model_reply_mid_loop_rolls_back_the_whole_prompt() {
    let model = OutcomeModel(Mutex::new(VecDeque::from([
        Ok(text("hello")),
        Ok(reply(vec![call(DEVICE_INFO_TOOL, json!({}))])),
        Err(ModelError::InvalidResponse("functionCall args must be an object".into())),
    ])));
    let mut session = ChatSession::new(model, device_registry());

    let first: Vec<_> = session.send("hi").collect().await;
    assert_eq!(first, [ChatResponseState::Success { text: "hello".into() }]);
    let settled = session.history().to_vec();
    assert_eq!(settled.len(), 2);

    let events: Vec<_> = session.send("what device am I on?").collect().await;

    assert_eq!(
        events,
        [
            ChatResponseState::ToolCall {
                name: DEVICE_INFO_TOOL.into(),
                args: Map::new(),
            },
            ChatResponseState::Error {
                message: "invalid provider response: functionCall args must be an object".into(),
            },
        ]
    );
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert_eq!(session.history(), settled.as_slice());
}

#[tokio::test]
async fn mcp_tools_are_dispatched_through_the_session() {
    let mcp = McpSession::in_process(device_info_server()).await.unwrap();
    let tools = McpTools::discover(mcp.client()).await.unwrap();
    assert_eq!(tools.server(), "DeviceInfoMCP");

    let registry = Arc::new(ToolRegistry::new().with_source(tools));
    assert_eq!(registry.resolve(DEVICE_INFO_TOOL).unwrap().kind(), SourceKind::Mcp);

    let model = ScriptedModel::new([
        reply(vec![call(DEVICE_INFO_TOOL, json!({}))]),
        text("done"),
    ]);
    let mut session = ChatSession::new(Arc::clone(&model), registry);
    let events: Vec<_> = session.send("where am I?").collect().await;
    assert!(matches!(events.last(), Some(ChatResponseState::Success { .. })));

    let batch = tool_batch(&model, 1);
    let ToolOutcome::Success { result } = &batch[0].outcome else {
        panic!("MCP call failed: {:?}", batch[0].outcome);
    };
    assert!(result.contains("arch"));

    mcp.close().await.unwrap();
}

#[tokio::test]
async fn closed_mcp_session_turns_into_error_results() {
    let mcp = McpSession::in_process(device_info_server()).await.unwrap();
    let tools = McpTools::discover(mcp.client()).await.unwrap();
    let registry = ToolRegistry::new().with_source(tools);
    mcp.close().await.unwrap();

    let result = registry.call(DEVICE_INFO_TOOL, Map::new()).await;
    assert_eq!(
        result.to_payload(),
        json!({ "error": "execution failed: session closed" })
    );
}

#[tokio::test]
async fn local_tool_shadows_mcp_tool_with_the_same_name() {
    let mcp = McpSession::in_process(device_info_server()).await.unwrap();
    let tools = McpTools::discover(mcp.client()).await.unwrap();

    let registry = ToolRegistry::new()
        .with_source(tools)
        .with_source(LocalTools::new().with_tool(device_info_declaration(), DeviceInfoTool));

    assert_eq!(registry.len(), 1);
    assert_eq!(
        registry.resolve(DEVICE_INFO_TOOL).unwrap().kind(),
        SourceKind::Local
    );
    mcp.close().await.unwrap();
}
