use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mcp::{
    CallToolResult, CloseHandler, Error, InMemoryTransport, JsonRpcMessage, McpClient, McpServer,
    McpSession, MessageHandler, Tool, Transport, methods,
};
use serde_json::{Value, json};
use tokio::sync::Notify;

fn echo_server() -> McpServer {
    McpServer::new("EchoMCP", "1.0.0").with_tool(
        Tool::new("echo", "Echo the arguments back").with_input_schema(json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })),
        |args: Option<Value>| async move {
            let text = args
                .as_ref()
                .and_then(|a| a.get("text"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            CallToolResult::text(text)
        },
    )
}

/// Server-side transport that records everything delivered to it.
struct Recording {
    inner: InMemoryTransport,
    seen: Arc<Mutex<Vec<JsonRpcMessage>>>,
}

#[async_trait]
impl Transport for Recording {
    async fn start(&self) -> mcp::Result<()> {
        self.inner.start().await
    }

    async fn send(&self, message: JsonRpcMessage) -> mcp::Result<()> {
        self.inner.send(message).await
    }

    async fn close(&self) -> mcp::Result<()> {
        self.inner.close().await
    }

    fn set_handler(&self, handler: MessageHandler) {
        let seen = Arc::clone(&self.seen);
        self.inner.set_handler(Arc::new(move |message| {
            seen.lock().unwrap().push(message.clone());
            handler(message);
        }));
    }

    fn set_close_handler(&self, handler: CloseHandler) {
        self.inner.set_close_handler(handler);
    }
}

#[tokio::test]
async fn handshake_reports_server_info() {
    let session = McpSession::in_process(echo_server()).await.unwrap();
    let info = session.client().server_info().unwrap();

    assert_eq!(info.server_info.name, "EchoMCP");
    assert_eq!(info.server_info.version, "1.0.0");
    assert!(info.capabilities.tools.unwrap().list_changed);
}

#[tokio::test]
async fn list_and_call_tools() {
    let session = McpSession::in_process(echo_server()).await.unwrap();

    let tools = session.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "echo");
    assert_eq!(tools[0].input_schema["required"], json!(["text"]));

    let result = session
        .call_tool("echo", Some(json!({ "text": "hi" })))
        .await
        .unwrap();
    assert_eq!(result.joined_text(), "hi");

    session.close().await.unwrap();
}

#[tokio::test]
async fn unknown_tool_is_a_protocol_error() {
    let session = McpSession::in_process(echo_server()).await.unwrap();

    let err = session.call_tool("nope", None).await.unwrap_err();
    let Error::JsonRpc(err) = err else {
        panic!("expected a JSON-RPC error, got {err:?}");
    };
    assert_eq!(err.code, mcp::JsonRpcError::INVALID_PARAMS);
    assert!(err.message.contains("nope"));
}

#[tokio::test]
async fn failed_tool_result_surfaces_as_error() {
    let server = McpServer::new("Failing", "0.1.0").with_tool(
        Tool::new("explode", "Always fails"),
        |_args: Option<Value>| async { CallToolResult::error("kaboom") },
    );
    let session = McpSession::in_process(server).await.unwrap();

    let err = session.call_tool("explode", None).await.unwrap_err();
    assert!(matches!(err, Error::ToolCallFailed(ref msg) if msg == "kaboom"));
}

#[tokio::test]
async fn tool_call_reaches_server_exactly_once_unmodified() {
    let (client_end, server_end) = InMemoryTransport::linked();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recording = Recording {
        inner: server_end,
        seen: Arc::clone(&seen),
    };
    let _handle = echo_server().serve(Arc::new(recording));

    let client = McpClient::new(Arc::new(client_end));
    client.connect().await.unwrap();
    client
        .call_tool("echo", Some(json!({ "text": "once" })))
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    let calls: Vec<_> = seen
        .iter()
        .filter_map(|m| match m {
            JsonRpcMessage::Request(r) if r.method == methods::TOOLS_CALL => Some(r),
            _ => None,
        })
        .collect();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, "tools/call");
    assert_eq!(calls[0].params.as_ref().unwrap()["name"], "echo");

    // Ids are handed out in order: initialize got 1, the call got 2.
    assert_eq!(calls[0].id, mcp::RequestId::Number(2));
}

#[tokio::test]
async fn server_rejects_tools_before_initialize() {
    let (client_end, server_end) = InMemoryTransport::linked();
    let _handle = echo_server().serve(Arc::new(server_end));

    let replies = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&replies);
    client_end.set_handler(Arc::new(move |m| sink.lock().unwrap().push(m)));

    client_end
        .send(mcp::JsonRpcRequest::new(1i64, methods::TOOLS_LIST).into())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let replies = replies.lock().unwrap();
    let Some(JsonRpcMessage::Response(response)) = replies.first() else {
        panic!("expected a response");
    };
    let err = response.clone().into_result().unwrap_err();
    assert_eq!(err.code, mcp::JsonRpcError::SERVER_NOT_INITIALIZED);
}

#[tokio::test]
async fn close_fails_in_flight_calls() {
    let started = Arc::new(Notify::new());
    let signal = Arc::clone(&started);
    let server = McpServer::new("Slow", "0.1.0").with_tool(
        Tool::new("hang", "Never returns"),
        move |_args: Option<Value>| {
            let signal = Arc::clone(&signal);
            async move {
                signal.notify_one();
                futures::future::pending::<CallToolResult>().await
            }
        },
    );
    let session = Arc::new(McpSession::in_process(server).await.unwrap());

    let caller = Arc::clone(&session);
    let call = tokio::spawn(async move { caller.call_tool("hang", None).await });

    started.notified().await;
    session.close().await.unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(1), call)
        .await
        .expect("call should resolve after close")
        .unwrap();
    assert!(matches!(outcome, Err(Error::SessionClosed)));

    assert!(matches!(
        session.call_tool("hang", None).await,
        Err(Error::SessionClosed)
    ));
}

/// A server whose `hang` tool signals `started` and then waits for `release`.
fn gated_server(started: Arc<Notify>, release: Arc<Notify>) -> McpServer {
    echo_server().with_tool(Tool::new("hang", "Waits to be released"), move |_args: Option<Value>| {
        let started = Arc::clone(&started);
        let release = Arc::clone(&release);
        async move {
            started.notify_one();
            release.notified().await;
            CallToolResult::text("released")
        }
    })
}

#[tokio::test]
async fn slow_tool_does_not_block_other_requests() {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let server = gated_server(Arc::clone(&started), Arc::clone(&release));
    let session = Arc::new(McpSession::in_process(server).await.unwrap());

    let caller = Arc::clone(&session);
    let slow = tokio::spawn(async move { caller.call_tool("hang", None).await });
    started.notified().await;

    let quick = tokio::time::timeout(
        Duration::from_secs(1),
        session.call_tool("echo", Some(json!({ "text": "still here" }))),
    )
    .await
    .expect("echo must not wait behind the slow tool")
    .unwrap();
    assert_eq!(quick.joined_text(), "still here");

    release.notify_one();
    let slow = slow.await.unwrap().unwrap();
    assert_eq!(slow.joined_text(), "released");

    session.close().await.unwrap();
}

#[tokio::test]
async fn server_shutdown_fails_in_flight_calls_with_server_exited() {
    let started = Arc::new(Notify::new());
    let server = gated_server(Arc::clone(&started), Arc::new(Notify::new()));

    let (client_end, server_end) = InMemoryTransport::linked();
    let handle = server.serve(Arc::new(server_end));
    let client = Arc::new(McpClient::new(Arc::new(client_end)));
    client.connect().await.unwrap();

    let caller = Arc::clone(&client);
    let call = tokio::spawn(async move { caller.call_tool("hang", None).await });
    started.notified().await;
    handle.shutdown().await.unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(1), call)
        .await
        .expect("call should resolve once the server is gone")
        .unwrap();
    assert!(matches!(outcome, Err(Error::ServerExited)));
    assert!(matches!(client.list_tools().await, Err(Error::ServerExited)));
}
