//! The tool-calling chat loop.
//!
//! A [`ChatSession`] owns the conversation with one model. Each
//! [`send`](ChatSession::send) drives the model until it answers with plain
//! text, dispatching any requested tool calls through the shared
//! [`ToolRegistry`] and yielding progress as a stream of
//! [`ChatResponseState`] values.

use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::model::{ChatModel, Message, ModelRequest, Usage};
use crate::tools::{ToolCallRequest, ToolDeclaration, ToolRegistry};

pub const DEFAULT_MAX_TURNS: usize = 16;

/// Emitted when the model stops without calling a tool or saying anything.
pub const NO_TEXT_ERROR: &str = "Model finished processing but returned no text content.";

pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "\
You are a helpful AI assistant with access to various external tools and APIs. \
Your goal is to complete tasks thoroughly and autonomously by making full use of these tools. \
Here are your core operating principles:

1. **Take initiative** - Don't wait for user permission to use tools. If a tool would help complete the task, use it immediately.
2. **Chain multiple tools together** - Many tasks require multiple tool calls in sequence. Plan out and execute the full chain of calls needed to achieve the goal.
3. **Handle errors gracefully** - If a tool call fails, try alternative approaches or tools rather than asking the user what to do.
4. **Make reasonable assumptions** - When tool calls require parameters, use your best judgment to provide appropriate values rather than asking the user.
5. **Show your work** - After completing tool calls, explain what you did and show relevant results, but focus on the final outcome the user wanted.
6. **Be thorough** - Use tools repeatedly as needed until you're confident you've fully completed the task. Don't stop at partial solutions.

Your responses should focus on results rather than asking questions. \
Only ask the user for clarification if the task itself is unclear or impossible with the tools available.";

const EVENT_CAPACITY: usize = 64;

/// Tunables for a [`ChatSession`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub system_instruction: String,
    /// Model calls allowed per `send`.
    pub max_turns: usize,
    /// Run the tool calls of one model turn concurrently.
    pub parallel_tool_calls: bool,
}

impl SessionConfig {
    /// Reject settings the loop cannot run with.
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_turns == 0 {
            return Err(crate::Error::Config(
                "max_turns must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            max_turns: DEFAULT_MAX_TURNS,
            parallel_tool_calls: false,
        }
    }
}

/// Observable progress of one `send`.
///
/// Any number of `ToolCall` events precede exactly one terminal `Success`
/// or `Error`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChatResponseState {
    ToolCall {
        name: String,
        args: Map<String, Value>,
    },
    Success {
        text: String,
    },
    Error {
        message: String,
    },
}

impl ChatResponseState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::ToolCall { .. })
    }
}

/// Where the loop is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    AwaitingModel,
    DispatchingTools,
    Done,
    Failed,
}

/// A conversation with one model over a fixed tool catalog.
pub struct ChatSession<M> {
    model: M,
    registry: Arc<ToolRegistry>,
    declarations: Vec<ToolDeclaration>,
    config: SessionConfig,
    history: Vec<Message>,
    state: LoopState,
    usage: Usage,
    events: broadcast::Sender<ChatResponseState>,
}

impl<M: ChatModel> ChatSession<M> {
    /// Create a session. The registry's catalog is snapshotted here.
    pub fn new(model: M, registry: Arc<ToolRegistry>) -> Self {
        let declarations = registry.declarations().into_iter().cloned().collect();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            model,
            registry,
            declarations,
            config: SessionConfig::default(),
            history: Vec::new(),
            state: LoopState::Idle,
            usage: Usage::default(),
            events,
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Tools advertised to the model.
    pub fn tools(&self) -> &[ToolDeclaration] {
        &self.declarations
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Token usage summed over every model call so far.
    pub fn usage(&self) -> Usage {
        self.usage
    }

    /// Forget the conversation so far.
    pub fn reset(&mut self) {
        self.history.clear();
        self.state = LoopState::Idle;
    }

    /// Receive a copy of every event from subsequent sends.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatResponseState> {
        self.events.subscribe()
    }

    /// Send a user prompt and drive the loop to completion.
    ///
    /// The stream ends after its terminal event. A failed or abandoned send
    /// leaves the history as it was before the prompt.
    pub fn send(&mut self, prompt: impl Into<String>) -> BoxStream<'_, ChatResponseState> {
        self.state = LoopState::Idle;
        let driver = Driver {
            checkpoint: self.history.len(),
            session: self,
            step: Step::Prompt(prompt.into()),
            turns: 0,
        };
        stream::unfold(driver, |mut driver| async move {
            let event = driver.next_event().await?;
            Some((event, driver))
        })
        .boxed()
    }
}

enum Step {
    Prompt(String),
    Model,
    Announce(Vec<ToolCallRequest>, usize),
    Dispatch(Vec<ToolCallRequest>),
    Finished,
}

struct Driver<'a, M: ChatModel> {
    session: &'a mut ChatSession<M>,
    step: Step,
    checkpoint: usize,
    turns: usize,
}

impl<M: ChatModel> Driver<'_, M> {
    async fn next_event(&mut self) -> Option<ChatResponseState> {
        loop {
            match std::mem::replace(&mut self.step, Step::Finished) {
                Step::Prompt(prompt) => {
                    info!(prompt_len = prompt.len(), "new prompt");
                    self.session.history.push(Message::user(prompt));
                    self.step = Step::Model;
                }
                Step::Model => {
                    if let Some(event) = self.call_model().await {
                        return Some(self.emit(event));
                    }
                }
                Step::Announce(calls, next) => {
                    let Some(call) = calls.get(next) else {
                        self.step = Step::Dispatch(calls);
                        continue;
                    };
                    let event = ChatResponseState::ToolCall {
                        name: call.name.clone(),
                        args: call.args.clone(),
                    };
                    self.step = Step::Announce(calls, next + 1);
                    return Some(self.emit(event));
                }
                Step::Dispatch(calls) => {
                    self.dispatch(calls).await;
                    self.step = Step::Model;
                }
                Step::Finished => return None,
            }
        }
    }

    /// One model turn. Returns a terminal event, or `None` after queueing
    /// the requested tool calls.
    async fn call_model(&mut self) -> Option<ChatResponseState> {
        let max_turns = self.session.config.max_turns;
        if self.turns >= max_turns {
            warn!(max_turns, "turn limit reached");
            return Some(self.fail(format!(
                "model exceeded the maximum of {max_turns} turns"
            )));
        }
        self.turns += 1;
        self.session.state = LoopState::AwaitingModel;

        let request = ModelRequest {
            system: Some(self.session.config.system_instruction.as_str())
                .filter(|s| !s.is_empty()),
            tools: &self.session.declarations,
            messages: &self.session.history,
        };
        let response = match self.session.model.generate(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(turn = self.turns, error = %e, "model call failed");
                return Some(self.fail(e.to_string()));
            }
        };

        self.session.usage.input_tokens += response.usage.input_tokens;
        self.session.usage.output_tokens += response.usage.output_tokens;

        let calls = response.message.tool_calls();
        let text = response.message.text();
        debug!(turn = self.turns, tool_calls = calls.len(), text_len = text.len(), "model responded");
        self.session.history.push(response.message);

        if !calls.is_empty() {
            self.session.state = LoopState::DispatchingTools;
            self.step = Step::Announce(calls, 0);
            return None;
        }
        if text.trim().is_empty() {
            return Some(self.fail(NO_TEXT_ERROR.to_string()));
        }

        self.session.state = LoopState::Done;
        info!(turns = self.turns, "prompt answered");
        Some(ChatResponseState::Success { text })
    }

    async fn dispatch(&mut self, calls: Vec<ToolCallRequest>) {
        let registry = Arc::clone(&self.session.registry);
        let results = if self.session.config.parallel_tool_calls {
            futures::future::join_all(calls.iter().map(|call| registry.dispatch(call))).await
        } else {
            let mut results = Vec::with_capacity(calls.len());
            for call in &calls {
                results.push(registry.dispatch(call).await);
            }
            results
        };
        debug!(
            results = results.len(),
            failed = results.iter().filter(|r| r.is_error()).count(),
            "tool round complete"
        );
        self.session.history.push(Message::tool_results(results));
    }

    fn fail(&mut self, message: String) -> ChatResponseState {
        self.session.history.truncate(self.checkpoint);
        self.session.state = LoopState::Failed;
        ChatResponseState::Error { message }
    }

    fn emit(&mut self, event: ChatResponseState) -> ChatResponseState {
        let _ = self.session.events.send(event.clone());
        event
    }
}

impl<M: ChatModel> Drop for Driver<'_, M> {
    fn drop(&mut self) {
        if !matches!(self.session.state, LoopState::Done | LoopState::Failed) {
            debug!("send abandoned before completion, rolling back");
            self.session.history.truncate(self.checkpoint);
            self.session.state = LoopState::Idle;
        }
    }
}
