//! Tool handler trait.

use std::future::Future;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::ToolError;

/// Executes one tool.
///
/// Handlers may be called concurrently when several calls from one model
/// turn are dispatched in parallel.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: &Map<String, Value>) -> Result<Value, ToolError>;
}

/// Adapts an async closure into a [`ToolHandler`].
pub struct FnTool<F>(F);

impl<F> FnTool<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> ToolHandler for FnTool<F>
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolError>> + Send,
{
    async fn call(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        (self.0)(args.clone()).await
    }
}
