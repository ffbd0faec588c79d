//! In-process tools.

use std::sync::Arc;

use serde_json::{Map, Value};

use super::{ToolDeclaration, ToolError, ToolHandler};

/// Tools implemented in this process.
#[derive(Clone, Default)]
pub struct LocalTools {
    declarations: Vec<ToolDeclaration>,
    handlers: Vec<Arc<dyn ToolHandler>>,
}

impl LocalTools {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool. A later tool with the same name replaces the earlier one.
    pub fn add(&mut self, declaration: ToolDeclaration, handler: impl ToolHandler + 'static) {
        let handler: Arc<dyn ToolHandler> = Arc::new(handler);
        match self
            .declarations
            .iter()
            .position(|d| d.name() == declaration.name())
        {
            Some(i) => {
                self.declarations[i] = declaration;
                self.handlers[i] = handler;
            }
            None => {
                self.declarations.push(declaration);
                self.handlers.push(handler);
            }
        }
    }

    pub fn with_tool(mut self, declaration: ToolDeclaration, handler: impl ToolHandler + 'static) -> Self {
        self.add(declaration, handler);
        self
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
        self.handlers[i].call(args).await
    }
}

impl std::fmt::Debug for LocalTools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTools")
            .field(
                "tools",
                &self.declarations.iter().map(|d| d.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
